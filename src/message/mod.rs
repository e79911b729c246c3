use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[cfg(test)]
mod tests;

/// Reserved addressing value for broadcast delivery.
///
/// Never a real agent name; the broker rejects it at registration.
pub const BROADCAST: &str = "broadcast";

/// Default number of retries carried on every message.
///
/// Retry bookkeeping travels on the wire but enforcement is an
/// agent-level responsibility, not the broker's.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Message types exchanged between agents.
///
/// Closed at compile time; the broker treats all types uniformly and
/// only handler dispatch keys on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    // Monitoring
    ConsumptionUpdate,
    AnomalyDetected,
    DeviceStatusChange,

    // Weather
    WeatherUpdate,
    TemperatureForecast,
    CoolingRecommendation,

    // Optimization
    OptimizationResult,
    ScheduleUpdate,
    CostAnalysis,
    SavingsReport,

    // Device control
    DeviceControl,
    ExecutionResult,
    ManualOverride,

    // System
    AgentHeartbeat,
    SystemStatus,
    ErrorNotification,
    ShutdownSignal,
}

/// Message priority, carried as sender-supplied metadata.
///
/// The broker never reorders delivery by priority; mailboxes stay FIFO.
/// Consumers that care can re-sort their own drained batch with
/// [`sort_by_priority`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MessagePriority {
    Critical = 1,
    High = 2,
    Medium = 3,
    Low = 4,
}

impl From<MessagePriority> for u8 {
    fn from(priority: MessagePriority) -> u8 {
        priority as u8
    }
}

impl TryFrom<u8> for MessagePriority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessagePriority::Critical),
            2 => Ok(MessagePriority::High),
            3 => Ok(MessagePriority::Medium),
            4 => Ok(MessagePriority::Low),
            other => Err(format!("invalid priority ordinal {}", other)),
        }
    }
}

/// One unit of inter-agent communication.
///
/// Immutable once constructed; the broker clones it into each target
/// mailbox. `content` is an opaque JSON object meaningful only to
/// sender and receiver. Timestamps serialize as ISO-8601 (UTC).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique id, derived from a broker counter plus creation time.
    pub id: String,

    /// Message type, keyed by handler dispatch.
    #[serde(rename = "type")]
    pub kind: MessageType,

    /// Sending agent name.
    pub from_agent: String,

    /// Target agent name, or [`BROADCAST`].
    pub to_agent: String,

    /// Creation time (UTC).
    pub timestamp: DateTime<Utc>,

    /// Sender-supplied priority metadata.
    pub priority: MessagePriority,

    /// Opaque structured payload.
    pub content: Value,

    /// Optional token pairing a response to its originating request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Optional deadline; expired messages are purged by the broker sweep.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Retry bookkeeping, not acted upon by the broker.
    #[serde(default)]
    pub retry_count: u32,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl Message {
    /// Builds a message with a fresh timestamp and default retry bookkeeping.
    pub fn new(
        id: String,
        kind: MessageType,
        from_agent: &str,
        to_agent: &str,
        content: Value,
        priority: MessagePriority,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            id,
            kind,
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
            timestamp: Utc::now(),
            priority,
            content,
            correlation_id,
            expires_at: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Sets an expiry deadline. Expired messages are swept from mailboxes
    /// and history instead of being delivered.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// True if the message carries a deadline that has already passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline < now)
    }

    /// True if the message is addressed to the broadcast sentinel.
    pub fn is_broadcast(&self) -> bool {
        self.to_agent == BROADCAST
    }
}

/// Re-sorts a drained batch by priority, highest urgency first.
///
/// Stable: messages of equal priority keep their FIFO order. This is a
/// consumer-side tool; the broker itself never calls it.
pub fn sort_by_priority(messages: &mut [Message]) {
    messages.sort_by_key(|m| m.priority);
}
