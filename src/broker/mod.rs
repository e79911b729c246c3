use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

mod error;
pub mod stats;

pub use error::BrokerError;

use crate::config::BrokerConfig;
use crate::message::{Message, MessagePriority, MessageType, BROADCAST};
use stats::{BrokerStats, StatsTracker};

/// Heartbeat age (seconds) past which an agent is reported as `warning`.
pub const WARNING_AFTER_SECS: i64 = 60;

/// Heartbeat age (seconds) past which an agent is reported as `unresponsive`.
pub const UNRESPONSIVE_AFTER_SECS: i64 = 120;

/// Optional per-type callback invoked in addition to mailbox delivery.
///
/// Handler failures are caught and logged; they never abort delivery or
/// surface to the sender.
pub type MessageHandler = Arc<dyn Fn(&Message) -> anyhow::Result<()> + Send + Sync>;

/// Optional callback invoked after each successful delivery, e.g. to log
/// messages to a store. Failures are caught and logged, never surfaced.
pub type PersistFn = Box<dyn Fn(&str, &str, MessageType, &Value) -> anyhow::Result<()> + Send + Sync>;

/// Registry entry for one agent, owned exclusively by the broker.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRegistration {
    pub name: String,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    /// Free-form capability/description blob supplied at registration.
    pub info: Value,
}

/// Liveness derived from heartbeat age; never stored authoritatively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Active,
    Warning,
    Unresponsive,
}

impl Liveness {
    fn from_heartbeat_age(age_secs: i64) -> Self {
        if age_secs > UNRESPONSIVE_AFTER_SECS {
            Liveness::Unresponsive
        } else if age_secs > WARNING_AFTER_SECS {
            Liveness::Warning
        } else {
            Liveness::Active
        }
    }
}

/// Point-in-time view of one registered agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatusReport {
    pub name: String,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub status: Liveness,
    pub queue_size: usize,
    pub time_since_heartbeat: f64,
    pub info: Value,
}

/// In-memory message broker: agent directory plus message relay.
///
/// Holds one bounded FIFO mailbox per registered agent (ring semantics:
/// the oldest message is dropped on overflow) and a bounded global
/// history for audit. All operations are synchronous with respect to
/// the caller; concurrent agent tasks are safe because every mutable
/// structure is a concurrent map or behind a lock.
pub struct MessageBroker {
    mailbox_capacity: usize,
    history_capacity: usize,

    /// Agent directory. The broker is the only writer.
    registry: DashMap<String, AgentRegistration>,

    /// Per-agent FIFO mailboxes.
    mailboxes: DashMap<String, VecDeque<Message>>,

    /// Per-(agent, type) delivery callbacks.
    handlers: DashMap<(String, MessageType), MessageHandler>,

    /// Agents receiving broadcast messages (all registered agents by default).
    broadcast_subscribers: DashSet<String>,

    /// Bounded global message history for audit/replay.
    history: Mutex<VecDeque<Message>>,

    stats: StatsTracker,

    /// Pluggable persistence hook, invoked after successful delivery.
    persist: Option<PersistFn>,

    /// Monotonic component of generated message ids.
    message_counter: AtomicU64,

    /// Shutdown signal for the background sweeper.
    shutdown_tx: watch::Sender<bool>,
}

impl MessageBroker {
    pub fn new(config: BrokerConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        info!(
            mailbox_capacity = config.mailbox_capacity,
            history_capacity = config.history_capacity,
            "Message broker initialized"
        );

        Self {
            mailbox_capacity: config.mailbox_capacity,
            history_capacity: config.history_capacity,
            registry: DashMap::new(),
            mailboxes: DashMap::new(),
            handlers: DashMap::new(),
            broadcast_subscribers: DashSet::new(),
            history: Mutex::new(VecDeque::new()),
            stats: StatsTracker::new(),
            persist: None,
            message_counter: AtomicU64::new(0),
            shutdown_tx,
        }
    }

    /// Installs a persistence callback invoked after each delivered message.
    pub fn with_persistence(mut self, persist: PersistFn) -> Self {
        self.persist = Some(persist);
        self
    }

    /// Registers an agent: creates a registry entry, a fresh mailbox, and a
    /// broadcast subscription.
    ///
    /// Idempotent on name collision: the last registration wins and the
    /// mailbox is reset, so no stale messages survive an identity change.
    /// Fails only for the reserved broadcast name or an empty name.
    pub fn register_agent(&self, name: &str, info: Value) -> Result<(), BrokerError> {
        if name == BROADCAST {
            return Err(BrokerError::ReservedName(name.to_string()));
        }
        if name.is_empty() {
            return Err(BrokerError::InvalidName(name.to_string()));
        }

        let now = Utc::now();
        let replaced = self
            .registry
            .insert(
                name.to_string(),
                AgentRegistration {
                    name: name.to_string(),
                    registered_at: now,
                    last_heartbeat: now,
                    info,
                },
            )
            .is_some();

        self.mailboxes.insert(name.to_string(), VecDeque::new());
        self.broadcast_subscribers.insert(name.to_string());
        self.stats.record_registration();

        if replaced {
            info!(agent = %name, "Agent re-registered, mailbox reset");
        } else {
            info!(agent = %name, "Agent registered");
        }
        Ok(())
    }

    /// Removes the registry entry, mailbox, handlers, and broadcast
    /// subscription. Returns false if the agent was not registered.
    pub fn unregister_agent(&self, name: &str) -> bool {
        if self.registry.remove(name).is_none() {
            return false;
        }
        self.mailboxes.remove(name);
        self.broadcast_subscribers.remove(name);
        self.handlers.retain(|(agent, _), _| agent != name);
        info!(agent = %name, "Agent unregistered");
        true
    }

    /// Registers a callback invoked in addition to mailbox delivery whenever
    /// a message of `kind` arrives for `name`.
    pub fn register_handler<F>(&self, name: &str, kind: MessageType, handler: F)
    where
        F: Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers
            .insert((name.to_string(), kind), Arc::new(handler));
        debug!(agent = %name, kind = ?kind, "Handler registered");
    }

    /// Constructs a message and delivers it.
    ///
    /// Fire and forget: always returns the generated message id, even when
    /// the target is unknown; delivery failure is surfaced only through
    /// broker statistics.
    pub fn send_message(
        &self,
        from_agent: &str,
        to_agent: &str,
        kind: MessageType,
        content: Value,
        priority: MessagePriority,
        correlation_id: Option<String>,
    ) -> String {
        let message = Message::new(
            self.next_message_id(),
            kind,
            from_agent,
            to_agent,
            content,
            priority,
            correlation_id,
        );
        self.post(message)
    }

    /// Delivers an already-constructed message (e.g. one carrying an expiry
    /// deadline). Same fire-and-forget contract as [`send_message`].
    ///
    /// [`send_message`]: MessageBroker::send_message
    pub fn post(&self, message: Message) -> String {
        let id = message.id.clone();

        if message.is_broadcast() {
            // Snapshot the subscriber set so handler callbacks can re-enter
            // the broker without holding shard guards.
            let subscribers: Vec<String> = self
                .broadcast_subscribers
                .iter()
                .map(|entry| entry.key().clone())
                .collect();

            let mut delivered = 0usize;
            for subscriber in subscribers {
                if subscriber == message.from_agent {
                    continue;
                }
                self.deliver(&subscriber, message.clone());
                delivered += 1;
            }
            debug!(id = %id, delivered, "Broadcast delivered");
        } else if self.registry.contains_key(&message.to_agent) {
            let target = message.to_agent.clone();
            self.deliver(&target, message.clone());
            debug!(id = %id, to = %target, "Message delivered");
        } else {
            warn!(id = %id, to = %message.to_agent, "Delivery target not registered");
            self.stats.record_failed();
            return id;
        }

        {
            let mut history = self.history.lock().unwrap();
            if history.len() == self.history_capacity {
                history.pop_front();
            }
            history.push_back(message.clone());
        }
        self.stats.record_sent();

        if let Some(persist) = &self.persist {
            if let Err(e) = persist(
                &message.from_agent,
                &message.to_agent,
                message.kind,
                &message.content,
            ) {
                error!(id = %id, error = %e, "Persistence callback failed");
            }
        }

        id
    }

    /// Appends to one mailbox and fires the matching handler, if any.
    fn deliver(&self, name: &str, message: Message) {
        let kind = message.kind;
        {
            let mut mailbox = self.mailboxes.entry(name.to_string()).or_default();
            if mailbox.len() == self.mailbox_capacity {
                // Ring semantics: drop the oldest message silently.
                mailbox.pop_front();
            }
            mailbox.push_back(message.clone());
        }

        // Clone the handler out so the callback runs without any shard guard
        // held; handlers may call back into the broker.
        let handler = self
            .handlers
            .get(&(name.to_string(), kind))
            .map(|entry| Arc::clone(entry.value()));
        if let Some(handler) = handler {
            if let Err(e) = handler(&message) {
                error!(agent = %name, kind = ?kind, error = %e, "Handler failed");
            }
        }

        self.stats.record_delivered();
    }

    /// Pops up to `max_messages` messages in FIFO order and refreshes the
    /// agent's heartbeat. Returns an empty list for an unknown agent.
    pub fn receive_messages(&self, name: &str, max_messages: usize) -> Vec<Message> {
        if !self.registry.contains_key(name) {
            debug!(agent = %name, "Receive from unregistered agent");
            return Vec::new();
        }

        let mut messages = Vec::new();
        if let Some(mut mailbox) = self.mailboxes.get_mut(name) {
            while messages.len() < max_messages {
                match mailbox.pop_front() {
                    Some(message) => messages.push(message),
                    None => break,
                }
            }
        }

        if let Some(mut registration) = self.registry.get_mut(name) {
            registration.last_heartbeat = Utc::now();
        }

        messages
    }

    /// Refreshes the agent's heartbeat timestamp.
    pub fn send_heartbeat(&self, name: &str) -> Result<(), BrokerError> {
        match self.registry.get_mut(name) {
            Some(mut registration) => {
                registration.last_heartbeat = Utc::now();
                Ok(())
            }
            None => Err(BrokerError::UnknownAgent(name.to_string())),
        }
    }

    /// Reports one agent's registration plus derived liveness, or None if
    /// the agent is unknown.
    pub fn agent_status(&self, name: &str) -> Option<AgentStatusReport> {
        let registration = self.registry.get(name)?;
        let age = Utc::now() - registration.last_heartbeat;
        let queue_size = self.mailboxes.get(name).map_or(0, |m| m.len());

        Some(AgentStatusReport {
            name: registration.name.clone(),
            registered_at: registration.registered_at,
            last_heartbeat: registration.last_heartbeat,
            status: Liveness::from_heartbeat_age(age.num_seconds()),
            queue_size,
            time_since_heartbeat: age.num_milliseconds() as f64 / 1000.0,
            info: registration.info.clone(),
        })
    }

    /// Reports every registered agent.
    pub fn all_agents_status(&self) -> Vec<AgentStatusReport> {
        self.registry
            .iter()
            .filter_map(|entry| self.agent_status(entry.key()))
            .collect()
    }

    /// Aggregate counters plus queue depth figures.
    pub fn stats(&self) -> BrokerStats {
        let total_queue: usize = self.mailboxes.iter().map(|m| m.len()).sum();
        let history_size = self.history.lock().unwrap().len();
        self.stats
            .snapshot(self.registry.len(), total_queue, history_size)
    }

    /// Removes expired messages from every mailbox and from the history.
    /// Returns the number of messages purged.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut purged = 0usize;

        {
            let mut history = self.history.lock().unwrap();
            let before = history.len();
            history.retain(|m| !m.is_expired(now));
            purged += before - history.len();
        }

        for mut mailbox in self.mailboxes.iter_mut() {
            let before = mailbox.len();
            mailbox.retain(|m| !m.is_expired(now));
            purged += before - mailbox.len();
        }

        if purged > 0 {
            debug!(purged, "Swept expired messages");
        }
        purged
    }

    /// Spawns the periodic expiry sweeper. The task exits on [`shutdown`].
    ///
    /// [`shutdown`]: MessageBroker::shutdown
    pub fn start_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let broker = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        info!(period_secs = period.as_secs(), "Broker sweeper started");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        broker.sweep_expired();
                    }
                    _ = shutdown.changed() => {
                        break;
                    }
                }
            }
            info!("Broker sweeper stopped");
        })
    }

    /// Signals the background sweeper to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    fn next_message_id(&self) -> String {
        let counter = self.message_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("msg_{}_{}", counter, Utc::now().timestamp())
    }
}
