use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Tracks delivery counters for the message broker.
#[derive(Clone)]
pub struct StatsTracker {
    /// Messages accepted for delivery (lifetime counter)
    messages_sent: Arc<AtomicU64>,

    /// Individual mailbox deliveries (a broadcast counts once per target)
    messages_delivered: Arc<AtomicU64>,

    /// Sends that found no target
    messages_failed: Arc<AtomicU64>,

    /// Registrations performed (lifetime, not current population)
    agents_registered: Arc<AtomicU64>,

    /// Broker start time, for uptime calculation
    started_at: DateTime<Utc>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self {
            messages_sent: Arc::new(AtomicU64::new(0)),
            messages_delivered: Arc::new(AtomicU64::new(0)),
            messages_failed: Arc::new(AtomicU64::new(0)),
            agents_registered: Arc::new(AtomicU64::new(0)),
            started_at: Utc::now(),
        }
    }

    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.messages_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_registration(&self) {
        self.agents_registered.fetch_add(1, Ordering::Relaxed);
    }

    /// Builds a snapshot, combined with queue figures the broker supplies.
    pub fn snapshot(
        &self,
        registered_agents: usize,
        total_queue_size: usize,
        message_history_size: usize,
    ) -> BrokerStats {
        let uptime_seconds = (Utc::now() - self.started_at).num_milliseconds() as f64 / 1000.0;
        let average_queue_size = if registered_agents > 0 {
            total_queue_size as f64 / registered_agents as f64
        } else {
            0.0
        };

        BrokerStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            agents_registered: self.agents_registered.load(Ordering::Relaxed),
            registered_agents,
            total_queue_size,
            average_queue_size,
            message_history_size,
            uptime_seconds,
        }
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time broker statistics.
#[derive(Debug, Clone, Serialize)]
pub struct BrokerStats {
    pub messages_sent: u64,
    pub messages_delivered: u64,
    pub messages_failed: u64,
    pub agents_registered: u64,
    pub registered_agents: usize,
    pub total_queue_size: usize,
    pub average_queue_size: f64,
    pub message_history_size: usize,
    pub uptime_seconds: f64,
}
