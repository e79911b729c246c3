use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub mod status;
pub mod system;
#[cfg(test)]
mod tests;

pub use status::{AgentStatus, InvalidTransition};

use crate::broker::{MessageBroker, UNRESPONSIVE_AFTER_SECS};
use crate::config::AgentConfig;
use crate::message::{Message, MessagePriority, MessageType, BROADCAST};

/// Concrete agent behavior driven by [`AgentRuntime`].
///
/// Implementations supply the four lifecycle hooks plus two declarations;
/// the runtime owns scheduling, message draining, heartbeating, and error
/// recovery. Hooks run on the agent's execution loop, one at a time.
#[async_trait]
pub trait AgentBehavior: Send + Sync {
    /// One-time setup. A failure here propagates and aborts `start()`.
    async fn initialize(&mut self, ctx: &AgentContext) -> Result<()>;

    /// One unit of periodic work. Errors are caught by the runtime's
    /// error handler, counted, and answered with backoff, not here.
    async fn execute_cycle(&mut self, ctx: &AgentContext) -> Result<()>;

    /// Reaction to one delivered message. Same error contract as
    /// `execute_cycle`.
    async fn handle_message(&mut self, ctx: &AgentContext, message: &Message) -> Result<()>;

    /// Releases resources on stop. Best-effort: errors are logged, never
    /// re-thrown, and stop proceeds regardless.
    async fn cleanup(&mut self) -> Result<()>;

    /// Capability labels advertised at registration.
    fn capabilities(&self) -> Vec<String>;

    /// Delay between execution cycles.
    fn execution_interval(&self) -> Duration;
}

/// Handle the runtime passes into behavior hooks: the agent's identity
/// plus its channel to the broker.
pub struct AgentContext {
    name: String,
    broker: Arc<MessageBroker>,
    messages_sent: Arc<AtomicU64>,
}

impl AgentContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn broker(&self) -> &MessageBroker {
        &self.broker
    }

    /// Sends a direct message on behalf of this agent.
    pub fn send(
        &self,
        to_agent: &str,
        kind: MessageType,
        content: Value,
        priority: MessagePriority,
    ) -> String {
        self.send_correlated(to_agent, kind, content, priority, None)
    }

    /// Sends a direct message carrying a correlation id.
    pub fn send_correlated(
        &self,
        to_agent: &str,
        kind: MessageType,
        content: Value,
        priority: MessagePriority,
        correlation_id: Option<String>,
    ) -> String {
        let id = self
            .broker
            .send_message(&self.name, to_agent, kind, content, priority, correlation_id);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        id
    }

    /// Broadcasts to every other subscribed agent.
    pub fn broadcast(&self, kind: MessageType, content: Value, priority: MessagePriority) -> String {
        self.send(BROADCAST, kind, content, priority)
    }

    /// Replies to `request`, correlated to the request's own correlation id
    /// when present, otherwise to the request's message id.
    pub fn reply(
        &self,
        request: &Message,
        kind: MessageType,
        content: Value,
        priority: MessagePriority,
    ) -> String {
        let correlation = request
            .correlation_id
            .clone()
            .unwrap_or_else(|| request.id.clone());
        self.send_correlated(&request.from_agent, kind, content, priority, Some(correlation))
    }

    /// Generates a fresh correlation id for a request/response exchange.
    pub fn new_correlation_id() -> String {
        Uuid::new_v4().to_string()
    }
}

/// Running counters for one agent, queryable without blocking the loops.
struct AgentMetrics {
    messages_sent: Arc<AtomicU64>,
    messages_received: AtomicU64,
    cycles_completed: AtomicU64,
    errors_encountered: AtomicU64,
    last_activity: RwLock<Option<DateTime<Utc>>>,
}

impl AgentMetrics {
    fn new() -> Self {
        Self {
            messages_sent: Arc::new(AtomicU64::new(0)),
            messages_received: AtomicU64::new(0),
            cycles_completed: AtomicU64::new(0),
            errors_encountered: AtomicU64::new(0),
            last_activity: RwLock::new(None),
        }
    }

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            errors_encountered: self.errors_encountered.load(Ordering::Relaxed),
            last_activity: *self.last_activity.read().unwrap(),
        }
    }
}

/// Point-in-time agent counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub cycles_completed: u64,
    pub errors_encountered: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Full status report for health surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct AgentReport {
    pub name: String,
    pub description: String,
    pub status: AgentStatus,
    pub error_count: u32,
    pub uptime_seconds: f64,
    pub last_heartbeat: DateTime<Utc>,
    pub capabilities: Vec<String>,
    pub stats: MetricsSnapshot,
}

enum CycleErrorOutcome {
    Fatal,
    Backoff(Duration),
}

/// Lifecycle driver for one agent.
///
/// Wraps a concrete [`AgentBehavior`] and runs it through the uniform
/// lifecycle: registration, initialization, a periodic execution loop, an
/// independent heartbeat loop, error-count-based degradation with linear
/// capped backoff, and orderly shutdown. Both loops are owned, cancellable
/// tasks; cancellation is observed at every suspension point so stop
/// latency stays bounded.
pub struct AgentRuntime {
    name: String,
    description: String,
    capabilities: Vec<String>,
    broker: Arc<MessageBroker>,
    config: AgentConfig,

    behavior: tokio::sync::Mutex<Box<dyn AgentBehavior>>,

    status: RwLock<AgentStatus>,
    error_count: AtomicU32,
    /// Idempotence guard for the stop procedure.
    stopping: AtomicBool,

    metrics: AgentMetrics,
    last_heartbeat: RwLock<DateTime<Utc>>,
    started_at: RwLock<Option<DateTime<Utc>>>,

    shutdown_tx: watch::Sender<bool>,
    exec_task: Mutex<Option<JoinHandle<()>>>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
}

impl AgentRuntime {
    pub fn new(
        name: &str,
        description: &str,
        behavior: Box<dyn AgentBehavior>,
        broker: Arc<MessageBroker>,
        config: AgentConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let capabilities = behavior.capabilities();

        Self {
            name: name.to_string(),
            description: description.to_string(),
            capabilities,
            broker,
            config,
            behavior: tokio::sync::Mutex::new(behavior),
            status: RwLock::new(AgentStatus::Starting),
            error_count: AtomicU32::new(0),
            stopping: AtomicBool::new(false),
            metrics: AgentMetrics::new(),
            last_heartbeat: RwLock::new(Utc::now()),
            started_at: RwLock::new(None),
            shutdown_tx,
            exec_task: Mutex::new(None),
            heartbeat_task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> AgentStatus {
        *self.status.read().unwrap()
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Registers with the broker, runs `initialize`, and launches the
    /// execution and heartbeat loops.
    ///
    /// Registration or initialization failure aborts the start and
    /// propagates; a failed initialize also rolls back the registration.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.status() != AgentStatus::Starting {
            anyhow::bail!(
                "agent '{}' cannot start from state {}",
                self.name,
                self.status()
            );
        }

        info!(agent = %self.name, "Starting agent");

        self.broker
            .register_agent(
                &self.name,
                json!({
                    "description": self.description,
                    "capabilities": self.capabilities,
                }),
            )
            .with_context(|| format!("failed to register agent '{}'", self.name))?;

        {
            let ctx = self.context();
            let mut behavior = self.behavior.lock().await;
            if let Err(e) = behavior.initialize(&ctx).await {
                self.broker.unregister_agent(&self.name);
                return Err(e.context(format!("failed to initialize agent '{}'", self.name)));
            }
        }

        self.transition_to(AgentStatus::Running)?;
        *self.started_at.write().unwrap() = Some(Utc::now());
        *self.metrics.last_activity.write().unwrap() = Some(Utc::now());

        let exec = tokio::spawn(Arc::clone(self).run_loop());
        *self.exec_task.lock().unwrap() = Some(exec);
        let heartbeat = tokio::spawn(Arc::clone(self).heartbeat_loop());
        *self.heartbeat_task.lock().unwrap() = Some(heartbeat);

        info!(agent = %self.name, "Agent started");
        Ok(())
    }

    /// Stops the agent: cancels both loops, joins them, runs `cleanup`,
    /// and unregisters from the broker.
    ///
    /// Idempotent, and safe to call even if `start()` never completed.
    pub async fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);

        let exec = self.exec_task.lock().unwrap().take();
        if let Some(handle) = exec {
            let _ = handle.await;
        }
        let heartbeat = self.heartbeat_task.lock().unwrap().take();
        if let Some(handle) = heartbeat {
            let _ = handle.await;
        }

        self.finalize().await;
    }

    /// Stop procedure invoked from inside the execution loop after a fatal
    /// error. Identical to [`stop`] except it must not join its own task.
    ///
    /// [`stop`]: AgentRuntime::stop
    async fn stop_from_loop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);

        // The execution loop is the current task; drop its handle instead
        // of awaiting it.
        self.exec_task.lock().unwrap().take();
        let heartbeat = self.heartbeat_task.lock().unwrap().take();
        if let Some(handle) = heartbeat {
            let _ = handle.await;
        }

        self.finalize().await;
    }

    async fn finalize(&self) {
        {
            let mut status = self.status.write().unwrap();
            if *status != AgentStatus::Stopped {
                // Stop is legal from every live state.
                *status = status.transition(AgentStatus::Stopped).unwrap_or(AgentStatus::Stopped);
            }
        }

        {
            let mut behavior = self.behavior.lock().await;
            if let Err(e) = behavior.cleanup().await {
                warn!(agent = %self.name, error = %e, "Cleanup failed");
            }
        }

        self.broker.unregister_agent(&self.name);
        info!(agent = %self.name, "Agent stopped");
    }

    /// Suspends message processing and `execute_cycle` without touching the
    /// loops or the registration.
    pub fn pause(&self) -> Result<(), InvalidTransition> {
        self.transition_to(AgentStatus::Paused)?;
        info!(agent = %self.name, "Agent paused");
        Ok(())
    }

    pub fn resume(&self) -> Result<(), InvalidTransition> {
        self.transition_to(AgentStatus::Running)?;
        info!(agent = %self.name, "Agent resumed");
        Ok(())
    }

    /// Health predicate for external health surfaces: healthy unless in
    /// ERROR, at the error threshold, or silent past the unresponsive
    /// heartbeat threshold.
    pub fn is_healthy(&self) -> bool {
        if self.status() == AgentStatus::Error {
            return false;
        }
        if self.error_count() >= self.config.max_errors {
            return false;
        }
        let heartbeat_age = Utc::now() - *self.last_heartbeat.read().unwrap();
        heartbeat_age.num_seconds() <= UNRESPONSIVE_AFTER_SECS
    }

    /// Administrative recovery: clears the error counter and, if currently
    /// in ERROR, returns the agent to RUNNING.
    pub fn reset_error_count(&self) {
        self.error_count.store(0, Ordering::SeqCst);
        if self.status() == AgentStatus::Error {
            let _ = self.transition_to(AgentStatus::Running);
        }
        info!(agent = %self.name, "Error count reset");
    }

    pub fn report(&self) -> AgentReport {
        let uptime_seconds = self
            .started_at
            .read()
            .unwrap()
            .map_or(0.0, |t| (Utc::now() - t).num_milliseconds() as f64 / 1000.0);

        AgentReport {
            name: self.name.clone(),
            description: self.description.clone(),
            status: self.status(),
            error_count: self.error_count(),
            uptime_seconds,
            last_heartbeat: *self.last_heartbeat.read().unwrap(),
            capabilities: self.capabilities.clone(),
            stats: self.metrics.snapshot(),
        }
    }

    fn context(&self) -> AgentContext {
        AgentContext {
            name: self.name.clone(),
            broker: Arc::clone(&self.broker),
            messages_sent: Arc::clone(&self.metrics.messages_sent),
        }
    }

    fn transition_to(&self, next: AgentStatus) -> Result<(), InvalidTransition> {
        let mut status = self.status.write().unwrap();
        *status = status.transition(next)?;
        Ok(())
    }

    async fn run_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let mut delay = { self.behavior.lock().await.execution_interval() };

            if self.status() == AgentStatus::Running {
                if let Err(e) = self.tick().await {
                    match self.handle_cycle_error(e).await {
                        CycleErrorOutcome::Fatal => break,
                        CycleErrorOutcome::Backoff(backoff) => delay = backoff,
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        debug!(agent = %self.name, "Execution loop exited");
    }

    /// One execution cycle: drain a bounded batch of mailbox messages
    /// through `handle_message`, then run `execute_cycle` once.
    async fn tick(&self) -> Result<()> {
        let ctx = self.context();
        let batch = self
            .broker
            .receive_messages(&self.name, self.config.message_batch_size);

        let mut behavior = self.behavior.lock().await;
        for message in &batch {
            self.metrics.messages_received.fetch_add(1, Ordering::Relaxed);
            behavior.handle_message(&ctx, message).await?;
        }
        behavior.execute_cycle(&ctx).await?;
        drop(behavior);

        self.metrics.cycles_completed.fetch_add(1, Ordering::Relaxed);
        *self.metrics.last_activity.write().unwrap() = Some(Utc::now());
        Ok(())
    }

    async fn handle_cycle_error(&self, err: anyhow::Error) -> CycleErrorOutcome {
        let count = self.error_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.metrics.errors_encountered.fetch_add(1, Ordering::Relaxed);
        error!(agent = %self.name, error = %err, count, "Execution cycle failed");

        if count >= self.config.max_errors {
            error!(
                agent = %self.name,
                max_errors = self.config.max_errors,
                "Error threshold exceeded, stopping agent"
            );
            let _ = self.transition_to(AgentStatus::Error);
            self.stop_from_loop().await;
            CycleErrorOutcome::Fatal
        } else {
            let backoff_ms =
                (count as u64 * self.config.backoff_base_ms).min(self.config.backoff_cap_ms);
            CycleErrorOutcome::Backoff(Duration::from_millis(backoff_ms))
        }
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let interval = Duration::from_millis(self.config.heartbeat_interval_ms);
        let retry = Duration::from_millis(self.config.heartbeat_retry_ms);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.broker.send_heartbeat(&self.name) {
                Ok(()) => {
                    *self.last_heartbeat.write().unwrap() = Utc::now();
                    interval
                }
                Err(e) => {
                    warn!(agent = %self.name, error = %e, "Heartbeat failed");
                    retry
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        debug!(agent = %self.name, "Heartbeat loop exited");
    }
}
