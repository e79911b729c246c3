use super::*;
use crate::config::BrokerConfig;
use serde_json::json;

struct NoopBehavior;

#[async_trait]
impl AgentBehavior for NoopBehavior {
    async fn initialize(&mut self, _ctx: &AgentContext) -> Result<()> {
        Ok(())
    }
    async fn execute_cycle(&mut self, _ctx: &AgentContext) -> Result<()> {
        Ok(())
    }
    async fn handle_message(&mut self, _ctx: &AgentContext, _message: &Message) -> Result<()> {
        Ok(())
    }
    async fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }
    fn capabilities(&self) -> Vec<String> {
        vec!["noop".to_string()]
    }
    fn execution_interval(&self) -> Duration {
        Duration::from_millis(10)
    }
}

fn runtime() -> Arc<AgentRuntime> {
    let broker = Arc::new(MessageBroker::new(BrokerConfig::default()));
    Arc::new(AgentRuntime::new(
        "unit",
        "unit test agent",
        Box::new(NoopBehavior),
        broker,
        AgentConfig::default(),
    ))
}

#[test]
fn fresh_runtime_is_starting_and_healthy() {
    let agent = runtime();
    assert_eq!(agent.status(), AgentStatus::Starting);
    assert_eq!(agent.error_count(), 0);
    assert!(agent.is_healthy());

    let report = agent.report();
    assert_eq!(report.name, "unit");
    assert_eq!(report.capabilities, vec!["noop".to_string()]);
    assert_eq!(report.uptime_seconds, 0.0);
    assert_eq!(report.stats.cycles_completed, 0);
}

#[test]
fn pause_is_rejected_before_running() {
    let agent = runtime();
    let err = agent.pause().unwrap_err();
    assert_eq!(err.from, AgentStatus::Starting);
    assert_eq!(err.to, AgentStatus::Paused);
}

#[test]
fn reset_error_count_outside_error_state_keeps_status() {
    let agent = runtime();
    agent.reset_error_count();
    assert_eq!(agent.status(), AgentStatus::Starting);
    assert_eq!(agent.error_count(), 0);
}

#[tokio::test]
async fn context_sends_bump_the_sent_counter() {
    let broker = Arc::new(MessageBroker::new(BrokerConfig::default()));
    broker.register_agent("sender", json!({})).unwrap();
    broker.register_agent("peer", json!({})).unwrap();

    let agent = Arc::new(AgentRuntime::new(
        "sender",
        "",
        Box::new(NoopBehavior),
        Arc::clone(&broker),
        AgentConfig::default(),
    ));
    let ctx = agent.context();

    ctx.send(
        "peer",
        MessageType::OptimizationResult,
        json!({"plan": []}),
        MessagePriority::High,
    );
    ctx.broadcast(MessageType::SystemStatus, json!({}), MessagePriority::Low);

    assert_eq!(agent.metrics().messages_sent, 2);
    // Direct message plus the broadcast copy
    assert_eq!(broker.receive_messages("peer", 10).len(), 2);
}

#[tokio::test]
async fn stop_before_start_is_safe() {
    let agent = runtime();
    agent.stop().await;
    assert_eq!(agent.status(), AgentStatus::Stopped);

    // Second stop is a no-op
    agent.stop().await;
    assert_eq!(agent.status(), AgentStatus::Stopped);
}

#[tokio::test]
async fn start_is_rejected_after_stop() {
    let agent = runtime();
    agent.stop().await;
    assert!(agent.start().await.is_err());
}
