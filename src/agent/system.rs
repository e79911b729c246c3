use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use super::{AgentBehavior, AgentContext};
use crate::message::{Message, MessagePriority, MessageType};

/// Built-in behavior that periodically broadcasts the broker's statistics
/// as a `system_status` message, and answers `agent_heartbeat` probes with
/// a correlated direct reply.
pub struct SystemStatusBehavior {
    interval: Duration,
}

impl SystemStatusBehavior {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl AgentBehavior for SystemStatusBehavior {
    async fn initialize(&mut self, _ctx: &AgentContext) -> Result<()> {
        Ok(())
    }

    async fn execute_cycle(&mut self, ctx: &AgentContext) -> Result<()> {
        let stats = ctx.broker().stats();
        ctx.broadcast(
            MessageType::SystemStatus,
            serde_json::to_value(&stats)?,
            MessagePriority::Low,
        );
        Ok(())
    }

    async fn handle_message(&mut self, ctx: &AgentContext, message: &Message) -> Result<()> {
        if message.kind == MessageType::AgentHeartbeat {
            let stats = ctx.broker().stats();
            ctx.reply(
                message,
                MessageType::SystemStatus,
                serde_json::to_value(&stats)?,
                MessagePriority::Low,
            );
        }
        Ok(())
    }

    async fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["system_status".to_string(), "broker_stats".to_string()]
    }

    fn execution_interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MessageBroker;
    use crate::config::BrokerConfig;
    use serde_json::json;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    fn context(broker: &Arc<MessageBroker>, name: &str) -> AgentContext {
        AgentContext {
            name: name.to_string(),
            broker: Arc::clone(broker),
            messages_sent: Arc::new(AtomicU64::new(0)),
        }
    }

    #[tokio::test]
    async fn broadcasts_broker_stats() {
        let broker = Arc::new(MessageBroker::new(BrokerConfig::default()));
        broker.register_agent("system_status", json!({})).unwrap();
        broker.register_agent("listener", json!({})).unwrap();

        let ctx = context(&broker, "system_status");
        let mut behavior = SystemStatusBehavior::new(Duration::from_secs(30));
        behavior.execute_cycle(&ctx).await.unwrap();

        let received = broker.receive_messages("listener", 10);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].kind, MessageType::SystemStatus);
        assert!(received[0].content["registered_agents"].is_number());
    }

    #[tokio::test]
    async fn answers_heartbeat_probe_with_correlated_reply() {
        let broker = Arc::new(MessageBroker::new(BrokerConfig::default()));
        broker.register_agent("system_status", json!({})).unwrap();
        broker.register_agent("prober", json!({})).unwrap();

        let probe_id = broker.send_message(
            "prober",
            "system_status",
            MessageType::AgentHeartbeat,
            json!({}),
            MessagePriority::Low,
            None,
        );
        let probe = broker.receive_messages("system_status", 1).remove(0);

        let ctx = context(&broker, "system_status");
        let mut behavior = SystemStatusBehavior::new(Duration::from_secs(30));
        behavior.handle_message(&ctx, &probe).await.unwrap();

        let replies = broker.receive_messages("prober", 10);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].correlation_id.as_deref(), Some(probe_id.as_str()));
    }
}
