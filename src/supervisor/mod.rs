use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::agent::{AgentReport, AgentRuntime, AgentStatus};
use crate::broker::MessageBroker;

/// Per-agent health entry for an external health surface.
#[derive(Debug, Clone, Serialize)]
pub struct AgentHealth {
    pub name: String,
    pub status: AgentStatus,
    pub healthy: bool,
}

/// Owns the broker handle and the set of agent runtimes, and drives them
/// through process startup and shutdown.
pub struct Supervisor {
    broker: Arc<MessageBroker>,
    agents: Vec<Arc<AgentRuntime>>,
}

impl Supervisor {
    pub fn new(broker: Arc<MessageBroker>) -> Self {
        Self {
            broker,
            agents: Vec::new(),
        }
    }

    pub fn broker(&self) -> &Arc<MessageBroker> {
        &self.broker
    }

    pub fn add(&mut self, agent: Arc<AgentRuntime>) {
        self.agents.push(agent);
    }

    pub fn agents(&self) -> &[Arc<AgentRuntime>] {
        &self.agents
    }

    /// Starts every agent in registration order.
    ///
    /// Fail-fast: if one agent fails to start, the ones already started are
    /// stopped again and the error propagates.
    pub async fn start_all(&self) -> Result<()> {
        for (index, agent) in self.agents.iter().enumerate() {
            if let Err(e) = agent.start().await {
                error!(agent = %agent.name(), error = %e, "Agent failed to start, rolling back");
                for started in self.agents[..index].iter().rev() {
                    started.stop().await;
                }
                return Err(e).with_context(|| format!("failed to start agent '{}'", agent.name()));
            }
        }
        info!(agents = self.agents.len(), "All agents started");
        Ok(())
    }

    /// Stops every agent, newest first. Safe to call repeatedly.
    pub async fn stop_all(&self) {
        for agent in self.agents.iter().rev() {
            agent.stop().await;
        }
        info!(agents = self.agents.len(), "All agents stopped");
    }

    pub fn health(&self) -> Vec<AgentHealth> {
        self.agents
            .iter()
            .map(|agent| AgentHealth {
                name: agent.name().to_string(),
                status: agent.status(),
                healthy: agent.is_healthy(),
            })
            .collect()
    }

    pub fn reports(&self) -> Vec<AgentReport> {
        self.agents.iter().map(|agent| agent.report()).collect()
    }
}
