// Message model and priority helpers
pub mod message;

// Broker: registry, mailboxes, delivery, stats
pub mod broker;

// Agent behavior trait and lifecycle runtime
pub mod agent;

// Supervisor owning the agent set
pub mod supervisor;

// TOML configuration
pub mod config;

pub use agent::{AgentBehavior, AgentContext, AgentRuntime, AgentStatus};
pub use broker::{BrokerError, MessageBroker};
pub use message::{Message, MessagePriority, MessageType, BROADCAST};
