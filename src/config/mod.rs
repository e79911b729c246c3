use serde::Deserialize;

/// Complete Hive configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HiveConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Broker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Mailbox capacity per agent; the oldest message is dropped on overflow
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    /// Global message history capacity
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// How often the expiry sweeper runs (seconds)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_mailbox_capacity() -> usize {
    1000
}

fn default_history_capacity() -> usize {
    10000
}

fn default_sweep_interval() -> u64 {
    60
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            history_capacity: default_history_capacity(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// Agent lifecycle configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Heartbeat period (milliseconds)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    /// Retry delay after a failed heartbeat (milliseconds)
    #[serde(default = "default_heartbeat_retry")]
    pub heartbeat_retry_ms: u64,
    /// Consecutive-error threshold before the agent stops itself
    #[serde(default = "default_max_errors")]
    pub max_errors: u32,
    /// Mailbox messages drained per execution cycle
    #[serde(default = "default_message_batch_size")]
    pub message_batch_size: usize,
    /// Linear backoff: sleep min(error_count * base, cap) after a failed cycle
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_ms: u64,
}

fn default_heartbeat_interval() -> u64 {
    30_000
}

fn default_heartbeat_retry() -> u64 {
    5_000
}

fn default_max_errors() -> u32 {
    5
}

fn default_message_batch_size() -> usize {
    10
}

fn default_backoff_base() -> u64 {
    2_000
}

fn default_backoff_cap() -> u64 {
    30_000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval(),
            heartbeat_retry_ms: default_heartbeat_retry(),
            max_errors: default_max_errors(),
            message_batch_size: default_message_batch_size(),
            backoff_base_ms: default_backoff_base(),
            backoff_cap_ms: default_backoff_cap(),
        }
    }
}

impl Default for HiveConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<HiveConfig, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: HiveConfig = toml::from_str(&contents)?;
    Ok(config)
}
