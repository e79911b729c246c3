use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use hive::agent::system::SystemStatusBehavior;
use hive::agent::AgentRuntime;
use hive::broker::MessageBroker;
use hive::config::{self, HiveConfig};
use hive::supervisor::Supervisor;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hive=info".into()),
        )
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "hive.toml".to_string());
    let config = match config::load_config(&path) {
        Ok(config) => {
            info!(path = %path, "Loaded configuration");
            config
        }
        Err(e) => {
            warn!(path = %path, error = %e, "No configuration file, using defaults");
            HiveConfig::default()
        }
    };

    let broker = Arc::new(MessageBroker::new(config.broker.clone()));
    let sweeper = broker.start_sweeper(Duration::from_secs(config.broker.sweep_interval_secs));

    let mut supervisor = Supervisor::new(Arc::clone(&broker));
    supervisor.add(Arc::new(AgentRuntime::new(
        "system_status",
        "Broadcasts broker statistics",
        Box::new(SystemStatusBehavior::new(Duration::from_secs(30))),
        Arc::clone(&broker),
        config.agent.clone(),
    )));

    supervisor.start_all().await?;
    info!("Hive running, press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    supervisor.stop_all().await;
    broker.shutdown();
    let _ = sweeper.await;

    Ok(())
}
