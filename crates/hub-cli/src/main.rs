use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use hub_api::{ApiState, router};
use hub_config::NodeConfig;
use hub_runtime::hub::Hub;
use hub_runtime::signal::wait_for_signal;
use hub_runtime::stats_task::{SAMPLE_INTERVAL, run_stats_sampler};
use hub_runtime::tracing_init::init_tracing;

#[derive(Parser)]
#[command(name = "sentinel-hub", about = "SentinelHub security telemetry stream hub")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a hub node (leader or follower, per the config file)
    Run {
        /// Path to hub.toml
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let config_path = config
                .canonicalize()
                .map_err(|e| anyhow::anyhow!("config path '{}': {e}", config.display()))?;
            let node_config = NodeConfig::load(&config_path)?;
            let base_dir = config_path
                .parent()
                .expect("config path must have a parent directory");
            let _log_guard = init_tracing(&node_config.logging, base_dir)?;

            run(node_config).await?;
        }
    }

    Ok(())
}

async fn run(config: NodeConfig) -> Result<()> {
    let hub = Hub::bootstrap(&config).map_err(|e| anyhow::anyhow!("{e}"))?;
    let cancel = CancellationToken::new();

    // Control API.
    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    let listen_addr = listener.local_addr()?;
    tracing::info!(domain = "sys", listen = %listen_addr, "control API listening");
    let app = router(ApiState::new(Arc::clone(&hub)));
    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
    });

    // Per-minute daily stats sampler.
    let sampler = tokio::spawn(run_stats_sampler(
        Arc::clone(&hub),
        SAMPLE_INTERVAL,
        cancel.child_token(),
    ));

    // Follower duties: heartbeat and metrics push to the leader.
    let mut follower_tasks = Vec::new();
    if let Some(cluster) = config.cluster.clone().filter(|_| !hub.is_leader()) {
        let node_addr = format!("http://{listen_addr}");
        follower_tasks.push(tokio::spawn(hub_cluster::run_heartbeat(
            cluster.clone(),
            config.node.id.clone(),
            node_addr,
            config.server.token.clone(),
            cancel.child_token(),
        )));

        let report_hub = Arc::clone(&hub);
        follower_tasks.push(tokio::spawn(hub_cluster::run_metrics_push(
            cluster,
            config.server.token.clone(),
            move || {
                let hub = Arc::clone(&report_hub);
                async move { hub.metrics_report().await }
            },
            cancel.child_token(),
        )));
    }

    wait_for_signal(cancel.clone(), hub.role_name()).await;

    hub.shutdown().await.map_err(|e| anyhow::anyhow!("{e}"))?;
    let _ = server.await?;
    let _ = sampler.await;
    for task in follower_tasks {
        let _ = task.await;
    }
    Ok(())
}
