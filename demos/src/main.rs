//! # CQL Broker Demo
//!
//! 命令行入口点。
//!
//! 提供：
//! - 配置加载与验证
//! - 在内存链上运行 broker，transport 可选 mock 或 MQTT
//! - 优雅关闭处理

mod cli;
mod simulation;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use broker::Broker;
use clap::Parser;
use config_loader::ConfigLoader;
use contracts::{BrokerConfig, Transport};
use mock_backend::MockTransport;
use mqtt_transport::{MqttSettings, MqttTransport};
use observability::ObservabilityConfig;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cli::{Cli, Commands, RunArgs, TransportKind, ValidateArgs};
use simulation::{ClientLink, Simulation};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let metrics_port = match &cli.command {
        Commands::Run(args) if args.metrics_port != 0 => Some(args.metrics_port),
        _ => None,
    };
    observability::init_with_config(ObservabilityConfig {
        log_format: cli.log_format.into(),
        metrics_port,
        default_log_level: log_level(&cli).to_string(),
    })?;

    info!(version = env!("CARGO_PKG_VERSION"), "CQL broker demo starting");

    let result = match &cli.command {
        Commands::Run(args) => run_broker(args).await,
        Commands::Validate(args) => run_validate(args),
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}

fn log_level(cli: &Cli) -> &'static str {
    if cli.quiet {
        return "warn";
    }
    match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Execute the `run` command
async fn run_broker(args: &RunArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => ConfigLoader::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => simulation::default_config("demo-node")?,
    };

    // Apply CLI overrides
    if let Some(ref user) = args.user {
        info!(user = %user, "Overriding node identity from CLI");
        config.transport.user = user.clone();
    }
    if let Some(period_ms) = args.period_ms {
        config.publish.period_ms = period_ms;
    }

    let listen_root = config.topics.listen_root();
    match args.transport {
        TransportKind::Mock => {
            let transport = Arc::new(MockTransport::new());
            let client = ClientLink::Mock(Arc::clone(&transport));
            let simulation = Simulation::new(args.databases, listen_root, client);
            serve(config, simulation, transport, args).await
        }
        TransportKind::Mqtt => {
            let settings = MqttSettings::from_config(&config.transport)?;
            info!(host = %settings.host, port = settings.port, client_id = %settings.client_id, "Using MQTT transport");
            let transport = Arc::new(MqttTransport::new(settings));
            let client = ClientLink::mqtt(&config).await?;
            let simulation = Simulation::new(args.databases, listen_root, client);
            serve(config, simulation, transport, args).await
        }
    }
}

/// Run the broker on `transport` while the simulation drives it
async fn serve<T>(
    config: BrokerConfig,
    simulation: Simulation,
    transport: Arc<T>,
    args: &RunArgs,
) -> Result<()>
where
    T: Transport + Send + Sync + 'static,
{
    let quiesce = config.shutdown.quiesce();
    let mut broker = Broker::start(config, Arc::clone(&simulation.registry), transport)
        .await
        .context("Failed to start broker")?;

    let shutdown = CancellationToken::new();
    let writers = simulation.spawn_writers(args.clients, args.write_rate, shutdown.clone());
    let sealer = simulation.spawn_sealer(Duration::from_millis(args.seal_ms), shutdown.clone());

    info!(
        databases = args.databases,
        clients = args.clients,
        duration_s = args.duration,
        "Simulation running, press Ctrl+C to stop"
    );

    if args.duration == 0 {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
    } else {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(args.duration)) => {}
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C, stopping early");
            }
        }
    }

    shutdown.cancel();
    let mut writes = 0;
    for writer in writers {
        writes += writer.await.context("Writer task panicked")??;
    }
    let blocks = sealer.await.context("Sealer task panicked")?;

    // One full replay so the replay path shows up in the summary
    if let Some(database) = simulation.databases.first() {
        let delivered = simulation.request_replay("replayer", database).await?;
        if delivered == 0 {
            warn!("Replay request was not delivered");
        }
    }

    broker.close().await;
    simulation.client.close(quiesce).await;

    let summary = simulation.client.publish_summary();
    let dispatch = broker.dispatch_metrics().snapshot();
    info!(
        writes,
        blocks,
        executed = dispatch.writes,
        dropped = dispatch.dropped,
        failures = dispatch.failures,
        newest_published = summary.newest,
        replay_published = summary.replay,
        publish_attempts = summary.attempts,
        "Simulation complete"
    );

    Ok(())
}

/// Execute the `validate` command
fn run_validate(args: &ValidateArgs) -> Result<()> {
    let config = ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let rendered = if args.json {
        ConfigLoader::to_json(&config)?
    } else {
        ConfigLoader::to_toml(&config)?
    };
    info!(config = %args.config.display(), node = %config.node_id(), "Configuration is valid");
    println!("{rendered}");
    Ok(())
}
