use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ingest_orchestrator::{
    config::Config,
    database::Database,
    services::FfmpegLauncher,
    web::{AppState, WebServer},
};

#[derive(Parser)]
#[command(name = "ingest-orchestrator")]
#[command(version)]
#[command(about = "Ingest authorization and transcoding orchestration for live events")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(short = 'd', long, value_name = "URL")]
    database_url: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging with specified level
    let log_filter = if cli.log_level == "trace" {
        format!("ingest_orchestrator={},tower_http=trace", cli.log_level)
    } else {
        format!("ingest_orchestrator={},tower_http=info", cli.log_level)
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Ingest Orchestrator v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load_from(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config);

    // Override config with CLI arguments
    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }

    info!("Using database: {}", config.database.url);
    let database = Database::new(&config.database).await?;
    database.migrate().await?;
    info!("Database connection established and migrations applied");

    let launcher = FfmpegLauncher::new(config.transcoding.ffmpeg_command.clone());
    if launcher.probe_version().await.is_none() {
        warn!("FFmpeg is not available; transcoding jobs will fail to start");
    }
    if config.web.admin_token.is_none() {
        warn!("No admin token configured; profile administration is open");
    }
    info!(
        "Auto-transcode on publish: {}",
        if config.transcoding.auto_transcode { "enabled" } else { "disabled" }
    );

    let state = AppState::new(config, database, Arc::new(launcher));

    // No process from a previous run can still be attached to this instance
    state.supervisor.reconcile_orphans().await?;

    let supervisor = state.supervisor.clone();
    let web_server = WebServer::new(state)?;
    web_server.serve(shutdown_signal()).await?;

    supervisor.shutdown().await;
    info!("Ingest Orchestrator stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
