// crates/server/src/main.rs
//! Toolbox server binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use toolbox_core::NoticeConfig;
use toolbox_observability::{init_logging, LogConfig};
use toolbox_server::{create_app, init_metrics, AppConfig, AppState};

#[derive(Debug, Parser)]
#[command(name = "toolbox", version, about = "Job registry and live progress notices over HTTP")]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "TOOLBOX_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "TOOLBOX_PORT", default_value_t = 47900)]
    port: u16,

    /// Directory for daily-rolling log files. Logs go to stderr only when unset.
    #[arg(long, env = "TOOLBOX_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Default log filter, overridden by RUST_LOG.
    #[arg(long, env = "TOOLBOX_LOG", default_value = "info")]
    log: String,

    /// Emit JSON log lines on stderr.
    #[arg(long)]
    json_logs: bool,

    /// Transfers read and write only below this directory.
    #[arg(long, env = "TOOLBOX_TRANSFER_ROOT")]
    transfer_root: Option<PathBuf>,

    /// Seconds before a noticer gives up on a blocked client. No limit when unset.
    #[arg(long, env = "TOOLBOX_NOTICE_TIMEOUT")]
    notice_timeout: Option<u64>,
}

impl Cli {
    fn app_config(&self) -> AppConfig {
        let defaults = AppConfig::default();
        AppConfig {
            notice: NoticeConfig {
                default_timeout: self.notice_timeout.map(Duration::from_secs),
                ..NoticeConfig::default()
            },
            transfer_root: self.transfer_root.clone().unwrap_or(defaults.transfer_root),
        }
    }
}

async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown requested");
    // Ends open notice streams so graceful shutdown can finish.
    state.context.shutdown();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _log_guard = init_logging(&LogConfig {
        default_filter: cli.log.clone(),
        dir: cli.log_dir.clone(),
        json: cli.json_logs,
        ..LogConfig::default()
    })?;
    init_metrics();

    let config = cli.app_config();
    tokio::fs::create_dir_all(&config.transfer_root)
        .await
        .with_context(|| format!("creating transfer root {}", config.transfer_root.display()))?;

    let state = AppState::new(config);
    let app = create_app(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cli.host, cli.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    tracing::info!(
        %addr,
        transfer_root = %state.transfer_root.display(),
        "Toolbox server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&state)))
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
