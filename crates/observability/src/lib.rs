// crates/observability/src/lib.rs
//! Process-wide logging setup.
//!
//! One `tracing_subscriber::Registry` with an `EnvFilter`, a stderr layer and,
//! when a directory is configured, a daily-rolling file layer written through
//! a non-blocking appender.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

static INITED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset or invalid.
    pub default_filter: String,
    /// Directory for rolling log files. `None` logs to stderr only.
    pub dir: Option<PathBuf>,
    /// File name prefix inside `dir`; rotation appends the date.
    pub file_prefix: String,
    /// Emit JSON lines on stderr instead of the human format.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            dir: None,
            file_prefix: "toolbox.log".to_string(),
            json: false,
        }
    }
}

impl LogConfig {
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.default_filter))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber.
///
/// Returns the file writer's guard; keep it alive for the life of the
/// process or buffered lines are lost on exit. A second call does nothing
/// and returns `Ok(None)`.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    if INITED.swap(true, Ordering::SeqCst) {
        return Ok(None);
    }

    let stderr_layer = if config.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_ansi(cfg!(debug_assertions))
            .boxed()
    };

    let (file_layer, guard) = match &config.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    Registry::default()
        .with(config.env_filter())
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("installing global tracing subscriber")?;

    tracing::info!(dir = ?config.dir, "Logging initialized");
    Ok(guard)
}
