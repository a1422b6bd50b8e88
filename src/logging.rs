//! Logging setup.
//!
//! The log level and the noisy dependency targets are carried in an explicit
//! [`LogConfig`] built once in `main` and handed to [`init`].

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// File name prefix for the rolling log file.
const LOG_FILE_PREFIX: &str = "scam-replier.log";

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default level for this crate and everything not listed in `quiet_targets`.
    pub level: String,
    /// Dependency targets capped at `warn` (transport chatter).
    pub quiet_targets: Vec<String>,
    /// When set, logs are also written to a daily rolling file in this directory.
    pub log_dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            quiet_targets: ["rustls", "lettre", "hyper", "hyper_util", "reqwest", "rig"]
                .into_iter()
                .map(String::from)
                .collect(),
            log_dir: None,
        }
    }
}

impl LogConfig {
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// Filter directives derived from this config, e.g. `info,rustls=warn`.
    pub fn directives(&self) -> String {
        std::iter::once(self.level.clone())
            .chain(self.quiet_targets.iter().map(|t| format!("{t}=warn")))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// `RUST_LOG` wins over the configured directives when present.
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directives()))
    }
}

/// Create the non-blocking daily rolling writer for `dir`.
pub fn file_writer(dir: &Path) -> std::io::Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    Ok(tracing_appender::non_blocking(appender))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for the
/// lifetime of the process.
pub fn init(config: &LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let (writer, guard) = file_writer(dir)?;
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
