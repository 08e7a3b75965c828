//! Logger setup plus `log_*!` macros gated by a module-level `ENABLE_LOGS` const:
//!
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//! use crate::{log_info, log_warn};
//!
//! log_info!("only logged while ENABLE_LOGS is true");
//! ```

use std::fs::{self, OpenOptions};
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::LevelFilter;

pub const LOG_FILE_NAME: &str = "wiith.log";

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub level: LevelFilter,
    /// Write to `<dir>/wiith.log` instead of stderr.
    pub log_dir: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            log_dir: None,
        }
    }
}

/// Initializes the global logger. `RUST_LOG` still overrides the configured level.
pub fn init_logging(settings: &LogSettings) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(settings.level);
    builder.parse_default_env();

    if let Some(dir) = &settings.log_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create log directory {}", dir.display()))?;
        let path = dir.join(LOG_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder
        .try_init()
        .context("logger already initialized")
}

// Each macro expands to a check of the caller's `ENABLE_LOGS` const, so a
// module that imports one must define it.

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}
