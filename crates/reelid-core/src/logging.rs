use std::{
    fs::{File, OpenOptions},
    path::Path,
    sync::Arc,
};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::Result;

/// Keeps the log file open; syncs it to disk when dropped at shutdown.
#[must_use = "dropping the guard syncs and closes the log file"]
pub struct LogGuard {
    file: Arc<File>,
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        let _ = self.file.sync_all();
    }
}

/// Initialize logging for the bot: console plus an append-only log file.
///
/// Default filter is `info` for everything; can be overridden with `RUST_LOG`.
/// Must be called once, before any component is built.
pub fn init(service_name: &str, log_file: &Path) -> Result<LogGuard> {
    if let Some(parent) = log_file.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = Arc::new(
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?,
    );

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("info,{service_name}=info")));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(file.clone()),
        )
        .try_init()
        .map_err(|e| crate::Error::Config(format!("logging already initialized: {e}")))?;

    Ok(LogGuard { file })
}
