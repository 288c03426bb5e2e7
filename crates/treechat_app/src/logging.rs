use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter used by the peer when `RUST_LOG` is unset.
pub const PEER_DEFAULT_FILTER: &str = "info,treechat_net=debug,treechat_app=debug";

/// Filter used by the directory when `RUST_LOG` is unset.
pub const DIRECTORY_DEFAULT_FILTER: &str = "info";

/// Initializes peer logging to a daily rolling file in `logs_dir`.
///
/// Nothing is written to the terminal, which belongs to the chat UI.
/// Returns a guard that must be kept alive for the duration of the app.
pub fn init_peer_logging(logs_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(logs_dir)?;

    // File appender: daily rotation
    let file_appender = tracing_appender::rolling::daily(logs_dir, "treechat");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(PEER_DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(guard)
}

/// Initializes compact directory logging on stderr.
pub fn init_directory_logging() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DIRECTORY_DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(())
}
