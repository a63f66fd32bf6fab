//! Logging and tracing configuration
//!
//! The host embedding this crate normally installs its own subscriber; these
//! helpers exist for hosts that want the bridge's defaults. Every process
//! output line and correlation decision is emitted through `tracing`, so the
//! run log a user sees and the diagnostic log are fed from the same events.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Initialize tracing to stdout
///
/// Log level is controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate, WARN for dependencies.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("testbridge=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// Initialize tracing with an additional file layer under `log_dir`
///
/// Returns the appender guard (dropping it stops the background writer) and
/// the log file path. Falls back to stdout-only logging if the directory
/// cannot be created.
pub fn init_with_file(log_dir: &Path) -> Option<(WorkerGuard, PathBuf)> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("testbridge=debug,info"));

    if std::fs::create_dir_all(log_dir).is_err() {
        eprintln!(
            "Warning: could not create log directory {}",
            log_dir.display()
        );
        init();
        return None;
    }

    let appender = tracing_appender::rolling::never(log_dir, "testbridge.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let stdout_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    Some((guard, log_dir.join("testbridge.log")))
}

/// Default log directory for hosts that do not supply one
pub fn default_log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "testbridge")
        .map(|dirs| dirs.data_local_dir().join("logs"))
}
