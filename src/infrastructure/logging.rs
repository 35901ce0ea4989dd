//! Tracing initialization: env-filtered console output plus a daily-rolling
//! file under the data directory.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::domain::models::LoggingConfig;

/// Initialize the global subscriber. The returned guard must live as long
/// as the process so the file writer flushes on exit.
pub fn init(config: &LoggingConfig, base_path: &Path) -> WorkerGuard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let file_appender = tracing_appender::rolling::daily(base_path.join("logs"), "server.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    if config.format == "json" {
        let file_layer = fmt::layer().with_writer(file_writer).with_ansi(false).json();
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .with(file_layer)
            .init();
    } else {
        let file_layer = fmt::layer().with_writer(file_writer).with_ansi(false);
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .with(file_layer)
            .init();
    }

    guard
}
