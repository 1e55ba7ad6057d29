//! Log setup: stdout plus a daily file under the data directory

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Crates whose logs are shown by default
const LOG_TARGETS: [&str; 4] = ["simlink", "simlink_comm", "simlink_sim", "simlink_mapper"];

/// Filter directives for our crates at `level`
pub fn filter_for_level(level: &str) -> String {
    LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber
///
/// `level` overrides `RUST_LOG`; without either, our crates log at info.
/// The returned guard flushes the log file and must live until exit.
pub fn init(level: Option<&str>, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = match level {
        Some(level) => EnvFilter::new(filter_for_level(level)),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(filter_for_level("info"))),
    };

    let mut file_error = None;
    let (file_layer, guard) = match log_dir.map(|dir| {
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("simlink")
            .filename_suffix("log")
            .build(dir)
    }) {
        Some(Ok(appender)) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        Some(Err(e)) => {
            file_error = Some(e);
            (None, None)
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    if let Some(e) = file_error {
        tracing::warn!("File logging disabled: {}", e);
    }
    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_covers_all_crates() {
        assert_eq!(
            filter_for_level("debug"),
            "simlink=debug,simlink_comm=debug,simlink_sim=debug,simlink_mapper=debug"
        );
        assert!(EnvFilter::try_new(filter_for_level("trace")).is_ok());
    }
}
