use std::io;
use std::path::Path;

use tracing::dispatcher::DefaultGuard;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Layer;
use tracing_subscriber::{fmt, registry};

use crate::simulation::config::Logging;

// This is a helper struct to store the logger guards. When they are dropped, logging can be reset.
#[allow(dead_code)]
pub struct LogGuards {
    log_guard: Option<WorkerGuard>,
    default: DefaultGuard,
}

pub fn init_std_out_logging_thread_local() -> DefaultGuard {
    let collector = registry().with(
        fmt::Layer::new()
            .with_writer(io::stdout)
            .with_filter(LevelFilter::INFO),
    );
    tracing::subscriber::set_default(collector)
}

/// Installs the subscriber of partition `part` for the current thread. Every partition logs into
/// its own json file in `dir`, partition 0 additionally logs to the console.
pub fn init_logging(logging: &Logging, dir: &Path, part: u32) -> LogGuards {
    let level = match logging {
        Logging::None => None,
        Logging::Info => Some(LevelFilter::INFO),
        Logging::Debug => Some(LevelFilter::DEBUG),
    };

    let (log_layer, log_guard) = if let Some(level) = level {
        let log_file_name = format!("log_process_{part}.txt");
        let log_file_appender = rolling::never(dir, log_file_name);
        let (log_file, log_guard) = non_blocking(log_file_appender);
        let layer = fmt::Layer::new()
            .with_writer(log_file)
            .json()
            .with_ansi(false)
            .with_filter(level);
        (Some(layer), Some(log_guard))
    } else {
        (None, None)
    };

    let console_layer = (part == 0).then(|| {
        fmt::layer()
            .with_writer(io::stdout)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(LevelFilter::INFO)
    });

    // Add `Optional`s. If None, then the corresponding layer is not added.
    let collector = registry().with(log_layer).with(console_layer);
    let default = tracing::subscriber::set_default(collector);

    LogGuards { log_guard, default }
}

#[cfg(test)]
mod tests {
    use tracing::info;

    use super::*;

    #[test]
    fn log_file_per_partition() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _guards = init_logging(&Logging::Info, dir.path(), 3);
            info!("written into the file of partition 3");
        }
        let content = std::fs::read_to_string(dir.path().join("log_process_3.txt")).unwrap();
        assert!(content.contains("written into the file of partition 3"));
    }

    #[test]
    fn no_file_without_logging() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _guards = init_logging(&Logging::None, dir.path(), 1);
            info!("goes nowhere");
        }
        assert!(!dir.path().join("log_process_1.txt").exists());
    }
}
