//! Tracing setup for the CLI.
//!
//! Diagnostics go to stderr so stdout stays clean for command output. When a
//! log directory is given, a daily-rolling file copy is written alongside.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when `RUST_LOG` is unset.
fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "patchwright=debug,info"
    } else {
        "patchwright=info,warn"
    }
}

/// Install the global subscriber.
///
/// Reads `RUST_LOG` if set. The returned guard must be held for the lifetime
/// of the process so buffered file output is flushed on exit.
pub fn init(verbose: bool, json: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let writable_dir = log_dir.filter(|dir| std::fs::create_dir_all(dir).is_ok());
    let (file_layer, guard) = match writable_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "patchwright.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false).json();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);

    // try_init: tests and embedders may already have a subscriber installed.
    let _ = if json {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(verbose)
                    .compact(),
            )
            .try_init()
    };

    guard
}
