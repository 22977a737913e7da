//! Utilities for logging.

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Structured json output.
    Json,
    /// Plain text, one event per line.
    #[default]
    HumanReadable,
}

/// Build an env filter that defaults to `default_level` unless `RUST_LOG` says
/// otherwise.
fn env_filter(default_level: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy()
}

/// Configure the global logger.
///
/// Only the first call installs a subscriber, later calls are no-ops. This
/// lets tests and binaries call this unconditionally.
pub fn configure_global_logger<W>(default_level: Level, format: LogFormat, writer: W)
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_level))
        .with_writer(writer)
        .with_file(true)
        .with_line_number(true);

    let result = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::HumanReadable => builder.try_init(),
    };

    if let Err(e) = result {
        // Already configured.
        tracing::trace!(%e, "global logger not installed");
    }
}

/// Configure a logger that writes to the test harness' captured output.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(Level::DEBUG))
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_twice() {
        configure_global_logger(Level::INFO, LogFormat::HumanReadable, std::io::stderr);
        configure_global_logger(Level::DEBUG, LogFormat::Json, std::io::stderr);
        init_test();
    }
}
