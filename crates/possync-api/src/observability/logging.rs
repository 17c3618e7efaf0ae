//! Structured logging configuration.
//!
//! Log output is plain text for development and JSON for production, chosen
//! by the `logging.json_format` configuration key. `RUST_LOG` always wins
//! over the configured default level.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Configuration for structured logging.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Whether to use JSON format (true) or text format (false)
    pub json_format: bool,
    /// The default log level if RUST_LOG is not set
    pub default_level: Level,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json_format: false,
            default_level: Level::INFO,
        }
    }
}

impl LoggingConfig {
    /// JSON output for production.
    pub fn json() -> Self {
        Self {
            json_format: true,
            ..Default::default()
        }
    }

    /// Text output for development.
    pub fn text() -> Self {
        Self {
            json_format: false,
            ..Default::default()
        }
    }

    /// Set the default log level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }
}

/// Initialize the logging subsystem with the given configuration.
///
/// This should be called once at application startup. If called multiple
/// times, subsequent calls have no effect (the subscriber is global).
pub fn init_logging(config: LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_level.to_string()));

    if config.json_format {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true)
                .with_file(false)
                .with_line_number(false),
        );
        let _ = tracing::subscriber::set_global_default(subscriber);
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true));
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

/// Creates a JSON-formatted subscriber writing to `writer`, so tests can
/// capture and verify log output.
pub fn create_json_layer<W>(writer: W) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(EnvFilter::new("trace"))
        .with(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_current_span(true),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// A writer that captures output to a shared buffer.
    #[derive(Clone)]
    struct CaptureWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl CaptureWriter {
        fn new() -> Self {
            Self {
                buffer: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn get_output(&self) -> String {
            let buffer = self.buffer.lock().unwrap();
            String::from_utf8_lossy(&buffer).to_string()
        }
    }

    impl std::io::Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let mut buffer = self.buffer.lock().unwrap();
            buffer.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CaptureWriter {
        type Writer = CaptureWriter;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_logging_config_defaults_to_text_at_info() {
        let config = LoggingConfig::default();
        assert!(!config.json_format);
        assert_eq!(config.default_level, Level::INFO);
    }

    #[test]
    fn test_logging_config_builders() {
        assert!(LoggingConfig::json().json_format);
        assert!(!LoggingConfig::text().json_format);
        let config = LoggingConfig::text().with_level(Level::DEBUG);
        assert_eq!(config.default_level, Level::DEBUG);
    }

    #[test]
    fn test_structured_logs_are_json_formatted() {
        use tracing::info;

        let writer = CaptureWriter::new();
        let subscriber = create_json_layer(writer.clone());

        tracing::subscriber::with_default(subscriber, || {
            info!(
                client_id = "tienda1_pos1",
                table = "ventas",
                "batch accepted"
            );
        });

        let output = writer.get_output();
        assert!(!output.is_empty(), "should have captured log output");

        for line in output.lines().filter(|line| !line.is_empty()) {
            let json: serde_json::Value =
                serde_json::from_str(line).expect("log line should be valid JSON");
            assert!(json.get("level").is_some());
            assert!(json.get("target").is_some());
        }
    }
}
