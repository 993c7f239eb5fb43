//! Logging.

use basenji_error::GenericError;
use tracing_subscriber::{fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _, Layer, Registry};

mod config;
pub use self::config::{LogLevel, LoggingConfiguration};

/// Logs a message to standard error and exits the process with a non-zero exit code.
pub fn fatal_and_exit(message: String) {
    eprintln!("FATAL: {}", message);
    std::process::exit(1);
}

/// Initializes the logging subsystem for `tracing`.
///
/// Events are filtered by the configured log level and written to standard error, either in a human-readable format
/// or, if `log_format_json` is set, as one JSON object per line. Standard output is left to the application.
///
/// # Errors
///
/// If the logging subsystem was already initialized, an error will be returned.
pub fn initialize_logging(config: &LoggingConfiguration) -> Result<(), GenericError> {
    let formatting_layer: Box<dyn Layer<Registry> + Send + Sync> = if config.log_format_json {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer().with_target(true).with_writer(std::io::stderr).boxed()
    };

    tracing_subscriber::registry()
        .with(formatting_layer.with_filter(config.log_level.as_env_filter()))
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_initialization_fails() {
        let config = LoggingConfiguration::default();
        initialize_logging(&config).expect("first initialization should succeed");
        assert!(initialize_logging(&config).is_err());
    }
}
