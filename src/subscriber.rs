//! Tracing subscriber setup for the command-line binary.

use std::fs::OpenOptions;
use std::io::{self, IsTerminal};

use thiserror::Error;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, MakeWriter, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingConfig};

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG`, when set, overrides `config.level`.
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    let directive = std::env::var("RUST_LOG").unwrap_or_else(|_| config.level.clone());
    let filter =
        EnvFilter::try_new(&directive).map_err(|e| LoggingError::InvalidFilter(e.to_string()))?;

    match config.output.as_str() {
        "stdout" => install(config, filter, io::stdout, io::stdout().is_terminal()),
        "stderr" => install(config, filter, io::stderr, io::stderr().is_terminal()),
        path => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| LoggingError::FileOpen(path.to_string(), e))?;
            install(config, filter, file, false)
        }
    }
}

fn install<W>(
    config: &LoggingConfig,
    filter: EnvFilter,
    writer: W,
    is_terminal: bool,
) -> Result<(), LoggingError>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_target(config.target)
        .with_span_events(FmtSpan::NONE)
        .with_writer(writer);
    let registry = tracing_subscriber::registry().with(filter);

    let result = match (config.format, config.timestamps) {
        (LogFormat::Json, true) => registry.with(layer.json()).try_init(),
        (LogFormat::Json, false) => registry.with(layer.json().without_time()).try_init(),
        (LogFormat::Text, true) => registry
            .with(layer.with_ansi(config.color && is_terminal))
            .try_init(),
        (LogFormat::Text, false) => registry
            .with(layer.with_ansi(config.color && is_terminal).without_time())
            .try_init(),
    };
    result.map_err(|e| LoggingError::Install(e.to_string()))
}

/// Errors that can occur during logging initialization.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("Failed to open log file '{0}': {1}")]
    FileOpen(String, #[source] io::Error),

    #[error("Failed to install subscriber: {0}")]
    Install(String),
}
