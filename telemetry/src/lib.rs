//! Tracing subscriber setup shared by the groups binaries
//!
//! Libraries only emit `tracing` events; binaries call [`init_tracing`] once
//! at startup:
//! - **Human** output: compact `fmt` layer with RFC 3339 UTC timestamps
//! - **JSON** output: one object per event, for log shippers
//!
//! `RUST_LOG` overrides the default filter.
//!
//! # Example
//!
//! ```rust,no_run
//! use telemetry::{init_tracing, LogFormat};
//!
//! # fn main() -> telemetry::Result<()> {
//! init_tracing(LogFormat::Json, "info,groups_engine=debug")?;
//! tracing::info!("started");
//! # Ok(())
//! # }
//! ```

pub mod error;

pub use error::*;

use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

/// `RUST_LOG` when set and valid, `default_filter` otherwise
pub fn env_filter(default_filter: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_filter)
            .map_err(|e| TelemetryError::InvalidFilter(format!("{default_filter}: {e}"))),
    }
}

/// Install the global subscriber. Fails if one is already installed
pub fn init_tracing(format: LogFormat, default_filter: &str) -> Result<()> {
    let filter = env_filter(default_filter)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Human => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .with_writer(std::io::stderr)
                    .json(),
            )
            .try_init(),
    };
    installed.map_err(|e| TelemetryError::TracingError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_default_filter() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert!(env_filter("info,groups_engine=debug").is_ok());
        assert!(matches!(
            env_filter("groups_engine=loud"),
            Err(TelemetryError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_second_init_fails() {
        let _ = init_tracing(LogFormat::Human, "warn");
        assert!(init_tracing(LogFormat::Json, "warn").is_err());
    }
}
