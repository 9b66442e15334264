//! Logging setup and security event vocabulary.
//!
//! Application code logs through plain `tracing` macros. Authentication,
//! lockout, reset and rate-limit decisions go through [`security_event!`]
//! so they carry a uniform `security_event` / `category` / `severity`
//! field set.

mod config;
mod events;
mod providers;

pub use config::{LogFormat, ObservabilityConfig, ObservabilityConfigBuilder};
pub use events::{security_event, SecurityEvent, Severity};

use thiserror::Error;
use tracing::info;

/// Initialize logging.
///
/// Call once at startup, before anything logs.
pub fn init(config: &ObservabilityConfig) -> Result<(), ObservabilityError> {
    providers::init_tracing(config)?;

    info!(
        log_format = ?config.log_format,
        log_filter = %config.log_filter,
        "Observability initialized"
    );

    Ok(())
}

/// Observability initialization errors
#[derive(Debug, Error)]
pub enum ObservabilityError {
    /// Invalid configuration
    #[error("observability config error: {0}")]
    Config(String),
    /// Subscriber installation failed
    #[error("provider error: {0}")]
    Provider(String),
}
