//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! It follows the taxonomy used by the instrument layer:
//!
//! - **`Io` / `Timeout` / `ConnectionClosed`**: transport failures. These are fatal
//!   for the operation in progress and always propagate to the caller.
//! - **`NotConnected`**: an operation needed a session that was never opened or
//!   has already been released.
//! - **`Parse`**: an instrument answered, but not with something we can use
//!   (e.g. a non-numeric reply to `CALC:MARK:Y?`).
//! - **`Config` / `Configuration`**: settings that failed to load, or loaded but
//!   did not validate.
//! - **`Params`**: the persisted keyed-value parameter document could not be
//!   read or written.
//! - **`Worker`**: the background scan task panicked or was aborted.
//! - **`Widget`**: a value could not be coerced to the type a UI binding holds.
//!
//! Instrument-reported SCPI errors (non-zero `SYST:ERR?` codes) are
//! not represented here: they are logged by the session wrapper and execution
//! continues.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Error type for every fallible operation in the crate.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Settings file could not be loaded or deserialized.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Settings loaded but are semantically invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Parameter document could not be read or written.
    #[error("Parameter file error: {0}")]
    Params(String),

    /// Underlying socket or file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The instrument did not answer within the allotted time.
    #[error("Timed out after {timeout:?} waiting for response to '{command}'")]
    Timeout {
        /// Command whose response never arrived.
        command: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// The peer closed the connection.
    #[error("Connection to {0} closed by instrument")]
    ConnectionClosed(String),

    /// No open session for the requested operation.
    #[error("Instrument '{0}' is not connected")]
    NotConnected(String),

    /// Malformed address string.
    #[error("Invalid instrument address '{0}'")]
    InvalidAddress(String),

    /// Instrument response could not be interpreted.
    #[error("Could not parse response '{response}' to '{command}': {reason}")]
    Parse {
        /// Command that was queried.
        command: String,
        /// Raw response text.
        response: String,
        /// Why parsing failed.
        reason: String,
    },

    /// The background worker task failed to complete.
    #[error("Scan worker failed: {0}")]
    Worker(String),

    /// A value could not be converted to the type a widget binding holds.
    #[error("Widget value error: {0}")]
    Widget(String),

    /// Storage backend failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Functionality compiled out via feature flags.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl DaqError {
    /// True for the transport timeout variant.
    ///
    /// The scan worker uses this to treat a missing operation-complete
    /// acknowledgement as a per-point failure instead of aborting the run.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DaqError::Timeout { .. })
    }

    /// True for errors originating in the transport (socket, timeout, peer close).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DaqError::Io(_) | DaqError::Timeout { .. } | DaqError::ConnectionClosed(_)
        )
    }

    pub(crate) fn parse(command: &str, response: &str, reason: impl ToString) -> Self {
        DaqError::Parse {
            command: command.to_string(),
            response: response.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}
