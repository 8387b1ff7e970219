//! Unified error handling for the powerdial crate
//!
//! Each module keeps its own error type. [`Error`] wraps all of them so callers
//! that cross module boundaries (the CLI, embedding applications) can work
//! with a single type and still ask whether a failure is worth retrying.
//!
//! # Usage
//!
//! ```rust,ignore
//! use powerdial::error::{Error, ErrorCategory, PowerdialErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         println!("Retrying: {}", err);
//!     } else {
//!         eprintln!("Fatal {} error: {}", err.category(), err);
//!     }
//! }
//! ```

use std::fmt;
use std::io;
use thiserror::Error;

pub use crate::campaign::{GateError, QueueError};
pub use crate::dialer::DialerError;
pub use crate::store::StoreError;
pub use crate::telephony::TelephonyError;

/// Common interface for powerdial error types
pub trait PowerdialErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Provider readiness, connect and transport errors
    Telephony,
    /// Campaign lifecycle and operator command errors
    Campaign,
    /// Store and file I/O errors
    Storage,
    /// Configuration and validation errors
    Config,
    /// Input decoding errors
    Parsing,
    /// Other/unknown errors
    Other,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Telephony => "telephony",
            Self::Campaign => "campaign",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Parsing => "parsing",
            Self::Other => "other",
        };
        write!(f, "{name}")
    }
}

/// Unified error type for the powerdial crate
#[derive(Error, Debug)]
pub enum Error {
    /// Campaign start and operator command errors
    #[error("Dialer error: {0}")]
    Dialer(#[from] DialerError),

    /// Telephony provider errors
    #[error("Telephony error: {0}")]
    Telephony(#[from] TelephonyError),

    /// Throttle and carousel store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid queue transitions
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Working-hours settings errors
    #[error("Working hours error: {0}")]
    Gate(#[from] GateError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl PowerdialErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Dialer(e) => e.is_recoverable(),
            Self::Telephony(e) => e.is_recoverable(),
            Self::Store(StoreError::Io { .. }) => true,
            Self::Store(StoreError::Serialization(_)) => false,
            Self::Queue(_) | Self::Gate(_) => false,
            Self::Io(_) => true, // I/O errors are often transient
            Self::Json(_) => false,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Dialer(DialerError::ProviderNotReady(_)) | Self::Telephony(_) => {
                ErrorCategory::Telephony
            }
            Self::Dialer(DialerError::InvalidSettings(_)) | Self::Gate(_) | Self::Config(_) => {
                ErrorCategory::Config
            }
            Self::Dialer(_) | Self::Queue(_) => ErrorCategory::Campaign,
            Self::Store(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Parsing,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
