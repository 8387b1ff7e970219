//! Telephony provider contract
//!
//! The dialer never touches audio. It asks a [`TelephonyProvider`] to place a
//! call and then consumes the call's lifecycle as typed [`CallEvent`]s from a
//! channel held in the [`CallHandle`]. Dropping the handle means the dialer
//! no longer cares about that call.

pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

pub use simulated::{CallScript, SimulatedProvider};

/// Result type for provider operations
pub type TelephonyResult<T> = Result<T, TelephonyError>;

/// Errors raised by telephony providers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TelephonyError {
    /// Device not initialized
    #[error("Telephony provider '{0}' is not ready")]
    NotReady(String),

    /// Call could not be placed
    #[error("Failed to connect call to {to}: {reason}")]
    ConnectFailed { to: String, reason: String },

    #[error("Unknown call: {0}")]
    UnknownCall(String),

    /// Transport-level failure
    #[error("Telephony transport error: {0}")]
    Transport(String),
}

impl TelephonyError {
    /// Whether a later attempt might succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotReady(_) | Self::Transport(_))
    }
}

/// Parameters for placing an outbound call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectParams {
    /// Callee phone number
    pub to: String,
    /// Presented caller ID
    pub caller_id: String,
    /// Whether the call is recorded
    pub record: bool,
}

/// Who picked up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnsweredBy {
    #[default]
    Human,
    Machine,
}

impl fmt::Display for AnsweredBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Human => write!(f, "human"),
            Self::Machine => write!(f, "machine"),
        }
    }
}

/// Lifecycle event of a placed call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    /// Call answered
    Accept { answered_by: AnsweredBy },
    /// Call ended, by either side
    Disconnect,
    /// Call failed
    Error { message: String },
}

/// A placed call
#[derive(Debug)]
pub struct CallHandle {
    pub call_id: String,
    events: mpsc::UnboundedReceiver<CallEvent>,
}

impl CallHandle {
    pub fn new(call_id: impl Into<String>, events: mpsc::UnboundedReceiver<CallEvent>) -> Self {
        Self {
            call_id: call_id.into(),
            events,
        }
    }

    /// Next lifecycle event; `None` once the provider drops the call
    pub async fn next_event(&mut self) -> Option<CallEvent> {
        self.events.recv().await
    }
}

/// Create a call handle together with the sender that feeds it
pub fn call_channel(call_id: impl Into<String>) -> (mpsc::UnboundedSender<CallEvent>, CallHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, CallHandle::new(call_id, rx))
}

/// Outbound calling backend
#[async_trait]
pub trait TelephonyProvider: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Whether the device is initialized and can place calls
    async fn is_ready(&self) -> bool;

    /// Place a call
    async fn connect(&self, params: ConnectParams) -> TelephonyResult<CallHandle>;

    /// Hang up one call
    async fn disconnect(&self, call_id: &str) -> TelephonyResult<()>;

    /// Hang up every call this provider placed
    async fn disconnect_all(&self);
}
