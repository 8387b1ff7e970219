//! Error types for the dialer module

/// Result type for dialer operations
pub type DialerResult<T> = Result<T, DialerError>;

/// Errors surfaced to the operator
///
/// Per-call failures never show up here; they are recorded as call outcomes
/// and the campaign moves on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DialerError {
    /// Telephony device never became ready; the campaign cannot start
    #[error("Telephony provider not ready: {0}")]
    ProviderNotReady(String),

    /// Nothing to dial after filtering
    #[error("Campaign queue is empty")]
    EmptyQueue,

    #[error("Invalid dialer settings: {0}")]
    InvalidSettings(String),

    /// Command sent after the campaign stopped
    #[error("Campaign has ended")]
    CampaignEnded,

    #[error("No call is active")]
    NoActiveCall,

    #[error("A call is already in progress")]
    CallInProgress,

    #[error("Campaign is paused")]
    Paused,

    /// Campaign task panicked or was cancelled
    #[error("Campaign task failed: {0}")]
    TaskFailed(String),
}

impl DialerError {
    pub(crate) fn invalid_settings(reason: impl Into<String>) -> Self {
        Self::InvalidSettings(reason.into())
    }

    /// Whether the same request could succeed later
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ProviderNotReady(_) | Self::NoActiveCall | Self::CallInProgress | Self::Paused
        )
    }
}
