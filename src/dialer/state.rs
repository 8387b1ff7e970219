//! Observable dialer state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::campaign::CampaignStats;
use crate::models::{CallOutcome, CallTarget, CompletedCall, SkipReason};
use crate::telephony::AnsweredBy;

/// Why dialing is paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// Operator asked for a pause
    Operator,
    /// Working-hours window is closed
    OutsideWorkingHours,
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operator => write!(f, "paused by operator"),
            Self::OutsideWorkingHours => write!(f, "outside working hours"),
        }
    }
}

/// Dialer state machine position
///
/// `Paused` is only reported while no call is active; a pause requested
/// mid-call takes effect once that call wraps up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialerState {
    Idle,
    Dialing,
    Connected,
    WrappingUp,
    Paused(PauseReason),
    Stopped,
}

impl DialerState {
    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused(_))
    }
}

impl fmt::Display for DialerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Dialing => write!(f, "dialing"),
            Self::Connected => write!(f, "connected"),
            Self::WrappingUp => write!(f, "wrapping_up"),
            Self::Paused(reason) => write!(f, "paused ({reason})"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Why a campaign ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every target resolved
    QueueExhausted,
    /// Operator issued `stop`
    Operator,
    /// Every campaign handle was dropped
    HandleDropped,
}

/// Lifecycle events broadcast by a running campaign
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DialerEvent {
    StateChanged {
        state: DialerState,
    },
    Dialing {
        target_id: String,
        phone: String,
        caller_id: String,
        attempt: u32,
    },
    Answered {
        target_id: String,
        answered_by: AnsweredBy,
    },
    CallEnded {
        target_id: String,
        outcome: CallOutcome,
        duration_secs: f64,
    },
    TargetSkipped {
        target_id: String,
        reason: SkipReason,
    },
    Paused {
        reason: PauseReason,
    },
    Resumed,
    CampaignFinished {
        reason: StopReason,
    },
}

/// Point-in-time view of a campaign
#[derive(Debug, Clone, Serialize)]
pub struct DialerSnapshot {
    pub campaign_id: String,
    pub state: DialerState,
    /// Pause flag, set even while a call is still finishing
    pub paused: Option<PauseReason>,
    pub current: Option<CallTarget>,
    pub queue: Vec<CallTarget>,
    pub stats: CampaignStats,
    pub completed_calls: Vec<CompletedCall>,
}

/// Final account of a campaign run
#[derive(Debug, Clone, Serialize)]
pub struct CampaignReport {
    pub campaign_id: String,
    pub agent_id: String,
    pub stop_reason: StopReason,
    pub stats: CampaignStats,
    pub completed_calls: Vec<CompletedCall>,
    pub targets: Vec<CallTarget>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CampaignReport {
    /// Target by contact ID
    pub fn target(&self, id: &str) -> Option<&CallTarget> {
        self.targets.iter().find(|t| t.id == id)
    }

    /// Calls placed, in dial order
    pub fn dial_order(&self) -> Vec<&str> {
        self.completed_calls.iter().map(|c| c.target_id.as_str()).collect()
    }

    /// Sum of `attempts` over all targets
    pub fn total_attempts(&self) -> u64 {
        self.targets.iter().map(|t| u64::from(t.attempts)).sum()
    }
}
