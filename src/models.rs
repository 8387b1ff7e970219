// Core data structures for the campaign dialer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Priority assigned to contacts that arrive without a score
pub const DEFAULT_PRIORITY: f64 = 50.0;

/// Contact record supplied by the CRM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub name: String,
    #[serde(alias = "phoneNumber")]
    pub phone_number: String,
    #[serde(default, alias = "priorityScore")]
    pub priority_score: Option<f64>,
}

impl Contact {
    /// Create a contact with the default priority
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        phone_number: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            phone_number: phone_number.into(),
            priority_score: None,
        }
    }

    /// Set the priority score
    pub fn with_priority(mut self, priority: impl Into<f64>) -> Self {
        self.priority_score = Some(priority.into());
        self
    }
}

/// Load a CRM contact export (JSON array)
pub fn read_contacts(path: &Path) -> crate::error::Result<Vec<Contact>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Contact channel tracked by the frequency throttle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Voice,
    Text,
}

impl Channel {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Voice => "voice",
            Self::Text => "text",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "voice" | "call" | "phone" => Some(Self::Voice),
            "text" | "sms" => Some(Self::Text),
            _ => None,
        }
    }

    /// Get all channels
    pub fn all() -> Vec<Self> {
        vec![Self::Voice, Self::Text]
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a call target within one campaign run
///
/// Transitions only move forward: `Pending -> Dialing -> {Completed, Failed}`,
/// or `Pending -> Failed` for policy skips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Pending,
    Dialing,
    Completed,
    Failed,
}

impl TargetStatus {
    /// Whether the target is resolved for this run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dialing => "dialing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a placed call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// Answered by a person
    Connected,
    /// Answered by an answering machine
    Voicemail,
    /// Ring timeout, or the callee hung up before answering
    NoAnswer,
    /// Provider error
    Failed,
    /// Operator skipped or stopped the call
    Skipped,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Voicemail => "voicemail",
            Self::NoAnswer => "no_answer",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Target status recorded for this outcome
    pub fn target_status(&self) -> TargetStatus {
        match self {
            Self::Failed => TargetStatus::Failed,
            _ => TargetStatus::Completed,
        }
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a target was resolved without placing a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Contacted on this channel inside the cool-down window
    RecentlyContacted,
    /// Throttle store could not be consulted
    ThrottleUnavailable,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecentlyContacted => "recently contacted",
            Self::ThrottleUnavailable => "throttle unavailable",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry of a campaign queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallTarget {
    /// Contact ID this target dials
    pub id: String,
    pub name: String,
    pub phone: String,
    /// Higher dials first in `priority` mode
    pub priority: f64,
    /// Calls actually placed to this target
    pub attempts: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub status: TargetStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<CallOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
}

impl CallTarget {
    /// Create a pending target from a CRM contact
    pub fn from_contact(contact: &Contact) -> Self {
        Self {
            id: contact.id.clone(),
            name: contact.name.clone(),
            phone: contact.phone_number.clone(),
            priority: contact.priority_score.unwrap_or(DEFAULT_PRIORITY),
            attempts: 0,
            last_attempt: None,
            status: TargetStatus::Pending,
            outcome: None,
            skip_reason: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == TargetStatus::Pending
    }

    pub fn is_dialing(&self) -> bool {
        self.status == TargetStatus::Dialing
    }
}

/// Entry of the completed-calls log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedCall {
    pub target_id: String,
    pub name: String,
    pub phone: String,
    pub caller_id: String,
    pub outcome: CallOutcome,
    pub duration_secs: f64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}
