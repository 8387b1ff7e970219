//! Ordered call targets for one campaign run
//!
//! The queue is materialized once at campaign start and ordered by the
//! configured [`PriorityMode`]. Ordering is never re-evaluated mid-run.
//! Only the dialer mutates it; everyone else sees snapshots.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::models::{CallOutcome, CallTarget, Contact, SkipReason, TargetStatus};

/// Caller-supplied predicate flagging contacts that must never be dialed
pub type BadNumberFilter = Arc<dyn Fn(&Contact) -> bool + Send + Sync>;

/// Errors raised by invalid queue transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("Unknown call target: {0}")]
    UnknownTarget(String),

    #[error("Target {id} is {status}, expected {expected}")]
    InvalidTransition {
        id: String,
        status: TargetStatus,
        expected: TargetStatus,
    },

    #[error("Target {0} is already dialing")]
    LineBusy(String),
}

// ============================================================================
// Priority Mode
// ============================================================================

/// Ordering policy applied once at build time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityMode {
    /// Input order
    #[default]
    Sequential,
    /// Descending priority, ties keep input order
    Priority,
    /// Shuffled once
    Random,
}

impl PriorityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Priority => "priority",
            Self::Random => "random",
        }
    }
}

impl fmt::Display for PriorityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PriorityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "priority" => Ok(Self::Priority),
            "random" => Ok(Self::Random),
            other => Err(format!(
                "Unknown priority mode '{other}'. Valid options: sequential, priority, random"
            )),
        }
    }
}

// ============================================================================
// Campaign Queue
// ============================================================================

/// Build parameters for [`CampaignQueue::build`]
#[derive(Clone, Default)]
pub struct QueueOptions {
    pub mode: PriorityMode,
    pub skip_bad_numbers: bool,
    pub bad_number: Option<BadNumberFilter>,
    /// Seed for [`PriorityMode::Random`]; `None` uses the thread RNG
    pub seed: Option<u64>,
}

impl fmt::Debug for QueueOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueOptions")
            .field("mode", &self.mode)
            .field("skip_bad_numbers", &self.skip_bad_numbers)
            .field("bad_number", &self.bad_number.is_some())
            .field("seed", &self.seed)
            .finish()
    }
}

/// Ordered collection of call targets with per-target state
#[derive(Debug, Clone, Default, Serialize)]
pub struct CampaignQueue {
    targets: Vec<CallTarget>,
}

impl CampaignQueue {
    /// Materialize and order the queue from a contact list
    pub fn build(contacts: &[Contact], options: &QueueOptions) -> Self {
        let mut targets: Vec<CallTarget> = contacts
            .iter()
            .filter(|contact| {
                let excluded = options.skip_bad_numbers
                    && options.bad_number.as_ref().is_some_and(|bad| bad(contact));
                if excluded {
                    tracing::debug!(contact_id = %contact.id, "Bad number filtered from queue");
                }
                !excluded
            })
            .map(CallTarget::from_contact)
            .collect();

        match options.mode {
            PriorityMode::Sequential => {}
            // sort_by is stable, so equal priorities keep input order
            PriorityMode::Priority => {
                targets.sort_by(|a, b| b.priority.total_cmp(&a.priority))
            }
            PriorityMode::Random => match options.seed {
                Some(seed) => targets.shuffle(&mut ChaCha8Rng::seed_from_u64(seed)),
                None => targets.shuffle(&mut rand::thread_rng()),
            },
        }

        tracing::debug!(
            mode = %options.mode,
            input = contacts.len(),
            queued = targets.len(),
            "Campaign queue built"
        );

        Self { targets }
    }

    /// First pending target in policy order
    pub fn next_pending(&self) -> Option<&CallTarget> {
        self.targets.iter().find(|t| t.is_pending())
    }

    /// Currently dialing target, if any
    pub fn dialing(&self) -> Option<&CallTarget> {
        self.targets.iter().find(|t| t.is_dialing())
    }

    /// `Pending -> Dialing`, counting one attempt
    pub fn mark_dialing(&mut self, id: &str, now: DateTime<Utc>) -> Result<&CallTarget, QueueError> {
        if let Some(busy) = self.dialing() {
            return Err(QueueError::LineBusy(busy.id.clone()));
        }

        let target = self.target_mut(id, TargetStatus::Pending)?;
        target.status = TargetStatus::Dialing;
        target.attempts += 1;
        target.last_attempt = Some(now);
        Ok(target)
    }

    /// `Dialing -> Completed | Failed` according to the call outcome
    pub fn mark_outcome(&mut self, id: &str, outcome: CallOutcome) -> Result<&CallTarget, QueueError> {
        let target = self.target_mut(id, TargetStatus::Dialing)?;
        target.status = outcome.target_status();
        target.outcome = Some(outcome);
        Ok(target)
    }

    /// `Pending -> Failed` without placing a call
    pub fn mark_skipped(&mut self, id: &str, reason: SkipReason) -> Result<&CallTarget, QueueError> {
        let target = self.target_mut(id, TargetStatus::Pending)?;
        target.status = TargetStatus::Failed;
        target.skip_reason = Some(reason);
        Ok(target)
    }

    fn target_mut(&mut self, id: &str, expected: TargetStatus) -> Result<&mut CallTarget, QueueError> {
        let target = self
            .targets
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| QueueError::UnknownTarget(id.to_string()))?;

        if target.status != expected {
            return Err(QueueError::InvalidTransition {
                id: id.to_string(),
                status: target.status,
                expected,
            });
        }
        Ok(target)
    }

    pub fn get(&self, id: &str) -> Option<&CallTarget> {
        self.targets.iter().find(|t| t.id == id)
    }

    /// All targets in policy order
    pub fn targets(&self) -> &[CallTarget] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.targets.iter().filter(|t| t.is_pending()).count()
    }

    pub fn dialing_count(&self) -> usize {
        self.targets.iter().filter(|t| t.is_dialing()).count()
    }

    pub fn has_pending(&self) -> bool {
        self.targets.iter().any(|t| t.is_pending())
    }
}
