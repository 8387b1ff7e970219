//! Cross-channel contact-frequency throttle
//!
//! Tracks when each contact was last reached on each channel and refuses a new
//! contact until the channel's cool-down window has elapsed. Voice and text
//! are tracked independently: a recent call never throttles texting.
//!
//! | Channel | Window |
//! |---------|--------|
//! | voice   | 14 days |
//! | text    | 30 days |
//!
//! The throttle is process-wide state shared by every campaign. All writes go
//! through one lock so that [`ContactThrottle::try_claim`] is a true
//! check-and-record: two campaigns cannot both pass the throttle for the same
//! contact and channel.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::Channel;
use crate::store::{KeyValueStore, MemoryStore, StoreResult};

/// Default voice cool-down in days
pub const VOICE_WINDOW_DAYS: i64 = 14;

/// Default text cool-down in days
pub const TEXT_WINDOW_DAYS: i64 = 30;

/// Cool-down window per channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleWindows {
    pub voice: Duration,
    pub text: Duration,
}

impl Default for ThrottleWindows {
    fn default() -> Self {
        Self {
            voice: Duration::days(VOICE_WINDOW_DAYS),
            text: Duration::days(TEXT_WINDOW_DAYS),
        }
    }
}

impl ThrottleWindows {
    /// Build windows from day counts
    pub fn from_days(voice_days: i64, text_days: i64) -> Self {
        Self {
            voice: Duration::days(voice_days),
            text: Duration::days(text_days),
        }
    }

    /// Window for a channel
    pub fn for_channel(&self, channel: Channel) -> Duration {
        match channel {
            Channel::Voice => self.voice,
            Channel::Text => self.text,
        }
    }
}

/// Last contact on one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleRecord {
    pub contact_id: String,
    pub channel: Channel,
    pub last_contacted_at: DateTime<Utc>,
    #[serde(default)]
    pub agent_id: Option<String>,
}

/// Operator-facing advice derived from a contact's history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recommendation {
    /// Never contacted on this channel
    FirstContact,
    /// Cool-down elapsed
    Ready,
    /// Still inside the cool-down window
    Wait { days_remaining: i64 },
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstContact => write!(f, "Safe to contact - no previous contact"),
            Self::Ready => write!(f, "Safe to contact"),
            Self::Wait { days_remaining } => {
                write!(f, "Wait {days_remaining} more day(s) before contacting")
            }
        }
    }
}

/// History summary for one contact and channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleSummary {
    pub has_history: bool,
    pub days_since: Option<i64>,
    pub recommendation: Recommendation,
}

/// Whether `now` is still inside `window` after `last`
pub fn is_within_window(last: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    now - last < window
}

/// Contact-frequency throttle backed by an injectable store
pub struct ContactThrottle {
    store: Arc<dyn KeyValueStore<ThrottleRecord>>,
    windows: ThrottleWindows,
    write_lock: Mutex<()>,
}

impl fmt::Debug for ContactThrottle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContactThrottle")
            .field("windows", &self.windows)
            .finish_non_exhaustive()
    }
}

impl ContactThrottle {
    /// Create a throttle over the given store
    pub fn new(store: Arc<dyn KeyValueStore<ThrottleRecord>>, windows: ThrottleWindows) -> Self {
        Self {
            store,
            windows,
            write_lock: Mutex::new(()),
        }
    }

    /// Create a throttle with an in-memory store and default windows
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStore::<ThrottleRecord>::new()),
            ThrottleWindows::default(),
        )
    }

    pub fn windows(&self) -> ThrottleWindows {
        self.windows
    }

    fn key(contact_id: &str, channel: Channel) -> String {
        format!("{contact_id}:{channel}")
    }

    /// Last contact record for a contact on a channel
    pub async fn last_contact(
        &self,
        contact_id: &str,
        channel: Channel,
    ) -> StoreResult<Option<ThrottleRecord>> {
        self.store.get(&Self::key(contact_id, channel)).await
    }

    /// Whether the contact is inside the channel's cool-down at `now`
    pub async fn is_throttled(
        &self,
        contact_id: &str,
        channel: Channel,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        Ok(self
            .last_contact(contact_id, channel)
            .await?
            .is_some_and(|r| {
                is_within_window(r.last_contacted_at, now, self.windows.for_channel(channel))
            }))
    }

    /// Record a genuine contact attempt
    ///
    /// Must not be called for throttled or skipped attempts, or the cool-down
    /// would be extended. An older timestamp never replaces a newer one.
    pub async fn record(
        &self,
        contact_id: &str,
        channel: Channel,
        when: DateTime<Utc>,
        agent_id: Option<&str>,
    ) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let key = Self::key(contact_id, channel);

        if let Some(existing) = self.store.get(&key).await? {
            if existing.last_contacted_at > when {
                return Ok(());
            }
        }

        self.store
            .set(
                &key,
                ThrottleRecord {
                    contact_id: contact_id.to_string(),
                    channel,
                    last_contacted_at: when,
                    agent_id: agent_id.map(str::to_string),
                },
            )
            .await
    }

    /// Atomically check the throttle and record the contact if allowed
    ///
    /// Returns `false` (and records nothing) when the contact is throttled.
    pub async fn try_claim(
        &self,
        contact_id: &str,
        channel: Channel,
        now: DateTime<Utc>,
        agent_id: Option<&str>,
    ) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        let key = Self::key(contact_id, channel);

        if let Some(existing) = self.store.get(&key).await? {
            if is_within_window(
                existing.last_contacted_at,
                now,
                self.windows.for_channel(channel),
            ) {
                tracing::debug!(
                    contact_id = %contact_id,
                    channel = %channel,
                    last_contacted_at = %existing.last_contacted_at,
                    "Contact throttled"
                );
                return Ok(false);
            }
        }

        self.store
            .set(
                &key,
                ThrottleRecord {
                    contact_id: contact_id.to_string(),
                    channel,
                    last_contacted_at: now,
                    agent_id: agent_id.map(str::to_string),
                },
            )
            .await?;
        Ok(true)
    }

    /// Summarize a contact's history on a channel
    pub async fn summary(
        &self,
        contact_id: &str,
        channel: Channel,
        now: DateTime<Utc>,
    ) -> StoreResult<ThrottleSummary> {
        let Some(record) = self.last_contact(contact_id, channel).await? else {
            return Ok(ThrottleSummary {
                has_history: false,
                days_since: None,
                recommendation: Recommendation::FirstContact,
            });
        };

        let elapsed = now - record.last_contacted_at;
        let window = self.windows.for_channel(channel);
        let recommendation = if elapsed < window {
            // Partial days round up
            let remaining = window - elapsed;
            let mut days = remaining.num_days();
            if remaining > Duration::days(days) {
                days += 1;
            }
            Recommendation::Wait {
                days_remaining: days,
            }
        } else {
            Recommendation::Ready
        };

        Ok(ThrottleSummary {
            has_history: true,
            days_since: Some(elapsed.num_days()),
            recommendation,
        })
    }
}
