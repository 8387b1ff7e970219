//! Operator-facing campaign settings

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::error::{DialerError, DialerResult};
use crate::campaign::{PriorityMode, WorkingHours};
use crate::utils::retry::RetryConfig;

pub const DEFAULT_WAIT_BETWEEN_CALLS_MS: u64 = 3_000;
pub const DEFAULT_MAX_RING_TIME_MS: u64 = 30_000;
pub const DEFAULT_WORKING_HOURS_POLL_SECS: u64 = 60;

// ============================================================================
// Caller ID Mode
// ============================================================================

/// Which outbound identity is presented to the callee
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallerIdMode {
    /// Carousel selection (agent pin first, then the shared pool)
    #[default]
    Main,
    /// Configured alternate identity, carousel when none is set
    Alternate,
}

impl fmt::Display for CallerIdMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main => write!(f, "main"),
            Self::Alternate => write!(f, "alternate"),
        }
    }
}

impl FromStr for CallerIdMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "main" => Ok(Self::Main),
            "alternate" | "alt" => Ok(Self::Alternate),
            other => Err(format!("Unknown caller ID mode '{other}'. Valid options: main, alternate")),
        }
    }
}

// ============================================================================
// Working Hours
// ============================================================================

/// Working-hours window as written in settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkingHoursConfig {
    pub enabled: bool,
    /// Start of the window, `HH:MM`
    pub start: String,
    /// End of the window (exclusive), `HH:MM`
    pub end: String,
    /// `UTC` or a fixed offset such as `-05:00`
    pub timezone: String,
}

impl Default for WorkingHoursConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start: "09:00".to_string(),
            end: "17:00".to_string(),
            timezone: "UTC".to_string(),
        }
    }
}

impl WorkingHoursConfig {
    /// Parse into a window the gate can evaluate
    pub fn resolve(&self) -> DialerResult<WorkingHours> {
        WorkingHours::parse(self.enabled, &self.start, &self.end, &self.timezone)
            .map_err(|e| DialerError::invalid_settings(format!("working_hours: {e}")))
    }
}

// ============================================================================
// Dialer Settings
// ============================================================================

/// Settings for one campaign run
///
/// Field aliases accept the camelCase names used by the web client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialerSettings {
    /// Advance to the next target automatically after each call
    #[serde(alias = "autoDialNext")]
    pub auto_dial_next: bool,

    #[serde(alias = "waitTimeBetweenCalls")]
    pub wait_time_between_calls_ms: u64,

    /// Ring timeout before a call counts as unanswered
    #[serde(alias = "maxRingTime")]
    pub max_ring_time_ms: u64,

    /// Drop contacts flagged by the bad-number filter at build time
    #[serde(alias = "skipBadNumbers")]
    pub skip_bad_numbers: bool,

    #[serde(alias = "priorityMode")]
    pub priority_mode: PriorityMode,

    #[serde(alias = "workingHours")]
    pub working_hours: WorkingHoursConfig,

    #[serde(alias = "callRecording")]
    pub call_recording: bool,

    #[serde(alias = "displayCallerID")]
    pub display_caller_id: CallerIdMode,

    /// How often a working-hours pause re-checks the window
    pub working_hours_poll_secs: u64,

    /// Seed for the `random` priority mode
    pub random_seed: Option<u64>,

    /// Readiness checks before giving up on the provider
    pub provider_ready_retries: u32,

    pub provider_ready_delay_ms: u64,
}

impl Default for DialerSettings {
    fn default() -> Self {
        Self {
            auto_dial_next: true,
            wait_time_between_calls_ms: DEFAULT_WAIT_BETWEEN_CALLS_MS,
            max_ring_time_ms: DEFAULT_MAX_RING_TIME_MS,
            skip_bad_numbers: false,
            priority_mode: PriorityMode::Sequential,
            working_hours: WorkingHoursConfig::default(),
            call_recording: false,
            display_caller_id: CallerIdMode::Main,
            working_hours_poll_secs: DEFAULT_WORKING_HOURS_POLL_SECS,
            random_seed: None,
            provider_ready_retries: 3,
            provider_ready_delay_ms: 500,
        }
    }
}

impl DialerSettings {
    /// Create a settings builder
    pub fn builder() -> DialerSettingsBuilder {
        DialerSettingsBuilder::default()
    }

    /// Validate the settings
    pub fn validate(&self) -> DialerResult<()> {
        if self.max_ring_time_ms == 0 {
            return Err(DialerError::invalid_settings("max_ring_time_ms must be greater than 0"));
        }
        if self.working_hours_poll_secs == 0 {
            return Err(DialerError::invalid_settings(
                "working_hours_poll_secs must be greater than 0",
            ));
        }
        self.working_hours.resolve()?;
        Ok(())
    }

    pub fn wait_between_calls(&self) -> Duration {
        Duration::from_millis(self.wait_time_between_calls_ms)
    }

    pub fn max_ring_time(&self) -> Duration {
        Duration::from_millis(self.max_ring_time_ms)
    }

    pub fn working_hours_poll(&self) -> Duration {
        Duration::from_secs(self.working_hours_poll_secs)
    }

    /// Backoff used while waiting for the provider at start
    pub fn provider_ready_retry(&self) -> RetryConfig {
        RetryConfig::with_delays(
            self.provider_ready_retries,
            self.provider_ready_delay_ms,
            self.provider_ready_delay_ms.saturating_mul(8),
        )
    }
}

/// Builder for [`DialerSettings`]
#[derive(Debug, Default)]
pub struct DialerSettingsBuilder {
    settings: DialerSettings,
}

impl DialerSettingsBuilder {
    pub fn auto_dial_next(mut self, value: bool) -> Self {
        self.settings.auto_dial_next = value;
        self
    }

    pub fn wait_time_between_calls(mut self, wait: Duration) -> Self {
        self.settings.wait_time_between_calls_ms = wait.as_millis() as u64;
        self
    }

    pub fn max_ring_time(mut self, ring: Duration) -> Self {
        self.settings.max_ring_time_ms = ring.as_millis() as u64;
        self
    }

    pub fn skip_bad_numbers(mut self, value: bool) -> Self {
        self.settings.skip_bad_numbers = value;
        self
    }

    pub fn priority_mode(mut self, mode: PriorityMode) -> Self {
        self.settings.priority_mode = mode;
        self
    }

    /// Enable a working-hours window
    pub fn working_hours(
        mut self,
        start: impl Into<String>,
        end: impl Into<String>,
        timezone: impl Into<String>,
    ) -> Self {
        self.settings.working_hours = WorkingHoursConfig {
            enabled: true,
            start: start.into(),
            end: end.into(),
            timezone: timezone.into(),
        };
        self
    }

    pub fn call_recording(mut self, value: bool) -> Self {
        self.settings.call_recording = value;
        self
    }

    pub fn display_caller_id(mut self, mode: CallerIdMode) -> Self {
        self.settings.display_caller_id = mode;
        self
    }

    pub fn working_hours_poll(mut self, poll: Duration) -> Self {
        self.settings.working_hours_poll_secs = poll.as_secs();
        self
    }

    pub fn random_seed(mut self, seed: u64) -> Self {
        self.settings.random_seed = Some(seed);
        self
    }

    pub fn provider_ready_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.settings.provider_ready_retries = retries;
        self.settings.provider_ready_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Build and validate the settings
    pub fn build(self) -> DialerResult<DialerSettings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}
