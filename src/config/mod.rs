//! Configuration management for the powerdial dialer
//!
//! Configuration comes from a TOML file, from `POWERDIAL_*` environment
//! variables, or both (file first, then environment overrides).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::carousel::{CarouselNumber, NumberCarousel};
use crate::dialer::{CallerIdMode, DialerSettings};
use crate::store::{KeyValueStore, MemoryStore, StoreResult};
use crate::throttle::{ContactThrottle, ThrottleRecord, ThrottleWindows, TEXT_WINDOW_DAYS, VOICE_WINDOW_DAYS};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Agent placing the calls
    pub agent: AgentConfig,

    /// Campaign settings
    pub dialer: DialerSettings,

    /// Contact-frequency throttle
    pub throttle: ThrottleConfig,

    /// Caller-ID carousel
    pub carousel: CarouselConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Agent identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub id: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: String::from("agent-1"),
        }
    }
}

/// Throttle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Voice cool-down in days
    pub voice_window_days: i64,

    /// Text cool-down in days
    pub text_window_days: i64,

    /// JSON file holding contact history; in-memory when unset
    pub store_path: Option<PathBuf>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            voice_window_days: VOICE_WINDOW_DAYS,
            text_window_days: TEXT_WINDOW_DAYS,
            store_path: None,
        }
    }
}

impl ThrottleConfig {
    pub fn windows(&self) -> ThrottleWindows {
        ThrottleWindows::from_days(self.voice_window_days, self.text_window_days)
    }

    /// Open the throttle, loading history from `store_path` if set
    pub async fn open(&self) -> StoreResult<ContactThrottle> {
        let store: Arc<dyn KeyValueStore<ThrottleRecord>> = match &self.store_path {
            Some(path) => Arc::new(MemoryStore::<ThrottleRecord>::open(path).await?),
            None => Arc::new(MemoryStore::<ThrottleRecord>::new()),
        };
        Ok(ContactThrottle::new(store, self.windows()))
    }
}

/// Caller-ID carousel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CarouselConfig {
    /// Shared pool, added on open if missing from the store
    pub numbers: Vec<String>,

    /// Used when the pool is empty
    pub default_identifier: String,

    /// Presented in `alternate` caller-ID mode
    pub alternate_identifier: Option<String>,

    /// JSON file holding pool usage; in-memory when unset
    pub store_path: Option<PathBuf>,

    /// Agent ID to pinned personal number
    pub personal: HashMap<String, String>,
}

impl Default for CarouselConfig {
    fn default() -> Self {
        Self {
            numbers: Vec::new(),
            default_identifier: String::from("+15550000000"),
            alternate_identifier: None,
            store_path: None,
            personal: HashMap::new(),
        }
    }
}

impl CarouselConfig {
    /// Open the carousel, restoring usage history and applying pins
    pub async fn open(&self) -> StoreResult<NumberCarousel> {
        let store: Arc<dyn KeyValueStore<CarouselNumber>> = match &self.store_path {
            Some(path) => Arc::new(MemoryStore::<CarouselNumber>::open(path).await?),
            None => Arc::new(MemoryStore::<CarouselNumber>::new()),
        };

        let carousel = NumberCarousel::new(store, self.default_identifier.clone());
        for number in &self.numbers {
            carousel.add_number(number.clone()).await?;
        }
        for (agent, number) in &self.personal {
            carousel.assign_personal(agent.clone(), number.clone()).await;
        }
        Ok(carousel)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl LoggingConfig {
    /// `EnvFilter` directive for this crate at the configured level
    ///
    /// `verbose` raises the crate level to debug; other crates log warnings.
    pub fn filter_directive(&self, verbose: bool) -> String {
        let level = if verbose { "debug" } else { self.level.as_str() };
        format!("powerdial={level},warn")
    }

    /// Whether records should be emitted as JSON
    pub fn is_json(&self) -> bool {
        self.format == "json"
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_var(key).and_then(|v| v.trim().parse().ok())
}

impl Config {
    /// Load configuration from environment variables over the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Override fields from `POWERDIAL_*` environment variables
    ///
    /// Unparseable values are ignored.
    pub fn apply_env(&mut self) {
        if let Some(id) = env_var("POWERDIAL_AGENT_ID") {
            self.agent.id = id;
        }

        let dialer = &mut self.dialer;
        if let Some(v) = env_parse("POWERDIAL_AUTO_DIAL_NEXT") {
            dialer.auto_dial_next = v;
        }
        if let Some(v) = env_parse("POWERDIAL_WAIT_BETWEEN_CALLS_MS") {
            dialer.wait_time_between_calls_ms = v;
        }
        if let Some(v) = env_parse("POWERDIAL_MAX_RING_TIME_MS") {
            dialer.max_ring_time_ms = v;
        }
        if let Some(v) = env_parse("POWERDIAL_SKIP_BAD_NUMBERS") {
            dialer.skip_bad_numbers = v;
        }
        if let Some(v) = env_parse("POWERDIAL_PRIORITY_MODE") {
            dialer.priority_mode = v;
        }
        if let Some(v) = env_parse("POWERDIAL_CALL_RECORDING") {
            dialer.call_recording = v;
        }
        if let Some(v) = env_parse::<CallerIdMode>("POWERDIAL_CALLER_ID_MODE") {
            dialer.display_caller_id = v;
        }
        if let Some(v) = env_parse("POWERDIAL_WORKING_HOURS_ENABLED") {
            dialer.working_hours.enabled = v;
        }
        if let Some(v) = env_var("POWERDIAL_WORKING_HOURS_START") {
            dialer.working_hours.start = v;
        }
        if let Some(v) = env_var("POWERDIAL_WORKING_HOURS_END") {
            dialer.working_hours.end = v;
        }
        if let Some(v) = env_var("POWERDIAL_WORKING_HOURS_TZ") {
            dialer.working_hours.timezone = v;
        }

        if let Some(v) = env_parse("POWERDIAL_VOICE_WINDOW_DAYS") {
            self.throttle.voice_window_days = v;
        }
        if let Some(v) = env_parse("POWERDIAL_TEXT_WINDOW_DAYS") {
            self.throttle.text_window_days = v;
        }
        if let Some(v) = env_var("POWERDIAL_THROTTLE_STORE") {
            self.throttle.store_path = Some(v.into());
        }

        if let Some(v) = env_var("POWERDIAL_CAROUSEL_NUMBERS") {
            self.carousel.numbers = v
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = env_var("POWERDIAL_DEFAULT_CALLER_ID") {
            self.carousel.default_identifier = v;
        }
        if let Some(v) = env_var("POWERDIAL_ALTERNATE_CALLER_ID") {
            self.carousel.alternate_identifier = Some(v);
        }
        if let Some(v) = env_var("POWERDIAL_CAROUSEL_STORE") {
            self.carousel.store_path = Some(v.into());
        }

        if let Some(v) = env_var("POWERDIAL_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env_var("POWERDIAL_LOG_FORMAT") {
            self.logging.format = v;
        }
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.agent.id.trim().is_empty() {
            anyhow::bail!("agent.id must not be empty");
        }

        self.dialer
            .validate()
            .map_err(|e| anyhow::anyhow!("dialer: {e}"))?;

        if self.throttle.voice_window_days < 0 || self.throttle.text_window_days < 0 {
            anyhow::bail!("throttle windows must not be negative");
        }

        if self.carousel.default_identifier.trim().is_empty() {
            anyhow::bail!("carousel.default_identifier must not be empty");
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "logging.level must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.logging.level
            );
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!(
                "logging.format must be 'text' or 'json', got '{}'",
                self.logging.format
            );
        }

        Ok(())
    }
}
