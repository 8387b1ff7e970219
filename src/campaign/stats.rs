//! Running campaign metrics

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::models::CallOutcome;

/// Snapshot of campaign counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignStats {
    pub total_calls: u64,
    pub connected: u64,
    pub voicemails: u64,
    pub no_answer: u64,
    pub failed: u64,
    /// Mean talk time of connected calls, in seconds
    pub avg_call_duration_secs: f64,
    pub calls_per_hour: f64,
}

impl CampaignStats {
    /// `connected / total_calls`, zero before the first call
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.connected as f64 / self.total_calls as f64
        }
    }

    /// Outcome counters add up to the call total
    pub fn is_consistent(&self) -> bool {
        self.total_calls == self.connected + self.voicemails + self.no_answer + self.failed
    }
}

/// Accumulates outcomes for one campaign run
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    started: Instant,
    stats: CampaignStats,
    timed_calls: u64,
}

impl StatsAggregator {
    /// Start counting from `started`
    pub fn new(started: Instant) -> Self {
        Self {
            started,
            stats: CampaignStats::default(),
            timed_calls: 0,
        }
    }

    /// Count one placed call
    ///
    /// Skipped calls were placed and cancelled, so they count as failed.
    pub fn record_outcome(&mut self, outcome: CallOutcome, now: Instant) {
        let stats = &mut self.stats;
        stats.total_calls += 1;
        match outcome {
            CallOutcome::Connected => stats.connected += 1,
            CallOutcome::Voicemail => stats.voicemails += 1,
            CallOutcome::NoAnswer => stats.no_answer += 1,
            CallOutcome::Failed | CallOutcome::Skipped => stats.failed += 1,
        }
        self.refresh_rate(now);
    }

    /// Fold the talk time of a finished connected call into the mean
    pub fn record_duration(&mut self, duration: Duration, now: Instant) {
        self.timed_calls += 1;
        let n = self.timed_calls as f64;
        let mean = self.stats.avg_call_duration_secs;
        self.stats.avg_call_duration_secs = mean + (duration.as_secs_f64() - mean) / n;
        self.refresh_rate(now);
    }

    fn refresh_rate(&mut self, now: Instant) {
        let hours = now.saturating_duration_since(self.started).as_secs_f64() / 3600.0;
        self.stats.calls_per_hour = if hours > 0.0 {
            self.stats.total_calls as f64 / hours
        } else {
            0.0
        };
    }

    pub fn snapshot(&self) -> CampaignStats {
        self.stats.clone()
    }

    pub fn started(&self) -> Instant {
        self.started
    }
}
