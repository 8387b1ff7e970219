//! External collaborators the dialer reports to
//!
//! The CRM persists one [`AttemptRecord`] per placed call. The coaching hook is
//! told when a live conversation starts and ends; it is fire-and-forget and its
//! failures never reach the dialer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::models::{CallOutcome, CallTarget};

/// Per-attempt record handed to the CRM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub contact_id: String,
    pub outcome: CallOutcome,
    pub duration_seconds: f64,
    pub timestamp: DateTime<Utc>,
}

/// Receives completed call attempts for persistence
#[async_trait]
pub trait CrmSink: Send + Sync {
    async fn record_attempt(&self, record: AttemptRecord) -> anyhow::Result<()>;
}

/// Live-call coaching
#[async_trait]
pub trait CoachingHook: Send + Sync {
    async fn start_listening(&self, target: CallTarget);
    async fn stop_listening(&self);
}

/// CRM sink that drops every record
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCrm;

#[async_trait]
impl CrmSink for NoopCrm {
    async fn record_attempt(&self, _record: AttemptRecord) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Coaching hook that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCoaching;

#[async_trait]
impl CoachingHook for NoopCoaching {
    async fn start_listening(&self, _target: CallTarget) {}
    async fn stop_listening(&self) {}
}

/// CRM sink that keeps records in memory
#[derive(Debug, Default)]
pub struct RecordingCrm {
    records: Mutex<Vec<AttemptRecord>>,
}

impl RecordingCrm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AttemptRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl CrmSink for RecordingCrm {
    async fn record_attempt(&self, record: AttemptRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
        Ok(())
    }
}

/// Coaching hook that logs which contact it would be listening to
#[derive(Debug, Default)]
pub struct RecordingCoaching {
    sessions: Mutex<Vec<String>>,
    stops: Mutex<usize>,
}

impl RecordingCoaching {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contact IDs coaching started for
    pub fn sessions(&self) -> Vec<String> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn stop_count(&self) -> usize {
        *self.stops.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CoachingHook for RecordingCoaching {
    async fn start_listening(&self, target: CallTarget) {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(target.id);
    }

    async fn stop_listening(&self) {
        *self.stops.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }
}
