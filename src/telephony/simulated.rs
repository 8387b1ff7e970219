//! In-process telephony provider driven by per-number scripts
//!
//! Used by the CLI `run` command and the test suite. Every call runs as a
//! spawned task that replays its script on tokio time, so paused-clock tests
//! can step through ring timeouts and talk time instantly.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::{
    call_channel, AnsweredBy, CallEvent, CallHandle, ConnectParams, TelephonyError,
    TelephonyProvider, TelephonyResult,
};

/// How a simulated callee behaves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallScript {
    /// Pick up after `after`, hang up after `talk`
    Answer {
        after: Duration,
        talk: Duration,
        answered_by: AnsweredBy,
    },
    /// Ring until the caller gives up
    NoAnswer,
    /// Reject the call after `after` without answering
    Reject { after: Duration },
    /// Carrier error after `after`
    Fail { after: Duration, message: String },
    /// `connect` itself fails
    ConnectError(String),
}

impl CallScript {
    /// Human pickup after `after`, talking for `talk`
    pub fn answer(after: Duration, talk: Duration) -> Self {
        Self::Answer {
            after,
            talk,
            answered_by: AnsweredBy::Human,
        }
    }

    /// Answering machine pickup
    pub fn voicemail(after: Duration, talk: Duration) -> Self {
        Self::Answer {
            after,
            talk,
            answered_by: AnsweredBy::Machine,
        }
    }
}

impl Default for CallScript {
    fn default() -> Self {
        Self::answer(Duration::from_secs(5), Duration::from_secs(60))
    }
}

/// Scripted provider for demos and tests
#[derive(Debug)]
pub struct SimulatedProvider {
    ready: AtomicBool,
    default_script: CallScript,
    scripts: Mutex<HashMap<String, CallScript>>,
    calls: Mutex<HashMap<String, JoinHandle<()>>>,
    placed: Mutex<Vec<ConnectParams>>,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(true),
            default_script: CallScript::default(),
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            placed: Mutex::new(Vec::new()),
        }
    }

    /// Script used for numbers without their own script
    pub fn with_default_script(mut self, script: CallScript) -> Self {
        self.default_script = script;
        self
    }

    /// Script for one callee number
    pub fn with_script(self, phone: impl Into<String>, script: CallScript) -> Self {
        self.set_script(phone, script);
        self
    }

    /// Start with the device uninitialized
    pub fn not_ready(self) -> Self {
        self.set_ready(false);
        self
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_script(&self, phone: impl Into<String>, script: CallScript) {
        lock(&self.scripts).insert(phone.into(), script);
    }

    /// Every `connect` request received, in order
    pub fn placed_calls(&self) -> Vec<ConnectParams> {
        lock(&self.placed).clone()
    }

    /// Calls whose scripts are still running
    pub fn active_calls(&self) -> usize {
        lock(&self.calls).values().filter(|h| !h.is_finished()).count()
    }

    fn script_for(&self, phone: &str) -> CallScript {
        lock(&self.scripts)
            .get(phone)
            .cloned()
            .unwrap_or_else(|| self.default_script.clone())
    }
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl TelephonyProvider for SimulatedProvider {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn connect(&self, params: ConnectParams) -> TelephonyResult<CallHandle> {
        if !self.is_ready().await {
            return Err(TelephonyError::NotReady(self.name().to_string()));
        }

        lock(&self.placed).push(params.clone());
        let script = self.script_for(&params.to);

        if let CallScript::ConnectError(reason) = script {
            return Err(TelephonyError::ConnectFailed {
                to: params.to,
                reason,
            });
        }

        let call_id = uuid::Uuid::new_v4().to_string();
        let (tx, handle) = call_channel(call_id.clone());

        tracing::debug!(call_id = %call_id, to = %params.to, ?script, "Simulated call placed");

        let task = tokio::spawn(async move {
            match script {
                CallScript::Answer {
                    after,
                    talk,
                    answered_by,
                } => {
                    tokio::time::sleep(after).await;
                    let _ = tx.send(CallEvent::Accept { answered_by });
                    tokio::time::sleep(talk).await;
                    let _ = tx.send(CallEvent::Disconnect);
                }
                CallScript::NoAnswer => {
                    std::future::pending::<()>().await;
                }
                CallScript::Reject { after } => {
                    tokio::time::sleep(after).await;
                    let _ = tx.send(CallEvent::Disconnect);
                }
                CallScript::Fail { after, message } => {
                    tokio::time::sleep(after).await;
                    let _ = tx.send(CallEvent::Error { message });
                }
                CallScript::ConnectError(_) => {}
            }
            // Keep the channel open so the dialer decides when the call is over
            tx.closed().await;
        });

        let mut calls = lock(&self.calls);
        calls.retain(|_, h| !h.is_finished());
        calls.insert(call_id, task);

        Ok(handle)
    }

    async fn disconnect(&self, call_id: &str) -> TelephonyResult<()> {
        match lock(&self.calls).remove(call_id) {
            Some(task) => {
                task.abort();
                tracing::debug!(call_id, "Simulated call disconnected");
                Ok(())
            }
            None => Err(TelephonyError::UnknownCall(call_id.to_string())),
        }
    }

    async fn disconnect_all(&self) {
        let calls: Vec<_> = lock(&self.calls).drain().collect();
        for (_, task) in calls {
            task.abort();
        }
    }
}
