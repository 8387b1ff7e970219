//! Campaign task
//!
//! One spawned task owns the queue, the stats and the active call. It waits on
//! operator commands, the active call's events, and three optional deadlines
//! (ring timeout, inter-call delay, working-hours re-check). Only one of those
//! is handled at a time, so every transition runs to completion before the
//! next one starts.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::error::{DialerError, DialerResult};
use super::handle::{CampaignHandle, Command};
use super::settings::{CallerIdMode, DialerSettings};
use super::state::{
    CampaignReport, DialerEvent, DialerSnapshot, DialerState, PauseReason, StopReason,
};
use crate::campaign::{CampaignQueue, StatsAggregator, WorkingHours, WorkingHoursGate};
use crate::carousel::NumberCarousel;
use crate::clock::Clock;
use crate::collaborators::{AttemptRecord, CoachingHook, CrmSink};
use crate::metrics;
use crate::models::{CallOutcome, CallTarget, Channel, CompletedCall, SkipReason};
use crate::telephony::{AnsweredBy, CallEvent, CallHandle, ConnectParams, TelephonyProvider};
use crate::throttle::ContactThrottle;

const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 256;

/// Shared components a campaign talks to
#[derive(Clone)]
pub(crate) struct DialerDeps {
    pub provider: Arc<dyn TelephonyProvider>,
    pub carousel: Arc<NumberCarousel>,
    pub throttle: Arc<ContactThrottle>,
    pub crm: Arc<dyn CrmSink>,
    pub coaching: Arc<dyn CoachingHook>,
    pub clock: Arc<dyn Clock>,
    pub alternate_caller_id: Option<String>,
}

/// Everything fixed at campaign start
pub(crate) struct CampaignSetup {
    pub campaign_id: String,
    pub agent_id: String,
    pub settings: DialerSettings,
    pub window: WorkingHours,
    pub queue: CampaignQueue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Dialing,
    Connected,
    WrappingUp,
}

/// One placed call, from dial to wrap-up
struct Attempt {
    target: CallTarget,
    caller_id: String,
    started_at: DateTime<Utc>,
    dialed_at: Instant,
    answered_by: Option<AnsweredBy>,
}

struct ActiveCall {
    attempt: Attempt,
    call: CallHandle,
    ring_deadline: Option<Instant>,
}

/// Deliver attempt records to the CRM off the campaign task
///
/// The writer drains what is queued and exits once the campaign drops its
/// sender.
fn spawn_crm_writer(crm: Arc<dyn CrmSink>) -> mpsc::UnboundedSender<AttemptRecord> {
    let (tx, mut rx) = mpsc::unbounded_channel::<AttemptRecord>();
    tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            let contact_id = record.contact_id.clone();
            if let Err(e) = crm.record_attempt(record).await {
                warn!(contact_id = %contact_id, error = %e, "CRM attempt record failed");
            }
        }
    });
    tx
}

/// Spawn the campaign task and return its handle
pub(crate) fn spawn(setup: CampaignSetup, deps: DialerDeps) -> CampaignHandle {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let (events, _) = broadcast::channel(EVENT_BUFFER);

    let crm = spawn_crm_writer(Arc::clone(&deps.crm));

    let started_at = deps.clock.now();
    let mut runner = CampaignRunner {
        campaign_id: setup.campaign_id.clone(),
        agent_id: setup.agent_id,
        settings: setup.settings,
        window: setup.window,
        queue: setup.queue,
        stats: StatsAggregator::new(Instant::now()),
        completed: Vec::new(),
        deps,
        crm,
        commands: command_rx,
        snapshot_tx: None,
        events: events.clone(),
        phase: Phase::Idle,
        pause: None,
        hours_override: false,
        stopping: false,
        active: None,
        next_dial_at: None,
        hours_check_at: None,
        finished: None,
        last_state: DialerState::Idle,
        started_at,
    };

    let (snapshot_tx, snapshot_rx) = watch::channel(runner.snapshot());
    runner.snapshot_tx = Some(snapshot_tx);

    let task = tokio::spawn(runner.run());
    CampaignHandle::new(setup.campaign_id, command_tx, snapshot_rx, events, task)
}

struct CampaignRunner {
    campaign_id: String,
    agent_id: String,
    settings: DialerSettings,
    window: WorkingHours,
    queue: CampaignQueue,
    stats: StatsAggregator,
    completed: Vec<CompletedCall>,
    deps: DialerDeps,
    /// Attempt records waiting for the CRM, in call order
    crm: mpsc::UnboundedSender<AttemptRecord>,
    commands: mpsc::Receiver<Command>,
    snapshot_tx: Option<watch::Sender<DialerSnapshot>>,
    events: broadcast::Sender<DialerEvent>,
    phase: Phase,
    pause: Option<PauseReason>,
    /// Operator resumed a working-hours pause; cleared once the window opens
    hours_override: bool,
    stopping: bool,
    active: Option<ActiveCall>,
    next_dial_at: Option<Instant>,
    hours_check_at: Option<Instant>,
    finished: Option<StopReason>,
    last_state: DialerState,
    started_at: DateTime<Utc>,
}

impl CampaignRunner {
    async fn run(mut self) -> CampaignReport {
        info!(
            campaign_id = %self.campaign_id,
            agent_id = %self.agent_id,
            targets = self.queue.len(),
            mode = %self.settings.priority_mode,
            "Campaign started"
        );
        metrics::campaign_started();

        if self.settings.auto_dial_next {
            self.advance().await;
        }
        self.publish();

        let stop_reason = loop {
            if let Some(reason) = self.finished {
                break reason;
            }

            let ring_deadline = self.active.as_ref().and_then(|a| a.ring_deadline);
            let next_dial_at = self.next_dial_at;
            let hours_check_at = self.hours_check_at;

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        info!(campaign_id = %self.campaign_id, "Campaign handle dropped, stopping");
                        self.shutdown(StopReason::HandleDropped).await;
                    }
                },
                event = next_call_event(&mut self.active) => self.on_call_event(event).await,
                _ = sleep_until_opt(ring_deadline) => self.on_ring_timeout().await,
                _ = sleep_until_opt(next_dial_at) => {
                    self.next_dial_at = None;
                    self.advance().await;
                }
                _ = sleep_until_opt(hours_check_at) => {
                    self.hours_check_at = None;
                    self.check_working_hours().await;
                }
            }

            self.publish();
        };

        metrics::campaign_finished();

        let stats = self.stats.snapshot();
        info!(
            campaign_id = %self.campaign_id,
            reason = ?stop_reason,
            total_calls = stats.total_calls,
            connected = stats.connected,
            "Campaign finished"
        );

        CampaignReport {
            campaign_id: self.campaign_id,
            agent_id: self.agent_id,
            stop_reason,
            stats,
            completed_calls: self.completed,
            targets: self.queue.targets().to_vec(),
            started_at: self.started_at,
            finished_at: self.deps.clock.now(),
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Pause(reply) => {
                self.pause_by_operator();
                let _ = reply.send(Ok(()));
            }
            Command::Resume(reply) => {
                self.resume().await;
                let _ = reply.send(Ok(()));
            }
            Command::Stop(reply) => {
                self.shutdown(StopReason::Operator).await;
                let _ = reply.send(Ok(()));
            }
            Command::Skip(reply) => {
                let result = self.skip().await;
                let _ = reply.send(result);
            }
            Command::DialNext(reply) => {
                let result = self.try_dial_next().await;
                let _ = reply.send(result);
            }
        }
    }

    fn pause_by_operator(&mut self) {
        if self.pause == Some(PauseReason::Operator) {
            return;
        }
        self.pause = Some(PauseReason::Operator);
        self.hours_override = false;
        self.next_dial_at = None;
        self.hours_check_at = None;

        info!(campaign_id = %self.campaign_id, "Campaign paused by operator");
        self.emit(DialerEvent::Paused {
            reason: PauseReason::Operator,
        });
        self.sync_state();
    }

    async fn resume(&mut self) {
        let Some(reason) = self.pause.take() else {
            return;
        };
        self.hours_check_at = None;
        if reason == PauseReason::OutsideWorkingHours {
            self.hours_override = true;
        }

        info!(campaign_id = %self.campaign_id, was = %reason, "Campaign resumed");
        self.emit(DialerEvent::Resumed);
        self.sync_state();

        if self.settings.auto_dial_next && self.active.is_none() {
            self.advance().await;
        }
    }

    async fn skip(&mut self) -> DialerResult<()> {
        let Some(active) = &self.active else {
            return Err(DialerError::NoActiveCall);
        };
        info!(
            campaign_id = %self.campaign_id,
            target_id = %active.attempt.target.id,
            "Skipping active call"
        );
        self.end_active(CallOutcome::Skipped, true).await;
        Ok(())
    }

    async fn shutdown(&mut self, reason: StopReason) {
        if self.finished.is_some() {
            return;
        }
        self.stopping = true;
        self.next_dial_at = None;
        self.hours_check_at = None;

        // Only this campaign's call; the provider may be shared by other agents
        self.end_active(CallOutcome::Skipped, true).await;
        self.finish(reason);
    }

    // ========================================================================
    // Advancing
    // ========================================================================

    /// Automatic advance; a no-op when the line is busy or dialing is paused
    async fn advance(&mut self) {
        if let Err(e) = self.try_dial_next().await {
            debug!(campaign_id = %self.campaign_id, reason = %e, "Advance skipped");
        }
    }

    async fn try_dial_next(&mut self) -> DialerResult<()> {
        if self.finished.is_some() || self.stopping {
            return Err(DialerError::CampaignEnded);
        }
        if self.active.is_some() || self.queue.dialing_count() > 0 {
            return Err(DialerError::CallInProgress);
        }
        if self.pause.is_some() {
            return Err(DialerError::Paused);
        }
        self.dial_next().await;
        Ok(())
    }

    async fn dial_next(&mut self) {
        self.next_dial_at = None;

        loop {
            let Some(target) = self.queue.next_pending().cloned() else {
                self.finish(StopReason::QueueExhausted);
                return;
            };

            let now = self.deps.clock.now();
            if WorkingHoursGate::is_open(now, &self.window) {
                self.hours_override = false;
            } else if !self.hours_override {
                self.pause_for_working_hours(now);
                return;
            }

            let claim = self
                .deps
                .throttle
                .try_claim(&target.id, Channel::Voice, now, Some(self.agent_id.as_str()))
                .await;

            match claim {
                Ok(true) => {
                    self.place_call(target, now).await;
                    return;
                }
                Ok(false) => self.skip_target(&target.id, SkipReason::RecentlyContacted),
                Err(e) => {
                    warn!(
                        campaign_id = %self.campaign_id,
                        target_id = %target.id,
                        error = %e,
                        "Throttle store unavailable, skipping target"
                    );
                    self.skip_target(&target.id, SkipReason::ThrottleUnavailable);
                }
            }
        }
    }

    fn skip_target(&mut self, target_id: &str, reason: SkipReason) {
        if let Err(e) = self.queue.mark_skipped(target_id, reason) {
            warn!(target_id, error = %e, "Could not skip target");
            return;
        }
        info!(campaign_id = %self.campaign_id, target_id, reason = %reason, "Target skipped");
        metrics::record_target_skipped(reason);
        self.emit(DialerEvent::TargetSkipped {
            target_id: target_id.to_string(),
            reason,
        });
    }

    fn pause_for_working_hours(&mut self, now: DateTime<Utc>) {
        let opens_in = WorkingHoursGate::until_open(now, &self.window);
        info!(
            campaign_id = %self.campaign_id,
            opens_in_minutes = opens_in.num_minutes(),
            "Outside working hours, pausing"
        );

        self.pause = Some(PauseReason::OutsideWorkingHours);
        self.hours_check_at = Some(Instant::now() + self.settings.working_hours_poll());
        self.emit(DialerEvent::Paused {
            reason: PauseReason::OutsideWorkingHours,
        });
        self.sync_state();
    }

    async fn check_working_hours(&mut self) {
        if self.pause != Some(PauseReason::OutsideWorkingHours) {
            return;
        }

        if !WorkingHoursGate::is_open(self.deps.clock.now(), &self.window) {
            debug!(campaign_id = %self.campaign_id, "Still outside working hours");
            self.hours_check_at = Some(Instant::now() + self.settings.working_hours_poll());
            return;
        }

        info!(campaign_id = %self.campaign_id, "Working hours open, resuming");
        self.pause = None;
        self.emit(DialerEvent::Resumed);
        self.sync_state();

        if self.settings.auto_dial_next {
            self.advance().await;
        }
    }

    // ========================================================================
    // Calls
    // ========================================================================

    async fn place_call(&mut self, target: CallTarget, now: DateTime<Utc>) {
        let target = match self.queue.mark_dialing(&target.id, now) {
            Ok(target) => target.clone(),
            Err(e) => {
                warn!(target_id = %target.id, error = %e, "Cannot dial target");
                return;
            }
        };
        self.set_phase(Phase::Dialing);

        let caller_id = self.resolve_caller_id().await;
        info!(
            campaign_id = %self.campaign_id,
            target_id = %target.id,
            phone = %target.phone,
            caller_id = %caller_id,
            attempt = target.attempts,
            "Dialing"
        );
        metrics::record_dial(&self.agent_id);
        self.emit(DialerEvent::Dialing {
            target_id: target.id.clone(),
            phone: target.phone.clone(),
            caller_id: caller_id.clone(),
            attempt: target.attempts,
        });

        let params = ConnectParams {
            to: target.phone.clone(),
            caller_id: caller_id.clone(),
            record: self.settings.call_recording,
        };
        let dialed_at = Instant::now();
        let attempt = Attempt {
            target,
            caller_id,
            started_at: now,
            dialed_at,
            answered_by: None,
        };

        match self.deps.provider.connect(params).await {
            Ok(call) => {
                debug!(
                    call_id = %call.call_id,
                    ring_timeout_ms = self.settings.max_ring_time_ms,
                    "Ring timer armed"
                );
                self.active = Some(ActiveCall {
                    attempt,
                    call,
                    ring_deadline: Some(dialed_at + self.settings.max_ring_time()),
                });
            }
            Err(e) => {
                warn!(
                    campaign_id = %self.campaign_id,
                    target_id = %attempt.target.id,
                    provider = self.deps.provider.name(),
                    error = %e,
                    "Connect failed"
                );
                self.conclude(attempt, CallOutcome::Failed).await;
            }
        }
    }

    async fn resolve_caller_id(&self) -> String {
        if self.settings.display_caller_id == CallerIdMode::Alternate {
            if let Some(alternate) = &self.deps.alternate_caller_id {
                return alternate.clone();
            }
        }

        match self.deps.carousel.select_for_agent(&self.agent_id).await {
            Ok(selection) => {
                metrics::record_caller_id(selection.source);
                selection.identifier
            }
            Err(e) => {
                warn!(error = %e, "Caller ID selection failed, using default");
                self.deps.carousel.default_identifier().to_string()
            }
        }
    }

    async fn on_call_event(&mut self, event: CallEvent) {
        match event {
            CallEvent::Accept { answered_by } => self.on_answer(answered_by),
            CallEvent::Disconnect => self.end_active(CallOutcome::NoAnswer, false).await,
            CallEvent::Error { message } => {
                warn!(campaign_id = %self.campaign_id, error = %message, "Call error");
                self.end_active(CallOutcome::Failed, false).await;
            }
        }
    }

    fn on_answer(&mut self, answered_by: AnsweredBy) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.attempt.answered_by.is_some() {
            return;
        }
        active.ring_deadline = None;
        active.attempt.answered_by = Some(answered_by);
        let target = active.attempt.target.clone();

        self.stats
            .record_outcome(answered_outcome(answered_by), Instant::now());
        self.set_phase(Phase::Connected);

        info!(
            campaign_id = %self.campaign_id,
            target_id = %target.id,
            answered_by = %answered_by,
            "Call answered"
        );
        self.emit(DialerEvent::Answered {
            target_id: target.id.clone(),
            answered_by,
        });

        if answered_by == AnsweredBy::Human {
            let coaching = Arc::clone(&self.deps.coaching);
            tokio::spawn(async move { coaching.start_listening(target).await });
        }
    }

    async fn on_ring_timeout(&mut self) {
        if let Some(active) = &self.active {
            info!(
                campaign_id = %self.campaign_id,
                target_id = %active.attempt.target.id,
                ring_timeout_ms = self.settings.max_ring_time_ms,
                "Ring timeout"
            );
        }
        self.end_active(CallOutcome::NoAnswer, true).await;
    }

    /// End the active call; an answered call keeps its answered outcome
    async fn end_active(&mut self, unanswered: CallOutcome, hang_up: bool) {
        let Some(ActiveCall { attempt, call, .. }) = self.active.take() else {
            return;
        };

        if hang_up {
            if let Err(e) = self.deps.provider.disconnect(&call.call_id).await {
                debug!(call_id = %call.call_id, error = %e, "Disconnect failed");
            }
        }
        drop(call);

        let outcome = attempt.answered_by.map(answered_outcome).unwrap_or(unanswered);
        self.conclude(attempt, outcome).await;
    }

    async fn conclude(&mut self, attempt: Attempt, outcome: CallOutcome) {
        self.set_phase(Phase::WrappingUp);

        let now = Instant::now();
        let duration = now.saturating_duration_since(attempt.dialed_at);
        let ended_at = self.deps.clock.now();

        // Answered calls were counted when they were picked up
        match attempt.answered_by {
            None => self.stats.record_outcome(outcome, now),
            Some(AnsweredBy::Human) => self.stats.record_duration(duration, now),
            Some(AnsweredBy::Machine) => {}
        }

        let target = attempt.target;
        if let Err(e) = self.queue.mark_outcome(&target.id, outcome) {
            warn!(target_id = %target.id, error = %e, "Could not record outcome");
        }

        self.completed.push(CompletedCall {
            target_id: target.id.clone(),
            name: target.name.clone(),
            phone: target.phone.clone(),
            caller_id: attempt.caller_id,
            outcome,
            duration_secs: duration.as_secs_f64(),
            started_at: attempt.started_at,
            ended_at,
        });

        let record = AttemptRecord {
            contact_id: target.id.clone(),
            outcome,
            duration_seconds: duration.as_secs_f64(),
            timestamp: ended_at,
        };
        if self.crm.send(record).is_err() {
            warn!(target_id = %target.id, "CRM writer gone, attempt record dropped");
        }

        if attempt.answered_by == Some(AnsweredBy::Human) {
            let coaching = Arc::clone(&self.deps.coaching);
            tokio::spawn(async move { coaching.stop_listening().await });
        }

        metrics::record_call_outcome(outcome, duration.as_secs_f64());
        info!(
            campaign_id = %self.campaign_id,
            target_id = %target.id,
            outcome = %outcome,
            duration_secs = duration.as_secs_f64(),
            "Call ended"
        );
        self.emit(DialerEvent::CallEnded {
            target_id: target.id,
            outcome,
            duration_secs: duration.as_secs_f64(),
        });
        self.set_phase(Phase::Idle);

        if self.stopping {
            return;
        }
        if !self.queue.has_pending() {
            self.finish(StopReason::QueueExhausted);
            return;
        }
        if self.settings.auto_dial_next && self.pause.is_none() {
            let wait = self.settings.wait_between_calls();
            debug!(campaign_id = %self.campaign_id, wait_ms = wait.as_millis() as u64, "Next dial scheduled");
            self.next_dial_at = Some(now + wait);
        }
    }

    // ========================================================================
    // State publication
    // ========================================================================

    fn finish(&mut self, reason: StopReason) {
        if self.finished.is_some() {
            return;
        }
        self.finished = Some(reason);
        self.next_dial_at = None;
        self.hours_check_at = None;

        self.sync_state();
        self.emit(DialerEvent::CampaignFinished { reason });
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.sync_state();
    }

    fn state(&self) -> DialerState {
        if self.finished.is_some() {
            return DialerState::Stopped;
        }
        match (self.phase, self.pause) {
            (Phase::Idle, Some(reason)) => DialerState::Paused(reason),
            (Phase::Idle, None) => DialerState::Idle,
            (Phase::Dialing, _) => DialerState::Dialing,
            (Phase::Connected, _) => DialerState::Connected,
            (Phase::WrappingUp, _) => DialerState::WrappingUp,
        }
    }

    fn sync_state(&mut self) {
        let state = self.state();
        if state != self.last_state {
            debug!(campaign_id = %self.campaign_id, from = %self.last_state, to = %state, "State changed");
            self.last_state = state;
            self.emit(DialerEvent::StateChanged { state });
        }
    }

    fn emit(&self, event: DialerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn snapshot(&self) -> DialerSnapshot {
        DialerSnapshot {
            campaign_id: self.campaign_id.clone(),
            state: self.state(),
            paused: self.pause,
            current: self.queue.dialing().cloned(),
            queue: self.queue.targets().to_vec(),
            stats: self.stats.snapshot(),
            completed_calls: self.completed.clone(),
        }
    }

    fn publish(&self) {
        if let Some(tx) = &self.snapshot_tx {
            tx.send_replace(self.snapshot());
        }
    }
}

fn answered_outcome(answered_by: AnsweredBy) -> CallOutcome {
    match answered_by {
        AnsweredBy::Human => CallOutcome::Connected,
        AnsweredBy::Machine => CallOutcome::Voicemail,
    }
}

/// Next event of the active call; pending forever when there is none
async fn next_call_event(active: &mut Option<ActiveCall>) -> CallEvent {
    match active {
        // A dropped channel means the provider lost the call
        Some(active) => active
            .call
            .next_event()
            .await
            .unwrap_or(CallEvent::Disconnect),
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
