//! End-to-end campaign tests against the simulated provider
//!
//! Every test runs on a paused tokio clock, so ring timeouts and inter-call
//! delays elapse instantly and deterministically.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use powerdial::clock::ManualClock;
use powerdial::collaborators::{AttemptRecord, RecordingCoaching, RecordingCrm};
use powerdial::models::{read_contacts, SkipReason};
use powerdial::store::{KeyValueStore, StoreError, StoreResult};
use powerdial::throttle::ThrottleWindows;
use powerdial::prelude::*;

// ============================================================================
// Helpers
// ============================================================================

const POOL_A: &str = "+15559001";
const POOL_B: &str = "+15559002";
const FALLBACK: &str = "+15559000";

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, hour, minute, 0).unwrap()
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn contact(id: &str, phone: &str) -> Contact {
    Contact::new(id, format!("Contact {id}"), phone)
}

fn three_contacts() -> Vec<Contact> {
    vec![
        contact("c1", "+15550101"),
        contact("c2", "+15550102"),
        contact("c3", "+15550103"),
    ]
}

fn quick_answer() -> CallScript {
    CallScript::answer(secs(2), secs(10))
}

fn settings() -> powerdial::dialer::DialerSettingsBuilder {
    DialerSettings::builder()
        .wait_time_between_calls(secs(3))
        .max_ring_time(secs(30))
}

struct Rig {
    provider: Arc<SimulatedProvider>,
    carousel: Arc<NumberCarousel>,
    throttle: Arc<ContactThrottle>,
    clock: Arc<ManualClock>,
    crm: Arc<RecordingCrm>,
    coaching: Arc<RecordingCoaching>,
}

impl Rig {
    async fn new(provider: SimulatedProvider) -> Self {
        let clock = Arc::new(ManualClock::new(at(14, 0)));
        let carousel = NumberCarousel::with_numbers([POOL_A, POOL_B], FALLBACK)
            .await
            .unwrap()
            .with_clock(clock.clone());

        Self {
            provider: Arc::new(provider),
            carousel: Arc::new(carousel),
            throttle: Arc::new(ContactThrottle::in_memory()),
            clock,
            crm: Arc::new(RecordingCrm::new()),
            coaching: Arc::new(RecordingCoaching::new()),
        }
    }

    fn dialer(&self) -> Dialer {
        Dialer::new(
            "agent-7",
            self.provider.clone(),
            self.carousel.clone(),
            self.throttle.clone(),
        )
        .with_crm(self.crm.clone())
        .with_coaching(self.coaching.clone())
        .with_clock(self.clock.clone())
    }
}

/// Store whose backing medium is gone
struct BrokenStore;

fn store_offline() -> StoreError {
    StoreError::Io {
        path: PathBuf::from("/var/lib/powerdial/state.json"),
        source: std::io::Error::other("disk offline"),
    }
}

#[async_trait]
impl<V> KeyValueStore<V> for BrokenStore
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, _key: &str) -> StoreResult<Option<V>> {
        Err(store_offline())
    }

    async fn set(&self, _key: &str, _value: V) -> StoreResult<()> {
        Err(store_offline())
    }

    async fn remove(&self, _key: &str) -> StoreResult<Option<V>> {
        Err(store_offline())
    }

    async fn entries(&self) -> StoreResult<Vec<(String, V)>> {
        Err(store_offline())
    }
}

/// CRM that takes two minutes per write
struct SlowCrm;

#[async_trait]
impl CrmSink for SlowCrm {
    async fn record_attempt(&self, _record: AttemptRecord) -> anyhow::Result<()> {
        tokio::time::sleep(secs(120)).await;
        Ok(())
    }
}

/// Record every event with the (virtual) time it was received
async fn record_events(mut rx: broadcast::Receiver<DialerEvent>) -> Vec<(Instant, DialerEvent)> {
    let mut events = Vec::new();
    loop {
        match rx.recv().await {
            Ok(event) => {
                let done = matches!(event, DialerEvent::CampaignFinished { .. });
                events.push((Instant::now(), event));
                if done {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    events
}

/// Wait for the first event matching `pred`
async fn next_matching(
    rx: &mut broadcast::Receiver<DialerEvent>,
    pred: impl Fn(&DialerEvent) -> bool,
) -> DialerEvent {
    loop {
        let event = rx.recv().await.expect("campaign event stream closed");
        if pred(&event) {
            return event;
        }
    }
}

fn is_dialing(id: &'static str) -> impl Fn(&DialerEvent) -> bool {
    move |e| matches!(e, DialerEvent::Dialing { target_id, .. } if target_id == id)
}

fn is_call_ended(id: &'static str) -> impl Fn(&DialerEvent) -> bool {
    move |e| matches!(e, DialerEvent::CallEnded { target_id, .. } if target_id == id)
}

fn is_answered(e: &DialerEvent) -> bool {
    matches!(e, DialerEvent::Answered { .. })
}

// ============================================================================
// Queue Ordering
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_priority_mode_dials_highest_first() {
    let rig = Rig::new(SimulatedProvider::new().with_default_script(quick_answer())).await;
    let contacts = vec![
        contact("low", "+15550101").with_priority(30),
        contact("high", "+15550102").with_priority(90),
        contact("mid", "+15550103").with_priority(60),
    ];

    let campaign = rig
        .dialer()
        .start(
            &contacts,
            settings().priority_mode(PriorityMode::Priority).build().unwrap(),
        )
        .await
        .unwrap();
    let report = campaign.wait().await.unwrap();

    assert_eq!(report.stop_reason, StopReason::QueueExhausted);
    assert_eq!(report.dial_order(), vec!["high", "mid", "low"]);
}

#[tokio::test(start_paused = true)]
async fn test_sequential_mode_keeps_input_order() {
    let rig = Rig::new(SimulatedProvider::new().with_default_script(quick_answer())).await;
    let contacts = vec![
        contact("c1", "+15550101").with_priority(10),
        contact("c2", "+15550102").with_priority(99),
    ];

    let campaign = rig
        .dialer()
        .start(&contacts, settings().build().unwrap())
        .await
        .unwrap();
    let report = campaign.wait().await.unwrap();

    assert_eq!(report.dial_order(), vec!["c1", "c2"]);
}

#[tokio::test(start_paused = true)]
async fn test_fractional_scores_from_contact_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contacts.json");
    std::fs::write(
        &path,
        r#"[
            {"id":"low","name":"Low","phoneNumber":"+15550101","priorityScore":12.25},
            {"id":"high","name":"High","phoneNumber":"+15550102","priorityScore":72.5},
            {"id":"mid","name":"Mid","phoneNumber":"+15550103","priorityScore":72.25}
        ]"#,
    )
    .unwrap();
    let contacts = read_contacts(&path).unwrap();

    let rig = Rig::new(SimulatedProvider::new().with_default_script(quick_answer())).await;
    let campaign = rig
        .dialer()
        .start(
            &contacts,
            settings().priority_mode(PriorityMode::Priority).build().unwrap(),
        )
        .await
        .unwrap();
    let report = campaign.wait().await.unwrap();

    assert_eq!(report.dial_order(), vec!["high", "mid", "low"]);
}

// ============================================================================
// Throttling
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_recently_contacted_target_is_skipped() {
    let rig = Rig::new(SimulatedProvider::new().with_default_script(quick_answer())).await;
    rig.throttle
        .record("c1", Channel::Voice, at(14, 0) - chrono::Duration::days(10), None)
        .await
        .unwrap();

    let contacts = vec![contact("c1", "+15550101"), contact("c2", "+15550102")];
    let campaign = rig
        .dialer()
        .start(&contacts, settings().build().unwrap())
        .await
        .unwrap();
    let recorder = tokio::spawn(record_events(campaign.subscribe()));
    let start = Instant::now();
    let report = campaign.wait().await.unwrap();
    let events = recorder.await.unwrap();

    let skipped = report.target("c1").unwrap();
    assert_eq!(skipped.status, TargetStatus::Failed);
    assert_eq!(skipped.skip_reason, Some(SkipReason::RecentlyContacted));
    assert_eq!(skipped.attempts, 0);
    assert_eq!(report.dial_order(), vec!["c2"]);

    // c2 is dialed right away, without the inter-call delay
    let (dialed_at, _) = events
        .iter()
        .find(|(_, e)| is_dialing("c2")(e))
        .expect("c2 dialed");
    assert_eq!(*dialed_at, start);

    let skip_pos = events
        .iter()
        .position(|(_, e)| matches!(e, DialerEvent::TargetSkipped { .. }))
        .unwrap();
    let dial_pos = events.iter().position(|(_, e)| is_dialing("c2")(e)).unwrap();
    assert!(skip_pos < dial_pos);

    // Policy skips are not placed calls
    assert_eq!(report.stats.total_calls, 1);
}

#[tokio::test(start_paused = true)]
async fn test_dialing_records_contact_for_throttle() {
    let rig = Rig::new(SimulatedProvider::new().with_default_script(quick_answer())).await;

    let campaign = rig
        .dialer()
        .start(&three_contacts(), settings().build().unwrap())
        .await
        .unwrap();
    campaign.wait().await.unwrap();

    for id in ["c1", "c2", "c3"] {
        let record = rig
            .throttle
            .last_contact(id, Channel::Voice)
            .await
            .unwrap()
            .expect("contact recorded");
        assert_eq!(record.agent_id.as_deref(), Some("agent-7"));
        assert!(rig.throttle.is_throttled(id, Channel::Voice, at(15, 0)).await.unwrap());
    }

    // A second campaign over the same contacts has nothing left to call
    let campaign = rig
        .dialer()
        .start(&three_contacts(), settings().build().unwrap())
        .await
        .unwrap();
    let report = campaign.wait().await.unwrap();
    assert_eq!(report.stats.total_calls, 0);
    assert!(report
        .targets
        .iter()
        .all(|t| t.skip_reason == Some(SkipReason::RecentlyContacted)));
}

// ============================================================================
// Ring Timeout And Outcomes
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_ring_timeout_records_no_answer() {
    let rig = Rig::new(
        SimulatedProvider::new()
            .with_default_script(quick_answer())
            .with_script("+15550101", CallScript::NoAnswer),
    )
    .await;

    let contacts = vec![contact("c1", "+15550101"), contact("c2", "+15550102")];
    let campaign = rig
        .dialer()
        .start(&contacts, settings().build().unwrap())
        .await
        .unwrap();
    let recorder = tokio::spawn(record_events(campaign.subscribe()));
    let start = Instant::now();
    let report = campaign.wait().await.unwrap();
    let events = recorder.await.unwrap();

    let c1 = report.target("c1").unwrap();
    assert_eq!(c1.outcome, Some(CallOutcome::NoAnswer));
    assert_eq!(report.stats.no_answer, 1);

    let (ended_at, ended) = events
        .iter()
        .find(|(_, e)| is_call_ended("c1")(e))
        .unwrap();
    assert_eq!(*ended_at - start, secs(30));
    if let DialerEvent::CallEnded { duration_secs, .. } = ended {
        assert_eq!(*duration_secs, 30.0);
    }

    let (next_dial_at, _) = events.iter().find(|(_, e)| is_dialing("c2")(e)).unwrap();
    assert_eq!(*next_dial_at - *ended_at, secs(3));

    // Every simulated call has wound down
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(rig.provider.active_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_mixed_outcomes_keep_stats_consistent() {
    let rig = Rig::new(
        SimulatedProvider::new()
            .with_default_script(quick_answer())
            .with_script("+15550102", CallScript::voicemail(secs(4), secs(20)))
            .with_script("+15550103", CallScript::Reject { after: secs(5) })
            .with_script(
                "+15550104",
                CallScript::Fail {
                    after: secs(1),
                    message: "SIP 503".into(),
                },
            )
            .with_script("+15550105", CallScript::ConnectError("no route".into())),
    )
    .await;

    let contacts = vec![
        contact("human", "+15550101"),
        contact("machine", "+15550102"),
        contact("reject", "+15550103"),
        contact("error", "+15550104"),
        contact("unroutable", "+15550105"),
    ];
    let campaign = rig
        .dialer()
        .start(&contacts, settings().build().unwrap())
        .await
        .unwrap();
    let report = campaign.wait().await.unwrap();

    let outcome = |id| report.target(id).unwrap().outcome;
    assert_eq!(outcome("human"), Some(CallOutcome::Connected));
    assert_eq!(outcome("machine"), Some(CallOutcome::Voicemail));
    assert_eq!(outcome("reject"), Some(CallOutcome::NoAnswer));
    assert_eq!(outcome("error"), Some(CallOutcome::Failed));
    assert_eq!(outcome("unroutable"), Some(CallOutcome::Failed));
    assert_eq!(report.target("error").unwrap().status, TargetStatus::Failed);
    assert_eq!(report.target("human").unwrap().status, TargetStatus::Completed);

    let stats = &report.stats;
    assert_eq!(stats.total_calls, 5);
    assert_eq!(stats.connected, 1);
    assert_eq!(stats.voicemails, 1);
    assert_eq!(stats.no_answer, 1);
    assert_eq!(stats.failed, 2);
    assert!(stats.is_consistent());
    assert_eq!(report.total_attempts(), stats.total_calls);

    // Only the human call contributes talk time: 2s ring + 10s talk
    assert!((stats.avg_call_duration_secs - 12.0).abs() < 1e-9);
    assert!((stats.success_rate() - 0.2).abs() < 1e-9);
    assert!(stats.calls_per_hour > 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_one_call_at_a_time() {
    let rig = Rig::new(SimulatedProvider::new().with_default_script(quick_answer())).await;

    let campaign = rig
        .dialer()
        .start(&three_contacts(), settings().build().unwrap())
        .await
        .unwrap();
    let recorder = tokio::spawn(record_events(campaign.subscribe()));
    let report = campaign.wait().await.unwrap();
    let events = recorder.await.unwrap();

    let mut in_call = false;
    for (_, event) in &events {
        match event {
            DialerEvent::Dialing { attempt, .. } => {
                assert!(!in_call, "dialed while another call was active");
                assert_eq!(*attempt, 1);
                in_call = true;
            }
            DialerEvent::CallEnded { .. } => {
                assert!(in_call);
                in_call = false;
            }
            _ => {}
        }
    }
    assert!(!in_call);
    assert!(report.targets.iter().all(|t| t.attempts == 1));
    assert_eq!(rig.provider.placed_calls().len(), 3);
}

// ============================================================================
// Caller ID
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_caller_ids_rotate_through_pool() {
    let rig = Rig::new(SimulatedProvider::new().with_default_script(quick_answer())).await;
    let contacts = vec![
        contact("c1", "+15550101"),
        contact("c2", "+15550102"),
        contact("c3", "+15550103"),
        contact("c4", "+15550104"),
    ];

    let campaign = rig
        .dialer()
        .start(&contacts, settings().build().unwrap())
        .await
        .unwrap();
    let report = campaign.wait().await.unwrap();

    let caller_ids: Vec<_> = report
        .completed_calls
        .iter()
        .map(|c| c.caller_id.as_str())
        .collect();
    assert_eq!(caller_ids, vec![POOL_A, POOL_B, POOL_A, POOL_B]);

    let stats = rig.carousel.pool_stats().await.unwrap();
    assert_eq!(stats.spread(), 0);
    assert_eq!(stats.max_calls, 2);
}

#[tokio::test(start_paused = true)]
async fn test_personal_number_wins_over_pool() {
    let rig = Rig::new(SimulatedProvider::new().with_default_script(quick_answer())).await;
    rig.carousel.assign_personal("agent-7", "+15558888").await;

    let campaign = rig
        .dialer()
        .start(&three_contacts()[..1], settings().build().unwrap())
        .await
        .unwrap();
    campaign.wait().await.unwrap();

    assert_eq!(rig.provider.placed_calls()[0].caller_id, "+15558888");
    assert_eq!(rig.carousel.pool_stats().await.unwrap().never_used, 2);
}

#[tokio::test(start_paused = true)]
async fn test_alternate_caller_id_mode() {
    let rig = Rig::new(SimulatedProvider::new().with_default_script(quick_answer())).await;

    let campaign = rig
        .dialer()
        .with_alternate_caller_id("+15557777")
        .start(
            &three_contacts()[..2],
            settings()
                .display_caller_id(CallerIdMode::Alternate)
                .call_recording(true)
                .build()
                .unwrap(),
        )
        .await
        .unwrap();
    campaign.wait().await.unwrap();

    let placed = rig.provider.placed_calls();
    assert_eq!(placed.len(), 2);
    assert!(placed.iter().all(|p| p.caller_id == "+15557777" && p.record));
}

// ============================================================================
// Working Hours
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_outside_working_hours_pauses_without_dialing() {
    let rig = Rig::new(SimulatedProvider::new().with_default_script(quick_answer())).await;
    rig.clock.set(at(20, 0));

    let campaign = rig
        .dialer()
        .start(
            &three_contacts(),
            settings()
                .auto_dial_next(false)
                .working_hours("09:00", "17:00", "UTC")
                .build()
                .unwrap(),
        )
        .await
        .unwrap();

    campaign.dial_next().await.unwrap();

    let mut watch = campaign.watch();
    watch
        .wait_for(|s| s.state == DialerState::Paused(PauseReason::OutsideWorkingHours))
        .await
        .unwrap();

    let snapshot = campaign.snapshot();
    assert!(snapshot.current.is_none());
    assert!(snapshot
        .queue
        .iter()
        .all(|t| t.status == TargetStatus::Pending && t.attempts == 0));
    assert!(rig.provider.placed_calls().is_empty());

    assert!(matches!(
        campaign.dial_next().await,
        Err(DialerError::Paused)
    ));

    campaign.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_campaign_resumes_when_window_opens() {
    let rig = Rig::new(SimulatedProvider::new().with_default_script(quick_answer())).await;
    rig.clock.set(at(8, 30));

    let campaign = rig
        .dialer()
        .start(
            &three_contacts(),
            settings()
                .working_hours("09:00", "17:00", "+00:00")
                .working_hours_poll(secs(60))
                .build()
                .unwrap(),
        )
        .await
        .unwrap();
    let mut events = campaign.subscribe();

    next_matching(&mut events, |e| {
        matches!(
            e,
            DialerEvent::Paused {
                reason: PauseReason::OutsideWorkingHours
            }
        )
    })
    .await;

    // Still closed at the first re-check
    tokio::time::sleep(secs(61)).await;
    assert!(rig.provider.placed_calls().is_empty());

    rig.clock.set(at(9, 0));
    next_matching(&mut events, |e| matches!(e, DialerEvent::Resumed)).await;
    next_matching(&mut events, is_dialing("c1")).await;

    campaign.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_operator_resume_overrides_working_hours() {
    let rig = Rig::new(SimulatedProvider::new().with_default_script(quick_answer())).await;
    rig.clock.set(at(22, 0));

    let campaign = rig
        .dialer()
        .start(
            &three_contacts()[..2],
            settings()
                .working_hours("09:00", "17:00", "UTC")
                .build()
                .unwrap(),
        )
        .await
        .unwrap();

    let mut watch = campaign.watch();
    watch
        .wait_for(|s| s.state.is_paused())
        .await
        .unwrap();

    campaign.resume().await.unwrap();
    let report = campaign.wait().await.unwrap();

    // The override holds for the rest of the closed window
    assert_eq!(report.dial_order(), vec!["c1", "c2"]);
    assert_eq!(report.stop_reason, StopReason::QueueExhausted);
}

#[tokio::test(start_paused = true)]
async fn test_operator_pause_ends_working_hours_override() {
    let rig = Rig::new(SimulatedProvider::new().with_default_script(quick_answer())).await;
    rig.clock.set(at(22, 0));

    let campaign = rig
        .dialer()
        .start(
            &three_contacts(),
            settings()
                .working_hours("09:00", "17:00", "UTC")
                .build()
                .unwrap(),
        )
        .await
        .unwrap();
    let mut watch = campaign.watch();
    let outside_hours = |s: &powerdial::dialer::DialerSnapshot| {
        s.state == DialerState::Paused(PauseReason::OutsideWorkingHours)
    };
    watch.wait_for(outside_hours).await.unwrap();

    let mut events = campaign.subscribe();
    campaign.resume().await.unwrap();
    next_matching(&mut events, is_answered).await;
    campaign.pause().await.unwrap();
    next_matching(&mut events, is_call_ended("c1")).await;

    // An unrelated operator pause/resume does not extend the override
    campaign.resume().await.unwrap();
    watch.wait_for(outside_hours).await.unwrap();

    tokio::time::sleep(secs(300)).await;
    assert_eq!(rig.provider.placed_calls().len(), 1);
    assert!(campaign
        .snapshot()
        .queue
        .iter()
        .filter(|t| t.id != "c1")
        .all(|t| t.is_pending()));

    campaign.stop().await.unwrap();
}

// ============================================================================
// Operator Commands
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_pause_lets_current_call_finish() {
    let rig = Rig::new(SimulatedProvider::new().with_default_script(quick_answer())).await;

    let campaign = rig
        .dialer()
        .start(&three_contacts()[..2], settings().build().unwrap())
        .await
        .unwrap();
    let mut events = campaign.subscribe();

    next_matching(&mut events, is_answered).await;
    campaign.pause().await.unwrap();

    let ended = next_matching(&mut events, is_call_ended("c1")).await;
    assert!(matches!(
        ended,
        DialerEvent::CallEnded {
            outcome: CallOutcome::Connected,
            ..
        }
    ));

    let mut watch = campaign.watch();
    watch
        .wait_for(|s| s.state == DialerState::Paused(PauseReason::Operator))
        .await
        .unwrap();

    tokio::time::sleep(secs(120)).await;
    assert_eq!(rig.provider.placed_calls().len(), 1);

    campaign.resume().await.unwrap();
    next_matching(&mut events, is_dialing("c2")).await;

    let report = campaign.wait().await.unwrap();
    assert_eq!(report.dial_order(), vec!["c1", "c2"]);
}

#[tokio::test(start_paused = true)]
async fn test_skip_unanswered_call() {
    let rig = Rig::new(
        SimulatedProvider::new()
            .with_default_script(quick_answer())
            .with_script("+15550101", CallScript::NoAnswer),
    )
    .await;

    let campaign = rig
        .dialer()
        .start(&three_contacts()[..2], settings().build().unwrap())
        .await
        .unwrap();
    let mut events = campaign.subscribe();

    next_matching(&mut events, is_dialing("c1")).await;
    campaign.skip().await.unwrap();

    let ended = next_matching(&mut events, is_call_ended("c1")).await;
    assert!(matches!(
        ended,
        DialerEvent::CallEnded {
            outcome: CallOutcome::Skipped,
            ..
        }
    ));

    let report = campaign.wait().await.unwrap();
    assert_eq!(report.target("c1").unwrap().status, TargetStatus::Completed);
    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.stats.connected, 1);
    assert!(report.stats.is_consistent());
}

#[tokio::test(start_paused = true)]
async fn test_skip_after_answer_keeps_connected() {
    let rig = Rig::new(SimulatedProvider::new().with_default_script(quick_answer())).await;

    let campaign = rig
        .dialer()
        .start(&three_contacts()[..1], settings().build().unwrap())
        .await
        .unwrap();
    let mut events = campaign.subscribe();

    next_matching(&mut events, is_answered).await;
    campaign.skip().await.unwrap();

    let report = campaign.wait().await.unwrap();
    assert_eq!(report.target("c1").unwrap().outcome, Some(CallOutcome::Connected));
    assert_eq!(report.stats.connected, 1);
    assert_eq!(report.stats.total_calls, 1);
}

#[tokio::test(start_paused = true)]
async fn test_skip_without_call_is_rejected() {
    let rig = Rig::new(SimulatedProvider::new()).await;

    let campaign = rig
        .dialer()
        .start(
            &three_contacts(),
            settings().auto_dial_next(false).build().unwrap(),
        )
        .await
        .unwrap();

    assert!(matches!(campaign.skip().await, Err(DialerError::NoActiveCall)));
    assert_eq!(campaign.state(), DialerState::Idle);
    campaign.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_hangs_up_and_leaves_queue() {
    let rig = Rig::new(SimulatedProvider::new().with_default_script(CallScript::NoAnswer)).await;

    let campaign = rig
        .dialer()
        .start(&three_contacts(), settings().build().unwrap())
        .await
        .unwrap();
    let mut events = campaign.subscribe();

    next_matching(&mut events, is_dialing("c1")).await;
    campaign.stop().await.unwrap();
    assert!(matches!(campaign.pause().await, Err(DialerError::CampaignEnded)));

    let report = campaign.wait().await.unwrap();
    assert_eq!(report.stop_reason, StopReason::Operator);
    assert_eq!(report.target("c1").unwrap().outcome, Some(CallOutcome::Skipped));
    assert!(report.target("c2").unwrap().is_pending());
    assert!(report.target("c3").unwrap().is_pending());
    assert_eq!(rig.provider.active_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_manual_mode_waits_for_operator() {
    let rig = Rig::new(SimulatedProvider::new().with_default_script(quick_answer())).await;

    let campaign = rig
        .dialer()
        .start(
            &three_contacts()[..2],
            settings().auto_dial_next(false).build().unwrap(),
        )
        .await
        .unwrap();
    let mut events = campaign.subscribe();

    tokio::time::sleep(secs(60)).await;
    assert!(rig.provider.placed_calls().is_empty());

    campaign.dial_next().await.unwrap();
    assert!(matches!(
        campaign.dial_next().await,
        Err(DialerError::CallInProgress)
    ));
    next_matching(&mut events, is_call_ended("c1")).await;

    tokio::time::sleep(secs(60)).await;
    assert_eq!(rig.provider.placed_calls().len(), 1);

    campaign.dial_next().await.unwrap();
    let report = campaign.wait().await.unwrap();
    assert_eq!(report.dial_order(), vec!["c1", "c2"]);
    assert_eq!(report.stop_reason, StopReason::QueueExhausted);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_stops_campaign() {
    let rig = Rig::new(SimulatedProvider::new().with_default_script(CallScript::NoAnswer)).await;

    let campaign = rig
        .dialer()
        .start(&three_contacts(), settings().build().unwrap())
        .await
        .unwrap();
    let mut events = campaign.subscribe();
    next_matching(&mut events, is_dialing("c1")).await;

    drop(campaign);

    let finished = next_matching(&mut events, |e| {
        matches!(e, DialerEvent::CampaignFinished { .. })
    })
    .await;
    assert_eq!(
        finished,
        DialerEvent::CampaignFinished {
            reason: StopReason::HandleDropped
        }
    );
    assert_eq!(rig.provider.active_calls(), 0);
}

// ============================================================================
// Start-up Failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_provider_not_ready() {
    let rig = Rig::new(SimulatedProvider::new().not_ready()).await;

    let result = rig
        .dialer()
        .start(
            &three_contacts(),
            settings()
                .provider_ready_retries(2, Duration::from_millis(100))
                .build()
                .unwrap(),
        )
        .await;

    assert!(matches!(result, Err(DialerError::ProviderNotReady(_))));
    assert!(rig.provider.placed_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_provider_ready_after_registration() {
    let rig = Rig::new(
        SimulatedProvider::new()
            .with_default_script(quick_answer())
            .not_ready(),
    )
    .await;

    let provider = rig.provider.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        provider.set_ready(true);
    });

    let campaign = rig
        .dialer()
        .start(
            &three_contacts()[..1],
            settings()
                .provider_ready_retries(5, Duration::from_millis(100))
                .build()
                .unwrap(),
        )
        .await
        .unwrap();
    let report = campaign.wait().await.unwrap();
    assert_eq!(report.stats.total_calls, 1);
}

#[tokio::test(start_paused = true)]
async fn test_empty_queue_is_rejected() {
    let rig = Rig::new(SimulatedProvider::new()).await;
    let result = rig.dialer().start(&[], settings().build().unwrap()).await;
    assert!(matches!(result, Err(DialerError::EmptyQueue)));
}

#[tokio::test(start_paused = true)]
async fn test_bad_numbers_are_filtered() {
    let rig = Rig::new(SimulatedProvider::new().with_default_script(quick_answer())).await;
    let dialer = rig
        .dialer()
        .with_bad_number_filter(Arc::new(|c: &Contact| c.phone_number.len() < 8));

    let contacts = vec![
        contact("bad", "555"),
        contact("good", "+15550102"),
    ];
    let campaign = dialer
        .start(&contacts, settings().skip_bad_numbers(true).build().unwrap())
        .await
        .unwrap();
    let report = campaign.wait().await.unwrap();
    assert_eq!(report.targets.len(), 1);
    assert_eq!(report.dial_order(), vec!["good"]);

    let result = dialer
        .start(&contacts[..1], settings().skip_bad_numbers(true).build().unwrap())
        .await;
    assert!(matches!(result, Err(DialerError::EmptyQueue)));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_settings_are_rejected() {
    let rig = Rig::new(SimulatedProvider::new()).await;
    let mut bad = DialerSettings::default();
    bad.working_hours.enabled = true;
    bad.working_hours.timezone = "Mars/Olympus".into();

    let result = rig.dialer().start(&three_contacts(), bad).await;
    assert!(matches!(result, Err(DialerError::InvalidSettings(_))));
}

// ============================================================================
// Collaborators
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_crm_and_coaching_notifications() {
    let rig = Rig::new(
        SimulatedProvider::new()
            .with_default_script(quick_answer())
            .with_script("+15550102", CallScript::voicemail(secs(3), secs(15)))
            .with_script("+15550103", CallScript::NoAnswer),
    )
    .await;

    let campaign = rig
        .dialer()
        .start(&three_contacts(), settings().build().unwrap())
        .await
        .unwrap();
    campaign.wait().await.unwrap();
    // Let the CRM writer and coaching notifications run
    tokio::time::sleep(Duration::from_millis(10)).await;

    let records = rig.crm.records();
    let summary: Vec<_> = records
        .iter()
        .map(|r| (r.contact_id.as_str(), r.outcome))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("c1", CallOutcome::Connected),
            ("c2", CallOutcome::Voicemail),
            ("c3", CallOutcome::NoAnswer),
        ]
    );
    assert_eq!(records[0].duration_seconds, 12.0);
    assert_eq!(records[2].duration_seconds, 30.0);

    assert_eq!(rig.coaching.sessions(), vec!["c1".to_string()]);
    assert_eq!(rig.coaching.stop_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_crm_does_not_hold_up_commands() {
    let rig = Rig::new(SimulatedProvider::new().with_default_script(quick_answer())).await;

    let campaign = rig
        .dialer()
        .with_crm(Arc::new(SlowCrm))
        .start(&three_contacts()[..2], settings().build().unwrap())
        .await
        .unwrap();
    let mut events = campaign.subscribe();
    next_matching(&mut events, is_call_ended("c1")).await;

    let asked = Instant::now();
    campaign.stop().await.unwrap();
    assert!(asked.elapsed() < secs(1));

    let report = campaign.wait().await.unwrap();
    assert_eq!(report.stop_reason, StopReason::Operator);
    assert_eq!(report.dial_order(), vec!["c1"]);
    assert!(report.target("c2").unwrap().is_pending());
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_tracks_progress() {
    let rig = Rig::new(SimulatedProvider::new().with_default_script(quick_answer())).await;

    let campaign = rig
        .dialer()
        .start(&three_contacts(), settings().build().unwrap())
        .await
        .unwrap();
    let mut watch = campaign.watch();

    let snapshot = watch
        .wait_for(|s| s.state == DialerState::Connected)
        .await
        .unwrap()
        .clone();
    assert_eq!(snapshot.current.as_ref().map(|t| t.id.as_str()), Some("c1"));
    assert_eq!(snapshot.stats.connected, 1);
    assert!(snapshot.completed_calls.is_empty());

    let snapshot = watch
        .wait_for(|s| s.completed_calls.len() == 1)
        .await
        .unwrap()
        .clone();
    assert!(snapshot.current.is_none() || snapshot.current.as_ref().unwrap().id == "c2");
    assert_eq!(campaign.campaign_id(), snapshot.campaign_id);

    campaign.stop().await.unwrap();
}

// ============================================================================
// Store Failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_unavailable_throttle_skips_without_dialing() {
    let mut rig = Rig::new(SimulatedProvider::new().with_default_script(quick_answer())).await;
    rig.throttle = Arc::new(ContactThrottle::new(
        Arc::new(BrokenStore),
        ThrottleWindows::default(),
    ));

    let campaign = rig
        .dialer()
        .start(&three_contacts(), settings().build().unwrap())
        .await
        .unwrap();
    let report = campaign.wait().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(report.stop_reason, StopReason::QueueExhausted);
    assert!(rig.provider.placed_calls().is_empty());
    for target in &report.targets {
        assert_eq!(target.status, TargetStatus::Failed);
        assert_eq!(target.skip_reason, Some(SkipReason::ThrottleUnavailable));
        assert_eq!(target.attempts, 0);
    }
    assert_eq!(report.stats.total_calls, 0);
    assert!(report.completed_calls.is_empty());
    assert!(rig.crm.records().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_pool_falls_back_to_default_caller_id() {
    let mut rig = Rig::new(SimulatedProvider::new().with_default_script(quick_answer())).await;
    rig.carousel = Arc::new(NumberCarousel::new(Arc::new(BrokenStore), FALLBACK));

    let campaign = rig
        .dialer()
        .start(&three_contacts()[..2], settings().build().unwrap())
        .await
        .unwrap();
    let report = campaign.wait().await.unwrap();

    let placed: Vec<_> = rig
        .provider
        .placed_calls()
        .into_iter()
        .map(|p| p.caller_id)
        .collect();
    assert_eq!(placed, vec![FALLBACK.to_string(), FALLBACK.to_string()]);
    assert_eq!(report.stats.connected, 2);
    assert!(report.completed_calls.iter().all(|c| c.caller_id == FALLBACK));
}
