//! Operator command surface for a running campaign

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::error::{DialerError, DialerResult};
use super::state::{CampaignReport, DialerEvent, DialerSnapshot, DialerState};

pub(crate) type Reply = oneshot::Sender<DialerResult<()>>;

/// Commands serialized through the campaign task
#[derive(Debug)]
pub(crate) enum Command {
    Pause(Reply),
    Resume(Reply),
    Stop(Reply),
    Skip(Reply),
    DialNext(Reply),
}

/// Handle to a running campaign
///
/// Commands are processed in order by the campaign task. Once the campaign
/// has stopped, every command returns [`DialerError::CampaignEnded`].
/// Dropping the handle stops the campaign.
#[derive(Debug)]
pub struct CampaignHandle {
    campaign_id: String,
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<DialerSnapshot>,
    events: broadcast::Sender<DialerEvent>,
    task: JoinHandle<CampaignReport>,
}

impl CampaignHandle {
    pub(crate) fn new(
        campaign_id: String,
        commands: mpsc::Sender<Command>,
        snapshot: watch::Receiver<DialerSnapshot>,
        events: broadcast::Sender<DialerEvent>,
        task: JoinHandle<CampaignReport>,
    ) -> Self {
        Self {
            campaign_id,
            commands,
            snapshot,
            events,
            task,
        }
    }

    pub fn campaign_id(&self) -> &str {
        &self.campaign_id
    }

    /// Stop advancing after the current call
    pub async fn pause(&self) -> DialerResult<()> {
        self.request(Command::Pause).await
    }

    /// Clear a pause and dial the next target if idle
    ///
    /// Resuming a working-hours pause overrides the closed window until it
    /// next opens.
    pub async fn resume(&self) -> DialerResult<()> {
        self.request(Command::Resume).await
    }

    /// Hang up any active call and end the campaign
    pub async fn stop(&self) -> DialerResult<()> {
        self.request(Command::Stop).await
    }

    /// Hang up the active call and move on
    pub async fn skip(&self) -> DialerResult<()> {
        self.request(Command::Skip).await
    }

    /// Dial the next pending target now
    pub async fn dial_next(&self) -> DialerResult<()> {
        self.request(Command::DialNext).await
    }

    async fn request(&self, command: impl FnOnce(Reply) -> Command) -> DialerResult<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| DialerError::CampaignEnded)?;
        rx.await.map_err(|_| DialerError::CampaignEnded)?
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> DialerSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> DialerState {
        self.snapshot.borrow().state
    }

    /// Receiver notified on every snapshot change
    pub fn watch(&self) -> watch::Receiver<DialerSnapshot> {
        self.snapshot.clone()
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<DialerEvent> {
        self.events.subscribe()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the campaign to end and collect its report
    pub async fn wait(self) -> DialerResult<CampaignReport> {
        let Self { commands, task, .. } = self;
        let report = task
            .await
            .map_err(|e| DialerError::TaskFailed(e.to_string()));
        drop(commands);
        report
    }
}
