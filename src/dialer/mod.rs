//! Power dialer
//!
//! A [`Dialer`] binds one agent to the shared process-wide components (the
//! telephony provider, the caller-ID carousel, the contact throttle) and
//! starts campaigns. Each campaign runs as its own task and is controlled
//! through the returned [`CampaignHandle`].
//!
//! # State machine
//!
//! ```text
//! idle -> dialing -> connected -> wrapping_up -> idle
//! idle -> dialing -> wrapping_up -> idle            (no answer, failure, skip)
//! idle -> paused -> idle                              (operator or working hours)
//! any  -> stopped                                     (stop, queue exhausted)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use powerdial::prelude::*;
//!
//! # async fn demo(contacts: Vec<Contact>) -> anyhow::Result<()> {
//! let dialer = Dialer::new(
//!     "agent-1",
//!     Arc::new(SimulatedProvider::new()),
//!     Arc::new(NumberCarousel::with_numbers(["+15550100", "+15550101"], "+15550199").await?),
//!     Arc::new(ContactThrottle::in_memory()),
//! );
//!
//! let campaign = dialer.start(&contacts, DialerSettings::default()).await?;
//! let report = campaign.wait().await?;
//! println!("{} calls placed", report.stats.total_calls);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod handle;
mod runner;
pub mod settings;
pub mod state;

pub use error::{DialerError, DialerResult};
pub use handle::CampaignHandle;
pub use settings::{CallerIdMode, DialerSettings, DialerSettingsBuilder, WorkingHoursConfig};
pub use state::{
    CampaignReport, DialerEvent, DialerSnapshot, DialerState, PauseReason, StopReason,
};

use std::fmt;
use std::sync::Arc;

use crate::campaign::{BadNumberFilter, CampaignQueue, QueueOptions};
use crate::carousel::NumberCarousel;
use crate::clock::{Clock, SystemClock};
use crate::collaborators::{CoachingHook, CrmSink, NoopCoaching, NoopCrm};
use crate::models::Contact;
use crate::telephony::TelephonyProvider;
use crate::throttle::ContactThrottle;
use crate::utils::retry::wait_until;
use runner::{CampaignSetup, DialerDeps};

/// Campaign factory for one agent
pub struct Dialer {
    agent_id: String,
    deps: DialerDeps,
    bad_number: Option<BadNumberFilter>,
}

impl fmt::Debug for Dialer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialer")
            .field("agent_id", &self.agent_id)
            .field("provider", &self.deps.provider.name())
            .finish_non_exhaustive()
    }
}

impl Dialer {
    pub fn new(
        agent_id: impl Into<String>,
        provider: Arc<dyn TelephonyProvider>,
        carousel: Arc<NumberCarousel>,
        throttle: Arc<ContactThrottle>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            deps: DialerDeps {
                provider,
                carousel,
                throttle,
                crm: Arc::new(NoopCrm),
                coaching: Arc::new(NoopCoaching),
                clock: Arc::new(SystemClock),
                alternate_caller_id: None,
            },
            bad_number: None,
        }
    }

    /// Report every placed call to a CRM
    pub fn with_crm(mut self, crm: Arc<dyn CrmSink>) -> Self {
        self.deps.crm = crm;
        self
    }

    /// Notify a coaching service about live conversations
    pub fn with_coaching(mut self, coaching: Arc<dyn CoachingHook>) -> Self {
        self.deps.coaching = coaching;
        self
    }

    /// Wall clock for throttle checks, working hours and timestamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.deps.clock = clock;
        self
    }

    /// Predicate used when `skip_bad_numbers` is set
    pub fn with_bad_number_filter(mut self, filter: BadNumberFilter) -> Self {
        self.bad_number = Some(filter);
        self
    }

    /// Identity presented in `alternate` caller-ID mode
    pub fn with_alternate_caller_id(mut self, identifier: impl Into<String>) -> Self {
        self.deps.alternate_caller_id = Some(identifier.into());
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Build the queue and start dialing
    ///
    /// Fails when the settings are invalid, when nothing is left to dial after
    /// filtering, or when the provider never reports ready.
    pub async fn start(
        &self,
        contacts: &[Contact],
        settings: DialerSettings,
    ) -> DialerResult<CampaignHandle> {
        settings.validate()?;
        let window = settings.working_hours.resolve()?;

        let options = QueueOptions {
            mode: settings.priority_mode,
            skip_bad_numbers: settings.skip_bad_numbers,
            bad_number: self.bad_number.clone(),
            seed: settings.random_seed,
        };
        let queue = CampaignQueue::build(contacts, &options);
        if queue.is_empty() {
            return Err(DialerError::EmptyQueue);
        }

        self.wait_until_ready(&settings).await?;

        let campaign_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(
            campaign_id = %campaign_id,
            agent_id = %self.agent_id,
            provider = self.deps.provider.name(),
            "Starting campaign"
        );

        Ok(runner::spawn(
            CampaignSetup {
                campaign_id,
                agent_id: self.agent_id.clone(),
                settings,
                window,
                queue,
            },
            self.deps.clone(),
        ))
    }

    async fn wait_until_ready(&self, settings: &DialerSettings) -> DialerResult<()> {
        let provider = &self.deps.provider;
        let polls = wait_until(&settings.provider_ready_retry(), provider.name(), || {
            provider.is_ready()
        })
        .await
        .map_err(|e| DialerError::ProviderNotReady(e.to_string()))?;

        if polls > 1 {
            tracing::debug!(polls, provider = provider.name(), "Provider became ready");
        }
        Ok(())
    }
}
