//! powerdial - outbound calling campaigns
//!
//! A power dialer that works through a contact list one call at a time on
//! behalf of a single agent, rotating outbound caller IDs and refusing to
//! re-contact people inside a cool-down window.
//!
//! # Architecture
//!
//! - [`dialer`] - Campaign state machine, operator commands and reports
//! - [`campaign`] - Target queue, working-hours gate and statistics
//! - [`carousel`] - Least-recently-used caller-ID rotation
//! - [`throttle`] - Per-contact, per-channel cool-down windows
//! - [`telephony`] - Provider abstraction and a scripted simulator
//! - [`collaborators`] - CRM and coaching hooks
//! - [`store`] - Key-value stores shared by every campaign in the process
//! - [`config`] - Configuration management and settings
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use powerdial::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let dialer = Dialer::new(
//!         config.agent.id.clone(),
//!         Arc::new(SimulatedProvider::new()),
//!         Arc::new(config.carousel.open().await?),
//!         Arc::new(config.throttle.open().await?),
//!     );
//!
//!     let contacts = vec![Contact::new("c-1", "Ava Reed", "+15550001")];
//!     let campaign = dialer.start(&contacts, config.dialer).await?;
//!     let report = campaign.wait().await?;
//!     println!("{:.0}% connected", report.stats.success_rate() * 100.0);
//!     Ok(())
//! }
//! ```

pub mod campaign;
pub mod carousel;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod dialer;
pub mod error;
pub mod metrics;
pub mod models;
pub mod store;
pub mod telephony;
pub mod throttle;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::campaign::{CampaignStats, PriorityMode, WorkingHours};
    pub use crate::carousel::{CallerIdSource, NumberCarousel};
    pub use crate::collaborators::{CoachingHook, CrmSink};
    pub use crate::config::Config;
    pub use crate::dialer::{
        CallerIdMode, CampaignHandle, CampaignReport, Dialer, DialerError, DialerEvent,
        DialerSettings, DialerState, PauseReason, StopReason,
    };
    pub use crate::error::{Error, ErrorCategory, PowerdialErrorTrait, Result};
    pub use crate::models::{CallOutcome, CallTarget, Channel, Contact, TargetStatus};
    pub use crate::telephony::{AnsweredBy, CallScript, SimulatedProvider, TelephonyProvider};
    pub use crate::throttle::ContactThrottle;
}

// Direct re-exports for convenience
pub use dialer::{CampaignHandle, Dialer, DialerSettings};
pub use models::{CallOutcome, Contact};
