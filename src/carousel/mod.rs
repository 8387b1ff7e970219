//! Caller-ID number carousel
//!
//! Rotates outbound caller IDs across a shared pool so call volume spreads
//! evenly and no single number gets flagged by carriers.
//!
//! # Selection order
//!
//! Selection is a total order over the pool:
//!
//! 1. never-used numbers first
//! 2. then the oldest `last_used_at`
//! 3. then the lowest `call_count`
//! 4. then the identifier, so ties resolve deterministically
//!
//! The chosen number is stamped (`last_used_at = now`, `call_count += 1`)
//! before the selection lock is released, so two campaigns sharing the pool
//! never both receive the same momentarily-fresh number.
//!
//! Agents may have a personal number pinned to them. A pinned number is taken
//! out of the shared rotation and always used for that agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::clock::{Clock, SystemClock};
use crate::store::{KeyValueStore, MemoryStore, StoreResult};

/// One outbound caller-ID resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarouselNumber {
    pub identifier: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub call_count: u64,
}

impl CarouselNumber {
    /// Create a never-used number
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            last_used_at: None,
            call_count: 0,
        }
    }

    // `None` sorts before any timestamp, which puts never-used numbers first
    fn selection_key(&self) -> (Option<DateTime<Utc>>, u64, &str) {
        (self.last_used_at, self.call_count, self.identifier.as_str())
    }
}

/// Where a caller ID came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallerIdSource {
    /// Agent's pinned personal number
    Personal,
    /// Shared rotation pool
    Pool,
    /// Configured fallback (pool empty)
    Default,
}

impl fmt::Display for CallerIdSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Personal => write!(f, "personal"),
            Self::Pool => write!(f, "pool"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// A resolved caller ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdSelection {
    pub identifier: String,
    pub source: CallerIdSource,
}

/// Usage spread across the pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub size: usize,
    pub never_used: usize,
    pub min_calls: u64,
    pub max_calls: u64,
}

impl PoolStats {
    /// Difference between the busiest and the idlest number
    pub fn spread(&self) -> u64 {
        self.max_calls - self.min_calls
    }
}

/// Least-recently-used caller-ID rotator
pub struct NumberCarousel {
    pool: Arc<dyn KeyValueStore<CarouselNumber>>,
    personal: RwLock<HashMap<String, String>>,
    default_identifier: String,
    clock: Arc<dyn Clock>,
    select_lock: Mutex<()>,
}

impl fmt::Debug for NumberCarousel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NumberCarousel")
            .field("default_identifier", &self.default_identifier)
            .finish_non_exhaustive()
    }
}

impl NumberCarousel {
    /// Create a carousel over an existing pool store
    pub fn new(
        pool: Arc<dyn KeyValueStore<CarouselNumber>>,
        default_identifier: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            personal: RwLock::new(HashMap::new()),
            default_identifier: default_identifier.into(),
            clock: Arc::new(SystemClock),
            select_lock: Mutex::new(()),
        }
    }

    /// Create an in-memory carousel seeded with never-used numbers
    pub async fn with_numbers<I, S>(
        numbers: I,
        default_identifier: impl Into<String>,
    ) -> StoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let carousel = Self::new(
            Arc::new(MemoryStore::<CarouselNumber>::new()),
            default_identifier,
        );
        for number in numbers {
            carousel.add_number(number).await?;
        }
        Ok(carousel)
    }

    /// Use a different clock for usage stamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Fallback identifier used when the pool is empty
    pub fn default_identifier(&self) -> &str {
        &self.default_identifier
    }

    /// Add a number to the pool; existing usage history is kept
    pub async fn add_number(&self, identifier: impl Into<String>) -> StoreResult<()> {
        let identifier = identifier.into();
        let _guard = self.select_lock.lock().await;
        if self.pool.get(&identifier).await?.is_none() {
            self.pool
                .set(&identifier, CarouselNumber::new(identifier.clone()))
                .await?;
        }
        Ok(())
    }

    /// Remove a number from the pool
    pub async fn remove_number(&self, identifier: &str) -> StoreResult<Option<CarouselNumber>> {
        let _guard = self.select_lock.lock().await;
        self.pool.remove(identifier).await
    }

    /// Snapshot of the pool in selection order
    pub async fn numbers(&self) -> StoreResult<Vec<CarouselNumber>> {
        let mut numbers: Vec<_> = self.pool.entries().await?.into_iter().map(|(_, n)| n).collect();
        numbers.sort_by(|a, b| a.selection_key().cmp(&b.selection_key()));
        Ok(numbers)
    }

    /// Pin a number to an agent, outside the shared rotation
    pub async fn assign_personal(&self, agent_id: impl Into<String>, identifier: impl Into<String>) {
        let agent_id = agent_id.into();
        let identifier = identifier.into();
        tracing::info!(agent_id = %agent_id, identifier = %identifier, "Personal caller ID assigned");
        self.personal.write().await.insert(agent_id, identifier);
    }

    /// Remove an agent's pinned number
    pub async fn unassign_personal(&self, agent_id: &str) -> Option<String> {
        self.personal.write().await.remove(agent_id)
    }

    /// Pinned number for an agent
    pub async fn personal_number(&self, agent_id: &str) -> Option<String> {
        self.personal.read().await.get(agent_id).cloned()
    }

    /// Select the next caller ID from the shared pool
    ///
    /// Fails soft: an empty pool yields the default identifier.
    pub async fn select_number(&self) -> StoreResult<String> {
        Ok(self.select_from_pool().await?.identifier)
    }

    /// Resolve the caller ID for an agent: pinned number first, then the pool
    pub async fn select_for_agent(&self, agent_id: &str) -> StoreResult<CallerIdSelection> {
        if let Some(identifier) = self.personal_number(agent_id).await {
            return Ok(CallerIdSelection {
                identifier,
                source: CallerIdSource::Personal,
            });
        }
        self.select_from_pool().await
    }

    async fn select_from_pool(&self) -> StoreResult<CallerIdSelection> {
        let _guard = self.select_lock.lock().await;
        let pinned: Vec<String> = self.personal.read().await.values().cloned().collect();

        let chosen = self
            .pool
            .entries()
            .await?
            .into_iter()
            .map(|(_, n)| n)
            .filter(|n| !pinned.contains(&n.identifier))
            .min_by(|a, b| a.selection_key().cmp(&b.selection_key()));

        let Some(mut number) = chosen else {
            tracing::warn!(
                default = %self.default_identifier,
                "Caller ID pool empty, using default identifier"
            );
            return Ok(CallerIdSelection {
                identifier: self.default_identifier.clone(),
                source: CallerIdSource::Default,
            });
        };

        number.last_used_at = Some(self.clock.now());
        number.call_count += 1;
        self.pool.set(&number.identifier, number.clone()).await?;

        tracing::debug!(
            identifier = %number.identifier,
            call_count = number.call_count,
            "Caller ID selected"
        );

        Ok(CallerIdSelection {
            identifier: number.identifier,
            source: CallerIdSource::Pool,
        })
    }

    /// Usage spread across the shared pool
    pub async fn pool_stats(&self) -> StoreResult<PoolStats> {
        let numbers = self.numbers().await?;
        if numbers.is_empty() {
            return Ok(PoolStats::default());
        }

        Ok(PoolStats {
            size: numbers.len(),
            never_used: numbers.iter().filter(|n| n.last_used_at.is_none()).count(),
            min_calls: numbers.iter().map(|n| n.call_count).min().unwrap_or(0),
            max_calls: numbers.iter().map(|n| n.call_count).max().unwrap_or(0),
        })
    }
}
