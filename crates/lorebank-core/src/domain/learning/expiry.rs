//! Expiry of time-bound learnings
//!
//! The periodic sweep only flips the `active` flag so storage reflects what
//! readers already see. Read-time filtering is what keeps expired learnings
//! out of retrieval, whether or not a sweep has run.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::timestamp_now;
use crate::error::Result;

use super::entity::Learning;
use super::event::{LearningEvent, record_event};
use super::repository::LearningRepository;

/// Marks expired learnings inactive
pub struct ExpiryManager<R: LearningRepository> {
    repository: Arc<R>,
}

impl<R: LearningRepository> Clone for ExpiryManager<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
        }
    }
}

impl<R: LearningRepository + 'static> ExpiryManager<R> {
    /// Create a new expiry manager
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    /// Deactivate every learning whose `expires_at <= now`
    ///
    /// Returns the number of learnings swept.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let swept = self.repository.deactivate_expired(now).await?;

        for id in &swept {
            record_event(self.repository.as_ref(), LearningEvent::expired(id, now)).await;
        }

        if swept.is_empty() {
            debug!("Expiry sweep found nothing to deactivate");
        } else {
            info!(count = swept.len(), "Expired learnings deactivated");
        }

        Ok(swept.len())
    }

    /// Whether a learning has reached its expiry time
    pub fn is_expired(learning: &Learning, now: DateTime<Utc>) -> bool {
        learning.is_expired(now)
    }

    /// Drop candidates that have expired, regardless of sweep state
    pub fn filter_expired(candidates: Vec<Learning>, now: DateTime<Utc>) -> Vec<Learning> {
        candidates
            .into_iter()
            .filter(|learning| !learning.is_expired(now))
            .collect()
    }

    /// Run the sweep periodically until `cancel` fires
    ///
    /// A failed sweep is logged and retried on the next tick.
    pub fn spawn(&self, every: StdDuration, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_secs = every.as_secs(), "Expiry sweeper started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = manager.sweep(timestamp_now()).await {
                            warn!(error = %e, "Expiry sweep failed");
                        }
                    }
                }
            }

            info!("Expiry sweeper stopped");
        })
    }
}
