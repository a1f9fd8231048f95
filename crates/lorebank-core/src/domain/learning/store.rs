//! Learning store service
//!
//! Durable create/read/update over learnings. Validation always happens
//! before anything is written, so a rejected call leaves the store untouched.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::domain::session::SessionRecord;
use crate::domain::timestamp_now;
use crate::error::{Error, Result};

use super::entity::{Learning, LearningUpdate};
use super::event::{LearningEvent, record_event};
use super::repository::{InsertOutcome, LearningRepository, LearningStats};

/// Default number of compare-and-swap attempts for an update
pub const DEFAULT_UPDATE_ATTEMPTS: u32 = 5;

/// Durable CRUD over learning records
pub struct LearningStore<R: LearningRepository> {
    repository: Arc<R>,
    max_update_attempts: u32,
}

impl<R: LearningRepository> Clone for LearningStore<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            max_update_attempts: self.max_update_attempts,
        }
    }
}

impl<R: LearningRepository> LearningStore<R> {
    /// Create a new learning store
    pub fn new(repository: Arc<R>) -> Self {
        Self {
            repository,
            max_update_attempts: DEFAULT_UPDATE_ATTEMPTS,
        }
    }

    /// Set how many times an update retries after losing a race
    pub fn with_max_update_attempts(mut self, attempts: u32) -> Self {
        self.max_update_attempts = attempts.max(1);
        self
    }

    /// Get the underlying repository
    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    /// Create a learning, or return the id already holding its natural key
    pub async fn create(&self, learning: Learning) -> Result<InsertOutcome> {
        learning.validate()?;

        let outcome = self.repository.insert_learning(&learning).await?;
        match &outcome {
            InsertOutcome::Created(id) => {
                info!(
                    learning_id = %id,
                    app = %learning.app,
                    scope = %learning.scope,
                    variant = %learning.variant(),
                    "Learning created"
                );
                record_event(
                    self.repository.as_ref(),
                    LearningEvent::created(id, &learning.app, learning.scope),
                )
                .await;
            }
            InsertOutcome::Existing(id) => {
                debug!(learning_id = %id, "Natural key already stored, create is a no-op");
            }
        }

        Ok(outcome)
    }

    /// Get a learning by ID
    pub async fn get(&self, id: &str) -> Result<Learning> {
        self.repository
            .get_learning(id)
            .await?
            .ok_or_else(|| Error::learning_not_found(id))
    }

    /// Apply a partial update
    ///
    /// The write is a compare-and-swap on the stored `updated_at`. Losing the
    /// race re-reads and re-applies, up to the configured attempt count.
    pub async fn update(&self, id: &str, update: &LearningUpdate) -> Result<Learning> {
        if update.is_empty() {
            return Err(Error::ValidationError("update contains no fields".into()));
        }

        for attempt in 1..=self.max_update_attempts {
            let current = self.get(id).await?;
            let mut next = current.clone();
            let changes = update.apply_to(&mut next);

            if changes.is_empty() {
                debug!(learning_id = %id, "Update matches stored values, nothing to write");
                return Ok(current);
            }

            next.updated_at = next_updated_at(current.updated_at, timestamp_now());
            next.validate()?;

            if self
                .repository
                .replace_learning(&next, current.updated_at)
                .await?
            {
                info!(learning_id = %id, changes = ?changes, "Learning updated");
                record_event(
                    self.repository.as_ref(),
                    LearningEvent::updated(id, changes),
                )
                .await;
                return Ok(next);
            }

            warn!(learning_id = %id, attempt, "Learning changed concurrently, retrying update");
        }

        Err(Error::Conflict(format!(
            "learning '{}' kept changing after {} attempts",
            id, self.max_update_attempts
        )))
    }

    /// Record that a consumer used a learning
    pub async fn mark_accessed(&self, id: &str) -> Result<()> {
        if !self.repository.mark_accessed(id, timestamp_now()).await? {
            return Err(Error::learning_not_found(id));
        }

        debug!(learning_id = %id, "Learning accessed");
        record_event(self.repository.as_ref(), LearningEvent::accessed(id)).await;
        Ok(())
    }

    /// Mark several learnings accessed, all or none
    ///
    /// Repeated ids count once. Fails with `NotFound` for the first unknown
    /// id without touching any counter.
    pub async fn mark_accessed_all(&self, ids: &[String]) -> Result<()> {
        let mut unique = ids.to_vec();
        unique.sort();
        unique.dedup();
        if unique.is_empty() {
            return Ok(());
        }

        let missing = self
            .repository
            .mark_accessed_all(&unique, timestamp_now())
            .await?;
        if let Some(id) = missing.into_iter().next() {
            return Err(Error::learning_not_found(id));
        }

        debug!(count = unique.len(), "Learnings accessed");
        for id in &unique {
            record_event(self.repository.as_ref(), LearningEvent::accessed(id)).await;
        }
        Ok(())
    }

    /// Soft-delete a learning; the record is kept
    pub async fn deactivate(&self, id: &str, reason: Option<String>) -> Result<()> {
        if !self.repository.deactivate_learning(id).await? {
            return Err(Error::learning_not_found(id));
        }

        info!(learning_id = %id, reason = ?reason, "Learning deactivated");
        record_event(
            self.repository.as_ref(),
            LearningEvent::deactivated(id, reason),
        )
        .await;
        Ok(())
    }

    /// Aggregate statistics, optionally for one app
    pub async fn stats(&self, app: Option<&str>) -> Result<LearningStats> {
        self.repository.learning_stats(app, timestamp_now()).await
    }

    /// Audit trail of a learning
    pub async fn history(&self, id: &str) -> Result<Vec<LearningEvent>> {
        self.get(id).await?;
        self.repository.list_events(id).await
    }

    /// Register a session so learnings can point at it
    pub async fn record_session(&self, session: &SessionRecord) -> Result<SessionRecord> {
        session.validate()?;
        let stored = self.repository.save_session(session).await?;
        debug!(session_id = %stored.id, app = %stored.app, "Session recorded");
        Ok(stored)
    }

    /// Get a session by ID
    pub async fn get_session(&self, id: &str) -> Result<SessionRecord> {
        self.repository
            .get_session(id)
            .await?
            .ok_or_else(|| Error::session_not_found(id))
    }
}

/// `updated_at` strictly increases so compare-and-swap always sees a change
fn next_updated_at(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let floor = previous + Duration::microseconds(1);
    if now > floor { now } else { floor }
}
