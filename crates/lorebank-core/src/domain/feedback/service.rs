//! Feedback service

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::Result;

use super::entity::{Feedback, Pattern};
use super::repository::FeedbackRepository;

/// Records raw feedback and recurring patterns for the extraction pipeline
pub struct FeedbackService<R: FeedbackRepository> {
    repository: Arc<R>,
}

impl<R: FeedbackRepository> Clone for FeedbackService<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
        }
    }
}

impl<R: FeedbackRepository> FeedbackService<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    /// Capture feedback given during a session
    pub async fn submit(&self, feedback: &Feedback) -> Result<()> {
        feedback.validate()?;
        self.repository.insert_feedback(feedback).await?;
        info!(
            feedback_id = %feedback.id,
            session_id = %feedback.session_id,
            rating = feedback.rating,
            "Feedback recorded"
        );
        Ok(())
    }

    /// Note another occurrence of a pattern
    pub async fn observe(&self, pattern: &Pattern) -> Result<Pattern> {
        pattern.validate()?;
        let stored = self.repository.record_pattern(pattern).await?;
        debug!(
            pattern_id = %stored.id,
            pattern_type = %stored.pattern_type,
            occurrences = stored.occurrences,
            "Pattern observed"
        );
        Ok(stored)
    }

    pub async fn patterns(&self, app: &str, pattern_type: Option<&str>) -> Result<Vec<Pattern>> {
        self.repository.list_patterns(app, pattern_type).await
    }

    pub async fn session_feedback(&self, session_id: &str) -> Result<Vec<Feedback>> {
        self.repository.list_feedback_for_session(session_id).await
    }

    pub async fn learning_feedback(&self, learning_id: &str) -> Result<Vec<Feedback>> {
        self.repository
            .list_feedback_for_learning(learning_id)
            .await
    }
}
