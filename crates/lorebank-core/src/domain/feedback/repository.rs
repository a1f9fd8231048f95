//! Repository trait for feedback and pattern persistence

use async_trait::async_trait;

use crate::error::Result;

use super::entity::{Feedback, Pattern};

/// Repository trait for feedback and recurring patterns
#[async_trait]
pub trait FeedbackRepository: Send + Sync {
    /// Insert a pattern, or bump `occurrences` and `last_seen_at` of the stored one
    ///
    /// Returns the stored pattern after the write.
    async fn record_pattern(&self, pattern: &Pattern) -> Result<Pattern>;

    /// Get a pattern by ID
    async fn get_pattern(&self, id: &str) -> Result<Option<Pattern>>;

    /// List patterns of an app, most frequent first
    async fn list_patterns(&self, app: &str, pattern_type: Option<&str>) -> Result<Vec<Pattern>>;

    /// Insert feedback; the session must exist
    async fn insert_feedback(&self, feedback: &Feedback) -> Result<()>;

    /// Feedback captured in a session, oldest first
    async fn list_feedback_for_session(&self, session_id: &str) -> Result<Vec<Feedback>>;

    /// Feedback about a learning, oldest first
    async fn list_feedback_for_learning(&self, learning_id: &str) -> Result<Vec<Feedback>>;
}
