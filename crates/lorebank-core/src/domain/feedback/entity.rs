//! Feedback and recurring pattern entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::learning::{canonicalize, fingerprint_of};
use crate::domain::timestamp_now;
use crate::error::{Error, Result};

/// Raw user feedback captured during a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub id: String,
    pub app: String,
    pub session_id: String,
    /// The learning the feedback is about, if any
    pub learning_id: Option<String>,
    /// -1.0 (negative) to 1.0 (positive)
    pub rating: f64,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Feedback {
    pub fn new(app: impl Into<String>, session_id: impl Into<String>, rating: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            app: app.into(),
            session_id: session_id.into(),
            learning_id: None,
            rating,
            comment: None,
            created_at: timestamp_now(),
        }
    }

    pub fn about(mut self, learning_id: impl Into<String>) -> Self {
        self.learning_id = Some(learning_id.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.app.trim().is_empty() || self.session_id.trim().is_empty() {
            return Err(Error::ValidationError(
                "feedback requires an app and a session".into(),
            ));
        }
        if !self.rating.is_finite() || !(-1.0..=1.0).contains(&self.rating) {
            return Err(Error::ValidationError(format!(
                "rating must be within [-1, 1], got {}",
                self.rating
            )));
        }
        Ok(())
    }

    pub fn is_positive(&self) -> bool {
        self.rating > 0.0
    }
}

/// Recurring behaviour observed across sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub app: String,
    pub pattern_type: String,
    pub description: String,
    pub occurrences: u64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Pattern {
    /// A pattern seen once, now
    pub fn new(
        app: impl Into<String>,
        pattern_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let now = timestamp_now();
        Self {
            id: Uuid::new_v4().to_string(),
            app: app.into(),
            pattern_type: pattern_type.into(),
            description: description.into(),
            occurrences: 1,
            first_seen_at: now,
            last_seen_at: now,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.app.trim().is_empty() {
            return Err(Error::ValidationError(
                "pattern app must not be blank".into(),
            ));
        }
        if self.pattern_type.trim().is_empty() {
            return Err(Error::ValidationError(
                "pattern_type must not be blank".into(),
            ));
        }
        if self.description.trim().is_empty() {
            return Err(Error::ValidationError(
                "pattern description must not be blank".into(),
            ));
        }
        Ok(())
    }

    /// Identity of the description within (app, pattern_type)
    pub fn fingerprint(&self) -> String {
        fingerprint_of("pattern", &[canonicalize(&self.description)])
    }
}
