//! Sessions that learnings are derived from
//!
//! A session is only tracked as far as provenance needs: it is the target of
//! `derived_from` edges and the owner of session-scoped learnings and feedback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::timestamp_now;
use crate::error::{Error, Result};

/// A recorded session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub app: String,
    pub user_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// Create a session starting now
    pub fn new(id: impl Into<String>, app: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            app: app.into(),
            user_id: None,
            started_at: timestamp_now(),
            ended_at: None,
        }
    }

    /// Attribute the session to a user
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Mark the session as finished at the given time
    pub fn ended(mut self, ended_at: DateTime<Utc>) -> Self {
        self.ended_at = Some(ended_at);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::ValidationError(
                "session id must not be blank".into(),
            ));
        }
        if self.app.trim().is_empty() {
            return Err(Error::ValidationError(
                "session app must not be blank".into(),
            ));
        }
        if let Some(ended_at) = self.ended_at {
            if ended_at < self.started_at {
                return Err(Error::ValidationError(
                    "session ended_at is before started_at".into(),
                ));
            }
        }
        Ok(())
    }
}
