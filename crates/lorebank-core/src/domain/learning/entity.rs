//! Learning entity and its scope rules
//!
//! A learning is a small unit of knowledge derived from user feedback. Its
//! visibility is decided by the (scope, owner_id) pair: app-wide learnings
//! have no owner, user and session learnings always have one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::domain::timestamp_now;
use crate::error::{Error, Result};

use super::content::{LearningContent, LearningVariant};

/// Visibility tier of a learning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Visible to one user across their sessions
    User,
    /// Visible only within one session
    Session,
    /// Visible to every actor of the owning application
    App,
}

impl Scope {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Session => "session",
            Self::App => "app",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" => Some(Self::User),
            "session" => Some(Self::Session),
            "app" | "application" => Some(Self::App),
            _ => None,
        }
    }

    /// Get all scopes
    pub fn all() -> &'static [Scope] {
        &[Self::User, Self::Session, Self::App]
    }

    /// Whether learnings in this scope must name an owner
    pub fn requires_owner(&self) -> bool {
        !matches!(self, Self::App)
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted unit of derived knowledge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Learning {
    /// Unique, immutable identifier
    pub id: String,
    /// Owning application
    pub app: String,
    pub scope: Scope,
    /// User or session id; absent for app scope
    pub owner_id: Option<String>,
    pub content: LearningContent,
    /// How much this learning should weigh in retrieval (0.0 to 1.0)
    pub importance: f64,
    /// How sure the extractor was (0.0 to 1.0)
    pub confidence: f64,
    /// Session the learning was extracted from, if any
    pub source_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub access_count: u64,
    pub last_accessed_at: Option<DateTime<Utc>>,
    /// Set once a newer learning supersedes this one
    pub superseded: bool,
    /// Cleared by soft-delete or the expiry sweep
    pub active: bool,
}

impl Learning {
    /// Create a new learning with the given scope and owner
    pub fn new(
        app: impl Into<String>,
        scope: Scope,
        owner_id: Option<String>,
        content: LearningContent,
    ) -> Self {
        let now = timestamp_now();

        Self {
            id: Uuid::new_v4().to_string(),
            app: app.into(),
            scope,
            owner_id,
            content,
            importance: 0.5,
            confidence: 0.5,
            source_session_id: None,
            created_at: now,
            updated_at: now,
            expires_at: None,
            access_count: 0,
            last_accessed_at: None,
            superseded: false,
            active: true,
        }
    }

    /// Create an app-wide learning
    pub fn app_wide(app: impl Into<String>, content: LearningContent) -> Self {
        Self::new(app, Scope::App, None, content)
    }

    /// Create a learning owned by a user
    pub fn for_user(
        app: impl Into<String>,
        user_id: impl Into<String>,
        content: LearningContent,
    ) -> Self {
        Self::new(app, Scope::User, Some(user_id.into()), content)
    }

    /// Create a learning owned by a session
    pub fn for_session(
        app: impl Into<String>,
        session_id: impl Into<String>,
        content: LearningContent,
    ) -> Self {
        Self::new(app, Scope::Session, Some(session_id.into()), content)
    }

    /// Use a caller-chosen id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set importance (validated on create, not clamped)
    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    /// Set confidence (validated on create, not clamped)
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Record the session this learning was extracted from
    pub fn from_session(mut self, session_id: impl Into<String>) -> Self {
        self.source_session_id = Some(session_id.into());
        self
    }

    /// Set an expiry time
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Override creation time (also resets `updated_at`)
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }

    /// The payload's variant tag
    pub fn variant(&self) -> LearningVariant {
        self.content.variant()
    }

    /// Key under which creation is idempotent
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            app: self.app.clone(),
            scope: self.scope,
            owner_id: self.owner_id.clone(),
            fingerprint: self.content.fingerprint(),
        }
    }

    /// Check scope pairing, bounds, timestamps and payload
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::ValidationError("id must not be blank".into()));
        }
        if self.app.trim().is_empty() {
            return Err(Error::ValidationError("app must not be blank".into()));
        }

        match (&self.owner_id, self.scope.requires_owner()) {
            (Some(owner), true) if owner.trim().is_empty() => {
                return Err(Error::ValidationError(format!(
                    "{} scope requires a non-blank owner_id",
                    self.scope
                )));
            }
            (None, true) => {
                return Err(Error::ValidationError(format!(
                    "{} scope requires an owner_id",
                    self.scope
                )));
            }
            (Some(_), false) => {
                return Err(Error::ValidationError(
                    "app scope must not have an owner_id".into(),
                ));
            }
            _ => {}
        }

        check_unit_interval("importance", self.importance)?;
        check_unit_interval("confidence", self.confidence)?;

        if let Some(expires_at) = self.expires_at {
            if expires_at < self.created_at {
                return Err(Error::ValidationError(format!(
                    "expires_at ({}) is before created_at ({})",
                    expires_at, self.created_at
                )));
            }
        }

        self.content.validate()
    }

    /// Whether `expires_at` has been reached
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Lifecycle status at a point in time
    pub fn status(&self, now: DateTime<Utc>) -> LearningStatus {
        if self.superseded {
            LearningStatus::Superseded
        } else if self.is_expired(now) {
            LearningStatus::Expired
        } else if !self.active {
            LearningStatus::Inactive
        } else {
            LearningStatus::Active
        }
    }

    /// Whether default retrieval may return this learning
    pub fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.status(now) == LearningStatus::Active
    }
}

fn check_unit_interval(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(Error::ValidationError(format!(
            "{} must be within [0, 1], got {}",
            field, value
        )));
    }
    Ok(())
}

/// (app, scope, owner_id, content fingerprint)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NaturalKey {
    pub app: String,
    pub scope: Scope,
    pub owner_id: Option<String>,
    pub fingerprint: String,
}

/// Retrieval visibility of a learning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningStatus {
    Active,
    /// Replaced by a newer learning; kept for audit
    Superseded,
    /// `expires_at` has passed
    Expired,
    /// Soft-deleted or swept
    Inactive,
}

impl LearningStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Superseded => "superseded",
            Self::Expired => "expired",
            Self::Inactive => "inactive",
        }
    }
}

impl std::fmt::Display for LearningStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Input accepted by the extraction collaborator and the CLI
#[derive(Debug, Clone, Deserialize)]
pub struct NewLearning {
    #[serde(default)]
    pub id: Option<String>,
    pub app: String,
    pub scope: Scope,
    #[serde(default)]
    pub owner_id: Option<String>,
    pub content: LearningContent,
    #[serde(default = "default_score")]
    pub importance: f64,
    #[serde(default = "default_score")]
    pub confidence: f64,
    #[serde(default)]
    pub source_session_id: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_score() -> f64 {
    0.5
}

impl NewLearning {
    /// Materialize into a learning stamped with the current time
    pub fn into_learning(self) -> Learning {
        let mut learning = Learning::new(self.app, self.scope, self.owner_id, self.content)
            .with_importance(self.importance)
            .with_confidence(self.confidence);
        if let Some(id) = self.id {
            learning.id = id;
        }
        learning.source_session_id = self.source_session_id;
        learning.expires_at = self.expires_at;
        learning
    }
}

/// Partial update of a learning's mutable fields
///
/// Double options distinguish "leave unchanged" (`None`) from "clear"
/// (`Some(None)`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LearningUpdate {
    #[serde(default)]
    pub scope: Option<Scope>,
    #[serde(default, deserialize_with = "double_option")]
    pub owner_id: Option<Option<String>>,
    #[serde(default)]
    pub content: Option<LearningContent>,
    #[serde(default)]
    pub importance: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default, deserialize_with = "double_option")]
    pub expires_at: Option<Option<DateTime<Utc>>>,
}

fn double_option<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl LearningUpdate {
    /// Move the learning to another scope/owner pair
    pub fn rescope(mut self, scope: Scope, owner_id: Option<String>) -> Self {
        self.scope = Some(scope);
        self.owner_id = Some(owner_id);
        self
    }

    pub fn content(mut self, content: LearningContent) -> Self {
        self.content = Some(content);
        self
    }

    pub fn importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn expires_at(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the update changes nothing
    pub fn is_empty(&self) -> bool {
        self.scope.is_none()
            && self.owner_id.is_none()
            && self.content.is_none()
            && self.importance.is_none()
            && self.confidence.is_none()
            && self.expires_at.is_none()
    }

    /// Apply onto a learning, returning the names of changed fields
    pub fn apply_to(&self, learning: &mut Learning) -> Vec<String> {
        let mut changes = Vec::new();

        if let Some(scope) = self.scope {
            if learning.scope != scope {
                learning.scope = scope;
                changes.push("scope".to_string());
            }
        }
        if let Some(owner_id) = &self.owner_id {
            if &learning.owner_id != owner_id {
                learning.owner_id = owner_id.clone();
                changes.push("owner_id".to_string());
            }
        }
        if let Some(content) = &self.content {
            if &learning.content != content {
                learning.content = content.clone();
                changes.push("content".to_string());
            }
        }
        if let Some(importance) = self.importance {
            if learning.importance != importance {
                learning.importance = importance;
                changes.push("importance".to_string());
            }
        }
        if let Some(confidence) = self.confidence {
            if learning.confidence != confidence {
                learning.confidence = confidence;
                changes.push("confidence".to_string());
            }
        }
        if let Some(expires_at) = self.expires_at {
            if learning.expires_at != expires_at {
                learning.expires_at = expires_at;
                changes.push("expires_at".to_string());
            }
        }

        changes
    }
}
