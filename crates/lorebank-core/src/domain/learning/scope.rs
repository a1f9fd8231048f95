//! Scope resolution
//!
//! Computes the candidate set of learnings an actor may see in an app:
//! every app-scoped learning, plus the actor's own user-scoped and
//! session-scoped ones.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::timestamp_now;
use crate::error::{Error, Result};

use super::entity::{Learning, Scope};
use super::repository::{LearningRepository, ScopeQuery};

/// Who is asking
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl ActorContext {
    /// An actor that only sees app-wide learnings
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Whether a learning's scope and owner make it visible to this actor in `app`
    pub fn can_see(&self, app: &str, learning: &Learning) -> bool {
        if learning.app != app {
            return false;
        }
        match learning.scope {
            Scope::App => true,
            Scope::User => owner_matches(&learning.owner_id, &self.user_id),
            Scope::Session => owner_matches(&learning.owner_id, &self.session_id),
        }
    }
}

fn owner_matches(owner: &Option<String>, actor: &Option<String>) -> bool {
    matches!((owner, actor), (Some(owner), Some(actor)) if owner == actor)
}

/// Options for a resolve call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveOptions {
    /// Include superseded, inactive and expired learnings (for audit)
    pub include_historical: bool,
}

impl ResolveOptions {
    pub fn historical() -> Self {
        Self {
            include_historical: true,
        }
    }
}

/// Resolves the visible candidate set for an (app, actor) pair
pub struct ScopeResolver<R: LearningRepository> {
    repository: Arc<R>,
}

impl<R: LearningRepository> Clone for ScopeResolver<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
        }
    }
}

impl<R: LearningRepository> ScopeResolver<R> {
    /// Create a new scope resolver
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    /// Resolve candidates as of now
    pub async fn resolve(
        &self,
        app: &str,
        actor: &ActorContext,
        options: ResolveOptions,
    ) -> Result<Vec<Learning>> {
        self.resolve_at(app, actor, options, timestamp_now()).await
    }

    /// Resolve candidates as of `now`
    pub async fn resolve_at(
        &self,
        app: &str,
        actor: &ActorContext,
        options: ResolveOptions,
        now: DateTime<Utc>,
    ) -> Result<Vec<Learning>> {
        if app.trim().is_empty() {
            return Err(Error::ValidationError("app must not be blank".into()));
        }

        let query = ScopeQuery {
            app: app.to_string(),
            user_id: actor.user_id.clone(),
            session_id: actor.session_id.clone(),
            include_historical: options.include_historical,
            now,
        };

        let candidates: Vec<Learning> = self
            .repository
            .list_visible(&query)
            .await?
            .into_iter()
            .filter(|learning| actor.can_see(app, learning))
            .filter(|learning| options.include_historical || learning.is_visible(now))
            .collect();

        debug!(
            app = %app,
            user_id = ?actor.user_id,
            session_id = ?actor.session_id,
            historical = options.include_historical,
            count = candidates.len(),
            "Resolved candidates"
        );

        Ok(candidates)
    }
}
