//! Audit events for learnings
//!
//! Events are appended to an append-only log keyed by learning id. They are
//! never replayed to rebuild state; they exist so operators can answer "what
//! happened to this learning and when".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::timestamp_now;

use super::edge::EdgeKind;
use super::entity::Scope;
use super::repository::LearningRepository;

/// Events that can occur to a learning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum LearningEvent {
    /// A new learning was created
    Created {
        learning_id: String,
        app: String,
        scope: Scope,
        timestamp: DateTime<Utc>,
    },
    /// Mutable fields changed
    Updated {
        learning_id: String,
        changes: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    /// A consumer used the learning
    Accessed {
        learning_id: String,
        timestamp: DateTime<Utc>,
    },
    /// Soft-deleted by an operator or caller
    Deactivated {
        learning_id: String,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// Marked inactive by the expiry sweep
    Expired {
        learning_id: String,
        timestamp: DateTime<Utc>,
    },
    /// An edge starting at this learning was added
    EdgeAdded {
        learning_id: String,
        edge_id: String,
        kind: EdgeKind,
        target_id: String,
        timestamp: DateTime<Utc>,
    },
    /// This learning was replaced by a newer one
    Superseded {
        learning_id: String,
        superseded_by: String,
        timestamp: DateTime<Utc>,
    },
}

impl LearningEvent {
    pub fn created(learning_id: impl Into<String>, app: impl Into<String>, scope: Scope) -> Self {
        Self::Created {
            learning_id: learning_id.into(),
            app: app.into(),
            scope,
            timestamp: timestamp_now(),
        }
    }

    pub fn updated(learning_id: impl Into<String>, changes: Vec<String>) -> Self {
        Self::Updated {
            learning_id: learning_id.into(),
            changes,
            timestamp: timestamp_now(),
        }
    }

    pub fn accessed(learning_id: impl Into<String>) -> Self {
        Self::Accessed {
            learning_id: learning_id.into(),
            timestamp: timestamp_now(),
        }
    }

    pub fn deactivated(learning_id: impl Into<String>, reason: Option<String>) -> Self {
        Self::Deactivated {
            learning_id: learning_id.into(),
            reason,
            timestamp: timestamp_now(),
        }
    }

    pub fn expired(learning_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::Expired {
            learning_id: learning_id.into(),
            timestamp,
        }
    }

    pub fn edge_added(
        learning_id: impl Into<String>,
        edge_id: impl Into<String>,
        kind: EdgeKind,
        target_id: impl Into<String>,
    ) -> Self {
        Self::EdgeAdded {
            learning_id: learning_id.into(),
            edge_id: edge_id.into(),
            kind,
            target_id: target_id.into(),
            timestamp: timestamp_now(),
        }
    }

    pub fn superseded(learning_id: impl Into<String>, superseded_by: impl Into<String>) -> Self {
        Self::Superseded {
            learning_id: learning_id.into(),
            superseded_by: superseded_by.into(),
            timestamp: timestamp_now(),
        }
    }

    /// Get the timestamp of the event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Created { timestamp, .. }
            | Self::Updated { timestamp, .. }
            | Self::Accessed { timestamp, .. }
            | Self::Deactivated { timestamp, .. }
            | Self::Expired { timestamp, .. }
            | Self::EdgeAdded { timestamp, .. }
            | Self::Superseded { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type name
    pub fn event_type_name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Updated { .. } => "updated",
            Self::Accessed { .. } => "accessed",
            Self::Deactivated { .. } => "deactivated",
            Self::Expired { .. } => "expired",
            Self::EdgeAdded { .. } => "edge_added",
            Self::Superseded { .. } => "superseded",
        }
    }

    /// The learning this event belongs to
    pub fn learning_id(&self) -> &str {
        match self {
            Self::Created { learning_id, .. }
            | Self::Updated { learning_id, .. }
            | Self::Accessed { learning_id, .. }
            | Self::Deactivated { learning_id, .. }
            | Self::Expired { learning_id, .. }
            | Self::EdgeAdded { learning_id, .. }
            | Self::Superseded { learning_id, .. } => learning_id,
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            Self::Created { app, scope, .. } => format!("created in {} ({} scope)", app, scope),
            Self::Updated { changes, .. } => format!("updated: {}", changes.join(", ")),
            Self::Accessed { .. } => "accessed".to_string(),
            Self::Deactivated { reason, .. } => match reason {
                Some(reason) => format!("deactivated: {}", reason),
                None => "deactivated".to_string(),
            },
            Self::Expired { .. } => "expired by sweep".to_string(),
            Self::EdgeAdded {
                kind, target_id, ..
            } => format!("{} {}", kind, target_id),
            Self::Superseded { superseded_by, .. } => format!("superseded by {}", superseded_by),
        }
    }
}

/// Append an event without failing the operation that produced it
pub(crate) async fn record_event<R: LearningRepository + ?Sized>(
    repository: &R,
    event: LearningEvent,
) {
    if let Err(e) = repository.append_event(&event).await {
        warn!(
            learning_id = %event.learning_id(),
            event_type = event.event_type_name(),
            error = %e,
            "Failed to record learning event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = LearningEvent::updated("l-1", vec!["importance".into()]);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "updated");
        assert_eq!(json["learning_id"], "l-1");

        let back: LearningEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_event_accessors() {
        let event = LearningEvent::superseded("old", "new");
        assert_eq!(event.learning_id(), "old");
        assert_eq!(event.event_type_name(), "superseded");
        assert_eq!(event.description(), "superseded by new");

        let edge = LearningEvent::edge_added("new", "e-1", EdgeKind::Supersedes, "old");
        assert_eq!(edge.description(), "supersedes old");
    }
}
