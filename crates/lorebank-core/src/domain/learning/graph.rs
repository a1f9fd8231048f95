//! Consistency graph over learnings
//!
//! Maintains typed edges between learnings (and from learnings to their
//! source sessions). Supersession is directed newer -> older and must stay
//! acyclic; contradiction and support are symmetric bookkeeping. Conflicts
//! are only surfaced here, never resolved.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::edge::{EdgeKind, LearningEdge};
use super::entity::Learning;
use super::event::{LearningEvent, record_event};
use super::repository::{EdgeInsertOutcome, LearningRepository};

/// Service maintaining edges between learnings
pub struct ConsistencyGraph<R: LearningRepository> {
    repository: Arc<R>,
}

impl<R: LearningRepository> Clone for ConsistencyGraph<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
        }
    }
}

impl<R: LearningRepository> ConsistencyGraph<R> {
    /// Create a new consistency graph
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    /// Add an edge
    ///
    /// Re-adding an existing edge returns it unchanged. A `supersedes` edge
    /// that would close a cycle fails with `ConsistencyViolation` and leaves
    /// the graph exactly as it was.
    pub async fn add_edge(
        &self,
        kind: EdgeKind,
        from: &str,
        to: &str,
    ) -> Result<EdgeInsertOutcome> {
        if from.trim().is_empty() || to.trim().is_empty() {
            return Err(Error::ValidationError(
                "edge endpoints must not be blank".into(),
            ));
        }

        self.check_endpoints(kind, from, to).await?;

        let edge = LearningEdge::new(kind, from, to);
        let outcome = match self.repository.insert_edge(&edge).await {
            Ok(outcome) => outcome,
            Err(e @ Error::ConsistencyViolation(_)) => {
                warn!(kind = %kind, from = %from, to = %to, "Rejected edge: {}", e);
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        match &outcome {
            EdgeInsertOutcome::Created(stored) => {
                info!(
                    edge_id = %stored.id,
                    kind = %kind,
                    from = %stored.from_id,
                    to = %stored.to_id,
                    "Edge added"
                );
                record_event(
                    self.repository.as_ref(),
                    LearningEvent::edge_added(&stored.from_id, &stored.id, kind, &stored.to_id),
                )
                .await;
                if kind == EdgeKind::Supersedes {
                    info!(learning_id = %stored.to_id, superseded_by = %stored.from_id, "Learning superseded");
                    record_event(
                        self.repository.as_ref(),
                        LearningEvent::superseded(&stored.to_id, &stored.from_id),
                    )
                    .await;
                }
            }
            EdgeInsertOutcome::Existing(stored) => {
                debug!(edge_id = %stored.id, kind = %kind, "Edge already present");
            }
        }

        Ok(outcome)
    }

    async fn check_endpoints(&self, kind: EdgeKind, from: &str, to: &str) -> Result<()> {
        let source = self
            .repository
            .get_learning(from)
            .await?
            .ok_or_else(|| Error::learning_not_found(from))?;

        if !kind.targets_learning() {
            let session = self
                .repository
                .get_session(to)
                .await?
                .ok_or_else(|| Error::session_not_found(to))?;
            if session.app != source.app {
                return Err(Error::ValidationError(format!(
                    "learning '{}' belongs to '{}' but session '{}' belongs to '{}'",
                    from, source.app, to, session.app
                )));
            }
            return Ok(());
        }

        if from == to {
            return Err(if kind == EdgeKind::Supersedes {
                Error::ConsistencyViolation(format!("learning '{}' cannot supersede itself", from))
            } else {
                Error::ValidationError(format!("learning '{}' cannot {} itself", from, kind))
            });
        }

        let target = self
            .repository
            .get_learning(to)
            .await?
            .ok_or_else(|| Error::learning_not_found(to))?;
        if source.app != target.app {
            return Err(Error::ValidationError(format!(
                "cannot link learnings across apps ('{}' and '{}')",
                source.app, target.app
            )));
        }

        Ok(())
    }

    /// All edges touching a learning
    pub async fn edges_for(&self, id: &str) -> Result<Vec<LearningEdge>> {
        self.repository.list_edges_for(id).await
    }

    /// All edges, optionally of one kind
    pub async fn edges(&self, kind: Option<EdgeKind>) -> Result<Vec<LearningEdge>> {
        self.repository.list_edges(kind).await
    }

    /// Learnings replaced (directly or transitively) by `id`, nearest first
    pub async fn supersession_chain(&self, id: &str) -> Result<Vec<Learning>> {
        if self.repository.get_learning(id).await?.is_none() {
            return Err(Error::learning_not_found(id));
        }

        let ids = self.repository.supersession_descendants(id).await?;
        let mut chain = Vec::with_capacity(ids.len());
        for descendant in ids {
            if let Some(learning) = self.repository.get_learning(&descendant).await? {
                chain.push(learning);
            }
        }
        Ok(chain)
    }

    /// `contradicts` edges with both endpoints among `ids`
    pub async fn contradictions_among(&self, ids: &[String]) -> Result<Vec<LearningEdge>> {
        if ids.len() < 2 {
            return Ok(Vec::new());
        }
        self.repository
            .edges_among(EdgeKind::Contradicts, ids)
            .await
    }
}
