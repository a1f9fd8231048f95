//! End-to-end retrieval
//!
//! Resolve -> expiry filter -> rank -> truncate, then mark every pair of
//! returned learnings joined by a `contradicts` edge. Both sides of a
//! conflict stay in the result; choosing a winner is left to the caller.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::domain::timestamp_now;
use crate::error::Result;

use super::entity::Learning;
use super::expiry::ExpiryManager;
use super::graph::ConsistencyGraph;
use super::ranking::{RetrievalRanker, ScoreBreakdown};
use super::repository::LearningRepository;
use super::scope::{ActorContext, ResolveOptions, ScopeResolver};
use super::store::LearningStore;

/// A retrieval request
#[derive(Debug, Clone, Default)]
pub struct RetrievalRequest {
    pub app: String,
    pub actor: ActorContext,
    /// Relevance per learning id from the similarity collaborator
    pub relevance: HashMap<String, f64>,
    pub limit: Option<usize>,
    pub include_historical: bool,
}

impl RetrievalRequest {
    pub fn new(app: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            ..Default::default()
        }
    }

    pub fn for_actor(mut self, actor: ActorContext) -> Self {
        self.actor = actor;
        self
    }

    pub fn with_relevance(mut self, relevance: HashMap<String, f64>) -> Self {
        self.relevance = relevance;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn historical(mut self) -> Self {
        self.include_historical = true;
        self
    }
}

/// One returned learning
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedLearning {
    pub learning: Learning,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    /// Ids of other returned learnings this one contradicts
    pub conflicts_with: Vec<String>,
}

impl RetrievedLearning {
    pub fn has_conflict(&self) -> bool {
        !self.conflicts_with.is_empty()
    }
}

/// Two returned learnings joined by a `contradicts` edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictPair {
    pub edge_id: String,
    pub left: String,
    pub right: String,
}

/// Ordered retrieval result
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub items: Vec<RetrievedLearning>,
    pub conflicts: Vec<ConflictPair>,
    /// Candidates that passed scope and expiry before truncation
    pub candidates: usize,
}

impl RetrievalResult {
    pub fn ids(&self) -> Vec<String> {
        self.items
            .iter()
            .map(|item| item.learning.id.clone())
            .collect()
    }
}

/// Composes resolver, expiry filter, ranker and conflict detection
pub struct RetrievalService<R: LearningRepository> {
    resolver: ScopeResolver<R>,
    graph: ConsistencyGraph<R>,
    store: LearningStore<R>,
    ranker: RetrievalRanker,
}

impl<R: LearningRepository + 'static> RetrievalService<R> {
    pub fn new(
        resolver: ScopeResolver<R>,
        graph: ConsistencyGraph<R>,
        store: LearningStore<R>,
        ranker: RetrievalRanker,
    ) -> Self {
        Self {
            resolver,
            graph,
            store,
            ranker,
        }
    }

    pub fn ranker(&self) -> &RetrievalRanker {
        &self.ranker
    }

    /// Retrieve as of now
    pub async fn retrieve(&self, request: &RetrievalRequest) -> Result<RetrievalResult> {
        self.retrieve_at(request, timestamp_now()).await
    }

    /// Retrieve as of `now`; has no side effects
    pub async fn retrieve_at(
        &self,
        request: &RetrievalRequest,
        now: DateTime<Utc>,
    ) -> Result<RetrievalResult> {
        let options = ResolveOptions {
            include_historical: request.include_historical,
        };
        let mut candidates = self
            .resolver
            .resolve_at(&request.app, &request.actor, options, now)
            .await?;
        if !request.include_historical {
            candidates = ExpiryManager::<R>::filter_expired(candidates, now);
        }
        let considered = candidates.len();

        let mut ranked = self.ranker.rank(candidates, &request.relevance, now);
        if let Some(limit) = request.limit {
            ranked.truncate(limit);
        }

        let ids: Vec<String> = ranked.iter().map(|r| r.learning.id.clone()).collect();
        let edges = self.graph.contradictions_among(&ids).await?;

        let mut markers: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        let mut conflicts = Vec::with_capacity(edges.len());
        for edge in &edges {
            markers
                .entry(edge.from_id.as_str())
                .or_default()
                .push(edge.to_id.clone());
            markers
                .entry(edge.to_id.as_str())
                .or_default()
                .push(edge.from_id.clone());
            conflicts.push(ConflictPair {
                edge_id: edge.id.clone(),
                left: edge.from_id.clone(),
                right: edge.to_id.clone(),
            });
        }

        let items = ranked
            .into_iter()
            .map(|r| {
                let mut conflicts_with = markers.remove(r.learning.id.as_str()).unwrap_or_default();
                conflicts_with.sort();
                RetrievedLearning {
                    learning: r.learning,
                    score: r.score,
                    breakdown: r.breakdown,
                    conflicts_with,
                }
            })
            .collect::<Vec<_>>();

        debug!(
            app = %request.app,
            candidates = considered,
            returned = items.len(),
            conflicts = conflicts.len(),
            "Retrieval complete"
        );

        Ok(RetrievalResult {
            items,
            conflicts,
            candidates: considered,
        })
    }

    /// Record that the caller used these results
    ///
    /// Either every id is marked accessed or, if one is unknown, none is.
    pub async fn consume(&self, ids: &[String]) -> Result<()> {
        self.store.mark_accessed_all(ids).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::learning::content::{LearningContent, TopicKnowledge};
    use crate::domain::learning::edge::EdgeKind;
    use crate::infrastructure::learning::SqliteLearningRepository;
    use crate::storage::Database;

    struct Fixture {
        store: LearningStore<SqliteLearningRepository>,
        graph: ConsistencyGraph<SqliteLearningRepository>,
        retrieval: RetrievalService<SqliteLearningRepository>,
    }

    async fn setup() -> Fixture {
        let db = Database::in_memory()
            .await
            .expect("Failed to create database");
        let repository = Arc::new(SqliteLearningRepository::new(db.pool().clone()));
        let retrieval = RetrievalService::new(
            ScopeResolver::new(Arc::clone(&repository)),
            ConsistencyGraph::new(Arc::clone(&repository)),
            LearningStore::new(Arc::clone(&repository)),
            RetrievalRanker::default(),
        );
        Fixture {
            store: LearningStore::new(Arc::clone(&repository)),
            graph: ConsistencyGraph::new(repository),
            retrieval,
        }
    }

    fn topic(insight: &str) -> LearningContent {
        LearningContent::TopicKnowledge(TopicKnowledge {
            topic: "billing".into(),
            insight: insight.into(),
            sources: Vec::new(),
        })
    }

    async fn create(fixture: &Fixture, learning: Learning) -> String {
        fixture.store.create(learning).await.unwrap().into_id()
    }

    #[tokio::test]
    async fn test_relevance_reorders_results() {
        let fixture = setup().await;
        let plain = create(&fixture, Learning::app_wide("horizon", topic("plain"))).await;
        let relevant = create(&fixture, Learning::app_wide("horizon", topic("relevant"))).await;

        let mut relevance = HashMap::new();
        relevance.insert(relevant.clone(), 1.0);
        let request = RetrievalRequest::new("horizon").with_relevance(relevance);

        let result = fixture.retrieval.retrieve(&request).await.unwrap();
        assert_eq!(result.ids(), vec![relevant, plain]);
        assert_eq!(result.candidates, 2);
        assert!(result.conflicts.is_empty());
    }

    #[tokio::test]
    async fn test_contradictions_marked_on_both_sides() {
        let fixture = setup().await;
        let a = create(
            &fixture,
            Learning::app_wide("horizon", topic("monthly")).with_importance(0.9),
        )
        .await;
        let b = create(
            &fixture,
            Learning::app_wide("horizon", topic("yearly")).with_importance(0.1),
        )
        .await;
        fixture
            .graph
            .add_edge(EdgeKind::Contradicts, &a, &b)
            .await
            .unwrap();

        let result = fixture
            .retrieval
            .retrieve(&RetrievalRequest::new("horizon"))
            .await
            .unwrap();

        assert_eq!(result.items.len(), 2);
        assert!(result.items.iter().all(RetrievedLearning::has_conflict));
        assert_eq!(result.items[0].conflicts_with, vec![b.clone()]);
        assert_eq!(result.items[1].conflicts_with, vec![a.clone()]);
        assert_eq!(result.conflicts.len(), 1);

        // A conflict is only reported when both sides are returned
        let truncated = fixture
            .retrieval
            .retrieve(&RetrievalRequest::new("horizon").with_limit(1))
            .await
            .unwrap();
        assert_eq!(truncated.ids(), vec![a]);
        assert!(truncated.conflicts.is_empty());
        assert!(!truncated.items[0].has_conflict());
    }

    #[tokio::test]
    async fn test_retrieve_is_read_only_until_consumed() {
        let fixture = setup().await;
        let id = create(
            &fixture,
            Learning::for_user("horizon", "richard", topic("net 30")),
        )
        .await;
        let request = RetrievalRequest::new("horizon").for_actor(ActorContext::user("richard"));

        let result = fixture.retrieval.retrieve(&request).await.unwrap();
        assert_eq!(result.ids(), vec![id.clone()]);
        assert_eq!(fixture.store.get(&id).await.unwrap().access_count, 0);

        fixture.retrieval.consume(&result.ids()).await.unwrap();
        let learning = fixture.store.get(&id).await.unwrap();
        assert_eq!(learning.access_count, 1);
        assert!(learning.last_accessed_at.is_some());
    }

    #[tokio::test]
    async fn test_consume_with_unknown_id_marks_nothing() {
        let fixture = setup().await;
        let id = create(&fixture, Learning::app_wide("horizon", topic("net 30"))).await;

        let result = fixture
            .retrieval
            .consume(&[id.clone(), "no-such-learning".to_string()])
            .await;
        assert!(matches!(result, Err(crate::error::Error::NotFound { .. })));
        assert_eq!(fixture.store.get(&id).await.unwrap().access_count, 0);

        fixture
            .retrieval
            .consume(&[id.clone(), id.clone()])
            .await
            .unwrap();
        assert_eq!(fixture.store.get(&id).await.unwrap().access_count, 1);
    }
}
