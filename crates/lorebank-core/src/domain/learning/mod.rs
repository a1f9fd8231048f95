//! Learning domain module
//!
//! Shared, scoped knowledge derived from user feedback:
//!
//! - **LearningStore**: durable create/read/update with natural-key idempotency
//! - **ConsistencyGraph**: supersedes/contradicts/supports/derived_from edges
//! - **ScopeResolver**: visible candidates for an (app, actor) pair
//! - **RetrievalRanker**: relevance + recency + importance scoring
//! - **ExpiryManager**: sweep of time-expired learnings
//!
//! ## Retrieval flow
//!
//! ```text
//! ScopeResolver → ExpiryManager::filter_expired → RetrievalRanker → conflict markers
//!                                                                        ↓
//!                                          consume → LearningStore::mark_accessed
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lorebank_core::domain::learning::{ActorContext, Learning, RetrievalRequest};
//!
//! let id = ctx.store().create(Learning::for_user("horizon", "richard", content)).await?;
//!
//! let request = RetrievalRequest::new("horizon").for_actor(ActorContext::user("richard"));
//! let result = ctx.retrieval().retrieve(&request).await?;
//! ctx.retrieval().consume(&result.ids()).await?;
//! ```

mod content;
mod edge;
mod entity;
mod event;
mod expiry;
mod graph;
mod ranking;
mod repository;
mod retrieval;
mod scope;
mod store;

pub(crate) use content::fingerprint_of;
pub use content::{
    ArticleMemory, ContactPreference, EngagementSignal, LearningContent, LearningVariant,
    MessagePattern, ToneCalibration, TopicKnowledge, canonicalize,
};
pub use edge::{EdgeKind, LearningEdge, normalize_endpoints};
pub use entity::{Learning, LearningStatus, LearningUpdate, NaturalKey, NewLearning, Scope};
pub use event::LearningEvent;
pub use expiry::ExpiryManager;
pub use graph::ConsistencyGraph;
pub(crate) use ranking::half_life_from_hours;
pub use ranking::{
    DEFAULT_HALF_LIFE_HOURS, RankedLearning, RankingWeights, RetrievalRanker, ScoreBreakdown,
    decay, rank, score,
};
pub use repository::{
    EdgeInsertOutcome, InsertOutcome, LearningRepository, LearningStats, ScopeQuery,
};
pub use retrieval::{
    ConflictPair, RetrievalRequest, RetrievalResult, RetrievalService, RetrievedLearning,
};
pub use scope::{ActorContext, ResolveOptions, ScopeResolver};
pub use store::{DEFAULT_UPDATE_ATTEMPTS, LearningStore};
