//! Lorebank Core Library
//!
//! A shared, scoped learning store for applications that learn from user
//! feedback:
//! - Learnings scoped to a user, a session or a whole app, keyed by content
//! - Consistency graph (supersedes, contradicts, supports, derived_from)
//! - Scope resolution and ranked retrieval with conflict markers
//! - Time-based expiry with a background sweeper
//! - Storage (SQLite, shared by several processes)

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod storage;

pub use app::AppContext;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::app::AppContext;
    pub use crate::config::Config;
    pub use crate::domain::learning::{
        ActorContext, EdgeKind, Learning, LearningContent, LearningUpdate, NewLearning,
        RetrievalRequest, Scope,
    };
    pub use crate::error::{Error, Result};
}
