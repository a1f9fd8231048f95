//! Learning infrastructure implementations
//!
//! Concrete SQLite implementation of the learning repository trait.

mod repository;

pub use repository::SqliteLearningRepository;
