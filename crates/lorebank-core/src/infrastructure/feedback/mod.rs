//! Feedback infrastructure implementations

mod repository;

pub use repository::SqliteFeedbackRepository;
