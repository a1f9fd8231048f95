//! Feedback domain module
//!
//! Raw feedback and recurring patterns are the inputs the extraction
//! pipeline turns into learnings. They are stored here so provenance can be
//! traced back from a learning to the session and feedback it came from.

mod entity;
mod repository;
mod service;

pub use entity::{Feedback, Pattern};
pub use repository::FeedbackRepository;
pub use service::FeedbackService;
