//! Application configuration infrastructure implementations

mod repository;

pub use repository::SqliteAppConfigRepository;
