//! Domain layer
//!
//! Contains the core business logic and domain models.

pub mod app_config;
pub mod feedback;
pub mod learning;
pub mod session;

use chrono::{DateTime, SubsecRound, Utc};

/// Current time truncated to the precision the store persists (microseconds)
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
