//! Infrastructure layer
//!
//! SQLite implementations of the domain repository traits, plus the small
//! helpers they share: timestamp encoding and retry of transient lock
//! conflicts.

pub mod app_config;
pub mod feedback;
pub mod learning;

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::warn;

use crate::error::{Error, Result};

/// Attempts made when the store reports `database is locked`
const MAX_BUSY_ATTEMPTS: u32 = 5;

/// Delay before the first retry; doubles on every further attempt
const INITIAL_BUSY_BACKOFF: Duration = Duration::from_millis(20);

/// Encode a timestamp so lexicographic order equals chronological order
pub(crate) fn to_db(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn to_db_opt(timestamp: Option<DateTime<Utc>>) -> Option<String> {
    timestamp.map(to_db)
}

/// Decode a stored timestamp
pub(crate) fn from_db(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("Invalid stored timestamp '{}': {}", value, e)))
}

pub(crate) fn from_db_opt(value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    value.map(from_db).transpose()
}

/// Run `operation`, retrying with backoff while the store is busy
pub(crate) async fn retry_on_busy<T, F, Fut>(operation: &'static str, mut run: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    let mut backoff = INITIAL_BUSY_BACKOFF;

    loop {
        match run().await {
            Err(e) if e.is_busy() && attempt < MAX_BUSY_ATTEMPTS => {
                warn!(operation, attempt, "Store busy, retrying");
                tokio::time::sleep(backoff).await;
                attempt += 1;
                backoff *= 2;
            }
            result => return result,
        }
    }
}
