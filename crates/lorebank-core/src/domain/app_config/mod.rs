//! Per-application configuration record
//!
//! Each application sharing the store has exactly one `AppConfig` row. It is
//! upserted once at startup by `AppContext::initialize` and read-only after
//! that; there is no other mutation path.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::timestamp_now;
use crate::error::{Error, Result};

/// Identity and model metadata of an application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub app: String,
    pub version: String,
    /// Model label the app extracts learnings with
    pub model: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AppConfig {
    pub fn new(app: impl Into<String>, version: impl Into<String>) -> Self {
        let now = timestamp_now();
        Self {
            app: app.into(),
            version: version.into(),
            model: None,
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.app.trim().is_empty() {
            return Err(Error::ValidationError("app name must not be blank".into()));
        }
        if self.version.trim().is_empty() {
            return Err(Error::ValidationError(
                "app version must not be blank".into(),
            ));
        }
        Ok(())
    }

    /// Whether two records describe the same configuration, ignoring timestamps
    pub fn same_settings(&self, other: &AppConfig) -> bool {
        self.app == other.app
            && self.version == other.version
            && self.model == other.model
            && self.metadata == other.metadata
    }
}

/// Repository trait for application configuration records
#[async_trait]
pub trait AppConfigRepository: Send + Sync {
    /// Insert or refresh the record for `config.app`
    ///
    /// Identical settings leave the stored row (and its timestamps) untouched.
    async fn upsert_app_config(&self, config: &AppConfig) -> Result<AppConfig>;

    /// Insert the record for `config.app` only if none exists yet
    ///
    /// Returns the stored record, which keeps its settings when the app was
    /// already registered.
    async fn register_app_config(&self, config: &AppConfig) -> Result<AppConfig>;

    /// Get the record for an app
    async fn get_app_config(&self, app: &str) -> Result<Option<AppConfig>>;
}
