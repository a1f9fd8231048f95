//! SQLite implementation of the AppConfigRepository

use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, info};

use crate::domain::app_config::{AppConfig, AppConfigRepository};
use crate::error::{Error, Result};
use crate::infrastructure::{from_db, retry_on_busy, to_db};

/// SQLite implementation of the app config repository
#[derive(Clone)]
pub struct SqliteAppConfigRepository {
    pool: SqlitePool,
}

impl SqliteAppConfigRepository {
    /// Create a new SQLite app config repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AppConfigRepository for SqliteAppConfigRepository {
    async fn upsert_app_config(&self, config: &AppConfig) -> Result<AppConfig> {
        if let Some(stored) = self.get_app_config(&config.app).await? {
            if stored.same_settings(config) {
                debug!(app = %config.app, "App config unchanged");
                return Ok(stored);
            }
        }

        let metadata = serde_json::to_string(&config.metadata)
            .map_err(|e| Error::serialization("app config metadata", e))?;

        retry_on_busy("upsert_app_config", || async {
            sqlx::query(
                r#"
                INSERT INTO app_configs (app, version, model, metadata, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(app) DO UPDATE SET
                    version = excluded.version,
                    model = excluded.model,
                    metadata = excluded.metadata,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&config.app)
            .bind(&config.version)
            .bind(&config.model)
            .bind(&metadata)
            .bind(to_db(config.created_at))
            .bind(to_db(config.updated_at))
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await?;

        info!(app = %config.app, version = %config.version, "App config stored");

        self.get_app_config(&config.app).await?.ok_or_else(|| {
            Error::Other(format!("App config '{}' vanished after upsert", config.app))
        })
    }

    async fn register_app_config(&self, config: &AppConfig) -> Result<AppConfig> {
        let metadata = serde_json::to_string(&config.metadata)
            .map_err(|e| Error::serialization("app config metadata", e))?;

        let inserted = retry_on_busy("register_app_config", || async {
            let result = sqlx::query(
                r#"
                INSERT INTO app_configs (app, version, model, metadata, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(app) DO NOTHING
                "#,
            )
            .bind(&config.app)
            .bind(&config.version)
            .bind(&config.model)
            .bind(&metadata)
            .bind(to_db(config.created_at))
            .bind(to_db(config.updated_at))
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
        .await?;

        if inserted {
            info!(app = %config.app, version = %config.version, "App registered");
        }

        self.get_app_config(&config.app).await?.ok_or_else(|| {
            Error::Other(format!("App config '{}' vanished after insert", config.app))
        })
    }

    async fn get_app_config(&self, app: &str) -> Result<Option<AppConfig>> {
        let row: Option<AppConfigRow> = sqlx::query_as("SELECT * FROM app_configs WHERE app = ?")
            .bind(app)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_app_config()).transpose()
    }
}

#[derive(FromRow)]
struct AppConfigRow {
    app: String,
    version: String,
    model: Option<String>,
    metadata: String,
    created_at: String,
    updated_at: String,
}

impl AppConfigRow {
    fn into_app_config(self) -> Result<AppConfig> {
        let metadata = serde_json::from_str(&self.metadata)
            .map_err(|e| Error::serialization("app config metadata", e))?;

        Ok(AppConfig {
            app: self.app,
            version: self.version,
            model: self.model,
            metadata,
            created_at: from_db(&self.created_at)?,
            updated_at: from_db(&self.updated_at)?,
        })
    }
}
