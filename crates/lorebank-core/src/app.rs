//! Process-wide application context
//!
//! Opens the shared database, makes sure this app has a configuration record
//! and wires the repositories into the learning services. Everything here is
//! cheap to clone and safe to share across tasks.

use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::domain::app_config::{AppConfig, AppConfigRepository};
use crate::domain::feedback::FeedbackService;
use crate::domain::learning::{
    ConsistencyGraph, ExpiryManager, LearningStore, RetrievalRanker, RetrievalService,
    ScopeResolver,
};
use crate::infrastructure::app_config::SqliteAppConfigRepository;
use crate::infrastructure::feedback::SqliteFeedbackRepository;
use crate::infrastructure::learning::SqliteLearningRepository;
use crate::storage::{Database, DatabaseConfig};

/// Services bound to one application's identity
#[derive(Clone)]
pub struct AppContext {
    database: Database,
    app_config: Arc<AppConfig>,
    config: Arc<Config>,
    store: LearningStore<SqliteLearningRepository>,
    graph: ConsistencyGraph<SqliteLearningRepository>,
    resolver: ScopeResolver<SqliteLearningRepository>,
    expiry: ExpiryManager<SqliteLearningRepository>,
    retrieval: Arc<RetrievalService<SqliteLearningRepository>>,
    feedback: FeedbackService<SqliteFeedbackRepository>,
}

impl AppContext {
    /// Open the configured database and register the app
    pub async fn initialize(config: Config) -> anyhow::Result<Self> {
        config.validate()?;

        let db_config = DatabaseConfig::with_path(config.database_path()?)
            .max_connections(config.database.max_connections);
        let database = Database::new(db_config).await?;

        Self::with_database(database, config).await
    }

    /// Build a context over an already opened database
    ///
    /// Migrations are applied if the database is behind. An app that is
    /// already registered keeps its stored version and model; use
    /// [`AppContext::register_app`] to overwrite them.
    pub async fn with_database(database: Database, config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        database.migrate().await?;

        let app_config = SqliteAppConfigRepository::new(database.pool().clone())
            .register_app_config(&config.app_config())
            .await
            .with_context(|| format!("Failed to register app '{}'", config.app.name))?;

        let ranker = RetrievalRanker::new(config.ranking_weights()?)?;

        let learnings = Arc::new(SqliteLearningRepository::new(database.pool().clone()));
        let feedback = Arc::new(SqliteFeedbackRepository::new(database.pool().clone()));

        let store = LearningStore::new(Arc::clone(&learnings));
        let graph = ConsistencyGraph::new(Arc::clone(&learnings));
        let resolver = ScopeResolver::new(Arc::clone(&learnings));
        let expiry = ExpiryManager::new(Arc::clone(&learnings));
        let retrieval =
            RetrievalService::new(resolver.clone(), graph.clone(), store.clone(), ranker);

        info!(
            app = %app_config.app,
            version = %app_config.version,
            database = %database.path().display(),
            "Application context ready"
        );

        Ok(Self {
            database,
            app_config: Arc::new(app_config),
            config: Arc::new(config),
            store,
            graph,
            resolver,
            expiry,
            retrieval: Arc::new(retrieval),
            feedback: FeedbackService::new(feedback),
        })
    }

    /// The registered configuration record of this app
    pub fn app_config(&self) -> Arc<AppConfig> {
        Arc::clone(&self.app_config)
    }

    /// Store the configured version, model and metadata for this app
    ///
    /// Returns the record now stored. The context's cached record is left as
    /// it was loaded.
    pub async fn register_app(&self) -> anyhow::Result<AppConfig> {
        let stored = SqliteAppConfigRepository::new(self.database.pool().clone())
            .upsert_app_config(&self.config.app_config())
            .await
            .with_context(|| format!("Failed to register app '{}'", self.config.app.name))?;
        Ok(stored)
    }

    /// Name of the app this context acts for
    pub fn app(&self) -> &str {
        &self.app_config.app
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn store(&self) -> &LearningStore<SqliteLearningRepository> {
        &self.store
    }

    pub fn graph(&self) -> &ConsistencyGraph<SqliteLearningRepository> {
        &self.graph
    }

    pub fn resolver(&self) -> &ScopeResolver<SqliteLearningRepository> {
        &self.resolver
    }

    pub fn expiry(&self) -> &ExpiryManager<SqliteLearningRepository> {
        &self.expiry
    }

    pub fn retrieval(&self) -> &RetrievalService<SqliteLearningRepository> {
        &self.retrieval
    }

    pub fn feedback(&self) -> &FeedbackService<SqliteFeedbackRepository> {
        &self.feedback
    }

    /// Start the periodic expiry sweep if one is configured
    pub fn start_expiry_sweeper(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        self.config
            .sweep_interval()
            .map(|every| self.expiry.spawn(every, cancel))
    }

    /// Close the database pool
    pub async fn shutdown(&self) {
        self.database.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn horizon_config() -> Config {
        let mut config = Config::default();
        config.set("app.name", "horizon").unwrap();
        config.set("app.version", "2.0.0").unwrap();
        config.set("app.model", "sonnet").unwrap();
        config
    }

    #[tokio::test]
    async fn test_context_registers_app() {
        let db = Database::in_memory().await.unwrap();
        let ctx = AppContext::with_database(db, horizon_config())
            .await
            .unwrap();

        assert_eq!(ctx.app(), "horizon");
        assert_eq!(ctx.app_config().model.as_deref(), Some("sonnet"));

        let stored = SqliteAppConfigRepository::new(ctx.database().pool().clone())
            .get_app_config("horizon")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, *ctx.app_config());
    }

    #[tokio::test]
    async fn test_reinitialize_is_idempotent() {
        let db = Database::in_memory().await.unwrap();
        let first = AppContext::with_database(db.clone(), horizon_config())
            .await
            .unwrap();
        let second = AppContext::with_database(db, horizon_config())
            .await
            .unwrap();

        assert_eq!(first.app_config(), second.app_config());
    }

    #[tokio::test]
    async fn test_second_context_keeps_registered_settings() {
        let db = Database::in_memory().await.unwrap();
        let first = AppContext::with_database(db.clone(), horizon_config())
            .await
            .unwrap();

        // What the CLI builds for `--app horizon` on an otherwise default config
        let mut bare = Config::default();
        bare.set("app.name", "horizon").unwrap();
        let second = AppContext::with_database(db, bare).await.unwrap();

        assert_eq!(second.app_config(), first.app_config());
        assert_eq!(second.app_config().version, "2.0.0");
        assert_eq!(second.app_config().model.as_deref(), Some("sonnet"));

        let refreshed = second.register_app().await.unwrap();
        assert_eq!(refreshed.version, env!("CARGO_PKG_VERSION"));
        assert!(refreshed.model.is_none());
    }

    #[tokio::test]
    async fn test_initialize_opens_configured_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = horizon_config();
        let path = dir.path().join("store.db");
        config.set("database.path", path.to_str().unwrap()).unwrap();

        let ctx = AppContext::initialize(config).await.unwrap();
        assert!(path.exists());
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweeper_disabled_by_zero_interval() {
        let db = Database::in_memory().await.unwrap();
        let mut config = horizon_config();
        config.set("expiry.sweep_interval_secs", "0").unwrap();
        let ctx = AppContext::with_database(db, config).await.unwrap();

        assert!(ctx.start_expiry_sweeper(CancellationToken::new()).is_none());
    }
}
