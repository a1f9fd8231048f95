//! Database migrations
//!
//! Handles schema versioning and migrations for the learning store.
//! Every timestamp column holds RFC 3339 text in UTC with microsecond
//! precision, so string comparison in SQL matches chronological order.

use sqlx::{Executor, SqliteConnection, SqlitePool};
use tracing::{info, warn};

/// Current schema version
pub const CURRENT_VERSION: i32 = 2;

/// Migration table schema
const CREATE_MIGRATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;

/// Version 1: learnings, sessions, consistency edges and the audit trail
const MIGRATION_V1: &str = r#"
-- Learnings (one row per remembered fact, keyed by id and by natural key)
CREATE TABLE IF NOT EXISTS learnings (
    id TEXT PRIMARY KEY,
    app TEXT NOT NULL,
    scope TEXT NOT NULL CHECK(scope IN ('user', 'session', 'app')),
    owner_id TEXT,
    variant TEXT NOT NULL,
    content TEXT NOT NULL,  -- JSON, tagged by variant
    fingerprint TEXT NOT NULL,
    importance REAL NOT NULL DEFAULT 0.5 CHECK(importance BETWEEN 0.0 AND 1.0),
    confidence REAL NOT NULL DEFAULT 0.5 CHECK(confidence BETWEEN 0.0 AND 1.0),
    source_session_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    expires_at TEXT,
    access_count INTEGER NOT NULL DEFAULT 0 CHECK(access_count >= 0),
    last_accessed_at TEXT,
    superseded INTEGER NOT NULL DEFAULT 0,
    active INTEGER NOT NULL DEFAULT 1,
    CHECK((scope = 'app') = (owner_id IS NULL)),
    CHECK(expires_at IS NULL OR expires_at >= created_at)
);

-- Natural key: the same fact is stored once per app, scope and owner
CREATE UNIQUE INDEX IF NOT EXISTS idx_learnings_natural_key
    ON learnings(app, scope, COALESCE(owner_id, ''), fingerprint);
CREATE INDEX IF NOT EXISTS idx_learnings_app_scope_owner ON learnings(app, scope, owner_id);
CREATE INDEX IF NOT EXISTS idx_learnings_app ON learnings(app);
CREATE INDEX IF NOT EXISTS idx_learnings_created ON learnings(created_at);
CREATE INDEX IF NOT EXISTS idx_learnings_expires ON learnings(expires_at) WHERE expires_at IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_learnings_variant ON learnings(variant);

-- Sessions learnings can be derived from
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    app TEXT NOT NULL,
    user_id TEXT,
    started_at TEXT NOT NULL,
    ended_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_sessions_app ON sessions(app);

-- Consistency edges between learnings (derived_from points at a session)
CREATE TABLE IF NOT EXISTS learning_edges (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL CHECK(kind IN ('derived_from', 'supersedes', 'contradicts', 'supports')),
    from_id TEXT NOT NULL REFERENCES learnings(id) ON DELETE CASCADE,
    to_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(kind, from_id, to_id),
    CHECK(kind = 'derived_from' OR from_id != to_id)
);

-- A learning derives from at most one session
CREATE UNIQUE INDEX IF NOT EXISTS idx_edges_single_origin
    ON learning_edges(from_id) WHERE kind = 'derived_from';
CREATE INDEX IF NOT EXISTS idx_edges_kind_to ON learning_edges(kind, to_id);
CREATE INDEX IF NOT EXISTS idx_edges_from ON learning_edges(from_id);
CREATE INDEX IF NOT EXISTS idx_edges_to ON learning_edges(to_id);

-- Append-only audit trail
CREATE TABLE IF NOT EXISTS learning_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    learning_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    payload TEXT NOT NULL,  -- JSON
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_learning_events_learning ON learning_events(learning_id, id);
"#;

/// Version 2: per-app configuration, observed patterns and feedback
const MIGRATION_V2: &str = r#"
CREATE TABLE IF NOT EXISTS app_configs (
    app TEXT PRIMARY KEY,
    version TEXT NOT NULL,
    model TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',  -- JSON object
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS patterns (
    id TEXT PRIMARY KEY,
    app TEXT NOT NULL,
    pattern_type TEXT NOT NULL,
    description TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    occurrences INTEGER NOT NULL DEFAULT 1 CHECK(occurrences >= 1),
    first_seen_at TEXT NOT NULL,
    last_seen_at TEXT NOT NULL,
    UNIQUE(app, pattern_type, fingerprint)
);

CREATE INDEX IF NOT EXISTS idx_patterns_type ON patterns(app, pattern_type);

CREATE TABLE IF NOT EXISTS feedback (
    id TEXT PRIMARY KEY,
    app TEXT NOT NULL,
    session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    learning_id TEXT REFERENCES learnings(id) ON DELETE SET NULL,
    rating REAL NOT NULL CHECK(rating BETWEEN -1.0 AND 1.0),
    comment TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_feedback_session ON feedback(session_id);
CREATE INDEX IF NOT EXISTS idx_feedback_learning ON feedback(learning_id);
"#;

/// Get the current schema version from the database
async fn get_current_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    let row: Option<(Option<i32>,)> = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_optional(pool)
        .await?;

    Ok(row.and_then(|(v,)| v).unwrap_or(0))
}

/// Run all pending migrations
///
/// Each version is applied under `BEGIN IMMEDIATE` and the recorded version
/// is re-read inside that transaction, so processes opening the same fresh
/// file concurrently apply every migration exactly once.
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let migrations = [
        (1, "learnings, sessions, edges, events", MIGRATION_V1),
        (2, "app configs, patterns, feedback", MIGRATION_V2),
    ];

    for (version, description, sql) in migrations {
        apply_migration(pool, version, description, sql).await?;
    }

    Ok(())
}

/// Apply one migration unless another connection already has
async fn apply_migration(
    pool: &SqlitePool,
    version: i32,
    description: &str,
    sql: &str,
) -> anyhow::Result<bool> {
    let mut conn = pool.acquire().await?;
    (&mut *conn)
        .execute(sqlx::raw_sql("BEGIN IMMEDIATE"))
        .await?;

    match apply_locked(&mut conn, version, description, sql).await {
        Ok(applied) => {
            (&mut *conn).execute(sqlx::raw_sql("COMMIT")).await?;
            Ok(applied)
        }
        Err(e) => {
            if let Err(rollback) = (&mut *conn).execute(sqlx::raw_sql("ROLLBACK")).await {
                warn!(version, error = %rollback, "Failed to roll back migration");
            }
            Err(e)
        }
    }
}

async fn apply_locked(
    conn: &mut SqliteConnection,
    version: i32,
    description: &str,
    sql: &str,
) -> anyhow::Result<bool> {
    (&mut *conn)
        .execute(sqlx::raw_sql(CREATE_MIGRATIONS_TABLE))
        .await?;

    let (current,): (Option<i32>,) = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_one(&mut *conn)
        .await?;
    if current.unwrap_or(0) >= version {
        return Ok(false);
    }

    info!("Applying migration v{} ({})", version, description);
    (&mut *conn).execute(sqlx::raw_sql(sql)).await?;
    sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
        .bind(version)
        .execute(&mut *conn)
        .await?;
    Ok(true)
}

/// Check if the database needs migrations
pub async fn needs_migration(pool: &SqlitePool) -> anyhow::Result<bool> {
    let current_version = get_current_version(pool).await?;
    Ok(current_version < CURRENT_VERSION)
}

/// Get migration status information
pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = get_current_version(pool).await?;
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
    })
}

/// Migration status information
#[derive(Debug, Clone, serde::Serialize)]
pub struct MigrationStatus {
    /// Current schema version in the database
    pub current_version: i32,
    /// Target schema version (latest)
    pub target_version: i32,
    /// Whether migrations need to be run
    pub needs_migration: bool,
}
