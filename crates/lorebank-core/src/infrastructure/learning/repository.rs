//! SQLite implementation of the LearningRepository
//!
//! Uniqueness is left to the schema (primary key plus the natural-key
//! expression index) so concurrent writers resolve races in the store, and
//! supersession uses a recursive CTE inside the inserting transaction.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use crate::domain::learning::{
    EdgeInsertOutcome, EdgeKind, InsertOutcome, Learning, LearningContent, LearningEdge,
    LearningEvent, LearningRepository, LearningStats, NaturalKey, Scope, ScopeQuery,
};
use crate::domain::session::SessionRecord;
use crate::error::{Error, Result};
use crate::infrastructure::{from_db, from_db_opt, retry_on_busy, to_db, to_db_opt};

/// SQLite implementation of the learning repository
#[derive(Clone)]
pub struct SqliteLearningRepository {
    pool: SqlitePool,
}

impl SqliteLearningRepository {
    /// Create a new SQLite learning repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn try_insert_learning(&self, learning: &Learning) -> Result<InsertOutcome> {
        let key = learning.natural_key();
        if let Some(id) = self.find_by_natural_key(&key).await? {
            return Ok(InsertOutcome::Existing(id));
        }

        let content = serde_json::to_string(&learning.content)
            .map_err(|e| Error::serialization("learning content", e))?;

        let result = sqlx::query(
            r#"
            INSERT INTO learnings (
                id, app, scope, owner_id, variant, content, fingerprint,
                importance, confidence, source_session_id,
                created_at, updated_at, expires_at,
                access_count, last_accessed_at, superseded, active
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&learning.id)
        .bind(&learning.app)
        .bind(learning.scope.as_str())
        .bind(&learning.owner_id)
        .bind(learning.variant().as_str())
        .bind(&content)
        .bind(&key.fingerprint)
        .bind(learning.importance)
        .bind(learning.confidence)
        .bind(&learning.source_session_id)
        .bind(to_db(learning.created_at))
        .bind(to_db(learning.updated_at))
        .bind(to_db_opt(learning.expires_at))
        .bind(learning.access_count as i64)
        .bind(to_db_opt(learning.last_accessed_at))
        .bind(learning.superseded)
        .bind(learning.active)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(learning_id = %learning.id, fingerprint = %key.fingerprint, "Learning inserted");
                Ok(InsertOutcome::Created(learning.id.clone()))
            }
            // Lost a race: either another writer took the natural key, or the id is taken
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                match self.find_by_natural_key(&key).await? {
                    Some(id) => Ok(InsertOutcome::Existing(id)),
                    None => Err(Error::DuplicateKey(format!(
                        "learning id '{}'",
                        learning.id
                    ))),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn try_replace_learning(
        &self,
        learning: &Learning,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let content = serde_json::to_string(&learning.content)
            .map_err(|e| Error::serialization("learning content", e))?;

        let result = sqlx::query(
            r#"
            UPDATE learnings SET
                scope = ?, owner_id = ?, variant = ?, content = ?, fingerprint = ?,
                importance = ?, confidence = ?, expires_at = ?, updated_at = ?
            WHERE id = ? AND updated_at = ?
            "#,
        )
        .bind(learning.scope.as_str())
        .bind(&learning.owner_id)
        .bind(learning.variant().as_str())
        .bind(&content)
        .bind(learning.content.fingerprint())
        .bind(learning.importance)
        .bind(learning.confidence)
        .bind(to_db_opt(learning.expires_at))
        .bind(to_db(learning.updated_at))
        .bind(&learning.id)
        .bind(to_db(expected_updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected() > 0),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(Error::DuplicateKey(format!(
                    "natural key of learning '{}' (another learning has the same content)",
                    learning.id
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn try_mark_accessed_all(&self, ids: &[String], now: &str) -> Result<Vec<String>> {
        let encoded =
            serde_json::to_string(ids).map_err(|e| Error::serialization("learning ids", e))?;
        let mut tx = self.pool.begin().await?;

        // Write first so the transaction holds the write lock from its first statement
        let updated: Vec<(String,)> = sqlx::query_as(
            r#"
            UPDATE learnings
            SET access_count = access_count + 1, last_accessed_at = ?2
            WHERE id IN (SELECT value FROM json_each(?1))
            RETURNING id
            "#,
        )
        .bind(&encoded)
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let updated: HashSet<String> = updated.into_iter().map(|(id,)| id).collect();
        let missing: Vec<String> = ids
            .iter()
            .filter(|id| !updated.contains(id.as_str()))
            .cloned()
            .collect();

        if missing.is_empty() {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }
        Ok(missing)
    }

    async fn try_insert_edge(&self, edge: &LearningEdge) -> Result<EdgeInsertOutcome> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO learning_edges (id, kind, from_id, to_id, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(kind, from_id, to_id) DO NOTHING
            "#,
        )
        .bind(&edge.id)
        .bind(edge.kind.as_str())
        .bind(&edge.from_id)
        .bind(&edge.to_id)
        .bind(to_db(edge.created_at))
        .execute(&mut *tx)
        .await;

        let rows = match inserted {
            Ok(done) => done.rows_affected(),
            Err(sqlx::Error::Database(db))
                if db.is_unique_violation() && edge.kind == EdgeKind::DerivedFrom =>
            {
                tx.rollback().await?;
                return Err(Error::ValidationError(format!(
                    "learning '{}' already derives from another session",
                    edge.from_id
                )));
            }
            Err(e) => return Err(e.into()),
        };

        if rows == 0 {
            let row: EdgeRow = sqlx::query_as(
                "SELECT * FROM learning_edges WHERE kind = ? AND from_id = ? AND to_id = ?",
            )
            .bind(edge.kind.as_str())
            .bind(&edge.from_id)
            .bind(&edge.to_id)
            .fetch_one(&mut *tx)
            .await?;
            tx.rollback().await?;
            return Ok(EdgeInsertOutcome::Existing(row.into_edge()?));
        }

        if edge.kind == EdgeKind::Supersedes {
            // The new edge is already visible to this transaction, so reaching
            // `from` again from `to` means the edge closes a cycle.
            let (closes_cycle,): (i64,) = sqlx::query_as(
                r#"
                WITH RECURSIVE reachable(id) AS (
                    SELECT ?1
                    UNION
                    SELECT e.to_id
                    FROM learning_edges e
                    JOIN reachable r ON e.from_id = r.id
                    WHERE e.kind = 'supersedes'
                )
                SELECT EXISTS(SELECT 1 FROM reachable WHERE id = ?2)
                "#,
            )
            .bind(&edge.to_id)
            .bind(&edge.from_id)
            .fetch_one(&mut *tx)
            .await?;

            if closes_cycle != 0 {
                tx.rollback().await?;
                return Err(Error::ConsistencyViolation(format!(
                    "'{}' supersedes '{}' would close a supersession cycle",
                    edge.from_id, edge.to_id
                )));
            }

            sqlx::query("UPDATE learnings SET superseded = 1 WHERE id = ?")
                .bind(&edge.to_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(EdgeInsertOutcome::Created(edge.clone()))
    }
}

#[async_trait]
impl LearningRepository for SqliteLearningRepository {
    // ========== Learning Operations ==========

    async fn insert_learning(&self, learning: &Learning) -> Result<InsertOutcome> {
        retry_on_busy("insert_learning", move || {
            self.try_insert_learning(learning)
        })
        .await
    }

    async fn get_learning(&self, id: &str) -> Result<Option<Learning>> {
        let row: Option<LearningRow> = sqlx::query_as("SELECT * FROM learnings WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_learning()).transpose()
    }

    async fn find_by_natural_key(&self, key: &NaturalKey) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT id FROM learnings
            WHERE app = ? AND scope = ? AND COALESCE(owner_id, '') = ? AND fingerprint = ?
            "#,
        )
        .bind(&key.app)
        .bind(key.scope.as_str())
        .bind(key.owner_id.as_deref().unwrap_or(""))
        .bind(&key.fingerprint)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id,)| id))
    }

    async fn replace_learning(
        &self,
        learning: &Learning,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        retry_on_busy("replace_learning", move || {
            self.try_replace_learning(learning, expected_updated_at)
        })
        .await
    }

    async fn mark_accessed(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let now = to_db(now);
        retry_on_busy("mark_accessed", || async {
            let result = sqlx::query(
                "UPDATE learnings SET access_count = access_count + 1, last_accessed_at = ? WHERE id = ?",
            )
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn mark_accessed_all(&self, ids: &[String], now: DateTime<Utc>) -> Result<Vec<String>> {
        let now = to_db(now);
        let now = now.as_str();
        retry_on_busy("mark_accessed_all", move || {
            self.try_mark_accessed_all(ids, now)
        })
        .await
    }

    async fn deactivate_learning(&self, id: &str) -> Result<bool> {
        retry_on_busy("deactivate_learning", || async {
            let result = sqlx::query("UPDATE learnings SET active = 0 WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn list_visible(&self, query: &ScopeQuery) -> Result<Vec<Learning>> {
        let rows: Vec<LearningRow> = sqlx::query_as(
            r#"
            SELECT * FROM learnings
            WHERE app = ?1
              AND (
                    scope = 'app'
                 OR (scope = 'user' AND owner_id = ?2)
                 OR (scope = 'session' AND owner_id = ?3)
              )
              AND (
                    ?4
                 OR (superseded = 0 AND active = 1 AND (expires_at IS NULL OR expires_at > ?5))
              )
            ORDER BY created_at DESC, id
            "#,
        )
        .bind(&query.app)
        .bind(&query.user_id)
        .bind(&query.session_id)
        .bind(query.include_historical)
        .bind(to_db(query.now))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_learning()).collect()
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let now = to_db(now);
        retry_on_busy("deactivate_expired", || async {
            let rows: Vec<(String,)> = sqlx::query_as(
                r#"
                UPDATE learnings SET active = 0
                WHERE active = 1 AND expires_at IS NOT NULL AND expires_at <= ?
                RETURNING id
                "#,
            )
            .bind(&now)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.into_iter().map(|(id,)| id).collect())
        })
        .await
    }

    async fn learning_stats(&self, app: Option<&str>, now: DateTime<Utc>) -> Result<LearningStats> {
        let (total, active, superseded, inactive, expired_unswept, average_importance, average_confidence): (
            i64,
            i64,
            i64,
            i64,
            i64,
            f64,
            f64,
        ) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(superseded = 0 AND active = 1 AND (expires_at IS NULL OR expires_at > ?2)), 0),
                COALESCE(SUM(superseded = 1), 0),
                COALESCE(SUM(superseded = 0 AND active = 0), 0),
                COALESCE(SUM(superseded = 0 AND active = 1 AND expires_at IS NOT NULL AND expires_at <= ?2), 0),
                COALESCE(AVG(importance), 0.0),
                COALESCE(AVG(confidence), 0.0)
            FROM learnings
            WHERE ?1 IS NULL OR app = ?1
            "#,
        )
        .bind(app)
        .bind(to_db(now))
        .fetch_one(&self.pool)
        .await?;

        let by_scope: Vec<(String, i64)> = sqlx::query_as(
            "SELECT scope, COUNT(*) FROM learnings WHERE ?1 IS NULL OR app = ?1 GROUP BY scope",
        )
        .bind(app)
        .fetch_all(&self.pool)
        .await?;

        let by_variant: Vec<(String, i64)> = sqlx::query_as(
            "SELECT variant, COUNT(*) FROM learnings WHERE ?1 IS NULL OR app = ?1 GROUP BY variant",
        )
        .bind(app)
        .fetch_all(&self.pool)
        .await?;

        let edges_by_kind: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT e.kind, COUNT(*)
            FROM learning_edges e
            JOIN learnings l ON l.id = e.from_id
            WHERE ?1 IS NULL OR l.app = ?1
            GROUP BY e.kind
            "#,
        )
        .bind(app)
        .fetch_all(&self.pool)
        .await?;

        Ok(LearningStats {
            total: total as u64,
            active: active as u64,
            superseded: superseded as u64,
            inactive: inactive as u64,
            expired_unswept: expired_unswept as u64,
            by_scope: into_counts(by_scope),
            by_variant: into_counts(by_variant),
            average_importance,
            average_confidence,
            edges_by_kind: into_counts(edges_by_kind),
        })
    }

    // ========== Session Operations ==========

    async fn save_session(&self, session: &SessionRecord) -> Result<SessionRecord> {
        retry_on_busy("save_session", || async {
            sqlx::query(
                r#"
                INSERT INTO sessions (id, app, user_id, started_at, ended_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(id) DO NOTHING
                "#,
            )
            .bind(&session.id)
            .bind(&session.app)
            .bind(&session.user_id)
            .bind(to_db(session.started_at))
            .bind(to_db_opt(session.ended_at))
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await?;

        self.get_session(&session.id)
            .await?
            .ok_or_else(|| Error::session_not_found(&session.id))
    }

    async fn get_session(&self, id: &str) -> Result<Option<SessionRecord>> {
        let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_session()).transpose()
    }

    // ========== Edge Operations ==========

    async fn insert_edge(&self, edge: &LearningEdge) -> Result<EdgeInsertOutcome> {
        retry_on_busy("insert_edge", move || self.try_insert_edge(edge)).await
    }

    async fn list_edges(&self, kind: Option<EdgeKind>) -> Result<Vec<LearningEdge>> {
        let rows: Vec<EdgeRow> = sqlx::query_as(
            "SELECT * FROM learning_edges WHERE ?1 IS NULL OR kind = ?1 ORDER BY created_at, id",
        )
        .bind(kind.map(|k| k.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_edge()).collect()
    }

    async fn list_edges_for(&self, id: &str) -> Result<Vec<LearningEdge>> {
        let rows: Vec<EdgeRow> = sqlx::query_as(
            "SELECT * FROM learning_edges WHERE from_id = ?1 OR to_id = ?1 ORDER BY created_at, id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_edge()).collect()
    }

    async fn edges_among(&self, kind: EdgeKind, ids: &[String]) -> Result<Vec<LearningEdge>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        // One JSON array parameter instead of an IN list, so the candidate set
        // is not bounded by SQLite's variable limit
        let ids =
            serde_json::to_string(ids).map_err(|e| Error::serialization("edge endpoints", e))?;

        let rows: Vec<EdgeRow> = sqlx::query_as(
            r#"
            SELECT * FROM learning_edges
            WHERE kind = ?1
              AND from_id IN (SELECT value FROM json_each(?2))
              AND to_id IN (SELECT value FROM json_each(?2))
            ORDER BY created_at, id
            "#,
        )
        .bind(kind.as_str())
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_edge()).collect()
    }

    async fn supersession_descendants(&self, id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            WITH RECURSIVE chain(id, depth) AS (
                SELECT to_id, 1
                FROM learning_edges
                WHERE kind = 'supersedes' AND from_id = ?1

                UNION

                SELECT e.to_id, c.depth + 1
                FROM learning_edges e
                JOIN chain c ON e.from_id = c.id
                WHERE e.kind = 'supersedes'
            )
            SELECT id, MIN(depth) AS depth
            FROM chain
            GROUP BY id
            ORDER BY depth, id
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id, _)| id).collect())
    }

    // ========== Event Operations ==========

    async fn append_event(&self, event: &LearningEvent) -> Result<()> {
        let payload =
            serde_json::to_string(event).map_err(|e| Error::serialization("learning event", e))?;

        retry_on_busy("append_event", || async {
            sqlx::query(
                r#"
                INSERT INTO learning_events (learning_id, event_type, payload, created_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(event.learning_id())
            .bind(event.event_type_name())
            .bind(&payload)
            .bind(to_db(event.timestamp()))
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn list_events(&self, learning_id: &str) -> Result<Vec<LearningEvent>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT payload FROM learning_events WHERE learning_id = ? ORDER BY id")
                .bind(learning_id)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(payload,)| {
                serde_json::from_str(&payload)
                    .map_err(|e| Error::serialization("learning event", e))
            })
            .collect()
    }
}

fn into_counts(rows: Vec<(String, i64)>) -> BTreeMap<String, u64> {
    rows.into_iter()
        .map(|(key, count)| (key, count as u64))
        .collect()
}

// ========== Row Types ==========

#[derive(FromRow)]
struct LearningRow {
    id: String,
    app: String,
    scope: String,
    owner_id: Option<String>,
    content: String,
    importance: f64,
    confidence: f64,
    source_session_id: Option<String>,
    created_at: String,
    updated_at: String,
    expires_at: Option<String>,
    access_count: i64,
    last_accessed_at: Option<String>,
    superseded: bool,
    active: bool,
}

impl LearningRow {
    fn into_learning(self) -> Result<Learning> {
        let scope = Scope::parse(&self.scope)
            .ok_or_else(|| Error::Other(format!("Invalid scope: {}", self.scope)))?;
        let content: LearningContent = serde_json::from_str(&self.content)
            .map_err(|e| Error::serialization("learning content", e))?;

        Ok(Learning {
            id: self.id,
            app: self.app,
            scope,
            owner_id: self.owner_id,
            content,
            importance: self.importance,
            confidence: self.confidence,
            source_session_id: self.source_session_id,
            created_at: from_db(&self.created_at)?,
            updated_at: from_db(&self.updated_at)?,
            expires_at: from_db_opt(self.expires_at.as_deref())?,
            access_count: self.access_count.max(0) as u64,
            last_accessed_at: from_db_opt(self.last_accessed_at.as_deref())?,
            superseded: self.superseded,
            active: self.active,
        })
    }
}

#[derive(FromRow)]
struct EdgeRow {
    id: String,
    kind: String,
    from_id: String,
    to_id: String,
    created_at: String,
}

impl EdgeRow {
    fn into_edge(self) -> Result<LearningEdge> {
        let kind = EdgeKind::parse(&self.kind)
            .ok_or_else(|| Error::Other(format!("Invalid edge kind: {}", self.kind)))?;

        Ok(LearningEdge {
            id: self.id,
            kind,
            from_id: self.from_id,
            to_id: self.to_id,
            created_at: from_db(&self.created_at)?,
        })
    }
}

#[derive(FromRow)]
struct SessionRow {
    id: String,
    app: String,
    user_id: Option<String>,
    started_at: String,
    ended_at: Option<String>,
}

impl SessionRow {
    fn into_session(self) -> Result<SessionRecord> {
        Ok(SessionRecord {
            id: self.id,
            app: self.app,
            user_id: self.user_id,
            started_at: from_db(&self.started_at)?,
            ended_at: from_db_opt(self.ended_at.as_deref())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::learning::{ContactPreference, TopicKnowledge};
    use crate::domain::timestamp_now;
    use crate::storage::Database;
    use chrono::Duration;

    async fn setup_test_db() -> SqliteLearningRepository {
        let db = Database::in_memory()
            .await
            .expect("Failed to create database");
        SqliteLearningRepository::new(db.pool().clone())
    }

    fn contact(preference: &str) -> LearningContent {
        LearningContent::ContactPreference(ContactPreference {
            contact_ref: "c-42".into(),
            channel: "email".into(),
            preference: preference.into(),
        })
    }

    fn query(app: &str, user: Option<&str>, session: Option<&str>) -> ScopeQuery {
        ScopeQuery {
            app: app.into(),
            user_id: user.map(String::from),
            session_id: session.map(String::from),
            include_historical: false,
            now: timestamp_now(),
        }
    }

    #[tokio::test]
    async fn test_insert_is_idempotent_by_natural_key() {
        let repo = setup_test_db().await;
        let first = Learning::for_user("horizon", "richard", contact("Mornings only"));
        let again = Learning::for_user("horizon", "richard", contact("mornings only."));

        assert_eq!(
            repo.insert_learning(&first).await.unwrap(),
            InsertOutcome::Created(first.id.clone())
        );
        assert_eq!(
            repo.insert_learning(&again).await.unwrap(),
            InsertOutcome::Existing(first.id.clone())
        );
        assert!(repo.get_learning(&again.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_same_content_different_owner_is_distinct() {
        let repo = setup_test_db().await;
        let richard = Learning::for_user("horizon", "richard", contact("mornings"));
        let monica = Learning::for_user("horizon", "monica", contact("mornings"));
        let app_wide = Learning::app_wide("horizon", contact("mornings"));

        assert!(repo.insert_learning(&richard).await.unwrap().is_created());
        assert!(repo.insert_learning(&monica).await.unwrap().is_created());
        assert!(repo.insert_learning(&app_wide).await.unwrap().is_created());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let repo = setup_test_db().await;
        let first = Learning::app_wide("horizon", contact("mornings")).with_id("fixed");
        let clash = Learning::app_wide("horizon", contact("evenings")).with_id("fixed");

        repo.insert_learning(&first).await.unwrap();
        let result = repo.insert_learning(&clash).await;
        assert!(matches!(result, Err(Error::DuplicateKey(_))));
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_fields() {
        let repo = setup_test_db().await;
        let now = timestamp_now();
        let learning = Learning::for_session("horizon", "s-1", contact("sms"))
            .with_importance(0.7)
            .with_confidence(0.25)
            .from_session("s-1")
            .with_expires_at(now + Duration::days(7));

        repo.insert_learning(&learning).await.unwrap();
        let fetched = repo.get_learning(&learning.id).await.unwrap().unwrap();
        assert_eq!(fetched, learning);
    }

    #[tokio::test]
    async fn test_list_visible_applies_scope_and_state() {
        let repo = setup_test_db().await;
        let now = timestamp_now();
        let app_wide = Learning::app_wide("horizon", contact("a"));
        let mine = Learning::for_user("horizon", "richard", contact("b"));
        let theirs = Learning::for_user("horizon", "monica", contact("c"));
        let session = Learning::for_session("horizon", "s-1", contact("d"));
        let other_app = Learning::app_wide("pulse", contact("e"));
        let expired = Learning::app_wide("horizon", contact("f"))
            .with_created_at(now - Duration::days(2))
            .with_expires_at(now - Duration::days(1));
        for learning in [&app_wide, &mine, &theirs, &session, &other_app, &expired] {
            repo.insert_learning(learning).await.unwrap();
        }

        let visible = repo
            .list_visible(&query("horizon", Some("richard"), None))
            .await
            .unwrap();
        let mut ids: Vec<_> = visible.iter().map(|l| l.id.clone()).collect();
        ids.sort();
        let mut expected = vec![app_wide.id.clone(), mine.id.clone()];
        expected.sort();
        assert_eq!(ids, expected);

        let with_session = repo
            .list_visible(&query("horizon", Some("richard"), Some("s-1")))
            .await
            .unwrap();
        assert_eq!(with_session.len(), 3);

        let mut historical = query("horizon", Some("richard"), None);
        historical.include_historical = true;
        assert_eq!(repo.list_visible(&historical).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_replace_is_compare_and_swap() {
        let repo = setup_test_db().await;
        let learning = Learning::app_wide("horizon", contact("mornings"));
        repo.insert_learning(&learning).await.unwrap();

        let mut next = learning.clone();
        next.importance = 0.9;
        next.updated_at = learning.updated_at + Duration::seconds(1);

        assert!(
            repo.replace_learning(&next, learning.updated_at)
                .await
                .unwrap()
        );
        // Stale expectation loses
        assert!(
            !repo
                .replace_learning(&next, learning.updated_at)
                .await
                .unwrap()
        );
        assert_eq!(
            repo.get_learning(&learning.id)
                .await
                .unwrap()
                .unwrap()
                .importance,
            0.9
        );
    }

    #[tokio::test]
    async fn test_replace_into_taken_natural_key() {
        let repo = setup_test_db().await;
        let a = Learning::app_wide("horizon", contact("mornings"));
        let b = Learning::app_wide("horizon", contact("evenings"));
        repo.insert_learning(&a).await.unwrap();
        repo.insert_learning(&b).await.unwrap();

        let mut next = b.clone();
        next.content = contact("Mornings");
        next.updated_at = b.updated_at + Duration::seconds(1);
        let result = repo.replace_learning(&next, b.updated_at).await;
        assert!(matches!(result, Err(Error::DuplicateKey(_))));
    }

    #[tokio::test]
    async fn test_deactivate_expired_returns_swept_ids() {
        let repo = setup_test_db().await;
        let now = timestamp_now();
        let expired = Learning::app_wide("horizon", contact("gone"))
            .with_created_at(now - Duration::hours(3))
            .with_expires_at(now);
        let fresh = Learning::app_wide("horizon", contact("here"));
        repo.insert_learning(&expired).await.unwrap();
        repo.insert_learning(&fresh).await.unwrap();

        assert_eq!(
            repo.deactivate_expired(now).await.unwrap(),
            vec![expired.id.clone()]
        );
        assert!(repo.deactivate_expired(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_supersession_descendants_in_depth_order() {
        let repo = setup_test_db().await;
        let learnings: Vec<Learning> = ["v1", "v2", "v3"]
            .iter()
            .map(|v| Learning::app_wide("horizon", contact(v)))
            .collect();
        for learning in &learnings {
            repo.insert_learning(learning).await.unwrap();
        }

        repo.insert_edge(&LearningEdge::new(
            EdgeKind::Supersedes,
            &learnings[2].id,
            &learnings[1].id,
        ))
        .await
        .unwrap();
        repo.insert_edge(&LearningEdge::new(
            EdgeKind::Supersedes,
            &learnings[1].id,
            &learnings[0].id,
        ))
        .await
        .unwrap();

        let chain = repo
            .supersession_descendants(&learnings[2].id)
            .await
            .unwrap();
        assert_eq!(
            chain,
            vec![learnings[1].id.clone(), learnings[0].id.clone()]
        );

        let cycle = repo
            .insert_edge(&LearningEdge::new(
                EdgeKind::Supersedes,
                &learnings[0].id,
                &learnings[2].id,
            ))
            .await;
        assert!(matches!(cycle, Err(Error::ConsistencyViolation(_))));
        assert_eq!(
            repo.list_edges(Some(EdgeKind::Supersedes))
                .await
                .unwrap()
                .len(),
            2
        );
        assert!(
            !repo
                .get_learning(&learnings[2].id)
                .await
                .unwrap()
                .unwrap()
                .superseded
        );
    }

    #[tokio::test]
    async fn test_edges_among() {
        let repo = setup_test_db().await;
        let a = Learning::app_wide("horizon", contact("a"));
        let b = Learning::app_wide("horizon", contact("b"));
        let c = Learning::app_wide("horizon", contact("c"));
        for learning in [&a, &b, &c] {
            repo.insert_learning(learning).await.unwrap();
        }
        repo.insert_edge(&LearningEdge::new(EdgeKind::Contradicts, &a.id, &b.id))
            .await
            .unwrap();
        repo.insert_edge(&LearningEdge::new(EdgeKind::Contradicts, &b.id, &c.id))
            .await
            .unwrap();

        let among = repo
            .edges_among(EdgeKind::Contradicts, &[a.id.clone(), b.id.clone()])
            .await
            .unwrap();
        assert_eq!(among.len(), 1);
        assert!(among[0].involves(&a.id) && among[0].involves(&b.id));
        assert!(
            repo.edges_among(EdgeKind::Supports, &[a.id.clone()])
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(repo.list_edges_for(&b.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mark_accessed_all_is_all_or_nothing() {
        let repo = setup_test_db().await;
        let a = Learning::app_wide("horizon", contact("a"));
        let b = Learning::app_wide("horizon", contact("b"));
        for learning in [&a, &b] {
            repo.insert_learning(learning).await.unwrap();
        }

        let missing = repo
            .mark_accessed_all(
                &[a.id.clone(), "gone".into(), b.id.clone()],
                timestamp_now(),
            )
            .await
            .unwrap();
        assert_eq!(missing, vec!["gone".to_string()]);
        assert_eq!(
            repo.get_learning(&a.id)
                .await
                .unwrap()
                .unwrap()
                .access_count,
            0
        );

        let missing = repo
            .mark_accessed_all(&[a.id.clone(), b.id.clone()], timestamp_now())
            .await
            .unwrap();
        assert!(missing.is_empty());
        assert_eq!(
            repo.get_learning(&a.id)
                .await
                .unwrap()
                .unwrap()
                .access_count,
            1
        );
        assert_eq!(
            repo.get_learning(&b.id)
                .await
                .unwrap()
                .unwrap()
                .access_count,
            1
        );
    }

    #[tokio::test]
    async fn test_edges_among_beyond_variable_limit() {
        let repo = setup_test_db().await;
        let a = Learning::app_wide("horizon", contact("a"));
        let b = Learning::app_wide("horizon", contact("b"));
        for learning in [&a, &b] {
            repo.insert_learning(learning).await.unwrap();
        }
        repo.insert_edge(&LearningEdge::new(EdgeKind::Contradicts, &a.id, &b.id))
            .await
            .unwrap();

        // Far more ids than SQLite accepts as bound variables in one statement
        let mut ids: Vec<String> = (0..40_000).map(|i| format!("unknown-{}", i)).collect();
        ids.push(a.id.clone());
        ids.push(b.id.clone());

        let among = repo.edges_among(EdgeKind::Contradicts, &ids).await.unwrap();
        assert_eq!(among.len(), 1);
    }

    #[tokio::test]
    async fn test_stats() {
        let repo = setup_test_db().await;
        let topic = LearningContent::TopicKnowledge(TopicKnowledge {
            topic: "seo".into(),
            insight: "schema markup helps".into(),
            sources: vec!["https://example.com".into()],
        });
        let a = Learning::app_wide("horizon", topic).with_importance(0.2);
        let b = Learning::for_user("horizon", "richard", contact("x")).with_importance(0.6);
        let c = Learning::app_wide("pulse", contact("y"));
        for learning in [&a, &b, &c] {
            repo.insert_learning(learning).await.unwrap();
        }
        repo.deactivate_learning(&b.id).await.unwrap();

        let stats = repo
            .learning_stats(Some("horizon"), timestamp_now())
            .await
            .unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.inactive, 1);
        assert_eq!(stats.by_scope.get("user"), Some(&1));
        assert_eq!(stats.by_variant.get("topic_knowledge"), Some(&1));
        assert!((stats.average_importance - 0.4).abs() < 1e-9);

        let all = repo.learning_stats(None, timestamp_now()).await.unwrap();
        assert_eq!(all.total, 3);
    }

    #[tokio::test]
    async fn test_events_roundtrip_in_order() {
        let repo = setup_test_db().await;
        repo.append_event(&LearningEvent::created("l-1", "horizon", Scope::App))
            .await
            .unwrap();
        repo.append_event(&LearningEvent::accessed("l-1"))
            .await
            .unwrap();
        repo.append_event(&LearningEvent::accessed("l-2"))
            .await
            .unwrap();

        let events = repo.list_events("l-1").await.unwrap();
        let names: Vec<_> = events.iter().map(|e| e.event_type_name()).collect();
        assert_eq!(names, vec!["created", "accessed"]);
    }
}
