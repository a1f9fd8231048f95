//! SQLite implementation of the FeedbackRepository

use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use crate::domain::feedback::{Feedback, FeedbackRepository, Pattern};
use crate::error::{Error, Result};
use crate::infrastructure::{from_db, retry_on_busy, to_db};

/// SQLite implementation of the feedback repository
#[derive(Clone)]
pub struct SqliteFeedbackRepository {
    pool: SqlitePool,
}

impl SqliteFeedbackRepository {
    /// Create a new SQLite feedback repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn find_pattern(
        &self,
        app: &str,
        pattern_type: &str,
        fingerprint: &str,
    ) -> Result<Option<Pattern>> {
        let row: Option<PatternRow> = sqlx::query_as(
            "SELECT * FROM patterns WHERE app = ? AND pattern_type = ? AND fingerprint = ?",
        )
        .bind(app)
        .bind(pattern_type)
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_pattern()).transpose()
    }
}

#[async_trait]
impl FeedbackRepository for SqliteFeedbackRepository {
    async fn record_pattern(&self, pattern: &Pattern) -> Result<Pattern> {
        let fingerprint = pattern.fingerprint();

        retry_on_busy("record_pattern", || async {
            sqlx::query(
                r#"
                INSERT INTO patterns (
                    id, app, pattern_type, description, fingerprint,
                    occurrences, first_seen_at, last_seen_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(app, pattern_type, fingerprint) DO UPDATE SET
                    occurrences = occurrences + excluded.occurrences,
                    last_seen_at = MAX(last_seen_at, excluded.last_seen_at)
                "#,
            )
            .bind(&pattern.id)
            .bind(&pattern.app)
            .bind(&pattern.pattern_type)
            .bind(&pattern.description)
            .bind(&fingerprint)
            .bind(pattern.occurrences as i64)
            .bind(to_db(pattern.first_seen_at))
            .bind(to_db(pattern.last_seen_at))
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await?;

        debug!(pattern_type = %pattern.pattern_type, app = %pattern.app, "Pattern recorded");

        self.find_pattern(&pattern.app, &pattern.pattern_type, &fingerprint)
            .await?
            .ok_or_else(|| Error::Other(format!("Pattern '{}' vanished after upsert", pattern.id)))
    }

    async fn get_pattern(&self, id: &str) -> Result<Option<Pattern>> {
        let row: Option<PatternRow> = sqlx::query_as("SELECT * FROM patterns WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_pattern()).transpose()
    }

    async fn list_patterns(&self, app: &str, pattern_type: Option<&str>) -> Result<Vec<Pattern>> {
        let rows: Vec<PatternRow> = sqlx::query_as(
            r#"
            SELECT * FROM patterns
            WHERE app = ?1 AND (?2 IS NULL OR pattern_type = ?2)
            ORDER BY occurrences DESC, last_seen_at DESC, id
            "#,
        )
        .bind(app)
        .bind(pattern_type)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_pattern()).collect()
    }

    async fn insert_feedback(&self, feedback: &Feedback) -> Result<()> {
        let session: Option<(String,)> = sqlx::query_as("SELECT app FROM sessions WHERE id = ?")
            .bind(&feedback.session_id)
            .fetch_optional(&self.pool)
            .await?;
        if session.is_none() {
            return Err(Error::session_not_found(&feedback.session_id));
        }

        if let Some(learning_id) = &feedback.learning_id {
            let learning: Option<(String,)> =
                sqlx::query_as("SELECT id FROM learnings WHERE id = ?")
                    .bind(learning_id)
                    .fetch_optional(&self.pool)
                    .await?;
            if learning.is_none() {
                return Err(Error::learning_not_found(learning_id));
            }
        }

        let result = retry_on_busy("insert_feedback", || async {
            sqlx::query(
                r#"
                INSERT INTO feedback (id, app, session_id, learning_id, rating, comment, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&feedback.id)
            .bind(&feedback.app)
            .bind(&feedback.session_id)
            .bind(&feedback.learning_id)
            .bind(feedback.rating)
            .bind(&feedback.comment)
            .bind(to_db(feedback.created_at))
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await;

        match result {
            Err(Error::DatabaseError(sqlx::Error::Database(db))) if db.is_unique_violation() => {
                Err(Error::DuplicateKey(format!(
                    "feedback id '{}'",
                    feedback.id
                )))
            }
            other => other,
        }
    }

    async fn list_feedback_for_session(&self, session_id: &str) -> Result<Vec<Feedback>> {
        let rows: Vec<FeedbackRow> =
            sqlx::query_as("SELECT * FROM feedback WHERE session_id = ? ORDER BY created_at, id")
                .bind(session_id)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(|r| r.into_feedback()).collect()
    }

    async fn list_feedback_for_learning(&self, learning_id: &str) -> Result<Vec<Feedback>> {
        let rows: Vec<FeedbackRow> =
            sqlx::query_as("SELECT * FROM feedback WHERE learning_id = ? ORDER BY created_at, id")
                .bind(learning_id)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(|r| r.into_feedback()).collect()
    }
}

// ========== Row Types ==========

#[derive(FromRow)]
struct PatternRow {
    id: String,
    app: String,
    pattern_type: String,
    description: String,
    occurrences: i64,
    first_seen_at: String,
    last_seen_at: String,
}

impl PatternRow {
    fn into_pattern(self) -> Result<Pattern> {
        Ok(Pattern {
            id: self.id,
            app: self.app,
            pattern_type: self.pattern_type,
            description: self.description,
            occurrences: self.occurrences.max(0) as u64,
            first_seen_at: from_db(&self.first_seen_at)?,
            last_seen_at: from_db(&self.last_seen_at)?,
        })
    }
}

#[derive(FromRow)]
struct FeedbackRow {
    id: String,
    app: String,
    session_id: String,
    learning_id: Option<String>,
    rating: f64,
    comment: Option<String>,
    created_at: String,
}

impl FeedbackRow {
    fn into_feedback(self) -> Result<Feedback> {
        Ok(Feedback {
            id: self.id,
            app: self.app,
            session_id: self.session_id,
            learning_id: self.learning_id,
            rating: self.rating,
            comment: self.comment,
            created_at: from_db(&self.created_at)?,
        })
    }
}
