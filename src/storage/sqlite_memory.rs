use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::Row;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::models::internal::{Message, Role, SessionInfo};
use crate::storage::memory::{
    default_mode_name, short_id, ConversationMemory, Exchange, MemoryError,
};

/// Durable session store over SQLite.
///
/// Every mutation runs in its own transaction behind `write_lock`, so two
/// concurrent creations can never both evict or overshoot `max_sessions`.
pub struct SqliteConversationMemory {
    pool: SqlitePool,
    max_sessions: usize,
    write_lock: Mutex<()>,
}

const SESSION_COLUMNS: &str = "s.session_id, s.created_at, s.last_accessed, s.total_tokens, \
     s.pedagogy_mode, s.title, \
     (SELECT COUNT(*) FROM session_messages m WHERE m.session_id = s.session_id) AS message_count";

// Fixed-width so that string order matches time order
fn to_db_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn from_db_time(raw: &str) -> Result<DateTime<Utc>, MemoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| MemoryError::Corrupt(format!("bad timestamp '{}': {}", raw, e)))
}

fn session_from_row(row: &SqliteRow) -> Result<SessionInfo, MemoryError> {
    let message_count: i64 = row.try_get("message_count")?;
    let total_tokens: i64 = row.try_get("total_tokens")?;

    Ok(SessionInfo {
        session_id: row.try_get("session_id")?,
        message_count: usize::try_from(message_count).unwrap_or(0),
        created_at: from_db_time(&row.try_get::<String, _>("created_at")?)?,
        last_accessed: from_db_time(&row.try_get::<String, _>("last_accessed")?)?,
        total_tokens: u64::try_from(total_tokens).unwrap_or(0),
        pedagogy_mode: row.try_get("pedagogy_mode")?,
        title: row.try_get("title")?,
    })
}

fn encode_context_ids(context_ids: Option<Vec<String>>) -> Result<Option<String>, MemoryError> {
    context_ids
        .map(|ids| serde_json::to_string(&ids))
        .transpose()
        .map_err(|e| MemoryError::Corrupt(format!("unserializable context_ids: {}", e)))
}

fn message_from_row(row: &SqliteRow) -> Result<Message, MemoryError> {
    let role: String = row.try_get("role")?;
    let role = role.parse::<Role>().map_err(MemoryError::Corrupt)?;
    let tokens: Option<i64> = row.try_get("tokens")?;
    let context_ids: Option<String> = row.try_get("context_ids")?;
    let context_ids = context_ids
        .map(|raw| serde_json::from_str::<Vec<String>>(&raw))
        .transpose()
        .map_err(|e| MemoryError::Corrupt(format!("bad context_ids: {}", e)))?;

    Ok(Message {
        role,
        content: row.try_get("content")?,
        timestamp: from_db_time(&row.try_get::<String, _>("timestamp")?)?,
        tokens: tokens.and_then(|t| u32::try_from(t).ok()),
        context_ids,
    })
}

impl SqliteConversationMemory {
    pub fn new(pool: SqlitePool, max_sessions: usize) -> Self {
        Self {
            pool,
            max_sessions: max_sessions.max(1),
            write_lock: Mutex::new(()),
        }
    }

    async fn exists_in(conn: &mut SqliteConnection, session_id: &str) -> Result<bool, MemoryError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(found.is_some())
    }

    async fn touch(conn: &mut SqliteConnection, session_id: &str) -> Result<(), MemoryError> {
        sqlx::query(
            "UPDATE sessions SET last_accessed = ?, \
             access_seq = (SELECT COALESCE(MAX(access_seq), 0) + 1 FROM sessions) \
             WHERE session_id = ?",
        )
        .bind(to_db_time(Utc::now()))
        .bind(session_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn delete_session(conn: &mut SqliteConnection, session_id: &str) -> Result<bool, MemoryError> {
        sqlx::query("DELETE FROM session_messages WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *conn)
            .await?;
        let result = sqlx::query("DELETE FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_message(
        conn: &mut SqliteConnection,
        session_id: &str,
        role: Role,
        content: &str,
        tokens: Option<u32>,
        context_json: Option<String>,
    ) -> Result<(), MemoryError> {
        sqlx::query(
            "INSERT INTO session_messages (session_id, role, content, timestamp, tokens, context_ids) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(role.as_str())
        .bind(content)
        .bind(to_db_time(Utc::now()))
        .bind(tokens.map(i64::from))
        .bind(context_json)
        .execute(&mut *conn)
        .await?;

        if let Some(t) = tokens {
            sqlx::query("UPDATE sessions SET total_tokens = total_tokens + ? WHERE session_id = ?")
                .bind(i64::from(t))
                .bind(session_id)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }

    /// The one path through which sessions come into existence.
    async fn ensure_session(
        &self,
        conn: &mut SqliteConnection,
        session_id: &str,
    ) -> Result<(), MemoryError> {
        if Self::exists_in(conn, session_id).await? {
            return Self::touch(conn, session_id).await;
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(&mut *conn)
            .await?;

        if usize::try_from(count).unwrap_or(0) >= self.max_sessions {
            let oldest: Option<String> = sqlx::query_scalar(
                "SELECT session_id FROM sessions ORDER BY last_accessed ASC, access_seq ASC LIMIT 1",
            )
            .fetch_optional(&mut *conn)
            .await?;

            if let Some(id) = oldest {
                Self::delete_session(conn, &id).await?;
                info!("Evicted least recently accessed session {}...", short_id(&id));
            }
        }

        let now = to_db_time(Utc::now());
        sqlx::query(
            "INSERT INTO sessions (session_id, created_at, last_accessed, access_seq, total_tokens, pedagogy_mode) \
             VALUES (?, ?, ?, (SELECT COALESCE(MAX(access_seq), 0) + 1 FROM sessions), 0, ?)",
        )
        .bind(session_id)
        .bind(&now)
        .bind(&now)
        .bind(default_mode_name())
        .execute(&mut *conn)
        .await?;

        info!("Created new session {}...", short_id(session_id));
        Ok(())
    }
}

#[async_trait]
impl ConversationMemory for SqliteConversationMemory {
    async fn add_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        tokens: Option<u32>,
        context_ids: Option<Vec<String>>,
    ) -> Result<(), MemoryError> {
        let context_json = encode_context_ids(context_ids)?;

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        self.ensure_session(&mut tx, session_id).await?;
        Self::insert_message(&mut tx, session_id, role, content, tokens, context_json).await?;

        tx.commit().await?;

        debug!(
            "Added {} message to session {}... (tokens: {})",
            role,
            short_id(session_id),
            tokens.unwrap_or(0)
        );
        Ok(())
    }

    async fn append_exchange(
        &self,
        session_id: &str,
        exchange: Exchange,
    ) -> Result<(), MemoryError> {
        let context_json = encode_context_ids(Some(exchange.context_ids))?;

        let _guard = self.write_lock.lock().await;
        // Dropped without commit on any error, which rolls the turn back
        let mut tx = self.pool.begin().await?;

        self.ensure_session(&mut tx, session_id).await?;
        if let Some(mode) = &exchange.pedagogy_mode {
            sqlx::query("UPDATE sessions SET pedagogy_mode = ? WHERE session_id = ?")
                .bind(mode.as_str())
                .bind(session_id)
                .execute(&mut *tx)
                .await?;
        }
        Self::insert_message(
            &mut tx,
            session_id,
            Role::User,
            &exchange.question,
            exchange.question_tokens,
            None,
        )
        .await?;
        Self::insert_message(
            &mut tx,
            session_id,
            Role::Assistant,
            &exchange.answer,
            exchange.answer_tokens,
            context_json,
        )
        .await?;

        tx.commit().await?;

        debug!("Stored exchange in session {}...", short_id(session_id));
        Ok(())
    }

    async fn get_history(
        &self,
        session_id: &str,
        max_messages: Option<usize>,
    ) -> Result<Vec<Message>, MemoryError> {
        // Negative LIMIT means unbounded in SQLite
        let limit = max_messages
            .map(|m| i64::try_from(m).unwrap_or(i64::MAX))
            .unwrap_or(-1);

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        if !Self::exists_in(&mut tx, session_id).await? {
            return Ok(Vec::new());
        }
        Self::touch(&mut tx, session_id).await?;

        let rows = sqlx::query(
            "SELECT role, content, timestamp, tokens, context_ids FROM ( \
                 SELECT id, role, content, timestamp, tokens, context_ids FROM session_messages \
                 WHERE session_id = ? ORDER BY id DESC LIMIT ? \
             ) ORDER BY id ASC",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn session_exists(&self, session_id: &str) -> Result<bool, MemoryError> {
        let mut conn = self.pool.acquire().await?;
        Self::exists_in(&mut conn, session_id).await
    }

    async fn get_session_info(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionInfo>, MemoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM sessions s WHERE s.session_id = ?",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, MemoryError> {
        let rows = sqlx::query(&format!("SELECT {} FROM sessions s", SESSION_COLUMNS))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(session_from_row).collect()
    }

    async fn clear_session(&self, session_id: &str) -> Result<bool, MemoryError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let removed = Self::delete_session(&mut tx, session_id).await?;
        tx.commit().await?;

        if removed {
            info!("Cleared session {}...", short_id(session_id));
        }
        Ok(removed)
    }

    async fn set_pedagogy_mode(&self, session_id: &str, mode: &str) -> Result<(), MemoryError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        self.ensure_session(&mut tx, session_id).await?;
        sqlx::query("UPDATE sessions SET pedagogy_mode = ? WHERE session_id = ?")
            .bind(mode)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(
            "Set pedagogy mode for session {}... to '{}'",
            short_id(session_id),
            mode
        );
        Ok(())
    }

    async fn get_pedagogy_mode(&self, session_id: &str) -> Result<String, MemoryError> {
        let mode: Option<String> =
            sqlx::query_scalar("SELECT pedagogy_mode FROM sessions WHERE session_id = ?")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(mode.unwrap_or_else(default_mode_name))
    }

    async fn set_session_title(
        &self,
        session_id: &str,
        title: &str,
    ) -> Result<bool, MemoryError> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("UPDATE sessions SET title = ? WHERE session_id = ?")
            .bind(title)
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn prune_sessions_before(&self, cutoff: DateTime<Utc>) -> Result<usize, MemoryError> {
        let cutoff_str = to_db_time(cutoff);

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM session_messages WHERE session_id IN \
             (SELECT session_id FROM sessions WHERE last_accessed < ?)",
        )
        .bind(&cutoff_str)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM sessions WHERE last_accessed < ?")
            .bind(&cutoff_str)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let removed = usize::try_from(result.rows_affected()).unwrap_or(usize::MAX);
        if removed > 0 {
            info!("Pruned {} sessions idle since before {}", removed, cutoff_str);
        }
        Ok(removed)
    }

    async fn truncate_session_history(
        &self,
        session_id: &str,
        max_messages: usize,
    ) -> Result<usize, MemoryError> {
        let keep = i64::try_from(max_messages).unwrap_or(i64::MAX);

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(
            "DELETE FROM session_messages WHERE session_id = ? AND id NOT IN ( \
                 SELECT id FROM session_messages WHERE session_id = ? ORDER BY id DESC LIMIT ? \
             )",
        )
        .bind(session_id)
        .bind(session_id)
        .bind(keep)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if deleted > 0 {
            sqlx::query(
                "UPDATE sessions SET total_tokens = \
                 (SELECT COALESCE(SUM(tokens), 0) FROM session_messages WHERE session_id = ?) \
                 WHERE session_id = ?",
            )
            .bind(session_id)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let removed = usize::try_from(deleted).unwrap_or(usize::MAX);
        if removed > 0 {
            info!(
                "Truncated session {}... removed {} old messages",
                short_id(session_id),
                removed
            );
        }
        Ok(removed)
    }

    async fn session_count(&self) -> Result<usize, MemoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}
