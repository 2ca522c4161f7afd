use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::models::{self, Channel, EmailVector, MessageSummary, RemoteMessage};
use crate::predicate::{Predicate, Value};
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, Sqlite, sqlite::SqlitePool};
use std::str::FromStr;

const SUMMARY_COLUMNS: &str =
    "id, sender, recipient, subject, snippet, importance, deadline, timestamp, is_read";

/// Handle to the local cache. Cloning shares the underlying pool, which is
/// capped to a single connection so there is only ever one writer.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

fn bind_values<'q>(
    mut query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[Value],
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in params {
        query = match value {
            Value::Int(n) => query.bind(*n),
            Value::Text(s) => query.bind(s.clone()),
        };
    }
    query
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    // serializing a slice of f32 cannot fail
    serde_json::to_vec(vector).unwrap_or_default()
}

fn decode_vector(bytes: &[u8]) -> serde_json::Result<Vec<f32>> {
    serde_json::from_slice(bytes)
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout());

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        let schema = include_str!("../schema.sql");
        sqlx::query(schema).execute(&self.pool).await?;
        Ok(())
    }

    /// Inserts the metadata row unless the id is already cached. Returns
    /// whether a row was written.
    pub async fn insert_message_if_absent(&self, msg: &RemoteMessage) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO messages (id, sender, recipient, subject, snippet, timestamp, is_read)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&msg.id)
        .bind(&msg.sender)
        .bind(msg.recipient())
        .bind(&msg.subject)
        .bind(&msg.snippet)
        .bind(msg.internal_date)
        .bind(msg.is_read())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Inserts or overwrites the metadata and read flag. Body and enrichment
    /// columns of an existing row are kept.
    pub async fn upsert_message_metadata(&self, msg: &RemoteMessage) -> Result<()> {
        sqlx::query(
            "INSERT INTO messages (id, sender, recipient, subject, snippet, timestamp, is_read)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET sender=excluded.sender, recipient=excluded.recipient,
             subject=excluded.subject, snippet=excluded.snippet, timestamp=excluded.timestamp,
             is_read=excluded.is_read",
        )
        .bind(&msg.id)
        .bind(&msg.sender)
        .bind(msg.recipient())
        .bind(&msg.subject)
        .bind(&msg.snippet)
        .bind(msg.internal_date)
        .bind(msg.is_read())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_message(&self, id: &str) -> Result<Option<models::Message>> {
        let message = sqlx::query_as::<_, models::Message>(
            "SELECT id, sender, recipient, subject, snippet, timestamp, body, summary, importance, deadline, is_read
             FROM messages WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(message)
    }

    /// Returns the cached body when it is present and non-empty.
    pub async fn get_body(&self, id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT body FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .and_then(|r| r.get::<Option<String>, _>(0))
            .filter(|b| !b.is_empty()))
    }

    pub async fn has_body(&self, id: &str) -> Result<bool> {
        Ok(self.get_body(id).await?.is_some())
    }

    /// Returns false when the message is not cached, so nothing was stored.
    pub async fn set_body(&self, id: &str, body: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE messages SET body = ? WHERE id = ?")
            .bind(body)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_summary(&self, id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT summary FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .and_then(|r| r.get::<Option<String>, _>(0))
            .filter(|s| !s.is_empty()))
    }

    pub async fn set_summary(&self, id: &str, summary: &str) -> Result<()> {
        sqlx::query("UPDATE messages SET summary = ? WHERE id = ?")
            .bind(summary)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Writes whichever signals are present; `None` leaves the column as is.
    pub async fn set_signals(
        &self,
        id: &str,
        importance: Option<i64>,
        deadline: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE messages SET importance = COALESCE(?, importance), deadline = COALESCE(?, deadline)
             WHERE id = ?",
        )
        .bind(importance)
        .bind(deadline)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Sender and subject of a cached message, for composing embedding text.
    pub async fn get_header(&self, id: &str) -> Result<Option<(String, String)>> {
        let row = sqlx::query("SELECT sender, subject FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| (r.get(0), r.get(1))))
    }

    pub async fn mark_message_as_read(&self, id: &str, is_read: bool) -> Result<()> {
        sqlx::query("UPDATE messages SET is_read = ? WHERE id = ?")
            .bind(is_read)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn message_exists(&self, id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Deletes the message and its vector together. Returns whether a
    /// message row existed.
    pub async fn delete_message(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM email_vectors WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_messages_matching(
        &self,
        predicate: &Predicate,
    ) -> Result<Vec<MessageSummary>> {
        let (condition, params) = predicate.to_sql();
        let sql = format!(
            "SELECT {} FROM messages WHERE {} ORDER BY timestamp DESC",
            SUMMARY_COLUMNS, condition
        );
        let rows = bind_values(sqlx::query(&sql), &params)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(summary_from_row).collect())
    }

    /// Resolves ids to summaries, keeping the order of `ids`. Unknown ids
    /// are dropped.
    pub async fn get_messages_by_ids(&self, ids: &[String]) -> Result<Vec<MessageSummary>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM messages WHERE id IN ({})",
            SUMMARY_COLUMNS, placeholders
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        let mut found: Vec<MessageSummary> = rows.iter().map(summary_from_row).collect();

        found.sort_by_key(|m| ids.iter().position(|id| *id == m.id));
        Ok(found)
    }

    /// Replaces every channel definition with `channels`, in order.
    pub async fn replace_channels(&self, channels: &[Channel]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM channels").execute(&mut *tx).await?;
        for channel in channels {
            sqlx::query("INSERT INTO channels (name, predicate, ttl_days) VALUES (?, ?, ?)")
                .bind(&channel.name)
                .bind(&channel.predicate)
                .bind(channel.ttl_days)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_channels(&self) -> Result<Vec<Channel>> {
        let rows = sqlx::query("SELECT name, predicate, ttl_days FROM channels ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| Channel {
                name: row.get(0),
                predicate: row.get(1),
                ttl_days: row.get(2),
            })
            .collect())
    }

    pub async fn get_channel(&self, name: &str) -> Result<Option<Channel>> {
        let row = sqlx::query("SELECT name, predicate, ttl_days FROM channels WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| Channel {
            name: row.get(0),
            predicate: row.get(1),
            ttl_days: row.get(2),
        }))
    }

    /// Deletes messages matching `predicate` whose timestamp is older than
    /// `cutoff_ms`, along with their vectors.
    pub async fn delete_expired(&self, predicate: &Predicate, cutoff_ms: i64) -> Result<u64> {
        let (condition, params) = predicate.to_sql();
        let scope = format!("({}) AND timestamp < ?", condition);

        let mut tx = self.pool.begin().await?;
        let vectors_sql = format!(
            "DELETE FROM email_vectors WHERE id IN (SELECT id FROM messages WHERE {})",
            scope
        );
        bind_values(sqlx::query(&vectors_sql), &params)
            .bind(cutoff_ms)
            .execute(&mut *tx)
            .await?;

        let messages_sql = format!("DELETE FROM messages WHERE {}", scope);
        let result = bind_values(sqlx::query(&messages_sql), &params)
            .bind(cutoff_ms)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    pub async fn save_vector(&self, id: &str, content: &str, vector: &[f32]) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO email_vectors (id, content, vector) VALUES (?, ?, ?)")
            .bind(id)
            .bind(content)
            .bind(encode_vector(vector))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_vector(&self, id: &str) -> Result<Option<EmailVector>> {
        let row = sqlx::query("SELECT id, content, vector FROM email_vectors WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let bytes: Vec<u8> = row.get(2);
        match decode_vector(&bytes) {
            Ok(vector) => Ok(Some(EmailVector {
                id: row.get(0),
                content: row.get(1),
                vector,
            })),
            Err(e) => {
                tracing::warn!("Stored vector for {} is unreadable: {}", id, e);
                Ok(None)
            }
        }
    }

    /// Every decodable (id, vector) pair. Rows that fail to decode are
    /// logged and left out.
    pub async fn get_all_vectors(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let rows = sqlx::query("SELECT id, vector FROM email_vectors")
            .fetch_all(&self.pool)
            .await?;

        let mut vectors = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get(0);
            let bytes: Vec<u8> = row.get(1);
            match decode_vector(&bytes) {
                Ok(v) => vectors.push((id, v)),
                Err(e) => tracing::warn!("Skipping unreadable vector for {}: {}", id, e),
            }
        }
        Ok(vectors)
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn summary_from_row(row: &sqlx::sqlite::SqliteRow) -> MessageSummary {
    MessageSummary {
        id: row.get(0),
        sender: row.get(1),
        recipient: row.get(2),
        subject: row.get(3),
        snippet: row.get(4),
        importance: row.get(5),
        deadline: row.get(6),
        timestamp: row.get(7),
        is_read: row.get(8),
    }
}
