use crate::config::Config;
use crate::error::{Error, Result};
use crate::preferences::PreferenceUpdate;
use crate::vector::{format_vector, parse_vector};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::ffi::sqlite3_auto_extension;
use rusqlite::{params, OptionalExtension, Row, Statement};
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub mod schema;

/// One stored chat message. Reads always hand out owned copies.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub message_id: u64,
    pub author_id: u64,
    pub channel_id: u64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub author_name: String,
    pub attachment_urls: Vec<String>,
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadMetadata {
    pub thread_id: u64,
    pub author_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPreferences {
    pub user_id: u64,
    pub occupation: Option<String>,
    pub traits: Option<Vec<String>>,
    pub additional_informations: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

const MESSAGE_COLUMNS: &str =
    "message_id, user_id, channel_id, content, timestamp, user_name, attachment_urls, embedding";

/// Upper bound on rows a single similarity query may return.
pub const MAX_SEARCH_ROWS: usize = 10_000;

const INSERT_MESSAGE: &str = "
    INSERT INTO messages (message_id, user_id, channel_id, content, timestamp, user_name, attachment_urls, embedding)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
    ON CONFLICT (message_id) DO NOTHING";

/// Handle to the pooled message store.
///
/// Opened once at process start and passed to whoever needs it; dropping the
/// last clone closes the pool. Every operation checks out one connection for
/// its own duration and returns it when the guard goes out of scope.
#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    pub fn new(config: &Config) -> Result<Self> {
        Self::open(&config.database_url, config.database_pool_size)
    }

    pub fn open(path: impl AsRef<Path>, max_connections: u32) -> Result<Self> {
        register_sqlite_vec();
        let manager = SqliteConnectionManager::file(path.as_ref())
            .with_init(|conn| conn.busy_timeout(Duration::from_secs(5)));
        let pool = Pool::builder()
            .max_size(max_connections.max(1))
            .build(manager)?;

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| {
            error!("Database: failed to check out a connection: {}", e);
            Error::Connection(e)
        })
    }

    pub fn execute_init(&self) -> Result<()> {
        info!("Database: Initializing schema...");
        let conn = self.conn()?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.execute_batch(schema::SCHEMA)?;
        debug!("Database: Schema initialized (journal_mode={})", mode);
        Ok(())
    }

    /// Runs a synchronous store call on the blocking pool.
    pub async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }

    // --- Messages ---

    /// Inserts each record unless its `message_id` is already stored.
    ///
    /// Returns the number of rows actually inserted; existing rows are skipped
    /// silently and a failing row is logged without stopping the rest. Only a
    /// failure to obtain a connection is returned as an error.
    pub fn upsert_batch(&self, records: &[MessageRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        debug!("Database: Attempting to insert {} rows", records.len());
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(INSERT_MESSAGE)?;

        let mut inserted = 0usize;
        for record in records {
            match insert_message(&mut stmt, record) {
                Ok(changed) => inserted += changed,
                Err(source) => {
                    let err = Error::RowWrite {
                        message_id: record.message_id,
                        source,
                    };
                    error!("Database: {}", err);
                }
            }
        }

        debug!(
            "Database: Inserted {} of {} rows ({} already stored or failed)",
            inserted,
            records.len(),
            records.len() - inserted
        );
        Ok(inserted)
    }

    pub fn get_message(&self, message_id: u64) -> Result<Option<MessageRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE message_id = ?1"),
                [message_id],
                message_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn count_messages(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: usize = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Nearest stored messages to `query`, closest first, across the whole
    /// table. Rows without an embedding, or with a different dimension, are
    /// never returned.
    pub fn similarity_search(&self, query: &[f32], limit: usize) -> Result<Vec<MessageRecord>> {
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let limit = limit.min(MAX_SEARCH_ROWS);

        let conn = self.conn()?;
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM (
                SELECT {MESSAGE_COLUMNS}, vec_distance_l2(embedding, ?1) AS distance
                FROM messages
                WHERE CASE WHEN embedding IS NULL THEN 0 ELSE vec_length(embedding) = ?2 END
            )
            ORDER BY distance ASC, message_id ASC
            LIMIT ?3"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![format_vector(query), query.len(), limit],
            message_from_row,
        )?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }

        debug!("Database: Similarity search returned {} results", results.len());
        Ok(results)
    }

    /// A user's messages, newest first, with repeated content collapsed to
    /// its most recent occurrence.
    pub fn user_history(&self, user_id: u64, limit: usize) -> Result<Vec<MessageRecord>> {
        let conn = self.conn()?;
        // With a single MAX() aggregate SQLite takes the bare columns from the
        // row holding the maximum, so each content group yields its newest row.
        let mut stmt = conn.prepare(
            "SELECT message_id, user_id, channel_id, content, MAX(timestamp) AS timestamp,
                    user_name, attachment_urls, embedding
             FROM messages
             WHERE user_id = ?1
             GROUP BY content
             ORDER BY timestamp DESC, message_id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit], message_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    // --- Managed threads ---

    pub fn get_thread(&self, thread_id: u64) -> Result<Option<ThreadMetadata>> {
        let conn = self.conn()?;
        let thread = conn
            .query_row(
                "SELECT thread_id, author_id FROM managed_threads WHERE thread_id = ?1",
                [thread_id],
                |row| {
                    Ok(ThreadMetadata {
                        thread_id: row.get(0)?,
                        author_id: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(thread)
    }

    /// Records the owner of a new thread. A thread already on record keeps
    /// its owner and the call fails with `DuplicateThread`.
    pub fn create_thread(&self, thread_id: u64, author_id: u64) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT INTO managed_threads (thread_id, author_id) VALUES (?1, ?2)
             ON CONFLICT (thread_id) DO NOTHING",
            params![thread_id, author_id],
        )?;

        if changed == 0 {
            warn!("Database: thread {} is already managed", thread_id);
            return Err(Error::DuplicateThread(thread_id));
        }
        debug!("Database: thread {} owned by {}", thread_id, author_id);
        Ok(())
    }

    // --- User preferences ---

    pub fn get_user_preferences(&self, user_id: u64) -> Result<Option<UserPreferences>> {
        let conn = self.conn()?;
        let prefs = conn
            .query_row(
                "SELECT user_id, occupation, traits, additional_informations, created_at, updated_at
                 FROM user_preferences WHERE user_id = ?1",
                [user_id],
                |row| {
                    let traits: Option<String> = row.get(2)?;
                    let traits = traits
                        .map(|t| serde_json::from_str::<Vec<String>>(&t))
                        .transpose()
                        .map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e))
                        })?;
                    let created_at: Option<String> = row.get(4)?;
                    let updated_at: Option<String> = row.get(5)?;
                    Ok(UserPreferences {
                        user_id: row.get(0)?,
                        occupation: row.get(1)?,
                        traits,
                        additional_informations: row.get(3)?,
                        created_at: created_at.as_deref().and_then(parse_sqlite_utc),
                        updated_at: updated_at.as_deref().and_then(parse_sqlite_utc),
                    })
                },
            )
            .optional()?;
        Ok(prefs)
    }

    pub fn update_user_preferences(&self, user_id: u64, update: &PreferenceUpdate) -> Result<()> {
        let value = update
            .to_column_value()
            .map_err(|e| Error::Database(rusqlite::Error::ToSqlConversionFailure(Box::new(e))))?;
        let column = update.column();

        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO user_preferences (user_id, {column}) VALUES (?1, ?2)
                 ON CONFLICT (user_id) DO UPDATE SET {column} = excluded.{column},
                 updated_at = CURRENT_TIMESTAMP"
            ),
            params![user_id, value],
        )?;
        debug!("Database: updated {} for user {}", column, user_id);
        Ok(())
    }
}

fn insert_message(stmt: &mut Statement<'_>, record: &MessageRecord) -> rusqlite::Result<usize> {
    if let Some(embedding) = &record.embedding {
        if embedding.is_empty() || embedding.iter().any(|v| !v.is_finite()) {
            return Err(rusqlite::Error::ToSqlConversionFailure(
                "embedding must be a non-empty vector of finite values".into(),
            ));
        }
    }
    let attachments = serde_json::to_string(&record.attachment_urls)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    let embedding = record.embedding.as_deref().map(format_vector);

    stmt.execute(params![
        record.message_id,
        record.author_id,
        record.channel_id,
        record.content,
        format_timestamp(&record.created_at),
        record.author_name,
        attachments,
        embedding,
    ])
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    let timestamp: String = row.get(4)?;
    let created_at = DateTime::parse_from_rfc3339(&timestamp)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    let attachments: String = row.get(6)?;
    let attachment_urls = serde_json::from_str(&attachments)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;
    let embedding: Option<String> = row.get(7)?;

    Ok(MessageRecord {
        message_id: row.get(0)?,
        author_id: row.get(1)?,
        channel_id: row.get(2)?,
        content: row.get(3)?,
        created_at,
        author_name: row.get(5)?,
        attachment_urls,
        embedding: embedding.as_deref().and_then(parse_vector),
    })
}

/// Fixed-width UTC timestamps so that text ordering is chronological.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_sqlite_utc(ts: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S").ok()?;
    Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

/// Loads sqlite-vec into every connection opened after this call.
fn register_sqlite_vec() {
    static REGISTER: Once = Once::new();
    REGISTER.call_once(|| unsafe {
        sqlite3_auto_extension(Some(std::mem::transmute(sqlite3_vec_init as *const ())));
    });
}
