//! SQLite-backed record store
//!
//! Timestamps are stored as RFC 3339 text. The schema is created on
//! connect if missing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use super::{MessageRecord, RecordStore, SessionRecord, StoreError, StoreResult};
use crate::types::{SessionId, SessionState};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS whatsapp_sessions (
        session_id   TEXT PRIMARY KEY NOT NULL,
        status       TEXT NOT NULL,
        phone        TEXT,
        name         TEXT,
        qr_code      TEXT,
        is_connected INTEGER NOT NULL DEFAULT 0,
        connected_at TEXT,
        updated_at   TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS whatsapp_messages (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        number     TEXT NOT NULL,
        message    TEXT NOT NULL,
        from_me    INTEGER NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_messages_session ON whatsapp_messages (session_id, id)",
];

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::unavailable(e.to_string())
            }
            other => StoreError::query(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// Connect to `database_url` (e.g. `sqlite://tenantlink.db?mode=rwc`)
    /// and create the schema
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        info!(url = %database_url, "Connected to SQLite record store");
        Ok(store)
    }

    async fn migrate(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn session_from_row(row: &SqliteRow) -> StoreResult<SessionRecord> {
        let raw_id: String = row.try_get("session_id")?;
        let corrupt = |message: String| StoreError::Corrupt {
            session_id: raw_id.clone(),
            message,
        };

        let session_id = SessionId::parse(&raw_id).map_err(|e| corrupt(e.to_string()))?;
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<SessionState>()
            .map_err(|e| corrupt(e.to_string()))?;
        let connected_at: Option<String> = row.try_get("connected_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(SessionRecord {
            session_id,
            status,
            phone: row.try_get("phone")?,
            name: row.try_get("name")?,
            qr_code: row.try_get("qr_code")?,
            is_connected: row.try_get("is_connected")?,
            connected_at: connected_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()
                .map_err(corrupt)?,
            updated_at: parse_timestamp(&updated_at).map_err(corrupt)?,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{}': {}", raw, e))
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn upsert_session(&self, record: &SessionRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO whatsapp_sessions
                (session_id, status, phone, name, qr_code, is_connected, connected_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(session_id) DO UPDATE SET
                status = excluded.status,
                phone = excluded.phone,
                name = excluded.name,
                qr_code = excluded.qr_code,
                is_connected = excluded.is_connected,
                connected_at = excluded.connected_at,
                updated_at = excluded.updated_at",
        )
        .bind(record.session_id.as_str())
        .bind(record.status.as_str())
        .bind(record.phone.as_deref())
        .bind(record.name.as_deref())
        .bind(record.qr_code.as_deref())
        .bind(record.is_connected)
        .bind(record.connected_at.map(|t| t.to_rfc3339()))
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(session_id = %record.session_id, status = %record.status, "Upserted session record");
        Ok(())
    }

    async fn get_session(&self, session_id: &SessionId) -> StoreResult<Option<SessionRecord>> {
        let row = sqlx::query(
            "SELECT session_id, status, phone, name, qr_code, is_connected, connected_at, updated_at
             FROM whatsapp_sessions WHERE session_id = ?1",
        )
        .bind(session_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::session_from_row).transpose()
    }

    async fn delete_session(&self, session_id: &SessionId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM whatsapp_sessions WHERE session_id = ?1")
            .bind(session_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_message(&self, record: &MessageRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO whatsapp_messages (session_id, number, message, from_me, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(record.session_id.as_str())
        .bind(&record.number)
        .bind(&record.message)
        .bind(record.from_self)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn messages_for(&self, session_id: &SessionId) -> StoreResult<Vec<MessageRecord>> {
        let rows = sqlx::query(
            "SELECT number, message, from_me, created_at
             FROM whatsapp_messages WHERE session_id = ?1 ORDER BY id ASC",
        )
        .bind(session_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> StoreResult<MessageRecord> {
                let created_at: String = row.try_get("created_at")?;
                Ok(MessageRecord {
                    session_id: session_id.clone(),
                    number: row.try_get("number")?,
                    message: row.try_get("message")?,
                    from_self: row.try_get("from_me")?,
                    created_at: parse_timestamp(&created_at).map_err(|message| StoreError::Corrupt {
                        session_id: session_id.to_string(),
                        message,
                    })?,
                })
            })
            .collect()
    }
}
