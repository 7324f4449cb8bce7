use std::env;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Sqlite,
};

use crate::configuration::types::StreamSeed;
use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::Storage;
use crate::storage::types::{
    NewRecording, RecordingEntry, RecordingFilter, RecordingStatus, StreamConfig,
};

// Internal row mappings to avoid manual try_get
#[derive(Debug, sqlx::FromRow)]
struct StreamRow {
    id: i64,
    name: String,
    url: String,
    enabled: i64,
    format: String,
    segment_time: i64,
    channels: i64,
    bitrate: Option<String>,
    retention_days: Option<i64>,
    retry_delay_secs: Option<i64>,
    current_status: String,
    last_up: Option<String>,
    last_error: Option<String>,
}

impl StreamRow {
    fn into_config(self) -> Result<StreamConfig, StorageError> {
        Ok(StreamConfig {
            id: self.id,
            name: self.name,
            url: self.url,
            enabled: self.enabled != 0,
            format: self.format,
            segment_time: self.segment_time as u32,
            channels: self.channels as u8,
            bitrate: self.bitrate,
            retention_days: self.retention_days,
            retry_delay_secs: self.retry_delay_secs.map(|v| v as u64),
            current_status: self.current_status,
            last_up: parse_opt_ts(self.last_up)?,
            last_error: self.last_error,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RecordingRow {
    id: i64,
    stream_id: i64,
    path: String,
    started_at: String,
    size_bytes: i64,
    duration_seconds: f64,
    status: String,
    deleted_at: Option<String>,
}

impl RecordingRow {
    fn into_entry(self) -> Result<RecordingEntry, StorageError> {
        Ok(RecordingEntry {
            id: self.id,
            stream_id: self.stream_id,
            path: self.path,
            started_at: parse_ts(&self.started_at)?,
            size_bytes: self.size_bytes,
            duration_seconds: self.duration_seconds,
            status: RecordingStatus::parse(&self.status),
            deleted_at: parse_opt_ts(self.deleted_at)?,
        })
    }
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StorageError::ReadFailed)
}

fn parse_opt_ts(value: Option<String>) -> Result<Option<DateTime<Utc>>, StorageError> {
    match value {
        Some(s) => Ok(Some(parse_ts(&s)?)),
        None => Ok(None),
    }
}

pub struct DatabaseStorage {
    pool: Pool<Sqlite>,
}

impl DatabaseStorage {
    /// Default database filename used in the application's working directory
    const DEFAULT_DB_FILE: &'static str = "aircheck.sqlite3";

    /// Create or open the database in the current working directory with the default filename
    pub async fn new() -> Result<Self, StorageError> {
        let cwd = env::current_dir().map_err(|_| StorageError::ConnectionFailed)?;
        let path = cwd.join(Self::DEFAULT_DB_FILE);
        Self::new_file(path).await
    }

    pub async fn new_file<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            std::fs::create_dir_all(parent).map_err(|_| StorageError::WriteFailed)?;
        }
        let opts = SqliteConnectOptions::from_str("sqlite://")
            .map_err(|_| StorageError::ConnectionFailed)?
            .filename(path_ref)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(|_| StorageError::ConnectionFailed)?;
        // ensure foreign keys
        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await
            .map_err(|_| StorageError::WriteFailed)?;
        // create schema
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS streams (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                url TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                format TEXT NOT NULL,
                segment_time INTEGER NOT NULL,
                channels INTEGER NOT NULL,
                bitrate TEXT,
                retention_days INTEGER,
                retry_delay_secs INTEGER,
                current_status TEXT NOT NULL DEFAULT 'stopped',
                last_up TEXT,
                last_error TEXT
            );",
        )
        .execute(&pool)
        .await
        .map_err(|_| StorageError::WriteFailed)?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS recordings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                stream_id INTEGER NOT NULL,
                path TEXT NOT NULL,
                started_at TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                duration_seconds REAL NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                deleted_at TEXT,
                FOREIGN KEY(stream_id) REFERENCES streams(id) ON DELETE CASCADE,
                UNIQUE(stream_id, path)
            );",
        )
        .execute(&pool)
        .await
        .map_err(|_| StorageError::WriteFailed)?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                stream_id INTEGER,
                level TEXT NOT NULL,
                message TEXT NOT NULL,
                ts TEXT NOT NULL,
                FOREIGN KEY(stream_id) REFERENCES streams(id) ON DELETE SET NULL
            );",
        )
        .execute(&pool)
        .await
        .map_err(|_| StorageError::WriteFailed)?;
        Ok(Self { pool })
    }

    async fn get_stream_by_name(&self, name: &str) -> Result<Option<StreamConfig>, StorageError> {
        let row: Option<StreamRow> = sqlx::query_as(
            "SELECT id, name, url, enabled, format, segment_time, channels, bitrate,
                    retention_days, retry_delay_secs, current_status, last_up, last_error
             FROM streams WHERE name = ?1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|_| StorageError::ReadFailed)?;
        row.map(|r| r.into_config()).transpose()
    }
}

#[async_trait]
impl Storage for DatabaseStorage {
    async fn upsert_stream(&self, seed: &StreamSeed) -> Result<StreamConfig, StorageError> {
        // Runtime columns (current_status, last_up, last_error) are left
        // untouched on conflict; an upsert only changes configuration.
        sqlx::query(
            "INSERT INTO streams (name, url, enabled, format, segment_time, channels, bitrate, retention_days, retry_delay_secs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(name) DO UPDATE SET
               url=excluded.url,
               enabled=excluded.enabled,
               format=excluded.format,
               segment_time=excluded.segment_time,
               channels=excluded.channels,
               bitrate=excluded.bitrate,
               retention_days=excluded.retention_days,
               retry_delay_secs=excluded.retry_delay_secs",
        )
        .bind(&seed.name)
        .bind(&seed.url)
        .bind(seed.enabled as i64)
        .bind(&seed.format)
        .bind(seed.segment_time as i64)
        .bind(seed.channels as i64)
        .bind(seed.bitrate.clone())
        .bind(seed.retention_days)
        .bind(seed.retry_delay_secs.map(|v| v as i64))
        .execute(&self.pool)
        .await
        .map_err(|_| StorageError::WriteFailed)?;

        self.get_stream_by_name(&seed.name)
            .await?
            .ok_or(StorageError::ReadFailed)
    }

    async fn get_stream(&self, stream_id: i64) -> Result<Option<StreamConfig>, StorageError> {
        let row: Option<StreamRow> = sqlx::query_as(
            "SELECT id, name, url, enabled, format, segment_time, channels, bitrate,
                    retention_days, retry_delay_secs, current_status, last_up, last_error
             FROM streams WHERE id = ?1",
        )
        .bind(stream_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|_| StorageError::ReadFailed)?;
        row.map(|r| r.into_config()).transpose()
    }

    async fn list_streams(&self) -> Result<Vec<StreamConfig>, StorageError> {
        let rows: Vec<StreamRow> = sqlx::query_as(
            "SELECT id, name, url, enabled, format, segment_time, channels, bitrate,
                    retention_days, retry_delay_secs, current_status, last_up, last_error
             FROM streams ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|_| StorageError::ReadFailed)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row.into_config()?);
        }
        Ok(out)
    }

    async fn set_stream_enabled(
        &self,
        stream_id: i64,
        enabled: bool,
    ) -> Result<(), StorageError> {
        let res = sqlx::query("UPDATE streams SET enabled = ?1 WHERE id = ?2")
            .bind(enabled as i64)
            .bind(stream_id)
            .execute(&self.pool)
            .await
            .map_err(|_| StorageError::WriteFailed)?;
        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn update_stream_status(
        &self,
        stream_id: i64,
        status: &str,
        last_error: Option<&str>,
    ) -> Result<(), StorageError> {
        let last_up = if status == "running" {
            Some(Utc::now().to_rfc3339())
        } else {
            None
        };
        let res = sqlx::query(
            "UPDATE streams SET current_status = ?1,
                                last_error = COALESCE(?2, last_error),
                                last_up = COALESCE(?3, last_up)
             WHERE id = ?4",
        )
        .bind(status)
        .bind(last_error)
        .bind(last_up)
        .bind(stream_id)
        .execute(&self.pool)
        .await
        .map_err(|_| StorageError::WriteFailed)?;
        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn insert_recording(
        &self,
        recording: &NewRecording,
    ) -> Result<RecordingEntry, StorageError> {
        let res = sqlx::query(
            "INSERT INTO recordings (stream_id, path, started_at, size_bytes, duration_seconds, status)
             VALUES (?1, ?2, ?3, ?4, ?5, 'active')",
        )
        .bind(recording.stream_id)
        .bind(&recording.path)
        .bind(recording.started_at.to_rfc3339())
        .bind(recording.size_bytes)
        .bind(recording.duration_seconds)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Duplicate,
            _ => StorageError::WriteFailed,
        })?;
        Ok(RecordingEntry {
            id: res.last_insert_rowid(),
            stream_id: recording.stream_id,
            path: recording.path.clone(),
            started_at: recording.started_at,
            size_bytes: recording.size_bytes,
            duration_seconds: recording.duration_seconds,
            status: RecordingStatus::Active,
            deleted_at: None,
        })
    }

    async fn find_recording_by_path(
        &self,
        stream_id: i64,
        path: &str,
    ) -> Result<Option<RecordingEntry>, StorageError> {
        let row: Option<RecordingRow> = sqlx::query_as(
            "SELECT id, stream_id, path, started_at, size_bytes, duration_seconds, status, deleted_at
             FROM recordings WHERE stream_id = ?1 AND path = ?2",
        )
        .bind(stream_id)
        .bind(path)
        .fetch_optional(&self.pool)
        .await
        .map_err(|_| StorageError::ReadFailed)?;
        row.map(|r| r.into_entry()).transpose()
    }

    async fn list_recordings(
        &self,
        filter: Option<RecordingFilter>,
    ) -> Result<Vec<RecordingEntry>, StorageError> {
        let mut sql = String::from(
            "SELECT id, stream_id, path, started_at, size_bytes, duration_seconds, status, deleted_at FROM recordings",
        );
        let mut clauses: Vec<String> = Vec::new();
        let mut binds: Vec<String> = Vec::new();
        let filter = filter.unwrap_or_default();
        if !filter.include_deleted {
            clauses.push("status != 'deleted'".into());
        }
        if let Some(stream_id) = filter.stream_id {
            clauses.push("stream_id = ?".into());
            binds.push(stream_id.to_string());
        }
        if let Some(since) = filter.since {
            clauses.push("started_at >= ?".into());
            binds.push(since.to_rfc3339());
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY started_at DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut q = sqlx::query_as::<_, RecordingRow>(&sql);
        for b in &binds {
            q = q.bind(b);
        }
        let rows: Vec<RecordingRow> = q
            .fetch_all(&self.pool)
            .await
            .map_err(|_| StorageError::ReadFailed)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row.into_entry()?);
        }
        Ok(out)
    }

    async fn list_expired(
        &self,
        stream_id: i64,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<RecordingEntry>, StorageError> {
        let rows: Vec<RecordingRow> = sqlx::query_as(
            "SELECT id, stream_id, path, started_at, size_bytes, duration_seconds, status, deleted_at
             FROM recordings
             WHERE stream_id = ?1 AND started_at < ?2 AND status = 'active'
             ORDER BY started_at ASC LIMIT ?3",
        )
        .bind(stream_id)
        .bind(cutoff.to_rfc3339())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|_| StorageError::ReadFailed)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row.into_entry()?);
        }
        Ok(out)
    }

    async fn mark_deleted(
        &self,
        recording_id: i64,
        deleted_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let res = sqlx::query(
            "UPDATE recordings SET status = 'deleted', deleted_at = ?1
             WHERE id = ?2 AND status != 'deleted'",
        )
        .bind(deleted_at.to_rfc3339())
        .bind(recording_id)
        .execute(&self.pool)
        .await
        .map_err(|_| StorageError::WriteFailed)?;
        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn record_event(
        &self,
        stream_id: Option<i64>,
        level: &str,
        message: &str,
    ) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO events (stream_id, level, message, ts) VALUES (?1, ?2, ?3, ?4)")
            .bind(stream_id)
            .bind(level)
            .bind(message)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|_| StorageError::WriteFailed)?;
        Ok(())
    }
}
