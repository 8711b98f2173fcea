//! libSQL (embedded SQLite fork) backend for the `Database` trait.
//!
//! Timestamps are stored as RFC 3339 text written from Rust so that string
//! comparison orders them correctly; dates are stored as `%Y-%m-%d`.

mod ledger;
mod obligations;
mod registry;
mod waves;

use std::path::Path;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use libsql::params;

use crate::db::{CheckpointStore, Database};
use crate::error::DatabaseError;

pub struct LibSqlBackend {
    db: libsql::Database,
}

impl LibSqlBackend {
    /// Open (or create) a local database file.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("failed to open {}: {}", path.display(), e)))?;
        Ok(Self { db })
    }

    pub async fn connect(&self) -> Result<libsql::Connection, DatabaseError> {
        self.db
            .connect()
            .map_err(|e| DatabaseError::Pool(e.to_string()))
    }
}

pub(crate) fn fmt_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn fmt_date(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| DatabaseError::Serialization(format!("invalid timestamp '{}': {}", raw, e)))
}

pub(crate) fn parse_date(raw: &str, field: &str) -> Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| DatabaseError::Serialization(format!("invalid {} '{}': {}", field, raw, e)))
}

pub(crate) fn get_text(row: &libsql::Row, idx: i32) -> String {
    row.get::<String>(idx).unwrap_or_default()
}

pub(crate) fn get_opt_text(row: &libsql::Row, idx: i32) -> Option<String> {
    match row.get_value(idx) {
        Ok(libsql::Value::Text(value)) => Some(value),
        _ => None,
    }
}

pub(crate) fn get_i64(row: &libsql::Row, idx: i32) -> i64 {
    row.get::<i64>(idx).unwrap_or_default()
}

pub(crate) fn opt_text(value: Option<&str>) -> libsql::Value {
    match value {
        Some(value) => libsql::Value::Text(value.to_string()),
        None => libsql::Value::Null,
    }
}

pub(crate) fn opt_text_owned(value: Option<String>) -> libsql::Value {
    match value {
        Some(value) => libsql::Value::Text(value),
        None => libsql::Value::Null,
    }
}

pub(crate) fn json_string_array(raw: &str) -> Result<Vec<String>, DatabaseError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

#[async_trait::async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute_batch(crate::db::libsql_migrations::SCHEMA)
            .await
            .map_err(|e| DatabaseError::Query(format!("migration failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CheckpointStore for LibSqlBackend {
    async fn get_checkpoint(&self, source: &str) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                "SELECT last_seen_at FROM intake_checkpoints WHERE source = ?1 LIMIT 1",
                params![source],
            )
            .await?
            .next()
            .await?;
        row.map(|row| parse_timestamp(&get_text(&row, 0)))
            .transpose()
    }

    async fn set_checkpoint(
        &self,
        source: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO intake_checkpoints (source, last_seen_at, updated_at) \
             VALUES (?1, ?2, ?3) \
             ON CONFLICT (source) DO UPDATE SET \
                last_seen_at = MAX(intake_checkpoints.last_seen_at, excluded.last_seen_at), \
                updated_at = excluded.updated_at",
            params![source, fmt_ts(&seen_at), fmt_ts(&Utc::now())],
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::parse_timestamp;
    use crate::db::{CheckpointStore, Database};
    use crate::testing::test_db;

    #[test]
    fn parse_timestamp_accepts_sqlite_and_rfc3339() {
        assert!(parse_timestamp("2026-03-02T10:00:00.000000Z").is_ok());
        assert!(parse_timestamp("2026-03-02 10:00:00").is_ok());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let (backend, _tmp) = test_db().await;
        backend
            .run_migrations()
            .await
            .expect("second migration run should succeed");
    }

    #[tokio::test]
    async fn checkpoint_never_moves_backwards() {
        let (backend, _tmp) = test_db().await;
        let later = Utc.with_ymd_and_hms(2026, 3, 5, 8, 0, 0).single().expect("ts");
        let earlier = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).single().expect("ts");

        assert!(backend.get_checkpoint("court").await.expect("get").is_none());
        backend.set_checkpoint("court", later).await.expect("set");
        backend.set_checkpoint("court", earlier).await.expect("set");

        assert_eq!(
            backend.get_checkpoint("court").await.expect("get"),
            Some(later)
        );
    }
}
