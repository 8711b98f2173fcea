use std::collections::HashSet;

use chrono::{DateTime, Utc};
use libsql::params;
use uuid::Uuid;

use crate::db::{WaveStateRecord, WaveStateStore};
use crate::error::DatabaseError;
use crate::intake::message::InboundMessage;

use super::{LibSqlBackend, fmt_ts, get_i64, get_text, parse_timestamp};

fn row_to_wave_state(row: &libsql::Row) -> Result<WaveStateRecord, DatabaseError> {
    let batch_raw = get_text(row, 0);
    let queue: Vec<InboundMessage> = serde_json::from_str(&get_text(row, 1))
        .map_err(|e| DatabaseError::Serialization(format!("invalid wave queue: {}", e)))?;
    Ok(WaveStateRecord {
        batch_id: Uuid::parse_str(&batch_raw).map_err(|e| {
            DatabaseError::Serialization(format!("invalid batch id '{}': {}", batch_raw, e))
        })?,
        queue,
        waves_completed: get_i64(row, 2).max(0) as u32,
        total: get_i64(row, 3).max(0) as u32,
        done: get_i64(row, 4) != 0,
        version: get_i64(row, 5),
        created_at: parse_timestamp(&get_text(row, 6))?,
        updated_at: parse_timestamp(&get_text(row, 7))?,
    })
}

fn queue_json(queue: &[InboundMessage]) -> Result<String, DatabaseError> {
    serde_json::to_string(queue).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

#[async_trait::async_trait]
impl WaveStateStore for LibSqlBackend {
    async fn create_wave_state(&self, state: &WaveStateRecord) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        let inserted = conn
            .execute(
                "INSERT INTO wave_batches \
                 (batch_id, queue, waves_completed, total, done, version, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                 ON CONFLICT (batch_id) DO NOTHING",
                params![
                    state.batch_id.to_string(),
                    queue_json(&state.queue)?,
                    i64::from(state.waves_completed),
                    i64::from(state.total),
                    i64::from(state.done),
                    state.version,
                    fmt_ts(&state.created_at),
                    fmt_ts(&state.updated_at),
                ],
            )
            .await?;
        if inserted == 0 {
            return Err(DatabaseError::Conflict(format!(
                "batch {} already exists",
                state.batch_id
            )));
        }
        Ok(())
    }

    async fn get_wave_state(
        &self,
        batch_id: Uuid,
    ) -> Result<Option<WaveStateRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                "SELECT batch_id, queue, waves_completed, total, done, version, created_at, updated_at \
                 FROM wave_batches WHERE batch_id = ?1 LIMIT 1",
                params![batch_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_wave_state(&row)).transpose()
    }

    async fn replace_wave_state(
        &self,
        batch_id: Uuid,
        expected_version: i64,
        queue: &[InboundMessage],
        waves_completed: u32,
        done: bool,
    ) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let updated = conn
            .execute(
                "UPDATE wave_batches \
                 SET queue = ?1, waves_completed = ?2, done = ?3, version = version + 1, updated_at = ?4 \
                 WHERE batch_id = ?5 AND version = ?6",
                params![
                    queue_json(queue)?,
                    i64::from(waves_completed),
                    i64::from(done),
                    fmt_ts(&Utc::now()),
                    batch_id.to_string(),
                    expected_version,
                ],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn purge_completed_wave_states(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let conn = self.connect().await?;
        let deleted = conn
            .execute(
                "DELETE FROM wave_batches WHERE done = 1 AND updated_at < ?1",
                params![fmt_ts(&older_than)],
            )
            .await?;
        Ok(deleted)
    }

    async fn queued_message_ids(&self) -> Result<HashSet<String>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query("SELECT queue FROM wave_batches WHERE done = 0", ())
            .await?;

        let mut ids = HashSet::new();
        while let Some(row) = rows.next().await? {
            let queue: Vec<InboundMessage> = serde_json::from_str(&get_text(&row, 0))
                .map_err(|e| DatabaseError::Serialization(format!("invalid wave queue: {}", e)))?;
            ids.extend(queue.into_iter().map(|message| message.external_id));
        }
        Ok(ids)
    }
}
