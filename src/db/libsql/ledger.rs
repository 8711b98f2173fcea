use std::collections::HashSet;

use chrono::Utc;
use libsql::params;
use uuid::Uuid;

use crate::db::{
    Confidence, DocumentCategory, FiledDocumentRecord, FiledDocumentStore, PendingFilingRecord,
    ProcessedMessageRecord, ProcessedMessageStore, ProcessedStatus, ReminderStore,
    ResolutionMethod,
};
use crate::error::DatabaseError;
use crate::intake::message::InboundMessage;

use super::{LibSqlBackend, fmt_ts, get_i64, get_opt_text, get_text, opt_text, parse_timestamp};

const PROCESSED_COLUMNS: &str = "external_id, source, matter_id, method, confidence, \
     attachments_filed, obligations_extracted, status, error, processed_at";

fn row_to_processed(row: &libsql::Row) -> Result<ProcessedMessageRecord, DatabaseError> {
    let method_raw = get_text(row, 3);
    let confidence_raw = get_text(row, 4);
    let status_raw = get_text(row, 7);
    Ok(ProcessedMessageRecord {
        external_id: get_text(row, 0),
        source: get_text(row, 1),
        matter_id: get_opt_text(row, 2),
        method: ResolutionMethod::from_db_value(&method_raw).ok_or_else(|| {
            DatabaseError::Serialization(format!("invalid resolution method '{}'", method_raw))
        })?,
        confidence: Confidence::from_db_value(&confidence_raw).ok_or_else(|| {
            DatabaseError::Serialization(format!("invalid confidence '{}'", confidence_raw))
        })?,
        attachments_filed: get_i64(row, 5).max(0) as u32,
        obligations_extracted: get_i64(row, 6).max(0) as u32,
        status: ProcessedStatus::from_db_value(&status_raw).ok_or_else(|| {
            DatabaseError::Serialization(format!("invalid processed status '{}'", status_raw))
        })?,
        error: get_opt_text(row, 8),
        processed_at: parse_timestamp(&get_text(row, 9))?,
    })
}

fn row_to_filed_document(row: &libsql::Row) -> Result<FiledDocumentRecord, DatabaseError> {
    let id_raw = get_text(row, 0);
    let category_raw = get_text(row, 3);
    Ok(FiledDocumentRecord {
        id: Uuid::parse_str(&id_raw)
            .map_err(|e| DatabaseError::Serialization(format!("invalid id '{}': {}", id_raw, e)))?,
        matter_id: get_text(row, 1),
        filename: get_text(row, 2),
        category: DocumentCategory::from_db_value(&category_raw).ok_or_else(|| {
            DatabaseError::Serialization(format!("invalid category '{}'", category_raw))
        })?,
        destination: get_text(row, 4),
        message_id: get_opt_text(row, 5),
        size_bytes: get_i64(row, 6).max(0) as u64,
        filed_at: parse_timestamp(&get_text(row, 7))?,
    })
}

fn row_to_pending_filing(row: &libsql::Row) -> Result<PendingFilingRecord, DatabaseError> {
    let message: InboundMessage = serde_json::from_str(&get_text(row, 2))
        .map_err(|e| DatabaseError::Serialization(format!("invalid pending message: {}", e)))?;
    Ok(PendingFilingRecord {
        matter_id: get_text(row, 0),
        document_type: get_opt_text(row, 1),
        message,
        attempts: get_i64(row, 3).max(0) as u32,
        created_at: parse_timestamp(&get_text(row, 4))?,
        updated_at: parse_timestamp(&get_text(row, 5))?,
    })
}

async fn count_rows(backend: &LibSqlBackend, table: &str) -> Result<u64, DatabaseError> {
    let conn = backend.connect().await?;
    let row = conn
        .query(&format!("SELECT COUNT(*) FROM {table}"), ())
        .await?
        .next()
        .await?;
    Ok(row.map(|row| get_i64(&row, 0)).unwrap_or(0).max(0) as u64)
}

#[async_trait::async_trait]
impl ProcessedMessageStore for LibSqlBackend {
    async fn find_processed_ids(
        &self,
        external_ids: &[String],
    ) -> Result<HashSet<String>, DatabaseError> {
        if external_ids.is_empty() {
            return Ok(HashSet::new());
        }
        // One round trip for the whole backlog: ids travel as a JSON array.
        let ids_json = serde_json::to_string(external_ids)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                "SELECT external_id FROM processed_messages \
                 WHERE external_id IN (SELECT value FROM json_each(?1))",
                params![ids_json],
            )
            .await?;

        let mut seen = HashSet::new();
        while let Some(row) = rows.next().await? {
            seen.insert(get_text(&row, 0));
        }
        Ok(seen)
    }

    async fn record_processed(&self, row: &ProcessedMessageRecord) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let inserted = conn
            .execute(
                &format!(
                    "INSERT INTO processed_messages ({PROCESSED_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
                     ON CONFLICT (external_id) DO NOTHING"
                ),
                params![
                    row.external_id.as_str(),
                    row.source.as_str(),
                    opt_text(row.matter_id.as_deref()),
                    row.method.as_str(),
                    row.confidence.as_str(),
                    i64::from(row.attachments_filed),
                    i64::from(row.obligations_extracted),
                    row.status.as_str(),
                    opt_text(row.error.as_deref()),
                    fmt_ts(&row.processed_at),
                ],
            )
            .await?;
        Ok(inserted > 0)
    }

    async fn get_processed(
        &self,
        external_id: &str,
    ) -> Result<Option<ProcessedMessageRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!(
                    "SELECT {PROCESSED_COLUMNS} FROM processed_messages \
                     WHERE external_id = ?1 LIMIT 1"
                ),
                params![external_id],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_processed(&row)).transpose()
    }

    async fn list_processed_by_status(
        &self,
        status: ProcessedStatus,
        limit: usize,
    ) -> Result<Vec<ProcessedMessageRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {PROCESSED_COLUMNS} FROM processed_messages \
                     WHERE status = ?1 ORDER BY processed_at DESC LIMIT ?2"
                ),
                params![status.as_str(), limit.min(i64::MAX as usize) as i64],
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_processed(&row)?);
        }
        Ok(out)
    }

    async fn count_processed(&self) -> Result<u64, DatabaseError> {
        count_rows(self, "processed_messages").await
    }
}

#[async_trait::async_trait]
impl ReminderStore for LibSqlBackend {
    async fn reminder_sent(
        &self,
        obligation_id: Uuid,
        threshold: i32,
    ) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                "SELECT 1 FROM reminders_sent WHERE obligation_id = ?1 AND threshold_days = ?2 LIMIT 1",
                params![obligation_id.to_string(), i64::from(threshold)],
            )
            .await?
            .next()
            .await?;
        Ok(row.is_some())
    }

    async fn record_reminder_sent(
        &self,
        obligation_id: Uuid,
        threshold: i32,
    ) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let inserted = conn
            .execute(
                "INSERT INTO reminders_sent (obligation_id, threshold_days, sent_at) \
                 VALUES (?1, ?2, ?3) \
                 ON CONFLICT (obligation_id, threshold_days) DO NOTHING",
                params![
                    obligation_id.to_string(),
                    i64::from(threshold),
                    fmt_ts(&Utc::now())
                ],
            )
            .await?;
        Ok(inserted > 0)
    }
}

#[async_trait::async_trait]
impl FiledDocumentStore for LibSqlBackend {
    async fn find_filed_document(
        &self,
        matter_id: &str,
        filename: &str,
        category: DocumentCategory,
    ) -> Result<Option<FiledDocumentRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                "SELECT id, matter_id, filename, category, destination, message_id, size_bytes, filed_at \
                 FROM filed_documents \
                 WHERE matter_id = ?1 AND filename = ?2 AND category = ?3 LIMIT 1",
                params![matter_id, filename, category.as_str()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_filed_document(&row)).transpose()
    }

    async fn record_filed_document(
        &self,
        row: &FiledDocumentRecord,
    ) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let inserted = conn
            .execute(
                "INSERT INTO filed_documents \
                 (id, matter_id, filename, category, destination, message_id, size_bytes, filed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                 ON CONFLICT (matter_id, filename, category) DO NOTHING",
                params![
                    row.id.to_string(),
                    row.matter_id.as_str(),
                    row.filename.as_str(),
                    row.category.as_str(),
                    row.destination.as_str(),
                    opt_text(row.message_id.as_deref()),
                    row.size_bytes.min(i64::MAX as u64) as i64,
                    fmt_ts(&row.filed_at),
                ],
            )
            .await?;
        Ok(inserted > 0)
    }

    async fn count_filed_documents(&self) -> Result<u64, DatabaseError> {
        count_rows(self, "filed_documents").await
    }

    async fn upsert_pending_filing(
        &self,
        matter_id: &str,
        document_type: Option<&str>,
        message: &InboundMessage,
    ) -> Result<(), DatabaseError> {
        let message_json = serde_json::to_string(message)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let now = fmt_ts(&Utc::now());
        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO pending_filings \
             (external_id, matter_id, document_type, message, attempts, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5) \
             ON CONFLICT (external_id) DO UPDATE SET \
             matter_id = excluded.matter_id, document_type = excluded.document_type, \
             message = excluded.message, attempts = attempts + 1, updated_at = excluded.updated_at",
            params![
                message.external_id.as_str(),
                matter_id,
                opt_text(document_type),
                message_json,
                now,
            ],
        )
        .await?;
        Ok(())
    }

    async fn list_pending_filings(
        &self,
        limit: usize,
    ) -> Result<Vec<PendingFilingRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                "SELECT matter_id, document_type, message, attempts, created_at, updated_at \
                 FROM pending_filings ORDER BY created_at ASC, external_id ASC LIMIT ?1",
                params![limit.min(i64::MAX as usize) as i64],
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_pending_filing(&row)?);
        }
        Ok(out)
    }

    async fn clear_pending_filing(&self, external_id: &str) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let deleted = conn
            .execute(
                "DELETE FROM pending_filings WHERE external_id = ?1",
                params![external_id],
            )
            .await?;
        Ok(deleted > 0)
    }
}
