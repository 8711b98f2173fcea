use chrono::{NaiveDate, NaiveTime, Utc};
use libsql::params;
use uuid::Uuid;

use crate::db::{
    CreateObligationParams, ObligationRecord, ObligationSource, ObligationStatus, ObligationStore,
    ObligationType,
};
use crate::error::DatabaseError;

use super::{
    LibSqlBackend, fmt_date, fmt_ts, get_i64, get_opt_text, get_text, opt_text, opt_text_owned,
    parse_date, parse_timestamp,
};

const OBLIGATION_COLUMNS: &str = "id, matter_id, obligation_type, title, due_date, due_time, \
     location, description, status, source, cascade_group, trigger_event, rule_citation, \
     reminder_days, message_id, created_at, updated_at";

fn parse_uuid(raw: &str, field: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(raw)
        .map_err(|e| DatabaseError::Serialization(format!("invalid {} '{}': {}", field, raw, e)))
}

fn row_to_obligation(row: &libsql::Row) -> Result<ObligationRecord, DatabaseError> {
    let type_raw = get_text(row, 2);
    let status_raw = get_text(row, 8);
    let source_raw = get_text(row, 9);
    let due_time = get_opt_text(row, 5)
        .map(|raw| {
            NaiveTime::parse_from_str(&raw, "%H:%M").map_err(|e| {
                DatabaseError::Serialization(format!("invalid due_time '{}': {}", raw, e))
            })
        })
        .transpose()?;
    let reminder_days: Vec<i32> = serde_json::from_str(&get_text(row, 13))
        .map_err(|e| DatabaseError::Serialization(format!("invalid reminder_days: {}", e)))?;

    Ok(ObligationRecord {
        id: parse_uuid(&get_text(row, 0), "id")?,
        matter_id: get_text(row, 1),
        obligation_type: ObligationType::from_db_value(&type_raw).ok_or_else(|| {
            DatabaseError::Serialization(format!("invalid obligation type '{}'", type_raw))
        })?,
        title: get_text(row, 3),
        due_date: parse_date(&get_text(row, 4), "due_date")?,
        due_time,
        location: get_opt_text(row, 6),
        description: get_opt_text(row, 7),
        status: ObligationStatus::from_db_value(&status_raw).ok_or_else(|| {
            DatabaseError::Serialization(format!("invalid obligation status '{}'", status_raw))
        })?,
        source: ObligationSource::from_db_value(&source_raw).ok_or_else(|| {
            DatabaseError::Serialization(format!("invalid obligation source '{}'", source_raw))
        })?,
        cascade_group: get_opt_text(row, 10)
            .map(|raw| parse_uuid(&raw, "cascade_group"))
            .transpose()?,
        trigger_event: get_opt_text(row, 11),
        rule_citation: get_opt_text(row, 12),
        reminder_days,
        message_id: get_opt_text(row, 14),
        created_at: parse_timestamp(&get_text(row, 15))?,
        updated_at: parse_timestamp(&get_text(row, 16))?,
    })
}

async fn collect_obligations(
    mut rows: libsql::Rows,
) -> Result<Vec<ObligationRecord>, DatabaseError> {
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(row_to_obligation(&row)?);
    }
    Ok(out)
}

#[async_trait::async_trait]
impl ObligationStore for LibSqlBackend {
    async fn create_obligation(
        &self,
        input: &CreateObligationParams,
    ) -> Result<ObligationRecord, DatabaseError> {
        let id = Uuid::new_v4();
        let now = fmt_ts(&Utc::now());
        let reminder_days = serde_json::to_string(&input.reminder_days)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        let conn = self.connect().await?;
        conn.execute(
            &format!(
                "INSERT INTO obligations ({OBLIGATION_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'active', ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)"
            ),
            params![
                id.to_string(),
                input.matter_id.as_str(),
                input.obligation_type.as_str(),
                input.title.as_str(),
                fmt_date(&input.due_date),
                opt_text_owned(input.due_time.map(|t| t.format("%H:%M").to_string())),
                opt_text(input.location.as_deref()),
                opt_text(input.description.as_deref()),
                input.source.as_str(),
                opt_text_owned(input.cascade_group.map(|g| g.to_string())),
                opt_text(input.trigger_event.as_deref()),
                opt_text(input.rule_citation.as_deref()),
                reminder_days,
                opt_text(input.message_id.as_deref()),
                now,
            ],
        )
        .await?;

        self.get_obligation(id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created obligation".to_string()))
    }

    async fn get_obligation(&self, id: Uuid) -> Result<Option<ObligationRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {OBLIGATION_COLUMNS} FROM obligations WHERE id = ?1 LIMIT 1"),
                params![id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_obligation(&row)).transpose()
    }

    async fn list_obligations_for_matter(
        &self,
        matter_id: &str,
    ) -> Result<Vec<ObligationRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {OBLIGATION_COLUMNS} FROM obligations \
                     WHERE matter_id = ?1 ORDER BY due_date ASC, created_at ASC"
                ),
                params![matter_id],
            )
            .await?;
        collect_obligations(rows).await
    }

    async fn list_obligations_on(
        &self,
        matter_id: &str,
        due_date: NaiveDate,
    ) -> Result<Vec<ObligationRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {OBLIGATION_COLUMNS} FROM obligations \
                     WHERE matter_id = ?1 AND due_date = ?2 \
                     ORDER BY created_at ASC"
                ),
                params![matter_id, fmt_date(&due_date)],
            )
            .await?;
        collect_obligations(rows).await
    }

    async fn list_active_obligations_due_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ObligationRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {OBLIGATION_COLUMNS} FROM obligations \
                     WHERE status = 'active' AND due_date >= ?1 AND due_date <= ?2 \
                     ORDER BY due_date ASC, created_at ASC"
                ),
                params![fmt_date(&from), fmt_date(&to)],
            )
            .await?;
        collect_obligations(rows).await
    }

    async fn update_obligation_status(
        &self,
        id: Uuid,
        status: ObligationStatus,
    ) -> Result<Option<ObligationRecord>, DatabaseError> {
        let Some(current) = self.get_obligation(id).await? else {
            return Ok(None);
        };
        if !current.status.can_transition_to(status) {
            return Err(DatabaseError::Conflict(format!(
                "obligation {} cannot move from {} to {}",
                id,
                current.status.as_str(),
                status.as_str()
            )));
        }

        let conn = self.connect().await?;
        // Guard on the prior status so two concurrent transitions cannot both win.
        let updated = conn
            .execute(
                "UPDATE obligations SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![
                    status.as_str(),
                    fmt_ts(&Utc::now()),
                    id.to_string(),
                    current.status.as_str()
                ],
            )
            .await?;
        if updated == 0 {
            return Err(DatabaseError::Conflict(format!(
                "obligation {} changed while updating",
                id
            )));
        }
        self.get_obligation(id).await
    }

    async fn count_obligations(&self) -> Result<u64, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query("SELECT COUNT(*) FROM obligations", ())
            .await?
            .next()
            .await?;
        Ok(row.map(|row| get_i64(&row, 0)).unwrap_or(0).max(0) as u64)
    }
}
