use chrono::Utc;
use libsql::params;

use crate::db::{
    MatterRecord, MatterStatus, MatterStore, ProceduralTrack, SenderMappingRecord,
    SenderMappingStore, UpsertMatterParams, normalize_case_number, normalize_party_name,
};
use crate::error::DatabaseError;
use crate::intake::message::normalize_address;

use super::{
    LibSqlBackend, fmt_ts, get_opt_text, get_text, json_string_array, opt_text, opt_text_owned,
    parse_timestamp,
};

const MATTER_COLUMNS: &str = "matter_id, client_name, track, status, case_number, counterpart_name, \
     counterpart_emails, forum, storage_root, created_at, updated_at";

fn parse_track(raw: &str) -> Result<ProceduralTrack, DatabaseError> {
    ProceduralTrack::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid track '{}'", raw)))
}

fn parse_matter_status(raw: &str) -> Result<MatterStatus, DatabaseError> {
    MatterStatus::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid matter status '{}'", raw)))
}

fn row_to_matter_record(row: &libsql::Row) -> Result<MatterRecord, DatabaseError> {
    Ok(MatterRecord {
        matter_id: get_text(row, 0),
        client_name: get_text(row, 1),
        track: parse_track(&get_text(row, 2))?,
        status: parse_matter_status(&get_text(row, 3))?,
        case_number: get_opt_text(row, 4),
        counterpart_name: get_opt_text(row, 5),
        counterpart_emails: json_string_array(&get_text(row, 6))?,
        forum: get_opt_text(row, 7),
        storage_root: get_opt_text(row, 8),
        created_at: parse_timestamp(&get_text(row, 9))?,
        updated_at: parse_timestamp(&get_text(row, 10))?,
    })
}

fn row_to_sender_mapping(row: &libsql::Row) -> Result<SenderMappingRecord, DatabaseError> {
    Ok(SenderMappingRecord {
        sender_email: get_text(row, 0),
        matter_id: get_text(row, 1),
        learned_via: get_text(row, 2),
        created_at: parse_timestamp(&get_text(row, 3))?,
    })
}

#[async_trait::async_trait]
impl MatterStore for LibSqlBackend {
    async fn upsert_matter(
        &self,
        input: &UpsertMatterParams,
    ) -> Result<MatterRecord, DatabaseError> {
        let normalized_name = normalize_party_name(&input.client_name);
        if input.matter_id.trim().is_empty() || normalized_name.is_empty() {
            return Err(DatabaseError::Serialization(
                "matter_id and client_name are required".to_string(),
            ));
        }
        let emails: Vec<String> = input
            .counterpart_emails
            .iter()
            .map(|email| normalize_address(email))
            .filter(|email| !email.is_empty())
            .collect();
        let emails_json =
            serde_json::to_string(&emails).map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let case_number_normalized = input
            .case_number
            .as_deref()
            .map(normalize_case_number)
            .filter(|digits| !digits.is_empty());
        let now = fmt_ts(&Utc::now());

        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO matters \
             (matter_id, client_name, client_name_normalized, track, status, case_number, case_number_normalized, \
              counterpart_name, counterpart_emails, forum, storage_root, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12) \
             ON CONFLICT (matter_id) DO UPDATE SET \
                client_name = excluded.client_name, \
                client_name_normalized = excluded.client_name_normalized, \
                track = excluded.track, \
                status = excluded.status, \
                case_number = excluded.case_number, \
                case_number_normalized = excluded.case_number_normalized, \
                counterpart_name = excluded.counterpart_name, \
                counterpart_emails = excluded.counterpart_emails, \
                forum = excluded.forum, \
                storage_root = excluded.storage_root, \
                updated_at = excluded.updated_at",
            params![
                input.matter_id.trim(),
                input.client_name.trim(),
                normalized_name.as_str(),
                input.track.as_str(),
                input.status.as_str(),
                opt_text(input.case_number.as_deref()),
                opt_text_owned(case_number_normalized),
                opt_text(input.counterpart_name.as_deref()),
                emails_json,
                opt_text(input.forum.as_deref()),
                opt_text(input.storage_root.as_deref()),
                now,
            ],
        )
        .await?;

        self.get_matter(input.matter_id.trim())
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load upserted matter".to_string()))
    }

    async fn get_matter(&self, matter_id: &str) -> Result<Option<MatterRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {MATTER_COLUMNS} FROM matters WHERE matter_id = ?1 LIMIT 1"),
                params![matter_id],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_matter_record(&row)).transpose()
    }

    async fn list_matters(&self) -> Result<Vec<MatterRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {MATTER_COLUMNS} FROM matters WHERE status != 'closed' \
                     ORDER BY client_name_normalized ASC"
                ),
                (),
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_matter_record(&row)?);
        }
        Ok(out)
    }

    async fn find_matter_by_case_number(
        &self,
        case_number: &str,
    ) -> Result<Option<MatterRecord>, DatabaseError> {
        let digits = normalize_case_number(case_number);
        if digits.is_empty() {
            return Ok(None);
        }
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!(
                    "SELECT {MATTER_COLUMNS} FROM matters \
                     WHERE case_number_normalized = ?1 AND status != 'closed' LIMIT 1"
                ),
                params![digits],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_matter_record(&row)).transpose()
    }

    async fn find_matters_by_counterpart_email(
        &self,
        email: &str,
    ) -> Result<Vec<MatterRecord>, DatabaseError> {
        let email = normalize_address(email);
        if email.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {MATTER_COLUMNS} FROM matters \
                     WHERE status != 'closed' \
                       AND EXISTS (SELECT 1 FROM json_each(matters.counterpart_emails) WHERE value = ?1) \
                     ORDER BY client_name_normalized ASC"
                ),
                params![email],
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_matter_record(&row)?);
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl SenderMappingStore for LibSqlBackend {
    async fn find_sender_mapping(
        &self,
        sender_email: &str,
    ) -> Result<Option<SenderMappingRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                "SELECT sender_email, matter_id, learned_via, created_at \
                 FROM sender_mappings WHERE sender_email = ?1 LIMIT 1",
                params![normalize_address(sender_email)],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_sender_mapping(&row)).transpose()
    }

    async fn write_sender_mapping(
        &self,
        sender_email: &str,
        matter_id: &str,
        learned_via: &str,
    ) -> Result<bool, DatabaseError> {
        let email = normalize_address(sender_email);
        if email.is_empty() {
            return Ok(false);
        }
        let conn = self.connect().await?;
        let inserted = conn
            .execute(
                "INSERT INTO sender_mappings (sender_email, matter_id, learned_via, created_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT (sender_email) DO NOTHING",
                params![email, matter_id, learned_via, fmt_ts(&Utc::now())],
            )
            .await?;
        Ok(inserted > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{
        MatterStatus, MatterStore, ProceduralTrack, SenderMappingStore, UpsertMatterParams,
    };

    fn params(matter_id: &str, client: &str, case_number: Option<&str>) -> UpsertMatterParams {
        UpsertMatterParams {
            matter_id: matter_id.to_string(),
            client_name: client.to_string(),
            track: ProceduralTrack::Civil,
            status: MatterStatus::Active,
            case_number: case_number.map(str::to_string),
            counterpart_name: Some("Opposing Counsel".to_string()),
            counterpart_emails: vec!["Counsel@Other.Test".to_string()],
            forum: Some("Third District Court".to_string()),
            storage_root: None,
        }
    }

    #[tokio::test]
    async fn case_numbers_match_on_digits() {
        let (db, _tmp) = crate::testing::test_db().await;
        db.upsert_matter(&params("doe", "Jane Doe", Some("23-1900123")))
            .await
            .expect("upsert");

        let hit = db
            .find_matter_by_case_number("231900123")
            .await
            .expect("lookup")
            .expect("matter should match");
        assert_eq!(hit.matter_id, "doe");
        assert!(
            db.find_matter_by_case_number("999999999")
                .await
                .expect("lookup")
                .is_none()
        );
    }

    #[tokio::test]
    async fn counterpart_emails_are_normalized_and_searchable() {
        let (db, _tmp) = crate::testing::test_db().await;
        db.upsert_matter(&params("doe", "Jane Doe", None))
            .await
            .expect("upsert");

        let hits = db
            .find_matters_by_counterpart_email("counsel@other.test")
            .await
            .expect("lookup");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].counterpart_emails, vec!["counsel@other.test"]);
    }

    #[tokio::test]
    async fn closed_matters_leave_the_roster() {
        let (db, _tmp) = crate::testing::test_db().await;
        db.upsert_matter(&params("doe", "Jane Doe", None))
            .await
            .expect("upsert");
        let mut closed = params("roe", "Richard Roe", None);
        closed.status = MatterStatus::Closed;
        db.upsert_matter(&closed).await.expect("upsert");

        let roster = db.list_matters().await.expect("list");
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].matter_id, "doe");
    }

    #[tokio::test]
    async fn sender_mappings_are_insert_only() {
        let (db, _tmp) = crate::testing::test_db().await;
        db.upsert_matter(&params("doe", "Jane Doe", None))
            .await
            .expect("upsert");
        db.upsert_matter(&params("roe", "Richard Roe", None))
            .await
            .expect("upsert");

        assert!(
            db.write_sender_mapping("Client@Mail.Test", "doe", "model_verified")
                .await
                .expect("write")
        );
        assert!(
            !db.write_sender_mapping("client@mail.test", "roe", "model_verified")
                .await
                .expect("write")
        );

        let mapping = db
            .find_sender_mapping("client@mail.test")
            .await
            .expect("lookup")
            .expect("mapping exists");
        assert_eq!(mapping.matter_id, "doe");
    }
}
