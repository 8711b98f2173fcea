//! Database abstraction layer.
//!
//! Provides a backend-agnostic `Database` trait that unifies all persistence
//! the intake pipeline needs: the matter registry, the learned sender
//! mappings, the processed-message ledger, obligations and their reminder
//! ledger, filed-document dedup records, and the durable wave queue.
//!
//! The embedded libSQL backend lives behind the `libsql` feature.

#[cfg(feature = "libsql")]
pub mod libsql;

#[cfg(feature = "libsql")]
pub mod libsql_migrations;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::intake::message::InboundMessage;

/// Create a database backend from configuration, run migrations, and return it.
pub async fn connect_from_config(
    config: &crate::config::DatabaseConfig,
) -> Result<Arc<dyn Database>, DatabaseError> {
    #[cfg(feature = "libsql")]
    {
        if let Some(parent) = config.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }
        let backend = libsql::LibSqlBackend::new_local(&config.path)
            .await
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        backend.run_migrations().await?;
        Ok(Arc::new(backend))
    }
    #[cfg(not(feature = "libsql"))]
    {
        let _ = config;
        Err(DatabaseError::Pool(
            "No database backend available. Enable the 'libsql' feature.".to_string(),
        ))
    }
}

/// Rule-set partition governing which time-counting rules apply to a matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProceduralTrack {
    Civil,
    Criminal,
    Appellate,
}

impl ProceduralTrack {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Civil => "civil",
            Self::Criminal => "criminal",
            Self::Appellate => "appellate",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "civil" => Some(Self::Civil),
            "criminal" => Some(Self::Criminal),
            "appellate" => Some(Self::Appellate),
            _ => None,
        }
    }
}

/// Matter lifecycle state as seen by intake.
///
/// `Provisional` matters were registered from a trusted sender by the
/// classification fallback and await attorney confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatterStatus {
    Active,
    Provisional,
    Closed,
}

impl MatterStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Provisional => "provisional",
            Self::Closed => "closed",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "provisional" => Some(Self::Provisional),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatterRecord {
    pub matter_id: String,
    pub client_name: String,
    pub track: ProceduralTrack,
    pub status: MatterStatus,
    pub case_number: Option<String>,
    pub counterpart_name: Option<String>,
    pub counterpart_emails: Vec<String>,
    pub forum: Option<String>,
    pub storage_root: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MatterRecord {
    /// Folder name used by storage lookups.
    pub fn storage_folder(&self) -> &str {
        self.storage_root.as_deref().unwrap_or(&self.client_name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpsertMatterParams {
    pub matter_id: String,
    pub client_name: String,
    pub track: ProceduralTrack,
    #[serde(default = "default_matter_status")]
    pub status: MatterStatus,
    #[serde(default)]
    pub case_number: Option<String>,
    #[serde(default)]
    pub counterpart_name: Option<String>,
    #[serde(default)]
    pub counterpart_emails: Vec<String>,
    #[serde(default)]
    pub forum: Option<String>,
    #[serde(default)]
    pub storage_root: Option<String>,
}

fn default_matter_status() -> MatterStatus {
    MatterStatus::Active
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderMappingRecord {
    pub sender_email: String,
    pub matter_id: String,
    pub learned_via: String,
    pub created_at: DateTime<Utc>,
}

/// Which resolution tier produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    CaseNumber,
    SenderMapping,
    CounterpartAddress,
    NameMatch,
    InternalForward,
    ModelVerified,
    ModelProvisional,
    Unresolved,
}

impl ResolutionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CaseNumber => "case_number",
            Self::SenderMapping => "sender_mapping",
            Self::CounterpartAddress => "counterpart_address",
            Self::NameMatch => "name_match",
            Self::InternalForward => "internal_forward",
            Self::ModelVerified => "model_verified",
            Self::ModelProvisional => "model_provisional",
            Self::Unresolved => "unresolved",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "case_number" => Some(Self::CaseNumber),
            "sender_mapping" => Some(Self::SenderMapping),
            "counterpart_address" => Some(Self::CounterpartAddress),
            "name_match" => Some(Self::NameMatch),
            "internal_forward" => Some(Self::InternalForward),
            "model_verified" => Some(Self::ModelVerified),
            "model_provisional" => Some(Self::ModelProvisional),
            "unresolved" => Some(Self::Unresolved),
            _ => None,
        }
    }
}

/// Confidence tier attached to a resolution. Ordered low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    None,
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Terminal status of a handled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessedStatus {
    Processed,
    Unmatched,
    Error,
}

impl ProcessedStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Unmatched => "unmatched",
            Self::Error => "error",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "processed" => Some(Self::Processed),
            "unmatched" => Some(Self::Unmatched),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// One row per message ever handled; `external_id` is the dedup key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedMessageRecord {
    pub external_id: String,
    pub source: String,
    pub matter_id: Option<String>,
    pub method: ResolutionMethod,
    pub confidence: Confidence,
    pub attachments_filed: u32,
    pub obligations_extracted: u32,
    pub status: ProcessedStatus,
    pub error: Option<String>,
    pub processed_at: DateTime<Utc>,
}

/// Grouping used for obligation dedup: members of one family on the same
/// date are treated as the same obligation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObligationFamily {
    Appearance,
    Filing,
    Discovery,
    FollowUp,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObligationType {
    Hearing,
    StatusConference,
    PretrialConference,
    Trial,
    Arraignment,
    Sentencing,
    OralArgument,
    FilingDeadline,
    ResponseDue,
    ReplyDue,
    BriefDue,
    NoticeDeadline,
    AppealDeadline,
    DiscoveryDue,
    DisclosureDue,
    FollowUp,
    Other,
}

impl ObligationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hearing => "hearing",
            Self::StatusConference => "status_conference",
            Self::PretrialConference => "pretrial_conference",
            Self::Trial => "trial",
            Self::Arraignment => "arraignment",
            Self::Sentencing => "sentencing",
            Self::OralArgument => "oral_argument",
            Self::FilingDeadline => "filing_deadline",
            Self::ResponseDue => "response_due",
            Self::ReplyDue => "reply_due",
            Self::BriefDue => "brief_due",
            Self::NoticeDeadline => "notice_deadline",
            Self::AppealDeadline => "appeal_deadline",
            Self::DiscoveryDue => "discovery_due",
            Self::DisclosureDue => "disclosure_due",
            Self::FollowUp => "follow_up",
            Self::Other => "other",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "hearing" => Some(Self::Hearing),
            "status_conference" => Some(Self::StatusConference),
            "pretrial_conference" => Some(Self::PretrialConference),
            "trial" => Some(Self::Trial),
            "arraignment" => Some(Self::Arraignment),
            "sentencing" => Some(Self::Sentencing),
            "oral_argument" => Some(Self::OralArgument),
            "filing_deadline" => Some(Self::FilingDeadline),
            "response_due" => Some(Self::ResponseDue),
            "reply_due" => Some(Self::ReplyDue),
            "brief_due" => Some(Self::BriefDue),
            "notice_deadline" => Some(Self::NoticeDeadline),
            "appeal_deadline" => Some(Self::AppealDeadline),
            "discovery_due" => Some(Self::DiscoveryDue),
            "disclosure_due" => Some(Self::DisclosureDue),
            "follow_up" => Some(Self::FollowUp),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    /// Map a free-text label (model output, rule table) onto a known type.
    pub fn from_label(raw: &str) -> Self {
        let label = raw.trim().to_ascii_lowercase().replace(['_', '-'], " ");
        if let Some(exact) = Self::from_db_value(&label.replace(' ', "_")) {
            return exact;
        }
        let checks: &[(&str, Self)] = &[
            ("status conference", Self::StatusConference),
            ("scheduling conference", Self::StatusConference),
            ("pretrial", Self::PretrialConference),
            ("pre trial", Self::PretrialConference),
            ("oral argument", Self::OralArgument),
            ("arraign", Self::Arraignment),
            ("sentenc", Self::Sentencing),
            ("trial", Self::Trial),
            ("hearing", Self::Hearing),
            ("reply", Self::ReplyDue),
            ("brief", Self::BriefDue),
            ("disclosure", Self::DisclosureDue),
            ("discovery", Self::DiscoveryDue),
            ("interrogator", Self::DiscoveryDue),
            ("production", Self::DiscoveryDue),
            ("admission", Self::DiscoveryDue),
            ("appeal", Self::AppealDeadline),
            ("response", Self::ResponseDue),
            ("opposition", Self::ResponseDue),
            ("answer", Self::ResponseDue),
            ("notice", Self::NoticeDeadline),
            ("follow", Self::FollowUp),
            ("conference", Self::StatusConference),
            ("filing", Self::FilingDeadline),
            ("deadline", Self::FilingDeadline),
            ("due", Self::FilingDeadline),
        ];
        checks
            .iter()
            .find(|(needle, _)| label.contains(needle))
            .map(|(_, kind)| *kind)
            .unwrap_or(Self::Other)
    }

    pub fn family(self) -> ObligationFamily {
        match self {
            Self::Hearing
            | Self::StatusConference
            | Self::PretrialConference
            | Self::Trial
            | Self::Arraignment
            | Self::Sentencing
            | Self::OralArgument => ObligationFamily::Appearance,
            Self::FilingDeadline
            | Self::ResponseDue
            | Self::ReplyDue
            | Self::BriefDue
            | Self::NoticeDeadline
            | Self::AppealDeadline => ObligationFamily::Filing,
            Self::DiscoveryDue | Self::DisclosureDue => ObligationFamily::Discovery,
            Self::FollowUp => ObligationFamily::FollowUp,
            Self::Other => ObligationFamily::Other,
        }
    }

    /// Human-readable label, e.g. `status conference`.
    pub fn label(self) -> String {
        self.as_str().replace('_', " ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObligationStatus {
    Active,
    Completed,
    Cancelled,
}

impl ObligationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Obligations only ever move out of `active`.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Completed) | (Self::Active, Self::Cancelled)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObligationSource {
    Manual,
    Extracted,
    Cascaded,
}

impl ObligationSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Extracted => "extracted",
            Self::Cascaded => "cascaded",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "manual" => Some(Self::Manual),
            "extracted" => Some(Self::Extracted),
            "cascaded" => Some(Self::Cascaded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObligationRecord {
    pub id: Uuid,
    pub matter_id: String,
    pub obligation_type: ObligationType,
    pub title: String,
    pub due_date: NaiveDate,
    pub due_time: Option<NaiveTime>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub status: ObligationStatus,
    pub source: ObligationSource,
    pub cascade_group: Option<Uuid>,
    pub trigger_event: Option<String>,
    pub rule_citation: Option<String>,
    pub reminder_days: Vec<i32>,
    pub message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateObligationParams {
    pub matter_id: String,
    pub obligation_type: ObligationType,
    pub title: String,
    pub due_date: NaiveDate,
    pub due_time: Option<NaiveTime>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub source: ObligationSource,
    pub cascade_group: Option<Uuid>,
    pub trigger_event: Option<String>,
    pub rule_citation: Option<String>,
    pub reminder_days: Vec<i32>,
    pub message_id: Option<String>,
}

/// Whether an existing obligation already covers `(obligation_type, title)`
/// on the same matter and date: the same type, or either type's label
/// appearing in the other's title.
pub fn obligations_equivalent(
    existing: &ObligationRecord,
    obligation_type: ObligationType,
    title: &str,
) -> bool {
    if existing.obligation_type == obligation_type {
        return true;
    }
    let existing_title = existing.title.to_ascii_lowercase();
    let new_title = title.to_ascii_lowercase();
    (obligation_type != ObligationType::Other
        && existing_title.contains(&obligation_type.label()))
        || (existing.obligation_type != ObligationType::Other
            && new_title.contains(&existing.obligation_type.label()))
}

/// Looser check used for extracted obligations: any two members of the same
/// family (e.g. hearing and status conference) on one date are one event.
pub fn obligations_same_family(
    existing: &ObligationRecord,
    obligation_type: ObligationType,
    title: &str,
) -> bool {
    let family = obligation_type.family();
    (family != ObligationFamily::Other && existing.obligation_type.family() == family)
        || obligations_equivalent(existing, obligation_type, title)
}

/// Normalize names/text for matching: lowercase ASCII alphanumerics with
/// single spaces between tokens.
pub fn normalize_party_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_sep = true;

    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            prev_sep = false;
        } else if !prev_sep {
            out.push(' ');
            prev_sep = true;
        }
    }

    out.trim().to_string()
}

/// Case numbers compare on their digits only (`23-1900123` == `231900123`).
pub fn normalize_case_number(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Destination taxonomy for filed attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentCategory {
    CourtDocuments,
    Discovery,
    Exhibits,
    Correspondence,
    Financial,
    PleaSentencing,
    General,
}

impl DocumentCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CourtDocuments => "court_documents",
            Self::Discovery => "discovery",
            Self::Exhibits => "exhibits",
            Self::Correspondence => "correspondence",
            Self::Financial => "financial",
            Self::PleaSentencing => "plea_sentencing",
            Self::General => "general",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "court_documents" => Some(Self::CourtDocuments),
            "discovery" => Some(Self::Discovery),
            "exhibits" => Some(Self::Exhibits),
            "correspondence" => Some(Self::Correspondence),
            "financial" => Some(Self::Financial),
            "plea_sentencing" => Some(Self::PleaSentencing),
            "general" => Some(Self::General),
            _ => None,
        }
    }

    /// Subfolder name under the matter's storage root.
    pub fn folder_name(self) -> &'static str {
        match self {
            Self::CourtDocuments => "Court Documents",
            Self::Discovery => "Discovery",
            Self::Exhibits => "Exhibits",
            Self::Correspondence => "Correspondence",
            Self::Financial => "Financial",
            Self::PleaSentencing => "Plea and Sentencing",
            Self::General => "General",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiledDocumentRecord {
    pub id: Uuid,
    pub matter_id: String,
    pub filename: String,
    pub category: DocumentCategory,
    pub destination: String,
    pub message_id: Option<String>,
    pub size_bytes: u64,
    pub filed_at: DateTime<Utc>,
}

/// A message whose attachments wait for the matter's storage folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingFilingRecord {
    pub matter_id: String,
    pub document_type: Option<String>,
    pub message: InboundMessage,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable queue for one batch: the remaining backlog slice and progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveStateRecord {
    pub batch_id: Uuid,
    pub queue: Vec<InboundMessage>,
    pub waves_completed: u32,
    pub total: u32,
    pub done: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==================== Sub-traits ====================
//
// Each sub-trait groups related persistence methods. The `Database` supertrait
// combines them all; pipeline stages depend on the narrowest one they need.

#[async_trait]
pub trait MatterStore: Send + Sync {
    async fn upsert_matter(&self, input: &UpsertMatterParams)
    -> Result<MatterRecord, DatabaseError>;
    async fn get_matter(&self, matter_id: &str) -> Result<Option<MatterRecord>, DatabaseError>;
    /// Open matters (active and provisional), ordered by client name.
    async fn list_matters(&self) -> Result<Vec<MatterRecord>, DatabaseError>;
    async fn find_matter_by_case_number(
        &self,
        case_number: &str,
    ) -> Result<Option<MatterRecord>, DatabaseError>;
    async fn find_matters_by_counterpart_email(
        &self,
        email: &str,
    ) -> Result<Vec<MatterRecord>, DatabaseError>;
}

#[async_trait]
pub trait SenderMappingStore: Send + Sync {
    async fn find_sender_mapping(
        &self,
        sender_email: &str,
    ) -> Result<Option<SenderMappingRecord>, DatabaseError>;
    /// Insert-only; an existing mapping for the address is never replaced.
    async fn write_sender_mapping(
        &self,
        sender_email: &str,
        matter_id: &str,
        learned_via: &str,
    ) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait ProcessedMessageStore: Send + Sync {
    /// Return the subset of `external_ids` already present in the ledger.
    async fn find_processed_ids(
        &self,
        external_ids: &[String],
    ) -> Result<HashSet<String>, DatabaseError>;
    /// Insert-once; returns false when the id was already recorded.
    async fn record_processed(&self, row: &ProcessedMessageRecord) -> Result<bool, DatabaseError>;
    async fn get_processed(
        &self,
        external_id: &str,
    ) -> Result<Option<ProcessedMessageRecord>, DatabaseError>;
    async fn list_processed_by_status(
        &self,
        status: ProcessedStatus,
        limit: usize,
    ) -> Result<Vec<ProcessedMessageRecord>, DatabaseError>;
    async fn count_processed(&self) -> Result<u64, DatabaseError>;
}

#[async_trait]
pub trait ObligationStore: Send + Sync {
    async fn create_obligation(
        &self,
        input: &CreateObligationParams,
    ) -> Result<ObligationRecord, DatabaseError>;
    async fn get_obligation(&self, id: Uuid) -> Result<Option<ObligationRecord>, DatabaseError>;
    async fn list_obligations_for_matter(
        &self,
        matter_id: &str,
    ) -> Result<Vec<ObligationRecord>, DatabaseError>;
    /// Every obligation for one matter on one date, whatever its status.
    async fn list_obligations_on(
        &self,
        matter_id: &str,
        due_date: NaiveDate,
    ) -> Result<Vec<ObligationRecord>, DatabaseError>;
    /// Active obligations due in `[from, to]`, ordered by due date.
    async fn list_active_obligations_due_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ObligationRecord>, DatabaseError>;
    /// Apply a status transition; returns `Conflict` for disallowed moves.
    async fn update_obligation_status(
        &self,
        id: Uuid,
        status: ObligationStatus,
    ) -> Result<Option<ObligationRecord>, DatabaseError>;
    async fn count_obligations(&self) -> Result<u64, DatabaseError>;
}

#[async_trait]
pub trait ReminderStore: Send + Sync {
    async fn reminder_sent(&self, obligation_id: Uuid, threshold: i32)
    -> Result<bool, DatabaseError>;
    /// Write-once per `(obligation, threshold)`; returns false if present.
    async fn record_reminder_sent(
        &self,
        obligation_id: Uuid,
        threshold: i32,
    ) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait FiledDocumentStore: Send + Sync {
    async fn find_filed_document(
        &self,
        matter_id: &str,
        filename: &str,
        category: DocumentCategory,
    ) -> Result<Option<FiledDocumentRecord>, DatabaseError>;
    async fn record_filed_document(
        &self,
        row: &FiledDocumentRecord,
    ) -> Result<bool, DatabaseError>;
    async fn count_filed_documents(&self) -> Result<u64, DatabaseError>;
    /// Insert, or bump `attempts` when the message is already pending.
    async fn upsert_pending_filing(
        &self,
        matter_id: &str,
        document_type: Option<&str>,
        message: &InboundMessage,
    ) -> Result<(), DatabaseError>;
    /// Oldest first.
    async fn list_pending_filings(
        &self,
        limit: usize,
    ) -> Result<Vec<PendingFilingRecord>, DatabaseError>;
    async fn clear_pending_filing(&self, external_id: &str) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait WaveStateStore: Send + Sync {
    async fn create_wave_state(&self, state: &WaveStateRecord) -> Result<(), DatabaseError>;
    async fn get_wave_state(&self, batch_id: Uuid)
    -> Result<Option<WaveStateRecord>, DatabaseError>;
    /// Compare-and-swap rewrite. Returns false when `expected_version` is stale.
    async fn replace_wave_state(
        &self,
        batch_id: Uuid,
        expected_version: i64,
        queue: &[InboundMessage],
        waves_completed: u32,
        done: bool,
    ) -> Result<bool, DatabaseError>;
    async fn purge_completed_wave_states(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<u64, DatabaseError>;
    /// External ids still queued in unfinished batches.
    async fn queued_message_ids(&self) -> Result<HashSet<String>, DatabaseError>;
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get_checkpoint(&self, source: &str) -> Result<Option<DateTime<Utc>>, DatabaseError>;
    async fn set_checkpoint(&self, source: &str, seen_at: DateTime<Utc>)
    -> Result<(), DatabaseError>;
}

/// Backend-agnostic database supertrait.
#[async_trait]
pub trait Database:
    MatterStore
    + SenderMappingStore
    + ProcessedMessageStore
    + ObligationStore
    + ReminderStore
    + FiledDocumentStore
    + WaveStateStore
    + CheckpointStore
    + Send
    + Sync
{
    /// Run schema migrations for this backend.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;
}
