//! Attachment filing into the matter's storage tree.
//!
//! Order per attachment: size gate, dedup check, download, upload, record.
//! The record is written only after a successful upload, so a retried
//! message is caught by the dedup check instead of uploading twice.

use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use uuid::Uuid;

use super::IntakeContext;
use super::message::{AttachmentRef, InboundMessage};
use crate::db::{DocumentCategory, FiledDocumentRecord, MatterRecord};
use crate::error::{IntakeError, ProviderError, with_timeout};

static CATEGORY_PATTERNS: LazyLock<Vec<(Regex, DocumentCategory)>> = LazyLock::new(|| {
    [
        (r"(?i)\bplea\b|sentenc|presentence", DocumentCategory::PleaSentencing),
        (
            r"(?i)interrogator|requests? for (?:production|admission)|deposition|subpoena|discovery",
            DocumentCategory::Discovery,
        ),
        (r"(?i)\bexhibit", DocumentCategory::Exhibits),
        (
            r"(?i)invoice|receipt|statement of account|retainer|billing",
            DocumentCategory::Financial,
        ),
        (
            r"(?i)\border\b|motion|notice|complaint|petition|\bbrief\b|judgment|minute entry|summons|ruling",
            DocumentCategory::CourtDocuments,
        ),
        (r"(?i)\bletter\b|correspondence", DocumentCategory::Correspondence),
    ]
    .into_iter()
    .filter_map(|(pattern, category)| Regex::new(pattern).ok().map(|re| (re, category)))
    .collect()
});

static COURT_SENDER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)@(?:[a-z0-9-]+\.)*(?:courts?|judiciary|uscourts)\.|\.gov$").ok()
});

/// What happened to one attachment.
#[derive(Debug, Clone)]
pub enum FileOutcome {
    Filed(FiledDocumentRecord),
    AlreadyFiled,
    SkippedTooLarge,
    SkippedBadName,
    /// The matter has no storage folder yet; the attachment can be filed later.
    NoFolder,
}

/// Per-message filing totals.
#[derive(Debug, Default, Clone)]
pub struct FilingSummary {
    pub filed: u32,
    pub already_filed: u32,
    pub skipped: u32,
    /// Attachments held back because the matter folder is missing.
    pub pending: u32,
}

fn category_for_document_type(tag: &str) -> Option<DocumentCategory> {
    Some(match tag.trim().to_ascii_lowercase().as_str() {
        "plea_agreement" | "sentencing" => DocumentCategory::PleaSentencing,
        "discovery" => DocumentCategory::Discovery,
        "exhibit" => DocumentCategory::Exhibits,
        "invoice" | "financial" => DocumentCategory::Financial,
        "correspondence" | "letter" => DocumentCategory::Correspondence,
        "order" | "judgment" | "notice_of_hearing" | "notice_of_appeal" | "motion" | "brief"
        | "pleading" | "court_document" => DocumentCategory::CourtDocuments,
        _ => return None,
    })
}

/// Destination category: resolver hint, then subject and filename patterns,
/// then the sender's domain.
pub fn categorize(
    document_type: Option<&str>,
    message: &InboundMessage,
    filename: &str,
) -> DocumentCategory {
    if let Some(category) = document_type.and_then(category_for_document_type) {
        return category;
    }
    let haystack = format!("{}\n{}", message.subject, filename.replace(['_', '-'], " "));
    if let Some((_, category)) = CATEGORY_PATTERNS
        .iter()
        .find(|(re, _)| re.is_match(&haystack))
    {
        return *category;
    }
    match COURT_SENDER.as_ref() {
        Some(re) if re.is_match(&message.sender_address()) => DocumentCategory::CourtDocuments,
        _ => DocumentCategory::General,
    }
}

/// Last path component with separators stripped.
pub fn safe_filename(raw: &str) -> Option<String> {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .replace('\0', "");
    match name.as_str() {
        "" | "." | ".." => None,
        _ => Some(name),
    }
}

pub async fn file_attachment(
    ctx: &IntakeContext,
    message: &InboundMessage,
    attachment: &AttachmentRef,
    matter: &MatterRecord,
    document_type: Option<&str>,
) -> Result<FileOutcome, IntakeError> {
    let limit = ctx.intake.max_attachment_bytes;
    if attachment.size_bytes > limit {
        tracing::warn!(
            external_id = %message.external_id,
            filename = %attachment.filename,
            size = attachment.size_bytes,
            limit,
            "Attachment too large to file"
        );
        return Ok(FileOutcome::SkippedTooLarge);
    }
    let Some(filename) = safe_filename(&attachment.filename) else {
        tracing::warn!(external_id = %message.external_id, filename = %attachment.filename, "Unusable attachment name");
        return Ok(FileOutcome::SkippedBadName);
    };

    let category = categorize(document_type, message, &filename);
    if ctx
        .db
        .find_filed_document(&matter.matter_id, &filename, category)
        .await?
        .is_some()
    {
        return Ok(FileOutcome::AlreadyFiled);
    }

    let timeout = ctx.intake.call_timeout;
    let Some(root) = with_timeout(
        "storage",
        timeout,
        ctx.storage.find_folder(matter.storage_folder()),
    )
    .await?
    else {
        tracing::warn!(
            matter = %matter.matter_id,
            folder = matter.storage_folder(),
            "No storage folder for matter"
        );
        return Ok(FileOutcome::NoFolder);
    };

    let source = ctx.source(&message.source).ok_or_else(|| {
        ProviderError::unavailable(&message.source, "mail source is not configured")
    })?;
    let bytes = with_timeout(
        source.name(),
        timeout,
        source.fetch_attachment(message, attachment),
    )
    .await?;
    let size = bytes.len() as u64;
    if size > limit {
        tracing::warn!(external_id = %message.external_id, filename = %filename, size, limit, "Attachment too large to file");
        return Ok(FileOutcome::SkippedTooLarge);
    }

    let folder = with_timeout(
        "storage",
        timeout,
        ctx.storage.ensure_folder(&root, category.folder_name()),
    )
    .await?;
    let destination = with_timeout(
        "storage",
        timeout,
        ctx.storage.upload(&folder, &filename, bytes),
    )
    .await?;

    let record = FiledDocumentRecord {
        id: Uuid::new_v4(),
        matter_id: matter.matter_id.clone(),
        filename,
        category,
        destination,
        message_id: Some(message.external_id.clone()),
        size_bytes: size,
        filed_at: Utc::now(),
    };
    ctx.db.record_filed_document(&record).await?;
    tracing::info!(
        matter = %record.matter_id,
        filename = %record.filename,
        category = category.as_str(),
        destination = %record.destination,
        "Filed attachment"
    );
    Ok(FileOutcome::Filed(record))
}

/// File every attachment on `message`. Any provider failure fails the
/// message; earlier attachments stay filed and are skipped on retry.
pub async fn file_all(
    ctx: &IntakeContext,
    message: &InboundMessage,
    matter: &MatterRecord,
    document_type: Option<&str>,
) -> Result<FilingSummary, IntakeError> {
    let mut summary = FilingSummary::default();
    for attachment in &message.attachments {
        match file_attachment(ctx, message, attachment, matter, document_type).await? {
            FileOutcome::Filed(_) => summary.filed += 1,
            FileOutcome::AlreadyFiled => summary.already_filed += 1,
            FileOutcome::SkippedTooLarge | FileOutcome::SkippedBadName => summary.skipped += 1,
            FileOutcome::NoFolder => summary.pending += 1,
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{FileOutcome, categorize, file_all, file_attachment, safe_filename};
    use crate::db::{DocumentCategory, FiledDocumentStore, MatterStore, ProceduralTrack};
    use crate::intake::message::AttachmentRef;
    use crate::testing::{TestRig, message};

    fn attachment(id: &str, filename: &str, size: u64) -> AttachmentRef {
        AttachmentRef {
            id: id.to_string(),
            filename: filename.to_string(),
            mime_type: Some("application/pdf".to_string()),
            size_bytes: size,
        }
    }

    #[test]
    fn category_prefers_hint_then_patterns_then_sender() {
        let msg = message("c-1", "someone@example.com", "Documents", "");
        assert_eq!(
            categorize(Some("plea_agreement"), &msg, "scan.pdf"),
            DocumentCategory::PleaSentencing
        );
        assert_eq!(
            categorize(None, &msg, "Responses_to_Interrogatories.pdf"),
            DocumentCategory::Discovery
        );
        assert_eq!(categorize(None, &msg, "Exhibit-A.pdf"), DocumentCategory::Exhibits);
        assert_eq!(categorize(None, &msg, "scan.pdf"), DocumentCategory::General);

        let court = message("c-2", "efile@utcourts.gov", "Documents", "");
        assert_eq!(categorize(None, &court, "scan.pdf"), DocumentCategory::CourtDocuments);

        let order = message("c-3", "someone@example.com", "Signed order", "");
        assert_eq!(categorize(None, &order, "scan.pdf"), DocumentCategory::CourtDocuments);
    }

    #[test]
    fn filenames_lose_their_directories() {
        assert_eq!(safe_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(safe_filename("C:\\scans\\order.pdf").as_deref(), Some("order.pdf"));
        assert_eq!(safe_filename("dir/"), None);
        assert_eq!(safe_filename(".."), None);
    }

    #[tokio::test]
    async fn files_once_and_dedups_on_retry() {
        let rig = TestRig::new().await;
        rig.seed("doe", "Jane Doe", ProceduralTrack::Civil).await;
        rig.storage.add_folder("Jane Doe");
        let matter = rig.ctx.db.get_matter("doe").await.expect("get").expect("seeded");

        let mut msg = message("f-1", "clerk@courts.example.gov", "Signed order", "Attached.");
        msg.attachments = vec![attachment("a1", "Order.pdf", 10)];
        rig.mail.add_attachment("f-1", "a1", b"%PDF-order");

        let first = file_all(&rig.ctx, &msg, &matter, Some("order")).await.expect("first");
        assert_eq!(first.filed, 1);
        let second = file_all(&rig.ctx, &msg, &matter, Some("order")).await.expect("second");
        assert_eq!(second.filed, 0);
        assert_eq!(second.already_filed, 1);

        assert_eq!(
            rig.storage.uploads(),
            vec!["Jane Doe/Court Documents/Order.pdf".to_string()]
        );
        assert_eq!(rig.ctx.db.count_filed_documents().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn oversized_attachments_are_skipped() {
        let rig = TestRig::new().await;
        rig.seed("doe", "Jane Doe", ProceduralTrack::Civil).await;
        rig.storage.add_folder("Jane Doe");
        let matter = rig.ctx.db.get_matter("doe").await.expect("get").expect("seeded");

        let mut msg = message("f-2", "clerk@courts.example.gov", "Transcript", "");
        let big = attachment("a1", "transcript.pdf", rig.ctx.intake.max_attachment_bytes + 1);
        msg.attachments = vec![big.clone()];

        let outcome = file_attachment(&rig.ctx, &msg, &big, &matter, None)
            .await
            .expect("file");
        assert!(matches!(outcome, FileOutcome::SkippedTooLarge));
        assert!(rig.storage.uploads().is_empty());
    }

    #[tokio::test]
    async fn missing_folder_is_reported_without_upload() {
        let rig = TestRig::new().await;
        rig.seed("doe", "Jane Doe", ProceduralTrack::Civil).await;
        let matter = rig.ctx.db.get_matter("doe").await.expect("get").expect("seeded");

        let mut msg = message("f-3", "clerk@courts.example.gov", "Order", "");
        let order = attachment("a1", "order.pdf", 10);
        msg.attachments = vec![order.clone()];

        let outcome = file_attachment(&rig.ctx, &msg, &order, &matter, None)
            .await
            .expect("file");
        assert!(matches!(outcome, FileOutcome::NoFolder));
        assert_eq!(rig.ctx.db.count_filed_documents().await.expect("count"), 0);

        let summary = file_all(&rig.ctx, &msg, &matter, None).await.expect("file");
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.skipped, 0);
    }

    #[tokio::test]
    async fn unusable_names_are_not_reported_as_too_large() {
        let rig = TestRig::new().await;
        rig.seed("doe", "Jane Doe", ProceduralTrack::Civil).await;
        rig.storage.add_folder("Jane Doe");
        let matter = rig.ctx.db.get_matter("doe").await.expect("get").expect("seeded");

        let mut msg = message("f-5", "clerk@courts.example.gov", "Order", "");
        let nameless = attachment("a1", "scans/..", 10);
        msg.attachments = vec![nameless.clone()];

        let outcome = file_attachment(&rig.ctx, &msg, &nameless, &matter, None)
            .await
            .expect("file");
        assert!(matches!(outcome, FileOutcome::SkippedBadName));

        let summary = file_all(&rig.ctx, &msg, &matter, None).await.expect("file");
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.pending, 0);
        assert!(rig.storage.uploads().is_empty());
    }

    #[tokio::test]
    async fn upload_failure_leaves_no_record() {
        let rig = TestRig::new().await;
        rig.seed("doe", "Jane Doe", ProceduralTrack::Civil).await;
        rig.storage.add_folder("Jane Doe");
        rig.storage.fail_uploads(true);
        let matter = rig.ctx.db.get_matter("doe").await.expect("get").expect("seeded");

        let mut msg = message("f-4", "clerk@courts.example.gov", "Order", "");
        msg.attachments = vec![attachment("a1", "order.pdf", 10)];
        rig.mail.add_attachment("f-4", "a1", b"%PDF-");

        assert!(file_all(&rig.ctx, &msg, &matter, None).await.is_err());
        assert_eq!(rig.ctx.db.count_filed_documents().await.expect("count"), 0);
    }
}
