//! Wave orchestrator.
//!
//! `start_batch` fetches the backlog, drops everything the processed ledger
//! already knows, persists the rest as a durable queue and runs wave 1.
//! `continue_batch` runs the next wave from the persisted queue. Each wave
//! is an independently budgeted unit: the only state carried between waves
//! is the queue record, rewritten with a version check after the wave.
//!
//! Attachments for a matter without a storage folder are parked as pending
//! filings and retried at the start of every batch.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use super::IntakeContext;
use super::extractor::extract;
use super::filer::file_all;
use super::message::InboundMessage;
use super::resolver::resolve;
use crate::db::{
    Confidence, PendingFilingRecord, ProcessedMessageRecord, ProcessedStatus, ResolutionMethod,
    WaveStateRecord,
};
use crate::error::{IntakeError, with_timeout};
use crate::legal::audit::{self, AuditEventKind};
use crate::legal::cascade::{CascadeRequest, cascade};
use crate::legal::triggers::detect_trigger;

/// Finished batch records older than this are purged.
const COMPLETED_BATCH_RETENTION_DAYS: i64 = 7;

/// Pending filings retried per batch start.
const PENDING_FILING_RETRY_LIMIT: usize = 50;

/// Outcome of one message.
#[derive(Debug, Clone, Serialize)]
pub struct MessageReport {
    pub external_id: String,
    pub source: String,
    pub matter_id: Option<String>,
    pub method: ResolutionMethod,
    pub confidence: Confidence,
    pub status: ProcessedStatus,
    pub obligations_extracted: u32,
    pub obligations_cascaded: u32,
    pub attachments_filed: u32,
    /// Attachments waiting for the matter folder to exist.
    pub attachments_pending: u32,
    pub error: Option<String>,
}

impl MessageReport {
    fn new(message: &InboundMessage) -> Self {
        Self {
            external_id: message.external_id.clone(),
            source: message.source.clone(),
            matter_id: None,
            method: ResolutionMethod::Unresolved,
            confidence: Confidence::None,
            status: ProcessedStatus::Unmatched,
            obligations_extracted: 0,
            obligations_cascaded: 0,
            attachments_filed: 0,
            attachments_pending: 0,
            error: None,
        }
    }

    fn ledger_row(&self) -> ProcessedMessageRecord {
        ProcessedMessageRecord {
            external_id: self.external_id.clone(),
            source: self.source.clone(),
            matter_id: self.matter_id.clone(),
            method: self.method,
            confidence: self.confidence,
            attachments_filed: self.attachments_filed,
            obligations_extracted: self.obligations_extracted + self.obligations_cascaded,
            status: self.status,
            error: self.error.clone(),
            processed_at: Utc::now(),
        }
    }
}

/// Result of one wave, or of a start that found nothing to do.
#[derive(Debug, Clone, Serialize)]
pub struct WaveReport {
    /// `None` when the backlog was empty and no batch was created.
    pub batch_id: Option<Uuid>,
    pub wave: u32,
    pub messages: Vec<MessageReport>,
    pub remaining: usize,
    pub more_waves: bool,
    /// The wave's time budget ran out before its slice was consumed.
    pub stopped_early: bool,
    /// Attachments from earlier batches filed once their folder appeared.
    pub refiled: u32,
}

impl WaveReport {
    fn empty() -> Self {
        Self {
            batch_id: None,
            wave: 0,
            messages: Vec::new(),
            remaining: 0,
            more_waves: false,
            stopped_early: false,
            refiled: 0,
        }
    }

    fn count(&self, status: ProcessedStatus) -> usize {
        self.messages.iter().filter(|m| m.status == status).count()
    }
}

/// Totals across all waves of one batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub batch_id: Option<Uuid>,
    pub waves: u32,
    pub processed: usize,
    pub unmatched: usize,
    pub errors: usize,
    pub obligations: u32,
    pub attachments_filed: u32,
}

impl BatchSummary {
    fn absorb(&mut self, report: &WaveReport) {
        if !report.messages.is_empty() {
            self.waves += 1;
        }
        self.processed += report.count(ProcessedStatus::Processed);
        self.unmatched += report.count(ProcessedStatus::Unmatched);
        self.errors += report.count(ProcessedStatus::Error);
        self.attachments_filed += report.refiled;
        for message in &report.messages {
            self.obligations += message.obligations_extracted + message.obligations_cascaded;
            self.attachments_filed += message.attachments_filed;
        }
    }
}

pub struct Orchestrator {
    ctx: IntakeContext,
}

impl Orchestrator {
    pub fn new(ctx: IntakeContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &IntakeContext {
        &self.ctx
    }

    /// Retry pending filings, then fetch, dedup, persist and run wave 1.
    pub async fn start_batch(&self) -> Result<WaveReport, IntakeError> {
        let refiled = self.retry_pending_filings().await;
        let (backlog, checkpoints) = self.fetch_backlog().await?;
        let fetched = backlog.len();
        let queue = self.drop_processed(backlog).await?;

        if queue.is_empty() {
            self.advance_checkpoints(&checkpoints).await?;
            tracing::info!(fetched, "No new messages");
            return Ok(WaveReport {
                refiled,
                ..WaveReport::empty()
            });
        }

        let now = Utc::now();
        let state = WaveStateRecord {
            batch_id: Uuid::new_v4(),
            total: queue.len() as u32,
            queue,
            waves_completed: 0,
            done: false,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.ctx.db.create_wave_state(&state).await?;
        // Only once the queue is durable may the sources move forward.
        self.advance_checkpoints(&checkpoints).await?;
        tracing::info!(
            batch_id = %state.batch_id,
            fetched,
            queued = state.total,
            wave_size = self.ctx.intake.wave_size,
            "Batch started"
        );

        let mut report = self.run_wave(state).await?;
        report.refiled = refiled;
        Ok(report)
    }

    /// Run wave `wave` of `batch_id`. Re-triggering a finished wave is a
    /// no-op; skipping ahead is an error.
    pub async fn continue_batch(&self, batch_id: Uuid, wave: u32) -> Result<WaveReport, IntakeError> {
        let state = self
            .ctx
            .db
            .get_wave_state(batch_id)
            .await?
            .ok_or(IntakeError::BatchNotFound(batch_id))?;
        let expected = state.waves_completed + 1;

        if state.done || wave < expected {
            tracing::info!(%batch_id, wave, expected, done = state.done, "Duplicate wave trigger ignored");
            return Ok(WaveReport {
                batch_id: Some(batch_id),
                wave,
                messages: Vec::new(),
                remaining: state.queue.len(),
                more_waves: !state.done && !state.queue.is_empty(),
                stopped_early: false,
                refiled: 0,
            });
        }
        if wave > expected {
            return Err(IntakeError::WaveOutOfOrder {
                batch_id,
                expected,
                requested: wave,
            });
        }

        self.run_wave(state).await
    }

    /// Start a batch and chain every wave in-process.
    pub async fn run_to_completion(&self) -> Result<BatchSummary, IntakeError> {
        let mut report = self.start_batch().await?;
        let mut summary = BatchSummary {
            batch_id: report.batch_id,
            ..BatchSummary::default()
        };
        summary.absorb(&report);

        if let Some(batch_id) = report.batch_id {
            while report.more_waves {
                report = self.continue_batch(batch_id, report.wave + 1).await?;
                summary.absorb(&report);
            }
        }

        let cutoff = Utc::now() - Duration::days(COMPLETED_BATCH_RETENTION_DAYS);
        match self.ctx.db.purge_completed_wave_states(cutoff).await {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(purged, "Purged finished batches"),
            Err(e) => tracing::warn!(error = %e, "Failed to purge finished batches"),
        }
        Ok(summary)
    }

    async fn fetch_backlog(
        &self,
    ) -> Result<(Vec<InboundMessage>, HashMap<String, DateTime<Utc>>), IntakeError> {
        let default_since = Utc::now() - Duration::days(self.ctx.intake.lookback_days);
        let mut backlog = Vec::new();
        let mut checkpoints = HashMap::new();

        let mut windows = Vec::with_capacity(self.ctx.sources.len());
        for source in &self.ctx.sources {
            let since = self
                .ctx
                .db
                .get_checkpoint(source.name())
                .await?
                .unwrap_or(default_since);
            windows.push((source, since));
        }

        // Sources are independent; fetch them concurrently.
        let fetches = join_all(windows.into_iter().map(|(source, since)| async move {
            let fetched = with_timeout(
                source.name(),
                self.ctx.intake.call_timeout,
                source.fetch_since(since),
            )
            .await;
            (source.name().to_string(), since, fetched)
        }))
        .await;

        for (name, since, fetched) in fetches {
            let fetched = match fetched {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::warn!(source = %name, error = %e, "Mail source unavailable");
                    continue;
                }
            };
            tracing::debug!(source = %name, %since, count = fetched.len(), "Fetched messages");

            for mut message in fetched {
                if message.source.is_empty() {
                    message.source = name.clone();
                }
                let newest = checkpoints.entry(name.clone()).or_insert(message.received_at);
                if message.received_at > *newest {
                    *newest = message.received_at;
                }
                backlog.push(message);
            }
        }
        Ok((backlog, checkpoints))
    }

    /// Drop repeats within the backlog, everything already in the ledger and
    /// anything still queued in an unfinished batch, keeping fetch order.
    async fn drop_processed(
        &self,
        backlog: Vec<InboundMessage>,
    ) -> Result<Vec<InboundMessage>, IntakeError> {
        let mut seen = HashSet::new();
        let unique: Vec<InboundMessage> = backlog
            .into_iter()
            .filter(|m| seen.insert(m.external_id.clone()))
            .collect();
        if unique.is_empty() {
            return Ok(unique);
        }
        let ids: Vec<String> = unique.iter().map(|m| m.external_id.clone()).collect();
        let mut known = self.ctx.db.find_processed_ids(&ids).await?;
        // Fetch windows overlap at the checkpoint; an open batch already owns these.
        known.extend(self.ctx.db.queued_message_ids().await?);
        Ok(unique
            .into_iter()
            .filter(|m| !known.contains(&m.external_id))
            .collect())
    }

    /// File attachments parked because their matter had no folder. Failures
    /// stay parked; a batch never fails on a retry.
    async fn retry_pending_filings(&self) -> u32 {
        let pending = match self
            .ctx
            .db
            .list_pending_filings(PENDING_FILING_RETRY_LIMIT)
            .await
        {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list pending filings");
                return 0;
            }
        };

        let mut refiled = 0;
        for row in &pending {
            match self.retry_pending_filing(row).await {
                Ok(filed) => refiled += filed,
                Err(e) => tracing::warn!(
                    external_id = %row.message.external_id,
                    matter = %row.matter_id,
                    attempts = row.attempts,
                    error = %e,
                    "Pending filing retry failed"
                ),
            }
        }
        refiled
    }

    async fn retry_pending_filing(&self, row: &PendingFilingRecord) -> Result<u32, IntakeError> {
        let message = &row.message;
        let document_type = row.document_type.as_deref();
        let Some(matter) = self.ctx.db.get_matter(&row.matter_id).await? else {
            tracing::warn!(
                external_id = %message.external_id,
                matter = %row.matter_id,
                "Dropping pending filing for unknown matter"
            );
            self.ctx.db.clear_pending_filing(&message.external_id).await?;
            return Ok(0);
        };

        let filing = match file_all(&self.ctx, message, &matter, document_type).await {
            Ok(filing) => filing,
            Err(e) => {
                self.ctx
                    .db
                    .upsert_pending_filing(&row.matter_id, document_type, message)
                    .await?;
                return Err(e);
            }
        };
        if filing.pending > 0 {
            self.ctx
                .db
                .upsert_pending_filing(&row.matter_id, document_type, message)
                .await?;
            tracing::debug!(
                external_id = %message.external_id,
                matter = %matter.matter_id,
                attempts = row.attempts + 1,
                "Matter folder still missing"
            );
            return Ok(filing.filed);
        }

        self.ctx.db.clear_pending_filing(&message.external_id).await?;
        tracing::info!(
            external_id = %message.external_id,
            matter = %matter.matter_id,
            filed = filing.filed,
            already_filed = filing.already_filed,
            "Pending attachments filed"
        );
        Ok(filing.filed)
    }

    async fn advance_checkpoints(
        &self,
        checkpoints: &HashMap<String, DateTime<Utc>>,
    ) -> Result<(), IntakeError> {
        for (source, seen_at) in checkpoints {
            self.ctx.db.set_checkpoint(source, *seen_at).await?;
        }
        Ok(())
    }

    /// Process the next slice of `state` and rewrite its queue.
    pub(crate) async fn run_wave(&self, state: WaveStateRecord) -> Result<WaveReport, IntakeError> {
        let wave = state.waves_completed + 1;
        let budget = self.ctx.intake.wave_time_budget;
        let slice = self.ctx.intake.wave_size.min(state.queue.len());
        let started = Instant::now();
        let today = Utc::now().date_naive();

        let mut messages = Vec::with_capacity(slice);
        let mut stopped_early = false;
        for message in &state.queue[..slice] {
            if !messages.is_empty() && started.elapsed() >= budget {
                stopped_early = true;
                break;
            }
            messages.push(self.process_message(message, today).await);
        }

        let consumed = messages.len();
        let remaining = &state.queue[consumed..];
        let done = remaining.is_empty();
        let swapped = self
            .ctx
            .db
            .replace_wave_state(state.batch_id, state.version, remaining, wave, done)
            .await?;
        if !swapped {
            return Err(IntakeError::StaleWaveState(state.batch_id));
        }

        let report = WaveReport {
            batch_id: Some(state.batch_id),
            wave,
            remaining: remaining.len(),
            more_waves: !done,
            stopped_early,
            messages,
            refiled: 0,
        };
        tracing::info!(
            batch_id = %state.batch_id,
            wave,
            handled = consumed,
            processed = report.count(ProcessedStatus::Processed),
            unmatched = report.count(ProcessedStatus::Unmatched),
            errors = report.count(ProcessedStatus::Error),
            remaining = report.remaining,
            stopped_early,
            "Wave completed"
        );
        audit::record(
            AuditEventKind::WaveCompleted,
            json!({
                "batch_id": state.batch_id.to_string(),
                "wave": wave,
                "handled": consumed,
                "remaining": report.remaining,
            }),
        );
        if done {
            tracing::info!(batch_id = %state.batch_id, waves = wave, total = state.total, "Batch completed");
            audit::record(
                AuditEventKind::BatchCompleted,
                json!({
                    "batch_id": state.batch_id.to_string(),
                    "waves": wave,
                    "total": state.total,
                }),
            );
        }
        Ok(report)
    }

    /// Run one message end to end and record it in the ledger. Failures are
    /// folded into an `error` row; this never fails the wave.
    pub async fn process_message(&self, message: &InboundMessage, today: NaiveDate) -> MessageReport {
        let mut report = MessageReport::new(message);
        if let Err(e) = self.handle(message, today, &mut report).await {
            tracing::warn!(external_id = %message.external_id, error = %e, "Message failed");
            report.status = ProcessedStatus::Error;
            report.error = Some(e.to_string());
        }

        match self.ctx.db.record_processed(&report.ledger_row()).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(external_id = %message.external_id, "Ledger row already present"),
            Err(e) => tracing::error!(external_id = %message.external_id, error = %e, "Failed to record processed message"),
        }

        if report.status == ProcessedStatus::Unmatched {
            audit::record(
                AuditEventKind::MessageUnmatched,
                json!({
                    "external_id": message.external_id,
                    "source": message.source,
                    "sender": message.sender_address(),
                    "subject": message.subject,
                }),
            );
        }

        if let Some(source) = self.ctx.source(&message.source) {
            if let Err(e) = with_timeout(
                source.name(),
                self.ctx.intake.call_timeout,
                source.mark_read(&message.external_id),
            )
            .await
            {
                tracing::warn!(external_id = %message.external_id, error = %e, "Failed to mark message read");
            }
        }
        report
    }

    async fn handle(
        &self,
        message: &InboundMessage,
        today: NaiveDate,
        report: &mut MessageReport,
    ) -> Result<(), IntakeError> {
        let resolution = resolve(&self.ctx, message).await?;
        report.method = resolution.method;
        report.confidence = resolution.confidence;
        let Some(matter) = resolution.matter else {
            tracing::info!(external_id = %message.external_id, "Message unmatched");
            return Ok(());
        };
        report.matter_id = Some(matter.matter_id.clone());
        let document_type = resolution.document_type.as_deref();

        let extraction = extract(&self.ctx, message, &matter, today).await?;
        report.obligations_extracted = extraction.created.len() as u32;

        if let Some(trigger) = detect_trigger(message, document_type) {
            let request = CascadeRequest {
                matter_id: &matter.matter_id,
                event: trigger.event,
                trigger_date: trigger.date,
                service: trigger.service,
                message_id: Some(&message.external_id),
            };
            match cascade(self.ctx.db.as_ref(), &self.ctx.calculator, &request).await {
                Ok(outcome) => report.obligations_cascaded = outcome.created_count() as u32,
                Err(IntakeError::RuleNotFound { track, event }) => {
                    tracing::info!(
                        external_id = %message.external_id,
                        %track,
                        %event,
                        "Trigger has no rule on this track"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let filing = file_all(&self.ctx, message, &matter, document_type).await?;
        report.attachments_filed = filing.filed;
        report.attachments_pending = filing.pending;
        if filing.pending > 0 {
            self.ctx
                .db
                .upsert_pending_filing(&matter.matter_id, document_type, message)
                .await?;
        }
        report.status = ProcessedStatus::Processed;
        tracing::info!(
            external_id = %message.external_id,
            matter = %matter.matter_id,
            method = report.method.as_str(),
            extracted = report.obligations_extracted,
            cascaded = report.obligations_cascaded,
            filed = report.attachments_filed,
            pending = report.attachments_pending,
            "Message processed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::Orchestrator;
    use chrono::{TimeZone, Utc};

    use crate::db::{
        CheckpointStore, FiledDocumentStore, ObligationSource, ObligationStore,
        ProcessedMessageStore, ProcessedStatus, ProceduralTrack, WaveStateStore,
    };
    use crate::error::IntakeError;
    use crate::intake::extractor::EXTRACT_SYSTEM;
    use crate::intake::message::AttachmentRef;
    use crate::testing::{TestRig, message};

    fn pdf(id: &str, filename: &str) -> AttachmentRef {
        AttachmentRef {
            id: id.to_string(),
            filename: filename.to_string(),
            mime_type: None,
            size_bytes: 12,
        }
    }

    fn backlog(rig: &TestRig, count: usize) {
        for i in 0..count {
            rig.mail.push(message(
                &format!("b-{i:02}"),
                "someone@random.example",
                &format!("Note {i}"),
                "Nothing to see.",
            ));
        }
    }

    #[tokio::test]
    async fn twenty_three_messages_take_five_waves() {
        let mut rig = TestRig::new().await;
        rig.ctx.intake.wave_size = 5;
        backlog(&rig, 23);
        let orchestrator = Orchestrator::new(rig.ctx.clone());

        let first = orchestrator.start_batch().await.expect("start");
        let batch_id = first.batch_id.expect("batch created");
        assert_eq!(first.wave, 1);
        assert_eq!(first.messages.len(), 5);
        assert_eq!(first.remaining, 18);
        assert!(first.more_waves);

        orchestrator.continue_batch(batch_id, 2).await.expect("wave 2");
        let third = orchestrator.continue_batch(batch_id, 3).await.expect("wave 3");
        assert_eq!(third.remaining, 8);
        let state = rig
            .ctx
            .db
            .get_wave_state(batch_id)
            .await
            .expect("load")
            .expect("state");
        assert_eq!(state.queue.len(), 8);
        assert_eq!(state.waves_completed, 3);
        assert_eq!(state.queue[0].external_id, "b-15");

        orchestrator.continue_batch(batch_id, 4).await.expect("wave 4");
        let fifth = orchestrator.continue_batch(batch_id, 5).await.expect("wave 5");
        assert_eq!(fifth.messages.len(), 3);
        assert!(!fifth.more_waves);

        let state = rig.ctx.db.get_wave_state(batch_id).await.expect("load").expect("state");
        assert!(state.done);
        assert_eq!(rig.ctx.db.count_processed().await.expect("count"), 23);
        assert_eq!(rig.mail.read_ids().len(), 23);
    }

    #[tokio::test]
    async fn wave_numbers_are_checked() {
        let mut rig = TestRig::new().await;
        rig.ctx.intake.wave_size = 2;
        backlog(&rig, 5);
        let orchestrator = Orchestrator::new(rig.ctx.clone());

        let first = orchestrator.start_batch().await.expect("start");
        let batch_id = first.batch_id.expect("batch");

        let replay = orchestrator.continue_batch(batch_id, 1).await.expect("replay");
        assert!(replay.messages.is_empty());
        assert_eq!(replay.remaining, 3);
        assert!(replay.more_waves);

        let err = orchestrator
            .continue_batch(batch_id, 3)
            .await
            .expect_err("skip ahead");
        assert!(matches!(
            err,
            IntakeError::WaveOutOfOrder {
                expected: 2,
                requested: 3,
                ..
            }
        ));

        let missing = orchestrator
            .continue_batch(uuid::Uuid::new_v4(), 1)
            .await
            .expect_err("unknown batch");
        assert!(matches!(missing, IntakeError::BatchNotFound(_)));
    }

    #[tokio::test]
    async fn stale_queue_rewrite_is_rejected() {
        let mut rig = TestRig::new().await;
        rig.ctx.intake.wave_size = 2;
        backlog(&rig, 5);
        let orchestrator = Orchestrator::new(rig.ctx.clone());

        let first = orchestrator.start_batch().await.expect("start");
        let batch_id = first.batch_id.expect("batch");
        let stale = rig.ctx.db.get_wave_state(batch_id).await.expect("load").expect("state");

        orchestrator.continue_batch(batch_id, 2).await.expect("wave 2");
        let err = orchestrator.run_wave(stale).await.expect_err("stale");
        assert!(matches!(err, IntakeError::StaleWaveState(id) if id == batch_id));
    }

    #[tokio::test]
    async fn second_run_over_same_backlog_is_a_no_op() {
        let mut rig = TestRig::new().await;
        rig.ctx.intake.wave_size = 3;
        rig.seed("doe", "Jane Doe", ProceduralTrack::Civil).await;
        rig.storage.add_folder("Jane Doe");
        rig.model.respond(
            EXTRACT_SYSTEM,
            r#"{"obligations": [{"type": "hearing", "date": "2099-04-06", "title": "Motion hearing"}]}"#,
        );

        let mut motion = message(
            "m-1",
            "counsel@bigfirm.example",
            "Motion to compel - Jane Doe",
            "Opposing counsel filed a motion to compel today.",
        );
        motion.attachments = vec![AttachmentRef {
            id: "a1".to_string(),
            filename: "Motion_to_Compel.pdf".to_string(),
            mime_type: None,
            size_bytes: 12,
        }];
        rig.mail.add_attachment("m-1", "a1", b"%PDF-motion");
        rig.mail.push(motion);
        backlog(&rig, 4);

        let orchestrator = Orchestrator::new(rig.ctx.clone());
        let summary = orchestrator.run_to_completion().await.expect("first run");
        assert_eq!(summary.waves, 2);
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.unmatched, 4);
        assert_eq!(summary.attachments_filed, 1);
        assert!(summary.obligations >= 2);

        let processed = rig.ctx.db.count_processed().await.expect("count");
        let obligations = rig.ctx.db.count_obligations().await.expect("count");
        let uploads = rig.storage.uploads().len();

        let again = orchestrator.run_to_completion().await.expect("second run");
        assert!(again.batch_id.is_none());
        assert_eq!(rig.ctx.db.count_processed().await.expect("count"), processed);
        assert_eq!(rig.ctx.db.count_obligations().await.expect("count"), obligations);
        assert_eq!(rig.storage.uploads().len(), uploads);

        let row = rig
            .ctx
            .db
            .get_processed("m-1")
            .await
            .expect("get")
            .expect("row");
        assert_eq!(row.status, ProcessedStatus::Processed);
        assert_eq!(row.matter_id.as_deref(), Some("doe"));
        assert!(rig.ctx.db.get_checkpoint("fake").await.expect("checkpoint").is_some());
    }

    #[tokio::test]
    async fn provider_failures_mark_only_that_message() {
        let mut rig = TestRig::new().await;
        rig.ctx.intake.wave_size = 5;
        rig.seed("doe", "Jane Doe", ProceduralTrack::Civil).await;
        rig.storage.add_folder("Jane Doe");
        rig.storage.fail_uploads(true);

        let mut with_attachment = message("e-1", "clerk@courts.example.gov", "Order re Jane Doe", "Signed.");
        with_attachment.attachments = vec![AttachmentRef {
            id: "a1".to_string(),
            filename: "order.pdf".to_string(),
            mime_type: None,
            size_bytes: 5,
        }];
        rig.mail.add_attachment("e-1", "a1", b"%PDF-");
        rig.mail.push(with_attachment);
        rig.mail.push(message("e-2", "clerk@courts.example.gov", "Jane Doe minute entry", "No action."));

        let orchestrator = Orchestrator::new(rig.ctx.clone());
        let report = orchestrator.start_batch().await.expect("start");
        assert_eq!(report.messages.len(), 2);
        assert_eq!(report.messages[0].status, ProcessedStatus::Error);
        assert!(report.messages[0].error.is_some());
        assert_eq!(report.messages[1].status, ProcessedStatus::Processed);

        let errors = rig
            .ctx
            .db
            .list_processed_by_status(ProcessedStatus::Error, 10)
            .await
            .expect("list");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].external_id, "e-1");
    }

    #[tokio::test]
    async fn empty_backlog_creates_no_batch() {
        let rig = TestRig::new().await;
        let orchestrator = Orchestrator::new(rig.ctx.clone());
        let report = orchestrator.start_batch().await.expect("start");
        assert!(report.batch_id.is_none());
        assert!(!report.more_waves);
    }

    #[tokio::test]
    async fn attachments_wait_for_the_matter_folder() {
        let rig = TestRig::new().await;
        rig.seed("doe", "Jane Doe", ProceduralTrack::Civil).await;

        let mut order = message("p-1", "clerk@courts.example.gov", "Order re Jane Doe", "Signed.");
        order.attachments = vec![pdf("a1", "order.pdf")];
        rig.mail.add_attachment("p-1", "a1", b"%PDF-order");
        rig.mail.push(order);

        let orchestrator = Orchestrator::new(rig.ctx.clone());
        let first = orchestrator.start_batch().await.expect("first");
        assert_eq!(first.messages[0].status, ProcessedStatus::Processed);
        assert_eq!(first.messages[0].attachments_filed, 0);
        assert_eq!(first.messages[0].attachments_pending, 1);
        assert!(rig.storage.uploads().is_empty());

        let still_missing = orchestrator.start_batch().await.expect("second");
        assert!(still_missing.batch_id.is_none());
        assert_eq!(still_missing.refiled, 0);
        let pending = rig.ctx.db.list_pending_filings(10).await.expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 2);

        rig.storage.add_folder("Jane Doe");
        let third = orchestrator.start_batch().await.expect("third");
        assert_eq!(third.refiled, 1);
        assert_eq!(
            rig.storage.uploads(),
            vec!["Jane Doe/Court Documents/order.pdf".to_string()]
        );
        assert!(rig.ctx.db.list_pending_filings(10).await.expect("pending").is_empty());
        assert_eq!(rig.ctx.db.count_filed_documents().await.expect("count"), 1);

        let fourth = orchestrator.start_batch().await.expect("fourth");
        assert_eq!(fourth.refiled, 0);
        assert_eq!(rig.storage.uploads().len(), 1);
    }

    #[tokio::test]
    async fn open_batch_keeps_its_messages_out_of_a_new_batch() {
        let mut rig = TestRig::new().await;
        rig.ctx.intake.wave_size = 2;
        backlog(&rig, 5);
        let orchestrator = Orchestrator::new(rig.ctx.clone());

        let first = orchestrator.start_batch().await.expect("start");
        let batch_id = first.batch_id.expect("batch");
        assert_eq!(first.remaining, 3);

        let overlap = orchestrator.start_batch().await.expect("overlapping start");
        assert!(overlap.batch_id.is_none());
        assert!(overlap.messages.is_empty());

        orchestrator.continue_batch(batch_id, 2).await.expect("wave 2");
        let last = orchestrator.continue_batch(batch_id, 3).await.expect("wave 3");
        assert!(!last.more_waves);
        assert_eq!(rig.ctx.db.count_processed().await.expect("count"), 5);
        assert_eq!(rig.mail.read_ids().len(), 5);
        assert!(rig.ctx.db.queued_message_ids().await.expect("ids").is_empty());
    }

    #[tokio::test]
    async fn reply_to_a_filing_notice_does_not_cascade_again() {
        let rig = TestRig::new().await;
        rig.seed("doe", "Jane Doe", ProceduralTrack::Civil).await;
        rig.storage.add_folder("Jane Doe");

        let mut motion = message(
            "t-1",
            "counsel@bigfirm.example",
            "Motion to compel - Jane Doe",
            "Opposing counsel filed a motion to compel today.",
        );
        motion.attachments = vec![pdf("a1", "Motion_to_Compel.pdf")];
        rig.mail.add_attachment("t-1", "a1", b"%PDF-motion");
        rig.mail.push(motion);

        let mut reply = message(
            "t-2",
            "counsel@bigfirm.example",
            "RE: Motion to compel - Jane Doe",
            "Following up on the motion to compel filed last week.",
        );
        reply.received_at = Utc.with_ymd_and_hms(2026, 3, 9, 15, 0, 0).single().expect("ts");
        rig.mail.push(reply);

        let orchestrator = Orchestrator::new(rig.ctx.clone());
        let report = orchestrator.start_batch().await.expect("start");
        assert_eq!(report.messages.len(), 2);
        assert!(report.messages[0].obligations_cascaded > 0);
        assert_eq!(report.messages[1].status, ProcessedStatus::Processed);
        assert_eq!(report.messages[1].obligations_cascaded, 0);

        let cascaded: Vec<_> = rig
            .ctx
            .db
            .list_obligations_for_matter("doe")
            .await
            .expect("list")
            .into_iter()
            .filter(|o| o.source == ObligationSource::Cascaded)
            .collect();
        assert_eq!(cascaded.len() as u32, report.messages[0].obligations_cascaded);
        assert!(cascaded.iter().all(|o| o.message_id.as_deref() == Some("t-1")));
    }
}
