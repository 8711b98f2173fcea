//! Test helpers: temp-file databases, a seeded rule calculator, and
//! scripted stand-ins for every collaborator.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use crate::config::{IntakeConfig, MatchingConfig};
use crate::db::libsql::LibSqlBackend;
use crate::db::{
    Database, MatterRecord, MatterStatus, MatterStore, ProceduralTrack, UpsertMatterParams,
};
use crate::error::ProviderError;
use crate::intake::IntakeContext;
use crate::intake::message::{AttachmentRef, InboundMessage};
use crate::legal::cascade::DeadlineCalculator;
use crate::legal::holidays::{HolidayTable, Jurisdiction};
use crate::legal::rules::RuleTable;
use crate::providers::{
    CalendarEvent, CalendarService, ClassificationModel, FolderId, MailSource,
    NotificationChannel, StorageProvider,
};

pub(crate) const FAKE_SOURCE: &str = "fake";

/// Migrated libSQL database in a temp dir. Keep the dir alive for the test.
pub(crate) async fn test_db() -> (LibSqlBackend, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = LibSqlBackend::new_local(&dir.path().join("clerk.db"))
        .await
        .expect("open libsql");
    backend.run_migrations().await.expect("migrations");
    (backend, dir)
}

pub(crate) async fn seed_matter<D: MatterStore + ?Sized>(
    db: &D,
    matter_id: &str,
    client_name: &str,
    track: ProceduralTrack,
) -> MatterRecord {
    db.upsert_matter(&UpsertMatterParams {
        matter_id: matter_id.to_string(),
        client_name: client_name.to_string(),
        track,
        status: MatterStatus::Active,
        case_number: None,
        counterpart_name: None,
        counterpart_emails: Vec::new(),
        forum: None,
        storage_root: None,
    })
    .await
    .expect("seed matter")
}

/// Bundled Utah rules against the Utah holiday table.
pub(crate) fn test_calculator() -> DeadlineCalculator {
    let rules = RuleTable::bundled().expect("bundled rules").clone();
    DeadlineCalculator::new(
        Arc::new(rules),
        Arc::new(HolidayTable::new(Jurisdiction::UsUtah, Vec::new())),
    )
}

fn received_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0)
        .single()
        .expect("valid ts")
}

pub(crate) fn message(external_id: &str, sender: &str, subject: &str, body: &str) -> InboundMessage {
    InboundMessage {
        external_id: external_id.to_string(),
        source: FAKE_SOURCE.to_string(),
        sender_email: sender.to_string(),
        sender_name: None,
        subject: subject.to_string(),
        body: body.to_string(),
        received_at: received_at(),
        attachments: Vec::new(),
    }
}

/// Returns every queued message on each fetch, like a source that never
/// honours read flags; dedup is left to the ledger.
#[derive(Default)]
pub(crate) struct FakeMailSource {
    messages: Mutex<Vec<InboundMessage>>,
    attachments: Mutex<HashMap<(String, String), Bytes>>,
    read: Mutex<Vec<String>>,
}

impl FakeMailSource {
    pub(crate) fn push(&self, message: InboundMessage) {
        self.messages.lock().unwrap().push(message);
    }

    pub(crate) fn add_attachment(&self, message_id: &str, attachment_id: &str, bytes: &[u8]) {
        self.attachments.lock().unwrap().insert(
            (message_id.to_string(), attachment_id.to_string()),
            Bytes::copy_from_slice(bytes),
        );
    }

    pub(crate) fn read_ids(&self) -> Vec<String> {
        self.read.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailSource for FakeMailSource {
    fn name(&self) -> &str {
        FAKE_SOURCE
    }

    async fn fetch_since(
        &self,
        _since: DateTime<Utc>,
    ) -> Result<Vec<InboundMessage>, ProviderError> {
        Ok(self.messages.lock().unwrap().clone())
    }

    async fn mark_read(&self, external_id: &str) -> Result<(), ProviderError> {
        self.read.lock().unwrap().push(external_id.to_string());
        Ok(())
    }

    async fn fetch_attachment(
        &self,
        message: &InboundMessage,
        attachment: &AttachmentRef,
    ) -> Result<Bytes, ProviderError> {
        self.attachments
            .lock()
            .unwrap()
            .get(&(message.external_id.clone(), attachment.id.clone()))
            .cloned()
            .ok_or_else(|| ProviderError::unavailable(FAKE_SOURCE, "no such attachment"))
    }
}

#[derive(Default)]
pub(crate) struct FakeStorage {
    folders: Mutex<HashSet<String>>,
    uploads: Mutex<Vec<String>>,
    fail_uploads: AtomicBool,
}

impl FakeStorage {
    pub(crate) fn add_folder(&self, name: &str) {
        self.folders.lock().unwrap().insert(name.to_string());
    }

    pub(crate) fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageProvider for FakeStorage {
    async fn find_folder(&self, matter_name: &str) -> Result<Option<FolderId>, ProviderError> {
        Ok(self
            .folders
            .lock()
            .unwrap()
            .contains(matter_name)
            .then(|| FolderId(matter_name.to_string())))
    }

    async fn ensure_folder(
        &self,
        parent: &FolderId,
        name: &str,
    ) -> Result<FolderId, ProviderError> {
        Ok(FolderId(format!("{}/{}", parent.0, name)))
    }

    async fn upload(
        &self,
        folder: &FolderId,
        filename: &str,
        _bytes: Bytes,
    ) -> Result<String, ProviderError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(ProviderError::unavailable("fake-storage", "upload refused"));
        }
        let location = format!("{}/{}", folder.0, filename);
        self.uploads.lock().unwrap().push(location.clone());
        Ok(location)
    }
}

#[derive(Default)]
pub(crate) struct FakeCalendar {
    events: Mutex<Vec<CalendarEvent>>,
    fail_next: AtomicBool,
}

impl FakeCalendar {
    pub(crate) fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub(crate) fn events(&self) -> Vec<CalendarEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl CalendarService for FakeCalendar {
    async fn create_event(&self, event: &CalendarEvent) -> Result<String, ProviderError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ProviderError::unavailable("fake-calendar", "calendar down"));
        }
        let mut events = self.events.lock().unwrap();
        events.push(event.clone());
        Ok(format!("evt-{}", events.len()))
    }
}

/// Answers by needle: the first rule whose needle appears in the system
/// prompt or the user prompt wins; anything else gets `{}`.
#[derive(Default)]
pub(crate) struct ScriptedModel {
    rules: Mutex<Vec<(String, String)>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub(crate) fn respond(&self, needle: &str, answer: &str) {
        let mut rules = self.rules.lock().unwrap();
        match rules.iter_mut().find(|(n, _)| n == needle) {
            Some(rule) => rule.1 = answer.to_string(),
            None => rules.push((needle.to_string(), answer.to_string())),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClassificationModel for ScriptedModel {
    async fn complete_json(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .rules
            .lock()
            .unwrap()
            .iter()
            .find(|(needle, _)| system.contains(needle.as_str()) || prompt.contains(needle.as_str()))
            .map(|(_, answer)| answer.clone())
            .unwrap_or_else(|| "{}".to_string()))
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    sent: Mutex<Vec<(String, String, String)>>,
    reject: AtomicBool,
}

impl RecordingNotifier {
    pub(crate) fn reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationChannel for RecordingNotifier {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<bool, ProviderError> {
        if self.reject.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.sent.lock().unwrap().push((
            recipient.to_string(),
            subject.to_string(),
            body.to_string(),
        ));
        Ok(true)
    }
}

pub(crate) fn test_intake_config() -> IntakeConfig {
    IntakeConfig {
        wave_size: 5,
        wave_time_budget: Duration::from_secs(240),
        call_timeout: Duration::from_secs(5),
        internal_domains: vec!["firm.example".to_string()],
        trusted_sender_domains: vec!["referrals.example".to_string()],
        auto_register_matters: true,
        max_attachment_bytes: 1024 * 1024,
        storage_root: "matters".to_string(),
        lookback_days: 7,
    }
}

/// An intake context wired to fakes, with handles kept for assertions.
pub(crate) struct TestRig {
    pub ctx: IntakeContext,
    pub mail: Arc<FakeMailSource>,
    pub storage: Arc<FakeStorage>,
    pub calendar: Arc<FakeCalendar>,
    pub model: Arc<ScriptedModel>,
    _dir: TempDir,
}

impl TestRig {
    pub(crate) async fn new() -> Self {
        let (backend, dir) = test_db().await;
        let db: Arc<dyn Database> = Arc::new(backend);
        let mail = Arc::new(FakeMailSource::default());
        let storage = Arc::new(FakeStorage::default());
        let calendar = Arc::new(FakeCalendar::default());
        let model = Arc::new(ScriptedModel::default());
        let ctx = IntakeContext {
            db,
            sources: vec![mail.clone() as Arc<dyn MailSource>],
            storage: storage.clone(),
            calendar: calendar.clone(),
            model: model.clone(),
            calculator: test_calculator(),
            intake: test_intake_config(),
            matching: MatchingConfig::default(),
        };
        Self {
            ctx,
            mail,
            storage,
            calendar,
            model,
            _dir: dir,
        }
    }

    pub(crate) async fn seed(&self, matter_id: &str, client_name: &str, track: ProceduralTrack) {
        seed_matter(self.ctx.db.as_ref(), matter_id, client_name, track).await;
    }
}
