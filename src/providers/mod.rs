//! External collaborators consumed by the intake pipeline.
//!
//! Each trait is the narrow contract the pipeline depends on; the bundled
//! implementations work against local directories and plain HTTP so the
//! binary runs end to end without vendor SDKs.

pub mod calendar;
pub mod model;
pub mod notify;
pub mod spool;
pub mod storage;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::intake::message::{AttachmentRef, InboundMessage};

pub use calendar::MarkdownCalendar;
pub use model::HttpModel;
pub use notify::{LogNotifier, WebhookNotifier};
pub use spool::SpoolMailSource;
pub use storage::LocalStorage;

/// At-least-once message source. Dedup is the caller's job.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Stable name used for checkpoints and ledger rows.
    fn name(&self) -> &str;

    async fn fetch_since(&self, since: DateTime<Utc>)
    -> Result<Vec<InboundMessage>, ProviderError>;

    async fn mark_read(&self, external_id: &str) -> Result<(), ProviderError>;

    async fn fetch_attachment(
        &self,
        message: &InboundMessage,
        attachment: &AttachmentRef,
    ) -> Result<Bytes, ProviderError>;
}

/// Opaque folder handle returned by a storage provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderId(pub String);

#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Locate the root folder for a matter by its storage name.
    async fn find_folder(&self, matter_name: &str) -> Result<Option<FolderId>, ProviderError>;

    /// Find or create a child folder.
    async fn ensure_folder(&self, parent: &FolderId, name: &str)
    -> Result<FolderId, ProviderError>;

    /// Write `bytes` and return the stored location. Size limits are the
    /// caller's responsibility.
    async fn upload(
        &self,
        folder: &FolderId,
        filename: &str,
        bytes: Bytes,
    ) -> Result<String, ProviderError>;
}

/// Calendar presentation class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualClass {
    Appointment,
    Task,
    Deadline,
}

impl VisualClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Appointment => "appointment",
            Self::Task => "task",
            Self::Deadline => "deadline",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    /// Storage folder of the owning matter.
    pub matter_folder: String,
    pub title: String,
    pub date: NaiveDate,
    pub start: Option<NaiveTime>,
    pub end: Option<NaiveTime>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub visual_class: VisualClass,
}

#[async_trait]
pub trait CalendarService: Send + Sync {
    /// Returns the provider's event id.
    async fn create_event(&self, event: &CalendarEvent) -> Result<String, ProviderError>;
}

/// Single-shot text inference that must answer with one JSON object.
#[async_trait]
pub trait ClassificationModel: Send + Sync {
    async fn complete_json(&self, system: &str, prompt: &str) -> Result<String, ProviderError>;
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Returns whether the channel accepted the notification.
    async fn send(&self, recipient: &str, subject: &str, body: &str)
    -> Result<bool, ProviderError>;
}
