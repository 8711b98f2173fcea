//! Inbound correspondence as fetched from a mail source.
//!
//! Messages are immutable once fetched: the pipeline reads them and records
//! outcomes elsewhere, it never edits them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Attachment metadata. Bytes are downloaded on demand by the filer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Source-assigned identifier; the ledger dedup key.
    pub external_id: String,
    /// Name of the configured mail source that produced the message.
    #[serde(default)]
    pub source: String,
    pub sender_email: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

impl InboundMessage {
    /// Lowercased sender address with surrounding whitespace and brackets removed.
    pub fn sender_address(&self) -> String {
        normalize_address(&self.sender_email)
    }

    pub fn sender_domain(&self) -> Option<String> {
        let address = self.sender_address();
        address
            .rsplit_once('@')
            .map(|(_, domain)| domain.trim_end_matches('.').to_string())
            .filter(|domain| !domain.is_empty())
    }

    pub fn received_date(&self) -> NaiveDate {
        self.received_at.date_naive()
    }

    /// Subject and body joined for pattern scans.
    pub fn searchable_text(&self) -> String {
        format!("{}\n{}", self.subject, self.body)
    }

    pub fn is_forward(&self) -> bool {
        let subject = self.subject.trim_start().to_ascii_lowercase();
        subject.starts_with("fw:")
            || subject.starts_with("fwd:")
            || self.body.contains("Forwarded message")
            || self.body.contains("Original Message")
    }
}

pub fn normalize_address(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim()
        .to_ascii_lowercase()
}
