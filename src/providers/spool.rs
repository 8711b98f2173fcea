//! Directory-backed mail source.
//!
//! Layout: `<spool>/<external_id>.json` holds one message, attachments live
//! under `<spool>/<external_id>/`. Marking a message read moves both into
//! `<spool>/read/`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::MailSource;
use crate::error::ProviderError;
use crate::intake::message::{AttachmentRef, InboundMessage};
use crate::legal::policy::is_safe_path_segment;

const READ_DIR: &str = "read";

pub struct SpoolMailSource {
    name: String,
    root: PathBuf,
}

impl SpoolMailSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let name = root
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| format!("spool:{n}"))
            .unwrap_or_else(|| "spool".to_string());
        Self { name, root }
    }

    fn provider(&self) -> &str {
        &self.name
    }

    fn checked_id<'a>(&self, external_id: &'a str) -> Result<&'a str, ProviderError> {
        if is_safe_path_segment(external_id) {
            Ok(external_id)
        } else {
            Err(ProviderError::invalid(
                self.provider(),
                format!("unsafe message id '{external_id}'"),
            ))
        }
    }

    async fn read_message(&self, path: &Path) -> Result<InboundMessage, ProviderError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ProviderError::unavailable(self.provider(), e))?;
        let mut message: InboundMessage = serde_json::from_str(&raw)
            .map_err(|e| ProviderError::invalid(self.provider(), format!("{}: {}", path.display(), e)))?;
        if message.external_id.trim().is_empty()
            && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
        {
            message.external_id = stem.to_string();
        }
        message.source = self.name.clone();
        Ok(message)
    }
}

#[async_trait]
impl MailSource for SpoolMailSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<InboundMessage>, ProviderError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ProviderError::unavailable(self.provider(), e)),
        };

        let mut messages = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ProviderError::unavailable(self.provider(), e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read_message(&path).await {
                Ok(message) if message.received_at >= since => messages.push(message),
                Ok(_) => {}
                Err(e) => tracing::warn!(spool = %self.root.display(), "Skipping spool entry: {}", e),
            }
        }
        messages.sort_by(|a, b| {
            a.received_at
                .cmp(&b.received_at)
                .then_with(|| a.external_id.cmp(&b.external_id))
        });
        tracing::debug!(source = %self.name, count = messages.len(), "Fetched spool messages");
        Ok(messages)
    }

    async fn mark_read(&self, external_id: &str) -> Result<(), ProviderError> {
        let id = self.checked_id(external_id)?;
        let read_dir = self.root.join(READ_DIR);
        tokio::fs::create_dir_all(&read_dir)
            .await
            .map_err(|e| ProviderError::unavailable(self.provider(), e))?;

        let file = self.root.join(format!("{id}.json"));
        match tokio::fs::rename(&file, read_dir.join(format!("{id}.json"))).await {
            Ok(()) => {}
            // Already moved by an earlier run.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(ProviderError::unavailable(self.provider(), e)),
        }

        let attachments = self.root.join(id);
        if tokio::fs::metadata(&attachments).await.is_ok() {
            tokio::fs::rename(&attachments, read_dir.join(id))
                .await
                .map_err(|e| ProviderError::unavailable(self.provider(), e))?;
        }
        Ok(())
    }

    async fn fetch_attachment(
        &self,
        message: &InboundMessage,
        attachment: &AttachmentRef,
    ) -> Result<Bytes, ProviderError> {
        let id = self.checked_id(&message.external_id)?;
        if !is_safe_path_segment(&attachment.filename) {
            return Err(ProviderError::invalid(
                self.provider(),
                format!("unsafe attachment name '{}'", attachment.filename),
            ));
        }
        let candidates = [
            self.root.join(id).join(&attachment.filename),
            self.root.join(READ_DIR).join(id).join(&attachment.filename),
        ];
        for path in &candidates {
            match tokio::fs::read(path).await {
                Ok(bytes) => return Ok(Bytes::from(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(ProviderError::unavailable(self.provider(), e)),
            }
        }
        Err(ProviderError::unavailable(
            self.provider(),
            format!("attachment '{}' missing for {}", attachment.filename, id),
        ))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::SpoolMailSource;
    use crate::providers::MailSource;

    fn write_message(dir: &std::path::Path, id: &str, day: u32) {
        let body = serde_json::json!({
            "external_id": id,
            "sender_email": "clerk@courts.test",
            "subject": format!("Notice {id}"),
            "received_at": format!("2026-03-{day:02}T10:00:00Z"),
            "attachments": [{"id": "a1", "filename": "order.pdf", "size_bytes": 5}]
        });
        std::fs::write(dir.join(format!("{id}.json")), body.to_string()).expect("write message");
        std::fs::create_dir_all(dir.join(id)).expect("attachment dir");
        std::fs::write(dir.join(id).join("order.pdf"), b"%PDF-").expect("attachment");
    }

    #[tokio::test]
    async fn fetch_filters_by_timestamp_and_tags_source() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_message(dir.path(), "m-1", 1);
        write_message(dir.path(), "m-2", 5);
        std::fs::write(dir.path().join("junk.json"), "{not json").expect("junk");

        let source = SpoolMailSource::new(dir.path());
        let since = Utc.with_ymd_and_hms(2026, 3, 3, 0, 0, 0).single().expect("ts");
        let messages = source.fetch_since(since).await.expect("fetch");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].external_id, "m-2");
        assert_eq!(messages[0].source, source.name());
    }

    #[tokio::test]
    async fn mark_read_moves_message_and_attachments() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_message(dir.path(), "m-1", 1);
        let source = SpoolMailSource::new(dir.path());
        let since = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("ts");
        let message = source.fetch_since(since).await.expect("fetch").remove(0);

        source.mark_read("m-1").await.expect("mark read");
        source.mark_read("m-1").await.expect("second mark is a no-op");
        assert!(source.fetch_since(since).await.expect("fetch").is_empty());

        let bytes = source
            .fetch_attachment(&message, &message.attachments[0])
            .await
            .expect("attachment still readable");
        assert_eq!(&bytes[..], b"%PDF-");
    }

    #[tokio::test]
    async fn traversal_ids_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = SpoolMailSource::new(dir.path());
        assert!(source.mark_read("../etc").await.is_err());
    }
}
