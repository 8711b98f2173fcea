//! Calendar that appends rows to each matter's `deadlines/calendar.md`.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{CalendarEvent, CalendarService};
use crate::error::ProviderError;
use crate::legal::policy::is_safe_path_segment;

const PROVIDER: &str = "markdown-calendar";
const CALENDAR_HEADER: &str = "# Deadlines and Hearings\n\n\
     | Date | Deadline / Event | Owner | Status | Source |\n|---|---|---|---|---|\n";

pub struct MarkdownCalendar {
    root: PathBuf,
}

impl MarkdownCalendar {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn cell(raw: &str) -> String {
    raw.replace('|', "/").replace(['\n', '\r'], " ").trim().to_string()
}

fn render_row(event: &CalendarEvent, id: &Uuid) -> String {
    let when = match (event.start, event.end) {
        (Some(start), Some(end)) => format!(
            "{} {}-{}",
            event.date,
            start.format("%H:%M"),
            end.format("%H:%M")
        ),
        (Some(start), None) => format!("{} {}", event.date, start.format("%H:%M")),
        _ => event.date.to_string(),
    };
    let mut what = cell(&event.title);
    if let Some(location) = event.location.as_deref().filter(|l| !l.trim().is_empty()) {
        what.push_str(&format!(" @ {}", cell(location)));
    }
    let source = match event.description.as_deref() {
        Some(description) if !description.trim().is_empty() => {
            format!("{} ({})", cell(description), &id.to_string()[..8])
        }
        _ => format!("intake ({})", &id.to_string()[..8]),
    };
    format!(
        "| {when} | {what} | attorney | {} | {source} |\n",
        event.visual_class.as_str()
    )
}

#[async_trait]
impl CalendarService for MarkdownCalendar {
    async fn create_event(&self, event: &CalendarEvent) -> Result<String, ProviderError> {
        if !is_safe_path_segment(&event.matter_folder) {
            return Err(ProviderError::invalid(
                PROVIDER,
                format!("unsafe matter folder '{}'", event.matter_folder),
            ));
        }
        let dir = self.root.join(event.matter_folder.trim()).join("deadlines");
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ProviderError::unavailable(PROVIDER, e))?;

        let path = dir.join("calendar.md");
        let is_new = tokio::fs::metadata(&path).await.is_err();
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| ProviderError::unavailable(PROVIDER, e))?;

        let id = Uuid::new_v4();
        let mut out = String::new();
        if is_new {
            out.push_str(CALENDAR_HEADER);
        }
        out.push_str(&render_row(event, &id));
        file.write_all(out.as_bytes())
            .await
            .map_err(|e| ProviderError::unavailable(PROVIDER, e))?;
        Ok(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};

    use super::MarkdownCalendar;
    use crate::providers::{CalendarEvent, CalendarService, VisualClass};

    #[tokio::test]
    async fn rows_append_under_a_single_header() {
        let dir = tempfile::tempdir().expect("tempdir");
        let calendar = MarkdownCalendar::new(dir.path());
        let event = CalendarEvent {
            matter_folder: "Jane Doe".to_string(),
            title: "Hearing | motion to dismiss".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 4, 6).expect("date"),
            start: Some(NaiveTime::from_hms_opt(9, 0, 0).expect("time")),
            end: None,
            description: None,
            location: Some("Courtroom 4".to_string()),
            visual_class: VisualClass::Appointment,
        };

        calendar.create_event(&event).await.expect("first");
        calendar.create_event(&event).await.expect("second");

        let raw = std::fs::read_to_string(dir.path().join("Jane Doe/deadlines/calendar.md"))
            .expect("calendar");
        assert_eq!(raw.matches("# Deadlines and Hearings").count(), 1);
        assert_eq!(raw.matches("2026-04-06 09:00").count(), 2);
        assert!(raw.contains("Hearing / motion to dismiss @ Courtroom 4"));
        assert!(raw.contains("| appointment |"));
    }
}
