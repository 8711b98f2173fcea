//! Obligation extraction from message text.

use std::sync::LazyLock;

use chrono::{Duration, NaiveDate, NaiveTime};
use regex::Regex;
use serde::Deserialize;

use super::IntakeContext;
use super::message::InboundMessage;
use crate::db::{
    CreateObligationParams, MatterRecord, ObligationFamily, ObligationRecord, ObligationSource,
    ObligationType, obligations_same_family,
};
use crate::error::{IntakeError, with_timeout};
use crate::providers::model::parse_json_answer;
use crate::providers::{CalendarEvent, VisualClass};

pub const EXTRACT_SYSTEM: &str = "You extract calendar obligations from legal correspondence. \
Answer with one JSON object: {\"obligations\": [{\"type\": <hearing|status_conference|trial|\
filing_deadline|response_due|discovery_due|follow_up|...>, \"date\": \"YYYY-MM-DD\", \
\"time\": \"HH:MM\" or null, \"location\": string or null, \"title\": short description, \
\"confidence\": \"high\"|\"medium\"|\"low\"}]}. Only include obligations with an explicit date. \
Return {\"obligations\": []} when there are none.";

static STRICT_DATE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").ok());

#[derive(Debug, Default, Deserialize)]
struct ExtractionAnswer {
    #[serde(default)]
    obligations: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    confidence: Option<String>,
}

/// Result of one extraction pass.
#[derive(Debug, Default)]
pub struct ExtractionOutcome {
    pub created: Vec<ObligationRecord>,
    pub duplicates: usize,
    pub rejected: usize,
}

/// Strict `YYYY-MM-DD` that is a real date strictly after `today`.
pub fn parse_future_date(raw: &str, today: NaiveDate) -> Option<NaiveDate> {
    let raw = raw.trim();
    if !STRICT_DATE.as_ref()?.is_match(raw) {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .filter(|date| *date > today)
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    ["%H:%M", "%H:%M:%S", "%I:%M %p", "%I:%M%p"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(&raw.to_ascii_uppercase(), fmt).ok())
}

pub fn visual_class_for(kind: ObligationType) -> VisualClass {
    match kind.family() {
        ObligationFamily::Appearance => VisualClass::Appointment,
        ObligationFamily::Filing | ObligationFamily::Discovery => VisualClass::Deadline,
        ObligationFamily::FollowUp | ObligationFamily::Other => VisualClass::Task,
    }
}

fn matter_context(matter: &MatterRecord) -> String {
    let mut lines = vec![
        format!("Client: {}", matter.client_name),
        format!("Procedural track: {}", matter.track.as_str()),
    ];
    if let Some(counterpart) = &matter.counterpart_name {
        lines.push(format!("Opposing party/counsel: {counterpart}"));
    }
    if let Some(forum) = &matter.forum {
        lines.push(format!("Forum: {forum}"));
    }
    if let Some(number) = &matter.case_number {
        lines.push(format!("Case number: {number}"));
    }
    lines.join("\n")
}

/// Ask the model for dated obligations in `message` and store the new ones
/// against `matter`. Candidates without a strict future date are dropped;
/// unparsable output counts as no candidates.
pub async fn extract(
    ctx: &IntakeContext,
    message: &InboundMessage,
    matter: &MatterRecord,
    today: NaiveDate,
) -> Result<ExtractionOutcome, IntakeError> {
    let prompt = format!(
        "Today is {today}.\n{}\n\nSubject: {}\n\n{}",
        matter_context(matter),
        message.subject,
        message.body
    );
    let raw = with_timeout(
        "model",
        ctx.intake.call_timeout,
        ctx.model.complete_json(EXTRACT_SYSTEM, &prompt),
    )
    .await?;

    let mut outcome = ExtractionOutcome::default();
    let Some(answer) = parse_json_answer::<ExtractionAnswer>(&raw) else {
        tracing::warn!(external_id = %message.external_id, "Unparsable extraction answer");
        return Ok(outcome);
    };

    for value in answer.obligations {
        let Ok(candidate) = serde_json::from_value::<Candidate>(value) else {
            outcome.rejected += 1;
            continue;
        };
        if candidate
            .confidence
            .as_deref()
            .is_some_and(|c| c.trim().eq_ignore_ascii_case("none"))
        {
            outcome.rejected += 1;
            continue;
        }
        let Some(due_date) = candidate
            .date
            .as_deref()
            .and_then(|d| parse_future_date(d, today))
        else {
            tracing::debug!(
                external_id = %message.external_id,
                date = ?candidate.date,
                "Rejected candidate without a future date"
            );
            outcome.rejected += 1;
            continue;
        };

        let obligation_type = candidate
            .kind
            .as_deref()
            .map(ObligationType::from_label)
            .unwrap_or(ObligationType::Other);
        let title = candidate
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                let mut label = obligation_type.label();
                if let Some(first) = label.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                label
            });

        // Closed rows count too: a completed hearing is not re-docketed.
        let existing = ctx.db.list_obligations_on(&matter.matter_id, due_date).await?;
        if existing
            .iter()
            .any(|record| obligations_same_family(record, obligation_type, &title))
        {
            outcome.duplicates += 1;
            continue;
        }

        let record = ctx
            .db
            .create_obligation(&CreateObligationParams {
                matter_id: matter.matter_id.clone(),
                obligation_type,
                title,
                due_date,
                due_time: candidate.time.as_deref().and_then(parse_time),
                location: candidate
                    .location
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty()),
                description: Some(format!("From: {}", message.subject)),
                source: ObligationSource::Extracted,
                cascade_group: None,
                trigger_event: None,
                rule_citation: None,
                reminder_days: Vec::new(),
                message_id: Some(message.external_id.clone()),
            })
            .await?;
        schedule_calendar_event(ctx, matter, &record).await;
        outcome.created.push(record);
    }

    tracing::info!(
        external_id = %message.external_id,
        matter = %matter.matter_id,
        created = outcome.created.len(),
        duplicates = outcome.duplicates,
        rejected = outcome.rejected,
        "Extracted obligations"
    );
    Ok(outcome)
}

/// Calendar failures are logged and otherwise ignored.
async fn schedule_calendar_event(
    ctx: &IntakeContext,
    matter: &MatterRecord,
    record: &ObligationRecord,
) {
    let visual_class = visual_class_for(record.obligation_type);
    let end = match (visual_class, record.due_time) {
        (VisualClass::Appointment, Some(start)) => Some(start + Duration::hours(1)),
        _ => None,
    };
    let event = CalendarEvent {
        matter_folder: matter.storage_folder().to_string(),
        title: format!("{}: {}", matter.client_name, record.title),
        date: record.due_date,
        start: record.due_time,
        end,
        description: record.description.clone(),
        location: record.location.clone(),
        visual_class,
    };
    if let Err(e) = with_timeout(
        "calendar",
        ctx.intake.call_timeout,
        ctx.calendar.create_event(&event),
    )
    .await
    {
        tracing::warn!(obligation = %record.id, error = %e, "Calendar event not created");
    }
}
