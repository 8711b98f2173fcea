//! Detect trigger events in inbound correspondence.

use std::sync::LazyLock;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use chrono::NaiveDate;
use regex::Regex;

use crate::intake::message::InboundMessage;
use crate::legal::dates::ServiceType;

/// Phrases mapped to trigger events. Earlier entries win when several match,
/// so specific phrases ("memorandum opposing") precede generic ones ("motion").
const TRIGGER_PHRASES: &[(&str, &str)] = &[
    ("notice of appeal", "notice_of_appeal_filed"),
    ("record on appeal", "record_filed"),
    ("record index", "record_filed"),
    ("brief of appellant", "appellant_brief_served"),
    ("appellant's brief", "appellant_brief_served"),
    ("opening brief", "appellant_brief_served"),
    ("brief of appellee", "appellee_brief_served"),
    ("appellee's brief", "appellee_brief_served"),
    ("memorandum opposing", "opposition_filed"),
    ("memorandum in opposition", "opposition_filed"),
    ("opposition to", "opposition_filed"),
    ("notice of entry of judgment", "judgment_entered"),
    ("final judgment", "judgment_entered"),
    ("judgment entered", "judgment_entered"),
    ("summons and complaint", "complaint_served"),
    ("complaint served", "complaint_served"),
    ("answer to complaint", "answer_filed"),
    ("interrogatories", "discovery_served"),
    ("requests for production", "discovery_served"),
    ("requests for admission", "discovery_served"),
    ("discovery requests", "discovery_served"),
    ("motion to", "motion_filed"),
    ("motion for", "motion_filed"),
];

static TRIGGER_MATCHER: LazyLock<Result<AhoCorasick, String>> = LazyLock::new(|| {
    AhoCorasickBuilder::new()
        .ascii_case_insensitive(true)
        .match_kind(MatchKind::Standard)
        .build(TRIGGER_PHRASES.iter().map(|(phrase, _)| *phrase))
        .map_err(|e| format!("invalid trigger phrases: {}", e))
});

static MAIL_SERVICE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:served|sent|delivered)\s+(?:by|via)\s+(?:u\.?s\.?\s+|first[- ]class\s+|certified\s+)?mail\b|\bmailed\b|\bcertificate of service by mail\b",
    )
    .ok()
});

/// A trigger event recognized in a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedTrigger {
    pub event: &'static str,
    pub date: NaiveDate,
    pub service: ServiceType,
}

/// First trigger event named in `text`, by table priority.
pub fn trigger_event_in(text: &str) -> Option<&'static str> {
    let matcher = TRIGGER_MATCHER.as_ref().ok()?;
    matcher
        .find_overlapping_iter(text)
        .map(|hit| hit.pattern().as_usize())
        .min()
        .map(|idx| TRIGGER_PHRASES[idx].1)
}

pub fn service_type_of(body: &str) -> ServiceType {
    match MAIL_SERVICE.as_ref() {
        Some(re) if re.is_match(body) => ServiceType::Mail,
        _ => ServiceType::Electronic,
    }
}

static REPLY_PREFIX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:re|aw|sv|fw|fwd|wg)\s*(?:\[\d+\])?\s*:").ok());

/// Subject wording that reports the event as having happened.
static OCCURRED: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:e-?filed|filed|filing|served|service of|entered|entry of|issued|signed|lodged|docketed)\b",
    )
    .ok()
});

fn matches(re: &LazyLock<Option<Regex>>, text: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(text))
}

/// Reply and forward subjects refer back to an earlier message.
pub fn is_thread_follow_up(message: &InboundMessage) -> bool {
    matches(&REPLY_PREFIX, &message.subject) || message.is_forward()
}

/// Detect a trigger event the message reports as having occurred.
///
/// The event comes from the subject, else from the resolver's document-type
/// tag. It counts only with evidence of the filing itself: an attached
/// document or subject wording such as "filed" or "entered". Body text is
/// never used, and replies or forwards never trigger. The trigger date is
/// the day the message arrived.
pub fn detect_trigger(message: &InboundMessage, document_type: Option<&str>) -> Option<DetectedTrigger> {
    if is_thread_follow_up(message) {
        return None;
    }
    let has_document = !message.attachments.is_empty();
    let event = match trigger_event_in(&message.subject) {
        Some(event) if has_document || matches(&OCCURRED, &message.subject) => event,
        _ if has_document => {
            document_type.and_then(|tag| trigger_event_in(&tag.replace('_', " ")))?
        }
        _ => return None,
    };
    Some(DetectedTrigger {
        event,
        date: message.received_date(),
        service: service_type_of(&message.body),
    })
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::{detect_trigger, service_type_of, trigger_event_in};
    use crate::intake::message::{AttachmentRef, InboundMessage};
    use crate::legal::dates::ServiceType;

    fn message(subject: &str, body: &str) -> InboundMessage {
        InboundMessage {
            external_id: "m-1".to_string(),
            source: "spool".to_string(),
            sender_email: "efiling@courts.test".to_string(),
            sender_name: None,
            subject: subject.to_string(),
            body: body.to_string(),
            received_at: Utc.with_ymd_and_hms(2025, 3, 10, 15, 0, 0).single().expect("ts"),
            attachments: Vec::new(),
        }
    }

    #[test]
    fn specific_phrases_beat_generic_ones() {
        assert_eq!(
            trigger_event_in("Memorandum opposing Motion to Dismiss"),
            Some("opposition_filed")
        );
        assert_eq!(
            trigger_event_in("Defendant's Motion to Compel"),
            Some("motion_filed")
        );
        assert_eq!(
            trigger_event_in("Notice of Appeal from final judgment"),
            Some("notice_of_appeal_filed")
        );
        assert_eq!(trigger_event_in("Lunch on Friday?"), None);
    }

    #[test]
    fn mail_service_is_detected_but_email_is_not() {
        assert_eq!(
            service_type_of("A copy was served by U.S. mail on March 7."),
            ServiceType::Mail
        );
        assert_eq!(
            service_type_of("Served via email through the e-filing system."),
            ServiceType::Electronic
        );
    }

    #[test]
    fn detection_uses_received_date() {
        let detected = detect_trigger(
            &message("Filed: Motion for Summary Judgment", "Served via e-filing."),
            None,
        )
        .expect("trigger");
        assert_eq!(detected.event, "motion_filed");
        assert_eq!(detected.date, NaiveDate::from_ymd_opt(2025, 3, 10).expect("date"));
        assert_eq!(detected.service, ServiceType::Electronic);

        assert!(detect_trigger(&message("Checking in", "How are you?"), None).is_none());
    }

    fn with_attachment(mut message: InboundMessage, filename: &str) -> InboundMessage {
        message.attachments.push(AttachmentRef {
            id: "a1".to_string(),
            filename: filename.to_string(),
            mime_type: None,
            size_bytes: 1024,
        });
        message
    }

    #[test]
    fn body_mentions_never_trigger() {
        let prospective = message(
            "Discovery status",
            "If they keep stalling we may need to file a motion to compel.",
        );
        assert!(detect_trigger(&prospective, None).is_none());
        assert!(detect_trigger(&prospective, Some("motion")).is_none());
    }

    #[test]
    fn subject_needs_a_document_or_filing_wording() {
        assert!(detect_trigger(&message("Motion to compel", "Thoughts?"), None).is_none());

        let filed = with_attachment(message("Motion to compel", "Attached."), "Motion.pdf");
        assert_eq!(
            detect_trigger(&filed, Some("motion")).map(|t| t.event),
            Some("motion_filed")
        );

        let by_tag = with_attachment(message("Document for your file", ""), "NOA.pdf");
        assert_eq!(
            detect_trigger(&by_tag, Some("notice_of_appeal")).map(|t| t.event),
            Some("notice_of_appeal_filed")
        );
    }

    #[test]
    fn replies_and_forwards_do_not_trigger() {
        for subject in [
            "RE: Motion to Compel filed",
            "Re[2]: Motion to Compel filed",
            "Fwd: Notice of Appeal filed",
            "AW: Final judgment entered",
        ] {
            let reply = with_attachment(message(subject, "See below."), "Motion.pdf");
            assert!(detect_trigger(&reply, Some("motion")).is_none(), "{subject}");
        }
    }
}
