//! Message-to-matter resolution.
//!
//! Tiers run cheapest first and the first confident hit wins:
//! case number, sender address, party name, internal-forward scan, and
//! finally the classification model. Model answers are only candidates and
//! must verify against the registry before they are used.

use serde::Deserialize;
use serde_json::json;

use super::IntakeContext;
use super::matching::{
    case_number_candidates, document_type_hint, embedded_addresses, is_plausible_party_name,
    match_party_name, matters_with_name_fragment, verify_matter_name,
};
use super::message::InboundMessage;
use crate::db::{
    Confidence, MatterRecord, MatterStatus, ProceduralTrack, ResolutionMethod, UpsertMatterParams,
};
use crate::error::{IntakeError, with_timeout};
use crate::legal::audit::{self, AuditEventKind};
use crate::legal::policy::{is_internal_sender, is_trusted_external_sender, sanitize_matter_id};
use crate::providers::model::parse_json_answer;

pub const CLASSIFY_SYSTEM: &str = "You route legal correspondence to the matter it concerns. \
Answer with one JSON object: {\"matter\": <client name from the roster or null>, \
\"document_type\": <short snake_case tag or null>, \"confidence\": \"high\"|\"medium\"|\"low\"|\"none\", \
\"track\": \"civil\"|\"criminal\"|\"appellate\"|null}. Never invent a roster entry; if the message \
concerns a new client, give their full name and confidence.";

const MAX_PROMPT_BODY_CHARS: usize = 4000;

/// Outcome of resolving one message.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub matter: Option<MatterRecord>,
    pub method: ResolutionMethod,
    pub confidence: Confidence,
    pub document_type: Option<String>,
}

impl Resolution {
    fn hit(
        matter: MatterRecord,
        method: ResolutionMethod,
        confidence: Confidence,
        document_type: Option<String>,
    ) -> Self {
        Self {
            matter: Some(matter),
            method,
            confidence,
            document_type,
        }
    }

    fn unresolved(document_type: Option<String>) -> Self {
        Self {
            matter: None,
            method: ResolutionMethod::Unresolved,
            confidence: Confidence::None,
            document_type,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.matter.is_some()
    }
}

#[derive(Debug, Default, Deserialize)]
struct ClassificationAnswer {
    #[serde(default)]
    matter: Option<String>,
    #[serde(default)]
    document_type: Option<String>,
    #[serde(default)]
    confidence: Option<String>,
    #[serde(default)]
    track: Option<String>,
}

fn document_hint(message: &InboundMessage) -> Option<String> {
    document_type_hint(&message.subject)
        .or_else(|| {
            message
                .attachments
                .iter()
                .find_map(|a| document_type_hint(&a.filename.replace(['_', '-', '.'], " ")))
        })
        .or_else(|| document_type_hint(&message.body))
        .map(str::to_string)
}

fn open(matter: Option<MatterRecord>) -> Option<MatterRecord> {
    matter.filter(|m| m.status != MatterStatus::Closed)
}

/// Resolve `message` to a matter.
pub async fn resolve(
    ctx: &IntakeContext,
    message: &InboundMessage,
) -> Result<Resolution, IntakeError> {
    let hint = document_hint(message);
    let text = message.searchable_text();
    let sender = message.sender_address();
    let domain = message.sender_domain();
    let internal = is_internal_sender(domain.as_deref(), &ctx.intake.internal_domains);

    // Tier 1: case numbers. Unknown numbers fall through.
    for number in case_number_candidates(&text) {
        if let Some(matter) = ctx.db.find_matter_by_case_number(&number).await? {
            tracing::debug!(external_id = %message.external_id, case_number = %number, "Resolved by case number");
            return Ok(Resolution::hit(
                matter,
                ResolutionMethod::CaseNumber,
                Confidence::High,
                hint,
            ));
        }
    }

    // Tier 2: learned sender mapping, then known counterpart addresses.
    if let Some(hit) = resolve_address(ctx, &sender).await? {
        tracing::debug!(external_id = %message.external_id, method = hit.1.as_str(), "Resolved by sender address");
        return Ok(Resolution::hit(hit.0, hit.1, hit.2, hint));
    }

    let roster = ctx.db.list_matters().await?;

    // Tier 3: party names in the subject, body and display name.
    let name_text = match &message.sender_name {
        Some(name) => format!("{}\n{}", name, text),
        None => text.clone(),
    };
    if let Some(found) = match_party_name(&name_text, &roster, &ctx.matching) {
        tracing::debug!(
            external_id = %message.external_id,
            matter = %found.matter.matter_id,
            confidence = found.confidence.as_str(),
            "Resolved by party name"
        );
        return Ok(Resolution::hit(
            found.matter.clone(),
            ResolutionMethod::NameMatch,
            found.confidence,
            hint,
        ));
    }

    // Tier 4: a colleague forwarding outside correspondence.
    if internal && message.is_forward() {
        for address in embedded_addresses(&message.body) {
            if address == sender {
                continue;
            }
            let embedded_domain = address.rsplit_once('@').map(|(_, d)| d.to_string());
            if is_internal_sender(embedded_domain.as_deref(), &ctx.intake.internal_domains) {
                continue;
            }
            if let Some((matter, _, _)) = resolve_address(ctx, &address).await? {
                return Ok(Resolution::hit(
                    matter,
                    ResolutionMethod::InternalForward,
                    Confidence::Medium,
                    hint,
                ));
            }
        }
        let fragments = matters_with_name_fragment(&message.body, &roster, &ctx.matching);
        if let [only] = fragments.as_slice() {
            return Ok(Resolution::hit(
                (*only).clone(),
                ResolutionMethod::InternalForward,
                Confidence::Medium,
                hint,
            ));
        }
    }

    // Tier 5: classification model.
    classify(ctx, message, &roster, internal, hint).await
}

async fn resolve_address(
    ctx: &IntakeContext,
    address: &str,
) -> Result<Option<(MatterRecord, ResolutionMethod, Confidence)>, IntakeError> {
    if address.is_empty() {
        return Ok(None);
    }
    if let Some(mapping) = ctx.db.find_sender_mapping(address).await?
        && let Some(matter) = open(ctx.db.get_matter(&mapping.matter_id).await?)
    {
        return Ok(Some((
            matter,
            ResolutionMethod::SenderMapping,
            Confidence::High,
        )));
    }
    let mut counterparts = ctx.db.find_matters_by_counterpart_email(address).await?;
    if counterparts.len() == 1 {
        let matter = counterparts.remove(0);
        return Ok(Some((
            matter,
            ResolutionMethod::CounterpartAddress,
            Confidence::Medium,
        )));
    }
    Ok(None)
}

fn render_roster(roster: &[MatterRecord]) -> String {
    if roster.is_empty() {
        return "(no open matters)".to_string();
    }
    roster
        .iter()
        .map(|m| {
            format!(
                "- {} (id {}, {}{})",
                m.client_name,
                m.matter_id,
                m.track.as_str(),
                m.case_number
                    .as_deref()
                    .map(|n| format!(", case {n}"))
                    .unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_message(message: &InboundMessage) -> String {
    let body: String = message.body.chars().take(MAX_PROMPT_BODY_CHARS).collect();
    let attachments = message
        .attachments
        .iter()
        .map(|a| a.filename.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "From: {} <{}>\nSubject: {}\nAttachments: {}\n\n{}",
        message.sender_name.as_deref().unwrap_or(""),
        message.sender_email,
        message.subject,
        attachments,
        body
    )
}

async fn classify(
    ctx: &IntakeContext,
    message: &InboundMessage,
    roster: &[MatterRecord],
    internal: bool,
    hint: Option<String>,
) -> Result<Resolution, IntakeError> {
    let prompt = format!(
        "Known matters:\n{}\n\nMessage:\n{}",
        render_roster(roster),
        render_message(message)
    );
    let raw = with_timeout(
        "model",
        ctx.intake.call_timeout,
        ctx.model.complete_json(CLASSIFY_SYSTEM, &prompt),
    )
    .await?;

    let Some(answer) = parse_json_answer::<ClassificationAnswer>(&raw) else {
        tracing::warn!(external_id = %message.external_id, "Unparsable classification answer");
        return Ok(Resolution::unresolved(hint));
    };
    let document_type = hint.or(answer
        .document_type
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string));
    let confidence = answer
        .confidence
        .as_deref()
        .and_then(Confidence::from_db_value)
        .unwrap_or(Confidence::None);
    let Some(proposed) = answer
        .matter
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
    else {
        return Ok(Resolution::unresolved(document_type));
    };
    if confidence == Confidence::None {
        return Ok(Resolution::unresolved(document_type));
    }

    let sender = message.sender_address();
    if let Some(verified) = verify_matter_name(proposed, roster, &ctx.matching) {
        if confidence == Confidence::High && !internal {
            learn_sender(ctx, &sender, &verified.matter_id, "model_verified").await;
        }
        tracing::debug!(
            external_id = %message.external_id,
            matter = %verified.matter_id,
            confidence = confidence.as_str(),
            "Resolved by verified classification"
        );
        return Ok(Resolution::hit(
            verified.clone(),
            ResolutionMethod::ModelVerified,
            confidence,
            document_type,
        ));
    }

    let domain = message.sender_domain();
    let may_register = ctx.intake.auto_register_matters
        && confidence == Confidence::High
        && is_trusted_external_sender(
            domain.as_deref(),
            &ctx.intake.internal_domains,
            &ctx.intake.trusted_sender_domains,
        )
        && is_plausible_party_name(proposed);
    if !may_register {
        tracing::debug!(
            external_id = %message.external_id,
            proposed,
            "Discarded unverifiable classification"
        );
        return Ok(Resolution::unresolved(document_type));
    }

    let matter_id = sanitize_matter_id(proposed);
    if matter_id.is_empty() || ctx.db.get_matter(&matter_id).await?.is_some() {
        return Ok(Resolution::unresolved(document_type));
    }
    let track = answer
        .track
        .as_deref()
        .and_then(|t| ProceduralTrack::from_db_value(&t.trim().to_ascii_lowercase()))
        .unwrap_or(ProceduralTrack::Civil);
    let matter = ctx
        .db
        .upsert_matter(&UpsertMatterParams {
            matter_id: matter_id.clone(),
            client_name: proposed.to_string(),
            track,
            status: MatterStatus::Provisional,
            case_number: None,
            counterpart_name: None,
            counterpart_emails: Vec::new(),
            forum: None,
            storage_root: None,
        })
        .await?;
    tracing::info!(
        matter = %matter.matter_id,
        sender = %sender,
        "Provisionally registered matter from trusted sender"
    );
    audit::record(
        AuditEventKind::MatterProvisionallyRegistered,
        json!({
            "matter_id": matter.matter_id,
            "client_name": matter.client_name,
            "track": matter.track.as_str(),
            "sender": sender,
            "external_id": message.external_id,
        }),
    );
    learn_sender(ctx, &sender, &matter.matter_id, "model_provisional").await;

    Ok(Resolution::hit(
        matter,
        ResolutionMethod::ModelProvisional,
        Confidence::Medium,
        document_type,
    ))
}

/// Best-effort: a failed mapping write never fails the message.
async fn learn_sender(ctx: &IntakeContext, sender: &str, matter_id: &str, learned_via: &str) {
    if sender.is_empty() {
        return;
    }
    match ctx
        .db
        .write_sender_mapping(sender, matter_id, learned_via)
        .await
    {
        Ok(true) => {
            tracing::info!(sender, matter = matter_id, "Learned sender mapping");
            audit::record(
                AuditEventKind::SenderMappingLearned,
                json!({
                    "sender": sender,
                    "matter_id": matter_id,
                    "learned_via": learned_via,
                }),
            );
        }
        Ok(false) => {}
        Err(e) => tracing::warn!(sender, error = %e, "Failed to record sender mapping"),
    }
}
