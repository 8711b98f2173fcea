//! Expand one trigger event into every deadline it sets running.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::db::{
    CreateObligationParams, Database, MatterRecord, ObligationRecord, ObligationSource,
    obligations_equivalent, obligations_same_family,
};
use crate::error::{DateError, IntakeError};
use crate::legal::dates::{Direction, DueDate, ServiceType, compute_due_date};
use crate::legal::holidays::HolidayCalendar;
use crate::legal::rules::{CourtRule, RuleTable};

/// Rule table plus the holiday calendar it is evaluated against.
#[derive(Clone)]
pub struct DeadlineCalculator {
    rules: Arc<RuleTable>,
    holidays: Arc<dyn HolidayCalendar>,
}

impl DeadlineCalculator {
    pub fn new(rules: Arc<RuleTable>, holidays: Arc<dyn HolidayCalendar>) -> Self {
        Self { rules, holidays }
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn holidays(&self) -> &dyn HolidayCalendar {
        self.holidays.as_ref()
    }

    pub fn apply(
        &self,
        rule: &CourtRule,
        trigger: NaiveDate,
        service: ServiceType,
    ) -> Result<DueDate, DateError> {
        compute_due_date(
            trigger,
            rule.days,
            rule.direction,
            service,
            rule.mail_offset_days,
            self.holidays.as_ref(),
        )
    }
}

/// Deterministic group id so a replayed trigger maps onto the same group.
pub fn cascade_group_id(matter_id: &str, event: &str, trigger: NaiveDate, service: ServiceType) -> Uuid {
    let key = format!("{matter_id}|{event}|{trigger}|{}", service.as_str());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes())
}

#[derive(Debug, Clone)]
pub struct CascadeRequest<'a> {
    pub matter_id: &'a str,
    pub event: &'a str,
    pub trigger_date: NaiveDate,
    pub service: ServiceType,
    /// Message that reported the trigger, if any.
    pub message_id: Option<&'a str>,
}

/// One computed deadline and whether it was inserted.
#[derive(Debug, Clone, Serialize)]
pub struct CascadedDeadline {
    pub rule_id: String,
    pub citation: String,
    pub due: DueDate,
    pub obligation: Option<ObligationRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CascadeOutcome {
    pub group_id: Uuid,
    pub deadlines: Vec<CascadedDeadline>,
}

impl CascadeOutcome {
    pub fn created(&self) -> impl Iterator<Item = &ObligationRecord> {
        self.deadlines.iter().filter_map(|d| d.obligation.as_ref())
    }

    pub fn created_count(&self) -> usize {
        self.created().count()
    }
}

pub(crate) async fn load_matter(
    db: &dyn Database,
    matter_id: &str,
) -> Result<MatterRecord, IntakeError> {
    db.get_matter(matter_id)
        .await?
        .ok_or_else(|| IntakeError::MatterNotFound(matter_id.to_string()))
}

/// Whether `existing` already covers `input` on the same date.
///
/// Siblings from the same cascade group must match by type or title; any
/// other row (extracted, another trigger) blocks the whole type family.
fn already_docketed(existing: &ObligationRecord, input: &CreateObligationParams) -> bool {
    if obligations_equivalent(existing, input.obligation_type, &input.title) {
        return true;
    }
    let sibling = input.cascade_group.is_some() && existing.cascade_group == input.cascade_group;
    !sibling && obligations_same_family(existing, input.obligation_type, &input.title)
}

/// Insert `input` unless the matter already has it docketed on that date.
/// Completed and cancelled rows count, so a replay never resurrects them.
pub(crate) async fn insert_unless_duplicate(
    db: &dyn Database,
    input: CreateObligationParams,
) -> Result<Option<ObligationRecord>, IntakeError> {
    let existing = db.list_obligations_on(&input.matter_id, input.due_date).await?;
    if let Some(found) = existing.iter().find(|record| already_docketed(record, &input)) {
        tracing::debug!(
            matter = %input.matter_id,
            due = %input.due_date,
            obligation_type = input.obligation_type.as_str(),
            existing = %found.id,
            status = found.status.as_str(),
            "Obligation already docketed"
        );
        return Ok(None);
    }
    Ok(Some(db.create_obligation(&input).await?))
}

/// Compute and persist every deadline `request.event` sets running on the
/// matter's track.
///
/// Returns [`IntakeError::RuleNotFound`] when the track has no rule for the
/// event; nothing is written in that case.
pub async fn cascade(
    db: &dyn Database,
    calculator: &DeadlineCalculator,
    request: &CascadeRequest<'_>,
) -> Result<CascadeOutcome, IntakeError> {
    let matter = load_matter(db, request.matter_id).await?;
    let rules = calculator
        .rules()
        .rules_for(matter.track, request.event, Direction::After);
    if rules.is_empty() {
        return Err(IntakeError::RuleNotFound {
            track: matter.track.as_str().to_string(),
            event: request.event.to_string(),
        });
    }

    let group_id = cascade_group_id(
        &matter.matter_id,
        request.event,
        request.trigger_date,
        request.service,
    );

    // Compute everything before writing so a date error leaves no partial cascade.
    let mut computed = Vec::with_capacity(rules.len());
    for rule in rules {
        computed.push((rule, calculator.apply(rule, request.trigger_date, request.service)?));
    }

    let mut deadlines = Vec::with_capacity(computed.len());
    for (rule, due) in computed {
        let description = match &due.reason {
            Some(reason) => format!(
                "{} days {} {} ({}); {}",
                rule.days,
                rule.direction.as_str(),
                request.event,
                request.service.as_str(),
                reason
            ),
            None => format!(
                "{} days {} {} ({})",
                rule.days,
                rule.direction.as_str(),
                request.event,
                request.service.as_str()
            ),
        };
        let obligation = insert_unless_duplicate(
            db,
            CreateObligationParams {
                matter_id: matter.matter_id.clone(),
                obligation_type: rule.obligation_type,
                title: rule.title.clone(),
                due_date: due.date,
                due_time: None,
                location: None,
                description: Some(description),
                source: ObligationSource::Cascaded,
                cascade_group: Some(group_id),
                trigger_event: Some(request.event.to_string()),
                rule_citation: Some(rule.citation.clone()),
                reminder_days: rule.reminder_days.clone(),
                message_id: request.message_id.map(str::to_string),
            },
        )
        .await?;
        deadlines.push(CascadedDeadline {
            rule_id: rule.id.clone(),
            citation: rule.citation.clone(),
            due,
            obligation,
        });
    }

    let outcome = CascadeOutcome {
        group_id,
        deadlines,
    };
    tracing::info!(
        matter = %matter.matter_id,
        event = request.event,
        trigger = %request.trigger_date,
        created = outcome.created_count(),
        computed = outcome.deadlines.len(),
        "Cascade generated"
    );
    Ok(outcome)
}
