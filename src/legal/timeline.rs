//! Backward schedules from a known future anchor such as a trial date.

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::db::{CreateObligationParams, Database, ObligationSource, ObligationType};
use crate::error::IntakeError;
use crate::legal::cascade::{
    DeadlineCalculator, cascade_group_id, insert_unless_duplicate, load_matter,
};
use crate::legal::dates::{Direction, ServiceType};

#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub date: NaiveDate,
    pub title: String,
    pub obligation_type: ObligationType,
    /// Calendar days from the anchor; negative before it, zero for the anchor.
    pub offset_days: i64,
    pub citation: Option<String>,
    pub rule_id: Option<String>,
    pub was_extended: bool,
    pub reason: Option<String>,
    pub is_anchor: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Timeline {
    pub matter_id: String,
    pub anchor_event: String,
    pub anchor_date: NaiveDate,
    pub entries: Vec<TimelineEntry>,
}

fn anchor_type(event: &str) -> ObligationType {
    match ObligationType::from_label(event) {
        ObligationType::Other => ObligationType::Hearing,
        kind => kind,
    }
}

/// Enumerate every backward rule for `anchor_event` (plus the track-wide
/// ones), sorted chronologically with the anchor itself as the last
/// zero-offset entry.
pub async fn build_timeline(
    db: &dyn Database,
    calculator: &DeadlineCalculator,
    matter_id: &str,
    anchor_event: &str,
    anchor_date: NaiveDate,
    service: ServiceType,
) -> Result<Timeline, IntakeError> {
    let matter = load_matter(db, matter_id).await?;
    let rules = calculator
        .rules()
        .rules_for(matter.track, anchor_event, Direction::Before);

    let mut entries = Vec::with_capacity(rules.len() + 1);
    for rule in rules {
        let due = calculator.apply(rule, anchor_date, service)?;
        entries.push(TimelineEntry {
            date: due.date,
            title: rule.title.clone(),
            obligation_type: rule.obligation_type,
            offset_days: (due.date - anchor_date).num_days(),
            citation: Some(rule.citation.clone()),
            rule_id: Some(rule.id.clone()),
            was_extended: due.was_extended,
            reason: due.reason,
            is_anchor: false,
        });
    }

    entries.push(TimelineEntry {
        date: anchor_date,
        title: anchor_event.replace('_', " "),
        obligation_type: anchor_type(anchor_event),
        offset_days: 0,
        citation: None,
        rule_id: None,
        was_extended: false,
        reason: None,
        is_anchor: true,
    });
    // Stable sort keeps the anchor after any rule landing on the same day.
    entries.sort_by_key(|entry| (entry.date, entry.is_anchor));

    Ok(Timeline {
        matter_id: matter.matter_id,
        anchor_event: anchor_event.to_string(),
        anchor_date,
        entries,
    })
}

/// Write the non-anchor entries as cascaded obligations sharing one group.
/// Returns the group id and how many obligations were new.
pub async fn persist_timeline(
    db: &dyn Database,
    timeline: &Timeline,
    service: ServiceType,
) -> Result<(Uuid, usize), IntakeError> {
    let group_id = cascade_group_id(
        &timeline.matter_id,
        &timeline.anchor_event,
        timeline.anchor_date,
        service,
    );
    let mut created = 0;
    for entry in timeline.entries.iter().filter(|entry| !entry.is_anchor) {
        let inserted = insert_unless_duplicate(
            db,
            CreateObligationParams {
                matter_id: timeline.matter_id.clone(),
                obligation_type: entry.obligation_type,
                title: entry.title.clone(),
                due_date: entry.date,
                due_time: None,
                location: None,
                description: Some(format!(
                    "{} days before {} on {}",
                    -entry.offset_days, timeline.anchor_event, timeline.anchor_date
                )),
                source: ObligationSource::Cascaded,
                cascade_group: Some(group_id),
                trigger_event: Some(timeline.anchor_event.clone()),
                rule_citation: entry.citation.clone(),
                reminder_days: Vec::new(),
                message_id: None,
            },
        )
        .await?;
        if inserted.is_some() {
            created += 1;
        }
    }
    tracing::info!(
        matter = %timeline.matter_id,
        anchor = %timeline.anchor_event,
        created,
        "Timeline persisted"
    );
    Ok((group_id, created))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{build_timeline, persist_timeline};
    use crate::db::{ObligationStore, ProceduralTrack};
    use crate::legal::dates::ServiceType;
    use crate::testing::{seed_matter, test_calculator, test_db};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[tokio::test]
    async fn trial_timeline_is_sorted_with_anchor_last() {
        let (db, _tmp) = test_db().await;
        seed_matter(&db, "doe", "Jane Doe", ProceduralTrack::Civil).await;

        // Trial on Monday 2025-06-02.
        let timeline = build_timeline(
            &db,
            &test_calculator(),
            "doe",
            "trial",
            date(2025, 6, 2),
            ServiceType::Electronic,
        )
        .await
        .expect("timeline");

        let dates: Vec<NaiveDate> = timeline.entries.iter().map(|e| e.date).collect();
        let mut sorted = dates.clone();
        sorted.sort();
        assert_eq!(dates, sorted);

        let anchor = timeline.entries.last().expect("anchor");
        assert!(anchor.is_anchor);
        assert_eq!(anchor.offset_days, 0);
        assert_eq!(anchor.date, date(2025, 6, 2));

        // 28 days before is Monday 2025-05-05; 14 before is Monday 05-19;
        // the track-wide 7-day rule lands on Monday 05-26, Memorial Day, and
        // moves back to Friday 05-23.
        let first = &timeline.entries[0];
        assert_eq!(first.date, date(2025, 5, 5));
        assert_eq!(first.offset_days, -28);
        let prep = timeline
            .entries
            .iter()
            .find(|e| e.title == "Client preparation meeting")
            .expect("track-wide rule");
        assert_eq!(prep.date, date(2025, 5, 23));
        assert!(prep.was_extended);
        assert_eq!(db.count_obligations().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn persisting_twice_writes_once() {
        let (db, _tmp) = test_db().await;
        seed_matter(&db, "doe", "Jane Doe", ProceduralTrack::Civil).await;
        let timeline = build_timeline(
            &db,
            &test_calculator(),
            "doe",
            "trial",
            date(2025, 6, 2),
            ServiceType::Electronic,
        )
        .await
        .expect("timeline");

        let (group, created) = persist_timeline(&db, &timeline, ServiceType::Electronic)
            .await
            .expect("persist");
        assert_eq!(created, timeline.entries.len() - 1);
        let (again, created_again) = persist_timeline(&db, &timeline, ServiceType::Electronic)
            .await
            .expect("persist again");
        assert_eq!(group, again);
        assert_eq!(created_again, 0);
    }
}
