//! Court rule table: which deadlines a trigger event sets running.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use serde::Deserialize;

use crate::db::{ObligationType, ProceduralTrack};
use crate::error::IntakeError;
use crate::legal::dates::Direction;

/// Trigger value matching every backward anchor on a track.
pub const ANY_EVENT: &str = "any";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourtRule {
    pub id: String,
    pub track: ProceduralTrack,
    pub trigger_event: String,
    pub citation: String,
    pub obligation_type: ObligationType,
    pub title: String,
    pub days: u32,
    pub direction: Direction,
    pub mail_offset_days: u32,
    pub reminder_days: Vec<i32>,
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    rules: Vec<RawCourtRule>,
}

#[derive(Debug, Deserialize)]
struct RawCourtRule {
    id: String,
    track: String,
    trigger_event: String,
    citation: String,
    obligation_type: String,
    title: String,
    days: u32,
    direction: Direction,
    #[serde(default)]
    mail_offset_days: u32,
    #[serde(default)]
    reminder_days: Vec<i32>,
}

#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<CourtRule>,
}

static BUNDLED_RULES: LazyLock<Result<RuleTable, String>> =
    LazyLock::new(|| RuleTable::parse(include_str!("court_rules.toml")));

impl RuleTable {
    fn parse(raw: &str) -> Result<Self, String> {
        let parsed: RuleFile =
            toml::from_str(raw).map_err(|e| format!("invalid court rules TOML: {}", e))?;
        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(parsed.rules.len());
        for rule in parsed.rules {
            if !seen.insert(rule.id.clone()) {
                return Err(format!("duplicate rule id '{}'", rule.id));
            }
            let track = ProceduralTrack::from_db_value(&rule.track)
                .ok_or_else(|| format!("invalid track '{}' in rule '{}'", rule.track, rule.id))?;
            let obligation_type =
                ObligationType::from_db_value(&rule.obligation_type).ok_or_else(|| {
                    format!(
                        "invalid obligation_type '{}' in rule '{}'",
                        rule.obligation_type, rule.id
                    )
                })?;
            if rule.days == 0 {
                return Err(format!("rule '{}' must count at least one day", rule.id));
            }
            let trigger_event = rule.trigger_event.trim().to_ascii_lowercase();
            if trigger_event == ANY_EVENT && rule.direction == Direction::After {
                return Err(format!(
                    "rule '{}': track-wide rules must count backward",
                    rule.id
                ));
            }
            rules.push(CourtRule {
                id: rule.id,
                track,
                trigger_event,
                citation: rule.citation,
                obligation_type,
                title: rule.title,
                days: rule.days,
                direction: rule.direction,
                mail_offset_days: rule.mail_offset_days,
                reminder_days: rule.reminder_days,
            });
        }
        Ok(Self { rules })
    }

    pub fn from_toml(raw: &str) -> Result<Self, IntakeError> {
        Self::parse(raw).map_err(IntakeError::RuleTable)
    }

    /// Rules shipped with the binary.
    pub fn bundled() -> Result<&'static RuleTable, IntakeError> {
        match &*BUNDLED_RULES {
            Ok(table) => Ok(table),
            Err(err) => Err(IntakeError::RuleTable(err.clone())),
        }
    }

    /// The configured rule file, or the bundled table when none is set.
    pub fn load(path: Option<&Path>) -> Result<Self, IntakeError> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    IntakeError::RuleTable(format!("failed to read {}: {}", path.display(), e))
                })?;
                Self::from_toml(&raw)
            }
            None => Self::bundled().cloned(),
        }
    }

    pub fn rules(&self) -> &[CourtRule] {
        &self.rules
    }

    pub fn get(&self, rule_id: &str) -> Option<&CourtRule> {
        self.rules.iter().find(|rule| rule.id == rule_id)
    }

    /// Rules for `event` on `track` counting in `direction`. Backward lookups
    /// also return the track-wide (`any`) rules.
    pub fn rules_for(
        &self,
        track: ProceduralTrack,
        event: &str,
        direction: Direction,
    ) -> Vec<&CourtRule> {
        let event = event.trim().to_ascii_lowercase();
        self.rules
            .iter()
            .filter(|rule| rule.track == track && rule.direction == direction)
            .filter(|rule| {
                rule.trigger_event == event
                    || (direction == Direction::Before && rule.trigger_event == ANY_EVENT)
            })
            .collect()
    }

    pub fn has_trigger(&self, track: ProceduralTrack, event: &str) -> bool {
        !self.rules_for(track, event, Direction::After).is_empty()
    }
}
