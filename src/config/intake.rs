use std::path::{Component, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;

use crate::config::helpers::{
    optional_env, parse_bool_env, parse_csv_env, parse_num_env, parse_string_env,
};
use crate::error::ConfigError;
use crate::legal::policy::normalize_domain;
use crate::settings::Settings;

const MAX_WAVE_SIZE: usize = 100;

/// Wave orchestration and filing controls.
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    pub wave_size: usize,
    pub wave_time_budget: Duration,
    pub call_timeout: Duration,
    pub internal_domains: Vec<String>,
    pub trusted_sender_domains: Vec<String>,
    pub auto_register_matters: bool,
    pub max_attachment_bytes: u64,
    pub storage_root: String,
    pub lookback_days: i64,
}

/// Name-matching thresholds used by the resolver.
#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub min_last_name_len: usize,
    pub max_edit_distance: usize,
    pub min_fragment_len: usize,
}

/// Jurisdiction and rule-table selection.
#[derive(Debug, Clone)]
pub struct RuleConfig {
    pub jurisdiction: String,
    pub extra_closures: Vec<NaiveDate>,
    pub rule_table_path: Option<PathBuf>,
}

/// Reminder scheduler controls.
#[derive(Debug, Clone)]
pub struct ReminderConfig {
    pub lookahead_days: i64,
    pub long_lead_days: i64,
    pub long_lead_thresholds: Vec<i32>,
    pub short_lead_thresholds: Vec<i32>,
    pub recipients: Vec<String>,
    pub scan_interval: Duration,
}

/// Audit log controls.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub hash_chain: bool,
}

fn normalize_domains(raw: Vec<String>) -> Vec<String> {
    raw.iter()
        .map(|d| normalize_domain(d.trim_start_matches('@')))
        .filter(|d| !d.is_empty())
        .collect()
}

fn validate_wave_size(size: usize) -> Result<usize, ConfigError> {
    if size == 0 || size > MAX_WAVE_SIZE {
        return Err(ConfigError::InvalidValue {
            key: "CLERK_WAVE_SIZE".to_string(),
            message: format!("wave size must be between 1 and {MAX_WAVE_SIZE}"),
        });
    }
    Ok(size)
}

fn validate_thresholds(key: &str, raw: Vec<i32>) -> Result<Vec<i32>, ConfigError> {
    if raw.iter().any(|d| *d < 0) {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "reminder thresholds must not be negative".to_string(),
        });
    }
    let mut out = raw;
    out.sort_unstable_by(|a, b| b.cmp(a));
    out.dedup();
    Ok(out)
}

fn parse_closures(raw: &[String]) -> Result<Vec<NaiveDate>, ConfigError> {
    raw.iter()
        .map(|value| {
            NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|e| {
                ConfigError::InvalidValue {
                    key: "CLERK_EXTRA_CLOSURES".to_string(),
                    message: format!("invalid closure date '{value}': {e}"),
                }
            })
        })
        .collect()
}

fn validate_audit_path(raw: &str) -> Result<PathBuf, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "CLERK_AUDIT_PATH".to_string(),
            message: "audit log path must not be empty".to_string(),
        });
    }

    let raw_path = PathBuf::from(trimmed);
    if raw_path.is_absolute() {
        return Err(ConfigError::InvalidValue {
            key: "CLERK_AUDIT_PATH".to_string(),
            message: "audit log path must be relative to the working directory".to_string(),
        });
    }

    let mut normalized = PathBuf::new();
    for component in raw_path.components() {
        match component {
            Component::Normal(segment) => normalized.push(segment),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(ConfigError::InvalidValue {
                    key: "CLERK_AUDIT_PATH".to_string(),
                    message: "audit log path must not contain '..' components".to_string(),
                });
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ConfigError::InvalidValue {
                    key: "CLERK_AUDIT_PATH".to_string(),
                    message: "audit log path must be relative to the working directory"
                        .to_string(),
                });
            }
        }
    }

    if normalized.components().count() < 2 || !normalized.starts_with("logs") {
        return Err(ConfigError::InvalidValue {
            key: "CLERK_AUDIT_PATH".to_string(),
            message: "audit log path must be under 'logs/' and include a filename".to_string(),
        });
    }

    Ok(normalized)
}

fn validate_storage_root(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "CLERK_STORAGE_ROOT".to_string(),
            message: "storage root must not be empty".to_string(),
        });
    }

    // Parse BEFORE stripping any leading slash so is_absolute() works correctly.
    let raw_path = PathBuf::from(trimmed);
    if raw_path.is_absolute() {
        return Err(ConfigError::InvalidValue {
            key: "CLERK_STORAGE_ROOT".to_string(),
            message: "storage root must be relative to the working directory".to_string(),
        });
    }

    let mut normalized = PathBuf::new();
    for component in raw_path.components() {
        match component {
            Component::Normal(segment) => normalized.push(segment),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(ConfigError::InvalidValue {
                    key: "CLERK_STORAGE_ROOT".to_string(),
                    message: "storage root must not contain '..' components".to_string(),
                });
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ConfigError::InvalidValue {
                    key: "CLERK_STORAGE_ROOT".to_string(),
                    message: "storage root must be relative to the working directory".to_string(),
                });
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "CLERK_STORAGE_ROOT".to_string(),
            message: "storage root must not be empty".to_string(),
        });
    }

    normalized
        .to_str()
        .ok_or_else(|| ConfigError::InvalidValue {
            key: "CLERK_STORAGE_ROOT".to_string(),
            message: "storage root contains non-UTF-8 characters".to_string(),
        })
        .map(|s| s.to_string())
}

impl IntakeConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let intake = &settings.intake;
        Ok(Self {
            wave_size: validate_wave_size(parse_num_env("CLERK_WAVE_SIZE", intake.wave_size)?)?,
            wave_time_budget: Duration::from_secs(parse_num_env(
                "CLERK_WAVE_TIME_BUDGET_SECS",
                intake.wave_time_budget_secs,
            )?),
            call_timeout: Duration::from_secs(
                parse_num_env("CLERK_CALL_TIMEOUT_SECS", intake.call_timeout_secs)?.max(1),
            ),
            internal_domains: normalize_domains(parse_csv_env(
                "CLERK_INTERNAL_DOMAINS",
                &intake.internal_domains,
            )?),
            trusted_sender_domains: normalize_domains(parse_csv_env(
                "CLERK_TRUSTED_SENDER_DOMAINS",
                &intake.trusted_sender_domains,
            )?),
            auto_register_matters: parse_bool_env(
                "CLERK_AUTO_REGISTER_MATTERS",
                intake.auto_register_matters,
            )?,
            max_attachment_bytes: parse_num_env(
                "CLERK_MAX_ATTACHMENT_BYTES",
                intake.max_attachment_bytes,
            )?,
            storage_root: {
                let raw = parse_string_env("CLERK_STORAGE_ROOT", intake.storage_root.clone())?;
                validate_storage_root(&raw)?
            },
            lookback_days: parse_num_env("CLERK_LOOKBACK_DAYS", intake.lookback_days)?.max(0),
        })
    }
}

impl MatchingConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let matching = &settings.matching;
        Ok(Self {
            min_last_name_len: parse_num_env(
                "CLERK_MIN_LAST_NAME_LEN",
                matching.min_last_name_len,
            )?,
            max_edit_distance: parse_num_env(
                "CLERK_MAX_EDIT_DISTANCE",
                matching.max_edit_distance,
            )?,
            min_fragment_len: parse_num_env("CLERK_MIN_FRAGMENT_LEN", matching.min_fragment_len)?,
        })
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            min_last_name_len: 5,
            max_edit_distance: 2,
            min_fragment_len: 4,
        }
    }
}

impl RuleConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let closures = parse_csv_env("CLERK_EXTRA_CLOSURES", &settings.rules.extra_closures)?;
        Ok(Self {
            jurisdiction: parse_string_env(
                "CLERK_JURISDICTION",
                settings.rules.jurisdiction.clone(),
            )?
            .to_ascii_lowercase(),
            extra_closures: parse_closures(&closures)?,
            rule_table_path: optional_env("CLERK_RULE_TABLE")?
                .or_else(|| settings.rules.rule_table_path.clone())
                .map(PathBuf::from),
        })
    }
}

impl ReminderConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let reminders = &settings.reminders;
        Ok(Self {
            lookahead_days: parse_num_env("CLERK_REMINDER_LOOKAHEAD_DAYS", reminders.lookahead_days)?
                .max(0),
            long_lead_days: parse_num_env("CLERK_REMINDER_LONG_LEAD_DAYS", reminders.long_lead_days)?,
            long_lead_thresholds: validate_thresholds(
                "CLERK_REMINDER_LONG_LEAD_THRESHOLDS",
                reminders.long_lead_thresholds.clone(),
            )?,
            short_lead_thresholds: validate_thresholds(
                "CLERK_REMINDER_SHORT_LEAD_THRESHOLDS",
                reminders.short_lead_thresholds.clone(),
            )?,
            recipients: parse_csv_env("CLERK_REMINDER_RECIPIENTS", &reminders.recipients)?,
            scan_interval: Duration::from_secs(
                parse_num_env("CLERK_REMINDER_SCAN_INTERVAL_SECS", reminders.scan_interval_secs)?
                    .max(60),
            ),
        })
    }
}

impl AuditConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            enabled: parse_bool_env("CLERK_AUDIT_ENABLED", settings.audit.enabled)?,
            path: {
                let raw = parse_string_env("CLERK_AUDIT_PATH", settings.audit.path.clone())?;
                validate_audit_path(&raw)?
            },
            hash_chain: parse_bool_env("CLERK_AUDIT_HASH_CHAIN", settings.audit.hash_chain)?,
        })
    }
}
