//! On-disk settings (`clerk.toml`).
//!
//! Settings are the persisted layer only. Environment overrides and
//! validation happen in [`crate::config`], which turns these into the
//! resolved config structs the pipeline consumes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_SETTINGS_FILE: &str = "clerk.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub intake: IntakeSettings,
    pub matching: MatchingSettings,
    pub rules: RuleSettings,
    pub reminders: ReminderSettings,
    pub model: ModelSettings,
    pub database: DatabaseSettings,
    pub audit: AuditSettings,
    pub mail: MailSettings,
    pub notify: NotifySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeSettings {
    pub wave_size: usize,
    pub wave_time_budget_secs: u64,
    pub call_timeout_secs: u64,
    pub internal_domains: Vec<String>,
    pub trusted_sender_domains: Vec<String>,
    pub auto_register_matters: bool,
    pub max_attachment_bytes: u64,
    pub storage_root: String,
    pub lookback_days: i64,
}

impl Default for IntakeSettings {
    fn default() -> Self {
        Self {
            wave_size: 5,
            wave_time_budget_secs: 240,
            call_timeout_secs: 30,
            internal_domains: Vec::new(),
            trusted_sender_domains: Vec::new(),
            auto_register_matters: true,
            max_attachment_bytes: 25 * 1024 * 1024,
            storage_root: "matters".to_string(),
            lookback_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingSettings {
    pub min_last_name_len: usize,
    pub max_edit_distance: usize,
    pub min_fragment_len: usize,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            min_last_name_len: 5,
            max_edit_distance: 2,
            min_fragment_len: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSettings {
    pub jurisdiction: String,
    pub extra_closures: Vec<String>,
    pub rule_table_path: Option<String>,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            jurisdiction: "us-ut".to_string(),
            extra_closures: Vec::new(),
            rule_table_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderSettings {
    pub lookahead_days: i64,
    pub long_lead_days: i64,
    pub long_lead_thresholds: Vec<i32>,
    pub short_lead_thresholds: Vec<i32>,
    pub recipients: Vec<String>,
    pub scan_interval_secs: u64,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            lookahead_days: 30,
            long_lead_days: 30,
            long_lead_thresholds: vec![30, 14, 7, 3, 1],
            short_lead_thresholds: vec![7, 3, 1],
            recipients: Vec::new(),
            scan_interval_secs: 6 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub endpoint: String,
    pub model: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:11434/v1/chat/completions".to_string(),
            model: "llama3.1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    pub enabled: bool,
    pub path: String,
    pub hash_chain: bool,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "logs/intake_audit.jsonl".to_string(),
            hash_chain: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MailSettings {
    pub spools: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifySettings {
    pub webhook_url: Option<String>,
}

impl Settings {
    /// Load settings from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::Settings;

    #[test]
    fn partial_toml_keeps_defaults_for_missing_sections() {
        let settings = Settings::from_toml(
            r#"
            [intake]
            wave_size = 8
            internal_domains = ["firm.test"]

            [matching]
            min_last_name_len = 6
            "#,
        )
        .expect("settings parse");

        assert_eq!(settings.intake.wave_size, 8);
        assert_eq!(settings.intake.call_timeout_secs, 30);
        assert_eq!(settings.matching.min_last_name_len, 6);
        assert_eq!(settings.matching.max_edit_distance, 2);
        assert_eq!(settings.rules.jurisdiction, "us-ut");
        assert_eq!(settings.reminders.short_lead_thresholds, vec![7, 3, 1]);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings::load(&dir.path().join("absent.toml")).expect("defaults");
        assert_eq!(settings.intake.wave_size, 5);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = Settings::from_toml("[intake\nwave_size = ").expect_err("must fail");
        assert!(matches!(err, crate::error::ConfigError::ParseError(_)));
    }
}
