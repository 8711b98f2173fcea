//! Resolved runtime configuration.
//!
//! Layering: `clerk.toml` settings, then `CLERK_*` environment overrides
//! (a `.env` file is loaded first by the binary), then validation.

pub(crate) mod helpers;
mod intake;

use std::path::PathBuf;

use secrecy::SecretString;

pub use intake::{AuditConfig, IntakeConfig, MatchingConfig, ReminderConfig, RuleConfig};

use crate::config::helpers::{optional_env, parse_csv_env, parse_string_env};
use crate::error::ConfigError;
use crate::settings::Settings;

/// Embedded database location.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

/// Classification model endpoint (OpenAI-compatible chat completions).
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub endpoint: url::Url,
    pub model: String,
    pub api_key: Option<SecretString>,
}

/// Mail spool directories, one per configured source.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub spools: Vec<PathBuf>,
}

/// Reminder delivery.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub webhook_url: Option<url::Url>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub intake: IntakeConfig,
    pub matching: MatchingConfig,
    pub rules: RuleConfig,
    pub reminders: ReminderConfig,
    pub model: ModelConfig,
    pub database: DatabaseConfig,
    pub audit: AuditConfig,
    pub mail: MailConfig,
    pub notify: NotifyConfig,
}

/// Default libSQL path under the platform data directory.
pub fn default_libsql_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("clerk")
        .join("clerk.db")
}

fn parse_url(key: &str, raw: &str) -> Result<url::Url, ConfigError> {
    let parsed = url::Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("invalid URL '{raw}': {e}"),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("unsupported URL scheme '{other}'"),
        }),
    }
}

impl Config {
    pub fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let endpoint = parse_string_env("CLERK_MODEL_ENDPOINT", settings.model.endpoint.clone())?;
        let webhook = optional_env("CLERK_NOTIFY_WEBHOOK")?
            .or_else(|| settings.notify.webhook_url.clone());

        Ok(Self {
            intake: IntakeConfig::resolve(settings)?,
            matching: MatchingConfig::resolve(settings)?,
            rules: RuleConfig::resolve(settings)?,
            reminders: ReminderConfig::resolve(settings)?,
            model: ModelConfig {
                endpoint: parse_url("CLERK_MODEL_ENDPOINT", &endpoint)?,
                model: parse_string_env("CLERK_MODEL", settings.model.model.clone())?,
                api_key: optional_env("CLERK_MODEL_API_KEY")?.map(SecretString::from),
            },
            database: DatabaseConfig {
                path: optional_env("CLERK_DB_PATH")?
                    .or_else(|| settings.database.path.clone())
                    .map(PathBuf::from)
                    .unwrap_or_else(default_libsql_path),
            },
            audit: AuditConfig::resolve(settings)?,
            mail: MailConfig {
                spools: parse_csv_env("CLERK_MAIL_SPOOLS", &settings.mail.spools)?
                    .into_iter()
                    .map(PathBuf::from)
                    .collect(),
            },
            notify: NotifyConfig {
                webhook_url: webhook
                    .map(|raw| parse_url("CLERK_NOTIFY_WEBHOOK", &raw))
                    .transpose()?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ConfigError;
    use crate::settings::Settings;

    #[test]
    fn default_settings_resolve() {
        let config = super::Config::resolve(&Settings::default()).expect("config");
        assert_eq!(config.model.endpoint.scheme(), "http");
        assert!(config.notify.webhook_url.is_none());
        assert_eq!(config.rules.jurisdiction, "us-ut");
    }

    #[test]
    fn non_http_urls_are_rejected() {
        let err = super::parse_url("K", "ftp://example.test/x").expect_err("ftp rejected");
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
