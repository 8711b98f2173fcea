//! Error types for the intake pipeline.

use std::time::Duration;

use chrono::NaiveDate;
use uuid::Uuid;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("I/O error reading configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Database errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Write conflict: {0}")]
    Conflict(String),
}

#[cfg(feature = "libsql")]
impl From<libsql::Error> for DatabaseError {
    fn from(e: libsql::Error) -> Self {
        DatabaseError::Query(e.to_string())
    }
}

/// Failures talking to an external collaborator (mail, storage, calendar,
/// model, notification).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} unavailable: {reason}")]
    Unavailable { provider: String, reason: String },

    #[error("{provider} timed out after {secs}s")]
    Timeout { provider: String, secs: u64 },

    #[error("{provider} returned an invalid response: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

impl ProviderError {
    pub fn unavailable(provider: &str, reason: impl ToString) -> Self {
        Self::Unavailable {
            provider: provider.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid(provider: &str, reason: impl ToString) -> Self {
        Self::InvalidResponse {
            provider: provider.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Date engine failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DateError {
    #[error("no business day found within {steps} days of {from}")]
    NoBusinessDay { from: NaiveDate, steps: u32 },

    #[error("date arithmetic overflow from {from} by {days} days")]
    Overflow { from: NaiveDate, days: u64 },
}

/// Top-level pipeline error.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Date error: {0}")]
    Date(#[from] DateError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("no rule for trigger '{event}' on the {track} track")]
    RuleNotFound { track: String, event: String },

    #[error("matter not found: {0}")]
    MatterNotFound(String),

    #[error("batch not found: {0}")]
    BatchNotFound(Uuid),

    #[error("batch {batch_id}: wave {requested} requested but wave {expected} is next")]
    WaveOutOfOrder {
        batch_id: Uuid,
        expected: u32,
        requested: u32,
    },

    #[error("batch {0} was rewritten by another wave")]
    StaleWaveState(Uuid),

    #[error("invalid rule table: {0}")]
    RuleTable(String),
}

/// Wrap a collaborator future with its per-call timeout.
pub async fn with_timeout<T, F>(provider: &str, limit: Duration, fut: F) -> Result<T, ProviderError>
where
    F: std::future::Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout {
            provider: provider.to_string(),
            secs: limit.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ProviderError, with_timeout};

    #[tokio::test]
    async fn elapsed_calls_become_timeouts() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, ProviderError>(1)
        };
        let err = with_timeout("model", Duration::from_millis(10), slow)
            .await
            .expect_err("should time out");
        assert!(matches!(err, ProviderError::Timeout { ref provider, .. } if provider == "model"));

        let fast = async { Ok::<_, ProviderError>(7) };
        assert_eq!(
            with_timeout("model", Duration::from_secs(1), fast)
                .await
                .expect("in time"),
            7
        );
    }
}
