//! Append-only JSONL audit trail for registry-mutating intake events.
//!
//! Each line carries a snapshot of the running intake counters and, when
//! hash chaining is on, the SHA-256 of the previous line so tampering with
//! history is detectable.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::sync::{Mutex, OnceLock};

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::AuditConfig;

/// Event kinds written to the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEventKind {
    SenderMappingLearned,
    MatterProvisionallyRegistered,
    MessageUnmatched,
    WaveCompleted,
    BatchCompleted,
    ReminderDispatched,
}

impl AuditEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SenderMappingLearned => "sender_mapping_learned",
            Self::MatterProvisionallyRegistered => "matter_provisionally_registered",
            Self::MessageUnmatched => "message_unmatched",
            Self::WaveCompleted => "wave_completed",
            Self::BatchCompleted => "batch_completed",
            Self::ReminderDispatched => "reminder_dispatched",
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
struct IntakeCounters {
    mappings_learned: u64,
    provisional_matters: u64,
    unmatched_messages: u64,
    reminders_dispatched: u64,
}

impl IntakeCounters {
    fn observe(&mut self, kind: AuditEventKind) {
        match kind {
            AuditEventKind::SenderMappingLearned => self.mappings_learned += 1,
            AuditEventKind::MatterProvisionallyRegistered => self.provisional_matters += 1,
            AuditEventKind::MessageUnmatched => self.unmatched_messages += 1,
            AuditEventKind::ReminderDispatched => self.reminders_dispatched += 1,
            AuditEventKind::WaveCompleted | AuditEventKind::BatchCompleted => {}
        }
    }
}

#[derive(Debug, Serialize)]
struct AuditLine<'a> {
    ts: String,
    event_type: &'a str,
    details: serde_json::Value,
    counters: IntakeCounters,
    #[serde(skip_serializing_if = "Option::is_none")]
    prev_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
}

struct AuditLog {
    path: PathBuf,
    hash_chain: bool,
    // Last hash and counters live under one lock so a line's snapshot is
    // consistent with its position in the chain.
    state: Mutex<(Option<String>, IntakeCounters)>,
}

impl AuditLog {
    fn new(path: PathBuf, hash_chain: bool) -> Self {
        Self {
            path,
            hash_chain,
            state: Mutex::new((None, IntakeCounters::default())),
        }
    }

    fn write(&self, kind: AuditEventKind, details: serde_json::Value) {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Intake audit state lock poisoned: {}", e);
                return;
            }
        };
        state.1.observe(kind);

        let mut line = AuditLine {
            ts: Utc::now().to_rfc3339(),
            event_type: kind.as_str(),
            details,
            counters: state.1.clone(),
            prev_hash: state.0.clone(),
            hash: None,
        };

        if self.hash_chain {
            let to_hash = match serde_json::to_string(&line) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("Failed to serialize audit event for hashing: {}", e);
                    return;
                }
            };
            let hash = format!("{:x}", Sha256::digest(to_hash.as_bytes()));
            line.hash = Some(hash.clone());
            state.0 = Some(hash);
        }

        let encoded = match serde_json::to_string(&line) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Failed to serialize intake audit event: {}", e);
                return;
            }
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            tracing::warn!("Failed to create audit log dir {:?}: {}", parent, e);
            return;
        }

        // Owner read/write only; refuse to append to a file someone widened.
        let mut open_opts = OpenOptions::new();
        open_opts.create(true).append(true);
        #[cfg(unix)]
        open_opts.mode(0o600);
        match open_opts.open(&self.path) {
            Ok(mut f) => {
                #[cfg(unix)]
                {
                    let mode = match f.metadata() {
                        Ok(meta) => meta.permissions().mode() & 0o777,
                        Err(e) => {
                            tracing::warn!(
                                "Failed to read permissions for audit log {:?}: {}",
                                self.path,
                                e
                            );
                            return;
                        }
                    };
                    if mode != 0o600 {
                        tracing::warn!(
                            "Refusing to write audit event; insecure mode {:o} on {:?} (expected 600)",
                            mode,
                            self.path
                        );
                        return;
                    }
                }
                if let Err(e) = writeln!(f, "{encoded}") {
                    tracing::warn!("Failed to append audit event: {}", e);
                }
            }
            Err(e) => {
                tracing::warn!("Failed to open audit log {:?}: {}", self.path, e);
            }
        }
    }
}

static LOG: OnceLock<AuditLog> = OnceLock::new();
#[cfg(test)]
static TEST_EVENTS: OnceLock<Mutex<Vec<TestAuditEvent>>> = OnceLock::new();

#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct TestAuditEvent {
    pub kind: AuditEventKind,
    pub details: serde_json::Value,
}

/// Install the process-wide audit log. A disabled config leaves auditing off.
pub fn init(config: &AuditConfig) {
    if !config.enabled {
        return;
    }
    let _ = LOG.set(AuditLog::new(config.path.clone(), config.hash_chain));
}

pub fn record(kind: AuditEventKind, details: serde_json::Value) {
    #[cfg(test)]
    push_test_event(kind, &details);
    if let Some(log) = LOG.get() {
        log.write(kind, details);
    }
}

pub fn enabled() -> bool {
    LOG.get().is_some()
}

#[cfg(test)]
fn push_test_event(kind: AuditEventKind, details: &serde_json::Value) {
    let events = TEST_EVENTS.get_or_init(|| Mutex::new(Vec::new()));
    if let Ok(mut lock) = events.lock() {
        lock.push(TestAuditEvent {
            kind,
            details: details.clone(),
        });
    }
}

/// Events recorded so far in this test process. Tests run in parallel, so
/// callers filter on a detail unique to their own fixture.
#[cfg(test)]
pub(crate) fn test_events_snapshot() -> Vec<TestAuditEvent> {
    TEST_EVENTS
        .get()
        .and_then(|events| events.lock().ok().map(|lock| lock.clone()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::Value;

    use super::{AuditEventKind, AuditLog, record, test_events_snapshot};

    #[test]
    fn hash_chain_links_consecutive_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::new(path.clone(), true);

        log.write(
            AuditEventKind::SenderMappingLearned,
            serde_json::json!({"sender": "a@b.test"}),
        );
        log.write(
            AuditEventKind::MessageUnmatched,
            serde_json::json!({"external_id": "m-2"}),
        );

        let raw = fs::read_to_string(path).expect("read audit log");
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0]).expect("first line json");
        let second: Value = serde_json::from_str(lines[1]).expect("second line json");

        let first_hash = first
            .get("hash")
            .and_then(|v| v.as_str())
            .expect("first hash")
            .to_string();
        assert!(first.get("prev_hash").is_none());
        assert_eq!(
            second.get("prev_hash").and_then(|v| v.as_str()),
            Some(first_hash.as_str())
        );
        assert_eq!(second["counters"]["mappings_learned"], 1);
        assert_eq!(second["counters"]["unmatched_messages"], 1);
    }

    #[cfg(unix)]
    #[test]
    fn refuses_existing_file_with_wide_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("audit.jsonl");
        fs::write(&path, "existing\n").expect("seed existing file");
        fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))
            .expect("set permissive mode");

        let log = AuditLog::new(path.clone(), false);
        log.write(AuditEventKind::WaveCompleted, serde_json::json!({}));

        assert_eq!(fs::read_to_string(&path).expect("read"), "existing\n");
    }

    #[cfg(unix)]
    #[test]
    fn new_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs").join("audit.jsonl");
        let log = AuditLog::new(path.clone(), false);

        log.write(AuditEventKind::BatchCompleted, serde_json::json!({}));

        let mode = fs::metadata(&path).expect("metadata").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn record_is_captured_without_a_configured_log() {
        record(
            AuditEventKind::ReminderDispatched,
            serde_json::json!({"obligation_id": "audit-capture-test"}),
        );
        let events = test_events_snapshot();
        assert!(events.iter().any(|event| {
            event.kind == AuditEventKind::ReminderDispatched
                && event.details["obligation_id"] == "audit-capture-test"
        }));
    }
}
