//! libSQL schema. Every statement is idempotent so migrations run on each start.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS matters (
    matter_id TEXT PRIMARY KEY,
    client_name TEXT NOT NULL,
    client_name_normalized TEXT NOT NULL,
    track TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    case_number TEXT,
    case_number_normalized TEXT,
    counterpart_name TEXT,
    counterpart_emails TEXT NOT NULL DEFAULT '[]',
    forum TEXT,
    storage_root TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_matters_case_number
    ON matters (case_number_normalized);

CREATE TABLE IF NOT EXISTS sender_mappings (
    sender_email TEXT PRIMARY KEY,
    matter_id TEXT NOT NULL REFERENCES matters (matter_id),
    learned_via TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS processed_messages (
    external_id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    matter_id TEXT,
    method TEXT NOT NULL,
    confidence TEXT NOT NULL,
    attachments_filed INTEGER NOT NULL DEFAULT 0,
    obligations_extracted INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    error TEXT,
    processed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_processed_messages_status
    ON processed_messages (status, processed_at);

CREATE TABLE IF NOT EXISTS obligations (
    id TEXT PRIMARY KEY,
    matter_id TEXT NOT NULL,
    obligation_type TEXT NOT NULL,
    title TEXT NOT NULL,
    due_date TEXT NOT NULL,
    due_time TEXT,
    location TEXT,
    description TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    source TEXT NOT NULL,
    cascade_group TEXT,
    trigger_event TEXT,
    rule_citation TEXT,
    reminder_days TEXT NOT NULL DEFAULT '[]',
    message_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_obligations_matter_date
    ON obligations (matter_id, due_date);

CREATE INDEX IF NOT EXISTS idx_obligations_status_date
    ON obligations (status, due_date);

CREATE INDEX IF NOT EXISTS idx_obligations_cascade_group
    ON obligations (cascade_group);

CREATE TABLE IF NOT EXISTS reminders_sent (
    obligation_id TEXT NOT NULL,
    threshold_days INTEGER NOT NULL,
    sent_at TEXT NOT NULL,
    PRIMARY KEY (obligation_id, threshold_days)
);

CREATE TABLE IF NOT EXISTS filed_documents (
    id TEXT PRIMARY KEY,
    matter_id TEXT NOT NULL,
    filename TEXT NOT NULL,
    category TEXT NOT NULL,
    destination TEXT NOT NULL,
    message_id TEXT,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    filed_at TEXT NOT NULL,
    UNIQUE (matter_id, filename, category)
);

CREATE TABLE IF NOT EXISTS pending_filings (
    external_id TEXT PRIMARY KEY,
    matter_id TEXT NOT NULL,
    document_type TEXT,
    message TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS wave_batches (
    batch_id TEXT PRIMARY KEY,
    queue TEXT NOT NULL,
    waves_completed INTEGER NOT NULL DEFAULT 0,
    total INTEGER NOT NULL,
    done INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS intake_checkpoints (
    source TEXT PRIMARY KEY,
    last_seen_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;
