pub const BASE_MIGRATION: &str = r#"
CREATE TABLE IF NOT EXISTS schema_versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    content_json TEXT NOT NULL,
    commit_ref TEXT,
    created_at TEXT NOT NULL,
    UNIQUE (source_id, content_hash)
);
CREATE INDEX IF NOT EXISTS idx_versions_project
    ON schema_versions(project_id, id DESC);

CREATE TABLE IF NOT EXISTS sources (
    source_id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    current_version_id INTEGER REFERENCES schema_versions(id),
    health TEXT NOT NULL DEFAULT 'healthy',
    last_error TEXT,
    last_error_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_sources_project
    ON sources(project_id);

CREATE TABLE IF NOT EXISTS projects (
    project_id TEXT PRIMARY KEY,
    health TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS change_analyses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    old_version_id INTEGER,
    new_version_id INTEGER,
    overall_severity TEXT NOT NULL,
    breaking_count INTEGER NOT NULL,
    analysis_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_analyses_source
    ON change_analyses(source_id, id DESC);

CREATE TABLE IF NOT EXISTS alert_channels (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id TEXT NOT NULL,
    channel_key TEXT,
    channel_json TEXT NOT NULL,
    is_active INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_channels_project
    ON alert_channels(project_id);

CREATE TABLE IF NOT EXISTS alert_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id TEXT NOT NULL,
    analysis_id INTEGER NOT NULL,
    outcome_json TEXT NOT NULL,
    success INTEGER NOT NULL,
    sent_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alert_history_project
    ON alert_history(project_id, id DESC);
"#;

// Applied after older databases have had `channel_key` added and backfilled.
pub const CHANNEL_KEY_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_channels_key
    ON alert_channels(project_id, channel_key);
"#;
