use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::info;

use crate::alert::{AlertChannelConfig, AlertDispatchOutcome};
use crate::error::StoreError;
use crate::store::migrations::{BASE_MIGRATION, CHANNEL_KEY_INDEX};
use crate::store::{AlertRecord, PipelineStore, StoredAnalysis, TransitionWrite, VersionWrite};
use crate::types::{AnalysisResult, HealthState, NewSchemaVersion, SchemaVersion, SourceHealth};

const VERSION_COLUMNS: &str =
    "v.id, v.source_id, v.project_id, v.content_hash, v.content_json, v.commit_ref, v.created_at";

/// Single shared connection. Async callers go through `spawn_blocking`, so the
/// busy timeout never parks a runtime worker.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn migrate(&self) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        conn.execute_batch(BASE_MIGRATION)?;
        backfill_channel_keys(&mut conn)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || work(&store))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    pub fn current_version(&self, source_id: &str) -> Result<Option<SchemaVersion>, StoreError> {
        let conn = self.lock()?;
        current_version(&conn, source_id)
    }

    pub fn latest_for_project(&self, project_id: &str) -> Result<Option<SchemaVersion>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            r#"
SELECT {VERSION_COLUMNS}
FROM sources s
JOIN schema_versions v ON v.id = s.current_version_id
WHERE s.project_id = ?1
ORDER BY v.id DESC
LIMIT 1
"#
        );
        let row = conn
            .query_row(&sql, params![project_id], read_version_row)
            .optional()?;
        row.map(VersionRow::into_version).transpose()
    }

    pub fn write_version(&self, new: NewSchemaVersion) -> Result<VersionWrite, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let previous = current_version(&tx, &new.source_id)?;
        if let Some(current) = &previous {
            if current.content_hash == new.content_hash {
                let current = current.clone();
                tx.commit()?;
                return Ok(VersionWrite::Unchanged(current));
            }
        }

        let (version, reused) = store_version(&tx, new)?;
        tx.commit()?;
        Ok(if reused {
            VersionWrite::Reused { previous, version }
        } else {
            VersionWrite::Created { previous, version }
        })
    }

    pub fn write_transition(
        &self,
        new: NewSchemaVersion,
        expected_previous: Option<i64>,
        analysis: &AnalysisResult,
    ) -> Result<TransitionWrite, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = current_version(&tx, &new.source_id)?;
        if let Some(current) = &current {
            if current.content_hash == new.content_hash {
                return Ok(TransitionWrite::Unchanged(current.clone()));
            }
        }
        if current.as_ref().map(|v| v.id) != expected_previous {
            return Ok(TransitionWrite::Stale(current));
        }

        let (version, reused) = store_version(&tx, new)?;
        let mut analysis = analysis.clone();
        analysis.old_version_id = expected_previous;
        analysis.new_version_id = Some(version.id);
        let analysis_id = insert_analysis(&tx, &version.source_id, &version.project_id, &analysis)?;
        tx.commit()?;
        Ok(TransitionWrite::Committed {
            version,
            reused,
            analysis_id,
        })
    }

    pub fn version_count(&self, source_id: &str) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM schema_versions WHERE source_id = ?1",
            params![source_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn insert_analysis(
        &self,
        source_id: &str,
        project_id: &str,
        analysis: &AnalysisResult,
    ) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        insert_analysis(&conn, source_id, project_id, analysis)
    }

    pub fn load_analyses(&self, source_id: &str) -> Result<Vec<StoredAnalysis>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
SELECT id, source_id, project_id, analysis_json, created_at
FROM change_analyses
WHERE source_id = ?1
ORDER BY id DESC
"#,
        )?;
        let rows = stmt
            .query_map(params![source_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, source_id, project_id, json, created_at)| {
                Ok::<_, StoreError>(StoredAnalysis {
                    id,
                    source_id,
                    project_id,
                    analysis: serde_json::from_str(&json)?,
                    created_at: parse_time(&created_at)?,
                })
            })
            .collect()
    }

    pub fn set_source_health(&self, health: &SourceHealth) -> Result<(), StoreError> {
        let conn = self.lock()?;
        upsert_source_health(&conn, health)
    }

    pub fn fail_source(&self, health: &SourceHealth) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        upsert_source_health(&tx, health)?;
        upsert_project_health(&tx, &health.project_id, HealthState::Error)?;
        tx.commit()?;
        Ok(())
    }

    pub fn recover_source(
        &self,
        source_id: &str,
        project_id: &str,
    ) -> Result<HealthState, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        upsert_source_health(&tx, &SourceHealth::healthy(source_id, project_id))?;
        let errored: i64 = tx.query_row(
            "SELECT COUNT(*) FROM sources WHERE project_id = ?1 AND health = 'error'",
            params![project_id],
            |row| row.get(0),
        )?;
        let state = if errored == 0 {
            HealthState::Healthy
        } else {
            HealthState::Error
        };
        upsert_project_health(&tx, project_id, state)?;
        tx.commit()?;
        Ok(state)
    }

    pub fn load_source_health(&self, source_id: &str) -> Result<Option<SourceHealth>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                r#"
SELECT source_id, project_id, health, last_error, last_error_at
FROM sources
WHERE source_id = ?1
"#,
                params![source_id],
                read_health_row,
            )
            .optional()?;
        row.map(HealthRow::into_health).transpose()
    }

    pub fn load_project_sources(&self, project_id: &str) -> Result<Vec<SourceHealth>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
SELECT source_id, project_id, health, last_error, last_error_at
FROM sources
WHERE project_id = ?1
ORDER BY source_id
"#,
        )?;
        let rows = stmt
            .query_map(params![project_id], read_health_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(HealthRow::into_health).collect()
    }

    pub fn set_project_health(&self, project_id: &str, state: HealthState) -> Result<(), StoreError> {
        let conn = self.lock()?;
        upsert_project_health(&conn, project_id, state)
    }

    pub fn load_project_health(&self, project_id: &str) -> Result<Option<HealthState>, StoreError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT health FROM projects WHERE project_id = ?1",
                params![project_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(raw.map(|raw| HealthState::from_db(&raw)))
    }

    pub fn insert_channel(
        &self,
        project_id: &str,
        channel: &AlertChannelConfig,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
INSERT INTO alert_channels(project_id, channel_key, channel_json, is_active)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(project_id, channel_key) DO UPDATE SET
    channel_json = excluded.channel_json,
    is_active = excluded.is_active
"#,
            params![
                project_id,
                channel.key(),
                serde_json::to_string(channel)?,
                if channel.is_active { 1 } else { 0 }
            ],
        )?;
        Ok(())
    }

    pub fn load_active_channels(
        &self,
        project_id: &str,
    ) -> Result<Vec<AlertChannelConfig>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
SELECT channel_json
FROM alert_channels
WHERE project_id = ?1 AND is_active = 1
ORDER BY id
"#,
        )?;
        let rows = stmt
            .query_map(params![project_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(StoreError::from))
            .collect()
    }

    pub fn insert_alert_outcomes(
        &self,
        project_id: &str,
        analysis_id: i64,
        outcomes: &[AlertDispatchOutcome],
    ) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let sent_at = Utc::now().to_rfc3339();
        for outcome in outcomes {
            tx.execute(
                r#"
INSERT INTO alert_history(project_id, analysis_id, outcome_json, success, sent_at)
VALUES (?1, ?2, ?3, ?4, ?5)
"#,
                params![
                    project_id,
                    analysis_id,
                    serde_json::to_string(outcome)?,
                    if outcome.success { 1 } else { 0 },
                    sent_at
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_alert_history(&self, project_id: &str) -> Result<Vec<AlertRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
SELECT analysis_id, outcome_json, sent_at
FROM alert_history
WHERE project_id = ?1
ORDER BY id
"#,
        )?;
        let rows = stmt
            .query_map(params![project_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(analysis_id, json, sent_at)| {
                Ok::<_, StoreError>(AlertRecord {
                    project_id: project_id.to_string(),
                    analysis_id,
                    outcome: serde_json::from_str(&json)?,
                    sent_at: parse_time(&sent_at)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl PipelineStore for SqliteStore {
    async fn latest_schema_version(
        &self,
        source_id: &str,
    ) -> Result<Option<SchemaVersion>, StoreError> {
        let source_id = source_id.to_string();
        self.blocking(move |store| store.current_version(&source_id))
            .await
    }

    async fn latest_project_schema_version(
        &self,
        project_id: &str,
    ) -> Result<Option<SchemaVersion>, StoreError> {
        let project_id = project_id.to_string();
        self.blocking(move |store| store.latest_for_project(&project_id))
            .await
    }

    async fn create_schema_version(
        &self,
        version: NewSchemaVersion,
    ) -> Result<VersionWrite, StoreError> {
        self.blocking(move |store| store.write_version(version)).await
    }

    async fn commit_transition(
        &self,
        version: NewSchemaVersion,
        expected_previous: Option<i64>,
        analysis: &AnalysisResult,
    ) -> Result<TransitionWrite, StoreError> {
        let analysis = analysis.clone();
        self.blocking(move |store| store.write_transition(version, expected_previous, &analysis))
            .await
    }

    async fn create_change_analysis(
        &self,
        source_id: &str,
        project_id: &str,
        analysis: &AnalysisResult,
    ) -> Result<i64, StoreError> {
        let (source_id, project_id) = (source_id.to_string(), project_id.to_string());
        let analysis = analysis.clone();
        self.blocking(move |store| store.insert_analysis(&source_id, &project_id, &analysis))
            .await
    }

    async fn analyses_for_source(
        &self,
        source_id: &str,
    ) -> Result<Vec<StoredAnalysis>, StoreError> {
        let source_id = source_id.to_string();
        self.blocking(move |store| store.load_analyses(&source_id))
            .await
    }

    async fn update_source_error(
        &self,
        source_id: &str,
        project_id: &str,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let health = SourceHealth::failed(source_id, project_id, message, at);
        self.blocking(move |store| store.fail_source(&health)).await
    }

    async fn clear_source_error(
        &self,
        source_id: &str,
        project_id: &str,
    ) -> Result<HealthState, StoreError> {
        let (source_id, project_id) = (source_id.to_string(), project_id.to_string());
        self.blocking(move |store| store.recover_source(&source_id, &project_id))
            .await
    }

    async fn source_health(&self, source_id: &str) -> Result<Option<SourceHealth>, StoreError> {
        let source_id = source_id.to_string();
        self.blocking(move |store| store.load_source_health(&source_id))
            .await
    }

    async fn project_sources(&self, project_id: &str) -> Result<Vec<SourceHealth>, StoreError> {
        let project_id = project_id.to_string();
        self.blocking(move |store| store.load_project_sources(&project_id))
            .await
    }

    async fn update_project_health(
        &self,
        project_id: &str,
        state: HealthState,
    ) -> Result<(), StoreError> {
        let project_id = project_id.to_string();
        self.blocking(move |store| store.set_project_health(&project_id, state))
            .await
    }

    async fn project_health(&self, project_id: &str) -> Result<Option<HealthState>, StoreError> {
        let project_id = project_id.to_string();
        self.blocking(move |store| store.load_project_health(&project_id))
            .await
    }

    async fn active_channels(
        &self,
        project_id: &str,
    ) -> Result<Vec<AlertChannelConfig>, StoreError> {
        let project_id = project_id.to_string();
        self.blocking(move |store| store.load_active_channels(&project_id))
            .await
    }

    async fn save_channel(
        &self,
        project_id: &str,
        channel: &AlertChannelConfig,
    ) -> Result<(), StoreError> {
        let project_id = project_id.to_string();
        let channel = channel.clone();
        self.blocking(move |store| store.insert_channel(&project_id, &channel))
            .await
    }

    async fn record_alert_outcomes(
        &self,
        project_id: &str,
        analysis_id: i64,
        outcomes: &[AlertDispatchOutcome],
    ) -> Result<(), StoreError> {
        let project_id = project_id.to_string();
        let outcomes = outcomes.to_vec();
        self.blocking(move |store| store.insert_alert_outcomes(&project_id, analysis_id, &outcomes))
            .await
    }

    async fn alert_history(&self, project_id: &str) -> Result<Vec<AlertRecord>, StoreError> {
        let project_id = project_id.to_string();
        self.blocking(move |store| store.load_alert_history(&project_id))
            .await
    }
}

fn current_version(conn: &Connection, source_id: &str) -> Result<Option<SchemaVersion>, StoreError> {
    let sql = format!(
        r#"
SELECT {VERSION_COLUMNS}
FROM sources s
JOIN schema_versions v ON v.id = s.current_version_id
WHERE s.source_id = ?1
"#
    );
    let row = conn
        .query_row(&sql, params![source_id], read_version_row)
        .optional()?;
    row.map(VersionRow::into_version).transpose()
}

fn store_version(
    conn: &Connection,
    new: NewSchemaVersion,
) -> Result<(SchemaVersion, bool), StoreError> {
    let existing = {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM schema_versions v WHERE v.source_id = ?1 AND v.content_hash = ?2"
        );
        conn.query_row(&sql, params![new.source_id, new.content_hash], read_version_row)
            .optional()?
    };
    if let Some(row) = existing {
        let version = row.into_version()?;
        point_source_at(conn, &version)?;
        return Ok((version, true));
    }

    let created_at = Utc::now();
    conn.execute(
        r#"
INSERT INTO schema_versions(source_id, project_id, content_hash, content_json, commit_ref, created_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
"#,
        params![
            new.source_id,
            new.project_id,
            new.content_hash,
            serde_json::to_string(&new.content)?,
            new.commit_ref,
            created_at.to_rfc3339()
        ],
    )?;
    let version = SchemaVersion {
        id: conn.last_insert_rowid(),
        source_id: new.source_id,
        project_id: new.project_id,
        content_hash: new.content_hash,
        content: new.content,
        commit_ref: new.commit_ref,
        created_at,
    };
    point_source_at(conn, &version)?;
    Ok((version, false))
}

fn point_source_at(conn: &Connection, version: &SchemaVersion) -> Result<(), StoreError> {
    conn.execute(
        r#"
INSERT INTO sources(source_id, project_id, current_version_id)
VALUES (?1, ?2, ?3)
ON CONFLICT(source_id) DO UPDATE SET
    project_id = excluded.project_id,
    current_version_id = excluded.current_version_id
"#,
        params![version.source_id, version.project_id, version.id],
    )?;
    Ok(())
}

fn insert_analysis(
    conn: &Connection,
    source_id: &str,
    project_id: &str,
    analysis: &AnalysisResult,
) -> Result<i64, StoreError> {
    conn.execute(
        r#"
INSERT INTO change_analyses(
    source_id, project_id, old_version_id, new_version_id,
    overall_severity, breaking_count, analysis_json, created_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
"#,
        params![
            source_id,
            project_id,
            analysis.old_version_id,
            analysis.new_version_id,
            analysis.overall_severity.as_str(),
            analysis.breaking_changes.len() as i64,
            serde_json::to_string(analysis)?,
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn upsert_source_health(conn: &Connection, health: &SourceHealth) -> Result<(), StoreError> {
    conn.execute(
        r#"
INSERT INTO sources(source_id, project_id, health, last_error, last_error_at)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(source_id) DO UPDATE SET
    project_id = excluded.project_id,
    health = excluded.health,
    last_error = excluded.last_error,
    last_error_at = excluded.last_error_at
"#,
        params![
            health.source_id,
            health.project_id,
            health.state.as_str(),
            health.last_error,
            health.last_error_at.map(|at| at.to_rfc3339())
        ],
    )?;
    Ok(())
}

fn upsert_project_health(
    conn: &Connection,
    project_id: &str,
    state: HealthState,
) -> Result<(), StoreError> {
    conn.execute(
        r#"
INSERT INTO projects(project_id, health, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(project_id) DO UPDATE SET
    health = excluded.health,
    updated_at = excluded.updated_at
"#,
        params![project_id, state.as_str(), Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

// Keys channel rows written before `channel_key` existed, dropping rows that
// duplicate an earlier one, then enforces uniqueness.
fn backfill_channel_keys(conn: &mut Connection) -> Result<(), StoreError> {
    let has_key: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info('alert_channels') WHERE name = 'channel_key'",
        [],
        |row| row.get(0),
    )?;
    let tx = conn.transaction()?;
    if has_key == 0 {
        tx.execute("ALTER TABLE alert_channels ADD COLUMN channel_key TEXT", [])?;
    }

    let unkeyed = {
        let mut stmt = tx.prepare(
            "SELECT id, project_id, channel_json FROM alert_channels WHERE channel_key IS NULL ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    let mut dropped = 0;
    for (id, project_id, json) in unkeyed {
        let channel: AlertChannelConfig = serde_json::from_str(&json)?;
        let key = channel.key();
        let taken = tx
            .query_row(
                "SELECT id FROM alert_channels WHERE project_id = ?1 AND channel_key = ?2",
                params![project_id, key],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .is_some();
        if taken {
            tx.execute("DELETE FROM alert_channels WHERE id = ?1", params![id])?;
            dropped += 1;
        } else {
            tx.execute(
                "UPDATE alert_channels SET channel_key = ?1 WHERE id = ?2",
                params![key, id],
            )?;
        }
    }
    tx.execute_batch(CHANNEL_KEY_INDEX)?;
    tx.commit()?;
    if dropped > 0 {
        info!(dropped, "removed duplicate alert channel rows");
    }
    Ok(())
}

struct VersionRow {
    id: i64,
    source_id: String,
    project_id: String,
    content_hash: String,
    content_json: String,
    commit_ref: Option<String>,
    created_at: String,
}

impl VersionRow {
    fn into_version(self) -> Result<SchemaVersion, StoreError> {
        Ok(SchemaVersion {
            id: self.id,
            source_id: self.source_id,
            project_id: self.project_id,
            content_hash: self.content_hash,
            content: serde_json::from_str(&self.content_json)?,
            commit_ref: self.commit_ref,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

fn read_version_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<VersionRow> {
    Ok(VersionRow {
        id: row.get(0)?,
        source_id: row.get(1)?,
        project_id: row.get(2)?,
        content_hash: row.get(3)?,
        content_json: row.get(4)?,
        commit_ref: row.get(5)?,
        created_at: row.get(6)?,
    })
}

struct HealthRow {
    source_id: String,
    project_id: String,
    health: String,
    last_error: Option<String>,
    last_error_at: Option<String>,
}

impl HealthRow {
    fn into_health(self) -> Result<SourceHealth, StoreError> {
        Ok(SourceHealth {
            source_id: self.source_id,
            project_id: self.project_id,
            state: HealthState::from_db(&self.health),
            last_error: self.last_error,
            last_error_at: self.last_error_at.as_deref().map(parse_time).transpose()?,
        })
    }
}

fn read_health_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<HealthRow> {
    Ok(HealthRow {
        source_id: row.get(0)?,
        project_id: row.get(1)?,
        health: row.get(2)?,
        last_error: row.get(3)?,
        last_error_at: row.get(4)?,
    })
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::alert::ChannelType;
    use crate::classify::Severity;

    fn new_version(source: &str, hash: &str) -> NewSchemaVersion {
        NewSchemaVersion {
            source_id: source.to_string(),
            project_id: "proj".to_string(),
            content_hash: hash.to_string(),
            content: json!({ "paths": {} }),
            commit_ref: Some("abc123".to_string()),
        }
    }

    fn empty_analysis() -> AnalysisResult {
        AnalysisResult {
            breaking_changes: Vec::new(),
            non_breaking_changes: Vec::new(),
            overall_severity: Severity::Low,
            summary: "none".to_string(),
            old_version_id: None,
            new_version_id: None,
        }
    }

    fn channel_rows(store: &SqliteStore) -> i64 {
        store
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM alert_channels", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn first_write_creates_and_repeat_is_unchanged() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = store.write_version(new_version("s1", "h1")).unwrap();
        let created = match first {
            VersionWrite::Created { previous: None, version } => version,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(created.commit_ref.as_deref(), Some("abc123"));

        match store.write_version(new_version("s1", "h1")).unwrap() {
            VersionWrite::Unchanged(current) => assert_eq!(current.id, created.id),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(store.version_count("s1").unwrap(), 1);
    }

    #[test]
    fn revert_reuses_existing_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.write_version(new_version("s1", "h1")).unwrap();
        store.write_version(new_version("s1", "h2")).unwrap();
        match store.write_version(new_version("s1", "h1")).unwrap() {
            VersionWrite::Reused {
                previous: Some(previous),
                version,
            } => {
                assert_eq!(previous.content_hash, "h2");
                assert_eq!(version.content_hash, "h1");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(store.version_count("s1").unwrap(), 2);
        assert_eq!(
            store.current_version("s1").unwrap().unwrap().content_hash,
            "h1"
        );
    }

    #[test]
    fn same_hash_on_different_sources_is_two_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.write_version(new_version("s1", "h1")).unwrap();
        let second = store.write_version(new_version("s2", "h1")).unwrap();
        assert!(matches!(second, VersionWrite::Created { previous: None, .. }));
        let latest = store.latest_for_project("proj").unwrap().unwrap();
        assert_eq!(latest.source_id, "s2");
    }

    #[test]
    fn versions_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("breakwatch.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.write_version(new_version("s1", "h1")).unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        let current = reopened.current_version("s1").unwrap().unwrap();
        assert_eq!(current.content_hash, "h1");
        assert_eq!(current.content, json!({ "paths": {} }));
    }

    #[test]
    fn transition_writes_version_and_analysis_together() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = store
            .write_transition(new_version("s1", "h1"), None, &empty_analysis())
            .unwrap();
        let (baseline, analysis_id) = match first {
            TransitionWrite::Committed {
                version,
                reused: false,
                analysis_id,
            } => (version, analysis_id),
            other => panic!("unexpected {other:?}"),
        };
        let stored = store.load_analyses("s1").unwrap();
        assert_eq!(stored[0].id, analysis_id);
        assert_eq!(stored[0].analysis.new_version_id, Some(baseline.id));
        assert_eq!(stored[0].analysis.old_version_id, None);

        assert!(matches!(
            store
                .write_transition(new_version("s1", "h1"), None, &empty_analysis())
                .unwrap(),
            TransitionWrite::Unchanged(_)
        ));
    }

    #[test]
    fn stale_transition_writes_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .write_transition(new_version("s1", "h1"), None, &empty_analysis())
            .unwrap();

        // Computed against "no previous version", but h1 is current now.
        match store
            .write_transition(new_version("s1", "h2"), None, &empty_analysis())
            .unwrap()
        {
            TransitionWrite::Stale(Some(current)) => assert_eq!(current.content_hash, "h1"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(store.version_count("s1").unwrap(), 1);
        assert_eq!(store.load_analyses("s1").unwrap().len(), 1);
    }

    #[test]
    fn health_round_trips_through_upsert() {
        let store = SqliteStore::open_in_memory().unwrap();
        let at = Utc::now();
        store
            .set_source_health(&SourceHealth::failed("s1", "proj", "boom", at))
            .unwrap();
        let health = store.load_source_health("s1").unwrap().unwrap();
        assert_eq!(health.state, HealthState::Error);
        assert_eq!(health.last_error.as_deref(), Some("boom"));

        store
            .set_source_health(&SourceHealth::healthy("s1", "proj"))
            .unwrap();
        let health = store.load_source_health("s1").unwrap().unwrap();
        assert_eq!(health.state, HealthState::Healthy);
        assert!(health.last_error.is_none());

        store.set_project_health("proj", HealthState::Error).unwrap();
        assert_eq!(
            store.load_project_health("proj").unwrap(),
            Some(HealthState::Error)
        );
        assert_eq!(store.load_project_health("other").unwrap(), None);
    }

    #[test]
    fn recovering_one_source_keeps_project_errored_while_a_sibling_fails() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .fail_source(&SourceHealth::failed("a", "proj", "boom", Utc::now()))
            .unwrap();
        store
            .fail_source(&SourceHealth::failed("b", "proj", "boom", Utc::now()))
            .unwrap();
        assert_eq!(store.recover_source("a", "proj").unwrap(), HealthState::Error);
        assert_eq!(
            store.load_project_health("proj").unwrap(),
            Some(HealthState::Error)
        );
        assert_eq!(store.recover_source("b", "proj").unwrap(), HealthState::Healthy);
        assert_eq!(
            store.load_project_health("proj").unwrap(),
            Some(HealthState::Healthy)
        );
    }

    #[test]
    fn health_write_keeps_version_pointer() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.write_version(new_version("s1", "h1")).unwrap();
        store
            .set_source_health(&SourceHealth::failed("s1", "proj", "boom", Utc::now()))
            .unwrap();
        assert!(store.current_version("s1").unwrap().is_some());
    }

    #[test]
    fn analyses_and_alert_history_are_stored() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut analysis = empty_analysis();
        analysis.old_version_id = Some(1);
        analysis.new_version_id = Some(2);
        let id = store.insert_analysis("s1", "proj", &analysis).unwrap();
        let stored = store.load_analyses("s1").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, id);
        assert_eq!(stored[0].analysis, analysis);

        let outcomes = vec![
            AlertDispatchOutcome::delivered(ChannelType::Email, "sent"),
            AlertDispatchOutcome::failed(ChannelType::Webhook, "HTTP 500", true),
        ];
        store.insert_alert_outcomes("proj", id, &outcomes).unwrap();
        let history = store.load_alert_history("proj").unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].outcome.success);
        assert!(!history[1].outcome.success);
    }

    #[test]
    fn only_active_channels_are_loaded() {
        let store = SqliteStore::open_in_memory().unwrap();
        let active = AlertChannelConfig::new(ChannelType::Webhook, json!({ "url": "http://a" }));
        let mut inactive = AlertChannelConfig::new(ChannelType::Email, json!({}));
        inactive.is_active = false;
        store.insert_channel("proj", &active).unwrap();
        store.insert_channel("proj", &inactive).unwrap();
        let loaded = store.load_active_channels("proj").unwrap();
        assert_eq!(loaded, vec![active]);
    }

    #[test]
    fn saving_the_same_channel_again_updates_in_place() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut channel =
            AlertChannelConfig::new(ChannelType::Generic, json!({ "url": "http://hooks/x" }));
        store.insert_channel("proj", &channel).unwrap();
        store.insert_channel("proj", &channel).unwrap();
        assert_eq!(store.load_active_channels("proj").unwrap().len(), 1);

        channel.is_active = false;
        store.insert_channel("proj", &channel).unwrap();
        assert!(store.load_active_channels("proj").unwrap().is_empty());
        assert_eq!(channel_rows(&store), 1);

        // Same destination under another project is its own row.
        store.insert_channel("other", &channel).unwrap();
        assert_eq!(channel_rows(&store), 2);
    }

    #[test]
    fn migrate_collapses_unkeyed_duplicate_channels() {
        let store = SqliteStore::open_in_memory().unwrap();
        let json = r#"{"type":"generic","parameters":{"url":"http://hooks/x"},"isActive":true}"#;
        {
            let conn = store.lock().unwrap();
            for _ in 0..3 {
                conn.execute(
                    "INSERT INTO alert_channels(project_id, channel_json, is_active) VALUES ('proj', ?1, 1)",
                    params![json],
                )
                .unwrap();
            }
        }
        store.migrate().unwrap();
        assert_eq!(channel_rows(&store), 1);
        assert_eq!(store.load_active_channels("proj").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn trait_calls_run_on_the_blocking_pool() {
        let store: Arc<dyn PipelineStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        store
            .commit_transition(new_version("s1", "h1"), None, &empty_analysis())
            .await
            .unwrap();
        store
            .update_source_error("s1", "proj", "boom", Utc::now())
            .await
            .unwrap();
        assert_eq!(
            store.project_health("proj").await.unwrap(),
            Some(HealthState::Error)
        );
        assert_eq!(
            store.clear_source_error("s1", "proj").await.unwrap(),
            HealthState::Healthy
        );
        let current = store.latest_schema_version("s1").await.unwrap().unwrap();
        assert_eq!(current.content_hash, "h1");
    }
}
