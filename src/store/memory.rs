use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::alert::{AlertChannelConfig, AlertDispatchOutcome};
use crate::error::StoreError;
use crate::store::{AlertRecord, PipelineStore, StoredAnalysis, TransitionWrite, VersionWrite};
use crate::types::{AnalysisResult, HealthState, NewSchemaVersion, SchemaVersion, SourceHealth};

#[derive(Default)]
struct MemoryState {
    versions: Vec<SchemaVersion>,
    current: HashMap<String, i64>,
    health: BTreeMap<String, SourceHealth>,
    projects: HashMap<String, HealthState>,
    analyses: Vec<StoredAnalysis>,
    channels: Vec<(String, AlertChannelConfig)>,
    alerts: Vec<AlertRecord>,
}

impl MemoryState {
    fn version(&self, id: i64) -> Option<&SchemaVersion> {
        self.versions.iter().find(|v| v.id == id)
    }

    fn current(&self, source_id: &str) -> Option<&SchemaVersion> {
        self.current
            .get(source_id)
            .and_then(|id| self.version(*id))
    }

    fn ensure_source(&mut self, source_id: &str, project_id: &str) {
        self.health
            .entry(source_id.to_string())
            .or_insert_with(|| SourceHealth::healthy(source_id, project_id));
    }

    fn store_version(&mut self, new: NewSchemaVersion) -> (SchemaVersion, bool) {
        let existing = self
            .versions
            .iter()
            .find(|v| v.source_id == new.source_id && v.content_hash == new.content_hash)
            .cloned();
        let (version, reused) = match existing {
            Some(version) => (version, true),
            None => {
                let version = SchemaVersion {
                    id: self.versions.len() as i64 + 1,
                    source_id: new.source_id,
                    project_id: new.project_id,
                    content_hash: new.content_hash,
                    content: new.content,
                    commit_ref: new.commit_ref,
                    created_at: Utc::now(),
                };
                self.versions.push(version.clone());
                (version, false)
            }
        };
        self.current.insert(version.source_id.clone(), version.id);
        self.ensure_source(&version.source_id, &version.project_id);
        (version, reused)
    }

    fn push_analysis(&mut self, source_id: &str, project_id: &str, analysis: AnalysisResult) -> i64 {
        let id = self.analyses.len() as i64 + 1;
        self.analyses.push(StoredAnalysis {
            id,
            source_id: source_id.to_string(),
            project_id: project_id.to_string(),
            analysis,
            created_at: Utc::now(),
        });
        id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn version_count(&self, source_id: &str) -> usize {
        self.state
            .lock()
            .map(|s| s.versions.iter().filter(|v| v.source_id == source_id).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn latest_schema_version(
        &self,
        source_id: &str,
    ) -> Result<Option<SchemaVersion>, StoreError> {
        Ok(self.lock()?.current(source_id).cloned())
    }

    async fn latest_project_schema_version(
        &self,
        project_id: &str,
    ) -> Result<Option<SchemaVersion>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .current
            .values()
            .filter_map(|id| state.version(*id))
            .filter(|v| v.project_id == project_id)
            .max_by_key(|v| v.id)
            .cloned())
    }

    async fn create_schema_version(
        &self,
        new: NewSchemaVersion,
    ) -> Result<VersionWrite, StoreError> {
        let mut state = self.lock()?;
        let previous = state.current(&new.source_id).cloned();
        if let Some(current) = &previous {
            if current.content_hash == new.content_hash {
                return Ok(VersionWrite::Unchanged(current.clone()));
            }
        }

        let (version, reused) = state.store_version(new);
        Ok(if reused {
            VersionWrite::Reused { previous, version }
        } else {
            VersionWrite::Created { previous, version }
        })
    }

    async fn commit_transition(
        &self,
        new: NewSchemaVersion,
        expected_previous: Option<i64>,
        analysis: &AnalysisResult,
    ) -> Result<TransitionWrite, StoreError> {
        let mut state = self.lock()?;
        let current = state.current(&new.source_id).cloned();
        if let Some(current) = &current {
            if current.content_hash == new.content_hash {
                return Ok(TransitionWrite::Unchanged(current.clone()));
            }
        }
        if current.as_ref().map(|v| v.id) != expected_previous {
            return Ok(TransitionWrite::Stale(current));
        }

        let (version, reused) = state.store_version(new);
        let mut analysis = analysis.clone();
        analysis.old_version_id = expected_previous;
        analysis.new_version_id = Some(version.id);
        let analysis_id = state.push_analysis(&version.source_id, &version.project_id, analysis);
        Ok(TransitionWrite::Committed {
            version,
            reused,
            analysis_id,
        })
    }

    async fn create_change_analysis(
        &self,
        source_id: &str,
        project_id: &str,
        analysis: &AnalysisResult,
    ) -> Result<i64, StoreError> {
        Ok(self
            .lock()?
            .push_analysis(source_id, project_id, analysis.clone()))
    }

    async fn analyses_for_source(
        &self,
        source_id: &str,
    ) -> Result<Vec<StoredAnalysis>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .analyses
            .iter()
            .rev()
            .filter(|a| a.source_id == source_id)
            .cloned()
            .collect())
    }

    async fn update_source_error(
        &self,
        source_id: &str,
        project_id: &str,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state.health.insert(
            source_id.to_string(),
            SourceHealth::failed(source_id, project_id, message, at),
        );
        state
            .projects
            .insert(project_id.to_string(), HealthState::Error);
        Ok(())
    }

    async fn clear_source_error(
        &self,
        source_id: &str,
        project_id: &str,
    ) -> Result<HealthState, StoreError> {
        let mut state = self.lock()?;
        state.health.insert(
            source_id.to_string(),
            SourceHealth::healthy(source_id, project_id),
        );
        let project = if state
            .health
            .values()
            .any(|h| h.project_id == project_id && h.state == HealthState::Error)
        {
            HealthState::Error
        } else {
            HealthState::Healthy
        };
        state.projects.insert(project_id.to_string(), project);
        Ok(project)
    }

    async fn source_health(&self, source_id: &str) -> Result<Option<SourceHealth>, StoreError> {
        Ok(self.lock()?.health.get(source_id).cloned())
    }

    async fn project_sources(&self, project_id: &str) -> Result<Vec<SourceHealth>, StoreError> {
        Ok(self
            .lock()?
            .health
            .values()
            .filter(|h| h.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn update_project_health(
        &self,
        project_id: &str,
        state: HealthState,
    ) -> Result<(), StoreError> {
        self.lock()?.projects.insert(project_id.to_string(), state);
        Ok(())
    }

    async fn project_health(&self, project_id: &str) -> Result<Option<HealthState>, StoreError> {
        Ok(self.lock()?.projects.get(project_id).copied())
    }

    async fn active_channels(
        &self,
        project_id: &str,
    ) -> Result<Vec<AlertChannelConfig>, StoreError> {
        Ok(self
            .lock()?
            .channels
            .iter()
            .filter(|(project, channel)| project == project_id && channel.is_active)
            .map(|(_, channel)| channel.clone())
            .collect())
    }

    async fn save_channel(
        &self,
        project_id: &str,
        channel: &AlertChannelConfig,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let key = channel.key();
        let position = state
            .channels
            .iter()
            .position(|(project, existing)| project == project_id && existing.key() == key);
        match position {
            Some(index) => state.channels[index].1 = channel.clone(),
            None => state
                .channels
                .push((project_id.to_string(), channel.clone())),
        }
        Ok(())
    }

    async fn record_alert_outcomes(
        &self,
        project_id: &str,
        analysis_id: i64,
        outcomes: &[AlertDispatchOutcome],
    ) -> Result<(), StoreError> {
        let sent_at = Utc::now();
        let mut state = self.lock()?;
        state.alerts.extend(outcomes.iter().map(|outcome| AlertRecord {
            project_id: project_id.to_string(),
            analysis_id,
            outcome: outcome.clone(),
            sent_at,
        }));
        Ok(())
    }

    async fn alert_history(&self, project_id: &str) -> Result<Vec<AlertRecord>, StoreError> {
        Ok(self
            .lock()?
            .alerts
            .iter()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect())
    }
}
