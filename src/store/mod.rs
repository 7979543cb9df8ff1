pub mod memory;
pub mod migrations;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::{AlertChannelConfig, AlertDispatchOutcome};
use crate::error::StoreError;
use crate::types::{AnalysisResult, HealthState, NewSchemaVersion, SchemaVersion, SourceHealth};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Clone, PartialEq)]
pub enum VersionWrite {
    Unchanged(SchemaVersion),
    Created {
        previous: Option<SchemaVersion>,
        version: SchemaVersion,
    },
    Reused {
        previous: Option<SchemaVersion>,
        version: SchemaVersion,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionWrite {
    Unchanged(SchemaVersion),
    Stale(Option<SchemaVersion>),
    Committed {
        version: SchemaVersion,
        reused: bool,
        analysis_id: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAnalysis {
    pub id: i64,
    pub source_id: String,
    pub project_id: String,
    pub analysis: AnalysisResult,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub project_id: String,
    pub analysis_id: i64,
    pub outcome: AlertDispatchOutcome,
    pub sent_at: DateTime<Utc>,
}

#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn latest_schema_version(
        &self,
        source_id: &str,
    ) -> Result<Option<SchemaVersion>, StoreError>;

    async fn latest_project_schema_version(
        &self,
        project_id: &str,
    ) -> Result<Option<SchemaVersion>, StoreError>;

    // Must be atomic: concurrent calls with the same source and hash never create two rows.
    async fn create_schema_version(
        &self,
        version: NewSchemaVersion,
    ) -> Result<VersionWrite, StoreError>;

    /// Points the source at `version` and stores `analysis` in one step, but only
    /// while the source still points at `expected_previous`. The stored analysis
    /// carries the written version ids.
    async fn commit_transition(
        &self,
        version: NewSchemaVersion,
        expected_previous: Option<i64>,
        analysis: &AnalysisResult,
    ) -> Result<TransitionWrite, StoreError>;

    async fn create_change_analysis(
        &self,
        source_id: &str,
        project_id: &str,
        analysis: &AnalysisResult,
    ) -> Result<i64, StoreError>;

    async fn analyses_for_source(&self, source_id: &str)
        -> Result<Vec<StoredAnalysis>, StoreError>;

    async fn update_source_error(
        &self,
        source_id: &str,
        project_id: &str,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Clears the source error and re-derives the project state from all of its
    /// sources in the same step. Returns the project state.
    async fn clear_source_error(
        &self,
        source_id: &str,
        project_id: &str,
    ) -> Result<HealthState, StoreError>;

    async fn source_health(&self, source_id: &str) -> Result<Option<SourceHealth>, StoreError>;

    async fn project_sources(&self, project_id: &str) -> Result<Vec<SourceHealth>, StoreError>;

    async fn update_project_health(
        &self,
        project_id: &str,
        state: HealthState,
    ) -> Result<(), StoreError>;

    async fn project_health(&self, project_id: &str) -> Result<Option<HealthState>, StoreError>;

    async fn active_channels(
        &self,
        project_id: &str,
    ) -> Result<Vec<AlertChannelConfig>, StoreError>;

    async fn save_channel(
        &self,
        project_id: &str,
        channel: &AlertChannelConfig,
    ) -> Result<(), StoreError>;

    async fn record_alert_outcomes(
        &self,
        project_id: &str,
        analysis_id: i64,
        outcomes: &[AlertDispatchOutcome],
    ) -> Result<(), StoreError>;

    async fn alert_history(&self, project_id: &str) -> Result<Vec<AlertRecord>, StoreError>;
}
