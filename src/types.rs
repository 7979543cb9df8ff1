use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classify::{ClassifiedChange, Severity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaVersion {
    pub id: i64,
    pub source_id: String,
    pub project_id: String,
    pub content_hash: String,
    pub content: Value,
    pub commit_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSchemaVersion {
    pub source_id: String,
    pub project_id: String,
    pub content_hash: String,
    pub content: Value,
    pub commit_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    pub source_id: String,
    pub project_id: String,
    pub raw_content: String,
    #[serde(default)]
    pub commit_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub breaking_changes: Vec<ClassifiedChange>,
    pub non_breaking_changes: Vec<ClassifiedChange>,
    pub overall_severity: Severity,
    pub summary: String,
    pub old_version_id: Option<i64>,
    pub new_version_id: Option<i64>,
}

impl AnalysisResult {
    pub fn has_breaking_changes(&self) -> bool {
        !self.breaking_changes.is_empty()
    }

    pub fn total_changes(&self) -> usize {
        self.breaking_changes.len() + self.non_breaking_changes.len()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Error,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Error => "error",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        if raw == "error" {
            Self::Error
        } else {
            Self::Healthy
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceHealth {
    pub source_id: String,
    pub project_id: String,
    pub state: HealthState,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl SourceHealth {
    pub fn healthy(source_id: &str, project_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            project_id: project_id.to_string(),
            state: HealthState::Healthy,
            last_error: None,
            last_error_at: None,
        }
    }

    pub fn failed(source_id: &str, project_id: &str, message: &str, at: DateTime<Utc>) -> Self {
        Self {
            source_id: source_id.to_string(),
            project_id: project_id.to_string(),
            state: HealthState::Error,
            last_error: Some(message.to_string()),
            last_error_at: Some(at),
        }
    }
}
