use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::classify::classify;
use crate::diff::compare;
use crate::document::ApiDocument;
use crate::error::PipelineError;
use crate::store::PipelineStore;
use crate::types::AnalysisResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    pub project_id: String,
    pub new_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    Approved,
    Blocked,
}

impl GateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub status: GateStatus,
    pub analysis: AnalysisResult,
    pub message: String,
}

/// CI gate: compares a candidate document against the project's current version
/// without storing anything. Blocked iff the candidate introduces breaking changes.
pub async fn validate(
    store: &dyn PipelineStore,
    request: &ValidateRequest,
) -> Result<ValidateResponse, PipelineError> {
    if !request.new_schema.is_object() {
        return Err(PipelineError::validation("newSchema must be a JSON object"));
    }
    let candidate = ApiDocument::from_value(&request.new_schema)?;
    let environment = request.environment.as_deref().unwrap_or("default");

    let Some(current) = store
        .latest_project_schema_version(&request.project_id)
        .await?
    else {
        let analysis = classify(&compare(&ApiDocument::empty(), &candidate)?).into_analysis(None, None);
        info!(project_id = %request.project_id, environment, "no stored version, approving");
        return Ok(ValidateResponse {
            status: GateStatus::Approved,
            analysis,
            message: format!(
                "No previous version recorded for project {}; deployment to {environment} approved.",
                request.project_id
            ),
        });
    };

    let baseline = ApiDocument::from_value(&current.content)?;
    let analysis = classify(&compare(&baseline, &candidate)?).into_analysis(Some(current.id), None);
    let status = if analysis.has_breaking_changes() {
        GateStatus::Blocked
    } else {
        GateStatus::Approved
    };
    info!(
        project_id = %request.project_id,
        environment,
        status = status.as_str(),
        breaking = analysis.breaking_changes.len(),
        "validation gate evaluated"
    );
    let message = match status {
        GateStatus::Blocked => format!(
            "Deployment to {environment} blocked: {}",
            analysis.summary
        ),
        GateStatus::Approved => format!(
            "Deployment to {environment} approved: {}",
            analysis.summary
        ),
    };
    Ok(ValidateResponse {
        status,
        analysis,
        message,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::document::canonical::content_hash;
    use crate::store::MemoryStore;
    use crate::types::NewSchemaVersion;

    async fn store_with(content: Value) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .create_schema_version(NewSchemaVersion {
                source_id: "openapi".to_string(),
                project_id: "shop".to_string(),
                content_hash: content_hash(&content),
                content,
                commit_ref: None,
            })
            .await
            .unwrap();
        store
    }

    fn request(new_schema: Value) -> ValidateRequest {
        ValidateRequest {
            project_id: "shop".to_string(),
            new_schema,
            environment: Some("production".to_string()),
        }
    }

    #[tokio::test]
    async fn first_submission_is_always_approved() {
        let store = MemoryStore::new();
        let response = validate(&store, &request(json!({ "paths": {} })))
            .await
            .unwrap();
        assert_eq!(response.status, GateStatus::Approved);
        assert!(response.analysis.old_version_id.is_none());
    }

    #[tokio::test]
    async fn removing_an_endpoint_blocks() {
        let store = store_with(json!({ "paths": { "/users": { "get": { "responses": {} } } } })).await;
        let response = validate(&store, &request(json!({ "paths": {} }))).await.unwrap();
        assert_eq!(response.status, GateStatus::Blocked);
        assert!(response.message.starts_with("Deployment to production blocked"));

        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["status"], "blocked");
        assert_eq!(wire["analysis"]["overallSeverity"], "critical");
    }

    #[tokio::test]
    async fn additive_change_is_approved_and_nothing_is_stored() {
        let store = store_with(json!({ "paths": {} })).await;
        let response = validate(
            &store,
            &request(json!({ "paths": { "/new": { "get": { "responses": {} } } } })),
        )
        .await
        .unwrap();
        assert_eq!(response.status, GateStatus::Approved);
        assert_eq!(store.version_count("openapi"), 1);
    }

    #[tokio::test]
    async fn non_object_schema_is_rejected() {
        let store = MemoryStore::new();
        let err = validate(&store, &request(json!(["not", "a", "doc"])))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn request_uses_wire_names() {
        let parsed: ValidateRequest = serde_json::from_value(json!({
            "projectId": "shop",
            "newSchema": { "paths": {} }
        }))
        .unwrap();
        assert_eq!(parsed.project_id, "shop");
        assert!(parsed.environment.is_none());
    }
}
