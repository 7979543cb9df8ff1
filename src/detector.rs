use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::document::canonical::content_hash;
use crate::error::PipelineError;
use crate::store::{PipelineStore, TransitionWrite};
use crate::types::{AnalysisResult, NewSchemaVersion, SchemaVersion};

#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    Unchanged {
        latest: SchemaVersion,
    },
    Changed {
        previous: Option<SchemaVersion>,
        candidate: NewSchemaVersion,
    },
}

impl Detection {
    pub fn is_new(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Unchanged { latest: SchemaVersion },
    Stale,
    Stored {
        current: SchemaVersion,
        reused: bool,
        analysis_id: i64,
        analysis: AnalysisResult,
    },
}

#[derive(Clone)]
pub struct ChangeDetector {
    store: Arc<dyn PipelineStore>,
}

impl ChangeDetector {
    pub fn new(store: Arc<dyn PipelineStore>) -> Self {
        Self { store }
    }

    pub async fn detect(
        &self,
        source_id: &str,
        project_id: &str,
        content: &Value,
        commit_ref: Option<String>,
    ) -> Result<Detection, PipelineError> {
        let hash = content_hash(content);
        let latest = self.store.latest_schema_version(source_id).await?;
        if let Some(latest) = latest.as_ref().filter(|v| v.content_hash == hash) {
            debug!(source_id, hash = %hash, "content unchanged");
            return Ok(Detection::Unchanged {
                latest: latest.clone(),
            });
        }
        Ok(Detection::Changed {
            previous: latest,
            candidate: NewSchemaVersion {
                source_id: source_id.to_string(),
                project_id: project_id.to_string(),
                content_hash: hash,
                content: content.clone(),
                commit_ref,
            },
        })
    }

    // Atomic check-and-insert of `candidate` plus `analysis`, guarded on the
    // source still pointing at `previous`.
    pub async fn record(
        &self,
        previous: Option<&SchemaVersion>,
        candidate: NewSchemaVersion,
        mut analysis: AnalysisResult,
    ) -> Result<Recorded, PipelineError> {
        let expected = previous.map(|v| v.id);
        let source_id = candidate.source_id.clone();
        let recorded = match self
            .store
            .commit_transition(candidate, expected, &analysis)
            .await?
        {
            TransitionWrite::Unchanged(latest) => Recorded::Unchanged { latest },
            TransitionWrite::Stale(current) => {
                debug!(
                    source_id = %source_id,
                    current = ?current.map(|v| v.id),
                    "source moved during analysis"
                );
                Recorded::Stale
            }
            TransitionWrite::Committed {
                version,
                reused,
                analysis_id,
            } => {
                debug!(source_id = %source_id, version_id = version.id, reused, "recorded new version");
                analysis.old_version_id = expected;
                analysis.new_version_id = Some(version.id);
                Recorded::Stored {
                    current: version,
                    reused,
                    analysis_id,
                    analysis,
                }
            }
        };
        Ok(recorded)
    }
}
