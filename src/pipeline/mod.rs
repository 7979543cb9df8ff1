pub mod scheduler;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::alert::{AlertChannelConfig, AlertDispatchOutcome, AlertDispatcher, AlertMessage};
use crate::classify::classify;
use crate::detector::{ChangeDetector, Detection, Recorded};
use crate::diff::compare;
use crate::document::{parse_content, ApiDocument};
use crate::error::{PipelineError, StoreError};
use crate::store::PipelineStore;
use crate::types::{AnalysisResult, AnalyzeRequest, HealthState, SchemaVersion};

pub use scheduler::{FetchedSpec, FileSpecProvider, ScheduledSource, SpecProvider, TimerRegistry};

// Detect-analyze-record rounds before giving up on a source that keeps moving.
const COMMIT_ATTEMPTS: usize = 3;

/// Per-source run state: `idle -> running -> healthy | error`.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Healthy,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Unchanged,
    Baseline,
    Analyzed,
    Failed,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub source_id: String,
    pub project_id: String,
    pub outcome: RunOutcome,
    pub state: RunState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alerts: Vec<AlertDispatchOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    fn new(request: &AnalyzeRequest, outcome: RunOutcome, state: RunState) -> Self {
        Self {
            source_id: request.source_id.clone(),
            project_id: request.project_id.clone(),
            outcome,
            state,
            version_id: None,
            analysis_id: None,
            analysis: None,
            alerts: Vec::new(),
            error: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.outcome == RunOutcome::Failed
    }
}

pub struct Orchestrator {
    store: Arc<dyn PipelineStore>,
    detector: ChangeDetector,
    dispatcher: AlertDispatcher,
    states: Mutex<HashMap<String, RunState>>,
    timers: TimerRegistry,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn PipelineStore>, dispatcher: AlertDispatcher) -> Self {
        Self {
            detector: ChangeDetector::new(store.clone()),
            store,
            dispatcher,
            states: Mutex::new(HashMap::new()),
            timers: TimerRegistry::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn PipelineStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &AlertDispatcher {
        &self.dispatcher
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    pub fn state(&self, source_id: &str) -> RunState {
        self.states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(source_id)
            .copied()
            .unwrap_or(RunState::Idle)
    }

    fn set_state(&self, source_id: &str, state: RunState) {
        self.states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(source_id.to_string(), state);
    }

    pub async fn handle(&self, request: &AnalyzeRequest) -> RunReport {
        self.set_state(&request.source_id, RunState::Running);
        match self.run(request).await {
            Ok(report) => {
                self.set_state(&request.source_id, RunState::Healthy);
                report
            }
            Err(err) => self.fail(request, &err).await,
        }
    }

    pub async fn handle_batch(&self, requests: &[AnalyzeRequest]) -> Vec<RunReport> {
        join_all(requests.iter().map(|request| self.handle(request))).await
    }

    async fn run(&self, request: &AnalyzeRequest) -> Result<RunReport, PipelineError> {
        let source_id = request.source_id.as_str();
        let project_id = request.project_id.as_str();

        let content = parse_content(&request.raw_content)?;
        let new_doc = ApiDocument::from_value(&content)?;

        for _ in 0..COMMIT_ATTEMPTS {
            let (previous, candidate) = match self
                .detector
                .detect(source_id, project_id, &content, request.commit_ref.clone())
                .await?
            {
                Detection::Unchanged { latest } => return self.unchanged(request, &latest).await,
                Detection::Changed {
                    previous,
                    candidate,
                } => (previous, candidate),
            };

            // Nothing is written until the diff, classification and channel read succeed.
            let old_doc = match &previous {
                Some(version) => ApiDocument::from_value(&version.content)?,
                None => ApiDocument::empty(),
            };
            let analysis = classify(&compare(&old_doc, &new_doc)?)
                .into_analysis(previous.as_ref().map(|v| v.id), None);
            let outcome = if previous.is_none() {
                RunOutcome::Baseline
            } else {
                RunOutcome::Analyzed
            };
            let channels = if outcome == RunOutcome::Analyzed && analysis.has_breaking_changes() {
                self.store.active_channels(project_id).await?
            } else {
                Vec::new()
            };

            let (current, analysis_id, analysis) = match self
                .detector
                .record(previous.as_ref(), candidate, analysis)
                .await?
            {
                Recorded::Unchanged { latest } => return self.unchanged(request, &latest).await,
                Recorded::Stale => continue,
                Recorded::Stored {
                    current,
                    analysis_id,
                    analysis,
                    ..
                } => (current, analysis_id, analysis),
            };
            info!(
                source_id,
                project_id,
                version_id = current.id,
                breaking = analysis.breaking_changes.len(),
                severity = %analysis.overall_severity,
                "analysis stored"
            );

            let alerts = if channels.is_empty() {
                if outcome == RunOutcome::Analyzed && analysis.has_breaking_changes() {
                    info!(project_id, "breaking changes found but no active alert channels");
                }
                Vec::new()
            } else {
                self.alert(source_id, project_id, analysis_id, &analysis, &channels)
                    .await
            };
            self.mark_healthy(source_id, project_id).await?;

            let mut report = RunReport::new(request, outcome, RunState::Healthy);
            report.version_id = Some(current.id);
            report.analysis_id = Some(analysis_id);
            report.analysis = Some(analysis);
            report.alerts = alerts;
            return Ok(report);
        }

        Err(StoreError::Conflict(format!(
            "{source_id} changed {COMMIT_ATTEMPTS} times while being analyzed"
        ))
        .into())
    }

    async fn unchanged(
        &self,
        request: &AnalyzeRequest,
        latest: &SchemaVersion,
    ) -> Result<RunReport, PipelineError> {
        let source_id = request.source_id.as_str();
        let project_id = request.project_id.as_str();
        info!(source_id, project_id, "no change detected");
        let errored = self
            .store
            .source_health(source_id)
            .await?
            .is_some_and(|h| h.state == HealthState::Error);
        if errored {
            self.mark_healthy(source_id, project_id).await?;
        }
        let mut report = RunReport::new(request, RunOutcome::Unchanged, RunState::Healthy);
        report.version_id = Some(latest.id);
        Ok(report)
    }

    async fn alert(
        &self,
        source_id: &str,
        project_id: &str,
        analysis_id: i64,
        analysis: &AnalysisResult,
        channels: &[AlertChannelConfig],
    ) -> Vec<AlertDispatchOutcome> {
        let message = AlertMessage::for_analysis(project_id, Some(source_id), analysis);
        let outcomes = self.dispatcher.dispatch(&message, channels).await;
        if let Err(err) = self
            .store
            .record_alert_outcomes(project_id, analysis_id, &outcomes)
            .await
        {
            warn!(project_id, analysis_id, error = %err, "failed to record alert history");
        }
        outcomes
    }

    async fn mark_healthy(&self, source_id: &str, project_id: &str) -> Result<(), PipelineError> {
        let project = self.store.clear_source_error(source_id, project_id).await?;
        debug!(source_id, project_id, project_health = project.as_str(), "source healthy");
        Ok(())
    }

    async fn fail(&self, request: &AnalyzeRequest, err: &PipelineError) -> RunReport {
        let source_id = request.source_id.as_str();
        let project_id = request.project_id.as_str();
        let message = err.to_string();
        error!(source_id, project_id, error = %message, "pipeline run failed");

        self.set_state(source_id, RunState::Error);
        if let Err(store_err) = self
            .store
            .update_source_error(source_id, project_id, &message, Utc::now())
            .await
        {
            error!(source_id, error = %store_err, "could not record source error");
        }

        let mut report = RunReport::new(request, RunOutcome::Failed, RunState::Error);
        report.error = Some(message);
        report
    }

    pub fn schedule(self: &Arc<Self>, source: ScheduledSource, provider: Arc<dyn SpecProvider>) {
        let orchestrator = Arc::downgrade(self);
        let source_id = source.source_id.clone();
        let period = source.interval;
        info!(source_id = %source_id, period_secs = period.as_secs(), "scheduling source");
        self.timers.schedule(&source_id, period, move || {
            let orchestrator = Weak::clone(&orchestrator);
            let provider = Arc::clone(&provider);
            let source = source.clone();
            async move {
                if let Some(orchestrator) = orchestrator.upgrade() {
                    orchestrator.tick(&source, provider.as_ref()).await;
                }
            }
        });
    }

    pub fn unschedule(&self, source_id: &str) -> bool {
        self.timers.cancel(source_id)
    }

    pub async fn tick(&self, source: &ScheduledSource, provider: &dyn SpecProvider) -> RunReport {
        match provider.fetch(&source.source_id).await {
            Ok(spec) => {
                let request = AnalyzeRequest {
                    source_id: source.source_id.clone(),
                    project_id: source.project_id.clone(),
                    raw_content: spec.raw_content,
                    commit_ref: spec.commit_ref,
                };
                self.handle(&request).await
            }
            Err(err) => {
                let request = AnalyzeRequest {
                    source_id: source.source_id.clone(),
                    project_id: source.project_id.clone(),
                    raw_content: String::new(),
                    commit_ref: None,
                };
                self.fail(&request, &err).await
            }
        }
    }
}
