use anyhow::Result;

use crate::alert::AlertDispatchOutcome;
use crate::pipeline::RunReport;
use crate::types::AnalysisResult;

pub fn changes_to_csv(analysis: &AnalysisResult) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "breaking",
        "severity",
        "kind",
        "path",
        "description",
        "impact",
        "recommendation",
    ])?;
    let rows = analysis
        .breaking_changes
        .iter()
        .map(|change| (true, change))
        .chain(analysis.non_breaking_changes.iter().map(|change| (false, change)));
    for (breaking, change) in rows {
        writer.write_record([
            breaking.to_string(),
            change.severity.to_string(),
            change.kind.to_string(),
            change.path.clone(),
            change.description.clone(),
            change.impact.clone(),
            change.recommendation.clone(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

pub fn reports_to_csv(reports: &[RunReport]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "source_id",
        "project_id",
        "outcome",
        "version_id",
        "breaking",
        "severity",
        "alerts_delivered",
        "alerts_total",
        "error",
    ])?;
    for report in reports {
        let outcome = serde_json::to_value(report.outcome)?;
        writer.write_record([
            report.source_id.clone(),
            report.project_id.clone(),
            outcome.as_str().unwrap_or_default().to_string(),
            report.version_id.map(|id| id.to_string()).unwrap_or_default(),
            report
                .analysis
                .as_ref()
                .map(|a| a.breaking_changes.len().to_string())
                .unwrap_or_default(),
            report
                .analysis
                .as_ref()
                .map(|a| a.overall_severity.to_string())
                .unwrap_or_default(),
            report.alerts.iter().filter(|a| a.success).count().to_string(),
            report.alerts.len().to_string(),
            report.error.clone().unwrap_or_default(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

pub fn outcomes_to_csv(outcomes: &[AlertDispatchOutcome]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(["channel_type", "success", "retriable", "message"])?;
    for outcome in outcomes {
        writer.write_record([
            outcome.channel_type.to_string(),
            outcome.success.to_string(),
            outcome.retriable.map(|r| r.to_string()).unwrap_or_default(),
            outcome.message.clone(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}
