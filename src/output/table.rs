use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Row, Table};

use crate::alert::AlertDispatchOutcome;
use crate::classify::{ClassifiedChange, Severity};
use crate::pipeline::{RunOutcome, RunReport};
use crate::types::{AnalysisResult, HealthState, SourceHealth};

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn severity_cell(severity: Severity) -> Cell {
    let color = match severity {
        Severity::Critical => Color::Red,
        Severity::High => Color::DarkYellow,
        Severity::Medium => Color::Yellow,
        Severity::Low => Color::Green,
    };
    Cell::new(severity.as_str().to_uppercase()).fg(color)
}

fn change_row(change: &ClassifiedChange, breaking: bool) -> Row {
    let breaking_cell = if breaking {
        Cell::new("YES").fg(Color::Red)
    } else {
        Cell::new("NO").fg(Color::Green)
    };
    Row::from(vec![
        severity_cell(change.severity),
        breaking_cell,
        Cell::new(change.kind.to_string()),
        Cell::new(&change.path),
        Cell::new(&change.description),
        Cell::new(&change.recommendation),
    ])
}

pub fn render_changes_table(analysis: &AnalysisResult) -> String {
    let mut table = new_table();
    table.set_header(vec![
        "Severity",
        "Breaking",
        "Kind",
        "Path",
        "Description",
        "Recommendation",
    ]);
    for change in &analysis.breaking_changes {
        table.add_row(change_row(change, true));
    }
    for change in &analysis.non_breaking_changes {
        table.add_row(change_row(change, false));
    }
    table.to_string()
}

pub fn render_reports_table(reports: &[RunReport]) -> String {
    let mut table = new_table();
    table.set_header(vec![
        "Source",
        "Project",
        "Outcome",
        "Version",
        "Breaking",
        "Severity",
        "Alerts",
        "Error",
    ]);
    for report in reports {
        let outcome = match report.outcome {
            RunOutcome::Unchanged => Cell::new("unchanged"),
            RunOutcome::Baseline => Cell::new("baseline").fg(Color::Cyan),
            RunOutcome::Analyzed => Cell::new("analyzed").fg(Color::Green),
            RunOutcome::Failed => Cell::new("failed").fg(Color::Red),
        };
        let (breaking, severity) = match &report.analysis {
            Some(analysis) => (
                Cell::new(analysis.breaking_changes.len()),
                severity_cell(analysis.overall_severity),
            ),
            None => (Cell::new("-"), Cell::new("-")),
        };
        let delivered = report.alerts.iter().filter(|a| a.success).count();
        table.add_row(Row::from(vec![
            Cell::new(&report.source_id),
            Cell::new(&report.project_id),
            outcome,
            Cell::new(
                report
                    .version_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            breaking,
            severity,
            Cell::new(format!("{delivered}/{}", report.alerts.len())),
            Cell::new(report.error.as_deref().unwrap_or("")),
        ]));
    }
    table.to_string()
}

pub fn render_outcomes_table(outcomes: &[AlertDispatchOutcome]) -> String {
    let mut table = new_table();
    table.set_header(vec!["Channel", "Delivered", "Retriable", "Message"]);
    for outcome in outcomes {
        let delivered = if outcome.success {
            Cell::new("YES").fg(Color::Green)
        } else {
            Cell::new("NO").fg(Color::Red)
        };
        table.add_row(Row::from(vec![
            Cell::new(outcome.channel_type.as_str()),
            delivered,
            Cell::new(
                outcome
                    .retriable
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(&outcome.message),
        ]));
    }
    table.to_string()
}

pub fn render_health_table(sources: &[SourceHealth]) -> String {
    let mut table = new_table();
    table.set_header(vec!["Source", "Project", "State", "Last Error", "At"]);
    for source in sources {
        let state = match source.state {
            HealthState::Healthy => Cell::new("healthy").fg(Color::Green),
            HealthState::Error => Cell::new("error").fg(Color::Red),
        };
        table.add_row(Row::from(vec![
            Cell::new(&source.source_id),
            Cell::new(&source.project_id),
            state,
            Cell::new(source.last_error.as_deref().unwrap_or("")),
            Cell::new(
                source
                    .last_error_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_default(),
            ),
        ]));
    }
    table.to_string()
}
