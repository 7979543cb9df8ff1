use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::classify::{ClassifiedChange, Severity};
use crate::types::AnalysisResult;

pub const SOURCE_NAME: &str = "breakwatch";

const MAX_LISTED: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct AlertMessage {
    pub project_id: String,
    pub source_id: Option<String>,
    pub title: String,
    pub analysis: AnalysisResult,
    pub timestamp: DateTime<Utc>,
    pub test: bool,
}

impl AlertMessage {
    pub fn for_analysis(project_id: &str, source_id: Option<&str>, analysis: &AnalysisResult) -> Self {
        let count = analysis.breaking_changes.len();
        Self {
            project_id: project_id.to_string(),
            source_id: source_id.map(str::to_string),
            title: format!(
                "{} breaking change(s) detected in {} ({})",
                count, project_id, analysis.overall_severity
            ),
            analysis: analysis.clone(),
            timestamp: Utc::now(),
            test: false,
        }
    }

    pub fn test(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            source_id: None,
            title: format!("Test alert from {SOURCE_NAME}"),
            analysis: AnalysisResult {
                breaking_changes: Vec::new(),
                non_breaking_changes: Vec::new(),
                overall_severity: Severity::Low,
                summary: "This is a test notification. Your alert channel is configured correctly."
                    .to_string(),
                old_version_id: None,
                new_version_id: None,
            },
            timestamp: Utc::now(),
            test: true,
        }
    }

    fn listed(&self) -> (&[ClassifiedChange], usize) {
        let changes = &self.analysis.breaking_changes;
        let shown = changes.len().min(MAX_LISTED);
        (&changes[..shown], changes.len() - shown)
    }

    pub fn plain_text(&self) -> String {
        let mut out = format!("{}\n{}", self.title, self.analysis.summary);
        let (shown, hidden) = self.listed();
        for change in shown {
            out.push_str(&format!(
                "\n- [{}] {}: {}",
                change.severity, change.path, change.description
            ));
        }
        if hidden > 0 {
            out.push_str(&format!("\n...and {hidden} more"));
        }
        out
    }

    pub fn blocks(&self) -> Value {
        let mut blocks = vec![
            json!({
                "type": "header",
                "text": { "type": "plain_text", "text": severity_marker(self.analysis.overall_severity, &self.title) }
            }),
            json!({
                "type": "section",
                "text": { "type": "mrkdwn", "text": self.analysis.summary }
            }),
        ];
        let (shown, hidden) = self.listed();
        for change in shown {
            blocks.push(json!({
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!(
                        "*{}* `{}`\n{}\n_{}_",
                        change.severity, change.path, change.description, change.recommendation
                    )
                }
            }));
        }
        if hidden > 0 {
            blocks.push(json!({
                "type": "context",
                "elements": [{ "type": "mrkdwn", "text": format!("...and {hidden} more breaking change(s)") }]
            }));
        }
        let mut context = format!("Project `{}`", self.project_id);
        if let Some(source) = &self.source_id {
            context.push_str(&format!(" · source `{source}`"));
        }
        blocks.push(json!({
            "type": "context",
            "elements": [{ "type": "mrkdwn", "text": context }]
        }));
        Value::Array(blocks)
    }

    pub fn chat_payload(&self) -> Value {
        json!({ "text": self.plain_text(), "blocks": self.blocks() })
    }

    pub fn email_subject(&self) -> String {
        if self.test {
            self.title.clone()
        } else {
            format!("[{}] {}", self.analysis.overall_severity.as_str().to_uppercase(), self.title)
        }
    }

    pub fn email_html(&self) -> String {
        let mut rows = String::new();
        let (shown, hidden) = self.listed();
        for change in shown {
            rows.push_str(&format!(
                "<tr><td>{}</td><td><code>{}</code></td><td>{}</td><td>{}</td></tr>",
                escape_html(change.severity.as_str()),
                escape_html(&change.path),
                escape_html(&change.description),
                escape_html(&change.recommendation)
            ));
        }
        let mut html = format!(
            "<h2>{}</h2><p>{}</p>",
            escape_html(&self.title),
            escape_html(&self.analysis.summary)
        );
        if !rows.is_empty() {
            html.push_str(
                "<table><thead><tr><th>Severity</th><th>Location</th><th>Change</th><th>Recommendation</th></tr></thead><tbody>",
            );
            html.push_str(&rows);
            html.push_str("</tbody></table>");
        }
        if hidden > 0 {
            html.push_str(&format!("<p>...and {hidden} more breaking change(s).</p>"));
        }
        html.push_str(&format!(
            "<p>Project: {}</p>",
            escape_html(&self.project_id)
        ));
        html
    }

    pub fn email_text(&self) -> String {
        format!("{}\n\nProject: {}", self.plain_text(), self.project_id)
    }

    pub fn envelope(&self) -> Value {
        json!({
            "timestamp": self.timestamp.to_rfc3339(),
            "message": self.plain_text(),
            "source": SOURCE_NAME,
            "type": if self.test { "test" } else { "breaking_change" },
            "projectId": self.project_id,
            "sourceId": self.source_id,
            "analysis": self.analysis,
        })
    }
}

fn severity_marker(severity: Severity, title: &str) -> String {
    let marker = match severity {
        Severity::Critical => ":rotating_light:",
        Severity::High => ":warning:",
        Severity::Medium => ":large_orange_diamond:",
        Severity::Low => ":information_source:",
    };
    format!("{marker} {title}")
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
