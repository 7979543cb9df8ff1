pub mod rules;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::diff::{ChangeKind, FieldDelta, SchemaComparison};
use crate::types::AnalysisResult;

pub use rules::{rule_for, Rule, Severity, UNCLASSIFIED};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedChange {
    pub kind: ChangeKind,
    pub path: String,
    pub description: String,
    pub severity: Severity,
    pub impact: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub breaking_changes: Vec<ClassifiedChange>,
    pub non_breaking_changes: Vec<ClassifiedChange>,
    pub overall_severity: Severity,
    pub summary: String,
    pub unclassified: Vec<ChangeKind>,
}

impl Classification {
    pub fn into_analysis(self, old_version_id: Option<i64>, new_version_id: Option<i64>) -> AnalysisResult {
        AnalysisResult {
            breaking_changes: self.breaking_changes,
            non_breaking_changes: self.non_breaking_changes,
            overall_severity: self.overall_severity,
            summary: self.summary,
            old_version_id,
            new_version_id,
        }
    }
}

pub fn classify(comparison: &SchemaComparison) -> Classification {
    classify_deltas(&flatten(comparison))
}

pub fn classify_deltas(deltas: &[FieldDelta]) -> Classification {
    let mut breaking_changes = Vec::new();
    let mut non_breaking_changes = Vec::new();
    let mut unclassified = Vec::new();

    for delta in deltas {
        let rule = match rule_for(&delta.kind) {
            Some(rule) => rule,
            None => {
                warn!(
                    kind = %delta.kind,
                    location = %delta.location,
                    "unclassified change kind, treating as non-breaking"
                );
                unclassified.push(delta.kind.clone());
                UNCLASSIFIED
            }
        };
        let change = ClassifiedChange {
            kind: delta.kind.clone(),
            path: delta.location.clone(),
            description: describe(delta),
            severity: rule.severity,
            impact: rule.impact.to_string(),
            recommendation: rule.recommendation.to_string(),
        };
        if rule.breaking {
            breaking_changes.push(change);
        } else {
            non_breaking_changes.push(change);
        }
    }

    let overall_severity = overall_severity(&breaking_changes);
    let summary = summarize(&breaking_changes, &non_breaking_changes);
    Classification {
        breaking_changes,
        non_breaking_changes,
        overall_severity,
        summary,
        unclassified,
    }
}

pub fn overall_severity(breaking: &[ClassifiedChange]) -> Severity {
    breaking
        .iter()
        .map(|c| c.severity)
        .max()
        .unwrap_or(Severity::Low)
}

pub fn summarize(breaking: &[ClassifiedChange], non_breaking: &[ClassifiedChange]) -> String {
    if breaking.is_empty() {
        return format!(
            "No breaking changes detected; {} non-breaking change(s).",
            non_breaking.len()
        );
    }
    let buckets = Severity::DESCENDING
        .iter()
        .filter_map(|severity| {
            let count = breaking.iter().filter(|c| c.severity == *severity).count();
            (count > 0).then(|| format!("{count} {severity}"))
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{} breaking change(s) ({buckets}); {} non-breaking change(s).",
        breaking.len(),
        non_breaking.len()
    )
}

pub fn flatten(comparison: &SchemaComparison) -> Vec<FieldDelta> {
    let mut out = Vec::new();
    for path in &comparison.removed_paths {
        out.push(FieldDelta::new(ChangeKind::EndpointRemoved, path));
    }
    for path in &comparison.added_paths {
        out.push(FieldDelta::new(ChangeKind::EndpointAdded, path));
    }
    for delta in &comparison.modified_paths {
        for method in &delta.removed_methods {
            out.push(FieldDelta::new(
                ChangeKind::MethodRemoved,
                format!("{method} {}", delta.path),
            ));
        }
        for method in &delta.added_methods {
            out.push(FieldDelta::new(
                ChangeKind::MethodAdded,
                format!("{method} {}", delta.path),
            ));
        }
        for method in &delta.modified_methods {
            out.extend(method.changes.iter().cloned());
        }
    }
    out.extend(comparison.schema_changes.iter().cloned());
    out
}

fn describe(delta: &FieldDelta) -> String {
    let loc = &delta.location;
    let field = delta.field.as_deref().unwrap_or("?");
    let value = delta.value.as_deref().unwrap_or("?");
    let old_type = delta.old_type.as_deref().unwrap_or("unknown");
    let new_type = delta.new_type.as_deref().unwrap_or("unknown");
    match &delta.kind {
        ChangeKind::EndpointRemoved => format!("Endpoint {loc} was removed"),
        ChangeKind::EndpointAdded => format!("Endpoint {loc} was added"),
        ChangeKind::MethodRemoved => format!("Operation {loc} was removed"),
        ChangeKind::MethodAdded => format!("Operation {loc} was added"),
        ChangeKind::RequiredParamAdded => {
            format!("{loc}: new required {value} parameter '{field}'")
        }
        ChangeKind::OptionalParamAdded => {
            format!("{loc}: new optional {value} parameter '{field}'")
        }
        ChangeKind::ParamRemoved => format!("{loc}: {value} parameter '{field}' was removed"),
        ChangeKind::ParamBecameRequired => format!("{loc}: '{field}' is now required"),
        ChangeKind::ParamBecameOptional => format!("{loc}: '{field}' is now optional"),
        ChangeKind::RequiredBodyAdded => format!("{loc}: a required request body was introduced"),
        ChangeKind::OptionalBodyAdded => {
            format!("{loc}: an optional request body was introduced")
        }
        ChangeKind::RequestBodyRemoved => format!("{loc}: the request body was removed"),
        ChangeKind::ResponseStatusRemoved => {
            format!("{loc}: response status {value} is no longer documented")
        }
        ChangeKind::ResponseStatusAdded => format!("{loc}: response status {value} was added"),
        ChangeKind::ResponseFieldRemoved => format!("{loc}: field '{field}' was removed"),
        ChangeKind::FieldAdded => format!("{loc}: field '{field}' was added"),
        ChangeKind::FieldTypeChanged => match &delta.field {
            Some(field) => {
                format!("{loc}: type of '{field}' changed from {old_type} to {new_type}")
            }
            None => format!("{loc}: type changed from {old_type} to {new_type}"),
        },
        ChangeKind::EnumValueRemoved => match &delta.field {
            Some(field) => format!("{loc}: value '{value}' removed from enum '{field}'"),
            None => format!("{loc}: enum value '{value}' was removed"),
        },
        ChangeKind::EnumValueAdded => match &delta.field {
            Some(field) => format!("{loc}: value '{value}' added to enum '{field}'"),
            None => format!("{loc}: enum value '{value}' was added"),
        },
        ChangeKind::Other(kind) => format!("{loc}: unclassified change '{kind}'"),
    }
}
