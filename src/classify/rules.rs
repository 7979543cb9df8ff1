use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::diff::ChangeKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const DESCENDING: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub breaking: bool,
    pub severity: Severity,
    pub impact: &'static str,
    pub recommendation: &'static str,
}

impl Rule {
    const fn breaking(
        severity: Severity,
        impact: &'static str,
        recommendation: &'static str,
    ) -> Self {
        Self {
            breaking: true,
            severity,
            impact,
            recommendation,
        }
    }

    const fn safe(impact: &'static str, recommendation: &'static str) -> Self {
        Self {
            breaking: false,
            severity: Severity::Low,
            impact,
            recommendation,
        }
    }
}

pub const UNCLASSIFIED: Rule = Rule::safe(
    "Unrecognized change; client impact could not be determined.",
    "Review this change manually before release.",
);

/// The single severity table. New kinds are added here and nowhere else.
pub fn rule_for(kind: &ChangeKind) -> Option<Rule> {
    let rule = match kind {
        ChangeKind::EndpointRemoved => Rule::breaking(
            Severity::Critical,
            "Clients calling this endpoint will receive 404 errors.",
            "Restore the endpoint or deprecate it first and publish a migration path.",
        ),
        ChangeKind::MethodRemoved => Rule::breaking(
            Severity::Critical,
            "Clients using this operation will receive 404/405 errors.",
            "Keep the operation available until clients have migrated.",
        ),
        ChangeKind::RequiredParamAdded => Rule::breaking(
            Severity::Critical,
            "Existing requests omit the new parameter and will be rejected.",
            "Make the parameter optional with a server-side default.",
        ),
        ChangeKind::ParamBecameRequired => Rule::breaking(
            Severity::High,
            "Requests that omit this parameter will start failing validation.",
            "Keep the parameter optional or provide a default value.",
        ),
        ChangeKind::ResponseFieldRemoved => Rule::breaking(
            Severity::High,
            "Clients reading this field will get missing data or crash while parsing.",
            "Keep returning the field, marked deprecated, until clients stop reading it.",
        ),
        ChangeKind::FieldTypeChanged => Rule::breaking(
            Severity::High,
            "Clients will fail to serialize or deserialize values of the new type.",
            "Add a new field with the new type and deprecate the old one.",
        ),
        ChangeKind::EnumValueRemoved => Rule::breaking(
            Severity::Medium,
            "Clients sending or expecting the removed value will fail.",
            "Continue accepting the value and map it to a supported one.",
        ),
        ChangeKind::RequiredBodyAdded => Rule::breaking(
            Severity::High,
            "Requests sent without a body will be rejected.",
            "Make the request body optional.",
        ),
        ChangeKind::RequestBodyRemoved => Rule::breaking(
            Severity::Medium,
            "Data clients send in the request body will be ignored or rejected.",
            "Keep accepting the body until clients have migrated.",
        ),
        ChangeKind::ResponseStatusRemoved => Rule::breaking(
            Severity::Medium,
            "Clients handling this status code may mis-handle the replacement response.",
            "Document the replacement status and keep returning the old one during migration.",
        ),
        ChangeKind::EndpointAdded => Rule::safe(
            "New endpoint; existing clients are unaffected.",
            "Document the endpoint for consumers.",
        ),
        ChangeKind::MethodAdded => Rule::safe(
            "New operation; existing clients are unaffected.",
            "Document the operation for consumers.",
        ),
        ChangeKind::OptionalParamAdded => Rule::safe(
            "Optional parameter; existing requests remain valid.",
            "No action required.",
        ),
        ChangeKind::FieldAdded => Rule::safe(
            "Additive field; tolerant clients ignore unknown fields.",
            "No action required.",
        ),
        ChangeKind::ParamRemoved => Rule::safe(
            "Servers ignore the removed parameter if clients keep sending it.",
            "Tell clients they can stop sending the parameter.",
        ),
        ChangeKind::ParamBecameOptional => Rule::safe(
            "Relaxed requirement; existing requests remain valid.",
            "No action required.",
        ),
        ChangeKind::OptionalBodyAdded => Rule::safe(
            "Optional request body; existing requests remain valid.",
            "No action required.",
        ),
        ChangeKind::ResponseStatusAdded => Rule::safe(
            "New documented status code.",
            "Let clients know they may receive this status.",
        ),
        ChangeKind::EnumValueAdded => Rule::safe(
            "New enum value; strict clients may need to handle it.",
            "Announce the new value to consumers.",
        ),
        ChangeKind::Other(_) => return None,
    };
    Some(rule)
}
