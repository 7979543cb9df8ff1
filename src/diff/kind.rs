use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChangeKind {
    EndpointRemoved,
    EndpointAdded,
    MethodRemoved,
    MethodAdded,
    RequiredParamAdded,
    OptionalParamAdded,
    ParamRemoved,
    ParamBecameRequired,
    ParamBecameOptional,
    RequiredBodyAdded,
    OptionalBodyAdded,
    RequestBodyRemoved,
    ResponseStatusRemoved,
    ResponseStatusAdded,
    ResponseFieldRemoved,
    FieldAdded,
    FieldTypeChanged,
    EnumValueRemoved,
    EnumValueAdded,
    Other(String),
}

impl ChangeKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::EndpointRemoved => "endpoint_removed",
            Self::EndpointAdded => "endpoint_added",
            Self::MethodRemoved => "method_removed",
            Self::MethodAdded => "method_added",
            Self::RequiredParamAdded => "required_param_added",
            Self::OptionalParamAdded => "optional_param_added",
            Self::ParamRemoved => "param_removed",
            Self::ParamBecameRequired => "param_became_required",
            Self::ParamBecameOptional => "param_became_optional",
            Self::RequiredBodyAdded => "required_body_added",
            Self::OptionalBodyAdded => "optional_body_added",
            Self::RequestBodyRemoved => "request_body_removed",
            Self::ResponseStatusRemoved => "response_status_removed",
            Self::ResponseStatusAdded => "response_status_added",
            Self::ResponseFieldRemoved => "response_field_removed",
            Self::FieldAdded => "field_added",
            Self::FieldTypeChanged => "field_type_changed",
            Self::EnumValueRemoved => "enum_value_removed",
            Self::EnumValueAdded => "enum_value_added",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for ChangeKind {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "endpoint_removed" => Self::EndpointRemoved,
            "endpoint_added" => Self::EndpointAdded,
            "method_removed" => Self::MethodRemoved,
            "method_added" => Self::MethodAdded,
            "required_param_added" => Self::RequiredParamAdded,
            "optional_param_added" => Self::OptionalParamAdded,
            "param_removed" => Self::ParamRemoved,
            "param_became_required" => Self::ParamBecameRequired,
            "param_became_optional" => Self::ParamBecameOptional,
            "required_body_added" => Self::RequiredBodyAdded,
            "optional_body_added" => Self::OptionalBodyAdded,
            "request_body_removed" => Self::RequestBodyRemoved,
            "response_status_removed" => Self::ResponseStatusRemoved,
            "response_status_added" => Self::ResponseStatusAdded,
            "response_field_removed" => Self::ResponseFieldRemoved,
            "field_added" => Self::FieldAdded,
            "field_type_changed" => Self::FieldTypeChanged,
            "enum_value_removed" => Self::EnumValueRemoved,
            "enum_value_added" => Self::EnumValueAdded,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for ChangeKind {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<ChangeKind> for String {
    fn from(value: ChangeKind) -> Self {
        value.as_str().to_string()
    }
}

impl Display for ChangeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::ChangeKind;

    #[test]
    fn known_kinds_round_trip_through_their_tags() {
        let kind: ChangeKind = serde_json::from_str("\"endpoint_removed\"").unwrap();
        assert_eq!(kind, ChangeKind::EndpointRemoved);
        assert_eq!(
            serde_json::to_string(&ChangeKind::OptionalParamAdded).unwrap(),
            "\"optional_param_added\""
        );
    }

    #[test]
    fn unknown_tags_are_kept_verbatim() {
        let kind = ChangeKind::from("operation_deprecated");
        assert_eq!(kind, ChangeKind::Other("operation_deprecated".to_string()));
        assert_eq!(kind.to_string(), "operation_deprecated");
    }
}
