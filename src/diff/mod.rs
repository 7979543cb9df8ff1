pub mod differ;
pub mod kind;

use serde::{Deserialize, Serialize};

use crate::document::HttpMethod;

pub use differ::{compare, compare_values, textual_diff};
pub use kind::ChangeKind;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaComparison {
    pub removed_paths: Vec<String>,
    pub added_paths: Vec<String>,
    pub modified_paths: Vec<PathDelta>,
    pub schema_changes: Vec<FieldDelta>,
}

impl SchemaComparison {
    pub fn is_empty(&self) -> bool {
        self.removed_paths.is_empty()
            && self.added_paths.is_empty()
            && self.modified_paths.is_empty()
            && self.schema_changes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathDelta {
    pub path: String,
    pub removed_methods: Vec<HttpMethod>,
    pub added_methods: Vec<HttpMethod>,
    pub modified_methods: Vec<MethodDelta>,
}

impl PathDelta {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            removed_methods: Vec::new(),
            added_methods: Vec::new(),
            modified_methods: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.removed_methods.is_empty()
            && self.added_methods.is_empty()
            && self.modified_methods.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodDelta {
    pub method: HttpMethod,
    pub changes: Vec<FieldDelta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDelta {
    pub kind: ChangeKind,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl FieldDelta {
    pub fn new(kind: ChangeKind, location: impl Into<String>) -> Self {
        Self {
            kind,
            location: location.into(),
            field: None,
            old_type: None,
            new_type: None,
            value: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_types(mut self, old_type: Option<String>, new_type: Option<String>) -> Self {
        self.old_type = old_type;
        self.new_type = new_type;
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}
