use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use similar::{ChangeTag, TextDiff};

use crate::diff::{ChangeKind, FieldDelta, MethodDelta, PathDelta, SchemaComparison};
use crate::document::{ApiDocument, BodyShape, FieldDef, HttpMethod, ObjectShape, Operation};
use crate::error::PipelineError;

pub fn compare_values(old: &Value, new: &Value) -> Result<SchemaComparison, PipelineError> {
    let old_doc = ApiDocument::from_value(old)?;
    let new_doc = ApiDocument::from_value(new)?;
    compare(&old_doc, &new_doc)
}

pub fn compare(old: &ApiDocument, new: &ApiDocument) -> Result<SchemaComparison, PipelineError> {
    let mut comparison = SchemaComparison::default();

    for path in old.paths.keys() {
        if !new.paths.contains_key(path) {
            comparison.removed_paths.push(path.clone());
        }
    }
    for path in new.paths.keys() {
        if !old.paths.contains_key(path) {
            comparison.added_paths.push(path.clone());
        }
    }

    for (path, old_item) in &old.paths {
        let Some(new_item) = new.paths.get(path) else {
            continue;
        };
        let mut delta = PathDelta::new(path);
        for method in HttpMethod::ALL {
            match (
                old_item.operations.get(&method),
                new_item.operations.get(&method),
            ) {
                (Some(_), None) => delta.removed_methods.push(method),
                (None, Some(_)) => delta.added_methods.push(method),
                (Some(old_op), Some(new_op)) => {
                    let changes = diff_operation(path, method, old_op, new_op, old, new)?;
                    if !changes.is_empty() {
                        delta.modified_methods.push(MethodDelta { method, changes });
                    }
                }
                (None, None) => {}
            }
        }
        if !delta.is_empty() {
            comparison.modified_paths.push(delta);
        }
    }

    for (name, old_schema) in &old.schemas {
        if let Some(new_schema) = new.schemas.get(name) {
            diff_shape(
                &format!("schema {name}"),
                old_schema,
                new_schema,
                &mut comparison.schema_changes,
            );
        }
    }

    Ok(comparison)
}

fn diff_operation(
    path: &str,
    method: HttpMethod,
    old: &Operation,
    new: &Operation,
    old_doc: &ApiDocument,
    new_doc: &ApiDocument,
) -> Result<Vec<FieldDelta>, PipelineError> {
    let location = format!("{method} {path}");
    let mut changes = Vec::new();

    let keys = old
        .parameters
        .keys()
        .chain(new.parameters.keys())
        .collect::<BTreeSet<_>>();
    for key in keys {
        match (old.parameters.get(key), new.parameters.get(key)) {
            (None, Some(param)) => {
                let kind = if param.required {
                    ChangeKind::RequiredParamAdded
                } else {
                    ChangeKind::OptionalParamAdded
                };
                changes.push(
                    FieldDelta::new(kind, &location)
                        .with_field(&param.name)
                        .with_types(None, param.type_name.clone())
                        .with_value(param.location.to_string()),
                );
            }
            (Some(param), None) => changes.push(
                FieldDelta::new(ChangeKind::ParamRemoved, &location)
                    .with_field(&param.name)
                    .with_types(param.type_name.clone(), None)
                    .with_value(param.location.to_string()),
            ),
            (Some(before), Some(after)) => {
                if !before.required && after.required {
                    changes.push(
                        FieldDelta::new(ChangeKind::ParamBecameRequired, &location)
                            .with_field(&after.name)
                            .with_value(after.location.to_string()),
                    );
                } else if before.required && !after.required {
                    changes.push(
                        FieldDelta::new(ChangeKind::ParamBecameOptional, &location)
                            .with_field(&after.name)
                            .with_value(after.location.to_string()),
                    );
                }
                if let (Some(old_type), Some(new_type)) = (&before.type_name, &after.type_name) {
                    if old_type != new_type {
                        changes.push(
                            FieldDelta::new(ChangeKind::FieldTypeChanged, &location)
                                .with_field(&after.name)
                                .with_types(Some(old_type.clone()), Some(new_type.clone()))
                                .with_value(after.location.to_string()),
                        );
                    }
                }
            }
            (None, None) => {}
        }
    }

    match (&old.request_body, &new.request_body) {
        (None, Some(body)) => {
            let kind = if body.required {
                ChangeKind::RequiredBodyAdded
            } else {
                ChangeKind::OptionalBodyAdded
            };
            changes.push(FieldDelta::new(kind, &location).with_field("requestBody"));
        }
        (Some(_), None) => changes.push(
            FieldDelta::new(ChangeKind::RequestBodyRemoved, &location).with_field("requestBody"),
        ),
        (Some(before), Some(after)) if !before.required && after.required => changes.push(
            FieldDelta::new(ChangeKind::ParamBecameRequired, &location)
                .with_field("requestBody")
                .with_value("body"),
        ),
        _ => {}
    }

    for status in old.responses.keys() {
        if !new.responses.contains_key(status) {
            changes.push(
                FieldDelta::new(ChangeKind::ResponseStatusRemoved, &location).with_value(status),
            );
        }
    }
    for status in new.responses.keys() {
        if !old.responses.contains_key(status) {
            changes.push(
                FieldDelta::new(ChangeKind::ResponseStatusAdded, &location).with_value(status),
            );
        }
    }
    for (status, old_response) in &old.responses {
        let Some(new_response) = new.responses.get(status) else {
            continue;
        };
        let response_location = format!("{location} {status}");
        match (&old_response.body, &new_response.body) {
            (Some(BodyShape::Named(a)), Some(BodyShape::Named(b))) if a == b => {}
            (None, None) => {}
            (before, after) => {
                let before = body_fields(before.as_ref(), old_doc)?;
                let after = body_fields(after.as_ref(), new_doc)?;
                diff_fields(&response_location, &before, &after, &mut changes);
            }
        }
    }

    Ok(changes)
}

fn body_fields(
    body: Option<&BodyShape>,
    doc: &ApiDocument,
) -> Result<BTreeMap<String, FieldDef>, PipelineError> {
    match body {
        None => Ok(BTreeMap::new()),
        Some(BodyShape::Inline(shape)) => Ok(shape.fields.clone()),
        Some(BodyShape::Named(name)) => doc
            .schemas
            .get(name)
            .map(|shape| shape.fields.clone())
            .ok_or_else(|| {
                PipelineError::Diff(format!("response references unknown schema `{name}`"))
            }),
    }
}

fn diff_shape(location: &str, old: &ObjectShape, new: &ObjectShape, out: &mut Vec<FieldDelta>) {
    if old.type_name != new.type_name {
        out.push(
            FieldDelta::new(ChangeKind::FieldTypeChanged, location)
                .with_types(Some(old.type_name.clone()), Some(new.type_name.clone())),
        );
    }
    diff_enum(location, None, &old.enum_values, &new.enum_values, out);
    diff_fields(location, &old.fields, &new.fields, out);
}

fn diff_fields(
    location: &str,
    old: &BTreeMap<String, FieldDef>,
    new: &BTreeMap<String, FieldDef>,
    out: &mut Vec<FieldDelta>,
) {
    let names = old.keys().chain(new.keys()).collect::<BTreeSet<_>>();
    for name in names {
        match (old.get(name), new.get(name)) {
            (Some(field), None) => out.push(
                FieldDelta::new(ChangeKind::ResponseFieldRemoved, location)
                    .with_field(name)
                    .with_types(Some(field.type_name.clone()), None),
            ),
            (None, Some(field)) => out.push(
                FieldDelta::new(ChangeKind::FieldAdded, location)
                    .with_field(name)
                    .with_types(None, Some(field.type_name.clone())),
            ),
            (Some(before), Some(after)) => {
                if before.type_name != after.type_name {
                    out.push(
                        FieldDelta::new(ChangeKind::FieldTypeChanged, location)
                            .with_field(name)
                            .with_types(
                                Some(before.type_name.clone()),
                                Some(after.type_name.clone()),
                            ),
                    );
                }
                diff_enum(
                    location,
                    Some(name),
                    &before.enum_values,
                    &after.enum_values,
                    out,
                );
            }
            (None, None) => {}
        }
    }
}

fn diff_enum(
    location: &str,
    field: Option<&str>,
    old: &[String],
    new: &[String],
    out: &mut Vec<FieldDelta>,
) {
    // An enum constraint introduced or dropped entirely is not a value-level change.
    if old.is_empty() || new.is_empty() {
        return;
    }
    for value in old.iter().filter(|v| !new.contains(v)) {
        let mut delta = FieldDelta::new(ChangeKind::EnumValueRemoved, location).with_value(value);
        delta.field = field.map(ToString::to_string);
        out.push(delta);
    }
    for value in new.iter().filter(|v| !old.contains(v)) {
        let mut delta = FieldDelta::new(ChangeKind::EnumValueAdded, location).with_value(value);
        delta.field = field.map(ToString::to_string);
        out.push(delta);
    }
}

pub fn textual_diff(old: &Value, new: &Value) -> String {
    let old_str = serde_json::to_string_pretty(old).unwrap_or_default();
    let new_str = serde_json::to_string_pretty(new).unwrap_or_default();
    let diff = TextDiff::from_lines(&old_str, &new_str);
    let mut out = String::new();
    for change in diff.iter_all_changes() {
        let symbol = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => " ",
        };
        out.push_str(symbol);
        out.push_str(change.value());
        if change.missing_newline() {
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    fn users_doc() -> Value {
        json!({
            "openapi": "3.0.0",
            "paths": {
                "/users": {
                    "get": { "responses": { "200": { "description": "ok" } } }
                }
            }
        })
    }

    #[test]
    fn removed_path_is_reported_once() {
        let new = json!({ "openapi": "3.0.0", "paths": {} });
        let comparison = compare_values(&users_doc(), &new).unwrap();
        assert_eq!(comparison.removed_paths, vec!["/users".to_string()]);
        assert!(comparison.added_paths.is_empty());
        assert!(comparison.modified_paths.is_empty());
    }

    #[test]
    fn baseline_against_empty_document_is_all_additions() {
        let comparison = compare_values(&json!({}), &users_doc()).unwrap();
        assert_eq!(comparison.added_paths, vec!["/users".to_string()]);
        assert!(comparison.removed_paths.is_empty());
    }

    #[test]
    fn method_sets_are_diffed_per_path() {
        let new = json!({
            "paths": {
                "/users": {
                    "post": { "responses": { "201": { "description": "created" } } }
                }
            }
        });
        let comparison = compare_values(&users_doc(), &new).unwrap();
        let delta = &comparison.modified_paths[0];
        assert_eq!(delta.removed_methods, vec![HttpMethod::Get]);
        assert_eq!(delta.added_methods, vec![HttpMethod::Post]);
    }

    #[test]
    fn optional_query_parameter_addition() {
        let old = json!({ "paths": { "/items": { "get": { "responses": {} } } } });
        let new = json!({
            "paths": {
                "/items": {
                    "get": {
                        "parameters": [
                            { "name": "limit", "in": "query", "schema": { "type": "integer" } }
                        ],
                        "responses": {}
                    }
                }
            }
        });
        let comparison = compare_values(&old, &new).unwrap();
        let changes = &comparison.modified_paths[0].modified_methods[0].changes;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::OptionalParamAdded);
        assert_eq!(changes[0].field.as_deref(), Some("limit"));
        assert_eq!(changes[0].value.as_deref(), Some("query"));
        assert_eq!(changes[0].location, "GET /items");
    }

    #[test]
    fn required_flip_and_type_change_are_detected() {
        let old = json!({
            "paths": { "/items": { "get": {
                "parameters": [{ "name": "page", "in": "query", "schema": { "type": "integer" } }],
                "responses": {}
            } } }
        });
        let new = json!({
            "paths": { "/items": { "get": {
                "parameters": [{ "name": "page", "in": "query", "required": true, "schema": { "type": "string" } }],
                "responses": {}
            } } }
        });
        let comparison = compare_values(&old, &new).unwrap();
        let kinds = comparison.modified_paths[0].modified_methods[0]
            .changes
            .iter()
            .map(|c| c.kind.clone())
            .collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![ChangeKind::ParamBecameRequired, ChangeKind::FieldTypeChanged]
        );
    }

    #[test]
    fn required_body_field_is_a_required_param() {
        let body = |props: Value, required: Value| {
            json!({
                "paths": { "/signup": { "post": {
                    "requestBody": {
                        "required": true,
                        "content": { "application/json": { "schema": {
                            "type": "object", "properties": props, "required": required
                        } } }
                    },
                    "responses": { "201": { "description": "created" } }
                } } }
            })
        };
        let old = body(json!({ "name": { "type": "string" } }), json!(["name"]));
        let new = body(
            json!({ "name": { "type": "string" }, "email": { "type": "string" } }),
            json!(["name", "email"]),
        );
        let comparison = compare_values(&old, &new).unwrap();
        let changes = &comparison.modified_paths[0].modified_methods[0].changes;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::RequiredParamAdded);
        assert_eq!(changes[0].field.as_deref(), Some("email"));
        assert_eq!(changes[0].value.as_deref(), Some("body"));
    }

    #[test]
    fn status_codes_and_inline_response_fields() {
        let old = json!({ "paths": { "/me": { "get": { "responses": {
            "200": { "content": { "application/json": { "schema": {
                "properties": { "id": { "type": "string" }, "age": { "type": "integer" } }
            } } } },
            "404": { "description": "missing" }
        } } } } });
        let new = json!({ "paths": { "/me": { "get": { "responses": {
            "200": { "content": { "application/json": { "schema": {
                "properties": { "id": { "type": "integer" } }
            } } } }
        } } } } });
        let comparison = compare_values(&old, &new).unwrap();
        let changes = &comparison.modified_paths[0].modified_methods[0].changes;
        let kinds = changes.iter().map(|c| c.kind.clone()).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                ChangeKind::ResponseStatusRemoved,
                ChangeKind::ResponseFieldRemoved,
                ChangeKind::FieldTypeChanged,
            ]
        );
        assert_eq!(changes[1].location, "GET /me 200");
        assert_eq!(changes[1].field.as_deref(), Some("age"));
    }

    #[test]
    fn nested_pointer_response_refs_are_compared_inline() {
        let doc = |data_props: Value| {
            json!({
                "paths": { "/users": { "get": { "responses": {
                    "200": { "content": { "application/json": { "schema": {
                        "$ref": "#/components/schemas/Wrapper/properties/data"
                    } } } }
                } } } },
                "components": { "schemas": {
                    "Wrapper": { "type": "object", "properties": {
                        "data": { "type": "object", "properties": data_props }
                    } }
                } }
            })
        };
        let old = doc(json!({ "id": { "type": "string" }, "email": { "type": "string" } }));
        let new = doc(json!({ "id": { "type": "string" } }));

        let comparison = compare_values(&old, &new).unwrap();
        let changes = &comparison.modified_paths[0].modified_methods[0].changes;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::ResponseFieldRemoved);
        assert_eq!(changes[0].location, "GET /users 200");
        assert_eq!(changes[0].field.as_deref(), Some("email"));
    }

    #[test]
    fn component_schemas_report_field_and_enum_changes() {
        let old = json!({ "components": { "schemas": {
            "Order": { "type": "object", "properties": {
                "id": { "type": "string" },
                "note": { "type": "string" },
                "state": { "type": "string", "enum": ["open", "closed", "void"] }
            } },
            "Legacy": { "type": "object" }
        } } });
        let new = json!({ "components": { "schemas": {
            "Order": { "type": "object", "properties": {
                "id": { "type": "integer" },
                "state": { "type": "string", "enum": ["open", "closed", "held"] },
                "total": { "type": "number" }
            } }
        } } });
        let comparison = compare_values(&old, &new).unwrap();
        let summary = comparison
            .schema_changes
            .iter()
            .map(|c| (c.kind.clone(), c.field.clone(), c.value.clone()))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            vec![
                (ChangeKind::FieldTypeChanged, Some("id".to_string()), None),
                (ChangeKind::ResponseFieldRemoved, Some("note".to_string()), None),
                (
                    ChangeKind::EnumValueRemoved,
                    Some("state".to_string()),
                    Some("void".to_string())
                ),
                (
                    ChangeKind::EnumValueAdded,
                    Some("state".to_string()),
                    Some("held".to_string())
                ),
                (ChangeKind::FieldAdded, Some("total".to_string()), None),
            ]
        );
        assert!(comparison
            .schema_changes
            .iter()
            .all(|c| c.location == "schema Order"));
    }

    #[test]
    fn repeated_comparisons_are_byte_identical() {
        let old = users_doc();
        let new = json!({ "paths": {
            "/users": { "get": {
                "parameters": [
                    { "name": "b", "in": "query" },
                    { "name": "a", "in": "header", "required": true }
                ],
                "responses": { "200": {}, "500": {} }
            } },
            "/teams": { "get": { "responses": {} } }
        } });
        let first = serde_json::to_string(&compare_values(&old, &new).unwrap()).unwrap();
        for _ in 0..5 {
            let again = serde_json::to_string(&compare_values(&old, &new).unwrap()).unwrap();
            assert_eq!(first, again);
        }
    }

    #[test]
    fn unresolvable_document_fails_only_the_comparison() {
        let broken = json!({ "paths": { "/x": { "$ref": "#/missing" } } });
        assert!(matches!(
            compare_values(&users_doc(), &broken),
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn textual_diff_marks_changed_lines() {
        let diff = textual_diff(&json!({ "a": 1 }), &json!({ "a": 2 }));
        assert!(diff.contains("-  \"a\": 1"));
        assert!(diff.contains("+  \"a\": 2"));
    }
}
