pub mod canonical;
pub mod resolve;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::resolve::{ref_name, ref_target, schema_ref_name, Resolver};
use crate::error::PipelineError;

const MAX_SCHEMA_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
    Options,
    Head,
    Patch,
    Trace,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 8] = [
        HttpMethod::Get,
        HttpMethod::Put,
        HttpMethod::Post,
        HttpMethod::Delete,
        HttpMethod::Options,
        HttpMethod::Head,
        HttpMethod::Patch,
        HttpMethod::Trace,
    ];

    pub fn as_key(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Put => "put",
            Self::Post => "post",
            Self::Delete => "delete",
            Self::Options => "options",
            Self::Head => "head",
            Self::Patch => "patch",
            Self::Trace => "trace",
        }
    }
}

impl Display for HttpMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_key().to_ascii_uppercase())
    }
}

impl FromStr for HttpMethod {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|m| m.as_key() == normalized)
            .ok_or_else(|| PipelineError::validation(format!("unknown HTTP method `{s}`")))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Cookie,
    Body,
    FormData,
}

impl Display for ParamLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Path => "path",
            Self::Query => "query",
            Self::Header => "header",
            Self::Cookie => "cookie",
            Self::Body => "body",
            Self::FormData => "formData",
        };
        write!(f, "{label}")
    }
}

impl FromStr for ParamLocation {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "path" => Ok(Self::Path),
            "query" => Ok(Self::Query),
            "header" => Ok(Self::Header),
            "cookie" => Ok(Self::Cookie),
            "body" => Ok(Self::Body),
            "formData" | "formdata" => Ok(Self::FormData),
            other => Err(PipelineError::validation(format!(
                "unknown parameter location `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiDocument {
    pub paths: BTreeMap<String, PathItem>,
    pub schemas: BTreeMap<String, ObjectShape>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathItem {
    pub operations: BTreeMap<HttpMethod, Operation>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Operation {
    // Keyed by (location, name); path-level parameters are already merged in.
    pub parameters: BTreeMap<(ParamLocation, String), Parameter>,
    pub request_body: Option<RequestBody>,
    pub responses: BTreeMap<String, Response>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    pub type_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestBody {
    pub required: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub body: Option<BodyShape>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BodyShape {
    Named(String),
    Inline(ObjectShape),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectShape {
    pub type_name: String,
    pub fields: BTreeMap<String, FieldDef>,
    pub required: BTreeSet<String>,
    pub enum_values: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldDef {
    pub type_name: String,
    pub enum_values: Vec<String>,
}

impl ApiDocument {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_value(root: &Value) -> Result<Self, PipelineError> {
        let object = root
            .as_object()
            .ok_or_else(|| PipelineError::validation("document root must be an object"))?;
        let resolver = Resolver::new(root);
        resolver.check_references()?;

        let mut doc = ApiDocument::default();
        if let Some(paths) = object.get("paths") {
            let paths = paths
                .as_object()
                .ok_or_else(|| PipelineError::validation("`paths` must be an object"))?;
            for (path, item) in paths {
                doc.paths
                    .insert(path.clone(), parse_path_item(&resolver, path, item)?);
            }
        }
        for (name, schema) in schema_definitions(object) {
            doc.schemas
                .insert(name.clone(), parse_shape(&resolver, schema, 0)?);
        }
        Ok(doc)
    }
}

/// Parses raw content as JSON, falling back to YAML. The root must be a mapping.
pub fn parse_content(raw: &str) -> Result<Value, PipelineError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::validation("document is empty"));
    }
    let value = match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => value,
        Err(json_err) => {
            let yaml: serde_yaml::Value = serde_yaml::from_str(trimmed).map_err(|yaml_err| {
                PipelineError::validation(format!(
                    "content is neither JSON ({json_err}) nor YAML ({yaml_err})"
                ))
            })?;
            yaml_to_json(yaml)
        }
    };
    if !value.is_object() {
        return Err(PipelineError::validation("document root must be a mapping"));
    }
    Ok(value)
}

fn yaml_to_json(value: serde_yaml::Value) -> Value {
    use serde_yaml::Value as Yaml;
    match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(items.into_iter().map(yaml_to_json).collect()),
        Yaml::Mapping(mapping) => {
            let mut out = Map::new();
            for (key, child) in mapping {
                out.insert(yaml_key(key), yaml_to_json(child));
            }
            Value::Object(out)
        }
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

// YAML allows non-string keys (`200:` under `responses`).
fn yaml_key(key: serde_yaml::Value) -> String {
    use serde_yaml::Value as Yaml;
    match key {
        Yaml::String(s) => s,
        Yaml::Number(n) => n.to_string(),
        Yaml::Bool(b) => b.to_string(),
        Yaml::Null => "null".to_string(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

fn schema_definitions(object: &Map<String, Value>) -> Vec<(&String, &Value)> {
    let mut out = Vec::new();
    if let Some(schemas) = object
        .get("components")
        .and_then(|c| c.get("schemas"))
        .and_then(Value::as_object)
    {
        out.extend(schemas.iter());
    }
    if let Some(definitions) = object.get("definitions").and_then(Value::as_object) {
        out.extend(definitions.iter());
    }
    out
}

fn parse_path_item(
    resolver: &Resolver<'_>,
    path: &str,
    item: &Value,
) -> Result<PathItem, PipelineError> {
    let item = resolver.follow(item)?;
    let object = item
        .as_object()
        .ok_or_else(|| PipelineError::validation(format!("path item `{path}` must be an object")))?;
    let shared = object
        .get("parameters")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut out = PathItem::default();
    for method in HttpMethod::ALL {
        if let Some(op) = object.get(method.as_key()) {
            let operation = parse_operation(resolver, path, method, op, shared)?;
            out.operations.insert(method, operation);
        }
    }
    Ok(out)
}

fn parse_operation(
    resolver: &Resolver<'_>,
    path: &str,
    method: HttpMethod,
    op: &Value,
    shared: &[Value],
) -> Result<Operation, PipelineError> {
    let op = resolver.follow(op)?;
    let object = op.as_object().ok_or_else(|| {
        PipelineError::validation(format!("operation {method} {path} must be an object"))
    })?;
    let own = object
        .get("parameters")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut out = Operation::default();
    let mut body_shape: Option<ObjectShape> = None;

    for raw in shared.iter().chain(own.iter()) {
        let raw = resolver.follow(raw)?;
        let param = raw.as_object().ok_or_else(|| {
            PipelineError::validation(format!("parameter of {method} {path} must be an object"))
        })?;
        let name = param.get("name").and_then(Value::as_str).ok_or_else(|| {
            PipelineError::validation(format!("parameter of {method} {path} has no name"))
        })?;
        let location: ParamLocation = param
            .get("in")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                PipelineError::validation(format!(
                    "parameter `{name}` of {method} {path} has no location"
                ))
            })?
            .parse()?;
        let required = param
            .get("required")
            .and_then(Value::as_bool)
            .unwrap_or(location == ParamLocation::Path);

        if location == ParamLocation::Body {
            // Swagger 2 body parameter.
            out.request_body = Some(RequestBody { required });
            if let Some(schema) = param.get("schema") {
                body_shape = Some(parse_shape(resolver, schema, 0)?);
            }
            continue;
        }

        out.parameters.insert(
            (location, name.to_string()),
            Parameter {
                name: name.to_string(),
                location,
                required,
                type_name: param_type(resolver, param)?,
            },
        );
    }

    if let Some(body) = object.get("requestBody") {
        let body = resolver.follow(body)?;
        let required = body.get("required").and_then(Value::as_bool).unwrap_or(false);
        out.request_body = Some(RequestBody { required });
        if let Some(schema) = media_schema(body) {
            body_shape = Some(parse_shape(resolver, schema, 0)?);
        }
    }

    if let Some(shape) = body_shape {
        for (field, def) in shape.fields {
            out.parameters.insert(
                (ParamLocation::Body, field.clone()),
                Parameter {
                    required: shape.required.contains(&field),
                    name: field,
                    location: ParamLocation::Body,
                    type_name: Some(def.type_name),
                },
            );
        }
    }

    if let Some(responses) = object.get("responses").and_then(Value::as_object) {
        for (status, response) in responses {
            let response = resolver.follow(response)?;
            let schema = media_schema(response).or_else(|| response.get("schema"));
            let body = match schema {
                Some(schema) => response_shape(resolver, schema)?,
                None => None,
            };
            out.responses.insert(status.clone(), Response { body });
        }
    }

    Ok(out)
}

fn param_type(
    resolver: &Resolver<'_>,
    param: &Map<String, Value>,
) -> Result<Option<String>, PipelineError> {
    if let Some(schema) = param.get("schema") {
        return Ok(Some(type_label(resolver.follow(schema)?, schema)));
    }
    Ok(param
        .get("type")
        .and_then(Value::as_str)
        .map(ToString::to_string))
}

fn media_schema(value: &Value) -> Option<&Value> {
    let content = value.get("content")?.as_object()?;
    content
        .get("application/json")
        .or_else(|| content.values().next())
        .and_then(|media| media.get("schema"))
}

fn response_shape(
    resolver: &Resolver<'_>,
    schema: &Value,
) -> Result<Option<BodyShape>, PipelineError> {
    if let Some(name) = ref_target(schema).and_then(schema_ref_name) {
        return Ok(Some(BodyShape::Named(name.to_string())));
    }
    // Deeper pointers are read in place like an inline schema.
    let shape = parse_shape(resolver, schema, 0)?;
    if shape.fields.is_empty() {
        return Ok(None);
    }
    Ok(Some(BodyShape::Inline(shape)))
}

fn parse_shape(
    resolver: &Resolver<'_>,
    raw: &Value,
    depth: usize,
) -> Result<ObjectShape, PipelineError> {
    if depth > MAX_SCHEMA_DEPTH {
        return Err(PipelineError::validation(
            "schema composition nested too deeply (cyclic allOf?)",
        ));
    }
    let schema = resolver.follow(raw)?;
    let mut shape = ObjectShape {
        type_name: type_label(schema, schema),
        enum_values: enum_values(schema),
        ..ObjectShape::default()
    };

    if let Some(parts) = schema.get("allOf").and_then(Value::as_array) {
        for part in parts {
            let merged = parse_shape(resolver, part, depth + 1)?;
            shape.fields.extend(merged.fields);
            shape.required.extend(merged.required);
        }
        shape.type_name = "object".to_string();
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (name, prop) in properties {
            let resolved = resolver.follow(prop)?;
            shape.fields.insert(
                name.clone(),
                FieldDef {
                    type_name: type_label(resolved, prop),
                    enum_values: if ref_target(prop).is_some() {
                        Vec::new()
                    } else {
                        enum_values(resolved)
                    },
                },
            );
        }
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        shape
            .required
            .extend(required.iter().filter_map(Value::as_str).map(ToString::to_string));
    }
    Ok(shape)
}

fn type_label(resolved: &Value, raw: &Value) -> String {
    if let Some(reference) = ref_target(raw) {
        return ref_name(reference).to_string();
    }
    match resolved.get("type") {
        Some(Value::String(t)) if t == "array" => {
            let item = resolved
                .get("items")
                .map(|items| type_label(items, items))
                .unwrap_or_else(|| "any".to_string());
            format!("array<{item}>")
        }
        Some(Value::String(t)) => t.clone(),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("|"),
        _ if resolved.get("properties").is_some() => "object".to_string(),
        _ if ["allOf", "oneOf", "anyOf"]
            .iter()
            .any(|k| resolved.get(*k).is_some()) =>
        {
            "composite".to_string()
        }
        _ => "any".to_string(),
    }
}

fn enum_values(schema: &Value) -> Vec<String> {
    schema
        .get("enum")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn empty_document_has_no_paths_or_schemas() {
        let doc = ApiDocument::from_value(&json!({})).unwrap();
        assert_eq!(doc, ApiDocument::empty());
    }

    #[test]
    fn merges_path_level_parameters_with_operation_overrides() {
        let raw = json!({
            "paths": {
                "/items/{id}": {
                    "parameters": [
                        { "name": "id", "in": "path", "schema": { "type": "string" } },
                        { "name": "trace", "in": "header", "required": false }
                    ],
                    "get": {
                        "parameters": [
                            { "name": "trace", "in": "header", "required": true }
                        ],
                        "responses": { "200": { "description": "ok" } }
                    }
                }
            }
        });
        let doc = ApiDocument::from_value(&raw).unwrap();
        let op = &doc.paths["/items/{id}"].operations[&HttpMethod::Get];
        let id = &op.parameters[&(ParamLocation::Path, "id".to_string())];
        assert!(id.required);
        assert_eq!(id.type_name.as_deref(), Some("string"));
        assert!(op.parameters[&(ParamLocation::Header, "trace".to_string())].required);
        assert!(op.responses.contains_key("200"));
    }

    #[test]
    fn request_body_fields_become_body_parameters() {
        let raw = json!({
            "paths": {
                "/signup": {
                    "post": {
                        "requestBody": {
                            "required": true,
                            "content": {
                                "application/json": {
                                    "schema": { "$ref": "#/components/schemas/Signup" }
                                }
                            }
                        },
                        "responses": {}
                    }
                }
            },
            "components": {
                "schemas": {
                    "Signup": {
                        "type": "object",
                        "required": ["email"],
                        "properties": {
                            "email": { "type": "string" },
                            "nickname": { "type": "string" }
                        }
                    }
                }
            }
        });
        let doc = ApiDocument::from_value(&raw).unwrap();
        let op = &doc.paths["/signup"].operations[&HttpMethod::Post];
        assert!(op.request_body.as_ref().unwrap().required);
        assert!(op.parameters[&(ParamLocation::Body, "email".to_string())].required);
        assert!(!op.parameters[&(ParamLocation::Body, "nickname".to_string())].required);
        assert!(doc.schemas.contains_key("Signup"));
    }

    #[test]
    fn swagger_definitions_and_array_types_are_read() {
        let raw = json!({
            "swagger": "2.0",
            "paths": {},
            "definitions": {
                "Pet": {
                    "properties": {
                        "tags": { "type": "array", "items": { "type": "string" } },
                        "owner": { "$ref": "#/definitions/Owner" },
                        "status": { "type": "string", "enum": ["available", "sold"] }
                    }
                },
                "Owner": { "type": "object" }
            }
        });
        let doc = ApiDocument::from_value(&raw).unwrap();
        let pet = &doc.schemas["Pet"];
        assert_eq!(pet.type_name, "object");
        assert_eq!(pet.fields["tags"].type_name, "array<string>");
        assert_eq!(pet.fields["owner"].type_name, "Owner");
        assert_eq!(pet.fields["status"].enum_values, vec!["available", "sold"]);
    }

    #[test]
    fn unresolvable_reference_is_a_validation_error() {
        let raw = json!({
            "paths": {
                "/a": { "get": { "responses": { "200": { "$ref": "#/components/responses/Gone" } } } }
            }
        });
        assert!(matches!(
            ApiDocument::from_value(&raw),
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn parses_yaml_with_numeric_keys() {
        let raw = "paths:\n  /ping:\n    get:\n      responses:\n        200:\n          description: ok\n";
        let value = parse_content(raw).unwrap();
        let doc = ApiDocument::from_value(&value).unwrap();
        assert!(doc.paths["/ping"].operations[&HttpMethod::Get]
            .responses
            .contains_key("200"));
    }

    #[test]
    fn rejects_non_mapping_roots() {
        assert!(parse_content("").is_err());
        assert!(parse_content("[1, 2]").is_err());
        assert!(parse_content("just a string").is_err());
    }
}
