use serde_json::Value;

use crate::error::PipelineError;

const MAX_REF_HOPS: usize = 32;

#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    root: &'a Value,
}

impl<'a> Resolver<'a> {
    pub fn new(root: &'a Value) -> Self {
        Self { root }
    }

    pub fn lookup(&self, reference: &str) -> Result<&'a Value, PipelineError> {
        let pointer = reference.strip_prefix('#').ok_or_else(|| {
            PipelineError::validation(format!("unsupported non-local reference `{reference}`"))
        })?;
        if pointer.is_empty() {
            return Ok(self.root);
        }
        self.root
            .pointer(pointer)
            .ok_or_else(|| PipelineError::validation(format!("unresolvable reference `{reference}`")))
    }

    pub fn follow(&self, value: &'a Value) -> Result<&'a Value, PipelineError> {
        let mut current = value;
        for _ in 0..MAX_REF_HOPS {
            match ref_target(current) {
                Some(reference) => current = self.lookup(reference)?,
                None => return Ok(current),
            }
        }
        Err(PipelineError::validation(format!(
            "reference chain longer than {MAX_REF_HOPS} hops (cycle?) starting at `{}`",
            ref_target(value).unwrap_or_default()
        )))
    }

    pub fn check_references(&self) -> Result<(), PipelineError> {
        self.check_value(self.root)
    }

    fn check_value(&self, value: &'a Value) -> Result<(), PipelineError> {
        match value {
            Value::Object(map) => {
                if ref_target(value).is_some() {
                    self.follow(value)?;
                }
                for child in map.values() {
                    self.check_value(child)?;
                }
                Ok(())
            }
            Value::Array(items) => {
                for child in items {
                    self.check_value(child)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

pub fn ref_target(value: &Value) -> Option<&str> {
    value.as_object()?.get("$ref")?.as_str()
}

pub fn ref_name(reference: &str) -> &str {
    reference.rsplit('/').next().unwrap_or(reference)
}

/// Name of a top-level schema definition, `None` for pointers into or below one.
pub fn schema_ref_name(reference: &str) -> Option<&str> {
    let name = reference
        .strip_prefix("#/components/schemas/")
        .or_else(|| reference.strip_prefix("#/definitions/"))?;
    (!name.is_empty() && !name.contains('/')).then_some(name)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ref_name, schema_ref_name, Resolver};
    use crate::error::PipelineError;

    #[test]
    fn follows_reference_chains() {
        let doc = json!({
            "components": {
                "schemas": {
                    "Alias": { "$ref": "#/components/schemas/User" },
                    "User": { "type": "object" }
                }
            }
        });
        let resolver = Resolver::new(&doc);
        let start = json!({ "$ref": "#/components/schemas/Alias" });
        let target = resolver.follow(&start).expect("chain should resolve");
        assert_eq!(target["type"], "object");
        assert_eq!(ref_name("#/components/schemas/User"), "User");
    }

    #[test]
    fn rejects_missing_and_cyclic_references() {
        let missing = json!({ "paths": { "/a": { "$ref": "#/nope" } } });
        assert!(matches!(
            Resolver::new(&missing).check_references(),
            Err(PipelineError::Validation(_))
        ));

        let cyclic = json!({
            "definitions": {
                "A": { "$ref": "#/definitions/B" },
                "B": { "$ref": "#/definitions/A" }
            }
        });
        assert!(Resolver::new(&cyclic).check_references().is_err());
    }

    #[test]
    fn only_top_level_definitions_are_schema_names() {
        assert_eq!(schema_ref_name("#/components/schemas/User"), Some("User"));
        assert_eq!(schema_ref_name("#/definitions/Pet"), Some("Pet"));
        assert_eq!(
            schema_ref_name("#/components/schemas/Wrapper/properties/data"),
            None
        );
        assert_eq!(schema_ref_name("#/components/responses/NotFound"), None);
        assert_eq!(schema_ref_name("#/definitions/"), None);
    }

    #[test]
    fn rejects_remote_references() {
        let doc = json!({ "x": { "$ref": "https://example.com/schema.json" } });
        assert!(Resolver::new(&doc).check_references().is_err());
    }
}
