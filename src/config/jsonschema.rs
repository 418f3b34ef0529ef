//! JSON-schema compilation seam.
//!
//! The raw validation algorithm is delegated to the `jsonschema` crate
//! behind the [`SchemaEngine`] trait so the validator (and tests) can swap
//! it out. Compiled schemas are built once and reused; the validator keeps
//! them in a cache alongside the policy document rather than inside it.

use std::fmt;
use std::sync::Arc;

use jsonschema::JSONSchema;
use serde_json::Value;
use thiserror::Error;

use crate::config::schema::JsonMap;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid schema: {0}")]
    Compile(String),

    #[error("schema validation failed: {0}")]
    Validation(String),
}

/// Compiles raw schema documents into reusable validators.
pub trait SchemaEngine: Send + Sync {
    fn compile(&self, doc: &JsonMap) -> Result<Arc<CompiledSchema>, SchemaError>;
}

/// Default engine backed by the `jsonschema` crate.
#[derive(Debug, Default, Clone)]
pub struct JsonSchemaEngine;

impl SchemaEngine for JsonSchemaEngine {
    fn compile(&self, doc: &JsonMap) -> Result<Arc<CompiledSchema>, SchemaError> {
        CompiledSchema::new(doc).map(Arc::new)
    }
}

/// A compiled JSON schema: validate-many after compile-once.
pub struct CompiledSchema {
    document: Value,
    compiled: JSONSchema,
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("document", &self.document)
            .finish()
    }
}

impl CompiledSchema {
    /// Compile a schema document. A document without an explicit `type` is
    /// treated as an object schema, so an empty map accepts any object.
    pub fn new(doc: &JsonMap) -> Result<Self, SchemaError> {
        let mut doc = doc.clone();
        doc.entry("type").or_insert_with(|| Value::from("object"));
        let document = Value::Object(doc);
        let compiled = match JSONSchema::compile(&document) {
            Ok(compiled) => compiled,
            Err(err) => return Err(SchemaError::Compile(err.to_string())),
        };
        Ok(Self { document, compiled })
    }

    /// The normalized schema document this validator was compiled from.
    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn validate(&self, value: &Value) -> Result<(), SchemaError> {
        self.compiled.validate(value).map_err(|mut errors| {
            let detail = errors
                .next()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            SchemaError::Validation(detail)
        })
    }

    /// Insert declared root-level property defaults for absent keys.
    pub fn insert_defaults(&self, value: &mut JsonMap) {
        if let Some(properties) = self.document.get("properties").and_then(Value::as_object) {
            for (key, property) in properties {
                if value.contains_key(key) {
                    continue;
                }
                if let Some(default) = property.get("default") {
                    value.insert(key.clone(), default.clone());
                }
            }
        }
    }

    /// Insert defaults, then validate the resulting payload. The payload is
    /// mutated in place; this is the documented side effect the assembly
    /// pipeline relies on.
    pub fn validate_and_insert_defaults(&self, value: &mut JsonMap) -> Result<(), SchemaError> {
        self.insert_defaults(value);
        self.validate(&Value::Object(value.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(doc: Value) -> CompiledSchema {
        CompiledSchema::new(doc.as_object().unwrap()).unwrap()
    }

    #[test]
    fn test_empty_schema_accepts_any_object() {
        let s = schema(json!({}));
        assert!(s.validate(&json!({"anything": [1, 2, 3]})).is_ok());
    }

    #[test]
    fn test_defaults_inserted_for_absent_keys() {
        let s = schema(json!({
            "properties": {
                "port": {"type": "integer", "default": 8080},
                "name": {"type": "string"}
            }
        }));
        let mut payload = JsonMap::new();
        payload.insert("name".to_string(), json!("x"));
        s.validate_and_insert_defaults(&mut payload).unwrap();
        assert_eq!(payload["port"], json!(8080));
        assert_eq!(payload["name"], json!("x"));
    }

    #[test]
    fn test_validation_failure_reports_detail() {
        let s = schema(json!({
            "properties": {"port": {"type": "integer"}},
            "required": ["port"]
        }));
        let mut payload = JsonMap::new();
        payload.insert("port".to_string(), json!("not a number"));
        let err = s.validate_and_insert_defaults(&mut payload).unwrap_err();
        assert!(matches!(err, SchemaError::Validation(_)));
    }

    #[test]
    fn test_invalid_schema_fails_compile() {
        let result = CompiledSchema::new(
            json!({"type": "object", "properties": {"x": {"type": 42}}})
                .as_object()
                .unwrap(),
        );
        assert!(matches!(result, Err(SchemaError::Compile(_))));
    }
}
