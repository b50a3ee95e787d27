//! Schema store.
//!
//! A schema is the immutable template an entity is instantiated from. Upserting
//! an id swaps the stored `Arc`; instances that already hold the previous one
//! keep it until they reload.

use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::error::WorldError;

/// Schema id of the avatar each client spawns for itself.
pub const AVATAR_SCHEMA_ID: &str = "$avatar";

/// Entity template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub id: String,
    /// Blueprint asset reference.
    pub model: String,
    #[serde(default = "default_model_type")]
    pub model_type: String,
    /// Script asset reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    /// Static per-schema configuration.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub config: serde_json::Map<String, serde_json::Value>,
}

fn default_model_type() -> String {
    "glb".to_string()
}

impl Schema {
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            model_type: default_model_type(),
            script: None,
            config: serde_json::Map::new(),
        }
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }
}

/// Schema id → template.
#[derive(Debug, Default)]
pub struct SchemaStore {
    schemas: HashMap<String, Arc<Schema>>,
}

impl SchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a schema. Returns the previous template, if any.
    pub fn upsert_schema(&mut self, schema: Schema) -> Option<Arc<Schema>> {
        self.schemas.insert(schema.id.clone(), Arc::new(schema))
    }

    pub fn get_schema(&self, id: &str) -> Result<Arc<Schema>, WorldError> {
        self.schemas
            .get(id)
            .cloned()
            .ok_or_else(|| WorldError::SchemaNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.schemas.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Schema> {
        self.schemas.values().map(|s| s.as_ref())
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_replaces_without_touching_held_templates() {
        let mut store = SchemaStore::new();
        store.upsert_schema(Schema::new("crate", "crate-v1.glb"));
        let held = store.get_schema("crate").unwrap();

        let prev = store.upsert_schema(Schema::new("crate", "crate-v2.glb"));
        assert_eq!(prev.unwrap().model, "crate-v1.glb");
        assert_eq!(held.model, "crate-v1.glb");
        assert_eq!(store.get_schema("crate").unwrap().model, "crate-v2.glb");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn missing_schema_is_not_found() {
        let store = SchemaStore::new();
        assert_eq!(
            store.get_schema("nope").unwrap_err(),
            WorldError::SchemaNotFound("nope".into())
        );
    }
}
