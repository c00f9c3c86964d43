//! Declarative space definitions.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use spacekit_api::Transport;
use spacekit_core::{ModuloShards, ShardFunction, SpaceResult};
use spacekit_schema::FieldDecl;

use crate::{Space, SpaceBuilder};

/// Type of a declared field: one tag, or a list of tags for `_tail`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypeSpec {
    One(String),
    Many(Vec<String>),
}

impl TypeSpec {
    fn tags(&self) -> &[String] {
        match self {
            TypeSpec::One(t) => std::slice::from_ref(t),
            TypeSpec::Many(ts) => ts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeSpec,
}

/// One space as written in a config file.
///
/// ```yaml
/// space_no: 1
/// fields:
///   - { name: id, type: int }
///   - { name: name, type: str }
///   - { name: _tail, type: [str, int] }
/// indexes: [[name]]
/// shards: 4
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpaceDef {
    pub space_no: u32,
    pub fields: Vec<FieldDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_fields: Option<Vec<String>>,
    /// Shard count for hash routing; absent means a single shard.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shards: Option<u32>,
}

impl SpaceDef {
    pub fn builder(&self) -> SpaceResult<SpaceBuilder> {
        let fields = self.fields.iter().map(|f| FieldDecl::parse(f.name.clone(), f.ty.tags())).collect::<SpaceResult<Vec<_>>>()?;
        let shard_fn = self.shards.map(|n| Arc::new(ModuloShards::new(n)) as Arc<dyn ShardFunction>);
        Ok(SpaceBuilder::from_parts(
            self.space_no,
            fields,
            self.primary.clone(),
            self.indexes.clone(),
            self.shard_fields.clone(),
            shard_fn,
        ))
    }

    pub fn build(&self, transport: Arc<dyn Transport>) -> SpaceResult<Space> { self.builder()?.build(transport) }
}

/// Top-level config document: spaces by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpacesConfig {
    pub spaces: BTreeMap<String, SpaceDef>,
}

impl SpacesConfig {
    pub fn get(&self, name: &str) -> Option<&SpaceDef> { self.spaces.get(name) }
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ { self.spaces.keys().map(String::as_str) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spacekit_api::RecordingTransport;
    use spacekit_core::SpaceError;

    #[test]
    fn tail_type_accepts_a_list() {
        let def: SpaceDef = serde_json::from_str(
            r#"{"space_no": 3, "fields": [{"name": "id", "type": "int"}, {"name": "_tail", "type": ["str", "int64"]}]}"#,
        )
        .unwrap();
        let space = def.build(Arc::new(RecordingTransport::new())).unwrap();
        assert_eq!(space.space_no(), 3);
        assert_eq!(space.schema().tail_position(), 1);
        assert_eq!(space.schema().tail_size(), 2);
        assert_eq!(space.router().shard_count(), 1);
    }

    #[test]
    fn bad_type_tag_is_a_schema_error() {
        let def = SpaceDef {
            space_no: 1,
            fields: vec![FieldDef { name: "id".into(), ty: TypeSpec::One("decimal".into()) }],
            primary: None,
            indexes: vec![],
            shard_fields: None,
            shards: Some(8),
        };
        assert!(matches!(def.build(Arc::new(RecordingTransport::new())), Err(SpaceError::SchemaDefinition(_))));
    }
}
