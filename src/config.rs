//! Cache configuration: identity policies and write behavior.

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::{CacheError, Result};

/// How a write batch behaves when it hits a structural conflict.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
  /// Commit the fields resolved before the conflict, then surface it.
  #[default]
  CommitPartial,
  /// Validate the whole batch first; on conflict, commit nothing.
  AllOrNothing,
}

/// Identity policy for one type: which fields make up its key.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TypePolicy {
  /// Fields combined into the entity key. Order matters for composite keys.
  #[serde(default = "default_key_fields")]
  pub key_fields: Vec<String>,
}

impl Default for TypePolicy {
  fn default() -> Self {
    Self {
      key_fields: default_key_fields(),
    }
  }
}

impl TypePolicy {
  pub fn keyed_on<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
    Self {
      key_fields: fields.into_iter().map(Into::into).collect(),
    }
  }
}

fn default_key_fields() -> Vec<String> {
  vec!["id".to_string()]
}

fn default_type_field() -> String {
  "__typename".to_string()
}

/// Cache configuration.
///
/// Types with an explicit entry in `types` are *declared identifiable*: a
/// response object of that type missing its key fields is a hard error.
/// Undeclared types key opportunistically on `id` and embed inline when the
/// type name or `id` is absent.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Field carrying the type discriminant on raw response objects.
  #[serde(default = "default_type_field")]
  pub type_field: String,
  #[serde(default)]
  pub types: BTreeMap<String, TypePolicy>,
  #[serde(default)]
  pub write_mode: WriteMode,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      type_field: default_type_field(),
      types: BTreeMap::new(),
      write_mode: WriteMode::default(),
    }
  }
}

impl CacheConfig {
  /// Load configuration from a YAML document.
  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| CacheError::Config(e.to_string()))
  }

  /// Declare an identity policy for a type.
  pub fn with_type(mut self, name: impl Into<String>, policy: TypePolicy) -> Self {
    self.types.insert(name.into(), policy);
    self
  }

  pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
    self.write_mode = mode;
    self
  }

  pub fn with_type_field(mut self, field: impl Into<String>) -> Self {
    self.type_field = field.into();
    self
  }
}
