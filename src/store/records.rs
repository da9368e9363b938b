//! Flat entity records and their field-wise merge rules.

use std::collections::BTreeMap;

use crate::value::{Value, ValueKind};

/// Raised when a field write would change the field's stored shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindMismatch {
  pub existing: ValueKind,
  pub incoming: ValueKind,
}

/// One entity's stored fields, keyed by field storage key.
///
/// Merging is field-wise and point-in-time: fields present in a write
/// overwrite, fields absent are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityRecord {
  fields: BTreeMap<String, Value>,
}

impl EntityRecord {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, storage_key: &str) -> Option<&Value> {
    self.fields.get(storage_key)
  }

  pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
    self.fields.iter().map(|(k, v)| (k.as_str(), v))
  }

  pub fn len(&self) -> usize {
    self.fields.len()
  }

  pub fn is_empty(&self) -> bool {
    self.fields.is_empty()
  }

  /// Whether writing `value` into `storage_key` would conflict.
  pub(crate) fn check(&self, storage_key: &str, value: &Value) -> Result<(), KindMismatch> {
    match self.fields.get(storage_key) {
      Some(existing) if !existing.accepts(value) => Err(KindMismatch {
        existing: existing.kind(),
        incoming: value.kind(),
      }),
      _ => Ok(()),
    }
  }

  /// Write one field. Returns `Ok(true)` when the stored value actually
  /// changed (deep-structural comparison), `Ok(false)` on a no-op. Only the
  /// writer's merge path calls this; readers never mutate records.
  pub(crate) fn insert(&mut self, storage_key: String, value: Value) -> Result<bool, KindMismatch> {
    self.check(&storage_key, &value)?;
    match self.fields.get(&storage_key) {
      Some(existing) if *existing == value => Ok(false),
      _ => {
        self.fields.insert(storage_key, value);
        Ok(true)
      }
    }
  }
}
