//! The flat entity table: every record, keyed by identity.

use std::collections::HashMap;

use crate::error::{CacheError, Result};
use crate::value::{EntityKey, Value};

use super::records::EntityRecord;

/// Exactly one record per entity key. All mutation goes through the writer's
/// field-wise merge; readers never observe a half-merged record because
/// every mutating call completes synchronously.
#[derive(Debug, Default)]
pub struct NormalizedStore {
  records: HashMap<EntityKey, EntityRecord>,
}

impl NormalizedStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, key: &EntityKey) -> Option<&EntityRecord> {
    self.records.get(key)
  }

  pub fn contains(&self, key: &EntityKey) -> bool {
    self.records.contains_key(key)
  }

  pub fn keys(&self) -> impl Iterator<Item = &EntityKey> {
    self.records.keys()
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  /// Dry-run conflict check for a pending field write.
  pub fn check_field(&self, key: &EntityKey, storage_key: &str, value: &Value) -> Result<()> {
    if let Some(record) = self.records.get(key) {
      record
        .check(storage_key, value)
        .map_err(|m| CacheError::StructuralConflict {
          key: key.clone(),
          field: storage_key.to_string(),
          existing: m.existing,
          incoming: m.incoming,
        })?;
    }
    Ok(())
  }

  /// Merge one field into `key`'s record, creating the record on first
  /// touch. Returns whether the stored value actually changed.
  pub fn set_field(&mut self, key: &EntityKey, storage_key: String, value: Value) -> Result<bool> {
    let record = self.records.entry(key.clone()).or_default();
    record
      .insert(storage_key.clone(), value)
      .map_err(|m| CacheError::StructuralConflict {
        key: key.clone(),
        field: storage_key,
        existing: m.existing,
        incoming: m.incoming,
      })
  }

  /// Remove a record. References pointing at it become dangling, which
  /// readers report as missing data.
  pub fn delete(&mut self, key: &EntityKey) -> bool {
    self.records.remove(key).is_some()
  }
}
