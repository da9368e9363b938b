//! Merging raw responses and local patches into the normalized store.
//!
//! Writes run in two phases. The plan phase walks the document's selection
//! set in lock-step with the response, resolving identities and flattening
//! nested objects into per-record field operations; any identity, fragment,
//! or variable error aborts here with nothing committed. The commit phase
//! merges the planned operations field-wise, so the only error it can raise
//! is a structural conflict.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::config::{CacheConfig, WriteMode};
use crate::document::{field_storage_key, QueryDocument, SelectionSet, Variables};
use crate::error::{CacheError, Result};
use crate::store::{IdentityResolver, NormalizedStore};
use crate::value::{EntityKey, Scalar, Value};

/// A write that failed. `committed` holds the keys whose fields were merged
/// before the failure: empty for plan-time errors and in all-or-nothing
/// mode, possibly non-empty for a mid-commit structural conflict.
#[derive(Debug)]
pub struct WriteFailure {
  pub error: CacheError,
  pub committed: BTreeSet<EntityKey>,
}

impl From<CacheError> for WriteFailure {
  fn from(error: CacheError) -> Self {
    Self {
      error,
      committed: BTreeSet::new(),
    }
  }
}

/// Changed keys on success, failure context otherwise.
pub type WriteOutcome = std::result::Result<BTreeSet<EntityKey>, WriteFailure>;

/// One planned field merge.
struct FieldOp {
  key: EntityKey,
  storage_key: String,
  value: Value,
}

pub struct Writer<'a> {
  store: &'a mut NormalizedStore,
  config: &'a CacheConfig,
}

impl<'a> Writer<'a> {
  pub fn new(store: &'a mut NormalizedStore, config: &'a CacheConfig) -> Self {
    Self { store, config }
  }

  /// Merge a raw response for `document` into the store. Returns the set of
  /// entity keys whose records actually changed (deep-structural
  /// comparison), for watch notification.
  pub fn write(
    &mut self,
    document: &QueryDocument,
    variables: &Variables,
    data: &serde_json::Value,
  ) -> WriteOutcome {
    let object = data.as_object().ok_or_else(|| {
      WriteFailure::from(CacheError::MalformedResponse(
        "response data is not an object".to_string(),
      ))
    })?;

    let mut ops = Vec::new();
    let root = document.root_key();
    self.plan_fields(document, variables, &document.selection, object, &root, "", &mut ops)?;
    self.commit(ops)
  }

  /// Local-patch mode: write one field of one record directly, without a
  /// document walk. The patch value is normalized shape-free, so keyed
  /// objects inside it still unify with fetched data, and `{"__ref": key}`
  /// markers round-trip back into references.
  pub fn write_field(
    &mut self,
    key: &EntityKey,
    field: &str,
    args: &BTreeMap<String, serde_json::Value>,
    value: &serde_json::Value,
  ) -> WriteOutcome {
    let mut ops = Vec::new();
    let path = format!("{key}.{field}");
    let normalized = self.plan_json(value, &path, &mut ops)?;
    ops.push(FieldOp {
      key: key.clone(),
      storage_key: field_storage_key(field, args),
      value: normalized,
    });
    self.commit(ops)
  }

  /// Plan the selected fields of a keyed object into `ops`.
  fn plan_fields(
    &self,
    document: &QueryDocument,
    variables: &Variables,
    selection: &SelectionSet,
    object: &serde_json::Map<String, serde_json::Value>,
    owner: &EntityKey,
    path: &str,
    ops: &mut Vec<FieldOp>,
  ) -> Result<()> {
    for field in selection.expanded_fields(document)? {
      // Fields absent from the response are left untouched (point-in-time,
      // partial updates never erase previously known fields).
      let raw = match object.get(field.response_key()) {
        Some(raw) => raw,
        None => continue,
      };
      let field_path = join_path(path, field.response_key());
      let value = self.plan_value(
        document,
        variables,
        field.selection.as_ref(),
        raw,
        &field_path,
        ops,
      )?;
      ops.push(FieldOp {
        key: owner.clone(),
        storage_key: field.storage_key(variables)?,
        value,
      });
    }
    Ok(())
  }

  fn plan_value(
    &self,
    document: &QueryDocument,
    variables: &Variables,
    selection: Option<&SelectionSet>,
    raw: &serde_json::Value,
    path: &str,
    ops: &mut Vec<FieldOp>,
  ) -> Result<Value> {
    match raw {
      serde_json::Value::Array(items) => {
        // Lists are whole-field replacements: every element is normalized
        // and the field is written once as the complete new list.
        let mut list = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
          list.push(self.plan_value(
            document,
            variables,
            selection,
            item,
            &format!("{path}[{i}]"),
            ops,
          )?);
        }
        Ok(Value::List(list))
      }
      serde_json::Value::Object(object) => match selection {
        Some(selection) => self.plan_object(document, variables, selection, object, path, ops),
        // No sub-selection to walk in lock-step: normalize shape-free.
        None => self.plan_json(raw, path, ops),
      },
      leaf => Ok(Value::Scalar(Scalar::from_json(leaf).unwrap_or(Scalar::Null))),
    }
  }

  fn plan_object(
    &self,
    document: &QueryDocument,
    variables: &Variables,
    selection: &SelectionSet,
    object: &serde_json::Map<String, serde_json::Value>,
    path: &str,
    ops: &mut Vec<FieldOp>,
  ) -> Result<Value> {
    let resolver = IdentityResolver::new(self.config);
    match resolver.resolve_key(object, path)? {
      Some(key) => {
        self.plan_fields(document, variables, selection, object, &key, path, ops)?;
        Ok(Value::Reference(key))
      }
      None => {
        // Unkeyed: embed inline in the owning field.
        let mut fields = BTreeMap::new();
        for field in selection.expanded_fields(document)? {
          let raw = match object.get(field.response_key()) {
            Some(raw) => raw,
            None => continue,
          };
          let field_path = join_path(path, field.response_key());
          let value = self.plan_value(
            document,
            variables,
            field.selection.as_ref(),
            raw,
            &field_path,
            ops,
          )?;
          fields.insert(field.storage_key(variables)?, value);
        }
        Ok(Value::Object(fields))
      }
    }
  }

  /// Shape-free normalization for local patches and unselected payloads.
  fn plan_json(
    &self,
    raw: &serde_json::Value,
    path: &str,
    ops: &mut Vec<FieldOp>,
  ) -> Result<Value> {
    match raw {
      serde_json::Value::Array(items) => {
        let mut list = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
          list.push(self.plan_json(item, &format!("{path}[{i}]"), ops)?);
        }
        Ok(Value::List(list))
      }
      serde_json::Value::Object(object) => {
        if let Some(key) = as_ref_marker(object) {
          return Ok(Value::Reference(key));
        }
        let resolver = IdentityResolver::new(self.config);
        match resolver.resolve_key(object, path)? {
          Some(key) => {
            for (name, value) in object {
              let planned = self.plan_json(value, &join_path(path, name), ops)?;
              ops.push(FieldOp {
                key: key.clone(),
                storage_key: name.clone(),
                value: planned,
              });
            }
            Ok(Value::Reference(key))
          }
          None => {
            let mut fields = BTreeMap::new();
            for (name, value) in object {
              fields.insert(name.clone(), self.plan_json(value, &join_path(path, name), ops)?);
            }
            Ok(Value::Object(fields))
          }
        }
      }
      leaf => Ok(Value::Scalar(Scalar::from_json(leaf).unwrap_or(Scalar::Null))),
    }
  }

  fn commit(&mut self, ops: Vec<FieldOp>) -> WriteOutcome {
    if self.config.write_mode == WriteMode::AllOrNothing {
      // Validate the whole batch, including intra-batch shape changes,
      // before touching the store.
      let mut planned: HashMap<(&EntityKey, &str), &Value> = HashMap::new();
      for op in &ops {
        self
          .store
          .check_field(&op.key, &op.storage_key, &op.value)
          .map_err(WriteFailure::from)?;
        if let Some(prev) = planned.get(&(&op.key, op.storage_key.as_str())) {
          if !prev.accepts(&op.value) {
            return Err(WriteFailure::from(CacheError::StructuralConflict {
              key: op.key.clone(),
              field: op.storage_key.clone(),
              existing: prev.kind(),
              incoming: op.value.kind(),
            }));
          }
        }
        planned.insert((&op.key, &op.storage_key), &op.value);
      }
    }

    let mut committed = BTreeSet::new();
    for op in ops {
      match self.store.set_field(&op.key, op.storage_key, op.value) {
        Ok(true) => {
          committed.insert(op.key);
        }
        Ok(false) => {}
        Err(error) => {
          debug!(%error, committed = committed.len(), "write aborted on conflict");
          return Err(WriteFailure { error, committed });
        }
      }
    }
    debug!(changed = committed.len(), "write committed");
    Ok(committed)
  }
}

fn join_path(path: &str, segment: &str) -> String {
  if path.is_empty() {
    segment.to_string()
  } else {
    format!("{path}.{segment}")
  }
}

/// A single-field `{"__ref": "<key>"}` object, the raw normalized form
/// readers emit for references.
fn as_ref_marker(object: &serde_json::Map<String, serde_json::Value>) -> Option<EntityKey> {
  if object.len() != 1 {
    return None;
  }
  object
    .get("__ref")
    .and_then(|v| v.as_str())
    .map(EntityKey::from)
}
