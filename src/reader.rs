//! Re-assembling query shapes from the normalized store.
//!
//! The reader walks a document the same way the writer does, but resolves
//! field storage keys against records instead of a raw response. A branch
//! that cannot be satisfied (unknown field, dangling reference) is recorded
//! as missing and the walk continues, so siblings still populate; an
//! incomplete read is a value, not an error.

use std::collections::{BTreeMap, BTreeSet};

use crate::document::{Field, QueryDocument, SelectionSet, Variables};
use crate::error::Result;
use crate::store::{EntityRecord, NormalizedStore};
use crate::value::{EntityKey, Value};

/// The outcome of a read: assembled data, completeness, the concrete
/// missing paths, and every entity key the walk visited.
///
/// Dependencies include visited keys even on an incomplete read and even
/// when the target record is absent, so a later write to any of them
/// correctly triggers re-evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResult {
  pub data: serde_json::Value,
  pub complete: bool,
  pub missing: Vec<String>,
  pub dependencies: BTreeSet<EntityKey>,
}

impl ReadResult {
  /// The behavioral part of the result, for snapshot comparison: two reads
  /// with equal views are indistinguishable to a subscriber.
  pub(crate) fn view(&self) -> (bool, &serde_json::Value) {
    (self.complete, &self.data)
  }
}

struct ReadState {
  complete: bool,
  missing: Vec<String>,
  dependencies: BTreeSet<EntityKey>,
}

impl ReadState {
  fn miss(&mut self, path: String) {
    self.complete = false;
    self.missing.push(path);
  }
}

/// Where a selection's fields are looked up: a record, or an embedded
/// unkeyed object inside one.
enum Source<'s> {
  Record(&'s EntityRecord),
  Embedded(&'s BTreeMap<String, Value>),
}

impl Source<'_> {
  fn get(&self, storage_key: &str) -> Option<&Value> {
    match self {
      Source::Record(record) => record.get(storage_key),
      Source::Embedded(fields) => fields.get(storage_key),
    }
  }
}

pub struct Reader<'a> {
  store: &'a NormalizedStore,
}

impl<'a> Reader<'a> {
  pub fn new(store: &'a NormalizedStore) -> Self {
    Self { store }
  }

  /// Reconstruct `document`'s shape from the store, starting at its root.
  pub fn read(&self, document: &QueryDocument, variables: &Variables) -> Result<ReadResult> {
    self.read_at(&document.root_key(), document, variables)
  }

  /// Reconstruct the document's root selection starting at an arbitrary
  /// record instead of a synthetic root.
  pub fn read_at(
    &self,
    key: &EntityKey,
    document: &QueryDocument,
    variables: &Variables,
  ) -> Result<ReadResult> {
    let mut state = ReadState {
      complete: true,
      missing: Vec::new(),
      dependencies: BTreeSet::new(),
    };
    state.dependencies.insert(key.clone());

    let data = match self.store.get(key) {
      Some(record) => self.read_selection(
        document,
        variables,
        &document.selection,
        Source::Record(record),
        "",
        &mut state,
      )?,
      None => {
        // No record at the entry point: every selected field is missing.
        for field in document.selection.expanded_fields(document)? {
          state.miss(field.response_key().to_string());
        }
        serde_json::Value::Object(serde_json::Map::new())
      }
    };

    Ok(ReadResult {
      data,
      complete: state.complete,
      missing: state.missing,
      dependencies: state.dependencies,
    })
  }

  fn read_selection(
    &self,
    document: &QueryDocument,
    variables: &Variables,
    selection: &SelectionSet,
    source: Source<'_>,
    path: &str,
    state: &mut ReadState,
  ) -> Result<serde_json::Value> {
    let mut out = serde_json::Map::new();
    for field in selection.expanded_fields(document)? {
      let storage_key = field.storage_key(variables)?;
      let field_path = join_path(path, field.response_key());
      match source.get(&storage_key) {
        None => state.miss(field_path),
        Some(value) => {
          if let Some(json) =
            self.render(document, variables, field, value, &field_path, state)?
          {
            out.insert(field.response_key().to_string(), json);
          }
        }
      }
    }
    Ok(serde_json::Value::Object(out))
  }

  /// Render one stored value. `None` means the branch is missing (already
  /// recorded in `state`); the caller omits the field.
  fn render(
    &self,
    document: &QueryDocument,
    variables: &Variables,
    field: &Field,
    value: &Value,
    path: &str,
    state: &mut ReadState,
  ) -> Result<Option<serde_json::Value>> {
    match value {
      Value::Scalar(s) => Ok(Some(s.to_json())),
      Value::List(items) => {
        let mut rendered = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
          let item_path = format!("{path}[{i}]");
          match self.render(document, variables, field, item, &item_path, state)? {
            Some(json) => rendered.push(json),
            // Keep list positions aligned; the missing path identifies the gap.
            None => rendered.push(serde_json::Value::Null),
          }
        }
        Ok(Some(serde_json::Value::Array(rendered)))
      }
      Value::Reference(key) => {
        state.dependencies.insert(key.clone());
        match self.store.get(key) {
          Some(record) => match &field.selection {
            Some(selection) => Ok(Some(self.read_selection(
              document,
              variables,
              selection,
              Source::Record(record),
              path,
              state,
            )?)),
            None => Ok(Some(value.to_json())),
          },
          // Dangling reference: missing data, never a fault.
          None => {
            state.miss(path.to_string());
            Ok(None)
          }
        }
      }
      Value::Object(fields) => match &field.selection {
        Some(selection) => Ok(Some(self.read_selection(
          document,
          variables,
          selection,
          Source::Embedded(fields),
          path,
          state,
        )?)),
        None => Ok(Some(value.to_json())),
      },
    }
  }
}

fn join_path(path: &str, segment: &str) -> String {
  if path.is_empty() {
    segment.to_string()
  } else {
    format!("{path}.{segment}")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::CacheConfig;
  use crate::document::Field;
  use crate::writer::Writer;
  use serde_json::json;

  fn chat_doc() -> QueryDocument {
    QueryDocument::query([Field::new("chat").arg("id", 1).select([
      Field::new("__typename"),
      Field::new("id"),
      Field::new("title"),
      Field::new("messages").select([
        Field::new("__typename"),
        Field::new("id"),
        Field::new("text"),
      ]),
    ])])
  }

  fn seeded_store() -> NormalizedStore {
    let mut store = NormalizedStore::new();
    let config = CacheConfig::default();
    Writer::new(&mut store, &config)
      .write(
        &chat_doc(),
        &Variables::new(),
        &json!({"chat": {
          "__typename": "Chat", "id": 1, "title": "A",
          "messages": [{"__typename": "Message", "id": 10, "text": "hello"}]
        }}),
      )
      .expect("seed write failed");
    store
  }

  #[test]
  fn test_complete_read_round_trips_the_shape() {
    let store = seeded_store();
    let result = Reader::new(&store)
      .read(&chat_doc(), &Variables::new())
      .unwrap();

    assert!(result.complete);
    assert!(result.missing.is_empty());
    assert_eq!(
      result.data,
      json!({"chat": {
        "__typename": "Chat", "id": 1, "title": "A",
        "messages": [{"__typename": "Message", "id": 10, "text": "hello"}]
      }})
    );
  }

  #[test]
  fn test_dependencies_cover_every_visited_record() {
    let store = seeded_store();
    let result = Reader::new(&store)
      .read(&chat_doc(), &Variables::new())
      .unwrap();

    assert!(result.dependencies.contains(&EntityKey::query_root()));
    assert!(result.dependencies.contains(&EntityKey::new("Chat:1")));
    assert!(result.dependencies.contains(&EntityKey::new("Message:10")));
  }

  #[test]
  fn test_unwritten_field_reports_concrete_missing_path() {
    let mut store = NormalizedStore::new();
    let config = CacheConfig::default();
    let write_doc = QueryDocument::query([Field::new("chat").select([
      Field::new("__typename"),
      Field::new("id"),
      Field::new("title"),
    ])]);
    Writer::new(&mut store, &config)
      .write(
        &write_doc,
        &Variables::new(),
        &json!({"chat": {"__typename": "Chat", "id": 1, "title": "A"}}),
      )
      .unwrap();

    let read_doc = QueryDocument::query([Field::new("chat").select([
      Field::new("title"),
      Field::new("messages").select([Field::new("id")]),
    ])]);
    let result = Reader::new(&store).read(&read_doc, &Variables::new()).unwrap();

    assert!(!result.complete);
    assert_eq!(result.missing, vec!["chat.messages".to_string()]);
    assert_eq!(result.data, json!({"chat": {"title": "A"}}));
  }

  #[test]
  fn test_dangling_reference_is_missing_data() {
    let mut store = seeded_store();
    store.delete(&EntityKey::new("Message:10"));

    let result = Reader::new(&store)
      .read(&chat_doc(), &Variables::new())
      .unwrap();

    assert!(!result.complete);
    assert_eq!(result.missing, vec!["chat.messages[0]".to_string()]);
    // The sibling fields still populate.
    assert_eq!(result.data["chat"]["title"], json!("A"));
    // The dangling key is still a dependency: writing it later must
    // trigger re-evaluation.
    assert!(result.dependencies.contains(&EntityKey::new("Message:10")));
  }

  #[test]
  fn test_empty_store_reports_all_roots_missing() {
    let store = NormalizedStore::new();
    let result = Reader::new(&store)
      .read(&chat_doc(), &Variables::new())
      .unwrap();

    assert!(!result.complete);
    assert_eq!(result.missing, vec!["chat".to_string()]);
    assert!(result.dependencies.contains(&EntityKey::query_root()));
  }

  #[test]
  fn test_alias_reads_back_under_the_alias() {
    let store = seeded_store();
    let doc = QueryDocument::query([Field::new("chat")
      .alias("conversation")
      .arg("id", 1)
      .select([Field::new("title")])]);
    let result = Reader::new(&store).read(&doc, &Variables::new()).unwrap();

    assert!(result.complete);
    assert_eq!(result.data, json!({"conversation": {"title": "A"}}));
  }

  #[test]
  fn test_argument_variables_resolve_to_the_same_storage_key() {
    let store = seeded_store();
    let doc = QueryDocument::query([Field::new("chat")
      .arg("id", crate::document::ArgValue::var("chat_id"))
      .select([Field::new("title")])]);
    let vars = Variables::new().set("chat_id", json!(1));
    let result = Reader::new(&store).read(&doc, &vars).unwrap();

    assert!(result.complete);
    assert_eq!(result.data, json!({"chat": {"title": "A"}}));
  }

  #[test]
  fn test_read_at_starts_at_an_arbitrary_record() {
    let store = seeded_store();
    let fragment = QueryDocument::query([Field::new("title"), Field::new("id")]);
    let result = Reader::new(&store)
      .read_at(&EntityKey::new("Chat:1"), &fragment, &Variables::new())
      .unwrap();

    assert!(result.complete);
    assert_eq!(result.data, json!({"id": 1, "title": "A"}));
    assert!(result.dependencies.contains(&EntityKey::new("Chat:1")));
  }
}
