//! On-demand garbage collection of unreachable records.
//!
//! Runs only when asked, never during a read or write, so cache latency
//! stays predictable. The seed set is the synthetic roots, every live
//! watch's dependency set, and the explicitly pinned keys; reachability is
//! the transitive closure over references from there.

use std::collections::BTreeSet;
use tracing::debug;

use crate::store::NormalizedStore;
use crate::value::EntityKey;
use crate::watch::WatchRegistry;

/// Sweep every record not reachable from the seed set. Returns the removed
/// keys.
pub fn collect(
  store: &mut NormalizedStore,
  registry: &WatchRegistry,
  pinned: &BTreeSet<EntityKey>,
) -> BTreeSet<EntityKey> {
  fn seed(key: EntityKey, pending: &mut Vec<EntityKey>, live: &mut BTreeSet<EntityKey>) {
    if live.insert(key.clone()) {
      pending.push(key);
    }
  }

  let mut live: BTreeSet<EntityKey> = BTreeSet::new();
  let mut pending: Vec<EntityKey> = Vec::new();

  seed(EntityKey::query_root(), &mut pending, &mut live);
  seed(EntityKey::mutation_root(), &mut pending, &mut live);
  for key in registry.dependencies() {
    seed(key, &mut pending, &mut live);
  }
  for key in pinned {
    seed(key.clone(), &mut pending, &mut live);
  }

  // Mark: follow references out of every live record.
  while let Some(key) = pending.pop() {
    let record = match store.get(&key) {
      Some(record) => record,
      None => continue,
    };
    let mut found = Vec::new();
    for (_, value) in record.fields() {
      value.for_each_reference(&mut |target| found.push(target.clone()));
    }
    for target in found {
      if live.insert(target.clone()) {
        pending.push(target);
      }
    }
  }

  // Sweep.
  let doomed: Vec<EntityKey> = store
    .keys()
    .filter(|key| !live.contains(*key))
    .cloned()
    .collect();
  let mut removed = BTreeSet::new();
  for key in doomed {
    store.delete(&key);
    removed.insert(key);
  }

  if !removed.is_empty() {
    debug!(removed = removed.len(), retained = store.len(), "collected");
  }
  removed
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::CacheConfig;
  use crate::document::{Field, QueryDocument, Variables};
  use crate::writer::Writer;
  use serde_json::json;

  fn seeded() -> (NormalizedStore, CacheConfig) {
    let mut store = NormalizedStore::new();
    let config = CacheConfig::default();
    let doc = QueryDocument::query([Field::new("chat").select([
      Field::new("__typename"),
      Field::new("id"),
      Field::new("messages").select([
        Field::new("__typename"),
        Field::new("id"),
        Field::new("author").select([Field::new("__typename"), Field::new("id")]),
      ]),
    ])]);
    Writer::new(&mut store, &config)
      .write(
        &doc,
        &Variables::new(),
        &json!({"chat": {
          "__typename": "Chat", "id": 1,
          "messages": [{
            "__typename": "Message", "id": 10,
            "author": {"__typename": "User", "id": 7}
          }]
        }}),
      )
      .expect("seed write failed");
    (store, config)
  }

  #[test]
  fn test_everything_reachable_from_root_survives() {
    let (mut store, _) = seeded();
    let registry = WatchRegistry::new();
    let removed = collect(&mut store, &registry, &BTreeSet::new());
    assert!(removed.is_empty());
    assert_eq!(store.len(), 4);
  }

  #[test]
  fn test_orphaned_records_are_swept() {
    let (mut store, config) = seeded();
    // Truncate the list: Message:10 and User:7 become unreachable.
    Writer::new(&mut store, &config)
      .write_field(
        &EntityKey::new("Chat:1"),
        "messages",
        &Default::default(),
        &json!([]),
      )
      .expect("patch failed");

    let registry = WatchRegistry::new();
    let removed = collect(&mut store, &registry, &BTreeSet::new());
    assert_eq!(
      removed,
      BTreeSet::from([EntityKey::new("Message:10"), EntityKey::new("User:7")])
    );
    assert!(store.contains(&EntityKey::new("Chat:1")));
  }

  #[test]
  fn test_pinned_records_survive() {
    let (mut store, config) = seeded();
    Writer::new(&mut store, &config)
      .write_field(
        &EntityKey::new("Chat:1"),
        "messages",
        &Default::default(),
        &json!([]),
      )
      .expect("patch failed");

    let registry = WatchRegistry::new();
    let pinned = BTreeSet::from([EntityKey::new("Message:10")]);
    let removed = collect(&mut store, &registry, &pinned);

    // The pin keeps the message, and the message keeps its author.
    assert!(store.contains(&EntityKey::new("Message:10")));
    assert!(store.contains(&EntityKey::new("User:7")));
    assert!(removed.is_empty());
  }

  #[test]
  fn test_watched_records_survive_even_when_unreferenced() {
    let (mut store, config) = seeded();

    // Watch the message directly.
    let mut registry = WatchRegistry::new();
    let doc = QueryDocument::query([Field::new("message").arg("id", 10).select([
      Field::new("__typename"),
      Field::new("id"),
    ])]);
    Writer::new(&mut store, &config)
      .write(
        &doc,
        &Variables::new(),
        &json!({"message": {"__typename": "Message", "id": 10}}),
      )
      .expect("write failed");
    registry
      .register(&store, doc, Variables::new(), Box::new(|_| true))
      .unwrap();

    // Drop the root's only path to the chat.
    Writer::new(&mut store, &config)
      .write_field(&EntityKey::query_root(), "chat", &Default::default(), &json!(null))
      .expect("patch failed");

    let removed = collect(&mut store, &registry, &BTreeSet::new());
    assert!(store.contains(&EntityKey::new("Message:10")));
    assert!(removed.contains(&EntityKey::new("Chat:1")));
  }
}
