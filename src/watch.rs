//! Live query subscriptions over the normalized store.
//!
//! Each watch binds a (document, variables) pair to a subscriber callback
//! and the dependency set of its last read. A store mutation notifies the
//! registry once per write call with the full changed-key set; only watches
//! whose dependencies intersect it are re-read, and the callback fires only
//! when the re-read result differs deep-structurally from the last
//! delivered snapshot.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

use crate::document::{QueryDocument, Variables};
use crate::error::Result;
use crate::reader::{ReadResult, Reader};
use crate::store::NormalizedStore;
use crate::value::EntityKey;

pub type WatchId = u64;

/// What a subscriber receives on registration and on every behavioral
/// change.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchUpdate {
  pub data: serde_json::Value,
  pub complete: bool,
  pub missing: Vec<String>,
}

impl From<&ReadResult> for WatchUpdate {
  fn from(result: &ReadResult) -> Self {
    Self {
      data: result.data.clone(),
      complete: result.complete,
      missing: result.missing.clone(),
    }
  }
}

/// Watch lifecycle. Disposal is terminal and removes the entry entirely,
/// so it has no variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchState {
  Idle,
  Dirty,
  Revalidating,
}

/// Subscriber callback. Return `false` to dispose the watch.
pub type WatchCallback = Box<dyn FnMut(&WatchUpdate) -> bool>;

struct WatchEntry {
  document: QueryDocument,
  variables: Variables,
  /// Identity of the (document, variables) pair; watches sharing a hash
  /// share one re-read per notification pass.
  query_hash: String,
  callback: WatchCallback,
  dependencies: BTreeSet<EntityKey>,
  snapshot: (bool, serde_json::Value),
  state: WatchState,
}

#[derive(Default)]
pub struct WatchRegistry {
  watches: BTreeMap<WatchId, WatchEntry>,
  next_id: WatchId,
}

impl WatchRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.watches.len()
  }

  pub fn is_empty(&self) -> bool {
    self.watches.is_empty()
  }

  /// Register a watch. An initial read is always performed and delivered
  /// through the callback before this returns.
  pub fn register(
    &mut self,
    store: &NormalizedStore,
    document: QueryDocument,
    variables: Variables,
    mut callback: WatchCallback,
  ) -> Result<WatchId> {
    let result = Reader::new(store).read(&document, &variables)?;
    let keep = callback(&WatchUpdate::from(&result));

    let id = self.next_id;
    self.next_id += 1;
    if !keep {
      debug!(watch = id, "subscriber declined initial update");
      return Ok(id);
    }

    let query_hash = document.cache_hash(&variables);
    self.watches.insert(
      id,
      WatchEntry {
        document,
        variables,
        query_hash,
        callback,
        dependencies: result.dependencies,
        snapshot: (result.complete, result.data),
        state: WatchState::Idle,
      },
    );
    Ok(id)
  }

  /// Drop a watch; it receives no further notifications.
  pub fn dispose(&mut self, id: WatchId) -> bool {
    self.watches.remove(&id).is_some()
  }

  /// Union of every live watch's dependency set, for reachability.
  pub fn dependencies(&self) -> BTreeSet<EntityKey> {
    let mut all = BTreeSet::new();
    for entry in self.watches.values() {
      all.extend(entry.dependencies.iter().cloned());
    }
    all
  }

  /// React to one write call's changed-key set: mark intersecting watches
  /// dirty, re-read each (once per distinct query), and fire callbacks for
  /// behavioral changes only.
  pub fn notify(&mut self, store: &NormalizedStore, changed: &BTreeSet<EntityKey>) {
    if changed.is_empty() || self.watches.is_empty() {
      return;
    }

    let mut dirty = Vec::new();
    for (id, entry) in self.watches.iter_mut() {
      if changed.iter().any(|key| entry.dependencies.contains(key)) {
        entry.state = WatchState::Dirty;
        dirty.push(*id);
      }
    }
    if dirty.is_empty() {
      return;
    }

    let mut shared: HashMap<String, ReadResult> = HashMap::new();
    let mut disposed = Vec::new();
    for id in dirty {
      let entry = match self.watches.get_mut(&id) {
        Some(entry) => entry,
        None => continue,
      };
      entry.state = WatchState::Revalidating;

      let result = match shared.get(&entry.query_hash) {
        Some(result) => result.clone(),
        None => match Reader::new(store).read(&entry.document, &entry.variables) {
          Ok(result) => {
            shared.insert(entry.query_hash.clone(), result.clone());
            result
          }
          Err(error) => {
            // A document that read cleanly at registration cannot normally
            // fail later; if it does, retire the watch instead of looping.
            warn!(watch = id, %error, "watch revalidation failed, disposing");
            disposed.push(id);
            continue;
          }
        },
      };

      let differs = result.view() != (entry.snapshot.0, &entry.snapshot.1);
      if differs {
        let keep = (entry.callback)(&WatchUpdate::from(&result));
        entry.snapshot = (result.complete, result.data.clone());
        if !keep {
          disposed.push(id);
        }
      }
      entry.dependencies = result.dependencies;
      entry.state = WatchState::Idle;
    }

    for id in disposed {
      self.watches.remove(&id);
    }
  }
}
