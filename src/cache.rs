//! The cache facade: single owner of the store, watch registry, and pins.
//!
//! All mutation funnels through the writer's field-wise merge and all
//! observation through the reader; watchers are notified once per write
//! call with that call's full changed-key set. Calls are synchronous and
//! never run concurrently with each other, so readers never observe a
//! half-merged record.

use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::mpsc;

use crate::config::CacheConfig;
use crate::document::{QueryDocument, Variables};
use crate::error::Result;
use crate::gc;
use crate::reader::{ReadResult, Reader};
use crate::store::NormalizedStore;
use crate::value::EntityKey;
use crate::watch::{WatchCallback, WatchId, WatchRegistry, WatchUpdate};
use crate::writer::Writer;

pub struct Cache {
  config: CacheConfig,
  store: NormalizedStore,
  registry: WatchRegistry,
  pinned: BTreeSet<EntityKey>,
}

impl Default for Cache {
  fn default() -> Self {
    Self::new(CacheConfig::default())
  }
}

impl Cache {
  pub fn new(config: CacheConfig) -> Self {
    Self {
      config,
      store: NormalizedStore::new(),
      registry: WatchRegistry::new(),
      pinned: BTreeSet::new(),
    }
  }

  pub fn config(&self) -> &CacheConfig {
    &self.config
  }

  /// Read-only view of the underlying table.
  pub fn store(&self) -> &NormalizedStore {
    &self.store
  }

  /// Merge a raw response into the store and notify affected watches.
  ///
  /// On a structural conflict the fields resolved before it stay committed
  /// (unless configured all-or-nothing) and their watches are still
  /// notified; the conflict is returned to the caller either way.
  pub fn write(
    &mut self,
    document: &QueryDocument,
    variables: &Variables,
    data: &serde_json::Value,
  ) -> Result<BTreeSet<EntityKey>> {
    match Writer::new(&mut self.store, &self.config).write(document, variables, data) {
      Ok(changed) => {
        self.registry.notify(&self.store, &changed);
        Ok(changed)
      }
      Err(failure) => {
        self.registry.notify(&self.store, &failure.committed);
        Err(failure.error)
      }
    }
  }

  /// Reconstruct `document`'s shape from the store.
  pub fn read(&self, document: &QueryDocument, variables: &Variables) -> Result<ReadResult> {
    Reader::new(&self.store).read(document, variables)
  }

  /// Read the document's root selection starting at an arbitrary record.
  pub fn read_fragment(
    &self,
    key: &EntityKey,
    document: &QueryDocument,
    variables: &Variables,
  ) -> Result<ReadResult> {
    Reader::new(&self.store).read_at(key, document, variables)
  }

  /// Local patch: write one field of one record directly, without a round
  /// trip, and notify affected watches.
  pub fn write_fragment(
    &mut self,
    key: &EntityKey,
    field: &str,
    args: &BTreeMap<String, serde_json::Value>,
    value: &serde_json::Value,
  ) -> Result<BTreeSet<EntityKey>> {
    match Writer::new(&mut self.store, &self.config).write_field(key, field, args, value) {
      Ok(changed) => {
        self.registry.notify(&self.store, &changed);
        Ok(changed)
      }
      Err(failure) => {
        self.registry.notify(&self.store, &failure.committed);
        Err(failure.error)
      }
    }
  }

  /// Start observing a query. The callback receives an initial read
  /// immediately, then one update per behavioral change; returning `false`
  /// disposes the watch.
  pub fn watch(
    &mut self,
    document: QueryDocument,
    variables: Variables,
    callback: WatchCallback,
  ) -> Result<WatchId> {
    self.registry.register(&self.store, document, variables, callback)
  }

  /// Stop observing. The watch receives no further notifications.
  pub fn unwatch(&mut self, id: WatchId) -> bool {
    self.registry.dispose(id)
  }

  /// Channel-delivered watch: updates arrive on the receiver, and dropping
  /// the receiver disposes the watch on its next delivery attempt.
  pub fn watch_channel(
    &mut self,
    document: QueryDocument,
    variables: Variables,
  ) -> Result<(WatchId, mpsc::UnboundedReceiver<WatchUpdate>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = self.watch(
      document,
      variables,
      Box::new(move |update| tx.send(update.clone()).is_ok()),
    )?;
    Ok((id, rx))
  }

  /// Keep a record alive across collections regardless of reachability.
  pub fn pin(&mut self, key: EntityKey) {
    self.pinned.insert(key);
  }

  pub fn unpin(&mut self, key: &EntityKey) -> bool {
    self.pinned.remove(key)
  }

  /// Sweep records unreachable from the roots, live watches, and pins.
  pub fn collect(&mut self) -> BTreeSet<EntityKey> {
    gc::collect(&mut self.store, &self.registry, &self.pinned)
  }
}
