//! An in-memory normalized cache for graph-shaped query results.
//!
//! Raw nested responses are decomposed into flat, identity-keyed records;
//! query shapes are re-assembled from those records (possibly partially);
//! writes merge field-wise without clobbering unrelated data; and watches
//! are notified exactly when data they depend on changes.
//!
//! The transport that performs actual I/O and the query-language parser
//! are external collaborators: documents arrive already parsed, and the
//! [`Transport`] trait is the only network boundary.
//!
//! # Example
//!
//! ```
//! use memograph::{Cache, Field, QueryDocument, Variables};
//! use serde_json::json;
//!
//! let mut cache = Cache::default();
//! let doc = QueryDocument::query([Field::new("chat").arg("id", 1).select([
//!   Field::new("__typename"),
//!   Field::new("id"),
//!   Field::new("title"),
//! ])]);
//!
//! cache
//!   .write(
//!     &doc,
//!     &Variables::new(),
//!     &json!({"chat": {"__typename": "Chat", "id": 1, "title": "A"}}),
//!   )
//!   .unwrap();
//!
//! let result = cache.read(&doc, &Variables::new()).unwrap();
//! assert!(result.complete);
//! ```

mod cache;
mod config;
mod document;
mod error;
mod gc;
mod reader;
mod store;
mod value;
mod watch;
mod writer;

pub mod client;

pub use cache::Cache;
pub use client::{Client, QueryOptions, QueryResult, ResultSource, Transport, TransportResponse};
pub use config::{CacheConfig, TypePolicy, WriteMode};
pub use document::{
  field_storage_key, ArgValue, Field, OperationKind, QueryDocument, Selection, SelectionSet,
  Variables,
};
pub use error::{CacheError, ResponseError, Result};
pub use reader::{ReadResult, Reader};
pub use store::{EntityRecord, IdentityResolver, NormalizedStore};
pub use value::{EntityKey, Scalar, Value, ValueKind};
pub use watch::{WatchCallback, WatchId, WatchRegistry, WatchUpdate};
pub use writer::{WriteFailure, WriteOutcome, Writer};
