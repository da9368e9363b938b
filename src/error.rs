//! Error types surfaced by cache operations.

use thiserror::Error;

use crate::value::{EntityKey, ValueKind};

/// An error entry returned by the server alongside (or instead of) data.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseError {
  pub message: String,
  /// Response path the error applies to, empty for request-level errors.
  pub path: Vec<String>,
}

impl ResponseError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      path: Vec::new(),
    }
  }
}

/// Errors that can occur while reading from or writing to the cache.
#[derive(Debug, Error)]
pub enum CacheError {
  /// A field already holds a value of an incompatible shape. The write
  /// batch commits fields resolved before the conflict unless the cache is
  /// configured for all-or-nothing writes.
  #[error("structural conflict on {key}.{field}: stored {existing}, incoming {incoming}")]
  StructuralConflict {
    key: EntityKey,
    field: String,
    existing: ValueKind,
    incoming: ValueKind,
  },

  /// A type with a declared key policy was returned without its key
  /// field(s). Guessing a key here corrupts the cache, so this is a hard
  /// error rather than a fallback to embedding.
  #[error("cannot identify {type_name} at {path}: missing key field '{missing}'")]
  IdentityResolution {
    type_name: String,
    path: String,
    missing: String,
  },

  #[error("unknown fragment '{0}'")]
  UnknownFragment(String),

  #[error("fragment cycle through '{0}'")]
  FragmentCycle(String),

  #[error("missing variable '${0}'")]
  MissingVariable(String),

  #[error("invalid configuration: {0}")]
  Config(String),

  #[error("malformed response: {0}")]
  MalformedResponse(String),

  #[error("transport error: {0}")]
  Transport(String),

  /// The response carried errors and no usable data; the store was left
  /// untouched.
  #[error("response returned {} error(s): {}", .0.len(), summarize(.0))]
  ResponseErrors(Vec<ResponseError>),
}

fn summarize(errors: &[ResponseError]) -> String {
  match errors.first() {
    Some(first) => first.message.clone(),
    None => "(empty)".to_string(),
  }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_conflict_message_names_key_and_field() {
    let err = CacheError::StructuralConflict {
      key: EntityKey::new("Chat:1"),
      field: "messages".to_string(),
      existing: ValueKind::List,
      incoming: ValueKind::Scalar,
    };
    let text = err.to_string();
    assert!(text.contains("Chat:1"));
    assert!(text.contains("messages"));
    assert!(text.contains("list"));
  }
}
