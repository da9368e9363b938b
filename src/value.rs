//! Stored value representation: the tagged shapes a record field can hold.

use std::collections::BTreeMap;
use std::fmt;

/// Stable identity string for one logical entity, e.g. `Chat:1`.
///
/// Two response fragments that resolve to the same key are merged into one
/// record. Keys for the synthetic roots are fixed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey(String);

impl EntityKey {
  pub fn new(key: impl Into<String>) -> Self {
    Self(key.into())
  }

  /// The synthetic record holding top-level query fields.
  pub fn query_root() -> Self {
    Self("ROOT_QUERY".to_string())
  }

  /// The synthetic record holding top-level mutation fields.
  pub fn mutation_root() -> Self {
    Self("ROOT_MUTATION".to_string())
  }

  pub fn is_root(&self) -> bool {
    self.0 == "ROOT_QUERY" || self.0 == "ROOT_MUTATION"
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for EntityKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for EntityKey {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

/// A leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
  Null,
  Bool(bool),
  Int(i64),
  Float(f64),
  String(String),
}

/// A stored field value.
///
/// `Reference` is a non-owning pointer to another record; it may dangle
/// (target never fetched, or evicted), which readers report as missing data.
/// `Object` is an unkeyed sub-object embedded inline in its owning record.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Scalar(Scalar),
  List(Vec<Value>),
  Reference(EntityKey),
  Object(BTreeMap<String, Value>),
}

/// Shape tag used for structural-conflict detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
  Scalar,
  List,
  Reference,
  Object,
}

impl fmt::Display for ValueKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ValueKind::Scalar => "scalar",
      ValueKind::List => "list",
      ValueKind::Reference => "reference",
      ValueKind::Object => "object",
    };
    f.write_str(name)
  }
}

impl Value {
  pub fn null() -> Self {
    Value::Scalar(Scalar::Null)
  }

  pub fn kind(&self) -> ValueKind {
    match self {
      Value::Scalar(_) => ValueKind::Scalar,
      Value::List(_) => ValueKind::List,
      Value::Reference(_) => ValueKind::Reference,
      Value::Object(_) => ValueKind::Object,
    }
  }

  pub fn is_null(&self) -> bool {
    matches!(self, Value::Scalar(Scalar::Null))
  }

  /// Whether overwriting `self` with `incoming` keeps the field's shape
  /// stable. Null is compatible in both directions (nullable fields), and
  /// references and embedded objects are both object-valued, so swapping
  /// between them is not a conflict.
  pub fn accepts(&self, incoming: &Value) -> bool {
    if self.is_null() || incoming.is_null() {
      return true;
    }
    match (self.kind(), incoming.kind()) {
      (a, b) if a == b => true,
      (ValueKind::Reference, ValueKind::Object) => true,
      (ValueKind::Object, ValueKind::Reference) => true,
      _ => false,
    }
  }

  /// Visit every entity key referenced from this value, recursively.
  pub fn for_each_reference(&self, visit: &mut impl FnMut(&EntityKey)) {
    match self {
      Value::Scalar(_) => {}
      Value::Reference(key) => visit(key),
      Value::List(items) => {
        for item in items {
          item.for_each_reference(visit);
        }
      }
      Value::Object(fields) => {
        for value in fields.values() {
          value.for_each_reference(visit);
        }
      }
    }
  }

  /// Render the raw normalized form as JSON. References render as
  /// `{"__ref": "<key>"}`; readers walking a selection set resolve them to
  /// the target record instead.
  pub fn to_json(&self) -> serde_json::Value {
    match self {
      Value::Scalar(s) => s.to_json(),
      Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
      Value::Reference(key) => {
        let mut map = serde_json::Map::new();
        map.insert(
          "__ref".to_string(),
          serde_json::Value::String(key.as_str().to_string()),
        );
        serde_json::Value::Object(map)
      }
      Value::Object(fields) => {
        let mut map = serde_json::Map::new();
        for (name, value) in fields {
          map.insert(name.clone(), value.to_json());
        }
        serde_json::Value::Object(map)
      }
    }
  }
}

impl Scalar {
  /// Convert a JSON leaf. Returns `None` for arrays and objects.
  pub fn from_json(value: &serde_json::Value) -> Option<Scalar> {
    match value {
      serde_json::Value::Null => Some(Scalar::Null),
      serde_json::Value::Bool(b) => Some(Scalar::Bool(*b)),
      serde_json::Value::Number(n) => {
        if let Some(i) = n.as_i64() {
          Some(Scalar::Int(i))
        } else {
          n.as_f64().map(Scalar::Float)
        }
      }
      serde_json::Value::String(s) => Some(Scalar::String(s.clone())),
      _ => None,
    }
  }

  pub fn to_json(&self) -> serde_json::Value {
    match self {
      Scalar::Null => serde_json::Value::Null,
      Scalar::Bool(b) => serde_json::Value::Bool(*b),
      Scalar::Int(i) => serde_json::Value::Number((*i).into()),
      Scalar::Float(f) => serde_json::Number::from_f64(*f)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null),
      Scalar::String(s) => serde_json::Value::String(s.clone()),
    }
  }
}
