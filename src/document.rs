//! Parsed query documents and their walk-time helpers.
//!
//! The query-language parser is an external collaborator; documents arrive
//! here already structured and immutable. This module provides the builder
//! used to construct them, variable resolution for arguments, the canonical
//! field storage keys shared by reader and writer, and a stable identity
//! hash for a (document, variables) pair.

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{CacheError, Result};
use crate::value::EntityKey;

/// Which root record a document's top-level fields live under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
  Query,
  Mutation,
}

/// Variable values supplied alongside a document at read/write time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variables(BTreeMap<String, serde_json::Value>);

impl Variables {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
    self.0.insert(name.into(), value);
    self
  }

  pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
    self.0.get(name)
  }
}

/// An argument value: a literal, or a variable resolved at walk time.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
  Lit(serde_json::Value),
  Var(String),
}

impl ArgValue {
  pub fn var(name: impl Into<String>) -> Self {
    ArgValue::Var(name.into())
  }

  fn resolve(&self, variables: &Variables) -> Result<serde_json::Value> {
    match self {
      ArgValue::Lit(v) => Ok(v.clone()),
      ArgValue::Var(name) => variables
        .get(name)
        .cloned()
        .ok_or_else(|| CacheError::MissingVariable(name.clone())),
    }
  }

  fn canonical(&self, out: &mut String) {
    match self {
      ArgValue::Lit(v) => canonical_json(v, out),
      ArgValue::Var(name) => {
        out.push('$');
        out.push_str(name);
      }
    }
  }
}

impl From<serde_json::Value> for ArgValue {
  fn from(v: serde_json::Value) -> Self {
    ArgValue::Lit(v)
  }
}

impl From<i64> for ArgValue {
  fn from(v: i64) -> Self {
    ArgValue::Lit(v.into())
  }
}

impl From<i32> for ArgValue {
  fn from(v: i32) -> Self {
    ArgValue::Lit(v.into())
  }
}

impl From<f64> for ArgValue {
  fn from(v: f64) -> Self {
    ArgValue::Lit(v.into())
  }
}

impl From<String> for ArgValue {
  fn from(v: String) -> Self {
    ArgValue::Lit(v.into())
  }
}

impl From<&str> for ArgValue {
  fn from(v: &str) -> Self {
    ArgValue::Lit(v.into())
  }
}

impl From<bool> for ArgValue {
  fn from(v: bool) -> Self {
    ArgValue::Lit(v.into())
  }
}

/// One selected field: name, optional alias, arguments, optional
/// sub-selection for object-valued fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
  pub name: String,
  pub alias: Option<String>,
  pub arguments: BTreeMap<String, ArgValue>,
  pub selection: Option<SelectionSet>,
}

impl Field {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      alias: None,
      arguments: BTreeMap::new(),
      selection: None,
    }
  }

  pub fn alias(mut self, alias: impl Into<String>) -> Self {
    self.alias = Some(alias.into());
    self
  }

  pub fn arg(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
    self.arguments.insert(name.into(), value.into());
    self
  }

  /// Attach (or extend) a sub-selection of fields.
  pub fn select(mut self, fields: impl IntoIterator<Item = Field>) -> Self {
    let set = self.selection.get_or_insert_with(SelectionSet::default);
    set
      .items
      .extend(fields.into_iter().map(Selection::Field));
    self
  }

  /// Spread a named fragment into this field's sub-selection.
  pub fn spread(mut self, fragment: impl Into<String>) -> Self {
    let set = self.selection.get_or_insert_with(SelectionSet::default);
    set.items.push(Selection::Spread(fragment.into()));
    self
  }

  /// The key this field appears under in a raw response.
  pub fn response_key(&self) -> &str {
    self.alias.as_deref().unwrap_or(&self.name)
  }

  /// The key this field is stored under in a record. Arguments are resolved
  /// against `variables` and serialized canonically, so the same call always
  /// collides and different arguments never do.
  pub fn storage_key(&self, variables: &Variables) -> Result<String> {
    let mut resolved = BTreeMap::new();
    for (name, arg) in &self.arguments {
      resolved.insert(name.clone(), arg.resolve(variables)?);
    }
    Ok(field_storage_key(&self.name, &resolved))
  }

  fn canonical(&self, out: &mut String) {
    if let Some(alias) = &self.alias {
      out.push_str(alias);
      out.push(':');
    }
    out.push_str(&self.name);
    if !self.arguments.is_empty() {
      out.push('(');
      for (name, arg) in &self.arguments {
        out.push_str(name);
        out.push(':');
        arg.canonical(out);
        out.push(',');
      }
      out.push(')');
    }
    if let Some(selection) = &self.selection {
      selection.canonical(out);
    }
  }
}

/// A selection item: a field, or a named fragment spread.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
  Field(Field),
  Spread(String),
}

/// An ordered set of selections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionSet {
  pub items: Vec<Selection>,
}

impl SelectionSet {
  pub fn of(fields: impl IntoIterator<Item = Field>) -> Self {
    Self {
      items: fields.into_iter().map(Selection::Field).collect(),
    }
  }

  pub fn spread(mut self, fragment: impl Into<String>) -> Self {
    self.items.push(Selection::Spread(fragment.into()));
    self
  }

  /// Flatten this selection into concrete fields, expanding fragment
  /// spreads against the document's definitions.
  pub fn expanded_fields<'a>(&'a self, document: &'a QueryDocument) -> Result<Vec<&'a Field>> {
    let mut fields = Vec::new();
    let mut in_progress = BTreeSet::new();
    self.collect_fields(document, &mut in_progress, &mut fields)?;
    Ok(fields)
  }

  fn collect_fields<'a>(
    &'a self,
    document: &'a QueryDocument,
    in_progress: &mut BTreeSet<String>,
    out: &mut Vec<&'a Field>,
  ) -> Result<()> {
    for item in &self.items {
      match item {
        Selection::Field(field) => out.push(field),
        Selection::Spread(name) => {
          let fragment = document
            .fragments
            .get(name)
            .ok_or_else(|| CacheError::UnknownFragment(name.clone()))?;
          if !in_progress.insert(name.clone()) {
            return Err(CacheError::FragmentCycle(name.clone()));
          }
          fragment.collect_fields(document, in_progress, out)?;
          in_progress.remove(name);
        }
      }
    }
    Ok(())
  }

  fn canonical(&self, out: &mut String) {
    out.push('{');
    for item in &self.items {
      match item {
        Selection::Field(field) => field.canonical(out),
        Selection::Spread(name) => {
          out.push_str("...");
          out.push_str(name);
        }
      }
      out.push(' ');
    }
    out.push('}');
  }
}

/// An already-parsed, immutable query or mutation document.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDocument {
  pub kind: OperationKind,
  pub selection: SelectionSet,
  pub fragments: BTreeMap<String, SelectionSet>,
}

impl QueryDocument {
  pub fn query(fields: impl IntoIterator<Item = Field>) -> Self {
    Self {
      kind: OperationKind::Query,
      selection: SelectionSet::of(fields),
      fragments: BTreeMap::new(),
    }
  }

  pub fn mutation(fields: impl IntoIterator<Item = Field>) -> Self {
    Self {
      kind: OperationKind::Mutation,
      selection: SelectionSet::of(fields),
      fragments: BTreeMap::new(),
    }
  }

  /// Define a named fragment usable from any spread in this document.
  pub fn with_fragment(mut self, name: impl Into<String>, selection: SelectionSet) -> Self {
    self.fragments.insert(name.into(), selection);
    self
  }

  /// The synthetic record this document's top-level fields live under.
  pub fn root_key(&self) -> EntityKey {
    match self.kind {
      OperationKind::Query => EntityKey::query_root(),
      OperationKind::Mutation => EntityKey::mutation_root(),
    }
  }

  /// Stable identity for this document + variables pair.
  ///
  /// SHA256 over the canonical document text and canonical variable values,
  /// so logically identical queries hash identically regardless of how they
  /// were constructed.
  pub fn cache_hash(&self, variables: &Variables) -> String {
    let mut input = String::new();
    input.push_str(match self.kind {
      OperationKind::Query => "query",
      OperationKind::Mutation => "mutation",
    });
    self.selection.canonical(&mut input);
    for (name, fragment) in &self.fragments {
      input.push_str("fragment ");
      input.push_str(name);
      fragment.canonical(&mut input);
    }
    input.push('|');
    for (name, value) in &variables.0 {
      input.push('$');
      input.push_str(name);
      input.push('=');
      canonical_json(value, &mut input);
      input.push(';');
    }

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// Storage key for a field identified by name plus already-resolved
/// arguments: the bare name when argument-free, otherwise
/// `name(a:1,b:"x")` with canonical argument serialization.
pub fn field_storage_key(name: &str, args: &BTreeMap<String, serde_json::Value>) -> String {
  if args.is_empty() {
    return name.to_string();
  }
  let mut out = String::from(name);
  out.push('(');
  let mut first = true;
  for (arg, value) in args {
    if !first {
      out.push(',');
    }
    first = false;
    out.push_str(arg);
    out.push(':');
    canonical_json(value, &mut out);
  }
  out.push(')');
  out
}

/// Serialize JSON with object keys sorted, so equal values always produce
/// equal text.
pub(crate) fn canonical_json(value: &serde_json::Value, out: &mut String) {
  match value {
    serde_json::Value::Null => out.push_str("null"),
    serde_json::Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
    serde_json::Value::Number(n) => out.push_str(&n.to_string()),
    serde_json::Value::String(s) => {
      // serde_json never fails to serialize a string
      out.push_str(&serde_json::to_string(s).unwrap_or_default());
    }
    serde_json::Value::Array(items) => {
      out.push('[');
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        canonical_json(item, out);
      }
      out.push(']');
    }
    serde_json::Value::Object(map) => {
      let mut keys: Vec<&String> = map.keys().collect();
      keys.sort();
      out.push('{');
      for (i, key) in keys.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        canonical_json(&serde_json::Value::String((*key).clone()), out);
        out.push(':');
        canonical_json(&map[*key], out);
      }
      out.push('}');
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_storage_key_without_arguments_is_the_name() {
    let field = Field::new("title");
    assert_eq!(field.storage_key(&Variables::new()).unwrap(), "title");
  }

  #[test]
  fn test_storage_key_same_arguments_collide() {
    let a = Field::new("messages").arg("limit", 10).arg("order", "asc");
    let b = Field::new("messages").arg("order", "asc").arg("limit", 10);
    let vars = Variables::new();
    assert_eq!(a.storage_key(&vars).unwrap(), b.storage_key(&vars).unwrap());
  }

  #[test]
  fn test_storage_key_different_arguments_diverge() {
    let a = Field::new("messages").arg("limit", 10);
    let b = Field::new("messages").arg("limit", 20);
    let vars = Variables::new();
    assert_ne!(a.storage_key(&vars).unwrap(), b.storage_key(&vars).unwrap());
  }

  #[test]
  fn test_storage_key_resolves_variables() {
    let field = Field::new("messages").arg("limit", ArgValue::var("n"));
    let vars = Variables::new().set("n", json!(10));
    assert_eq!(field.storage_key(&vars).unwrap(), "messages(limit:10)");

    let err = field.storage_key(&Variables::new()).unwrap_err();
    assert!(matches!(err, CacheError::MissingVariable(name) if name == "n"));
  }

  #[test]
  fn test_storage_key_canonicalizes_object_arguments() {
    let a = Field::new("search").arg("filter", json!({"b": 2, "a": 1}));
    let b = Field::new("search").arg("filter", json!({"a": 1, "b": 2}));
    let vars = Variables::new();
    assert_eq!(a.storage_key(&vars).unwrap(), b.storage_key(&vars).unwrap());
  }

  #[test]
  fn test_response_key_prefers_alias() {
    let field = Field::new("title").alias("headline");
    assert_eq!(field.response_key(), "headline");
  }

  #[test]
  fn test_fragment_expansion() {
    let doc = QueryDocument::query([Field::new("chat")
      .select([Field::new("id")])
      .spread("ChatFields")])
    .with_fragment(
      "ChatFields",
      SelectionSet::of([Field::new("title"), Field::new("topic")]),
    );

    let chat = match &doc.selection.items[0] {
      Selection::Field(f) => f,
      _ => unreachable!(),
    };
    let fields = chat
      .selection
      .as_ref()
      .unwrap()
      .expanded_fields(&doc)
      .unwrap();
    let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["id", "title", "topic"]);
  }

  #[test]
  fn test_unknown_fragment_errors() {
    let doc = QueryDocument::query([Field::new("chat").spread("Nope")]);
    let chat = match &doc.selection.items[0] {
      Selection::Field(f) => f,
      _ => unreachable!(),
    };
    let err = chat
      .selection
      .as_ref()
      .unwrap()
      .expanded_fields(&doc)
      .unwrap_err();
    assert!(matches!(err, CacheError::UnknownFragment(name) if name == "Nope"));
  }

  #[test]
  fn test_fragment_cycle_errors() {
    let doc = QueryDocument::query([Field::new("chat").spread("A")])
      .with_fragment("A", SelectionSet::default().spread("B"))
      .with_fragment("B", SelectionSet::default().spread("A"));
    let chat = match &doc.selection.items[0] {
      Selection::Field(f) => f,
      _ => unreachable!(),
    };
    let err = chat
      .selection
      .as_ref()
      .unwrap()
      .expanded_fields(&doc)
      .unwrap_err();
    assert!(matches!(err, CacheError::FragmentCycle(_)));
  }

  #[test]
  fn test_cache_hash_distinguishes_variables() {
    let doc = QueryDocument::query([Field::new("chat").arg("id", ArgValue::var("id"))]);
    let a = doc.cache_hash(&Variables::new().set("id", json!(1)));
    let b = doc.cache_hash(&Variables::new().set("id", json!(2)));
    let a2 = doc.cache_hash(&Variables::new().set("id", json!(1)));
    assert_eq!(a, a2);
    assert_ne!(a, b);
  }
}
