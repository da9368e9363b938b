//! Entity key derivation from raw response objects.

use crate::config::CacheConfig;
use crate::document::canonical_json;
use crate::error::{CacheError, Result};
use crate::value::EntityKey;

/// Computes stable cache keys for response objects.
///
/// An object is keyed when its type discriminant and key field(s) are all
/// present. `None` means the object is not independently identifiable and
/// must be embedded inline in its owner. The resolver never falls back to a
/// constant or empty key.
pub struct IdentityResolver<'a> {
  config: &'a CacheConfig,
}

impl<'a> IdentityResolver<'a> {
  pub fn new(config: &'a CacheConfig) -> Self {
    Self { config }
  }

  /// Resolve the key for `object` at `path` (used for error reporting).
  ///
  /// Types declared in the configuration fail hard when a key field is
  /// missing; undeclared types embed instead.
  pub fn resolve_key(
    &self,
    object: &serde_json::Map<String, serde_json::Value>,
    path: &str,
  ) -> Result<Option<EntityKey>> {
    let type_name = match object.get(&self.config.type_field).and_then(|v| v.as_str()) {
      Some(name) => name,
      None => return Ok(None),
    };

    let declared = self.config.types.get(type_name);
    let default_policy;
    let key_fields = match declared {
      Some(policy) => &policy.key_fields,
      None => {
        default_policy = vec!["id".to_string()];
        &default_policy
      }
    };

    let mut parts = Vec::with_capacity(key_fields.len());
    for field in key_fields {
      match object.get(field) {
        Some(value) if is_key_scalar(value) => parts.push((field.as_str(), value)),
        _ => {
          if declared.is_some() {
            return Err(CacheError::IdentityResolution {
              type_name: type_name.to_string(),
              path: path.to_string(),
              missing: field.clone(),
            });
          }
          return Ok(None);
        }
      }
    }

    Ok(Some(build_key(type_name, &parts)))
  }
}

fn is_key_scalar(value: &serde_json::Value) -> bool {
  value.is_string() || value.is_number() || value.is_boolean()
}

fn build_key(type_name: &str, parts: &[(&str, &serde_json::Value)]) -> EntityKey {
  let mut key = String::from(type_name);
  key.push(':');
  if let [(_, only)] = parts {
    // Single-field keys stay readable: `Chat:1`, not `Chat:{"id":1}`.
    match only {
      serde_json::Value::String(s) => key.push_str(s),
      other => {
        let mut text = String::new();
        canonical_json(other, &mut text);
        key.push_str(&text);
      }
    }
  } else {
    key.push('{');
    for (i, (name, value)) in parts.iter().enumerate() {
      if i > 0 {
        key.push(',');
      }
      key.push_str(name);
      key.push(':');
      canonical_json(value, &mut key);
    }
    key.push('}');
  }
  EntityKey::new(key)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::TypePolicy;
  use serde_json::json;

  fn object(v: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match v {
      serde_json::Value::Object(map) => map,
      _ => panic!("expected object"),
    }
  }

  #[test]
  fn test_default_policy_keys_on_id() {
    let config = CacheConfig::default();
    let resolver = IdentityResolver::new(&config);
    let key = resolver
      .resolve_key(&object(json!({"__typename": "Chat", "id": 1})), "chat")
      .unwrap();
    assert_eq!(key, Some(EntityKey::new("Chat:1")));
  }

  #[test]
  fn test_missing_type_name_embeds() {
    let config = CacheConfig::default();
    let resolver = IdentityResolver::new(&config);
    let key = resolver
      .resolve_key(&object(json!({"id": 1})), "chat")
      .unwrap();
    assert_eq!(key, None);
  }

  #[test]
  fn test_undeclared_type_without_id_embeds() {
    let config = CacheConfig::default();
    let resolver = IdentityResolver::new(&config);
    let key = resolver
      .resolve_key(
        &object(json!({"__typename": "Stats", "count": 4})),
        "chat.stats",
      )
      .unwrap();
    assert_eq!(key, None);
  }

  #[test]
  fn test_declared_type_without_key_field_is_a_hard_error() {
    let config = CacheConfig::default().with_type("Chat", TypePolicy::default());
    let resolver = IdentityResolver::new(&config);
    let err = resolver
      .resolve_key(&object(json!({"__typename": "Chat", "title": "A"})), "chat")
      .unwrap_err();
    match err {
      CacheError::IdentityResolution {
        type_name, missing, ..
      } => {
        assert_eq!(type_name, "Chat");
        assert_eq!(missing, "id");
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn test_composite_key_is_deterministic() {
    let config =
      CacheConfig::default().with_type("Membership", TypePolicy::keyed_on(["chat_id", "user_id"]));
    let resolver = IdentityResolver::new(&config);
    let a = resolver
      .resolve_key(
        &object(json!({"__typename": "Membership", "chat_id": 1, "user_id": 7})),
        "m",
      )
      .unwrap();
    let b = resolver
      .resolve_key(
        &object(json!({"user_id": 7, "chat_id": 1, "__typename": "Membership"})),
        "m",
      )
      .unwrap();
    assert_eq!(a, b);
    assert_eq!(a, Some(EntityKey::new("Membership:{chat_id:1,user_id:7}")));
  }

  #[test]
  fn test_object_valued_id_embeds_for_undeclared_types() {
    let config = CacheConfig::default();
    let resolver = IdentityResolver::new(&config);
    let key = resolver
      .resolve_key(
        &object(json!({"__typename": "Weird", "id": {"nested": true}})),
        "w",
      )
      .unwrap();
    assert_eq!(key, None);
  }
}
