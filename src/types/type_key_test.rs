//! Tests for `TypeKey`.

use std::collections::HashSet;
use std::sync::Arc;

use super::TypeKey;

trait Reader: Send + Sync {}

#[test]
fn same_type_same_key() {
  assert_eq!(TypeKey::of::<String>(), TypeKey::of::<String>());
  assert_ne!(TypeKey::of::<String>(), TypeKey::of::<&'static str>());
}

#[test]
fn name_is_readable() {
  assert!(TypeKey::of::<String>().name().contains("String"));
  assert_eq!(TypeKey::of::<u32>().to_string(), "u32");
}

#[test]
fn trait_object_handles_are_distinct_from_concrete_types() {
  let mut set = HashSet::new();
  set.insert(TypeKey::of::<Arc<dyn Reader>>());
  set.insert(TypeKey::of::<Arc<String>>());
  set.insert(TypeKey::of::<Arc<dyn Reader>>());
  assert_eq!(set.len(), 2);
}
