//! Tests for `Record`.

use std::sync::Arc;

use super::{Capability, Record, TypeKey};

trait Greeter: Send + Sync {
  fn greet(&self) -> String;
}

struct English;

impl Greeter for English {
  fn greet(&self) -> String {
    "hello".to_string()
  }
}

#[test]
fn insert_and_get_typed() {
  let r = Record::new().with("msg", "hi".to_string()).with("n", 3_u32);
  assert_eq!(r.get::<String>("msg").as_deref(), Some("hi"));
  assert_eq!(r.get::<u32>("n"), Some(3));
  assert_eq!(r.len(), 2);
}

#[test]
fn get_with_wrong_type_is_none() {
  let r = Record::new().with("n", 3_u32);
  assert!(r.get::<u64>("n").is_none());
  assert!(r.get::<u32>("missing").is_none());
}

#[test]
fn insert_replaces_same_name() {
  let mut r = Record::new();
  r.insert("n", 1_u32);
  r.insert("n", "one".to_string());
  assert_eq!(r.len(), 1);
  assert_eq!(r.field("n").unwrap().key, TypeKey::of::<String>());
}

#[test]
fn insert_shared_binds_arc_handle() {
  let mut r = Record::new();
  let g: Arc<dyn Greeter> = Arc::new(English);
  r.insert_shared("greeter", g);
  let back = r.get::<Arc<dyn Greeter>>("greeter").unwrap();
  assert_eq!(back.greet(), "hello");
}

#[test]
fn insert_capable_attaches_capabilities() {
  let mut r = Record::new();
  let english = Arc::new(English);
  r.insert_capable(
    "greeter",
    english.clone(),
    vec![Capability::of::<dyn Greeter>(english)],
  );
  let field = r.field("greeter").unwrap();
  assert_eq!(field.capabilities.len(), 1);
  assert_eq!(
    field.capabilities[0].key(),
    TypeKey::of::<Arc<dyn Greeter>>()
  );
}
