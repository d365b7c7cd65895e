//! Tests for component instances.

use std::sync::Arc;

use crate::component::Instance;
use crate::injector::Injector;
use crate::types::Capability;

trait Sink: Send + Sync {
  fn id(&self) -> u32;
}

struct Memory(u32);

impl Sink for Memory {
  fn id(&self) -> u32 {
    self.0
  }
}

#[test]
fn instance_reports_name_and_type() {
  let inst = Instance::new("limit", 10_u64);
  assert_eq!(inst.name(), "limit");
  assert_eq!(inst.type_name(), "u64");
  assert!(inst.capabilities().is_empty());
}

#[test]
fn bind_publishes_value_and_capabilities() {
  let mem = Arc::new(Memory(3));
  let inst =
    Instance::shared("store", mem.clone()).with_capability(Capability::of::<dyn Sink>(mem));
  let inj = Injector::new();
  inst.bind(&inj);
  assert_eq!(inj.get_as::<Arc<Memory>>("store").unwrap().id(), 3);
  assert_eq!(inj.get_as::<Arc<dyn Sink>>("store").unwrap().id(), 3);
}
