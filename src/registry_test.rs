//! Tests for `Registry`.

use std::sync::Arc;

use crate::component::{Component, Instance};
use crate::processor::{FnProcessor, Processor};
use crate::registry::{Factory, FactoryTemplate, Plugin, Registry, RegistryError};
use crate::types::{BoxError, Port, Record};

struct Counter {
  start: u64,
}

impl Component for Counter {
  fn instance(&self) -> Instance {
    Instance::new("counter", self.start)
  }
}

fn counter_factory() -> FactoryTemplate<dyn Component> {
  FactoryTemplate::new(r#"{"start": 0}"#, "counts things", |raw: &str| {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let start = value.get("start").and_then(|v| v.as_u64()).unwrap_or(0);
    Ok(Arc::new(Counter { start }) as Arc<dyn Component>)
  })
}

fn echo() -> Arc<dyn Processor> {
  FnProcessor::new(|r: Record| async move { Ok::<_, BoxError>(r) })
    .input(Port::named::<String>("in"))
    .output(Port::named::<String>("in"))
    .into_arc()
}

#[test]
fn registers_and_creates_component() {
  let mut reg = Registry::new();
  reg.register_component("counter", counter_factory()).unwrap();
  let factory = reg.component_factory("counter").unwrap();
  assert_eq!(factory.description(), "counts things");
  assert_eq!(factory.sample_config(), r#"{"start": 0}"#);
  let comp = reg.new_component("counter", r#"{"start": 7}"#).unwrap();
  let inst = comp.instance();
  assert_eq!(inst.name(), "counter");
  assert_eq!(inst.value().downcast_ref::<u64>(), Some(&7));
}

#[test]
fn constructor_error_is_reported_with_name() {
  let mut reg = Registry::new();
  reg.register_component("counter", counter_factory()).unwrap();
  let err = reg.new_component("counter", "not json").err().unwrap();
  assert!(matches!(
    err,
    RegistryError::Create { kind: "component", ref name, .. } if name == "counter"
  ));
}

#[test]
fn rejects_empty_and_duplicate_names() {
  let mut reg = Registry::new();
  assert!(matches!(
    reg.register_component("", counter_factory()),
    Err(RegistryError::EmptyName { kind: "component" })
  ));
  reg.register_component("counter", counter_factory()).unwrap();
  assert!(matches!(
    reg.register_component("counter", counter_factory()),
    Err(RegistryError::AlreadyRegistered { .. })
  ));
}

#[test]
fn unknown_factory_is_not_found() {
  let reg = Registry::new();
  assert!(matches!(
    reg.new_processor("missing", ""),
    Err(RegistryError::NotFound { kind: "processor", .. })
  ));
}

#[test]
fn new_processor_validates_ports() {
  let mut reg = Registry::new();
  let unnamed = FnProcessor::new(|r: Record| async move { Ok::<_, BoxError>(r) })
    .input(Port::new::<String>("in", ""))
    .into_arc();
  reg
    .register_processor("bad", FactoryTemplate::with_processor("bad ports", unnamed))
    .unwrap();
  reg
    .register_processor("echo", FactoryTemplate::with_processor("echo", echo()))
    .unwrap();
  assert!(matches!(
    reg.new_processor("bad", ""),
    Err(RegistryError::Invalid { .. })
  ));
  let p = reg.new_processor("echo", "").unwrap();
  assert_eq!(p.inputs().len(), 1);
}

struct Bundle;

impl Plugin for Bundle {
  fn name(&self) -> &str {
    "bundle"
  }

  fn register(&self, registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register_component("counter", counter_factory())?;
    registry.register_processor("echo", FactoryTemplate::with_processor("echo", echo()))
  }
}

#[test]
fn install_registers_plugin_factories() {
  let mut reg = Registry::new();
  reg.install(&Bundle).unwrap();
  assert_eq!(reg.component_names(), vec!["counter".to_string()]);
  assert_eq!(reg.processor_names(), vec!["echo".to_string()]);
  assert!(matches!(
    reg.install(&Bundle),
    Err(RegistryError::Plugin { .. })
  ));
}
