//! Type-directed value resolver.
//!
//! An [Injector] holds `(type, name) → value` bindings and an optional parent it
//! delegates to. Stages never touch it directly: [Injector::invoke] builds a stage's
//! input [Record] from its declared input ports, and [Injector::map_values] publishes
//! the stage's output record as new bindings so descendant stages can resolve them.
//!
//! Interface lookups are explicit: a value that satisfies a trait is registered once
//! more per [Capability] under the same name, so every lookup is a direct map hit.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tracing::{debug, instrument};

use crate::processor::Processor;
use crate::types::{BoxError, Capability, Port, Record, TypeKey, Value};

/// A declared input has no binding reachable from the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("value not found for field: {field}, type: {type_name}, name: {name}")]
pub struct MissingDependencyError {
  pub field: String,
  pub type_name: String,
  pub name: String,
}

impl MissingDependencyError {
  pub(crate) fn for_port(port: &Port) -> Self {
    Self {
      field: port.field().to_string(),
      type_name: port.type_name().to_string(),
      name: port.name().to_string(),
    }
  }
}

/// Failure to build a stage's input or to capture its output.
#[derive(Debug, Error)]
pub enum InjectError {
  #[error(transparent)]
  MissingDependency(#[from] MissingDependencyError),
  /// The stage returned an error.
  #[error("processor failed: {0}")]
  Process(#[source] BoxError),
  /// A declared output field was not produced.
  #[error("output field {field} (name: {name}) was not produced")]
  MissingOutput { field: String, name: String },
  /// A declared output field was produced with another type.
  #[error("output field {field} has type {actual}, declared {expected}")]
  InvalidOutput {
    field: String,
    expected: String,
    actual: String,
  },
  /// A declared output capability was not attached to the produced field.
  #[error("output field {field} does not carry declared capability {capability}")]
  MissingCapability { field: String, capability: String },
}

/// Placeholder for a binding known only by type, used by the dependency checker.
#[derive(Clone)]
enum Slot {
  Bound(Value),
  Declared,
}

/// Type + name keyed value store with parent delegation.
#[derive(Default)]
pub struct Injector {
  values: RwLock<HashMap<TypeKey, HashMap<String, Slot>>>,
  parent: RwLock<Option<Arc<Injector>>>,
  /// When set, every binding change is logged with this location.
  trace: Option<String>,
}

impl Injector {
  pub fn new() -> Self {
    Self::default()
  }

  /// Resolver that logs every binding it receives, tagged with `location`.
  pub fn traced(location: impl Into<String>) -> Self {
    Self {
      trace: Some(location.into()),
      ..Self::default()
    }
  }

  /// Fresh resolver delegating to `parent`.
  pub fn child_of(parent: &Arc<Injector>) -> Self {
    let inj = Self::new();
    inj.set_parent(Arc::clone(parent));
    inj
  }

  /// Installs or replaces the delegation target.
  pub fn set_parent(&self, parent: Arc<Injector>) {
    *self.parent.write().unwrap_or_else(PoisonError::into_inner) = Some(parent);
  }

  pub fn parent(&self) -> Option<Arc<Injector>> {
    self
      .parent
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// Binds `value` as `(key, name)`, overwriting any previous binding.
  /// `value` must hold a `key` typed value.
  pub fn set(&self, key: TypeKey, name: impl Into<String>, value: Value) -> &Self {
    self.put(key, name.into(), Slot::Bound(value))
  }

  /// Binds `value` under its own type.
  pub fn map<T: Any + Send + Sync>(&self, value: T, name: impl Into<String>) -> &Self {
    self.set(TypeKey::of::<T>(), name, Arc::new(value))
  }

  /// Binds a shared handle under `Arc<T>`, e.g. `map_to::<dyn Reader>(file, "input")`.
  pub fn map_to<T: ?Sized + Send + Sync + 'static>(
    &self,
    value: Arc<T>,
    name: impl Into<String>,
  ) -> &Self {
    self.map(value, name)
  }

  /// Binds `value` under `key` and once more under each capability, all as `name`.
  pub fn provide(
    &self,
    key: TypeKey,
    name: impl Into<String>,
    value: Value,
    capabilities: &[Capability],
  ) -> &Self {
    let name = name.into();
    self.set(key, name.clone(), value);
    for cap in capabilities {
      self.set(cap.key(), name.clone(), Arc::clone(cap.value()));
    }
    self
  }

  /// Records that `(key, name)` will be available without holding a value.
  /// [Injector::exists] sees it, [Injector::get] does not.
  pub fn declare(&self, key: TypeKey, name: impl Into<String>) -> &Self {
    self.put(key, name.into(), Slot::Declared)
  }

  fn put(&self, key: TypeKey, name: String, slot: Slot) -> &Self {
    if let Some(location) = &self.trace {
      debug!(location = %location, type_name = key.name(), name = %name, "binding set");
    }
    self
      .values
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .entry(key)
      .or_default()
      .insert(name, slot);
    self
  }

  fn lookup(&self, key: &TypeKey, name: &str) -> Option<Slot> {
    let own = self
      .values
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(key)
      .and_then(|m| m.get(name))
      .cloned();
    match own {
      Some(slot) => Some(slot),
      None => self.parent().and_then(|p| p.lookup(key, name)),
    }
  }

  /// Resolves `(key, name)` here, then through the parent chain.
  pub fn get(&self, key: &TypeKey, name: &str) -> Option<Value> {
    match self.lookup(key, name) {
      Some(Slot::Bound(v)) => Some(v),
      _ => None,
    }
  }

  /// Typed form of [Injector::get].
  pub fn get_as<T: Any + Clone>(&self, name: &str) -> Option<T> {
    self
      .get(&TypeKey::of::<T>(), name)
      .and_then(|v| v.downcast_ref::<T>().cloned())
  }

  /// Whether `(key, name)` is bound or declared anywhere up the chain.
  pub fn exists(&self, key: &TypeKey, name: &str) -> bool {
    self.lookup(key, name).is_some()
  }

  /// Resolves every port into an input record keyed by port field.
  #[instrument(level = "trace", skip(self, ports))]
  pub fn apply(&self, ports: &[Port]) -> Result<Record, InjectError> {
    let mut record = Record::new();
    for port in ports {
      let value = self
        .get(&port.key(), port.name())
        .ok_or_else(|| MissingDependencyError::for_port(port))?;
      record.insert_value(port.field(), port.key(), value);
    }
    Ok(record)
  }

  /// Builds the stage's input from its declared inputs and calls it.
  ///
  /// The outer error is a resolution failure; the inner result is whatever the stage
  /// returned, left for the caller to interpret (see [Injector::map_values]).
  pub async fn invoke(
    &self,
    processor: &dyn Processor,
  ) -> Result<Result<Record, BoxError>, InjectError> {
    let input = self.apply(processor.inputs())?;
    Ok(processor.process(input).await)
  }

  /// Publishes a stage result as bindings.
  ///
  /// A stage error is returned as is. Every declared output must be present with its
  /// declared type and capabilities; nothing is bound otherwise. Fields are bound under
  /// the matching port's binding name, undeclared fields under their own name.
  #[instrument(level = "trace", skip_all)]
  pub fn map_values(
    &self,
    outputs: &[Port],
    result: Result<Record, BoxError>,
  ) -> Result<(), InjectError> {
    let record = result.map_err(InjectError::Process)?;
    for port in outputs {
      let field = record
        .field(port.field())
        .ok_or_else(|| InjectError::MissingOutput {
          field: port.field().to_string(),
          name: port.name().to_string(),
        })?;
      if field.key != port.key() {
        return Err(InjectError::InvalidOutput {
          field: port.field().to_string(),
          expected: port.type_name().to_string(),
          actual: field.key.name().to_string(),
        });
      }
      if let Some(missing) = port
        .capabilities()
        .iter()
        .find(|key| !field.capabilities.iter().any(|c| c.key() == **key))
      {
        return Err(InjectError::MissingCapability {
          field: port.field().to_string(),
          capability: missing.name().to_string(),
        });
      }
    }
    for field in record.into_fields() {
      let name = outputs
        .iter()
        .find(|p| p.field() == field.name)
        .map(|p| p.name().to_string())
        .unwrap_or(field.name);
      self.provide(field.key, name, field.value, &field.capabilities);
    }
    Ok(())
  }

  /// Declares every output port and its capabilities, as [Injector::map_values] would
  /// bind them.
  pub fn declare_outputs(&self, outputs: &[Port]) {
    for port in outputs {
      self.declare(port.key(), port.name());
      for key in port.capabilities() {
        self.declare(*key, port.name());
      }
    }
  }
}
