//! Long-lived resources bound into a pipeline's resolver.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::injector::Injector;
use crate::types::{BoxError, Capability, TypeKey, Value};

/// The value a component exposes for binding: `(key, name) → value`, plus the
/// capabilities it is also bound under.
#[derive(Clone)]
pub struct Instance {
  name: String,
  key: TypeKey,
  value: Value,
  capabilities: Vec<Capability>,
}

impl Instance {
  pub fn new<T: Any + Send + Sync>(name: impl Into<String>, value: T) -> Self {
    Self {
      name: name.into(),
      key: TypeKey::of::<T>(),
      value: Arc::new(value),
      capabilities: Vec::new(),
    }
  }

  /// Instance bound as `Arc<T>`, e.g. a shared connection pool.
  pub fn shared<T: ?Sized + Send + Sync + 'static>(name: impl Into<String>, value: Arc<T>) -> Self {
    Self::new(name, value)
  }

  /// Also binds the instance as `Arc<C>` under the same name.
  pub fn with_capability(mut self, capability: Capability) -> Self {
    self.capabilities.push(capability);
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn key(&self) -> TypeKey {
    self.key
  }

  pub fn type_name(&self) -> &'static str {
    self.key.name()
  }

  pub fn value(&self) -> &Value {
    &self.value
  }

  pub fn capabilities(&self) -> &[Capability] {
    &self.capabilities
  }

  /// Binds the instance and its capabilities into `injector`.
  pub fn bind(&self, injector: &Injector) {
    injector.provide(
      self.key,
      self.name.clone(),
      Arc::clone(&self.value),
      &self.capabilities,
    );
  }
}

impl std::fmt::Debug for Instance {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Instance")
      .field("name", &self.name)
      .field("key", &self.key)
      .field("capabilities", &self.capabilities)
      .finish()
  }
}

/// A configured resource such as a file handle or a client.
///
/// Started before the first tick, stopped after the pipeline has drained.
#[async_trait]
pub trait Component: Send + Sync {
  fn instance(&self) -> Instance;

  async fn start(&self) -> Result<(), BoxError> {
    Ok(())
  }

  async fn stop(&self) -> Result<(), BoxError> {
    Ok(())
  }
}
