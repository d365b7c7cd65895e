//! Declared stage input/output.

use std::any::Any;
use std::sync::Arc;

use serde::Serialize;

use super::TypeKey;

/// One declared stage input or output.
///
/// `field` is what the stage reads from its input record (or writes to its output
/// record); `name` is the binding name resolved against, or published to, the injector.
/// An output port may also list capabilities its value is published under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
  field: String,
  name: String,
  key: TypeKey,
  capabilities: Vec<TypeKey>,
}

impl Port {
  pub fn new<T: ?Sized + Any>(field: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      field: field.into(),
      name: name.into(),
      key: TypeKey::of::<T>(),
      capabilities: Vec::new(),
    }
  }

  /// Port whose field and binding name are the same.
  pub fn named<T: ?Sized + Any>(name: impl Into<String>) -> Self {
    let name = name.into();
    Self::new::<T>(name.clone(), name)
  }

  /// Port over a shared handle, i.e. the binding type is `Arc<T>`.
  pub fn shared<T: ?Sized + Any>(field: impl Into<String>, name: impl Into<String>) -> Self {
    Self::new::<Arc<T>>(field, name)
  }

  /// Output value is also published as `Arc<T>` under the same name. The stage must
  /// attach the matching [Capability](super::Capability) to the field.
  pub fn with_capability<T: ?Sized + Any>(mut self) -> Self {
    self.capabilities.push(TypeKey::of::<Arc<T>>());
    self
  }

  pub fn field(&self) -> &str {
    &self.field
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

  pub fn capabilities(&self) -> &[TypeKey] {
    &self.capabilities
  }
}

/// Serializable view of a [Port] for introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortView {
  pub field: String,
  pub name: String,
  pub type_name: String,
}

impl From<&Port> for PortView {
  fn from(port: &Port) -> Self {
    Self {
      field: port.field.clone(),
      name: port.name.clone(),
      type_name: port.type_name().to_string(),
    }
  }
}
