//! Plain named-value record passed into and out of a stage.

use std::any::Any;
use std::sync::Arc;

use super::{Capability, TypeKey, Value};

/// One named, typed value in a [Record].
#[derive(Clone)]
pub struct Field {
  pub name: String,
  pub key: TypeKey,
  pub value: Value,
  /// Extra bindings published with this field when the record is captured.
  pub capabilities: Vec<Capability>,
}

impl std::fmt::Debug for Field {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Field")
      .field("name", &self.name)
      .field("key", &self.key)
      .field("capabilities", &self.capabilities)
      .finish()
  }
}

/// Stage input or output: an ordered set of uniquely named fields.
#[derive(Debug, Clone, Default)]
pub struct Record {
  fields: Vec<Field>,
}

impl Record {
  pub fn new() -> Self {
    Self::default()
  }

  /// Builder form of [Record::insert].
  pub fn with<T: Any + Send + Sync>(mut self, name: impl Into<String>, value: T) -> Self {
    self.insert(name, value);
    self
  }

  /// Inserts `value` as `name`, replacing any field of the same name.
  pub fn insert<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) {
    self.insert_value(name, TypeKey::of::<T>(), Arc::new(value));
  }

  /// Inserts a shared handle, bound as `Arc<T>` (use for trait objects).
  pub fn insert_shared<T: ?Sized + Send + Sync + 'static>(
    &mut self,
    name: impl Into<String>,
    value: Arc<T>,
  ) {
    self.insert(name, value);
  }

  /// Inserts `value` as `name` and also publishes it under each capability.
  pub fn insert_capable<T: Any + Send + Sync>(
    &mut self,
    name: impl Into<String>,
    value: T,
    capabilities: Vec<Capability>,
  ) {
    let name = name.into();
    self.insert(name.clone(), value);
    if let Some(field) = self.fields.iter_mut().find(|f| f.name == name) {
      field.capabilities = capabilities;
    }
  }

  /// Inserts an already type-erased value. `value` must hold a `key` typed value.
  pub fn insert_value(&mut self, name: impl Into<String>, key: TypeKey, value: Value) {
    let name = name.into();
    let field = Field {
      name,
      key,
      value,
      capabilities: Vec::new(),
    };
    match self.fields.iter_mut().find(|f| f.name == field.name) {
      Some(existing) => *existing = field,
      None => self.fields.push(field),
    }
  }

  pub fn field(&self, name: &str) -> Option<&Field> {
    self.fields.iter().find(|f| f.name == name)
  }

  /// Borrows field `name` as `T`; `None` if missing or of another type.
  pub fn get_ref<T: Any>(&self, name: &str) -> Option<&T> {
    self.field(name).and_then(|f| f.value.downcast_ref::<T>())
  }

  /// Clones field `name` out as `T`.
  pub fn get<T: Any + Clone>(&self, name: &str) -> Option<T> {
    self.get_ref::<T>(name).cloned()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.field(name).is_some()
  }

  pub fn fields(&self) -> &[Field] {
    &self.fields
  }

  pub fn into_fields(self) -> Vec<Field> {
    self.fields
  }

  pub fn len(&self) -> usize {
    self.fields.len()
  }

  pub fn is_empty(&self) -> bool {
    self.fields.is_empty()
  }
}
