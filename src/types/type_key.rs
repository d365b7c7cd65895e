//! Runtime type identity used to key bindings.

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of a bound value's type: the `TypeId` plus a readable name for errors and views.
///
/// Equality and hashing use the `TypeId` only.
#[derive(Clone, Copy)]
pub struct TypeKey {
  id: TypeId,
  name: &'static str,
}

impl TypeKey {
  /// Key for `T`. Trait objects are bound through their shared handle, e.g.
  /// `TypeKey::of::<Arc<dyn Reader + Send + Sync>>()`.
  pub fn of<T: ?Sized + Any>() -> Self {
    Self {
      id: TypeId::of::<T>(),
      name: type_name::<T>(),
    }
  }

  pub fn id(&self) -> TypeId {
    self.id
  }

  pub fn name(&self) -> &'static str {
    self.name
  }
}

impl PartialEq for TypeKey {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id
  }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.id.hash(state);
  }
}

impl fmt::Debug for TypeKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "TypeKey({})", self.name)
  }
}

impl fmt::Display for TypeKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name)
  }
}
