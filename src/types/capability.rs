//! Extra binding a value is declared to satisfy.

use std::sync::Arc;

use super::{TypeKey, Value};

/// A capability a bound value satisfies, registered next to the value's own binding
/// under the same name (e.g. a file handle also bound as `Arc<dyn Reader>`).
///
/// Lookups for the capability type are then a direct map hit instead of a scan.
#[derive(Clone)]
pub struct Capability {
  key: TypeKey,
  value: Value,
}

impl Capability {
  /// Capability bound as `Arc<T>`; pass the value already coerced, e.g.
  /// `Capability::of::<dyn Reader>(file.clone())`.
  pub fn of<T: ?Sized + Send + Sync + 'static>(value: Arc<T>) -> Self {
    Self {
      key: TypeKey::of::<Arc<T>>(),
      value: Arc::new(value),
    }
  }

  pub fn key(&self) -> TypeKey {
    self.key
  }

  pub fn value(&self) -> &Value {
    &self.value
  }
}

impl std::fmt::Debug for Capability {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Capability").field("key", &self.key).finish()
  }
}
