//! Namespaced metrics store.
//!
//! A [Monitor] is a view onto one namespace of a shared `namespace → key → value`
//! map. [Monitor::with] hands out views onto other namespaces of the same map, so a
//! pipeline and each of its streams report into one store that [Monitor::for_each]
//! walks consistently under a single lock.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Local};

/// Layout used for every time value.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A metric value.
#[derive(Clone)]
pub enum Var {
  Int(i64),
  Float(f64),
  Str(String),
  Time(DateTime<Local>),
  /// Shown truncated to whole seconds, e.g. `1h2m3s`.
  Elapsed(Duration),
  /// Computed each time it is read.
  Func(Arc<dyn Fn() -> Var + Send + Sync>),
}

impl Var {
  pub fn func(f: impl Fn() -> Var + Send + Sync + 'static) -> Self {
    Self::Func(Arc::new(f))
  }

  pub fn now() -> Self {
    Self::Time(Local::now())
  }

  /// Integer value, evaluating live values.
  pub fn as_int(&self) -> Option<i64> {
    match self {
      Self::Int(n) => Some(*n),
      Self::Func(f) => f().as_int(),
      _ => None,
    }
  }

  /// JSON-ish rendering: numbers bare, everything else quoted.
  fn write_json(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Int(_) | Self::Float(_) => write!(f, "{self}"),
      Self::Func(g) => g().write_json(f),
      _ => write!(f, "{:?}", self.to_string()),
    }
  }
}

impl fmt::Display for Var {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Int(n) => write!(f, "{n}"),
      Self::Float(x) => write!(f, "{x}"),
      Self::Str(s) => f.write_str(s),
      Self::Time(t) => write!(f, "{}", t.format(TIME_FORMAT)),
      Self::Elapsed(d) => write_elapsed(f, *d),
      Self::Func(g) => write!(f, "{}", g()),
    }
  }
}

impl fmt::Debug for Var {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Func(_) => write!(f, "Func({self})"),
      Self::Int(_) => write!(f, "Int({self})"),
      Self::Float(_) => write!(f, "Float({self})"),
      Self::Str(s) => write!(f, "Str({s:?})"),
      Self::Time(_) => write!(f, "Time({self})"),
      Self::Elapsed(_) => write!(f, "Elapsed({self})"),
    }
  }
}

impl From<i64> for Var {
  fn from(n: i64) -> Self {
    Self::Int(n)
  }
}

impl From<f64> for Var {
  fn from(x: f64) -> Self {
    Self::Float(x)
  }
}

impl From<&str> for Var {
  fn from(s: &str) -> Self {
    Self::Str(s.to_string())
  }
}

impl From<String> for Var {
  fn from(s: String) -> Self {
    Self::Str(s)
  }
}

fn write_elapsed(f: &mut fmt::Formatter<'_>, d: Duration) -> fmt::Result {
  let secs = d.as_secs();
  let (h, m, s) = (secs / 3600, secs % 3600 / 60, secs % 60);
  if h > 0 {
    write!(f, "{h}h{m}m{s}s")
  } else if m > 0 {
    write!(f, "{m}m{s}s")
  } else {
    write!(f, "{s}s")
  }
}

type Namespaces = BTreeMap<String, BTreeMap<String, Var>>;

/// View onto one namespace of a shared metrics map.
#[derive(Clone)]
pub struct Monitor {
  namespace: String,
  inner: Arc<RwLock<Namespaces>>,
}

impl Monitor {
  pub fn new(namespace: impl Into<String>) -> Self {
    let namespace = namespace.into();
    let mut map = Namespaces::new();
    map.insert(namespace.clone(), BTreeMap::new());
    Self {
      namespace,
      inner: Arc::new(RwLock::new(map)),
    }
  }

  /// View onto `namespace`, created if absent, sharing this monitor's store.
  pub fn with(&self, namespace: impl Into<String>) -> Monitor {
    let namespace = namespace.into();
    self
      .inner
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .entry(namespace.clone())
      .or_default();
    Self {
      namespace,
      inner: Arc::clone(&self.inner),
    }
  }

  pub fn namespace(&self) -> &str {
    &self.namespace
  }

  fn update<R>(&self, f: impl FnOnce(&mut BTreeMap<String, Var>) -> R) -> R {
    let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
    f(map.entry(self.namespace.clone()).or_default())
  }

  /// Adds `delta` to an integer counter, starting from 0. A non-integer value under
  /// `key` is left alone.
  pub fn add(&self, key: &str, delta: i64) {
    self.update(|m| {
      if let Var::Int(n) = m.entry(key.to_string()).or_insert(Var::Int(0)) {
        *n += delta;
      }
    });
  }

  /// Float form of [Monitor::add].
  pub fn add_float(&self, key: &str, delta: f64) {
    self.update(|m| {
      if let Var::Float(x) = m.entry(key.to_string()).or_insert(Var::Float(0.0)) {
        *x += delta;
      }
    });
  }

  pub fn set(&self, key: &str, value: impl Into<Var>) {
    let value = value.into();
    self.update(|m| m.insert(key.to_string(), value));
  }

  /// Current value under `key`; an empty string if there is none.
  pub fn get(&self, key: &str) -> Var {
    self
      .inner
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(&self.namespace)
      .and_then(|m| m.get(key))
      .cloned()
      .unwrap_or_else(|| Var::Str(String::new()))
  }

  pub fn delete(&self, key: &str) {
    self.update(|m| m.remove(key));
  }

  /// Visits every value in every namespace, in sorted order.
  pub fn for_each(&self, mut f: impl FnMut(&str, &str, &Var)) {
    let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
    for (namespace, vars) in map.iter() {
      for (key, var) in vars {
        f(namespace, key, var);
      }
    }
  }
}

impl fmt::Display for Monitor {
  /// This namespace as a JSON-like object.
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
    f.write_str("{")?;
    if let Some(vars) = map.get(&self.namespace) {
      for (i, (key, var)) in vars.iter().enumerate() {
        if i > 0 {
          f.write_str(", ")?;
        }
        write!(f, "{key:?}: ")?;
        var.write_json(f)?;
      }
    }
    f.write_str("}")
  }
}

impl fmt::Debug for Monitor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Monitor")
      .field("namespace", &self.namespace)
      .finish()
  }
}
