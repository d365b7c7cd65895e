//! Factory tables for components and processors.
//!
//! A [Registry] is built once at startup, filled by explicit `register_*` calls or by
//! installing [Plugin]s, and passed by reference to whatever constructs pipelines.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument};

use crate::component::Component;
use crate::processor::{InvalidProcessor, Processor, validate};
use crate::types::BoxError;

/// Builds a `T` from its raw (JSON) configuration.
pub trait Factory<T: ?Sized>: Send + Sync {
  /// Example configuration shown to operators.
  fn sample_config(&self) -> &str;

  fn description(&self) -> &str;

  fn create(&self, raw_config: &str) -> Result<Arc<T>, BoxError>;
}

type Constructor<T> = Box<dyn Fn(&str) -> Result<Arc<T>, BoxError> + Send + Sync>;

/// [Factory] assembled from a sample config, a description and a constructor closure.
pub struct FactoryTemplate<T: ?Sized> {
  sample_config: String,
  description: String,
  constructor: Constructor<T>,
}

impl<T: ?Sized> FactoryTemplate<T> {
  pub fn new<F>(
    sample_config: impl Into<String>,
    description: impl Into<String>,
    constructor: F,
  ) -> Self
  where
    F: Fn(&str) -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
  {
    Self {
      sample_config: sample_config.into(),
      description: description.into(),
      constructor: Box::new(constructor),
    }
  }
}

impl FactoryTemplate<dyn Processor> {
  /// Factory that ignores its configuration and hands out one shared stage.
  pub fn with_processor(description: impl Into<String>, processor: Arc<dyn Processor>) -> Self {
    Self::new("", description, move |_raw| Ok(Arc::clone(&processor)))
  }
}

impl<T: ?Sized> Factory<T> for FactoryTemplate<T> {
  fn sample_config(&self) -> &str {
    &self.sample_config
  }

  fn description(&self) -> &str {
    &self.description
  }

  fn create(&self, raw_config: &str) -> Result<Arc<T>, BoxError> {
    (self.constructor)(raw_config)
  }
}

pub type ComponentFactory = Arc<dyn Factory<dyn Component>>;
pub type ProcessorFactory = Arc<dyn Factory<dyn Processor>>;

#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("error registering {kind}: name cannot be empty")]
  EmptyName { kind: &'static str },
  #[error("error registering {kind} '{name}': already registered")]
  AlreadyRegistered { kind: &'static str, name: String },
  #[error("no such {kind} type: '{name}'")]
  NotFound { kind: &'static str, name: String },
  #[error("error creating {kind} '{name}': {source}")]
  Create {
    kind: &'static str,
    name: String,
    #[source]
    source: BoxError,
  },
  #[error("invalid processor '{name}': {source}")]
  Invalid {
    name: String,
    #[source]
    source: InvalidProcessor,
  },
  #[error("plugin '{plugin}' failed to register: {source}")]
  Plugin {
    plugin: String,
    #[source]
    source: Box<RegistryError>,
  },
}

/// A bundle of factories registered in one call.
pub trait Plugin {
  fn name(&self) -> &str;

  fn register(&self, registry: &mut Registry) -> Result<(), RegistryError>;
}

/// Name → factory tables for components and processors.
#[derive(Default)]
pub struct Registry {
  components: HashMap<String, ComponentFactory>,
  processors: HashMap<String, ProcessorFactory>,
}

impl Registry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register_component(
    &mut self,
    name: impl Into<String>,
    factory: impl Factory<dyn Component> + 'static,
  ) -> Result<(), RegistryError> {
    let factory: ComponentFactory = Arc::new(factory);
    insert(&mut self.components, "component", name.into(), factory)
  }

  pub fn register_processor(
    &mut self,
    name: impl Into<String>,
    factory: impl Factory<dyn Processor> + 'static,
  ) -> Result<(), RegistryError> {
    let factory: ProcessorFactory = Arc::new(factory);
    insert(&mut self.processors, "processor", name.into(), factory)
  }

  pub fn component_factory(&self, name: &str) -> Result<ComponentFactory, RegistryError> {
    lookup(&self.components, "component", name)
  }

  pub fn processor_factory(&self, name: &str) -> Result<ProcessorFactory, RegistryError> {
    lookup(&self.processors, "processor", name)
  }

  /// Looks up the component factory `name` and builds an instance from `raw_config`.
  #[instrument(level = "trace", skip(self, raw_config))]
  pub fn new_component(
    &self,
    name: &str,
    raw_config: &str,
  ) -> Result<Arc<dyn Component>, RegistryError> {
    self
      .component_factory(name)?
      .create(raw_config)
      .map_err(|source| RegistryError::Create {
        kind: "component",
        name: name.to_string(),
        source,
      })
  }

  /// Like [Registry::new_component], and also validates the stage's ports.
  #[instrument(level = "trace", skip(self, raw_config))]
  pub fn new_processor(
    &self,
    name: &str,
    raw_config: &str,
  ) -> Result<Arc<dyn Processor>, RegistryError> {
    let processor = self
      .processor_factory(name)?
      .create(raw_config)
      .map_err(|source| RegistryError::Create {
        kind: "processor",
        name: name.to_string(),
        source,
      })?;
    validate(processor.as_ref()).map_err(|source| RegistryError::Invalid {
      name: name.to_string(),
      source,
    })?;
    Ok(processor)
  }

  /// Registers everything `plugin` provides.
  pub fn install(&mut self, plugin: &dyn Plugin) -> Result<(), RegistryError> {
    info!(plugin = %plugin.name(), "installing plugin");
    plugin
      .register(self)
      .map_err(|source| RegistryError::Plugin {
        plugin: plugin.name().to_string(),
        source: Box::new(source),
      })
  }

  /// Registered component names, sorted.
  pub fn component_names(&self) -> Vec<String> {
    sorted_keys(&self.components)
  }

  /// Registered processor names, sorted.
  pub fn processor_names(&self) -> Vec<String> {
    sorted_keys(&self.processors)
  }
}

fn insert<F: ?Sized>(
  table: &mut HashMap<String, Arc<F>>,
  kind: &'static str,
  name: String,
  factory: Arc<F>,
) -> Result<(), RegistryError> {
  if name.is_empty() {
    return Err(RegistryError::EmptyName { kind });
  }
  if table.contains_key(&name) {
    return Err(RegistryError::AlreadyRegistered { kind, name });
  }
  info!(kind, name = %name, "registered factory");
  table.insert(name, factory);
  Ok(())
}

fn lookup<F: ?Sized>(
  table: &HashMap<String, Arc<F>>,
  kind: &'static str,
  name: &str,
) -> Result<Arc<F>, RegistryError> {
  table.get(name).cloned().ok_or_else(|| RegistryError::NotFound {
    kind,
    name: name.to_string(),
  })
}

fn sorted_keys<V>(table: &HashMap<String, V>) -> Vec<String> {
  let mut names: Vec<String> = table.keys().cloned().collect();
  names.sort();
  names
}
