//! Pipeline configuration as read from JSON.
//!
//! ```json
//! {
//!   "name": "ingest",
//!   "bootstrap": true,
//!   "components": [{ "file_reader": "{\"path\": \"in.txt\"}" }],
//!   "processors": [{ "split_lines": "" }, { "count": "" }],
//!   "pipeline": {
//!     "schedule": "*/5 * * * * *",
//!     "stream": { "name": "split_lines", "replica": 2, "childs": [{ "name": "count" }] }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::component::Component;
use crate::processor::Processor;
use crate::registry::{Registry, RegistryError};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("invalid pipeline config: {0}")]
  Json(#[from] serde_json::Error),
  #[error("no pipeline config found in {0}")]
  NoConfigFound(String),
}

/// One pipeline: its components, its stages and how they are arranged and scheduled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
  pub name: String,
  /// Start this pipeline when the manager bootstraps.
  #[serde(default)]
  pub bootstrap: bool,
  /// Each entry maps a component factory name to its raw configuration.
  #[serde(default)]
  pub components: Vec<BTreeMap<String, String>>,
  /// Each entry maps a processor factory name to its raw configuration.
  #[serde(default)]
  pub processors: Vec<BTreeMap<String, String>>,
  #[serde(default)]
  pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
  /// Cron expression with a seconds field, or empty to run back to back.
  #[serde(default)]
  pub schedule: String,
  #[serde(default)]
  pub stream: Option<StreamConfig>,
}

/// Shape of one stream node; `name` refers to a configured processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
  pub name: String,
  #[serde(default = "default_replica")]
  pub replica: usize,
  #[serde(default)]
  pub buffer_size: usize,
  #[serde(default)]
  pub childs: Vec<StreamConfig>,
}

fn default_replica() -> usize {
  1
}

impl StreamConfig {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      replica: default_replica(),
      buffer_size: 0,
      childs: Vec::new(),
    }
  }

  pub fn with_replica(mut self, replica: usize) -> Self {
    self.replica = replica;
    self
  }

  pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
    self.buffer_size = buffer_size;
    self
  }

  pub fn with_child(mut self, child: StreamConfig) -> Self {
    self.childs.push(child);
    self
  }
}

/// A component built from config, kept with its origin for introspection.
#[derive(Clone)]
pub struct NamedComponent {
  pub name: String,
  pub raw_config: String,
  pub sample_config: String,
  pub description: String,
  pub component: Arc<dyn Component>,
}

impl NamedComponent {
  /// A component wired up in code rather than built by a factory.
  pub fn new(name: impl Into<String>, component: Arc<dyn Component>) -> Self {
    Self {
      name: name.into(),
      raw_config: String::new(),
      sample_config: String::new(),
      description: String::new(),
      component,
    }
  }
}

/// A stage built from config, kept with its origin for introspection.
#[derive(Clone)]
pub struct NamedProcessor {
  pub name: String,
  pub raw_config: String,
  pub description: String,
  pub processor: Arc<dyn Processor>,
}

impl NamedProcessor {
  pub fn new(name: impl Into<String>, processor: Arc<dyn Processor>) -> Self {
    Self {
      name: name.into(),
      raw_config: String::new(),
      description: String::new(),
      processor,
    }
  }
}

impl Config {
  pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
    Ok(serde_json::from_str(s)?)
  }

  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.display().to_string(),
      source,
    })?;
    Self::from_json_str(&raw)
  }

  /// Instantiates every configured component, in order.
  pub fn new_components(&self, registry: &Registry) -> Result<Vec<NamedComponent>, RegistryError> {
    let mut components = Vec::new();
    for entry in &self.components {
      for (name, raw_config) in entry {
        let factory = registry.component_factory(name)?;
        components.push(NamedComponent {
          name: name.clone(),
          raw_config: raw_config.clone(),
          sample_config: factory.sample_config().to_string(),
          description: factory.description().to_string(),
          component: registry.new_component(name, raw_config)?,
        });
      }
    }
    Ok(components)
  }

  /// Instantiates and validates every configured processor, in order.
  pub fn new_processors(&self, registry: &Registry) -> Result<Vec<NamedProcessor>, RegistryError> {
    let mut processors = Vec::new();
    for entry in &self.processors {
      for (name, raw_config) in entry {
        let factory = registry.processor_factory(name)?;
        processors.push(NamedProcessor {
          name: name.clone(),
          raw_config: raw_config.clone(),
          description: factory.description().to_string(),
          processor: registry.new_processor(name, raw_config)?,
        });
      }
    }
    Ok(processors)
  }
}

/// Reads one config file, or every `*.json` file in a directory (sorted by path).
pub fn load_configs(path: impl AsRef<Path>) -> Result<Vec<Config>, ConfigError> {
  let path = path.as_ref();
  if !path.is_dir() {
    return Ok(vec![Config::from_json_file(path)?]);
  }
  let io_err = |source: std::io::Error| ConfigError::Io {
    path: path.display().to_string(),
    source,
  };
  let mut files = Vec::new();
  for entry in std::fs::read_dir(path).map_err(io_err)? {
    let file = entry.map_err(io_err)?.path();
    if file.is_file() && file.extension().is_some_and(|ext| ext == "json") {
      files.push(file);
    }
  }
  if files.is_empty() {
    return Err(ConfigError::NoConfigFound(path.display().to_string()));
  }
  files.sort();
  files.iter().map(Config::from_json_file).collect()
}
