//! Tests for config parsing and loading.

use std::sync::Arc;

use crate::component::{Component, Instance};
use crate::config::{Config, ConfigError, StreamConfig, load_configs};
use crate::processor::FnProcessor;
use crate::registry::{FactoryTemplate, Registry};
use crate::types::{BoxError, Record};

const SAMPLE: &str = r#"{
  "name": "ingest",
  "bootstrap": true,
  "components": [{ "limit": "5" }],
  "processors": [{ "source": "" }, { "sink": "" }],
  "pipeline": {
    "schedule": "*/5 * * * * *",
    "stream": { "name": "source", "replica": 2, "childs": [{ "name": "sink", "buffer_size": 8 }] }
  }
}"#;

#[test]
fn parses_full_config() {
  let config = Config::from_json_str(SAMPLE).unwrap();
  assert_eq!(config.name, "ingest");
  assert!(config.bootstrap);
  assert_eq!(config.components[0].get("limit").map(String::as_str), Some("5"));
  assert_eq!(config.pipeline.schedule, "*/5 * * * * *");
  let stream = config.pipeline.stream.unwrap();
  assert_eq!(
    stream,
    StreamConfig::new("source")
      .with_replica(2)
      .with_child(StreamConfig::new("sink").with_buffer_size(8))
  );
}

#[test]
fn omitted_fields_take_defaults() {
  let config =
    Config::from_json_str(r#"{ "name": "bare", "pipeline": { "stream": { "name": "a" } } }"#)
      .unwrap();
  assert!(!config.bootstrap);
  assert!(config.components.is_empty());
  assert_eq!(config.pipeline.schedule, "");
  let stream = config.pipeline.stream.unwrap();
  assert_eq!(stream.replica, 1);
  assert_eq!(stream.buffer_size, 0);
}

#[test]
fn malformed_json_is_an_error() {
  assert!(matches!(
    Config::from_json_str("{ name: "),
    Err(ConfigError::Json(_))
  ));
}

struct Limit(u32);

impl Component for Limit {
  fn instance(&self) -> Instance {
    Instance::new("limit", self.0)
  }
}

#[test]
fn builds_components_and_processors_from_registry() {
  let mut registry = Registry::new();
  registry
    .register_component(
      "limit",
      FactoryTemplate::new("5", "a number", |raw: &str| {
        let n: u32 = raw.trim().parse()?;
        Ok(Arc::new(Limit(n)) as Arc<dyn Component>)
      }),
    )
    .unwrap();
  for name in ["source", "sink"] {
    let stage = FnProcessor::new(|r: Record| async move { Ok::<_, BoxError>(r) }).into_arc();
    registry
      .register_processor(name, FactoryTemplate::with_processor(name, stage))
      .unwrap();
  }
  let config = Config::from_json_str(SAMPLE).unwrap();
  let components = config.new_components(&registry).unwrap();
  assert_eq!(components.len(), 1);
  assert_eq!(components[0].raw_config, "5");
  assert_eq!(
    components[0].component.instance().value().downcast_ref::<u32>(),
    Some(&5)
  );
  let processors = config.new_processors(&registry).unwrap();
  let names: Vec<&str> = processors.iter().map(|p| p.name.as_str()).collect();
  assert_eq!(names, vec!["source", "sink"]);
}

#[test]
fn unknown_processor_fails_construction() {
  let config = Config::from_json_str(SAMPLE).unwrap();
  assert!(config.new_processors(&Registry::new()).is_err());
}

#[test]
fn loads_single_file_and_directory() {
  let dir = tempfile::tempdir().unwrap();
  let a = dir.path().join("a.json");
  std::fs::write(&a, r#"{ "name": "a" }"#).unwrap();
  std::fs::write(dir.path().join("b.json"), r#"{ "name": "b" }"#).unwrap();
  std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

  let single = load_configs(&a).unwrap();
  assert_eq!(single.len(), 1);
  assert_eq!(single[0].name, "a");

  let all = load_configs(dir.path()).unwrap();
  let names: Vec<&str> = all.iter().map(|c| c.name.as_str()).collect();
  assert_eq!(names, vec!["a", "b"]);
}

#[test]
fn empty_directory_has_no_config() {
  let dir = tempfile::tempdir().unwrap();
  assert!(matches!(
    load_configs(dir.path()),
    Err(ConfigError::NoConfigFound(_))
  ));
}

#[test]
fn missing_file_is_io_error() {
  let dir = tempfile::tempdir().unwrap();
  assert!(matches!(
    Config::from_json_file(dir.path().join("nope.json")),
    Err(ConfigError::Io { .. })
  ));
}
