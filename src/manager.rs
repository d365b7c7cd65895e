//! Name → pipeline registry with batch lifecycle control.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, instrument};

use crate::config::{Config, load_configs};
use crate::pipeline::{Pipeline, PipelineError};
use crate::registry::Registry;
use crate::types::PipelineState;

/// Holds at most one pipeline per name.
///
/// Structural changes (add, remove) take the write lock; lifecycle calls only look
/// pipelines up, so different pipelines can be started and stopped concurrently.
pub struct PipelineManager {
  registry: Arc<Registry>,
  pipelines: RwLock<HashMap<String, Arc<Pipeline>>>,
}

impl PipelineManager {
  pub fn new(registry: Arc<Registry>) -> Self {
    Self {
      registry,
      pipelines: RwLock::new(HashMap::new()),
    }
  }

  pub fn registry(&self) -> &Arc<Registry> {
    &self.registry
  }

  /// Builds a pipeline from `config` and registers it under its name.
  #[instrument(level = "trace", skip_all, fields(pipeline = %config.name))]
  pub async fn add_pipeline(&self, config: Config) -> Result<Arc<Pipeline>, PipelineError> {
    if self.find(&config.name).await.is_some() {
      return Err(PipelineError::AlreadyExists(config.name));
    }
    let pipeline = Pipeline::from_config(config, &self.registry)?;
    self.add(pipeline).await
  }

  /// Registers an already built pipeline.
  pub async fn add(&self, pipeline: Pipeline) -> Result<Arc<Pipeline>, PipelineError> {
    let mut pipelines = self.pipelines.write().await;
    if pipelines.contains_key(pipeline.name()) {
      return Err(PipelineError::AlreadyExists(pipeline.name().to_string()));
    }
    let pipeline = Arc::new(pipeline);
    pipelines.insert(pipeline.name().to_string(), Arc::clone(&pipeline));
    info!(pipeline = %pipeline.name(), id = %pipeline.id(), "pipeline added");
    Ok(pipeline)
  }

  /// Stops and unregisters each named pipeline.
  pub async fn remove_pipeline(&self, names: &[&str]) -> Result<(), PipelineError> {
    for_each_name(names, |name| self.remove_one(name)).await
  }

  async fn remove_one(&self, name: &str) -> Result<(), PipelineError> {
    let pipeline = self.get(name).await?;
    pipeline.stop().await;
    self.pipelines.write().await.remove(name);
    info!(pipeline = %name, "pipeline removed");
    Ok(())
  }

  /// Every pipeline, sorted by name.
  pub async fn list(&self) -> Vec<Arc<Pipeline>> {
    let mut list: Vec<Arc<Pipeline>> = self.pipelines.read().await.values().cloned().collect();
    list.sort_by(|a, b| a.name().cmp(b.name()));
    list
  }

  pub async fn find(&self, name: &str) -> Option<Arc<Pipeline>> {
    self.pipelines.read().await.get(name).cloned()
  }

  async fn get(&self, name: &str) -> Result<Arc<Pipeline>, PipelineError> {
    self
      .find(name)
      .await
      .ok_or_else(|| PipelineError::NotFound(name.to_string()))
  }

  /// Starts each named pipeline. An exited pipeline has to be restarted instead.
  pub async fn start(&self, names: &[&str]) -> Result<(), PipelineError> {
    for_each_name(names, |name| async move {
      let pipeline = self.get(name).await?;
      if pipeline.state() == PipelineState::Exited {
        return Err(PipelineError::Exited(name.to_string()));
      }
      pipeline.start().await
    })
    .await
  }

  pub async fn stop(&self, names: &[&str]) -> Result<(), PipelineError> {
    for_each_name(names, |name| async move {
      self.get(name).await?.stop().await;
      Ok(())
    })
    .await
  }

  /// Replaces each named pipeline with a fresh one built from its config, then
  /// starts it.
  pub async fn restart(&self, names: &[&str]) -> Result<(), PipelineError> {
    for_each_name(names, |name| async move {
      let config = self
        .get(name)
        .await?
        .config()
        .cloned()
        .ok_or_else(|| PipelineError::NoConfig(name.to_string()))?;
      self.remove_one(name).await?;
      self.add_pipeline(config).await?.start().await
    })
    .await
  }

  /// Starts every pipeline whose config asks for it.
  pub async fn bootstrap(&self) -> Result<(), PipelineError> {
    let names: Vec<String> = self
      .list()
      .await
      .iter()
      .filter(|p| p.config().is_some_and(|c| c.bootstrap))
      .map(|p| p.name().to_string())
      .collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    self.start(&names).await
  }

  /// Adds a pipeline for a config file, or for every `*.json` file in a directory.
  pub async fn load_from_path(
    &self,
    path: impl AsRef<Path>,
  ) -> Result<Vec<Arc<Pipeline>>, PipelineError> {
    let mut added = Vec::new();
    let mut failed = Vec::new();
    for config in load_configs(path)? {
      let name = config.name.clone();
      match self.add_pipeline(config).await {
        Ok(pipeline) => added.push(pipeline),
        Err(err) => failed.push((name, err)),
      }
    }
    if failed.is_empty() {
      Ok(added)
    } else {
      Err(PipelineError::Batch(failed))
    }
  }
}

/// Runs `op` for every name and folds the failures into one [PipelineError::Batch].
async fn for_each_name<'a, F, Fut>(names: &[&'a str], op: F) -> Result<(), PipelineError>
where
  F: Fn(&'a str) -> Fut,
  Fut: Future<Output = Result<(), PipelineError>>,
{
  let mut failed = Vec::new();
  for &name in names {
    if let Err(err) = op(name).await {
      failed.push((name.to_string(), err));
    }
  }
  if failed.is_empty() {
    Ok(())
  } else {
    Err(PipelineError::Batch(failed))
  }
}
