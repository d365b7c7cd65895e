//! A scheduled stream tree with its components.
//!
//! Lifecycle: `Idle → Running → Exited`. [Pipeline::start] checks dependencies,
//! starts components, builds one long-lived [ExecContext] over the tree and spawns a
//! scheduler task that pushes one seed per tick. [Pipeline::stop] cancels, drains and
//! stops components. An exited pipeline is never restarted in place; the manager
//! rebuilds it from its config instead.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use chrono::Local;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::check::{DependencyError, check};
use crate::config::{Config, ConfigError, NamedComponent, NamedProcessor};
use crate::exec_context::{ExecContext, ExecError};
use crate::injector::Injector;
use crate::metrics;
use crate::monitor::{Monitor, Var};
use crate::processor::Processor;
use crate::registry::{Registry, RegistryError};
use crate::schedule::{ConstantDelaySchedule, Schedule, ScheduleError, parse_schedule};
use crate::stream::{StreamError, StreamTree};
use crate::types::{BoxError, PipelineState, PortView, TypeKey};

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error("pipeline name cannot be empty")]
  EmptyName,
  #[error("pipeline {0} must have a stream")]
  NoStream(String),
  #[error(
    "pipeline {pipeline}: components {first} and {second} both bind {type_name} as '{inject_name}'"
  )]
  DuplicateComponent {
    pipeline: String,
    first: String,
    second: String,
    type_name: String,
    inject_name: String,
  },
  #[error(transparent)]
  Registry(#[from] RegistryError),
  #[error(transparent)]
  Stream(#[from] StreamError),
  #[error(transparent)]
  Schedule(#[from] ScheduleError),
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error("pipeline {pipeline} has unresolved dependencies: {}", join_errors(.errors))]
  Dependency {
    pipeline: String,
    errors: Vec<DependencyError>,
  },
  #[error("pipeline {pipeline}: component {component} failed to start: {source}")]
  ComponentStart {
    pipeline: String,
    component: String,
    #[source]
    source: BoxError,
  },
  #[error(transparent)]
  Exec(#[from] ExecError),
  #[error("pipeline {0} already exists")]
  AlreadyExists(String),
  #[error("pipeline {0} not found")]
  NotFound(String),
  #[error("pipeline {0} has exited, restart it")]
  Exited(String),
  #[error("pipeline {0} was not built from a config and cannot be recreated")]
  NoConfig(String),
  /// Per-name failures of a multi-pipeline operation.
  #[error("{}", join_batch(.0))]
  Batch(Vec<(String, PipelineError)>),
}

fn join_errors(errors: &[DependencyError]) -> String {
  errors
    .iter()
    .map(ToString::to_string)
    .collect::<Vec<_>>()
    .join("; ")
}

fn join_batch(errors: &[(String, PipelineError)]) -> String {
  errors
    .iter()
    .map(|(name, err)| format!("{name}: {err}"))
    .collect::<Vec<_>>()
    .join("; ")
}

/// Introspection view of one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentView {
  pub name: String,
  pub raw_config: String,
  pub sample_config: String,
  pub description: String,
  pub inject_name: String,
  pub type_name: String,
}

/// Introspection view of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessorView {
  pub name: String,
  pub raw_config: String,
  pub description: String,
  pub inputs: Vec<PortView>,
  pub outputs: Vec<PortView>,
}

#[derive(Default)]
struct Lifecycle {
  exec: Option<Arc<ExecContext>>,
  tasks: Vec<JoinHandle<()>>,
}

pub struct Pipeline {
  id: Uuid,
  name: String,
  config: Option<Config>,
  components: Vec<NamedComponent>,
  processors: Vec<NamedProcessor>,
  injector: Arc<Injector>,
  stream: StreamTree,
  schedule: Arc<dyn Schedule>,
  monitor: Monitor,
  token: CancellationToken,
  state: Arc<AtomicU8>,
  lifecycle: tokio::sync::Mutex<Lifecycle>,
}

/// Builder for [Pipeline].
pub struct PipelineBuilder {
  name: String,
  config: Option<Config>,
  components: Vec<NamedComponent>,
  processors: Vec<NamedProcessor>,
  stream: Option<StreamTree>,
  schedule: Option<Arc<dyn Schedule>>,
  injector: Option<Arc<Injector>>,
}

impl PipelineBuilder {
  pub fn component(mut self, component: NamedComponent) -> Self {
    self.components.push(component);
    self
  }

  pub fn components(mut self, components: impl IntoIterator<Item = NamedComponent>) -> Self {
    self.components.extend(components);
    self
  }

  /// Records a stage for introspection; the tree decides where it runs.
  pub fn processor(mut self, processor: NamedProcessor) -> Self {
    self.processors.push(processor);
    self
  }

  pub fn processors(mut self, processors: impl IntoIterator<Item = NamedProcessor>) -> Self {
    self.processors.extend(processors);
    self
  }

  pub fn stream(mut self, stream: StreamTree) -> Self {
    self.stream = Some(stream);
    self
  }

  /// Defaults to back-to-back ticks.
  pub fn schedule(mut self, schedule: Arc<dyn Schedule>) -> Self {
    self.schedule = Some(schedule);
    self
  }

  /// Root resolver to bind into instead of a fresh one.
  pub fn injector(mut self, injector: Arc<Injector>) -> Self {
    self.injector = Some(injector);
    self
  }

  pub fn config(mut self, config: Config) -> Self {
    self.config = Some(config);
    self
  }

  #[instrument(level = "trace", skip(self), fields(pipeline = %self.name))]
  pub fn build(self) -> Result<Pipeline, PipelineError> {
    if self.name.is_empty() {
      return Err(PipelineError::EmptyName);
    }
    let stream = self
      .stream
      .ok_or_else(|| PipelineError::NoStream(self.name.clone()))?;

    let state = Arc::new(AtomicU8::new(PipelineState::Idle as u8));
    let token = CancellationToken::new();
    let monitor = Monitor::new(self.name.clone());
    let live = Arc::clone(&state);
    monitor.set(
      metrics::PIPELINE_STATE,
      Var::func(move || Var::Str(load_state(&live).to_string())),
    );

    let injector = self.injector.unwrap_or_default();
    injector.map(monitor.clone(), "Monitor");
    injector.map(token.clone(), "Context");

    let mut bound: HashMap<(TypeKey, String), String> = HashMap::new();
    for c in &self.components {
      let instance = c.component.instance();
      let slot = (instance.key(), instance.name().to_string());
      if let Some(first) = bound.get(&slot) {
        return Err(PipelineError::DuplicateComponent {
          pipeline: self.name,
          first: first.clone(),
          second: c.name.clone(),
          type_name: instance.type_name().to_string(),
          inject_name: instance.name().to_string(),
        });
      }
      bound.insert(slot, c.name.clone());
      instance.bind(&injector);
    }

    Ok(Pipeline {
      id: Uuid::new_v4(),
      name: self.name,
      config: self.config,
      components: self.components,
      processors: self.processors,
      injector,
      stream,
      schedule: self
        .schedule
        .unwrap_or_else(|| Arc::new(ConstantDelaySchedule)),
      monitor,
      token,
      state,
      lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
    })
  }
}

fn load_state(state: &AtomicU8) -> PipelineState {
  PipelineState::from_u8(state.load(Ordering::Acquire)).unwrap_or(PipelineState::Idle)
}

impl Pipeline {
  pub fn builder(name: impl Into<String>) -> PipelineBuilder {
    PipelineBuilder {
      name: name.into(),
      config: None,
      components: Vec::new(),
      processors: Vec::new(),
      stream: None,
      schedule: None,
      injector: None,
    }
  }

  /// Instantiates components and stages through `registry` and wires the tree.
  #[instrument(level = "trace", skip_all, fields(pipeline = %config.name))]
  pub fn from_config(config: Config, registry: &Registry) -> Result<Self, PipelineError> {
    if config.name.is_empty() {
      return Err(PipelineError::EmptyName);
    }
    let stream_config = config
      .pipeline
      .stream
      .clone()
      .ok_or_else(|| PipelineError::NoStream(config.name.clone()))?;
    let components = config.new_components(registry)?;
    let processors = config.new_processors(registry)?;
    let by_name: HashMap<String, Arc<dyn Processor>> = processors
      .iter()
      .map(|p| (p.name.clone(), Arc::clone(&p.processor)))
      .collect();
    let stream = StreamTree::from_config(&stream_config, &by_name)?;
    let schedule = parse_schedule(&config.pipeline.schedule)?;
    Pipeline::builder(config.name.clone())
      .components(components)
      .processors(processors)
      .stream(stream)
      .schedule(schedule)
      .config(config)
      .build()
  }

  pub fn id(&self) -> Uuid {
    self.id
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// The config this pipeline was built from, if any.
  pub fn config(&self) -> Option<&Config> {
    self.config.as_ref()
  }

  pub fn state(&self) -> PipelineState {
    load_state(&self.state)
  }

  pub fn monitor(&self) -> &Monitor {
    &self.monitor
  }

  pub fn stream(&self) -> &StreamTree {
    &self.stream
  }

  pub fn injector(&self) -> &Arc<Injector> {
    &self.injector
  }

  fn set_state(&self, state: PipelineState) {
    self.state.store(state as u8, Ordering::Release);
  }

  /// Runs the dependency check against a scratch resolver under the root one.
  pub fn check_dependence(&self) -> Vec<DependencyError> {
    let scratch = Arc::new(Injector::child_of(&self.injector));
    check(&self.stream, &scratch)
  }

  /// `Idle → Running`. A no-op in any other state.
  ///
  /// Fails, leaving the pipeline idle, if a dependency is missing or a component
  /// does not start; components already started are stopped again.
  pub async fn start(&self) -> Result<(), PipelineError> {
    let mut lifecycle = self.lifecycle.lock().await;
    if self
      .state
      .compare_exchange(
        PipelineState::Idle as u8,
        PipelineState::Running as u8,
        Ordering::AcqRel,
        Ordering::Acquire,
      )
      .is_err()
    {
      return Ok(());
    }

    let errors = self.check_dependence();
    if !errors.is_empty() {
      self.set_state(PipelineState::Idle);
      return Err(PipelineError::Dependency {
        pipeline: self.name.clone(),
        errors,
      });
    }

    for (i, c) in self.components.iter().enumerate() {
      if let Err(source) = c.component.start().await {
        self.stop_components(&self.components[..i]).await;
        self.set_state(PipelineState::Idle);
        return Err(PipelineError::ComponentStart {
          pipeline: self.name.clone(),
          component: c.name.clone(),
          source,
        });
      }
      info!(pipeline = %self.name, component = %c.name, "component started");
    }

    let exec = Arc::new(ExecContext::new(
      self.name.clone(),
      &self.token,
      &self.injector,
      self.stream.snapshot(),
      self.monitor.clone(),
    ));
    if let Err(err) = exec.start() {
      self.stop_components(&self.components).await;
      self.set_state(PipelineState::Idle);
      return Err(err.into());
    }

    let started = Instant::now();
    lifecycle.tasks.push(tokio::spawn(report_uptime(
      self.monitor.clone(),
      self.token.clone(),
      started,
    )));
    lifecycle.tasks.push(tokio::spawn(drive(
      self.name.clone(),
      Arc::clone(&self.schedule),
      Arc::clone(&exec),
      self.monitor.clone(),
      self.token.clone(),
    )));
    lifecycle.exec = Some(exec);
    info!(pipeline = %self.name, id = %self.id, "pipeline started");
    Ok(())
  }

  /// Cancels, waits for every task to drain, stops components and marks the
  /// pipeline exited. A no-op once exited.
  pub async fn stop(&self) {
    let mut lifecycle = self.lifecycle.lock().await;
    let was = self.state();
    if was == PipelineState::Exited {
      return;
    }
    self.token.cancel();
    for result in futures::future::join_all(std::mem::take(&mut lifecycle.tasks)).await {
      if let Err(err) = result {
        warn!(pipeline = %self.name, error = %err, "pipeline task did not finish cleanly");
      }
    }
    if let Some(exec) = lifecycle.exec.take() {
      exec.stop().await;
    }
    if was == PipelineState::Running {
      self.stop_components(&self.components).await;
    }
    self.set_state(PipelineState::Exited);
    info!(pipeline = %self.name, "pipeline stopped");
  }

  async fn stop_components(&self, components: &[NamedComponent]) {
    for c in components.iter().rev() {
      match c.component.stop().await {
        Ok(()) => info!(pipeline = %self.name, component = %c.name, "component stopped"),
        Err(err) => {
          warn!(
            pipeline = %self.name,
            component = %c.name,
            error = %err,
            "failed to stop component"
          )
        }
      }
    }
  }

  pub fn list_components(&self) -> Vec<ComponentView> {
    self
      .components
      .iter()
      .map(|c| {
        let instance = c.component.instance();
        ComponentView {
          name: c.name.clone(),
          raw_config: c.raw_config.clone(),
          sample_config: c.sample_config.clone(),
          description: c.description.clone(),
          inject_name: instance.name().to_string(),
          type_name: instance.type_name().to_string(),
        }
      })
      .collect()
  }

  pub fn list_processors(&self) -> Vec<ProcessorView> {
    self
      .processors
      .iter()
      .map(|p| ProcessorView {
        name: p.name.clone(),
        raw_config: p.raw_config.clone(),
        description: p.description.clone(),
        inputs: p.processor.inputs().iter().map(PortView::from).collect(),
        outputs: p.processor.outputs().iter().map(PortView::from).collect(),
      })
      .collect()
  }
}

impl fmt::Debug for Pipeline {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Pipeline")
      .field("id", &self.id)
      .field("name", &self.name)
      .field("state", &self.state())
      .field("stream", &self.stream)
      .finish()
  }
}

impl Drop for Pipeline {
  fn drop(&mut self) {
    self.token.cancel();
  }
}

async fn report_uptime(monitor: Monitor, token: CancellationToken, started: Instant) {
  let mut ticker = tokio::time::interval(Duration::from_secs(1));
  loop {
    tokio::select! {
      biased;
      _ = token.cancelled() => break,
      _ = ticker.tick() => monitor.set(metrics::PIPELINE_UPTIME, Var::Elapsed(started.elapsed())),
    }
  }
}

/// Scheduler loop: waits for each fire time and pushes one seed. Stops the exec
/// context when cancelled or when the schedule runs out.
async fn drive(
  pipeline: String,
  schedule: Arc<dyn Schedule>,
  exec: Arc<ExecContext>,
  monitor: Monitor,
  token: CancellationToken,
) {
  monitor.set(metrics::PIPELINE_START_TIME, Var::now());
  let mut next = schedule.next(Local::now());
  while let Some(at) = next {
    monitor.set(metrics::PIPELINE_NEXT_RUN_TIME, Var::Time(at));
    let wait = (at - Local::now()).to_std().unwrap_or(Duration::ZERO);
    tokio::select! {
      biased;
      _ = token.cancelled() => break,
      _ = tokio::time::sleep(wait) => {}
    }
    let now = Local::now();
    next = schedule.next(now.max(at));
    monitor.set(metrics::PIPELINE_LAST_START_TIME, Var::Time(now));
    monitor.add(metrics::PIPELINE_RUN_TIMES, 1);
    if !exec.run().await {
      break;
    }
    monitor.set(metrics::PIPELINE_LAST_END_TIME, Var::now());
  }
  if next.is_none() {
    info!(pipeline = %pipeline, "schedule exhausted");
  }
  exec.stop().await;
  monitor.set(metrics::PIPELINE_EXIT_TIME, Var::now());
}
