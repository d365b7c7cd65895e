//! # streamweave-pipeline
//!
//! Scheduled stream-tree pipelines with type-directed stage wiring.
//!
//! ## Architecture
//!
//! A [Pipeline] owns a [StreamTree] of stages ([Processor]s), the [Component]s they
//! depend on and a [Schedule]. Stages declare typed input and output [Port]s; an
//! [Injector] resolves inputs by `(type, name)` from component bindings and upstream
//! outputs, so stages never wire channels themselves.
//!
//! - [check] proves every input is resolvable before a pipeline starts.
//! - [exec_context] turns the tree into replicated worker pools joined by bounded
//!   queues, driven one seed per tick.
//! - [Monitor] collects per-pipeline and per-stream metrics.
//! - [PipelineManager] keeps pipelines by name and restarts them from config.

pub mod check;
pub mod component;
#[cfg(test)]
mod component_test;
pub mod config;
#[cfg(test)]
mod config_test;
pub mod exec_context;
#[cfg(test)]
mod exec_context_test;
pub mod injector;
pub mod manager;
pub mod metrics;
pub mod monitor;
pub mod pipeline;
pub mod processor;
pub mod registry;
#[cfg(test)]
mod registry_test;
pub mod schedule;
pub mod stream;
pub mod types;

pub use check::{DependencyError, check, filter_missing_dependency_errors};
pub use component::{Component, Instance};
pub use config::{Config, ConfigError, NamedComponent, NamedProcessor, PipelineConfig, StreamConfig};
pub use exec_context::{ExecContext, ExecError, PoolState};
pub use injector::{InjectError, Injector, MissingDependencyError};
pub use manager::PipelineManager;
pub use monitor::{Monitor, Var};
pub use pipeline::{ComponentView, Pipeline, PipelineBuilder, PipelineError, ProcessorView};
pub use processor::{FnProcessor, InvalidProcessor, Processor, validate};
pub use registry::{Factory, FactoryTemplate, Plugin, Registry, RegistryError};
pub use schedule::{ConstantDelaySchedule, CronSchedule, Schedule, ScheduleError, parse_schedule};
pub use stream::{StreamError, StreamNode, StreamTree};
pub use types::{BoxError, Capability, PipelineState, Port, PortView, Record, TypeKey, Value};
