//! Stage contract: declared ports plus an async `process` call.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::instrument;

use crate::types::{BoxError, Port, Record};

/// A unit of work in the stream tree.
///
/// Inputs are resolved from the injector by port before `process` is called; the
/// returned record is published to descendants according to `outputs`.
#[async_trait]
pub trait Processor: Send + Sync {
  fn inputs(&self) -> &[Port];

  fn outputs(&self) -> &[Port];

  async fn process(&self, input: Record) -> Result<Record, BoxError>;
}

/// A processor whose port declarations cannot be wired.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidProcessor {
  #[error("{direction} port has an empty field")]
  EmptyField { direction: &'static str },
  #[error("{direction} port {field} has an empty binding name")]
  EmptyName {
    direction: &'static str,
    field: String,
  },
  #[error("{direction} port {field} is declared twice")]
  DuplicateField {
    direction: &'static str,
    field: String,
  },
}

/// Confirms every port carries a field and an explicit binding name, and that no
/// field is declared twice on the same side.
#[instrument(level = "trace", skip(processor))]
pub fn validate(processor: &dyn Processor) -> Result<(), InvalidProcessor> {
  validate_ports("input", processor.inputs())?;
  validate_ports("output", processor.outputs())
}

fn validate_ports(direction: &'static str, ports: &[Port]) -> Result<(), InvalidProcessor> {
  let mut seen = HashSet::new();
  for port in ports {
    if port.field().is_empty() {
      return Err(InvalidProcessor::EmptyField { direction });
    }
    if port.name().is_empty() {
      return Err(InvalidProcessor::EmptyName {
        direction,
        field: port.field().to_string(),
      });
    }
    if !seen.insert(port.field()) {
      return Err(InvalidProcessor::DuplicateField {
        direction,
        field: port.field().to_string(),
      });
    }
  }
  Ok(())
}

/// Processor built from ports and an async closure.
pub struct FnProcessor<F> {
  inputs: Vec<Port>,
  outputs: Vec<Port>,
  f: F,
}

impl<F, Fut> FnProcessor<F>
where
  F: Fn(Record) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Record, BoxError>> + Send + 'static,
{
  pub fn new(f: F) -> Self {
    Self {
      inputs: Vec::new(),
      outputs: Vec::new(),
      f,
    }
  }

  pub fn input(mut self, port: Port) -> Self {
    self.inputs.push(port);
    self
  }

  pub fn output(mut self, port: Port) -> Self {
    self.outputs.push(port);
    self
  }

  pub fn into_arc(self) -> Arc<dyn Processor> {
    Arc::new(self)
  }
}

#[async_trait]
impl<F, Fut> Processor for FnProcessor<F>
where
  F: Fn(Record) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Record, BoxError>> + Send + 'static,
{
  fn inputs(&self) -> &[Port] {
    &self.inputs
  }

  fn outputs(&self) -> &[Port] {
    &self.outputs
  }

  async fn process(&self, input: Record) -> Result<Record, BoxError> {
    (self.f)(input).await
  }
}
