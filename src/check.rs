//! Static dependency check over a stream tree.
//!
//! Walks the tree the way data will flow through it: each node's inputs must resolve
//! against what components and its ancestors provide, and its declared outputs are
//! then declared (not bound) for its subtree only.

use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use crate::injector::{Injector, MissingDependencyError};
use crate::processor::{InvalidProcessor, validate};
use crate::stream::{StreamNode, StreamTree};

/// One problem found by [check], tagged with the stream it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
  #[error("stream({stream}): {source}")]
  Missing {
    stream: String,
    #[source]
    source: MissingDependencyError,
  },
  #[error("stream({stream}): {source}")]
  Invalid {
    stream: String,
    #[source]
    source: InvalidProcessor,
  },
}

impl DependencyError {
  pub fn stream(&self) -> &str {
    match self {
      Self::Missing { stream, .. } | Self::Invalid { stream, .. } => stream,
    }
  }

  pub fn as_missing(&self) -> Option<&MissingDependencyError> {
    match self {
      Self::Missing { source, .. } => Some(source),
      Self::Invalid { .. } => None,
    }
  }
}

/// Reports every unresolvable input in the tree. Never short-circuits: an invalid
/// node stops the walk only below that node.
#[instrument(level = "trace", skip_all)]
pub fn check(tree: &StreamTree, injector: &Arc<Injector>) -> Vec<DependencyError> {
  let mut errors = Vec::new();
  check_node(&tree.snapshot(), injector, &mut errors);
  errors
}

fn check_node(node: &StreamNode, injector: &Arc<Injector>, errors: &mut Vec<DependencyError>) {
  let processor = node.processor();
  if let Err(source) = validate(processor.as_ref()) {
    errors.push(DependencyError::Invalid {
      stream: node.name().to_string(),
      source,
    });
    return;
  }

  for port in processor.inputs() {
    if !injector.exists(&port.key(), port.name()) {
      errors.push(DependencyError::Missing {
        stream: node.name().to_string(),
        source: MissingDependencyError::for_port(port),
      });
    }
  }

  let scope = Arc::new(Injector::child_of(injector));
  scope.declare_outputs(processor.outputs());
  for child in node.childs() {
    check_node(child, &scope, errors);
  }
}

/// Keeps only the missing-dependency errors.
pub fn filter_missing_dependency_errors(errors: &[DependencyError]) -> Vec<MissingDependencyError> {
  errors
    .iter()
    .filter_map(DependencyError::as_missing)
    .cloned()
    .collect()
}
