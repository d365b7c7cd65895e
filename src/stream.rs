//! The stream tree: stages arranged parent → children, each with its own replica
//! and buffer settings.
//!
//! Node names are unique per tree. Every structural edit checks that first and
//! leaves the tree untouched on failure. All edits and reads go through one
//! read/write lock held by [StreamTree].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tracing::instrument;

use crate::config::StreamConfig;
use crate::processor::Processor;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
  #[error("the {0} stream already exists")]
  AlreadyExists(String),
  #[error("can't find stream's parent {0}")]
  ParentNotFound(String),
  #[error("can't find stream's sibling {0}")]
  SiblingNotFound(String),
  #[error("the {0} stream is the root and has no siblings")]
  RootSibling(String),
  #[error("the {0} stream does not exist")]
  NotFound(String),
  #[error("processor not found: {0}")]
  ProcessorNotFound(String),
}

/// One position in a stream tree.
#[derive(Clone)]
pub struct StreamNode {
  name: String,
  processor: Arc<dyn Processor>,
  childs: Vec<StreamNode>,
  replica: usize,
  buffer_size: usize,
}

impl StreamNode {
  pub fn new(name: impl Into<String>, processor: Arc<dyn Processor>) -> Self {
    Self {
      name: name.into(),
      processor,
      childs: Vec::new(),
      replica: 1,
      buffer_size: 0,
    }
  }

  /// Worker count for this node; 0 is treated as 1.
  pub fn with_replica(mut self, replica: usize) -> Self {
    self.replica = replica.max(1);
    self
  }

  pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
    self.buffer_size = buffer_size;
    self
  }

  pub fn with_child(mut self, child: StreamNode) -> Self {
    self.childs.push(child);
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn processor(&self) -> &Arc<dyn Processor> {
    &self.processor
  }

  pub fn childs(&self) -> &[StreamNode] {
    &self.childs
  }

  pub fn replica(&self) -> usize {
    self.replica
  }

  pub fn buffer_size(&self) -> usize {
    self.buffer_size
  }

  fn collect_names(&self, out: &mut Vec<String>) {
    out.push(self.name.clone());
    for child in &self.childs {
      child.collect_names(out);
    }
  }

  /// Child indices leading from `self` to the node called `name`.
  fn path_to(&self, name: &str) -> Option<Vec<usize>> {
    if self.name == name {
      return Some(Vec::new());
    }
    self.childs.iter().enumerate().find_map(|(i, child)| {
      child.path_to(name).map(|mut path| {
        path.insert(0, i);
        path
      })
    })
  }

  fn at_mut(&mut self, path: &[usize]) -> &mut StreamNode {
    path.iter().fold(self, |node, &i| &mut node.childs[i])
  }

  fn at(&self, path: &[usize]) -> &StreamNode {
    path.iter().fold(self, |node, &i| &node.childs[i])
  }

  fn write_outline(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    writeln!(f, "{:indent$}{}", "", self.name, indent = depth * 4)?;
    for child in &self.childs {
      child.write_outline(f, depth + 1)?;
    }
    Ok(())
  }
}

impl fmt::Debug for StreamNode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StreamNode")
      .field("name", &self.name)
      .field("replica", &self.replica)
      .field("buffer_size", &self.buffer_size)
      .field("childs", &self.childs)
      .finish()
  }
}

/// A rooted tree of [StreamNode]s with unique names.
pub struct StreamTree {
  root: RwLock<StreamNode>,
}

impl StreamTree {
  /// Wraps `root`; fails if any name appears twice in it.
  pub fn new(root: StreamNode) -> Result<Self, StreamError> {
    let mut names = Vec::new();
    root.collect_names(&mut names);
    let mut seen = HashSet::new();
    for name in names {
      if !seen.insert(name.clone()) {
        return Err(StreamError::AlreadyExists(name));
      }
    }
    Ok(Self {
      root: RwLock::new(root),
    })
  }

  /// Builds the tree described by `config`, resolving each node's stage by name.
  #[instrument(level = "trace", skip(config, processors))]
  pub fn from_config(
    config: &StreamConfig,
    processors: &HashMap<String, Arc<dyn Processor>>,
  ) -> Result<Self, StreamError> {
    Self::new(build_node(config, processors)?)
  }

  fn read(&self) -> std::sync::RwLockReadGuard<'_, StreamNode> {
    self.root.read().unwrap_or_else(PoisonError::into_inner)
  }

  fn write(&self) -> std::sync::RwLockWriteGuard<'_, StreamNode> {
    self.root.write().unwrap_or_else(PoisonError::into_inner)
  }

  /// Appends `node` as the root's last child.
  #[instrument(level = "trace", skip(self, node), fields(node = %node.name))]
  pub fn append(&self, node: StreamNode) -> Result<(), StreamError> {
    let mut root = self.write();
    ensure_absent(&root, &node)?;
    root.childs.push(node);
    Ok(())
  }

  /// Appends `node` as the last child of `parent`.
  #[instrument(level = "trace", skip(self, node), fields(node = %node.name))]
  pub fn append_under(&self, parent: &str, node: StreamNode) -> Result<(), StreamError> {
    let mut root = self.write();
    ensure_absent(&root, &node)?;
    let path = root
      .path_to(parent)
      .ok_or_else(|| StreamError::ParentNotFound(parent.to_string()))?;
    root.at_mut(&path).childs.push(node);
    Ok(())
  }

  /// Inserts `node` right before `sibling` in the sibling's parent.
  #[instrument(level = "trace", skip(self, node), fields(node = %node.name))]
  pub fn insert_before(&self, sibling: &str, node: StreamNode) -> Result<(), StreamError> {
    self.insert_beside(sibling, node, 0)
  }

  /// Inserts `node` right after `sibling` in the sibling's parent.
  #[instrument(level = "trace", skip(self, node), fields(node = %node.name))]
  pub fn insert_after(&self, sibling: &str, node: StreamNode) -> Result<(), StreamError> {
    self.insert_beside(sibling, node, 1)
  }

  fn insert_beside(
    &self,
    sibling: &str,
    node: StreamNode,
    offset: usize,
  ) -> Result<(), StreamError> {
    let mut root = self.write();
    ensure_absent(&root, &node)?;
    let path = root
      .path_to(sibling)
      .ok_or_else(|| StreamError::SiblingNotFound(sibling.to_string()))?;
    let Some((&index, parent)) = path.split_last() else {
      return Err(StreamError::RootSibling(sibling.to_string()));
    };
    root.at_mut(parent).childs.insert(index + offset, node);
    Ok(())
  }

  /// Detaches `name` and its subtree. Deleting the root only clears its children.
  #[instrument(level = "trace", skip(self))]
  pub fn delete(&self, name: &str) -> Result<(), StreamError> {
    let mut root = self.write();
    let path = root
      .path_to(name)
      .ok_or_else(|| StreamError::NotFound(name.to_string()))?;
    match path.split_last() {
      None => root.childs.clear(),
      Some((&index, parent)) => {
        root.at_mut(parent).childs.remove(index);
      }
    }
    Ok(())
  }

  /// A copy of the subtree rooted at `name`.
  pub fn find(&self, name: &str) -> Option<StreamNode> {
    let root = self.read();
    root.path_to(name).map(|path| root.at(&path).clone())
  }

  pub fn contains(&self, name: &str) -> bool {
    self.read().path_to(name).is_some()
  }

  /// Name of the node directly above `name`, `None` for the root or an unknown name.
  pub fn parent_of(&self, name: &str) -> Option<String> {
    let root = self.read();
    let path = root.path_to(name)?;
    let (_, parent) = path.split_last()?;
    Some(root.at(parent).name.clone())
  }

  /// Every node name in pre-order (parent before children, children in order).
  pub fn names(&self) -> Vec<String> {
    let mut names = Vec::new();
    self.read().collect_names(&mut names);
    names
  }

  pub fn root_name(&self) -> String {
    self.read().name.clone()
  }

  /// Number of nodes, root included.
  pub fn len(&self) -> usize {
    self.names().len()
  }

  /// Always false. Deleting the root only clears its children, so a tree never has
  /// fewer than one node; this pairs with [StreamTree::len] for callers that expect both.
  pub fn is_empty(&self) -> bool {
    false
  }

  /// Copy of the whole tree as it is now.
  pub fn snapshot(&self) -> StreamNode {
    self.read().clone()
  }
}

impl fmt::Display for StreamTree {
  /// Indented outline, four spaces per level.
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.read().write_outline(f, 0)
  }
}

impl fmt::Debug for StreamTree {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("StreamTree").field(&*self.read()).finish()
  }
}

fn ensure_absent(root: &StreamNode, node: &StreamNode) -> Result<(), StreamError> {
  let mut incoming = Vec::new();
  node.collect_names(&mut incoming);
  let mut seen = HashSet::new();
  for name in incoming {
    if root.path_to(&name).is_some() || !seen.insert(name.clone()) {
      return Err(StreamError::AlreadyExists(name));
    }
  }
  Ok(())
}

fn build_node(
  config: &StreamConfig,
  processors: &HashMap<String, Arc<dyn Processor>>,
) -> Result<StreamNode, StreamError> {
  let processor = processors
    .get(&config.name)
    .ok_or_else(|| StreamError::ProcessorNotFound(config.name.clone()))?;
  let mut node = StreamNode::new(config.name.clone(), Arc::clone(processor))
    .with_replica(config.replica)
    .with_buffer_size(config.buffer_size);
  for child in &config.childs {
    node.childs.push(build_node(child, processors)?);
  }
  Ok(node)
}
