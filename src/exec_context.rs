//! A stream tree compiled into running tasks.
//!
//! Every node becomes a pool of `replica` workers sharing one input queue and one
//! output queue. A node with children gets a splitter task that copies each output
//! to one queue per child; a leaf just counts and drops its outputs. The context is
//! long-lived: [ExecContext::run] pushes one seed per tick into the root queue.
//!
//! Each item flowing between nodes is a resolver whose bindings are the upstream
//! outputs, parented to the resolver the upstream node consumed.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::{FutureExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::injector::Injector;
use crate::metrics;
use crate::monitor::{Monitor, Var};
use crate::processor::Processor;
use crate::stream::StreamNode;

type Item = Arc<Injector>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExecError {
  #[error("exec context is stopped")]
  Stopped,
  #[error("exec context already started")]
  AlreadyStarted,
}

/// Lifecycle of one node's worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PoolState {
  NotStarted = 0,
  Running = 1,
  /// Input closed or cancelled; workers are finishing.
  Draining = 2,
  /// Every worker has exited and the output queue is closed.
  Closed = 3,
}

impl PoolState {
  fn from_u8(v: u8) -> Self {
    match v {
      1 => Self::Running,
      2 => Self::Draining,
      3 => Self::Closed,
      _ => Self::NotStarted,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::NotStarted => "not_started",
      Self::Running => "running",
      Self::Draining => "draining",
      Self::Closed => "closed",
    }
  }
}

impl std::fmt::Display for PoolState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Default)]
struct Pool {
  state: AtomicU8,
  running: AtomicUsize,
}

impl Pool {
  fn state(&self) -> PoolState {
    PoolState::from_u8(self.state.load(Ordering::Acquire))
  }

  fn transition(&self, from: PoolState, to: PoolState) {
    let _ = self
      .state
      .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire);
  }

  /// Last worker gone; reached from `Running` too when every replica panicked.
  fn close(&self) {
    self.state.store(PoolState::Closed as u8, Ordering::Release);
  }
}

/// Live worker graph for one pipeline.
pub struct ExecContext {
  pipeline: String,
  token: CancellationToken,
  seed: Item,
  root: StreamNode,
  monitor: Monitor,
  input: Mutex<Option<mpsc::Sender<Item>>>,
  receiver: Mutex<Option<mpsc::Receiver<Item>>>,
  pools: HashMap<String, Arc<Pool>>,
  handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ExecContext {
  /// Prepares (but does not start) a worker graph for `root`.
  ///
  /// The context cancels with `parent`, and seeds every tick with a resolver under
  /// `injector` that binds its own token as `"Context"`.
  pub fn new(
    pipeline: impl Into<String>,
    parent: &CancellationToken,
    injector: &Arc<Injector>,
    root: StreamNode,
    monitor: Monitor,
  ) -> Self {
    let token = parent.child_token();
    let seed = Injector::child_of(injector);
    seed.map(token.clone(), "Context");
    let (tx, rx) = mpsc::channel(root.buffer_size().max(1));
    let mut pools = HashMap::new();
    collect_pools(&root, &mut pools);
    Self {
      pipeline: pipeline.into(),
      token,
      seed: Arc::new(seed),
      root,
      monitor,
      input: Mutex::new(Some(tx)),
      receiver: Mutex::new(Some(rx)),
      pools,
      handles: Mutex::new(Vec::new()),
    }
  }

  /// Spawns every worker, splitter and sink task.
  #[instrument(level = "trace", skip(self), fields(pipeline = %self.pipeline))]
  pub fn start(&self) -> Result<(), ExecError> {
    if self.token.is_cancelled() {
      return Err(ExecError::Stopped);
    }
    let rx = self
      .receiver
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take()
      .ok_or(ExecError::AlreadyStarted)?;
    let mut handles = Vec::new();
    self.spawn_node(&self.root, rx, &mut handles);
    self
      .handles
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .extend(handles);
    info!(pipeline = %self.pipeline, streams = self.pools.len(), "exec context started");
    Ok(())
  }

  fn spawn_node(
    &self,
    node: &StreamNode,
    input: mpsc::Receiver<Item>,
    handles: &mut Vec<JoinHandle<()>>,
  ) {
    let monitor = self.monitor.with(node.name());
    let pool = Arc::clone(&self.pools[node.name()]);
    monitor.set(metrics::STREAM_BUFFER_SIZE, node.buffer_size() as i64);
    monitor.set(metrics::STREAM_REPLICA, node.replica() as i64);
    let live = Arc::clone(&pool);
    monitor.set(
      metrics::STREAM_STATE,
      Var::func(move || Var::Str(live.state().to_string())),
    );

    let output = if node.childs().is_empty() {
      None
    } else {
      let (tx, rx) = mpsc::channel(node.buffer_size().max(1));
      let mut senders = Vec::with_capacity(node.childs().len());
      for child in node.childs() {
        // one slot per child; backpressure comes from the child's own queue
        let (child_tx, child_rx) = mpsc::channel(1);
        senders.push(child_tx);
        self.spawn_node(child, child_rx, handles);
      }
      handles.push(tokio::spawn(split(rx, senders, self.token.clone())));
      Some(tx)
    };

    let input = Arc::new(tokio::sync::Mutex::new(input));
    pool.running.store(node.replica(), Ordering::Release);
    pool.transition(PoolState::NotStarted, PoolState::Running);
    for replica in 0..node.replica() {
      let worker = Worker {
        pipeline: self.pipeline.clone(),
        stream: node.name().to_string(),
        replica,
        processor: Arc::clone(node.processor()),
        input: Arc::clone(&input),
        output: output.clone(),
        token: self.token.clone(),
        monitor: monitor.clone(),
        pool: Arc::clone(&pool),
      };
      handles.push(tokio::spawn(worker.run()));
    }
  }

  /// Pushes one seed into the root queue. Returns false once the context is stopped.
  pub async fn run(&self) -> bool {
    if self.token.is_cancelled() {
      self.close_input();
      return false;
    }
    let tx = self
      .input
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone();
    let Some(tx) = tx else {
      return false;
    };
    tokio::select! {
      biased;
      _ = self.token.cancelled() => {
        self.close_input();
        false
      }
      sent = tx.send(Arc::clone(&self.seed)) => sent.is_ok(),
    }
  }

  fn close_input(&self) {
    self
      .input
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
  }

  /// Cancels every task and waits until all of them have exited.
  #[instrument(level = "trace", skip(self), fields(pipeline = %self.pipeline))]
  pub async fn stop(&self) {
    self.token.cancel();
    self.close_input();
    self
      .receiver
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));
    if handles.is_empty() {
      return;
    }
    for result in futures::future::join_all(handles).await {
      if let Err(err) = result {
        warn!(pipeline = %self.pipeline, error = %err, "exec task did not finish cleanly");
      }
    }
    info!(pipeline = %self.pipeline, "exec context stopped");
  }

  pub fn is_stopped(&self) -> bool {
    self.token.is_cancelled()
  }

  /// State of the worker pool behind stream `name`.
  pub fn pool_state(&self, name: &str) -> Option<PoolState> {
    self.pools.get(name).map(|p| p.state())
  }

  /// The resolver every tick starts from.
  pub fn injector(&self) -> &Arc<Injector> {
    &self.seed
  }
}

impl Drop for ExecContext {
  fn drop(&mut self) {
    self.token.cancel();
  }
}

fn collect_pools(node: &StreamNode, pools: &mut HashMap<String, Arc<Pool>>) {
  pools.insert(node.name().to_string(), Arc::new(Pool::default()));
  for child in node.childs() {
    collect_pools(child, pools);
  }
}

/// Copies every item to each child queue, in order. Closing the child queues is
/// dropping `outputs`.
async fn split(
  input: mpsc::Receiver<Item>,
  outputs: Vec<mpsc::Sender<Item>>,
  token: CancellationToken,
) {
  let mut input = ReceiverStream::new(input);
  'items: loop {
    let item = tokio::select! {
      biased;
      _ = token.cancelled() => break,
      item = input.next() => item,
    };
    let Some(item) = item else {
      break;
    };
    for out in &outputs {
      tokio::select! {
        biased;
        _ = token.cancelled() => break 'items,
        // a closed child just misses the item
        _ = out.send(Arc::clone(&item)) => {}
      }
    }
  }
}

struct Worker {
  pipeline: String,
  stream: String,
  replica: usize,
  processor: Arc<dyn Processor>,
  input: Arc<tokio::sync::Mutex<mpsc::Receiver<Item>>>,
  output: Option<mpsc::Sender<Item>>,
  token: CancellationToken,
  monitor: Monitor,
  pool: Arc<Pool>,
}

impl Worker {
  async fn run(mut self) {
    self.monitor.set(metrics::STREAM_START_TIME, Var::now());
    self.monitor.add(metrics::STREAM_RUNNING_REPLICA, 1);
    debug!(
      pipeline = %self.pipeline,
      stream = %self.stream,
      replica = self.replica,
      "worker started"
    );

    match AssertUnwindSafe(self.serve()).catch_unwind().await {
      // input closed or cancelled
      Ok(()) => self.pool.transition(PoolState::Running, PoolState::Draining),
      Err(panic) => error!(
        pipeline = %self.pipeline,
        stream = %self.stream,
        replica = self.replica,
        panic = %panic_message(panic.as_ref()),
        "worker panicked, replica stopped"
      ),
    }

    self.output.take();
    self.monitor.add(metrics::STREAM_RUNNING_REPLICA, -1);
    self.monitor.set(metrics::STREAM_EXIT_TIME, Var::now());
    if self.pool.running.fetch_sub(1, Ordering::AcqRel) == 1 {
      self.pool.close();
    }
    debug!(
      pipeline = %self.pipeline,
      stream = %self.stream,
      replica = self.replica,
      "worker exited"
    );
  }

  async fn next(&self) -> Option<Item> {
    tokio::select! {
      biased;
      _ = self.token.cancelled() => None,
      item = async { self.input.lock().await.recv().await } => item,
    }
  }

  async fn serve(&self) {
    let mut elapsed = Duration::ZERO;
    while let Some(item) = self.next().await {
      self.monitor.set(metrics::STREAM_LAST_START_TIME, Var::now());
      self.monitor.add(metrics::STREAM_RUN_TIMES, 1);

      let scope = Injector::child_of(&item);
      scope.map(self.monitor.clone(), "Monitor");
      let started = Instant::now();
      let result = tokio::select! {
        biased;
        _ = self.token.cancelled() => return,
        result = scope.invoke(self.processor.as_ref()) => result,
      };
      elapsed += started.elapsed();
      self.monitor.set(metrics::STREAM_ELAPSED, Var::Elapsed(elapsed));
      self.monitor.set(metrics::STREAM_LAST_END_TIME, Var::now());

      let produced = Injector::child_of(&item);
      if let Err(err) = result.and_then(|r| produced.map_values(self.processor.outputs(), r)) {
        error!(
          pipeline = %self.pipeline,
          stream = %self.stream,
          error = %err,
          "stream invocation failed"
        );
        self.monitor.add(metrics::STREAM_ERROR_COUNT, 1);
        continue;
      }
      self.monitor.add(metrics::STREAM_SUCCESS_COUNT, 1);

      if let Some(output) = &self.output {
        tokio::select! {
          biased;
          _ = self.token.cancelled() => return,
          sent = output.send(Arc::new(produced)) => {
            if sent.is_err() {
              return;
            }
          }
        }
      }
    }
  }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(s) = panic.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = panic.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}
