//! Tests for `ExecContext`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::exec_context::{ExecContext, ExecError, PoolState};
use crate::injector::Injector;
use crate::metrics;
use crate::monitor::Monitor;
use crate::processor::{FnProcessor, Processor};
use crate::stream::StreamNode;
use crate::types::{BoxError, Capability, Port, Record};

async fn eventually(mut done: impl FnMut() -> bool) {
  for _ in 0..300 {
    if done() {
      return;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  panic!("condition not reached in time");
}

fn context(root: StreamNode, monitor: &Monitor) -> ExecContext {
  ExecContext::new(
    "test",
    &CancellationToken::new(),
    &Arc::new(Injector::new()),
    root,
    monitor.clone(),
  )
}

fn producer(text: &'static str) -> Arc<dyn Processor> {
  FnProcessor::new(move |_r: Record| async move {
    Ok::<_, BoxError>(Record::new().with("msg", text.to_string()))
  })
  .output(Port::new::<String>("msg", "Message"))
  .into_arc()
}

fn collector(seen: Arc<Mutex<Vec<String>>>) -> Arc<dyn Processor> {
  FnProcessor::new(move |r: Record| {
    let seen = Arc::clone(&seen);
    async move {
      if let Some(msg) = r.get::<String>("msg") {
        seen.lock().unwrap().push(msg);
      }
      Ok::<_, BoxError>(Record::new())
    }
  })
  .input(Port::new::<String>("msg", "Message"))
  .into_arc()
}

#[tokio::test]
async fn output_reaches_child_stage() {
  let seen = Arc::new(Mutex::new(Vec::new()));
  let root = StreamNode::new("a", producer("hello"))
    .with_child(StreamNode::new("b", collector(Arc::clone(&seen))));
  let monitor = Monitor::new("test");
  let ctx = context(root, &monitor);
  ctx.start().unwrap();
  assert!(ctx.run().await);
  eventually(|| seen.lock().unwrap().len() == 1).await;
  assert_eq!(seen.lock().unwrap()[0], "hello");
  ctx.stop().await;
  assert_eq!(monitor.with("a").get(metrics::STREAM_SUCCESS_COUNT).as_int(), Some(1));
  assert_eq!(monitor.with("b").get(metrics::STREAM_RUN_TIMES).as_int(), Some(1));
}

#[tokio::test]
async fn fan_out_delivers_to_every_child() {
  let left = Arc::new(Mutex::new(Vec::new()));
  let right = Arc::new(Mutex::new(Vec::new()));
  let root = StreamNode::new("a", producer("x"))
    .with_child(StreamNode::new("left", collector(Arc::clone(&left))))
    .with_child(StreamNode::new("right", collector(Arc::clone(&right))));
  let ctx = context(root, &Monitor::new("test"));
  ctx.start().unwrap();
  for _ in 0..3 {
    assert!(ctx.run().await);
  }
  eventually(|| left.lock().unwrap().len() == 3 && right.lock().unwrap().len() == 3).await;
  ctx.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn replicas_see_each_item_exactly_once() {
  let counter = Arc::new(AtomicU64::new(0));
  let numbering = {
    let counter = Arc::clone(&counter);
    FnProcessor::new(move |_r: Record| {
      let n = counter.fetch_add(1, Ordering::SeqCst);
      async move { Ok::<_, BoxError>(Record::new().with("n", n)) }
    })
    .output(Port::named::<u64>("n"))
    .into_arc()
  };
  let seen = Arc::new(Mutex::new(Vec::new()));
  let worker = {
    let seen = Arc::clone(&seen);
    FnProcessor::new(move |r: Record| {
      let seen = Arc::clone(&seen);
      async move {
        tokio::task::yield_now().await;
        seen.lock().unwrap().extend(r.get::<u64>("n"));
        Ok::<_, BoxError>(Record::new())
      }
    })
    .input(Port::named::<u64>("n"))
    .into_arc()
  };
  let root = StreamNode::new("numbering", numbering)
    .with_child(StreamNode::new("work", worker).with_replica(4));
  let monitor = Monitor::new("test");
  let ctx = context(root, &monitor);
  ctx.start().unwrap();
  assert_eq!(monitor.with("work").get(metrics::STREAM_REPLICA).as_int(), Some(4));
  for _ in 0..100 {
    assert!(ctx.run().await);
  }
  eventually(|| seen.lock().unwrap().len() >= 100).await;
  ctx.stop().await;
  let mut seen = seen.lock().unwrap().clone();
  seen.sort_unstable();
  assert_eq!(seen, (0..100).collect::<Vec<u64>>());
}

#[tokio::test]
async fn failed_item_is_dropped_and_worker_continues() {
  let calls = Arc::new(AtomicU64::new(0));
  let flaky = {
    let calls = Arc::clone(&calls);
    FnProcessor::new(move |_r: Record| {
      let n = calls.fetch_add(1, Ordering::SeqCst);
      async move {
        if n == 0 {
          Err::<Record, BoxError>("first call fails".into())
        } else {
          Ok(Record::new().with("msg", "ok".to_string()))
        }
      }
    })
    .output(Port::new::<String>("msg", "Message"))
    .into_arc()
  };
  let seen = Arc::new(Mutex::new(Vec::new()));
  let root = StreamNode::new("flaky", flaky)
    .with_child(StreamNode::new("sink", collector(Arc::clone(&seen))));
  let monitor = Monitor::new("test");
  let ctx = context(root, &monitor);
  ctx.start().unwrap();
  assert!(ctx.run().await);
  assert!(ctx.run().await);
  eventually(|| seen.lock().unwrap().len() == 1).await;
  ctx.stop().await;
  let flaky = monitor.with("flaky");
  assert_eq!(flaky.get(metrics::STREAM_ERROR_COUNT).as_int(), Some(1));
  assert_eq!(flaky.get(metrics::STREAM_SUCCESS_COUNT).as_int(), Some(1));
}

#[tokio::test]
async fn missing_output_counts_as_error() {
  let broken = FnProcessor::new(|_r: Record| async move { Ok::<_, BoxError>(Record::new()) })
    .output(Port::named::<String>("msg"))
    .into_arc();
  let monitor = Monitor::new("test");
  let ctx = context(StreamNode::new("broken", broken), &monitor);
  ctx.start().unwrap();
  assert!(ctx.run().await);
  let m = monitor.with("broken");
  eventually(|| m.get(metrics::STREAM_ERROR_COUNT).as_int() == Some(1)).await;
  ctx.stop().await;
}

#[tokio::test]
async fn panicking_replica_exits_and_pool_closes() {
  let boom = FnProcessor::new(|_r: Record| async move {
    if true {
      panic!("boom");
    }
    Ok::<_, BoxError>(Record::new())
  })
  .into_arc();
  let ctx = context(StreamNode::new("boom", boom), &Monitor::new("test"));
  assert_eq!(ctx.pool_state("boom"), Some(PoolState::NotStarted));
  ctx.start().unwrap();
  assert!(ctx.run().await);
  eventually(|| ctx.pool_state("boom") == Some(PoolState::Closed)).await;
  ctx.stop().await;
}

#[tokio::test]
async fn stop_returns_while_stage_is_blocked() {
  let stuck = FnProcessor::new(|_r: Record| async move {
    std::future::pending::<()>().await;
    Ok::<_, BoxError>(Record::new())
  })
  .into_arc();
  let monitor = Monitor::new("test");
  let ctx = context(StreamNode::new("stuck", stuck).with_replica(2), &monitor);
  ctx.start().unwrap();
  assert_eq!(ctx.pool_state("stuck"), Some(PoolState::Running));
  assert!(ctx.run().await);
  let m = monitor.with("stuck");
  eventually(|| m.get(metrics::STREAM_RUN_TIMES).as_int() == Some(1)).await;
  tokio::time::timeout(Duration::from_secs(5), ctx.stop())
    .await
    .expect("stop must not hang");
  assert_eq!(ctx.pool_state("stuck"), Some(PoolState::Closed));
  assert!(!ctx.run().await);
  assert_eq!(m.get(metrics::STREAM_RUNNING_REPLICA).as_int(), Some(0));
}

#[tokio::test]
async fn start_is_single_shot() {
  let ctx = context(StreamNode::new("a", producer("x")), &Monitor::new("test"));
  ctx.start().unwrap();
  assert_eq!(ctx.start(), Err(ExecError::AlreadyStarted));
  ctx.stop().await;
  assert_eq!(ctx.start(), Err(ExecError::Stopped));
  assert!(ctx.is_stopped());
}

#[tokio::test]
async fn stage_sees_context_token_and_node_monitor() {
  let inspect = FnProcessor::new(|r: Record| async move {
    let monitor = r.get::<Monitor>("monitor").ok_or("no monitor")?;
    let token = r.get::<CancellationToken>("ctx").ok_or("no token")?;
    monitor.set("inspect_namespace", monitor.namespace().to_string());
    monitor.set("inspect_cancelled", if token.is_cancelled() { "yes" } else { "no" });
    Ok::<_, BoxError>(Record::new())
  })
  .input(Port::new::<Monitor>("monitor", "Monitor"))
  .input(Port::new::<CancellationToken>("ctx", "Context"))
  .into_arc();
  let monitor = Monitor::new("test");
  let ctx = context(StreamNode::new("inspect", inspect), &monitor);
  ctx.start().unwrap();
  assert!(ctx.run().await);
  let m = monitor.with("inspect");
  eventually(|| m.get("inspect_cancelled").to_string() == "no").await;
  assert_eq!(m.get("inspect_namespace").to_string(), "inspect");
  ctx.stop().await;
}

#[tokio::test]
async fn panicked_replica_leaves_pool_running() {
  let calls = Arc::new(AtomicU64::new(0));
  let fragile = {
    let calls = Arc::clone(&calls);
    FnProcessor::new(move |_r: Record| {
      let n = calls.fetch_add(1, Ordering::SeqCst);
      async move {
        if n == 0 {
          panic!("first call panics");
        }
        Ok::<_, BoxError>(Record::new())
      }
    })
    .into_arc()
  };
  let monitor = Monitor::new("test");
  let ctx = context(StreamNode::new("fragile", fragile).with_replica(2), &monitor);
  ctx.start().unwrap();
  let m = monitor.with("fragile");

  assert!(ctx.run().await);
  eventually(|| m.get(metrics::STREAM_RUNNING_REPLICA).as_int() == Some(1)).await;
  assert_eq!(ctx.pool_state("fragile"), Some(PoolState::Running));

  assert!(ctx.run().await);
  eventually(|| m.get(metrics::STREAM_SUCCESS_COUNT).as_int() == Some(1)).await;
  assert_eq!(calls.load(Ordering::SeqCst), 2);
  assert_eq!(ctx.pool_state("fragile"), Some(PoolState::Running));
  assert_eq!(m.get(metrics::STREAM_STATE).to_string(), "running");

  ctx.stop().await;
  assert_eq!(ctx.pool_state("fragile"), Some(PoolState::Closed));
}

trait Greeter: Send + Sync {
  fn greet(&self) -> String;
}

struct English;

impl Greeter for English {
  fn greet(&self) -> String {
    "hello".to_string()
  }
}

#[tokio::test]
async fn output_capability_reaches_interface_input() {
  let speaker = FnProcessor::new(|_r: Record| async move {
    let english = Arc::new(English);
    let mut out = Record::new();
    out.insert_capable(
      "g",
      Arc::clone(&english),
      vec![Capability::of::<dyn Greeter>(english)],
    );
    Ok::<_, BoxError>(out)
  })
  .output(Port::shared::<English>("g", "Greeter").with_capability::<dyn Greeter>())
  .into_arc();
  let seen = Arc::new(Mutex::new(Vec::new()));
  let listener = {
    let seen = Arc::clone(&seen);
    FnProcessor::new(move |r: Record| {
      let seen = Arc::clone(&seen);
      async move {
        let greeter = r.get::<Arc<dyn Greeter>>("g").ok_or("no greeter")?;
        seen.lock().unwrap().push(greeter.greet());
        Ok::<_, BoxError>(Record::new())
      }
    })
    .input(Port::shared::<dyn Greeter>("g", "Greeter"))
    .into_arc()
  };
  let root =
    StreamNode::new("speaker", speaker).with_child(StreamNode::new("listener", listener));
  let ctx = context(root, &Monitor::new("test"));
  ctx.start().unwrap();
  assert!(ctx.run().await);
  eventually(|| seen.lock().unwrap().len() == 1).await;
  assert_eq!(seen.lock().unwrap()[0], "hello");
  ctx.stop().await;
}
