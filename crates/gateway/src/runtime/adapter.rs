//! Workflow Runtime Adapter (C7, spec.md §4.7).
//!
//! A trait over the primitive operations the execution primitives (C4),
//! cognitive patterns (C5), and strategy router (C6) are built on, so
//! `shannon-gateway` has one seam to swap a durable/replay backend in
//! later without touching any caller. Grounded on the reference
//! `WorkflowEngineImpl` trait / `WorkflowEngine` enum split (a trait today
//! with a single production implementation, room for a second backend
//! without touching callers) — generalized from task-level operations
//! (`submit`/`status`/`cancel`) to the finer-grained primitive operations
//! (`execute_activity`, `sleep`, channels, selectors) this engine's
//! in-process, non-durable execution model actually needs.
//!
//! Today there is exactly one implementation, [`InProcessRuntime`], built
//! directly from `tokio`'s own primitives in the teacher's idiom
//! (`Arc`-wrapped shared state, `tracing::instrument` spans,
//! `parking_lot` for non-async locks).

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use shannon_domain::error::{Error, Result};
use tokio::sync::{mpsc, oneshot, Semaphore};

pub type ActivityFuture<'a> = Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send + 'a>>;

/// A named unit of non-deterministic work (an LLM call, a tool
/// invocation) dispatched through the adapter so every primitive and
/// pattern records activities uniformly (spec.md §4.7).
#[async_trait]
pub trait Activity: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self) -> Result<serde_json::Value>;
}

/// A boxed channel pair handed back by [`WorkflowRuntime::new_channel`].
pub struct Channel<T> {
    pub tx: mpsc::Sender<T>,
    pub rx: Mutex<mpsc::Receiver<T>>,
}

/// Operations the execution primitives, cognitive patterns, and strategy
/// router depend on instead of calling `tokio` directly (spec.md §4.7).
#[async_trait]
pub trait WorkflowRuntime: Send + Sync {
    /// Execute a named activity and return its result.
    async fn execute_activity(&self, activity: &dyn Activity) -> Result<serde_json::Value>;

    /// Suspend for a duration without blocking the runtime's executor.
    async fn sleep(&self, duration: Duration);

    /// A counting semaphore for bounding concurrent fan-out (the Parallel
    /// primitive's admission gate).
    fn new_semaphore(&self, permits: usize) -> Arc<Semaphore>;

    /// Spawn a unit of work onto the runtime's executor, detached from the
    /// caller (named `go` after the reference engine's task-spawn idiom).
    fn go(&self, fut: Pin<Box<dyn Future<Output = ()> + Send>>);

    /// Deliver an out-of-band signal to a running workflow (approval
    /// decisions, control-state changes) via a named channel.
    async fn signal_channel(&self, name: &str, value: serde_json::Value) -> Result<()>;

    /// Register a handler answering synchronous queries against live
    /// workflow state (used by the control-state and budget snapshot
    /// endpoints to read without blocking the workflow).
    fn query_handler(&self, name: &str, value: serde_json::Value);

    /// Monotonically increasing adapter version, used the way the
    /// reference engine's `get_version` guards a replay-sensitive code
    /// path that changed between releases. This engine doesn't replay,
    /// but the hook is kept so a future durable backend can implement
    /// `WorkflowRuntime` without every caller changing.
    fn get_version(&self, change_id: &str) -> u64;
}

/// Either of two outcomes from [`WorkflowRuntime::selector`].
pub enum Either<A, B> {
    Left(A),
    Right(B),
}

/// The in-process, non-durable [`WorkflowRuntime`] implementation: every
/// operation is a thin wrapper over the matching `tokio` primitive.
pub struct InProcessRuntime {
    signals: Mutex<std::collections::HashMap<String, Vec<mpsc::Sender<serde_json::Value>>>>,
    queries: Mutex<std::collections::HashMap<String, serde_json::Value>>,
    versions: Mutex<std::collections::HashMap<String, u64>>,
    activity_seq: AtomicU64,
}

impl Default for InProcessRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessRuntime {
    pub fn new() -> Self {
        Self {
            signals: Mutex::new(std::collections::HashMap::new()),
            queries: Mutex::new(std::collections::HashMap::new()),
            versions: Mutex::new(std::collections::HashMap::new()),
            activity_seq: AtomicU64::new(0),
        }
    }

    /// Subscribe to a named signal channel (called by the primitive or
    /// pattern that wants to observe it, e.g. a pause/approval wait).
    pub fn subscribe_signal(&self, name: &str, capacity: usize) -> mpsc::Receiver<serde_json::Value> {
        let (tx, rx) = mpsc::channel(capacity);
        self.signals.lock().entry(name.to_owned()).or_default().push(tx);
        rx
    }

    pub fn query(&self, name: &str) -> Option<serde_json::Value> {
        self.queries.lock().get(name).cloned()
    }

    /// An MPMC-style channel of bounded capacity, used by the Hybrid
    /// primitive's dependency-wait protocol. Generic over `T`, so this is
    /// an inherent method rather than part of [`WorkflowRuntime`] (a
    /// generic trait method would make `dyn WorkflowRuntime` impossible).
    pub fn new_channel<T: Send + 'static>(&self, capacity: usize) -> Channel<T> {
        let (tx, rx) = mpsc::channel(capacity);
        Channel { tx, rx: Mutex::new(rx) }
    }

    /// Race two futures, returning whichever completes first (used by the
    /// Hybrid primitive to race a dependency signal against a timeout).
    pub async fn selector<A, B>(&self, a: A, b: B) -> Either<A::Output, B::Output>
    where
        A: Future + Send,
        B: Future + Send,
    {
        tokio::select! {
            out = a => Either::Left(out),
            out = b => Either::Right(out),
        }
    }

    /// Await a future, failing with `Error::Timeout` if it doesn't
    /// resolve within `timeout`.
    pub async fn await_with_timeout<F: Future + Send>(&self, fut: F, timeout: Duration) -> Result<F::Output> {
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| Error::Timeout(format!("operation exceeded {timeout:?}")))
    }
}

#[async_trait]
impl WorkflowRuntime for InProcessRuntime {
    #[tracing::instrument(skip(self, activity), fields(activity = activity.name()))]
    async fn execute_activity(&self, activity: &dyn Activity) -> Result<serde_json::Value> {
        let seq = self.activity_seq.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(seq, "activity dispatched");
        activity.run().await
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn new_semaphore(&self, permits: usize) -> Arc<Semaphore> {
        Arc::new(Semaphore::new(permits))
    }

    fn go(&self, fut: Pin<Box<dyn Future<Output = ()> + Send>>) {
        tokio::spawn(fut);
    }

    async fn signal_channel(&self, name: &str, value: serde_json::Value) -> Result<()> {
        let senders: Vec<mpsc::Sender<serde_json::Value>> = {
            let signals = self.signals.lock();
            signals.get(name).cloned().unwrap_or_default()
        };
        for tx in senders {
            let _ = tx.send(value.clone()).await;
        }
        Ok(())
    }

    fn query_handler(&self, name: &str, value: serde_json::Value) {
        self.queries.lock().insert(name.to_owned(), value);
    }

    fn get_version(&self, change_id: &str) -> u64 {
        let mut versions = self.versions.lock();
        *versions.entry(change_id.to_owned()).or_insert(1)
    }
}

/// One-shot reply handle, used by primitives that need a single answer
/// back from an activity (e.g. the Hybrid primitive's dependency wait).
pub fn one_shot<T>() -> (oneshot::Sender<T>, oneshot::Receiver<T>) {
    oneshot::channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoActivity(&'static str);

    #[async_trait]
    impl Activity for EchoActivity {
        fn name(&self) -> &str {
            self.0
        }
        async fn run(&self) -> Result<serde_json::Value> {
            Ok(serde_json::json!({ "echo": self.0 }))
        }
    }

    #[tokio::test]
    async fn execute_activity_returns_result() {
        let rt = InProcessRuntime::new();
        let result = rt.execute_activity(&EchoActivity("ping")).await.unwrap();
        assert_eq!(result["echo"], "ping");
    }

    #[tokio::test]
    async fn await_with_timeout_times_out() {
        let rt = InProcessRuntime::new();
        let result = rt
            .await_with_timeout(tokio::time::sleep(Duration::from_millis(50)), Duration::from_millis(5))
            .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn signal_channel_delivers_to_subscriber() {
        let rt = InProcessRuntime::new();
        let mut rx = rt.subscribe_signal("approval", 4);
        rt.signal_channel("approval", serde_json::json!({"decision": "approve"})).await.unwrap();
        let value = rx.recv().await.unwrap();
        assert_eq!(value["decision"], "approve");
    }

    #[test]
    fn query_handler_roundtrips() {
        let rt = InProcessRuntime::new();
        rt.query_handler("budget", serde_json::json!({"tokens": 10}));
        assert_eq!(rt.query("budget").unwrap()["tokens"], 10);
    }

    #[test]
    fn get_version_is_stable_per_change_id() {
        let rt = InProcessRuntime::new();
        assert_eq!(rt.get_version("c1"), rt.get_version("c1"));
    }
}
