//! Ordered, retrying background execution for slow external effects
//!
//! Game logic runs synchronously inside a tick. Anything that talks to the
//! outside world is wrapped in a [`DeferredCall`] and handed to the session's
//! [`DeferQueue`], which returns immediately. A single worker task runs the
//! calls strictly in enqueue order, retrying failures with exponential backoff
//! until the policy's ceiling, after which the failure is reported to the
//! error sink and dropped.
//!
//! A tracked queue records method names and arguments without running
//! anything, which keeps single-step tests deterministic.

use log::{debug, error, warn};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type CallFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;
pub type ErrorSink = Arc<dyn Fn(DeferFailure) + Send + Sync>;

/// A named, re-runnable external effect
pub struct DeferredCall {
    pub method: String,
    pub args: Vec<String>,
    task: Box<dyn FnMut() -> CallFuture + Send>,
}

impl DeferredCall {
    pub fn new<F, Fut>(method: impl Into<String>, args: Vec<String>, mut task: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            method: method.into(),
            args,
            task: Box::new(move || Box::pin(task())),
        }
    }

    fn attempt(&mut self) -> CallFuture {
        (self.task)()
    }
}

impl fmt::Debug for DeferredCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredCall")
            .field("method", &self.method)
            .field("args", &self.args)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// A call that exhausted its retries
#[derive(Debug, Clone, PartialEq)]
pub struct DeferFailure {
    pub method: String,
    pub args: Vec<String>,
    pub attempts: u32,
    pub error: String,
}

/// What a tracked queue captured instead of executing
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedCall {
    pub method: String,
    pub args: Vec<String>,
}

enum Job {
    Call(DeferredCall),
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
enum Mode {
    Worker(mpsc::UnboundedSender<Job>),
    Tracked(Arc<Mutex<Vec<TrackedCall>>>),
}

/// Cheap-to-clone handle onto one session's deferred-call worker
#[derive(Clone)]
pub struct DeferQueue {
    mode: Mode,
}

impl DeferQueue {
    /// Starts the worker task; must be called from within a tokio runtime
    pub fn spawn(policy: RetryPolicy, sink: ErrorSink) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(rx, policy, sink));
        Self {
            mode: Mode::Worker(tx),
        }
    }

    /// A queue that records calls without running them
    pub fn tracked() -> Self {
        Self {
            mode: Mode::Tracked(Arc::new(Mutex::new(Vec::new()))),
        }
    }

    /// Sink that logs failures at error level
    pub fn log_sink() -> ErrorSink {
        Arc::new(|failure: DeferFailure| {
            error!(
                "Deferred call {}({}) dropped after {} attempts: {}",
                failure.method,
                failure.args.join(", "),
                failure.attempts,
                failure.error
            );
        })
    }

    pub fn is_tracked(&self) -> bool {
        matches!(self.mode, Mode::Tracked(_))
    }

    /// Enqueues a call and returns without waiting for it
    pub fn defer(&self, call: DeferredCall) {
        match &self.mode {
            Mode::Worker(tx) => {
                let method = call.method.clone();
                if tx.send(Job::Call(call)).is_err() {
                    error!("Defer worker is gone, dropping call {}", method);
                }
            }
            Mode::Tracked(calls) => {
                let mut calls = calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                calls.push(TrackedCall {
                    method: call.method,
                    args: call.args,
                });
            }
        }
    }

    /// Resolves once every call enqueued before it has finished
    pub async fn flush(&self) {
        if let Mode::Worker(tx) = &self.mode {
            let (done_tx, done_rx) = oneshot::channel();
            if tx.send(Job::Flush(done_tx)).is_ok() {
                let _ = done_rx.await;
            }
        }
    }

    /// Calls captured by a tracked queue, in order
    pub fn recorded(&self) -> Vec<TrackedCall> {
        match &self.mode {
            Mode::Tracked(calls) => calls
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone(),
            Mode::Worker(_) => Vec::new(),
        }
    }
}

impl fmt::Debug for DeferQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.is_tracked() { "tracked" } else { "worker" };
        f.debug_struct("DeferQueue").field("mode", &mode).finish()
    }
}

async fn run_worker(mut rx: mpsc::UnboundedReceiver<Job>, policy: RetryPolicy, sink: ErrorSink) {
    while let Some(job) = rx.recv().await {
        match job {
            Job::Call(call) => execute(call, &policy, &sink).await,
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Defer worker stopped");
}

async fn execute(mut call: DeferredCall, policy: &RetryPolicy, sink: &ErrorSink) {
    let mut attempts = 0;

    loop {
        attempts += 1;
        match call.attempt().await {
            Ok(()) => {
                debug!("Deferred call {} succeeded after {} attempt(s)", call.method, attempts);
                return;
            }
            Err(e) if attempts > policy.max_retries => {
                sink(DeferFailure {
                    method: call.method,
                    args: call.args,
                    attempts,
                    error: e.to_string(),
                });
                return;
            }
            Err(e) => {
                let delay = policy.delay_for(attempts - 1);
                warn!(
                    "Deferred call {} failed (attempt {}): {}; retrying in {:?}",
                    call.method, attempts, e, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    fn collecting_sink() -> (ErrorSink, Arc<Mutex<Vec<DeferFailure>>>) {
        let failures = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&failures);
        let sink: ErrorSink =
            Arc::new(move |failure: DeferFailure| captured.lock().unwrap().push(failure));
        (sink, failures)
    }

    /// Call that fails `failures` times, then succeeds
    fn flaky_call(attempts: Arc<AtomicU32>, failures: u32) -> DeferredCall {
        DeferredCall::new("flaky", vec!["a".into()], move || {
            let attempts = Arc::clone(&attempts);
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                let result: Result<(), BoxError> = if n <= failures {
                    Err(format!("failure {}", n).into())
                } else {
                    Ok(())
                };
                result
            }
        })
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let (sink, failures) = collecting_sink();
        let queue = DeferQueue::spawn(fast_policy(2), sink);
        let attempts = Arc::new(AtomicU32::new(0));

        queue.defer(flaky_call(Arc::clone(&attempts), 2));
        queue.flush().await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(failures.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ceiling_reports_exactly_once() {
        let (sink, failures) = collecting_sink();
        let queue = DeferQueue::spawn(fast_policy(1), sink);
        let attempts = Arc::new(AtomicU32::new(0));

        queue.defer(flaky_call(Arc::clone(&attempts), u32::MAX));
        queue.flush().await;

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].method, "flaky");
        assert_eq!(failures[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_calls_run_in_enqueue_order() {
        let (sink, _) = collecting_sink();
        let queue = DeferQueue::spawn(fast_policy(0), sink);
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = Arc::clone(&order);
            queue.defer(DeferredCall::new("push", vec![i.to_string()], move || {
                let order = Arc::clone(&order);
                async move {
                    // later calls finish faster, so overlap would reorder them
                    tokio::time::sleep(Duration::from_millis(5 - i)).await;
                    order.lock().unwrap().push(i);
                    Ok::<(), BoxError>(())
                }
            }));
        }
        queue.flush().await;

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_defer_does_not_block_caller() {
        let (sink, _) = collecting_sink();
        let queue = DeferQueue::spawn(fast_policy(0), sink);
        let attempts = Arc::new(AtomicU32::new(0));

        queue.defer(flaky_call(Arc::clone(&attempts), 0));
        // single-threaded test runtime: the worker cannot have run yet
        assert_eq!(attempts.load(Ordering::SeqCst), 0);

        queue.flush().await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tracked_queue_records_without_running() {
        let queue = DeferQueue::tracked();
        let attempts = Arc::new(AtomicU32::new(0));

        queue.defer(flaky_call(Arc::clone(&attempts), 0));
        queue.defer(DeferredCall::new("grant_reward", vec!["p1".into(), "5".into()], || async {
            Ok::<(), BoxError>(())
        }));

        assert_eq!(attempts.load(Ordering::SeqCst), 0);
        assert!(queue.is_tracked());
        assert_eq!(
            queue.recorded(),
            vec![
                TrackedCall {
                    method: "flaky".into(),
                    args: vec!["a".into()]
                },
                TrackedCall {
                    method: "grant_reward".into(),
                    args: vec!["p1".into(), "5".into()]
                },
            ]
        );
    }
}
