//! Bounded-concurrency executor for panel fetches.
//!
//! The queue is a bounded `mpsc` channel; `submit` blocks when it's full,
//! which is intentional — it couples the subscription loop's dispatch rate
//! to fetch throughput (see module-level back-pressure discipline in the
//! crate's design notes).
//!
//! `resize` must not drop work queued before it runs. It swaps in a fresh
//! channel and fresh workers under the write side of a reader/writer lock
//! (submissions hold the read side), then drains whatever was still
//! buffered in the old channel into the new one. Old workers and the drain
//! task race for the same buffered items — whichever wins processes that
//! item, which is fine because the queue never promises anything stronger
//! than single delivery.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Task = Box<dyn FnOnce(CancellationToken) -> BoxFuture + Send>;

struct QueueItem {
    task: Task,
    done: oneshot::Sender<()>,
}

type SharedReceiver = Arc<AsyncMutex<mpsc::Receiver<QueueItem>>>;

struct PoolState {
    sender: mpsc::Sender<QueueItem>,
    receiver: SharedReceiver,
}

/// A bounded-concurrency worker pool scoped to a parent cancellation token.
pub struct WorkerPool {
    state: RwLock<PoolState>,
    capacity: usize,
    size: AtomicUsize,
    token: CancellationToken,
}

impl WorkerPool {
    /// Create a pool with `size` workers and a bounded queue of `capacity`
    /// entries, whose lifetime is tied to a child of `parent_token`.
    pub fn new(parent_token: &CancellationToken, size: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            state: RwLock::new(PoolState { sender, receiver: Arc::new(AsyncMutex::new(receiver)) }),
            capacity,
            size: AtomicUsize::new(size),
            token: parent_token.child_token(),
        }
    }

    /// Spawn `size` workers, each pulling tasks from the queue until it is
    /// closed.
    pub async fn start(&self) {
        let state = self.state.read().await;
        self.spawn_workers(self.size.load(Ordering::SeqCst), state.receiver.clone());
    }

    fn spawn_workers(&self, count: usize, receiver: SharedReceiver) {
        for _ in 0..count {
            let receiver = receiver.clone();
            let token = self.token.clone();
            tokio::spawn(async move {
                debug!("worker started");
                loop {
                    let item = {
                        let mut rx = receiver.lock().await;
                        rx.recv().await
                    };
                    match item {
                        Some(item) => run_item(item, token.clone()).await,
                        None => break,
                    }
                }
                debug!("worker finished");
            });
        }
    }

    /// Enqueue `f(pool_ctx)`. Blocks on a full queue. Returns once `f` has
    /// completed (successfully or not — panics are caught per-task).
    pub async fn submit<F, Fut>(&self, f: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.token.is_cancelled() {
            return Err(CoreError::PoolStopped);
        }
        let sender = {
            let state = self.state.read().await;
            state.sender.clone()
        };
        let (done_tx, done_rx) = oneshot::channel();
        let task: Task = Box::new(move |ctx| Box::pin(f(ctx)));
        sender
            .send(QueueItem { task, done: done_tx })
            .await
            .map_err(|_| CoreError::PoolStopped)?;
        let _ = done_rx.await;
        Ok(())
    }

    /// Swap in a fresh queue and `new_size` fresh workers without dropping
    /// work still pending in the old queue. A no-op if `new_size` equals
    /// the current size.
    pub async fn resize(&self, new_size: usize) {
        if self.size.load(Ordering::SeqCst) == new_size {
            return;
        }
        let (new_sender, new_receiver) = mpsc::channel(self.capacity.max(1));
        let new_receiver = Arc::new(AsyncMutex::new(new_receiver));

        let old_receiver = {
            let mut state = self.state.write().await;
            let old_receiver = state.receiver.clone();
            state.sender = new_sender.clone();
            state.receiver = new_receiver.clone();
            old_receiver
        };
        self.size.store(new_size, Ordering::SeqCst);
        self.spawn_workers(new_size, new_receiver);

        info!(new_size, "worker pool resized");

        // Transfer whatever was still buffered in the old queue. Races with
        // any old workers still draining it — each item is delivered once,
        // to whichever side wins the lock.
        tokio::spawn(async move {
            loop {
                let item = {
                    let mut rx = old_receiver.lock().await;
                    rx.recv().await
                };
                match item {
                    Some(item) => {
                        if new_sender.send(item).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        });
    }

    /// Cancel the pool scope and close the queue. Workers observe closure
    /// and exit once drained; in-flight tasks are not interrupted.
    pub async fn stop(&self) {
        self.token.cancel();
        let mut state = self.state.write().await;
        let (dead_sender, _) = mpsc::channel(1);
        state.sender = dead_sender;
    }

    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }
}

async fn run_item(item: QueueItem, token: CancellationToken) {
    let QueueItem { task, done } = item;
    let handle = tokio::spawn(task(token));
    if let Err(e) = handle.await {
        warn!(error = %e, "panel fetch task panicked; worker continues");
    }
    let _ = done.send(());
}

/// Cancel `combined` when either `a` or `b` is cancelled. Used to make a
/// fetch task die if either its generation scope or the pool scope ends.
pub fn combine_tokens(a: &CancellationToken, b: &CancellationToken) -> CancellationToken {
    let combined = CancellationToken::new();
    let out = combined.clone();
    let a = a.clone();
    let b = b.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = a.cancelled() => {}
            _ = b.cancelled() => {}
            _ = out.cancelled() => {}
        }
        out.cancel();
    });
    combined
}
