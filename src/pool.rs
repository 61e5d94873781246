//! Worker pool - spawns, reaps and replaces worker tasks
//!
//! The pool owns one parent cancellation token; each worker gets a child
//! token so that a single worker can be stopped without touching the others.
//! Handles are owned by the coordinator task only, so no locking is needed.

use crate::error::{ConfigError, StoreError, WorkerError};
use crate::operation::Operation;
use crate::worker::{worker_loop, WorkerContext};
use std::any::Any;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handle to one spawned worker task
pub struct WorkerHandle {
    id: usize,
    join: JoinHandle<Result<usize, StoreError>>,
    cancel: CancellationToken,
}

impl WorkerHandle {
    /// Get worker ID
    pub fn id(&self) -> usize {
        self.id
    }

    /// Ask the worker to stop after its current await point
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Check if the task has ended
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// How a worker task ended
#[derive(Debug)]
pub enum ExitStatus {
    /// Queue drained or cancellation honoured
    Completed { processed: usize },

    /// Task ended abnormally
    Died(WorkerError),
}

impl ExitStatus {
    /// Check if the worker died
    pub fn is_death(&self) -> bool {
        matches!(self, ExitStatus::Died(_))
    }
}

/// A reaped worker
#[derive(Debug)]
pub struct WorkerExit {
    pub id: usize,
    pub status: ExitStatus,
}

/// Set of live worker tasks sharing one context
pub struct WorkerPool<P, O>
where
    P: Send + Sync + 'static,
    O: Operation<P>,
{
    ctx: Arc<WorkerContext<P, O>>,
    handles: Vec<WorkerHandle>,
    cancel: CancellationToken,
    next_id: usize,
    respawned: usize,
}

impl<P, O> WorkerPool<P, O>
where
    P: Send + Sync + 'static,
    O: Operation<P>,
{
    /// Create an empty pool
    pub fn new(ctx: Arc<WorkerContext<P, O>>) -> Self {
        Self {
            ctx,
            handles: Vec::new(),
            cancel: CancellationToken::new(),
            next_id: 0,
            respawned: 0,
        }
    }

    /// Start `count` workers
    pub fn spawn(&mut self, count: usize) -> Result<(), ConfigError> {
        if self.live() > 0 {
            return Err(ConfigError::PoolAlreadyActive);
        }

        for _ in 0..count {
            self.spawn_one();
        }

        info!(count = count, "Workers spawned");
        Ok(())
    }

    /// Start exactly one worker in place of a dead one
    pub fn spawn_replacement(&mut self) -> usize {
        self.respawned += 1;
        let id = self.spawn_one();
        info!(worker = id, respawned = self.respawned, "Replacement worker spawned");
        id
    }

    fn spawn_one(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;

        let cancel = self.cancel.child_token();
        let join = tokio::spawn(worker_loop(id, Arc::clone(&self.ctx), cancel.clone()));

        self.handles.push(WorkerHandle { id, join, cancel });
        id
    }

    /// Cancel every live worker without waiting
    pub fn cancel_all(&self) {
        self.cancel.cancel();
    }

    /// Remove finished handles and report how each one ended
    pub async fn reap(&mut self) -> Vec<WorkerExit> {
        let (finished, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.handles)
            .into_iter()
            .partition(WorkerHandle::is_finished);
        self.handles = live;

        let mut exits = Vec::with_capacity(finished.len());
        for handle in finished {
            let id = handle.id;
            let status = classify(id, handle.join.await);

            match &status {
                ExitStatus::Completed { processed } => {
                    debug!(worker = id, processed = processed, "Worker finished");
                }
                ExitStatus::Died(e) => {
                    warn!(worker = id, error = %e, "Worker died");
                }
            }

            exits.push(WorkerExit { id, status });
        }

        exits
    }

    /// Number of workers not yet reaped
    pub fn live(&self) -> usize {
        self.handles.len()
    }

    /// Number of replacement workers started so far
    pub fn respawned(&self) -> usize {
        self.respawned
    }

    /// Shared worker state
    pub fn context(&self) -> &Arc<WorkerContext<P, O>> {
        &self.ctx
    }

    /// Cancel all workers and wait for every task to end
    pub async fn shutdown(&mut self) -> Vec<WorkerExit> {
        self.cancel_all();

        let handles = std::mem::take(&mut self.handles);
        let mut exits = Vec::with_capacity(handles.len());
        for handle in handles {
            let id = handle.id;
            handle.cancel();
            exits.push(WorkerExit {
                id,
                status: classify(id, handle.join.await),
            });
        }

        debug!(workers = exits.len(), "Worker pool shut down");
        exits
    }
}

impl<P, O> Drop for WorkerPool<P, O>
where
    P: Send + Sync + 'static,
    O: Operation<P>,
{
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn classify(
    id: usize,
    joined: Result<Result<usize, StoreError>, JoinError>,
) -> ExitStatus {
    match joined {
        Ok(Ok(processed)) => ExitStatus::Completed { processed },
        Ok(Err(source)) => ExitStatus::Died(WorkerError::Store { id, source }),
        Err(e) if e.is_panic() => ExitStatus::Died(WorkerError::Panicked {
            id,
            message: panic_message(e.into_panic()),
        }),
        Err(_) => ExitStatus::Died(WorkerError::Cancelled { id }),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ItemError;
    use crate::item::{Collection, Item};
    use crate::operation::{operation_fn, FnOperation};
    use crate::outcome::ResultStore;
    use crate::queue::WorkQueue;
    use std::future::Future;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn build_pool<F, Fut>(names: &[&str], f: F) -> WorkerPool<(), FnOperation<F>>
    where
        F: Fn(Arc<Item<()>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<u32, ItemError>> + Send + 'static,
    {
        let collection = Collection::from_names(names.iter().copied()).unwrap();
        let queue = WorkQueue::new();
        for item in &collection {
            queue.push(Arc::clone(item));
        }

        WorkerPool::new(Arc::new(WorkerContext {
            queue,
            results: Arc::new(ResultStore::new(collection.len())),
            operation: Arc::new(operation_fn(f)),
            backup: None,
            timeout: Duration::from_secs(5),
            failure_log: None,
            exited: Arc::new(Notify::new()),
        }))
    }

    async fn reap_all<P, O>(pool: &mut WorkerPool<P, O>) -> Vec<WorkerExit>
    where
        P: Send + Sync + 'static,
        O: Operation<P>,
    {
        let mut exits = Vec::new();
        while pool.live() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            exits.extend(pool.reap().await);
        }
        exits
    }

    #[tokio::test]
    async fn test_spawn_and_reap() {
        let mut pool = build_pool(&["a", "b", "c", "d"], |_item: Arc<Item<()>>| async move { Ok(1) });
        pool.spawn(2).unwrap();

        let exits = reap_all(&mut pool).await;

        assert_eq!(exits.len(), 2);
        let processed: usize = exits
            .iter()
            .map(|e| match e.status {
                ExitStatus::Completed { processed } => processed,
                ExitStatus::Died(_) => 0,
            })
            .sum();
        assert_eq!(processed, 4);
        assert!(pool.context().results.snapshot().is_complete());
    }

    #[tokio::test]
    async fn test_spawn_while_active() {
        let mut pool = build_pool(&["a"], |_item: Arc<Item<()>>| async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(1)
        });
        pool.spawn(1).unwrap();

        assert_eq!(pool.spawn(1), Err(ConfigError::PoolAlreadyActive));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_panic_is_reported() {
        let mut pool = build_pool(&["boom", "fine"], |item: Arc<Item<()>>| async move {
            if item.name == "boom" {
                panic!("bad item {}", item.name);
            }
            Ok(1)
        });
        pool.spawn(1).unwrap();

        let exits = reap_all(&mut pool).await;
        assert_eq!(exits.len(), 1);
        match &exits[0].status {
            ExitStatus::Died(WorkerError::Panicked { message, .. }) => {
                assert_eq!(message, "bad item boom");
            }
            other => panic!("expected panic exit, got {:?}", other),
        }

        pool.spawn_replacement();
        reap_all(&mut pool).await;

        assert_eq!(pool.respawned(), 1);
        assert_eq!(pool.context().queue.claimed(), vec![0]);
        assert!(pool.context().results.is_pending(0));
        assert!(!pool.context().results.is_pending(1));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight() {
        let mut pool = build_pool(&["a", "b"], |_item: Arc<Item<()>>| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(1)
        });
        pool.spawn(2).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let exits = pool.shutdown().await;

        assert_eq!(exits.len(), 2);
        assert!(exits.iter().all(|e| !e.status.is_death()));
        assert_eq!(pool.live(), 0);
        assert_eq!(pool.context().results.snapshot().pending, 2);
    }
}
