//! Worker task logic
//!
//! Each worker:
//! - Pulls items from the shared queue without blocking
//! - Invokes the operation under the per-item deadline
//! - Persists successful results to the backup store
//! - Records exactly one outcome per dequeued item
//!
//! A worker exits when the queue is empty or when it is cancelled. A panic
//! inside the operation unwinds through the worker and kills the task; the
//! coordinator notices and spawns a replacement.

use crate::backup::{encode_artifact, Artifact, BackupStore, RunId};
use crate::error::{ItemError, StoreError};
use crate::operation::{invoke, Invocation, Operation};
use crate::outcome::{Outcome, ResultStore};
use crate::queue::{QueuedItem, WorkQueue};
use crate::report::FailureLog;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Where successful results are persisted
#[derive(Clone)]
pub struct BackupTarget {
    pub store: Arc<dyn BackupStore>,
    pub kind: String,
    pub run_id: RunId,
}

/// State shared by every worker of a run
pub struct WorkerContext<P, O>
where
    P: Send + Sync + 'static,
    O: Operation<P>,
{
    pub queue: WorkQueue<P>,
    pub results: Arc<ResultStore<O::Output>>,
    pub operation: Arc<O>,
    pub backup: Option<BackupTarget>,
    pub timeout: Duration,
    pub failure_log: Option<Arc<FailureLog>>,

    /// Pinged whenever a worker task ends, however it ends
    pub exited: Arc<Notify>,
}

/// Notifies the coordinator on drop, including while unwinding a panic
struct ExitSignal<'a>(&'a Notify);

impl Drop for ExitSignal<'_> {
    fn drop(&mut self) {
        self.0.notify_one();
    }
}

/// Main worker loop
///
/// Returns the number of items this worker recorded.
pub async fn worker_loop<P, O>(
    id: usize,
    ctx: Arc<WorkerContext<P, O>>,
    cancel: CancellationToken,
) -> Result<usize, StoreError>
where
    P: Send + Sync + 'static,
    O: Operation<P>,
{
    let _exit = ExitSignal(&ctx.exited);
    let mut processed = 0;

    debug!(worker = id, "Worker starting");

    while !cancel.is_cancelled() {
        let Some(queued) = ctx.queue.pop() else {
            break;
        };

        trace!(worker = id, item = %queued.item.name, "Processing item");

        let invocation = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(worker = id, item = %queued.item.name, "Cancelled while item in flight");
                break;
            }
            invocation = invoke(ctx.operation.as_ref(), Arc::clone(&queued.item), ctx.timeout) => invocation,
        };

        let outcome = settle(id, &ctx, &queued, invocation).await;

        // No new outcome once cancellation has been requested
        if cancel.is_cancelled() {
            break;
        }

        ctx.results.set(queued.index, outcome)?;
        ctx.queue.release(queued.index);
        processed += 1;
    }

    debug!(worker = id, processed = processed, "Worker exiting");
    Ok(processed)
}

/// Turn an invocation into the outcome to record, persisting first
async fn settle<P, O>(
    id: usize,
    ctx: &WorkerContext<P, O>,
    queued: &QueuedItem<P>,
    invocation: Invocation<O::Output>,
) -> Outcome<O::Output>
where
    P: Send + Sync + 'static,
    O: Operation<P>,
{
    let name = &queued.item.name;

    match invocation {
        Invocation::Completed(value) => match persist(ctx.backup.as_ref(), name, &value).await {
            Ok(()) => {
                trace!(worker = id, item = %name, "Item succeeded");
                Outcome::Success(value)
            }
            Err(e) => {
                warn!(worker = id, item = %name, error = %e, "Result could not be persisted");
                record_failure(ctx, name, &e.to_string()).await;
                Outcome::Failed(e)
            }
        },
        Invocation::TimedOut(after) => {
            warn!(worker = id, item = %name, timeout_secs = after.as_secs_f64(), "Item timed out");
            record_failure(ctx, name, &format!("timed out after {:.1}s", after.as_secs_f64())).await;
            Outcome::TimedOut { after }
        }
        Invocation::Failed(e) => {
            warn!(worker = id, item = %name, error = %e, "Item failed");
            record_failure(ctx, name, &e.to_string()).await;
            Outcome::Failed(e)
        }
    }
}

/// Durably store a successful value before it is reported
async fn persist<T: Artifact>(
    backup: Option<&BackupTarget>,
    item_name: &str,
    value: &T,
) -> Result<(), ItemError> {
    let Some(target) = backup else {
        return Ok(());
    };

    let data = encode_artifact(item_name, &target.kind, &target.run_id, value)
        .map_err(|e| ItemError::Persist(e.to_string()))?;

    let store = Arc::clone(&target.store);
    let kind = target.kind.clone();
    let run_id = target.run_id;
    let name = item_name.to_string();

    tokio::task::spawn_blocking(move || store.write(&name, &kind, &run_id, &data))
        .await
        .map_err(|e| ItemError::Persist(e.to_string()))?
        .map(|_| ())
        .map_err(|e| ItemError::Persist(e.to_string()))
}

async fn record_failure<P, O>(ctx: &WorkerContext<P, O>, item_name: &str, message: &str)
where
    P: Send + Sync + 'static,
    O: Operation<P>,
{
    if let Some(log) = &ctx.failure_log {
        log.record(item_name, message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Collection, Item};
    use crate::operation::{operation_fn, FnOperation};
    use std::future::Future;

    fn context<F, Fut>(
        names: &[&str],
        f: F,
    ) -> Arc<WorkerContext<(), FnOperation<F>>>
    where
        F: Fn(Arc<Item<()>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<u64, ItemError>> + Send + 'static,
    {
        let collection = Collection::from_names(names.iter().copied()).unwrap();
        let queue = WorkQueue::new();
        for item in &collection {
            queue.push(Arc::clone(item));
        }

        Arc::new(WorkerContext {
            queue,
            results: Arc::new(ResultStore::new(collection.len())),
            operation: Arc::new(operation_fn(f)),
            backup: None,
            timeout: Duration::from_millis(100),
            failure_log: None,
            exited: Arc::new(Notify::new()),
        })
    }

    #[tokio::test]
    async fn test_worker_drains_queue() {
        let ctx = context(&["a", "bb", "ccc"], |item: Arc<Item<()>>| async move {
            Ok(item.name.len() as u64)
        });

        let processed = worker_loop(0, Arc::clone(&ctx), CancellationToken::new()).await.unwrap();

        assert_eq!(processed, 3);
        assert!(ctx.queue.is_empty());
        assert!(ctx.queue.claimed().is_empty());
        assert_eq!(ctx.results.get(2), Some(Outcome::Success(3)));
    }

    #[tokio::test]
    async fn test_worker_classifies_outcomes() {
        let ctx = context(&["ok", "slow", "bad"], |item: Arc<Item<()>>| async move {
            match item.name.as_str() {
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(0)
                }
                "bad" => Err(ItemError::domain("no convergence")),
                _ => Ok(1),
            }
        });

        worker_loop(0, Arc::clone(&ctx), CancellationToken::new()).await.unwrap();

        let snapshot = ctx.results.snapshot();
        assert_eq!(snapshot.success, 1);
        assert_eq!(snapshot.timed_out, 1);
        assert_eq!(snapshot.failed, 1);
    }

    #[tokio::test]
    async fn test_cancelled_worker_records_nothing() {
        let ctx = context(&["a", "b"], |_item: Arc<Item<()>>| async move { Ok(1) });
        let cancel = CancellationToken::new();
        cancel.cancel();

        let processed = worker_loop(0, Arc::clone(&ctx), cancel).await.unwrap();

        assert_eq!(processed, 0);
        assert_eq!(ctx.results.snapshot().pending, 2);
        assert_eq!(ctx.queue.len(), 2);
    }

    #[tokio::test]
    async fn test_exit_notifies() {
        let ctx = context(&[], |_item: Arc<Item<()>>| async move { Ok(1) });
        let notified = ctx.exited.notified();

        worker_loop(0, Arc::clone(&ctx), CancellationToken::new()).await.unwrap();

        // The stored permit completes the wait immediately
        tokio::time::timeout(Duration::from_millis(100), notified).await.unwrap();
    }
}
