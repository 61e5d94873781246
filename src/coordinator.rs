//! Run coordinator - orchestrates one pass over a collection
//!
//! The coordinator is responsible for:
//! - Building the work queue from the backup store (bypass scan)
//! - Starting the worker pool and replacing workers that die
//! - Periodic status reporting with an ETA
//! - Graceful shutdown when the shutdown flag is raised
//! - Marking items lost by dead workers and returning the outcomes
//!
//! ```text
//! Building ──▶ Running ──▶ Draining ──▶ Done
//!                 │            │
//!                 └──────┬─────┘
//!                        ▼
//!                    Cancelled
//! ```

use crate::backup::{reconcile, BackupStore, DirBackupStore, ReconcileStats, RunId};
use crate::config::RunConfig;
use crate::error::{ConfigError, Result, RunnerError, WorkerError};
use crate::item::Collection;
use crate::operation::Operation;
use crate::outcome::{Outcome, ResultStore, StatusSnapshot};
use crate::pool::{ExitStatus, WorkerPool};
use crate::progress::{ProgressReporter, RunProgress};
use crate::queue::WorkQueue;
use crate::report::FailureLog;
use crate::worker::{BackupTarget, WorkerContext};
use chrono::{DateTime, Local, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Consulting the backup store and filling the queue
    Building,

    /// Workers are draining the queue
    Running,

    /// Queue empty and every worker gone
    Draining,

    /// Outcomes handed back
    Done,

    /// Shutdown requested; unfinished items stay pending
    Cancelled,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Building => "building",
            RunState::Running => "running",
            RunState::Draining => "draining",
            RunState::Done => "done",
            RunState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Result of a finished run
#[derive(Debug)]
pub struct RunReport<T> {
    /// Identifier written into every artifact of this run
    pub run_id: RunId,

    /// `Done` or `Cancelled`
    pub state: RunState,

    /// One outcome per item, aligned with collection indices
    pub outcomes: Vec<Outcome<T>>,

    /// Final outcome counts
    pub summary: StatusSnapshot,

    /// Wall-clock start
    pub started_at: DateTime<Utc>,

    /// Time taken for the run
    pub duration: Duration,

    /// Replacement workers spawned for dead ones
    pub respawned: usize,

    /// Bypass scan counters
    pub reconcile: ReconcileStats,
}

impl<T> RunReport<T> {
    /// Whether the run drained the whole queue (vs was interrupted)
    pub fn completed(&self) -> bool {
        self.state == RunState::Done
    }
}

/// Coordinates one run over a collection
pub struct Coordinator {
    /// Configuration
    config: Arc<RunConfig>,

    /// Shutdown signal
    shutdown: Arc<AtomicBool>,

    /// Run identifier
    run_id: RunId,

    /// Backup store and artifact kind
    backup: Option<(Arc<dyn BackupStore>, String)>,
}

impl Coordinator {
    /// Create a new coordinator, opening the backup directory if configured
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate()?;

        let backup = match &config.backup {
            Some(backup) => {
                let store = DirBackupStore::open(&backup.dir).map_err(|e| {
                    ConfigError::InvalidBackupDir {
                        path: backup.dir.clone(),
                        reason: e.to_string(),
                    }
                })?;
                let store: Arc<dyn BackupStore> = Arc::new(store);
                Some((store, backup.kind.clone()))
            }
            None => None,
        };

        Ok(Self {
            config: Arc::new(config),
            shutdown: Arc::new(AtomicBool::new(false)),
            run_id: RunId::new(),
            backup,
        })
    }

    /// Use a custom backup store instead of the configured directory
    pub fn with_backup_store(mut self, store: Arc<dyn BackupStore>, kind: impl Into<String>) -> Result<Self> {
        let kind = kind.into();
        crate::backup::validate_key(&kind).map_err(|e| ConfigError::InvalidKind {
            kind: kind.clone(),
            reason: e.to_string(),
        })?;

        self.backup = Some((store, kind));
        Ok(self)
    }

    /// Get a clone of the shutdown flag (for signal handlers)
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Identifier of this run
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Drive `operation` over every item of `collection`
    ///
    /// Per-item failures are recorded in the report, never returned. Fails
    /// only when shutdown is requested before any outcome is recorded, or on
    /// a worker pool defect. A shutdown after some items were bypassed ends
    /// the run as `Cancelled` with the rest pending.
    pub async fn run<P, O>(self, collection: &Collection<P>, operation: O) -> Result<RunReport<O::Output>>
    where
        P: Send + Sync + 'static,
        O: Operation<P>,
    {
        let start_time = Instant::now();
        let started_at = Utc::now();
        let mut state = RunState::Building;

        info!(
            run_id = %self.run_id,
            items = collection.len(),
            concurrency = self.config.concurrency,
            timeout_secs = self.config.per_item_timeout.as_secs_f64(),
            "Starting run"
        );

        let results = Arc::new(ResultStore::new(collection.len()));
        let queue = WorkQueue::new();

        let reconcile_stats = reconcile(
            collection,
            self.backup.as_ref().map(|(store, kind)| (store.as_ref(), kind.as_str())),
            &results,
            &queue,
            &self.shutdown,
        )?;

        let failure_log = self
            .config
            .failure_log
            .as_ref()
            .map(|path| Arc::new(FailureLog::new(path)));
        let exited = Arc::new(Notify::new());

        let ctx = Arc::new(WorkerContext {
            queue: queue.clone(),
            results: Arc::clone(&results),
            operation: Arc::new(operation),
            backup: self.backup.as_ref().map(|(store, kind)| BackupTarget {
                store: Arc::clone(store),
                kind: kind.clone(),
                run_id: self.run_id,
            }),
            timeout: self.config.per_item_timeout,
            failure_log: failure_log.clone(),
            exited: Arc::clone(&exited),
        });

        let mut pool = WorkerPool::new(ctx);
        if reconcile_stats.interrupted {
            info!("Shutdown signal received during backup scan");
            state = self.transition(state, RunState::Cancelled);
        } else {
            state = self.transition(state, RunState::Running);
            pool.spawn(self.config.concurrency.min(queue.len()))?;
        }

        let progress = self.config.show_progress.then(ProgressReporter::new);
        let local_start: DateTime<Local> = started_at.into();

        while state == RunState::Running {
            for exit in pool.reap().await {
                if exit.status.is_death() && !queue.is_empty() {
                    pool.spawn_replacement();
                }
            }

            let tick = RunProgress {
                snapshot: results.snapshot(),
                elapsed: start_time.elapsed(),
                started_at: local_start,
                queued: queue.len(),
                live_workers: pool.live(),
            };
            match &progress {
                Some(p) => p.update(&tick),
                None => info!("{}", tick.status_line()),
            }

            if queue.is_empty() && pool.live() == 0 {
                state = self.transition(state, RunState::Draining);
                break;
            }

            if self.shutdown.load(Ordering::Relaxed) {
                info!("Shutdown signal received");
                state = self.transition(state, RunState::Cancelled);
                break;
            }

            // Woken early when any worker exits
            let _ = tokio::time::timeout(self.config.poll_interval, exited.notified()).await;
        }

        for exit in pool.shutdown().await {
            if let ExitStatus::Died(e) = exit.status {
                if !matches!(e, WorkerError::Cancelled { .. }) {
                    warn!(worker = exit.id, error = %e, "Worker died during shutdown");
                }
            }
        }

        if state == RunState::Draining {
            for index in queue.claimed() {
                if !results.is_pending(index) {
                    continue;
                }
                results.set(index, Outcome::Lost)?;

                let name = collection.get(index).map(|item| item.name.as_str()).unwrap_or("?");
                warn!(item = name, index = index, "Worker died before recording an outcome");
                if let Some(log) = &failure_log {
                    log.record(name, "lost: worker died before recording an outcome").await;
                }
            }
            state = self.transition(state, RunState::Done);
        }

        let respawned = pool.respawned();
        drop(pool);

        let results = Arc::try_unwrap(results).map_err(|still_held| WorkerError::StillRunning {
            count: Arc::strong_count(&still_held) - 1,
        })?;

        let summary = results.snapshot();
        let duration = start_time.elapsed();

        if let Some(p) = &progress {
            if state == RunState::Done {
                p.finish("Run completed");
            } else {
                p.finish("Run interrupted");
            }
        }

        info!(
            run_id = %self.run_id,
            state = %state,
            success = summary.success,
            bypassed = summary.bypassed,
            timed_out = summary.timed_out,
            failed = summary.failed,
            lost = summary.lost,
            pending = summary.pending,
            respawned = respawned,
            duration_secs = duration.as_secs(),
            "Run finished"
        );

        Ok(RunReport {
            run_id: self.run_id,
            state,
            outcomes: results.into_outcomes(),
            summary,
            started_at,
            duration,
            respawned,
            reconcile: reconcile_stats,
        })
    }

    fn transition(&self, from: RunState, to: RunState) -> RunState {
        debug!(run_id = %self.run_id, from = %from, to = %to, "Run state change");
        to
    }
}

/// Run `operation` over `collection` on a fresh multi-thread runtime
///
/// Blocking convenience wrapper around [`Coordinator::run`]. Use the
/// coordinator directly to install a signal handler on its shutdown flag.
pub fn run<P, O>(collection: &Collection<P>, operation: O, config: RunConfig) -> Result<RunReport<O::Output>>
where
    P: Send + Sync + 'static,
    O: Operation<P>,
{
    let runtime = build_runtime(config.concurrency)?;
    let coordinator = Coordinator::new(config)?;
    runtime.block_on(coordinator.run(collection, operation))
}

/// Create the tokio runtime used by blocking entry points
pub fn build_runtime(concurrency: usize) -> Result<tokio::runtime::Runtime> {
    // Workers mostly await; a few threads cover encoding and bookkeeping
    let threads = num_cpus::get().min(concurrency + 1).max(2);

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(threads)
        .thread_name("collection-runner")
        .enable_all()
        .build()
        .map_err(RunnerError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ItemError;
    use crate::item::Item;
    use crate::operation::operation_fn;
    use tempfile::tempdir;

    fn fast_config() -> RunConfig {
        RunConfig::builder()
            .concurrency(2)
            .per_item_timeout(Duration::from_millis(200))
            .poll_interval(Duration::from_millis(10))
            .build()
            .unwrap()
    }

    #[test]
    fn test_run_state_display() {
        assert_eq!(RunState::Draining.to_string(), "draining");
        assert_eq!(RunState::Cancelled.to_string(), "cancelled");
    }

    #[tokio::test]
    async fn test_run_completes_every_item() {
        let collection = Collection::from_names(["a", "bb", "ccc"]).unwrap();
        let op = operation_fn(|item: Arc<Item<()>>| async move { Ok::<_, ItemError>(item.name.len() as u64) });

        let report = Coordinator::new(fast_config())
            .unwrap()
            .run(&collection, op)
            .await
            .unwrap();

        assert!(report.completed());
        assert!(report.summary.is_complete());
        let values: Vec<_> = report.outcomes.iter().map(|o| o.value().copied()).collect();
        assert_eq!(values, vec![Some(1), Some(2), Some(3)]);
    }

    #[tokio::test]
    async fn test_empty_collection() {
        let collection = Collection::from_names(Vec::<String>::new()).unwrap();
        let op = operation_fn(|_item: Arc<Item<()>>| async move { Ok::<_, ItemError>(1u32) });

        let report = Coordinator::new(fast_config())
            .unwrap()
            .run(&collection, op)
            .await
            .unwrap();

        assert!(report.completed());
        assert!(report.outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_before_start() {
        let collection = Collection::from_names(["a"]).unwrap();
        let op = operation_fn(|_item: Arc<Item<()>>| async move { Ok::<_, ItemError>(1u32) });

        let coordinator = Coordinator::new(fast_config()).unwrap();
        coordinator.shutdown_flag().store(true, Ordering::SeqCst);

        let err = coordinator.run(&collection, op).await.unwrap_err();
        assert!(matches!(err, RunnerError::Interrupted));
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_status_line_logged_without_progress() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let collection = Collection::from_names(["a", "b"]).unwrap();
        let op = operation_fn(|_item: Arc<Item<()>>| async move { Ok::<_, ItemError>(1u32) });

        let report = Coordinator::new(fast_config())
            .unwrap()
            .run(&collection, op)
            .await
            .unwrap();
        assert!(report.completed());

        let output = String::from_utf8_lossy(&captured.0.lock()).to_string();
        assert!(output.contains("--- successful"), "no status line in: {}", output);
    }

    #[tokio::test]
    async fn test_invalid_backup_dir() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();

        let config = RunConfig {
            backup: Some(crate::config::BackupConfig {
                dir: file,
                kind: "opt".to_string(),
            }),
            ..fast_config()
        };

        let err = Coordinator::new(config).err().unwrap();
        assert!(matches!(err, RunnerError::Config(ConfigError::InvalidBackupDir { .. })));
    }

    #[test]
    fn test_blocking_run() {
        let collection = Collection::new(vec![("x", 2u64), ("y", 3u64)]).unwrap();
        let op = operation_fn(|item: Arc<Item<u64>>| async move { Ok::<_, ItemError>(item.payload * 10) });

        let report = run(&collection, op, fast_config()).unwrap();

        assert!(report.completed());
        assert_eq!(report.outcomes[1], Outcome::Success(30));
    }
}
