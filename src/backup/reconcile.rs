//! Startup bypass scan
//!
//! Runs once, synchronously, before any worker starts. Each item either gets
//! a `Bypassed` outcome from a reusable artifact or is pushed onto the queue.
//! Nothing found in the backup store can fail the run: unreadable, corrupt,
//! ambiguous or trivial artifacts all mean "process the item again".

use super::{decode_artifact, Artifact, ArtifactRef, BackupStore};
use crate::error::{Result, RunnerError};
use crate::item::Collection;
use crate::outcome::{Outcome, ResultStore};
use crate::queue::WorkQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the backup store says about one item
#[derive(Debug)]
pub enum Resolution<T> {
    /// No artifact of this kind exists
    Absent,

    /// A usable, non-trivial artifact was reconstructed
    Reusable { artifact: ArtifactRef, value: T },

    /// Artifacts exist but none can be reused
    Rerun { reason: String },
}

/// Counters from a reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Items resolved from the backup store
    pub bypassed: usize,

    /// Items pushed onto the queue
    pub queued: usize,

    /// Items that had artifacts which could not be reused
    pub rerun: usize,

    /// Shutdown stopped the scan after some items were bypassed
    pub interrupted: bool,
}

/// Pick the newest normally-terminated artifact
fn select_candidate(artifacts: &[ArtifactRef]) -> Option<&ArtifactRef> {
    artifacts
        .iter()
        .filter(|a| a.termination.is_normal())
        .max_by(|a, b| {
            a.completed_at
                .cmp(&b.completed_at)
                .then_with(|| a.path.cmp(&b.path))
        })
}

/// Look up and reconstruct the artifact for one item
pub fn resolve_artifact<T: Artifact>(
    store: &dyn BackupStore,
    item_name: &str,
    kind: &str,
) -> Resolution<T> {
    let artifacts = match store.list(item_name, kind) {
        Ok(artifacts) => artifacts,
        Err(e) => {
            warn!(item = item_name, error = %e, "Backup lookup failed, treating as absent");
            return Resolution::Absent;
        }
    };

    if artifacts.is_empty() {
        return Resolution::Absent;
    }

    let Some(candidate) = select_candidate(&artifacts) else {
        return Resolution::Rerun {
            reason: format!("none of {} artifacts terminated normally", artifacts.len()),
        };
    };

    if artifacts.len() > 1 {
        debug!(
            item = item_name,
            candidates = artifacts.len(),
            chosen = %candidate.path.display(),
            "Multiple artifacts, using newest normal termination"
        );
    }

    let value = match store
        .read(candidate)
        .and_then(|data| decode_artifact::<T>(candidate, &data))
    {
        Ok(value) => value,
        Err(e) => {
            return Resolution::Rerun {
                reason: format!("unreadable artifact: {}", e),
            }
        }
    };

    if value.is_trivial() {
        return Resolution::Rerun {
            reason: "artifact holds a trivial result".to_string(),
        };
    }

    Resolution::Reusable {
        artifact: candidate.clone(),
        value,
    }
}

/// Split the collection into bypassed outcomes and queued work
///
/// Without a backup store every item is queued. If `shutdown` is raised
/// during the scan, fails when no outcome has been recorded yet; otherwise
/// stops early and reports `interrupted`, leaving unscanned items pending.
pub fn reconcile<P, T: Artifact>(
    collection: &Collection<P>,
    backup: Option<(&dyn BackupStore, &str)>,
    results: &ResultStore<T>,
    queue: &WorkQueue<P>,
    shutdown: &AtomicBool,
) -> Result<ReconcileStats> {
    let mut stats = ReconcileStats::default();

    for item in collection {
        if shutdown.load(Ordering::Relaxed) {
            if stats.bypassed == 0 {
                return Err(RunnerError::Interrupted);
            }
            info!(bypassed = stats.bypassed, "Shutdown during backup scan");
            stats.interrupted = true;
            break;
        }

        let resolution = match backup {
            Some((store, kind)) => resolve_artifact::<T>(store, &item.name, kind),
            None => Resolution::Absent,
        };

        match resolution {
            Resolution::Reusable { artifact, value } => {
                debug!(item = %item.name, artifact = %artifact.path.display(), "Bypassing item");
                results.set(item.index, Outcome::Bypassed { artifact, value })?;
                stats.bypassed += 1;
                continue;
            }
            Resolution::Rerun { reason } => {
                warn!(item = %item.name, reason = %reason, "Backup not reusable, re-running item");
                stats.rerun += 1;
            }
            Resolution::Absent => {}
        }

        queue.push(Arc::clone(item));
        stats.queued += 1;
    }

    info!(
        bypassed = stats.bypassed,
        queued = stats.queued,
        rerun = stats.rerun,
        "Backup reconciliation complete"
    );

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{encode_artifact, DirBackupStore, RunId, Termination};
    use tempfile::tempdir;

    fn store_value(store: &DirBackupStore, name: &str, value: &Vec<u32>) -> ArtifactRef {
        let run_id = RunId::new();
        let data = encode_artifact(name, "opt", &run_id, value).unwrap();
        store.write(name, "opt", &run_id, &data).unwrap()
    }

    #[test]
    fn test_bypass_and_enqueue() {
        let dir = tempdir().unwrap();
        let store = DirBackupStore::open(dir.path()).unwrap();
        store_value(&store, "x", &vec![1, 2, 3]);

        let collection = Collection::from_names(["x", "y"]).unwrap();
        let results: ResultStore<Vec<u32>> = ResultStore::new(collection.len());
        let queue = WorkQueue::new();
        let shutdown = AtomicBool::new(false);

        let stats = reconcile(&collection, Some((&store, "opt")), &results, &queue, &shutdown).unwrap();

        assert_eq!(stats, ReconcileStats { bypassed: 1, queued: 1, rerun: 0, interrupted: false });
        assert!(matches!(results.get(0), Some(Outcome::Bypassed { ref value, .. }) if value == &vec![1, 2, 3]));
        // Nothing drains the queue, so `y` stays pending
        assert!(results.is_pending(1));
        assert_eq!(queue.pop().map(|q| q.index), Some(1));
    }

    #[test]
    fn test_trivial_artifact_rerun() {
        let dir = tempdir().unwrap();
        let store = DirBackupStore::open(dir.path()).unwrap();
        store_value(&store, "x", &vec![]);

        let resolution = resolve_artifact::<Vec<u32>>(&store, "x", "opt");
        assert!(matches!(resolution, Resolution::Rerun { .. }));
    }

    #[test]
    fn test_corrupt_artifact_rerun() {
        let dir = tempdir().unwrap();
        let store = DirBackupStore::open(dir.path()).unwrap();
        store.write("x", "opt", &RunId::new(), b"{ truncated").unwrap();

        let resolution = resolve_artifact::<Vec<u32>>(&store, "x", "opt");
        assert!(matches!(resolution, Resolution::Rerun { .. }));
    }

    #[test]
    fn test_abnormal_only_rerun() {
        let dir = tempdir().unwrap();
        let store = DirBackupStore::open(dir.path()).unwrap();
        let run_id = RunId::new();
        let data = encode_artifact("x", "opt", &run_id, &vec![1u32]).unwrap();
        store
            .write_with_termination("x", "opt", &run_id, &Termination::Abnormal("failed".into()), &data)
            .unwrap();

        let resolution = resolve_artifact::<Vec<u32>>(&store, "x", "opt");
        assert!(matches!(resolution, Resolution::Rerun { .. }));
    }

    #[test]
    fn test_newest_normal_wins() {
        let dir = tempdir().unwrap();
        let store = DirBackupStore::open(dir.path()).unwrap();

        store_value(&store, "x", &vec![1]);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let newest = store_value(&store, "x", &vec![2]);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let run_id = RunId::new();
        let data = encode_artifact("x", "opt", &run_id, &vec![3u32]).unwrap();
        store
            .write_with_termination("x", "opt", &run_id, &Termination::Abnormal("crashed".into()), &data)
            .unwrap();

        match resolve_artifact::<Vec<u32>>(&store, "x", "opt") {
            Resolution::Reusable { artifact, value } => {
                assert_eq!(artifact, newest);
                assert_eq!(value, vec![2]);
            }
            other => panic!("expected reusable artifact, got {:?}", other),
        }
    }

    #[test]
    fn test_no_backup_queues_everything() {
        let collection = Collection::from_names(["a", "b", "c"]).unwrap();
        let results: ResultStore<u32> = ResultStore::new(collection.len());
        let queue = WorkQueue::new();
        let shutdown = AtomicBool::new(false);

        let stats = reconcile(&collection, None, &results, &queue, &shutdown).unwrap();
        assert_eq!(stats.queued, 3);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_interrupted_during_build() {
        let collection = Collection::from_names(["a"]).unwrap();
        let results: ResultStore<u32> = ResultStore::new(collection.len());
        let queue = WorkQueue::new();
        let shutdown = AtomicBool::new(true);

        let err = reconcile(&collection, None, &results, &queue, &shutdown).unwrap_err();
        assert!(matches!(err, RunnerError::Interrupted));
        assert!(queue.is_empty());
    }

    /// Raises the shutdown flag once `trigger` has been looked up
    struct ShutdownAfter<'a> {
        inner: DirBackupStore,
        trigger: &'static str,
        shutdown: &'a AtomicBool,
    }

    impl BackupStore for ShutdownAfter<'_> {
        fn list(&self, item_name: &str, kind: &str) -> crate::error::BackupResult<Vec<ArtifactRef>> {
            let found = self.inner.list(item_name, kind);
            if item_name == self.trigger {
                self.shutdown.store(true, Ordering::SeqCst);
            }
            found
        }

        fn read(&self, artifact: &ArtifactRef) -> crate::error::BackupResult<Vec<u8>> {
            self.inner.read(artifact)
        }

        fn write(
            &self,
            item_name: &str,
            kind: &str,
            run_id: &RunId,
            data: &[u8],
        ) -> crate::error::BackupResult<ArtifactRef> {
            self.inner.write(item_name, kind, run_id, data)
        }
    }

    #[test]
    fn test_interrupted_after_bypass_keeps_outcomes() {
        let dir = tempdir().unwrap();
        let inner = DirBackupStore::open(dir.path()).unwrap();
        store_value(&inner, "x", &vec![7]);

        let shutdown = AtomicBool::new(false);
        let store = ShutdownAfter { inner, trigger: "x", shutdown: &shutdown };
        let collection = Collection::from_names(["x", "y", "z"]).unwrap();
        let results: ResultStore<Vec<u32>> = ResultStore::new(collection.len());
        let queue = WorkQueue::new();

        let stats = reconcile(&collection, Some((&store, "opt")), &results, &queue, &shutdown).unwrap();

        assert!(stats.interrupted);
        assert_eq!(stats.bypassed, 1);
        assert!(matches!(results.get(0), Some(Outcome::Bypassed { .. })));
        assert!(results.is_pending(1));
        assert!(results.is_pending(2));
        assert!(queue.is_empty());
    }
}
