//! collection-runner - Resumable Concurrent Collection Processing
//!
//! Drives a fixed collection of named items through a long-running
//! asynchronous operation (typically an external program), with bounded
//! concurrency and a per-item timeout. Successful results are persisted as
//! they complete, so a later run over the same backup directory skips items
//! a previous, possibly crashed, run already finished.
//!
//! # Features
//!
//! - **Bounded Concurrency**: A fixed number of tokio worker tasks pull
//!   items from a shared queue; one item is in flight per worker.
//!
//! - **Per-item Timeouts**: Every invocation runs under a deadline. Timed
//!   out and failed items are recorded and never retried within a run.
//!
//! - **Resumable Runs**: Results are written to a backup directory before
//!   they are reported. At startup, items with a usable artifact are
//!   bypassed instead of being processed again.
//!
//! - **Crash Tolerance**: Workers that die are replaced while work remains.
//!   Items they were holding are reported as lost rather than left pending.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Collection                               │
//! │                  (named items, fixed order)                      │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!                               │ bypass scan
//!                               ▼
//! ┌──────────────────┐   ┌──────────────────────────┐
//! │   Backup Store   │──▶│       Coordinator        │
//! │ item~kind~run~.. │   │  - poll / ETA / respawn  │
//! └────────▲─────────┘   └────────────┬─────────────┘
//!          │                          │
//!          │                          ▼
//!          │            ┌──────────────────────────┐
//!          │            │       Work Queue         │
//!          │            │ (crossbeam unbounded)    │
//!          │            └────────────┬─────────────┘
//!          │                         │
//!          │    ┌─────────┐  ┌─────────┐         ┌─────────┐
//!          └────│Worker 1 │  │Worker 2 │  ...    │Worker N │
//!               └────┬────┘  └────┬────┘         └────┬────┘
//!                    │            │                   │
//!                    └────────────┼───────────────────┘
//!                                 ▼
//!                    ┌──────────────────────────┐
//!                    │      Result Store        │
//!                    │ (one outcome per index)  │
//!                    └──────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Optimise every geometry in confs/, 16 at a time, resumable
//! collection-runner confs/ -c 'xtb {input} --opt' --input-file '{name}.xyz' \
//!     --output-file xtbopt.xyz -j 16 --backup-dir bkp/ --kind xtb-opt
//! ```

pub mod backup;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod item;
pub mod operation;
pub mod outcome;
pub mod pool;
pub mod progress;
pub mod queue;
pub mod report;
pub mod worker;

pub use backup::{Artifact, ArtifactRef, BackupStore, DirBackupStore, RunId, Termination};
pub use command::{collection_from_dir, CommandOperation, CommandOutput};
pub use config::{BackupConfig, CliArgs, RunConfig, RunConfigBuilder};
pub use coordinator::{run, Coordinator, RunReport, RunState};
pub use error::{ItemError, Result, RunnerError};
pub use item::{Collection, Item};
pub use operation::{operation_fn, Operation};
pub use outcome::{Outcome, StatusSnapshot};
