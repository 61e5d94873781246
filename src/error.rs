//! Error types for collection-runner
//!
//! This module defines the error hierarchy for the runner:
//! - Per-item errors (recorded into the result store, never propagated)
//! - Backup store errors (recovered locally during reconciliation)
//! - Configuration errors (fatal, raised before any work starts)
//! - Worker defects and result store misuse
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Errors should be actionable - include context about what to do
//! - Preserve error chains for debugging

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for a collection run
#[derive(Error, Debug)]
pub enum RunnerError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Result store misuse
    #[error("Result store error: {0}")]
    Store(#[from] StoreError),

    /// Worker/concurrency errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// Backup store errors
    #[error("Backup error: {0}")]
    Backup(#[from] BackupError),

    /// I/O errors (runtime creation, file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Interrupted by signal before any outcome was recorded
    #[error("Run interrupted while building the work queue")]
    Interrupted,
}

/// Error produced by an operation for a single item
///
/// These are domain conditions: they are captured into the result store
/// and never interrupt other items.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ItemError {
    /// Operation exceeded its deadline
    #[error("Timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// Operation reported a domain failure
    #[error("{message}")]
    Domain { message: String },

    /// External command exited unsuccessfully
    #[error("Command exited with code {code:?}: {stderr}")]
    Command { code: Option<i32>, stderr: String },

    /// I/O failure while preparing or harvesting an item
    #[error("I/O error: {0}")]
    Io(String),

    /// Result was computed but could not be persisted to the backup store
    #[error("Failed to persist artifact: {0}")]
    Persist(String),
}

impl ItemError {
    /// Create a domain error from any displayable message
    pub fn domain(message: impl Into<String>) -> Self {
        ItemError::Domain {
            message: message.into(),
        }
    }

    /// Check if this error is a deadline expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, ItemError::Timeout(_))
    }
}

impl From<std::io::Error> for ItemError {
    fn from(e: std::io::Error) -> Self {
        ItemError::Io(e.to_string())
    }
}

/// Backup store errors
#[derive(Error, Debug)]
pub enum BackupError {
    /// Filesystem error
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Envelope or value could not be encoded/decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Artifact file name does not follow the naming scheme
    #[error("Malformed artifact name '{0}'")]
    MalformedName(String),

    /// Artifact content belongs to a different item or kind
    #[error("Artifact '{path}' does not match item '{expected}': found '{found}'")]
    Mismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    /// Item name or kind cannot be used as an artifact key
    #[error("Invalid artifact key '{key}': {reason}")]
    InvalidName { key: String, reason: String },
}

impl BackupError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BackupError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Invalid worker count
    #[error("Invalid concurrency {count}: must be between 1 and {max}")]
    InvalidConcurrency { count: usize, max: usize },

    /// Per-item timeout must be positive
    #[error("Invalid per-item timeout: must be greater than zero")]
    InvalidTimeout,

    /// Poll interval must be positive
    #[error("Invalid poll interval: must be greater than zero")]
    InvalidPollInterval,

    /// Backup directory cannot be used
    #[error("Invalid backup directory '{path}': {reason}")]
    InvalidBackupDir { path: PathBuf, reason: String },

    /// Artifact kind tag cannot be used in file names
    #[error("Invalid artifact kind '{kind}': {reason}")]
    InvalidKind { kind: String, reason: String },

    /// Input directory cannot be used
    #[error("Invalid input directory '{path}': {reason}")]
    InvalidInputDir { path: PathBuf, reason: String },

    /// A worker pool is already running for this coordinator
    #[error("A worker pool is already active")]
    PoolAlreadyActive,

    /// Two items share a name
    #[error("Duplicate item name '{0}'")]
    DuplicateItem(String),

    /// Item name is empty
    #[error("Item at index {0} has an empty name")]
    EmptyItemName(usize),

    /// Invalid exclude pattern
    #[error("Invalid exclude pattern '{pattern}': {reason}")]
    InvalidExcludePattern { pattern: String, reason: String },
}

/// Result store misuse (a defect, never a runtime condition)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Slot already holds a terminal outcome
    #[error("Outcome for index {index} is already terminal ({existing})")]
    AlreadyTerminal { index: usize, existing: &'static str },

    /// Index beyond the collection length
    #[error("Index {index} out of range for {len} items")]
    OutOfRange { index: usize, len: usize },

    /// Attempted to write a non-terminal outcome
    #[error("Cannot record a pending outcome for index {0}")]
    NotTerminal(usize),
}

/// Worker task errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Worker panicked (defect escaping the operation)
    #[error("Worker {id} panicked: {message}")]
    Panicked { id: usize, message: String },

    /// Worker was cancelled before it finished
    #[error("Worker {id} was cancelled")]
    Cancelled { id: usize },

    /// Worker hit a result store defect and stopped
    #[error("Worker {id} stopped on a store defect: {source}")]
    Store {
        id: usize,
        #[source]
        source: StoreError,
    },

    /// Workers still hold the result store after shutdown
    #[error("{count} worker task(s) still hold the result store")]
    StillRunning { count: usize },
}

/// Result type alias for RunnerError
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Result type alias for BackupError
pub type BackupResult<T> = std::result::Result<T, BackupError>;

/// Result type alias for StoreError
pub type StoreResult<T> = std::result::Result<T, StoreError>;
