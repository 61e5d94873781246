//! Persistence of per-item artifacts across runs
//!
//! Every successful result is written to a backup store before it is
//! recorded in the result store. At the start of a run the store is scanned
//! once per item and reusable artifacts let the item bypass processing.
//!
//! # Artifact naming
//!
//! ```text
//!   <item>~<kind>~<run-id>~<unix-ms>~<termination>.json
//!      │      │       │        │           │
//!      │      │       │        │           └── "normal" or any other marker
//!      │      │       │        └── completion time (milliseconds)
//!      │      │       └── run that produced the artifact
//!      │      └── calculation tag (lets several kinds share one directory)
//!      └── unique item name
//! ```

mod reconcile;
mod store;

pub use reconcile::{reconcile, resolve_artifact, ReconcileStats, Resolution};
pub use store::DirBackupStore;

use crate::error::{BackupError, BackupResult};
use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

/// Separator between artifact name fields
pub const FIELD_SEPARATOR: char = '~';

/// Extension of complete artifact files
pub const ARTIFACT_EXTENSION: &str = "json";

/// Termination marker for artifacts written by this crate
pub const NORMAL_TERMINATION: &str = "normal";

/// Identifier of a single run, embedded in every artifact it writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Generate a fresh run identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_hyphenated())
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// How the process that produced an artifact ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Artifact was written completely
    Normal,

    /// Any other marker (crashed writer, external tool flagged a problem)
    Abnormal(String),
}

impl Termination {
    /// Check for normal termination
    pub fn is_normal(&self) -> bool {
        matches!(self, Termination::Normal)
    }

    fn as_str(&self) -> &str {
        match self {
            Termination::Normal => NORMAL_TERMINATION,
            Termination::Abnormal(marker) => marker,
        }
    }

    fn parse(marker: &str) -> Self {
        if marker == NORMAL_TERMINATION {
            Termination::Normal
        } else {
            Termination::Abnormal(marker.to_string())
        }
    }
}

/// Reference to one persisted artifact, recoverable from its file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub item_name: String,
    pub kind: String,
    pub run_id: RunId,
    pub completed_at: DateTime<Utc>,
    pub termination: Termination,
    pub path: PathBuf,
}

impl ArtifactRef {
    /// File name for an artifact with these fields
    pub fn file_name(
        item_name: &str,
        kind: &str,
        run_id: &RunId,
        completed_at: &DateTime<Utc>,
        termination: &Termination,
    ) -> String {
        format!(
            "{item}{sep}{kind}{sep}{run}{sep}{ms}{sep}{term}.{ext}",
            item = item_name,
            kind = kind,
            run = run_id,
            ms = completed_at.timestamp_millis(),
            term = termination.as_str(),
            sep = FIELD_SEPARATOR,
            ext = ARTIFACT_EXTENSION,
        )
    }

    /// Parse an artifact path back into its fields
    pub fn parse(path: &Path) -> BackupResult<Self> {
        let malformed = || BackupError::MalformedName(path.display().to_string());

        let file_name = path.file_name().and_then(|n| n.to_str()).ok_or_else(malformed)?;
        let stem = file_name
            .strip_suffix(ARTIFACT_EXTENSION)
            .and_then(|s| s.strip_suffix('.'))
            .ok_or_else(malformed)?;

        // Fields are read from the right; the item name is whatever remains.
        let mut fields = stem.rsplitn(5, FIELD_SEPARATOR);
        let termination = fields.next().ok_or_else(malformed)?;
        let millis = fields.next().ok_or_else(malformed)?;
        let run_id = fields.next().ok_or_else(malformed)?;
        let kind = fields.next().ok_or_else(malformed)?;
        let item_name = fields.next().ok_or_else(malformed)?;

        if item_name.is_empty() || kind.is_empty() || termination.is_empty() {
            return Err(malformed());
        }

        let run_id = RunId::from_str(run_id).map_err(|_| malformed())?;
        let millis: i64 = millis.parse().map_err(|_| malformed())?;
        let completed_at = Utc.timestamp_millis_opt(millis).single().ok_or_else(malformed)?;

        Ok(Self {
            item_name: item_name.to_string(),
            kind: kind.to_string(),
            run_id,
            completed_at,
            termination: Termination::parse(termination),
            path: path.to_path_buf(),
        })
    }
}

/// Keyed storage of artifacts that outlives a run
pub trait BackupStore: Send + Sync {
    /// All artifacts of `kind` stored for `item_name`
    fn list(&self, item_name: &str, kind: &str) -> BackupResult<Vec<ArtifactRef>>;

    /// Raw content of an artifact
    fn read(&self, artifact: &ArtifactRef) -> BackupResult<Vec<u8>>;

    /// Durably store a completed artifact
    fn write(
        &self,
        item_name: &str,
        kind: &str,
        run_id: &RunId,
        data: &[u8],
    ) -> BackupResult<ArtifactRef>;
}

/// A result value that can be persisted and reused by a later run
pub trait Artifact: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// An empty shell that is not worth reusing
    fn is_trivial(&self) -> bool {
        false
    }
}

impl Artifact for String {
    fn is_trivial(&self) -> bool {
        self.trim().is_empty()
    }
}

impl<T: Artifact> Artifact for Vec<T> {
    fn is_trivial(&self) -> bool {
        self.is_empty()
    }
}

impl<T: Artifact> Artifact for Option<T> {
    fn is_trivial(&self) -> bool {
        self.as_ref().map_or(true, Artifact::is_trivial)
    }
}

impl Artifact for serde_json::Value {
    fn is_trivial(&self) -> bool {
        match self {
            serde_json::Value::Null => true,
            serde_json::Value::Array(values) => values.is_empty(),
            serde_json::Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }
}

impl Artifact for u32 {}
impl Artifact for u64 {}
impl Artifact for usize {}
impl Artifact for i32 {}
impl Artifact for i64 {}
impl Artifact for f64 {}
impl Artifact for bool {}

/// On-disk wrapper around an artifact value
#[derive(Debug, Serialize, Deserialize)]
struct Envelope<V> {
    item: String,
    kind: String,
    run_id: RunId,
    value: V,
}

/// Serialize a value for storage under `item_name`/`kind`
pub fn encode_artifact<T: Artifact>(
    item_name: &str,
    kind: &str,
    run_id: &RunId,
    value: &T,
) -> BackupResult<Vec<u8>> {
    let envelope = Envelope {
        item: item_name.to_string(),
        kind: kind.to_string(),
        run_id: *run_id,
        value,
    };
    Ok(serde_json::to_vec_pretty(&envelope)?)
}

/// Decode artifact content, checking it belongs to the referenced item
pub fn decode_artifact<T: Artifact>(artifact: &ArtifactRef, data: &[u8]) -> BackupResult<T> {
    let envelope: Envelope<T> = serde_json::from_slice(data)?;

    if envelope.item != artifact.item_name || envelope.kind != artifact.kind {
        return Err(BackupError::Mismatch {
            path: artifact.path.clone(),
            expected: format!("{}/{}", artifact.item_name, artifact.kind),
            found: format!("{}/{}", envelope.item, envelope.kind),
        });
    }

    Ok(envelope.value)
}

fn invalid_name(key: &str, reason: &str) -> BackupError {
    BackupError::InvalidName {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

/// Check that an item name can start an artifact file name
///
/// The item name is the leftmost field and is recovered as whatever
/// remains after the other fields, so it may contain the separator.
pub(crate) fn validate_item_name(name: &str) -> BackupResult<()> {
    if name.is_empty() {
        return Err(invalid_name(name, "empty"));
    }
    if name.starts_with('.') {
        return Err(invalid_name(name, "leading '.' is reserved for temporary files"));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(invalid_name(name, "contains a path separator"));
    }
    Ok(())
}

/// Check that a kind or termination marker can be used as a name field
pub(crate) fn validate_key(key: &str) -> BackupResult<()> {
    validate_item_name(key)?;
    if key.contains(FIELD_SEPARATOR) {
        return Err(invalid_name(key, "contains the field separator '~'"));
    }
    Ok(())
}
