//! Run reporting: the failure log and the JSON result dump
//!
//! The failure log is a plain text file with one line per failed or
//! timed-out item, meant to be followed with `tail -f` during long runs.

use crate::coordinator::RunReport;
use crate::item::Collection;
use crate::outcome::Outcome;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

/// Append-only log of item failures
#[derive(Debug)]
pub struct FailureLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FailureLog {
    /// Create a log writing to `path` (the file is created on first use)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Log file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line for `item_name`
    ///
    /// Write errors are logged and otherwise ignored: the log is diagnostic.
    pub async fn record(&self, item_name: &str, message: &str) {
        let line = format!(
            "{} {}: {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            item_name,
            message.replace('\n', " ")
        );

        let _guard = self.lock.lock().await;
        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "Failed to write failure log");
        }
    }
}

/// One row of the result dump
#[derive(Debug, Serialize)]
pub struct ItemRecord<'a, T> {
    pub index: usize,
    pub name: &'a str,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
}

/// Serializable view of a finished run
#[derive(Debug, Serialize)]
pub struct ResultDump<'a, T> {
    pub run_id: String,
    pub state: String,
    pub started_at: String,
    pub duration_secs: f64,
    pub total: usize,
    pub success: usize,
    pub bypassed: usize,
    pub timed_out: usize,
    pub failed: usize,
    pub lost: usize,
    pub pending: usize,
    pub items: Vec<ItemRecord<'a, T>>,
}

impl<'a, T> ResultDump<'a, T> {
    /// Pair the report's outcomes with the collection's names
    pub fn new<P>(collection: &'a Collection<P>, report: &'a RunReport<T>) -> Self {
        let items = collection
            .iter()
            .zip(report.outcomes.iter())
            .map(|(item, outcome)| {
                let (error, artifact) = match outcome {
                    Outcome::Failed(e) => (Some(e.to_string()), None),
                    Outcome::TimedOut { after } => {
                        (Some(format!("timed out after {:.1}s", after.as_secs_f64())), None)
                    }
                    Outcome::Lost => (Some("worker died before recording an outcome".to_string()), None),
                    Outcome::Bypassed { artifact, .. } => (None, Some(artifact.path.display().to_string())),
                    Outcome::Pending | Outcome::Success(_) => (None, None),
                };

                ItemRecord {
                    index: item.index,
                    name: &item.name,
                    status: outcome.label(),
                    value: outcome.value(),
                    error,
                    artifact,
                }
            })
            .collect();

        let summary = &report.summary;
        Self {
            run_id: report.run_id.to_string(),
            state: report.state.to_string(),
            started_at: report.started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            duration_secs: report.duration.as_secs_f64(),
            total: summary.total,
            success: summary.success,
            bypassed: summary.bypassed,
            timed_out: summary.timed_out,
            failed: summary.failed,
            lost: summary.lost,
            pending: summary.pending,
            items,
        }
    }
}

impl<T: Serialize> ResultDump<'_, T> {
    /// Write the dump as pretty JSON
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}
