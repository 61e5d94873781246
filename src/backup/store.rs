//! Directory-backed artifact store
//!
//! Artifacts are written to a hidden temporary file, synced and then renamed
//! into place, so a crash mid-write never leaves a file that `list` returns.

use super::{validate_item_name, validate_key, ArtifactRef, BackupStore, RunId, Termination, ARTIFACT_EXTENSION};
use crate::error::{BackupError, BackupResult};
use chrono::{SubsecRound, Utc};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Backup store keeping one file per artifact in a directory
#[derive(Debug, Clone)]
pub struct DirBackupStore {
    dir: PathBuf,
}

impl DirBackupStore {
    /// Open (creating if needed) a backup directory
    pub fn open(dir: impl Into<PathBuf>) -> BackupResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| BackupError::io(&dir, e))?;
        Ok(Self { dir })
    }

    /// Backup directory path
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Total size of complete artifacts in bytes
    pub fn total_size(&self) -> BackupResult<u64> {
        let mut total = 0;
        for path in self.artifact_paths()? {
            if let Ok(meta) = fs::metadata(&path) {
                total += meta.len();
            }
        }
        Ok(total)
    }

    /// Write an artifact with an explicit termination marker
    pub fn write_with_termination(
        &self,
        item_name: &str,
        kind: &str,
        run_id: &RunId,
        termination: &Termination,
        data: &[u8],
    ) -> BackupResult<ArtifactRef> {
        validate_item_name(item_name)?;
        validate_key(kind)?;
        validate_key(termination.as_str())?;

        // The file name keeps milliseconds, so the returned ref must too
        let completed_at = Utc::now().trunc_subsecs(3);
        let file_name = ArtifactRef::file_name(item_name, kind, run_id, &completed_at, termination);
        let final_path = self.dir.join(&file_name);
        let tmp_path = self.dir.join(format!(".{}.tmp", file_name));

        {
            let mut file = File::create(&tmp_path).map_err(|e| BackupError::io(&tmp_path, e))?;
            file.write_all(data).map_err(|e| BackupError::io(&tmp_path, e))?;
            file.sync_all().map_err(|e| BackupError::io(&tmp_path, e))?;
        }

        if let Err(e) = fs::rename(&tmp_path, &final_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(BackupError::io(&final_path, e));
        }

        trace!(item = item_name, kind = kind, path = %final_path.display(), "Artifact written");

        Ok(ArtifactRef {
            item_name: item_name.to_string(),
            kind: kind.to_string(),
            run_id: *run_id,
            completed_at,
            termination: termination.clone(),
            path: final_path,
        })
    }

    /// Paths of every complete artifact file in the directory
    fn artifact_paths(&self) -> BackupResult<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| BackupError::io(&self.dir, e))?;
        let mut paths = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|e| BackupError::io(&self.dir, e))?;
            let path = entry.path();

            let is_artifact = path.extension().is_some_and(|ext| ext == ARTIFACT_EXTENSION)
                && !entry.file_name().to_string_lossy().starts_with('.');

            if is_artifact && entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                paths.push(path);
            }
        }

        Ok(paths)
    }
}

impl BackupStore for DirBackupStore {
    fn list(&self, item_name: &str, kind: &str) -> BackupResult<Vec<ArtifactRef>> {
        let mut found = Vec::new();

        for path in self.artifact_paths()? {
            match ArtifactRef::parse(&path) {
                Ok(artifact) if artifact.item_name == item_name && artifact.kind == kind => {
                    found.push(artifact);
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Ignoring unrecognized backup file");
                }
            }
        }

        Ok(found)
    }

    fn read(&self, artifact: &ArtifactRef) -> BackupResult<Vec<u8>> {
        fs::read(&artifact.path).map_err(|e| BackupError::io(&artifact.path, e))
    }

    fn write(
        &self,
        item_name: &str,
        kind: &str,
        run_id: &RunId,
        data: &[u8],
    ) -> BackupResult<ArtifactRef> {
        self.write_with_termination(item_name, kind, run_id, &Termination::Normal, data)
    }
}
