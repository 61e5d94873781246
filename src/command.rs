//! External command operation
//!
//! Runs a shell command once per item inside a private scratch directory.
//! The item payload is written as the input file before the command starts
//! and the listed output files are collected after it exits. The child is
//! killed if the invocation is dropped, which is how per-item timeouts stop
//! long-running programs.

use crate::backup::Artifact;
use crate::error::{ConfigError, ItemError, Result, RunnerError};
use crate::item::{Collection, Item};
use crate::operation::Operation;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tracing::{debug, trace};

/// Prefix of every scratch directory
const SCRATCH_PREFIX: &str = "collection-runner";

/// Lines of stderr kept in a command failure
const STDERR_TAIL_LINES: usize = 20;

/// What a finished command produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,

    /// Harvested output files by name
    pub files: BTreeMap<String, String>,
}

impl Artifact for CommandOutput {
    fn is_trivial(&self) -> bool {
        self.stdout.trim().is_empty() && self.files.is_empty()
    }
}

/// Shell command applied to every item
#[derive(Debug, Clone)]
pub struct CommandOperation {
    command: String,
    scratch_dir: PathBuf,
    input_file: String,
    output_files: Vec<String>,
}

impl CommandOperation {
    /// Run `command` (a `sh -c` template) for every item
    ///
    /// `{name}` expands to the quoted item name and `{input}` to the quoted
    /// input file name.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            scratch_dir: std::env::temp_dir(),
            input_file: "input".to_string(),
            output_files: Vec::new(),
        }
    }

    /// Parent directory for per-item scratch directories
    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    /// Input file name template (`{name}` is substituted)
    pub fn input_file(mut self, name: impl Into<String>) -> Self {
        self.input_file = name.into();
        self
    }

    /// Collect `name` from the scratch directory after the command exits
    pub fn output_file(mut self, name: impl Into<String>) -> Self {
        self.output_files.push(name.into());
        self
    }

    fn render(&self, item_name: &str, input_file: &str) -> String {
        self.command
            .replace("{name}", &shell_quote(item_name))
            .replace("{input}", &shell_quote(input_file))
    }
}

#[async_trait]
impl Operation<String> for CommandOperation {
    type Output = CommandOutput;

    async fn call(&self, item: Arc<Item<String>>) -> std::result::Result<CommandOutput, ItemError> {
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{}.{}.", SCRATCH_PREFIX, item.name))
            .tempdir_in(&self.scratch_dir)?;

        let input_file = self.input_file.replace("{name}", &item.name);
        tokio::fs::write(scratch.path().join(&input_file), item.payload.as_bytes()).await?;

        let command = self.render(&item.name, &input_file);
        trace!(item = %item.name, dir = %scratch.path().display(), command = %command, "Spawning command");

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(scratch.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ItemError::Command {
                code: output.status.code(),
                stderr: tail(&String::from_utf8_lossy(&output.stderr), STDERR_TAIL_LINES),
            });
        }

        let files = harvest(scratch.path(), &self.output_files).await?;
        debug!(item = %item.name, files = files.len(), "Command finished");

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or_default(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            files,
        })
    }
}

/// Read the listed files that exist; missing ones are skipped
async fn harvest(dir: &Path, names: &[String]) -> std::io::Result<BTreeMap<String, String>> {
    let mut files = BTreeMap::new();

    for name in names {
        let path = dir.join(name);
        if !path.is_file() {
            continue;
        }
        let data = tokio::fs::read(&path).await?;
        files.insert(name.clone(), String::from_utf8_lossy(&data).into_owned());
    }

    Ok(files)
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

/// Quote `s` for a POSIX shell
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Build a collection from the regular files of `dir`
///
/// Item name is the file stem, payload is the file content. Hidden files and
/// names matching any `exclude` pattern are skipped. Items are sorted by name.
pub fn collection_from_dir(dir: &Path, exclude: &[Regex]) -> Result<Collection<String>> {
    let mut entries = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let path = entry.path();
        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        if stem.starts_with('.') || stem.is_empty() {
            continue;
        }
        if exclude.iter().any(|re| re.is_match(&stem)) {
            debug!(item = %stem, "Excluded");
            continue;
        }

        let payload = std::fs::read_to_string(&path)?;
        entries.push((stem, payload));
    }

    entries.sort_by(|a, b| a.0.cmp(&b.0));

    if entries.is_empty() {
        return Err(RunnerError::Config(ConfigError::InvalidInputDir {
            path: dir.to_path_buf(),
            reason: "no input files".to_string(),
        }));
    }

    Ok(Collection::new(entries)?)
}
