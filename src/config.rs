//! Configuration types for collection-runner
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - The validated run configuration used by the coordinator
//! - A builder for library callers who do not go through the CLI

use crate::backup::validate_key;
use crate::error::ConfigError;
use clap::Parser;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maximum reasonable worker count
const MAX_CONCURRENCY: usize = 1024;

/// Default number of concurrent workers
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default per-item deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Default interval between coordinator polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default artifact kind tag
pub const DEFAULT_KIND: &str = "result";

/// Run a shell command over every file of a directory, resumably
#[derive(Parser, Debug, Clone)]
#[command(
    name = "collection-runner",
    version,
    about = "Run a command over a collection of inputs with bounded concurrency and resumable backups",
    long_about = "Treats every regular file of INPUT_DIR as one item and runs COMMAND for it in a\n\
                  private scratch directory, with the item written as the input file.\n\n\
                  Successful results are stored in the backup directory as they complete;\n\
                  a later run over the same backup directory skips those items.",
    after_help = "EXAMPLES:\n    \
        collection-runner confs/ --command 'xtb input --opt' --output-file xtbopt.xyz\n    \
        collection-runner confs/ -c 'crest {input}' -j 16 --timeout 3600 --backup-dir bkp/\n    \
        collection-runner confs/ -c './score.sh' --exclude '^test_' -o scores.json"
)]
pub struct CliArgs {
    /// Directory holding one input file per item
    #[arg(value_name = "INPUT_DIR")]
    pub input_dir: PathBuf,

    /// Shell command run for each item ({name} and {input} are substituted)
    #[arg(short = 'c', long, value_name = "CMD")]
    pub command: String,

    /// Number of concurrent workers
    #[arg(short = 'j', long, default_value_t = DEFAULT_CONCURRENCY, value_name = "NUM")]
    pub jobs: usize,

    /// Per-item timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_secs_f64(), value_name = "SECS")]
    pub timeout: f64,

    /// Seconds between status updates
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_secs_f64(), value_name = "SECS")]
    pub update: f64,

    /// Directory for result backups (enables resuming)
    #[arg(long, value_name = "DIR")]
    pub backup_dir: Option<PathBuf>,

    /// Artifact kind tag, distinguishing different computations on the same items
    #[arg(long, default_value = DEFAULT_KIND, value_name = "TAG")]
    pub kind: String,

    /// Parent directory for per-item scratch directories
    #[arg(long, value_name = "DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Name of the input file written into the scratch directory
    #[arg(long, default_value = "input", value_name = "NAME")]
    pub input_file: String,

    /// Output file to collect from the scratch directory (can be repeated)
    #[arg(long = "output-file", value_name = "NAME", action = clap::ArgAction::Append)]
    pub output_files: Vec<String>,

    /// Skip items whose name matches pattern (can be repeated)
    #[arg(long = "exclude", value_name = "PATTERN", action = clap::ArgAction::Append)]
    pub exclude_patterns: Vec<String>,

    /// Where to write the JSON result dump
    #[arg(short, long, default_value = "results.json", value_name = "FILE")]
    pub output: PathBuf,

    /// Append failed and timed-out items to this file
    #[arg(long = "log", value_name = "FILE")]
    pub failure_log: Option<PathBuf>,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// Backup store location and artifact kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConfig {
    /// Directory holding artifacts
    pub dir: PathBuf,

    /// Kind tag written into every artifact name
    pub kind: String,
}

/// Validated runtime configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Number of concurrent workers
    pub concurrency: usize,

    /// Deadline for a single operation invocation
    pub per_item_timeout: Duration,

    /// Coordinator poll period (also the status line period)
    pub poll_interval: Duration,

    /// Backup store, if results should be persisted and reused
    pub backup: Option<BackupConfig>,

    /// Show progress spinner
    pub show_progress: bool,

    /// Failure log path
    pub failure_log: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            per_item_timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            backup: None,
            show_progress: false,
            failure_log: None,
        }
    }
}

impl RunConfig {
    /// Start building a configuration from the defaults
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder {
            config: RunConfig::default(),
        }
    }

    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: &CliArgs) -> Result<Self, ConfigError> {
        let per_item_timeout =
            Duration::try_from_secs_f64(args.timeout).map_err(|_| ConfigError::InvalidTimeout)?;
        let poll_interval =
            Duration::try_from_secs_f64(args.update).map_err(|_| ConfigError::InvalidPollInterval)?;

        let config = Self {
            concurrency: args.jobs,
            per_item_timeout,
            poll_interval,
            backup: args.backup_dir.clone().map(|dir| BackupConfig {
                dir,
                kind: args.kind.clone(),
            }),
            show_progress: !args.quiet,
            failure_log: args.failure_log.clone(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check every field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::InvalidConcurrency {
                count: self.concurrency,
                max: MAX_CONCURRENCY,
            });
        }

        if self.per_item_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout);
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidPollInterval);
        }

        if let Some(backup) = &self.backup {
            validate_key(&backup.kind).map_err(|e| ConfigError::InvalidKind {
                kind: backup.kind.clone(),
                reason: e.to_string(),
            })?;

            if backup.dir.exists() && !backup.dir.is_dir() {
                return Err(ConfigError::InvalidBackupDir {
                    path: backup.dir.clone(),
                    reason: "exists and is not a directory".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Builder for [`RunConfig`]
#[derive(Debug, Clone)]
pub struct RunConfigBuilder {
    config: RunConfig,
}

impl RunConfigBuilder {
    pub fn concurrency(mut self, count: usize) -> Self {
        self.config.concurrency = count;
        self
    }

    pub fn per_item_timeout(mut self, timeout: Duration) -> Self {
        self.config.per_item_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Persist results under `dir`, tagged with `kind`
    pub fn backup(mut self, dir: impl Into<PathBuf>, kind: impl Into<String>) -> Self {
        self.config.backup = Some(BackupConfig {
            dir: dir.into(),
            kind: kind.into(),
        });
        self
    }

    pub fn show_progress(mut self, show: bool) -> Self {
        self.config.show_progress = show;
        self
    }

    pub fn failure_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.failure_log = Some(path.into());
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<RunConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Everything the binary needs beyond the run configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub run: RunConfig,

    /// Directory holding the items
    pub input_dir: PathBuf,

    /// Shell command template
    pub command: String,

    /// Parent of per-item scratch directories
    pub scratch_dir: PathBuf,

    /// Input file name template
    pub input_file: String,

    /// Files harvested after the command exits
    pub output_files: Vec<String>,

    /// Compiled exclude patterns
    pub exclude_patterns: Vec<Regex>,

    /// JSON result dump path
    pub results_path: PathBuf,
}

impl AppConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        let run = RunConfig::from_args(&args)?;

        check_dir(&args.input_dir)?;

        let scratch_dir = args.scratch_dir.clone().unwrap_or_else(std::env::temp_dir);
        if !scratch_dir.is_dir() {
            return Err(ConfigError::InvalidInputDir {
                path: scratch_dir,
                reason: "scratch directory does not exist".to_string(),
            });
        }

        // Compile exclude patterns
        let exclude_patterns = args
            .exclude_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidExcludePattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            run,
            input_dir: args.input_dir,
            command: args.command,
            scratch_dir,
            input_file: args.input_file,
            output_files: args.output_files,
            exclude_patterns,
            results_path: args.output,
        })
    }
}

fn check_dir(path: &Path) -> Result<(), ConfigError> {
    if !path.is_dir() {
        return Err(ConfigError::InvalidInputDir {
            path: path.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn args(input_dir: &Path) -> CliArgs {
        CliArgs::parse_from([
            "collection-runner",
            input_dir.to_str().unwrap(),
            "--command",
            "cat input",
        ])
    }

    #[test]
    fn test_defaults() {
        let config = RunConfig::builder().build().unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.per_item_timeout, Duration::from_secs(600));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert!(config.backup.is_none());
    }

    #[test]
    fn test_invalid_concurrency() {
        let err = RunConfig::builder().concurrency(0).build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConcurrency { count: 0, .. }));

        let err = RunConfig::builder().concurrency(MAX_CONCURRENCY + 1).build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConcurrency { .. }));
    }

    #[test]
    fn test_invalid_durations() {
        let err = RunConfig::builder()
            .per_item_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidTimeout);

        let err = RunConfig::builder()
            .poll_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidPollInterval);
    }

    #[test]
    fn test_invalid_kind() {
        let dir = tempdir().unwrap();
        let err = RunConfig::builder().backup(dir.path(), "a~b").build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidKind { .. }));
    }

    #[test]
    fn test_backup_dir_is_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        let err = RunConfig::builder().backup(&file, "opt").build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBackupDir { .. }));
    }

    #[test]
    fn test_from_args() {
        let dir = tempdir().unwrap();
        let mut cli = args(dir.path());
        cli.jobs = 8;
        cli.timeout = 2.5;
        cli.backup_dir = Some(dir.path().join("bkp"));
        cli.quiet = true;

        let config = AppConfig::from_args(cli).unwrap();
        assert_eq!(config.run.concurrency, 8);
        assert_eq!(config.run.per_item_timeout, Duration::from_millis(2500));
        assert_eq!(config.run.backup.as_ref().map(|b| b.kind.as_str()), Some("result"));
        assert!(!config.run.show_progress);
        assert_eq!(config.command, "cat input");
    }

    #[test]
    fn test_negative_timeout() {
        let dir = tempdir().unwrap();
        let mut cli = args(dir.path());
        cli.timeout = -1.0;

        assert!(matches!(
            AppConfig::from_args(cli),
            Err(ConfigError::InvalidTimeout)
        ));
    }

    #[test]
    fn test_missing_input_dir() {
        let dir = tempdir().unwrap();
        let cli = args(&dir.path().join("nope"));

        assert!(matches!(
            AppConfig::from_args(cli),
            Err(ConfigError::InvalidInputDir { .. })
        ));
    }

    #[test]
    fn test_exclude_pattern() {
        let dir = tempdir().unwrap();
        let mut cli = args(dir.path());
        cli.exclude_patterns = vec![r"^test_".to_string()];

        let config = AppConfig::from_args(cli).unwrap();
        assert_eq!(config.exclude_patterns.len(), 1);
        assert!(config.exclude_patterns[0].is_match("test_conf1"));
        assert!(!config.exclude_patterns[0].is_match("conf1"));
    }

    #[test]
    fn test_invalid_exclude_pattern() {
        let dir = tempdir().unwrap();
        let mut cli = args(dir.path());
        cli.exclude_patterns = vec!["(".to_string()];

        assert!(matches!(
            AppConfig::from_args(cli),
            Err(ConfigError::InvalidExcludePattern { .. })
        ));
    }
}
