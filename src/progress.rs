//! Progress reporting for collection runs
//!
//! Provides the periodic status line (rates and ETA) and a real-time spinner
//! using indicatif progress bars.

use crate::outcome::StatusSnapshot;
use chrono::{DateTime, Local};
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress information for one coordinator tick
#[derive(Debug, Clone)]
pub struct RunProgress {
    /// Outcome counts
    pub snapshot: StatusSnapshot,

    /// Wall time since the run started
    pub elapsed: Duration,

    /// When the run started
    pub started_at: DateTime<Local>,

    /// Items still queued
    pub queued: usize,

    /// Workers currently alive
    pub live_workers: usize,
}

impl RunProgress {
    /// Estimated completion time
    ///
    /// Linear extrapolation from the fraction of attempted items that reached
    /// a terminal outcome. `None` until at least one item has finished.
    pub fn eta(&self) -> Option<DateTime<Local>> {
        let done = self.snapshot.success_rate() + self.snapshot.failure_rate();
        if done <= 0.0 {
            return None;
        }

        let total = Duration::try_from_secs_f64(self.elapsed.as_secs_f64() / done).ok()?;
        let total = chrono::Duration::from_std(total).ok()?;
        self.started_at.checked_add_signed(total)
    }

    /// One-line status: elapsed, success and failure rates, ETA
    pub fn status_line(&self) -> String {
        let s = &self.snapshot;
        let eta = self
            .eta()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "unknown".to_string());

        format!(
            "{} --- successful {:5.1}% ({}) --- failed {:5.1}% ({}) --- ETA {}",
            format_elapsed(self.elapsed),
            s.success_rate() * 100.0,
            format_number(s.success as u64),
            s.failure_rate() * 100.0,
            format_number(s.failures() as u64),
            eta,
        )
    }
}

/// Progress reporter that displays run status
pub struct ProgressReporter {
    /// Progress bar
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        bar.set_style(style);

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, progress: &RunProgress) {
        let msg = format!(
            "{} | Queue: {} | Workers: {}",
            progress.status_line(),
            format_number(progress.queued as u64),
            progress.live_workers,
        );

        self.bar.set_message(msg);
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| {
            chunk
                .iter()
                .rev()
                .map(|&b| b as char)
                .collect::<String>()
        })
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Format a duration as `H:MM:SS`
fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Print a summary of the run
pub fn print_summary(
    snapshot: &StatusSnapshot,
    duration: Duration,
    completed: bool,
    results_path: &str,
    backup: Option<(&str, u64)>,
) {
    let duration_secs = duration.as_secs_f64();
    let attempted = snapshot.attempted_total() - snapshot.pending;
    let rate = if duration_secs > 0.0 {
        attempted as f64 / duration_secs
    } else {
        0.0
    };

    println!();
    if completed {
        println!("{}", style("Run Complete").green().bold());
    } else {
        println!("{}", style("Run Interrupted").yellow().bold());
    }
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Items:").bold(), format_number(snapshot.total as u64));
    println!("  {} {}", style("Successful:").bold(), format_number(snapshot.success as u64));
    println!("  {} {}", style("Bypassed:").bold(), format_number(snapshot.bypassed as u64));
    if snapshot.failures() > 0 {
        println!(
            "  {} {} (timed out {}, failed {}, lost {})",
            style("Failures:").yellow().bold(),
            format_number(snapshot.failures() as u64),
            snapshot.timed_out,
            snapshot.failed,
            snapshot.lost,
        );
    }
    if snapshot.pending > 0 {
        println!(
            "  {} {}",
            style("Pending:").yellow().bold(),
            format_number(snapshot.pending as u64)
        );
    }
    println!(
        "  {} {:.1}s ({:.2} items/sec)",
        style("Duration:").bold(),
        duration_secs,
        rate
    );
    if let Some((dir, size)) = backup {
        println!("  {} {} ({})", style("Backup:").bold(), dir, format_size(size, BINARY));
    }
    println!("  {} {}", style("Results:").bold(), results_path);
    println!();
}

/// Print a header at the start of the run
pub fn print_header(input: &str, items: usize, concurrency: usize, backup: Option<&str>) {
    println!();
    println!(
        "{} {}",
        style("collection-runner").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Input:").bold(), input);
    println!("  {} {}", style("Items:").bold(), format_number(items as u64));
    println!("  {} {}", style("Workers:").bold(), concurrency);
    println!("  {} {}", style("Backup:").bold(), backup.unwrap_or("disabled"));
    println!();
}
