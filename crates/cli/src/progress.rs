//! Cargo-style progress output for upsync
//!
//! Displays progress in the familiar cargo format:
//! ```text
//!    Checking v2.1 against /opt/app (sidecar)
//!     Planned 3 new, 12 changed, 1 removed, 4 ignored (incremental)
//!    Fetching [===========>             ] 7/15 lib/util.py
//!   Installed v2.1 in 3.2s
//! ```

use std::io::{self, Write as _};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::fmt::MakeWriter;

use upsync_core::{FailureRecord, InstallPlan, InstallPolicy, InstallReport};

/// Status verbs for cargo-style output (right-aligned to 12 chars)
struct Status;

impl Status {
    const CHECKING: &str = "Checking";
    const PLANNED: &str = "Planned";
    const FETCHING: &str = "Fetching";
    const DOWNLOADING: &str = "Downloading";
    const INSTALLED: &str = "Installed";
    const UP_TO_DATE: &str = "Up to date";
    const FAILED: &str = "Failed";
}

static MULTI: OnceLock<MultiProgress> = OnceLock::new();

/// Shared bar container; log output is routed around it
pub fn multi() -> &'static MultiProgress {
    MULTI.get_or_init(MultiProgress::new)
}

/// Writer that suspends active progress bars while a log line is printed
#[derive(Clone, Copy, Default)]
pub struct ProgressWriter;

impl io::Write for ProgressWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        multi().suspend(|| io::stderr().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for ProgressWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        *self
    }
}

/// Print a cargo-style status line
pub fn print_status(status: &str, message: &str) {
    let style = console::Style::new().green().bold();
    multi().suspend(|| {
        let mut term = console::Term::stderr();
        let _ = writeln!(term, "{:>12} {}", style.apply_to(status), message);
    });
}

fn print_warning(status: &str, message: &str) {
    let style = console::Style::new().yellow().bold();
    multi().suspend(|| {
        let mut term = console::Term::stderr();
        let _ = writeln!(term, "{:>12} {}", style.apply_to(status), message);
    });
}

/// Progress tracker for one install
pub struct InstallProgress {
    start: Instant,
}

impl InstallProgress {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    /// Show the "Checking" and "Planned" lines
    pub fn planned(&self, plan: &InstallPlan, root: &std::path::Path) {
        print_status(
            Status::CHECKING,
            &format!("{} against {} ({})", plan.version.name, root.display(), plan.source),
        );
        let diff = &plan.diff;
        print_status(
            Status::PLANNED,
            &format!(
                "{} new, {} changed, {} removed, {} ignored ({})",
                diff.new.len(),
                diff.replace.len(),
                diff.remove.len(),
                diff.ignored.len(),
                plan.policy
            ),
        );
    }

    /// Create a progress bar for per-file downloads
    pub fn fetch_bar(&self, total_files: u64) -> ProgressBar {
        let pb = multi().add(ProgressBar::new(total_files));
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {msg:>12} [{bar:25.cyan/dim}] {pos}/{len} {prefix:.dim}")
                .expect("valid template")
                .progress_chars("=> "),
        );
        pb.set_message(Status::FETCHING);
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Create a spinner for the archive download (size unknown up front)
    pub fn archive_spinner(&self, version: &str) -> ProgressBar {
        let pb = multi().add(ProgressBar::new_spinner());
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg:>12} {prefix}")
                .expect("valid template"),
        );
        pb.set_message(Status::DOWNLOADING);
        pb.set_prefix(format!("{version}.zip..."));
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    /// Show final summary, listing every failure
    pub fn finish(&self, report: &InstallReport) {
        let elapsed = self.start.elapsed();
        let elapsed_str = if elapsed.as_secs() >= 1 {
            format!("{:.2}s", elapsed.as_secs_f64())
        } else {
            format!("{}ms", elapsed.as_millis())
        };

        if report.is_success() {
            if report.diff.is_empty() && report.policy == InstallPolicy::Incremental {
                print_status(Status::UP_TO_DATE, &report.version);
            } else {
                print_status(Status::INSTALLED, &format!("{} in {elapsed_str}", report.version));
            }
            return;
        }

        for failure in &report.failures {
            print_failure(failure);
        }
        print_warning(
            "Finished",
            &format!(
                "{} with {} failed in {elapsed_str}; run again to retry",
                report.version,
                report.failures.len()
            ),
        );
    }
}

impl Default for InstallProgress {
    fn default() -> Self {
        Self::new()
    }
}

fn print_failure(failure: &FailureRecord) {
    let style = console::Style::new().red().bold();
    multi().suspend(|| {
        let mut term = console::Term::stderr();
        let _ = writeln!(term, "{:>12} {failure}", style.apply_to(Status::FAILED));
    });
}
