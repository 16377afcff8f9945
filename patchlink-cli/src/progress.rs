//! Cargo-style progress output for patch runs.
//!
//! ```text
//!    Updating 12 file(s), 48.20 MiB from patch.example.net:14617
//! ⠋ Patching [=========>               ] 19.31 MiB/48.20 MiB dat/city.prp
//!     Patched 12 file(s) in 9.41s
//! ```

use std::io::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use patchlink::patch::{JobState, PatchProgress, PatchReport, ProgressCallback};

/// Status verbs, right-aligned to 12 chars.
struct Status;

impl Status {
    const UPDATING: &'static str = "Updating";
    const PATCHING: &'static str = "Patching";
    const PATCHED: &'static str = "Patched";
    const UP_TO_DATE: &'static str = "Fresh";
    const REMOVED: &'static str = "Removed";
    const FAILED: &'static str = "Failed";
    const CANCELED: &'static str = "Canceled";
}

/// Print a cargo-style status line.
pub fn print_status(status: &str, message: &str) {
    let mut term = console::Term::stderr();
    let style = console::Style::new().green().bold();
    let _ = writeln!(term, "{:>12} {}", style.apply_to(status), message);
}

fn print_warning(status: &str, message: &str) {
    let mut term = console::Term::stderr();
    let style = console::Style::new().yellow().bold();
    let _ = writeln!(term, "{:>12} {}", style.apply_to(status), message);
}

/// Progress display for one patch run.
pub struct PatchDisplay {
    start: Instant,
    bar: ProgressBar,
}

impl PatchDisplay {
    pub fn new(server: &str, root: &str) -> Self {
        print_status(Status::UPDATING, &format!("{root} from {server}"));

        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} {msg:>12} [{bar:25.cyan/dim}] {bytes}/{total_bytes} {prefix:.dim}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_message(Status::PATCHING);
        bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            start: Instant::now(),
            bar,
        }
    }

    /// Callback that feeds engine progress into the bar.
    pub fn callback(&self) -> ProgressCallback {
        let bar = self.bar.clone();
        Arc::new(move |progress: &PatchProgress| {
            bar.set_length(progress.bytes_total);
            bar.set_position(progress.bytes_done);
            match progress.state {
                JobState::Failed => {
                    bar.println(format!("{:>12} {}", Status::FAILED, progress.path));
                }
                _ => bar.set_prefix(format!(
                    "{}/{} {}",
                    progress.files_done + progress.files_failed,
                    progress.files_total,
                    progress.path
                )),
            }
        })
    }

    /// Clears the bar and prints the run summary.
    pub fn finish(&self, report: &PatchReport, canceled: bool) {
        self.bar.finish_and_clear();
        let elapsed = format_elapsed(self.start.elapsed());

        if report.jobs.is_empty() {
            print_status(
                Status::UP_TO_DATE,
                &format!("{} file(s) already up to date", report.up_to_date),
            );
        } else if report.is_success() {
            print_status(
                Status::PATCHED,
                &format!("{} file(s) in {}", report.downloaded_count(), elapsed),
            );
        } else if canceled {
            print_warning(
                Status::CANCELED,
                &format!(
                    "{} of {} file(s) updated before cancel",
                    report.downloaded_count(),
                    report.jobs.len()
                ),
            );
        } else {
            print_warning(
                "Finished",
                &format!(
                    "{} updated, {} failed in {}",
                    report.downloaded_count(),
                    report.failed_count(),
                    elapsed
                ),
            );
        }

        for path in &report.removed {
            print_status(Status::REMOVED, path);
        }
        let kept = report.extraneous.len().saturating_sub(report.removed.len());
        if kept > 0 {
            print_warning(
                "Extraneous",
                &format!("{kept} local file(s) not in the manifest (use --remove-extraneous)"),
            );
        }
    }

    /// Lists each failed job and its final error.
    pub fn print_failures(&self, report: &PatchReport) {
        for job in report.failed() {
            let reason = job
                .last_error()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown error".to_string());
            print_warning(Status::FAILED, &format!("{}: {}", job.path(), reason));
        }
    }

    pub fn abandon(&self) {
        self.bar.finish_and_clear();
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    if elapsed.as_secs() >= 1 {
        format!("{:.2}s", elapsed.as_secs_f64())
    } else {
        format!("{}ms", elapsed.as_millis())
    }
}
