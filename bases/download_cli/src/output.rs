// bases/download_cli/src/output.rs
use parking_lot::Mutex;
use release_downloader::{ProgressObserver, ReleaseOutcome, RunReport};
use std::collections::HashMap;

/// Terminal rendering of progress and results
pub struct OutputHandler {
    verbose: bool,
    /// Last reported tenth per file
    reported: Mutex<HashMap<String, u64>>,
}

impl OutputHandler {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            reported: Mutex::new(HashMap::new()),
        }
    }

    pub fn print_run_start(&self, urls: usize) {
        println!("Processing {urls} URL(s)");
    }

    pub fn print_history_cleared(&self, path: &std::path::Path) {
        println!("Cleared download history at {}", path.display());
    }

    pub fn print_summary(&self, report: &RunReport) {
        for release in &report.releases {
            let id = release
                .release
                .as_ref()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("{id:>14}  {}  {}", describe(&release.outcome), release.url);
        }

        let downloaded = report.count(|o| {
            matches!(
                o,
                ReleaseOutcome::Downloaded { .. } | ReleaseOutcome::Repaired { .. }
            )
        });
        let skipped = report.count(|o| matches!(o, ReleaseOutcome::AlreadyComplete));
        let unobtainable = report.count(|o| matches!(o, ReleaseOutcome::Unobtainable { .. }));
        println!(
            "\n{downloaded} downloaded, {skipped} already complete, {unobtainable} unobtainable, {} failed",
            report.failed()
        );
    }

    pub fn print_error(&self, error: &color_eyre::Report) {
        eprintln!("Error: {}", error);

        if self.verbose {
            eprintln!("\nError details:");
            error.chain().skip(1).for_each(|cause| {
                eprintln!("  caused by: {}", cause);
            });
        }
    }
}

impl ProgressObserver for OutputHandler {
    fn on_progress(&self, name: &str, bytes: u64, total: Option<u64>) {
        let Some(total) = total.filter(|t| *t > 0) else {
            return;
        };
        let tenth = (bytes.min(total) * 10) / total;

        let mut reported = self.reported.lock();
        if reported.get(name) == Some(&tenth) {
            return;
        }
        reported.insert(name.to_string(), tenth);
        drop(reported);

        println!(
            "  {name}: {:>3}% ({:.1} / {:.1} MiB)",
            tenth * 10,
            mib(bytes),
            mib(total)
        );
    }
}

fn mib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

fn describe(outcome: &ReleaseOutcome) -> String {
    match outcome {
        ReleaseOutcome::Downloaded { artifact, bytes } => {
            format!("downloaded {} ({:.1} MiB)", artifact.display(), mib(*bytes))
        }
        ReleaseOutcome::Repaired { artifact } => format!("unpacked {}", artifact.display()),
        ReleaseOutcome::AlreadyComplete => "already downloaded".to_string(),
        ReleaseOutcome::EmailSent { address } => format!("download link sent to {address}"),
        ReleaseOutcome::Unobtainable { reason } => format!("unobtainable: {reason}"),
        ReleaseOutcome::Failed { error, attempts } => {
            format!("failed after {attempts} attempt(s): {error}")
        }
        ReleaseOutcome::Cancelled => "cancelled".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn outcomes_read_as_sentences() {
        assert_eq!(
            describe(&ReleaseOutcome::EmailSent {
                address: "me@example.com".into()
            }),
            "download link sent to me@example.com"
        );
        assert_eq!(
            describe(&ReleaseOutcome::Downloaded {
                artifact: PathBuf::from("Album"),
                bytes: 3 * 1024 * 1024
            }),
            "downloaded Album (3.0 MiB)"
        );
    }

    #[test]
    fn progress_is_reported_once_per_tenth() {
        let output = OutputHandler::new(false);
        output.on_progress("a.zip", 5, Some(100));
        output.on_progress("a.zip", 9, Some(100));
        assert_eq!(output.reported.lock().get("a.zip"), Some(&0));
        output.on_progress("a.zip", 55, Some(100));
        assert_eq!(output.reported.lock().get("a.zip"), Some(&5));
        output.on_progress("b.zip", 1, None);
        assert!(output.reported.lock().get("b.zip").is_none());
    }
}
