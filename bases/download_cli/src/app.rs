// bases/download_cli/src/app.rs
use crate::config::Config;
use crate::output::OutputHandler;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use download_ledger::{FailureLog, Ledger};
use release_downloader::{Engine, RunReport};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct App {
    config: Config,
    output: Arc<OutputHandler>,
}

impl App {
    pub fn new(config: Config) -> Self {
        let output = Arc::new(OutputHandler::new(config.debug));
        Self { config, output }
    }

    /// Run the invocation; the report is `None` when there was nothing to download
    pub async fn run(&self) -> Result<Option<RunReport>> {
        let ledger = Ledger::open(&self.config.history_file, &self.config.engine.download_dir)
            .wrap_err("could not open download history")?;

        if self.config.clear_history {
            ledger.clear().wrap_err("could not clear download history")?;
            self.output.print_history_cleared(ledger.path());
            return Ok(None);
        }

        let failures = FailureLog::open(&self.config.failure_log)
            .wrap_err("could not open failure log")?;
        let cancel = CancellationToken::new();
        spawn_interrupt_handler(cancel.clone());

        let engine = Engine::new(self.config.engine.clone(), Arc::new(ledger), cancel)
            .wrap_err("could not set up downloader")?
            .with_failure_log(Arc::new(failures))
            .with_observer(self.output.clone());

        self.output.print_run_start(self.config.urls.len());
        let report = engine.run(&self.config.urls).await;
        self.output.print_summary(&report);
        info!(
            releases = report.releases.len(),
            failed = report.failed(),
            "run finished"
        );
        Ok(Some(report))
    }

    pub fn print_error(&self, error: &color_eyre::Report) {
        self.output.print_error(error);
    }
}

/// Ctrl-C cancels in-flight transfers and email waits; partial files stay
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping after current step");
            cancel.cancel();
        }
    });
}
