// components/release_downloader/src/engine.rs
use crate::error::{DescriptorError, DownloadError, Result};
use crate::fetcher::{Authentication, PageFetcher};
use crate::mail::{
    EmailWaiter, GuerrillaInbox, Inbox, WaitOutcome, DEFAULT_EMAIL_TIMEOUT, GUERRILLA_API,
    POLL_INTERVAL,
};
use crate::page::{BandcampMarkup, MarkupFormat, PageInfo};
use crate::platform::Platform;
use crate::resolver::{plan, AcquisitionPath, AcquisitionPlan, EmailIdentity, Resolver};
use crate::retry::{ReleaseRetry, RetryPolicy};
use crate::transfer::{NoProgress, ProgressObserver, TransferEngine, TransferResult};
use crate::unpack::{unpack_archive, unpack_dir};
use crate::utils::is_archive;
use chrono::{DateTime, Utc};
use download_ledger::{artifact_size, ArtifactState, FailureLog, FailureRecord, Ledger};
use futures::stream::{self, StreamExt};
use release_primitives::{AudioFormat, ReleaseDescriptor, ReleaseId, ReleaseRef};
use release_tagging::{tag_release, ReleaseTags};
use std::error::Error as _;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;

/// Where email-gated releases get their link mailed to
#[derive(Clone)]
pub enum Mailbox {
    /// A real address; the link is left for the user to follow
    Address(String),
    /// Disposable inbox opened on first use through the given API
    Disposable { api: Url },
    /// A caller-provided inbox
    Inbox(Arc<dyn Inbox>),
}

impl Default for Mailbox {
    fn default() -> Self {
        Mailbox::Disposable {
            // Static, known-good URL
            api: Url::parse(GUERRILLA_API).expect("static inbox api url"),
        }
    }
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mailbox::Address(address) => f.debug_tuple("Address").field(address).finish(),
            Mailbox::Disposable { api } => f.debug_struct("Disposable").field("api", api).finish(),
            Mailbox::Inbox(inbox) => f.debug_tuple("Inbox").field(&inbox.address()).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub download_dir: PathBuf,
    pub format: AudioFormat,
    pub mailbox: Mailbox,
    pub identity: EmailIdentity,
    /// Unpack and tag archives; otherwise archives are kept as transferred
    pub unpack: bool,
    /// Ignore the ledger and acquire again
    pub force: bool,
    pub email_timeout: Duration,
    pub poll_interval: Duration,
    pub release_retry: ReleaseRetry,
    pub fetch_retry: RetryPolicy,
    /// Releases of a collection processed concurrently
    pub jobs: usize,
    pub auth: Authentication,
    pub platform: Platform,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("."),
            format: AudioFormat::default(),
            mailbox: Mailbox::default(),
            identity: EmailIdentity::default(),
            unpack: true,
            force: false,
            email_timeout: DEFAULT_EMAIL_TIMEOUT,
            poll_interval: POLL_INTERVAL,
            release_retry: ReleaseRetry::default(),
            fetch_retry: RetryPolicy::default(),
            jobs: 1,
            auth: Authentication::default(),
            platform: Platform::default(),
        }
    }
}

/// Result of a step run under the whole-release retry rule
enum Attempt<T> {
    Done(T),
    Cancelled,
    Failed { error: String, attempts: u32 },
}

/// Final state of one release
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Transferred; `artifact` is the unpacked directory or the kept file
    Downloaded { artifact: PathBuf, bytes: u64 },
    /// An archive from an earlier run was unpacked and tagged
    Repaired { artifact: PathBuf },
    AlreadyComplete,
    /// The link was mailed to an address the engine does not read
    EmailSent { address: String },
    Unobtainable { reason: String },
    Failed { error: String, attempts: u32 },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseReport {
    pub url: Url,
    pub release: Option<ReleaseId>,
    pub outcome: ReleaseOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub releases: Vec<ReleaseReport>,
}

impl RunReport {
    pub fn count(&self, pred: impl Fn(&ReleaseOutcome) -> bool) -> usize {
        self.releases.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ReleaseOutcome::Failed { .. }))
    }

    /// True when there was work and none of it succeeded
    pub fn all_failed(&self) -> bool {
        !self.releases.is_empty() && self.failed() == self.releases.len()
    }
}

/// Drives classification, acquisition, transfer, unpacking, tagging and
/// ledger updates for every requested URL
pub struct Engine {
    options: EngineOptions,
    fetcher: Arc<PageFetcher>,
    markup: Arc<dyn MarkupFormat>,
    resolver: Resolver,
    transfer: TransferEngine,
    waiter: EmailWaiter,
    disposable: OnceCell<Arc<dyn Inbox>>,
    // One email-gated acquisition at a time, so a mailed link always
    // answers the request that is being waited on
    email_turn: AsyncMutex<()>,
    ledger: Arc<Ledger>,
    failures: Option<Arc<FailureLog>>,
    observer: Arc<dyn ProgressObserver>,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(options: EngineOptions, ledger: Arc<Ledger>, cancel: CancellationToken) -> Result<Self> {
        let fetcher = Arc::new(PageFetcher::new(
            &options.auth,
            &options.platform.base_url,
            options.fetch_retry.clone(),
            cancel.clone(),
        )?);
        let markup: Arc<dyn MarkupFormat> = Arc::new(BandcampMarkup);
        let resolver = Resolver::new(fetcher.clone(), options.platform.clone());
        let transfer = TransferEngine::new(fetcher.clone(), markup.clone(), &options.download_dir);
        let waiter = EmailWaiter::new(&options.platform).with_poll_interval(options.poll_interval);

        Ok(Self {
            options,
            fetcher,
            markup,
            resolver,
            transfer,
            waiter,
            disposable: OnceCell::new(),
            email_turn: AsyncMutex::new(()),
            ledger,
            failures: None,
            observer: Arc::new(NoProgress),
            cancel,
        })
    }

    pub fn with_failure_log(mut self, failures: Arc<FailureLog>) -> Self {
        self.failures = Some(failures);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Swap the markup strategy used for every page
    pub fn with_markup(mut self, markup: Arc<dyn MarkupFormat>) -> Self {
        self.transfer = TransferEngine::new(
            self.fetcher.clone(),
            markup.clone(),
            &self.options.download_dir,
        );
        self.markup = markup;
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Process every URL, continuing past failed releases
    pub async fn run(&self, urls: &[Url]) -> RunReport {
        let mut report = RunReport::default();

        for url in urls {
            if self.cancel.is_cancelled() {
                break;
            }

            let classified = self
                .with_release_retry(url, move || self.classify_url(url))
                .await;
            let page = match classified {
                Attempt::Done(page) => page,
                Attempt::Cancelled => break,
                Attempt::Failed { error, attempts } => {
                    report.releases.push(ReleaseReport {
                        url: url.clone(),
                        release: None,
                        outcome: ReleaseOutcome::Failed { error, attempts },
                    });
                    continue;
                }
            };

            match page {
                PageInfo::Release(release) => {
                    let reference = ReleaseRef {
                        id: release.id.clone(),
                        url: release.page_url.clone(),
                    };
                    report
                        .releases
                        .push(self.process_release(reference, Some(release)).await);
                }
                PageInfo::Label(label) => {
                    info!(%url, releases = label.releases().len(), "processing collection");
                    let reports: Vec<ReleaseReport> = stream::iter(label.into_releases())
                        .map(|reference| self.process_release(reference, None))
                        .buffered(self.options.jobs.max(1))
                        .collect()
                        .await;
                    report.releases.extend(reports);
                }
            }
        }

        report
    }

    /// Fetch a page and decide what it is
    pub async fn classify_url(&self, url: &Url) -> Result<PageInfo> {
        let page = self.fetcher.fetch(url).await?;
        Ok(self.markup.classify(&page.url, &page.body)?)
    }

    /// Run one release to completion with whole-release retries
    ///
    /// A `prefetched` descriptor saves the first page fetch.
    pub async fn process_release(
        &self,
        reference: ReleaseRef,
        prefetched: Option<ReleaseDescriptor>,
    ) -> ReleaseReport {
        let mut prefetched = prefetched;
        let slot = &mut prefetched;
        let target = &reference;
        let attempt = self
            .with_release_retry(&reference.url, move || self.acquire_once(target, slot.take()))
            .await;

        let outcome = match attempt {
            Attempt::Done(outcome) => outcome,
            Attempt::Cancelled => ReleaseOutcome::Cancelled,
            Attempt::Failed { error, attempts } => ReleaseOutcome::Failed { error, attempts },
        };
        ReleaseReport {
            url: reference.url,
            release: Some(reference.id),
            outcome,
        }
    }

    /// Repeat `step` on transient errors, waiting `attempt x unit` between
    /// tries; the final failure goes to the failure log
    async fn with_release_retry<T, F, Fut>(&self, url: &Url, mut step: F) -> Attempt<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let retry = &self.options.release_retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if self.cancel.is_cancelled() {
                return Attempt::Cancelled;
            }

            match step().await {
                Ok(value) => return Attempt::Done(value),
                Err(e) if e.is_cancelled() => return Attempt::Cancelled,
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = retry.delay_after(attempt);
                    warn!(
                        %url,
                        attempt,
                        max = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error_chain(&e),
                        "release failed, retrying"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Attempt::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => {
                    let error = error_chain(&e);
                    error!(%url, attempts = attempt, %error, "release failed");
                    self.record_failure(url, attempt, &error);
                    return Attempt::Failed {
                        error,
                        attempts: attempt,
                    };
                }
            }
        }
    }

    async fn acquire_once(
        &self,
        reference: &ReleaseRef,
        prefetched: Option<ReleaseDescriptor>,
    ) -> Result<ReleaseOutcome> {
        if !self.options.force && self.is_satisfied(&reference.id) {
            info!(release = %reference.id, "already downloaded");
            return Ok(ReleaseOutcome::AlreadyComplete);
        }

        let release = match prefetched {
            Some(release) => release,
            None => self.fetch_release(&reference.url).await?,
        };

        if !self.options.force {
            if release.id != reference.id && self.is_satisfied(&release.id) {
                info!(release = %release.id, "already downloaded");
                return Ok(ReleaseOutcome::AlreadyComplete);
            }
            if let Some(outcome) = self.repair(&release).await? {
                return Ok(outcome);
            }
        }

        self.acquire(&release).await
    }

    /// Acquire a release regardless of the ledger's opinion
    pub async fn acquire(&self, release: &ReleaseDescriptor) -> Result<ReleaseOutcome> {
        let wants_email = plan(release) == AcquisitionPlan::RequestEmail;
        let email_turn = if wants_email {
            Some(self.email_turn.lock().await)
        } else {
            None
        };
        let mailbox = if wants_email {
            Some(self.mailbox().await?)
        } else {
            None
        };

        let path = self
            .resolver
            .resolve(
                release,
                mailbox.as_ref().map(|(address, _)| address.as_str()),
                &self.options.identity,
            )
            .await?;

        let download_page = match path {
            AcquisitionPath::Unobtainable(reason) => {
                info!(release = %release.id, %reason, "release cannot be obtained");
                return Ok(ReleaseOutcome::Unobtainable { reason });
            }
            AcquisitionPath::Direct(link) => link,
            AcquisitionPath::Purchased { account_id, .. } => {
                self.resolver.collection_link(account_id, release).await?
            }
            AcquisitionPath::EmailPending { requested_at, .. } => {
                let (address, inbox) = mailbox.ok_or_else(|| {
                    DownloadError::AcquisitionRejected("no mailbox for email request".to_string())
                })?;
                let Some(inbox) = inbox else {
                    info!(release = %release.id, %address, "download link sent by email");
                    return Ok(ReleaseOutcome::EmailSent { address });
                };
                match self.wait_for_link(inbox.as_ref(), requested_at).await? {
                    WaitOutcome::Delivered(link) => link,
                    WaitOutcome::TimedOut => {
                        return Err(DownloadError::EmailTimeout(self.options.email_timeout))
                    }
                }
            }
        };
        drop(email_turn);

        let transferred = self
            .transfer(&download_page, self.options.format, self.observer.as_ref())
            .await?;
        self.finish(release, transferred).await
    }

    /// Transfer the artifact behind a download page into the download directory
    pub async fn transfer(
        &self,
        download_page: &Url,
        format: AudioFormat,
        observer: &dyn ProgressObserver,
    ) -> Result<TransferResult> {
        self.transfer
            .transfer(download_page, format, observer, &self.cancel)
            .await
    }

    /// Wait on the engine's inbox for a link mailed after `since`
    pub async fn await_email_link(
        &self,
        since: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<WaitOutcome> {
        match self.mailbox().await? {
            (_, Some(inbox)) => {
                self.waiter
                    .await_link(inbox.as_ref(), since, timeout, &self.cancel)
                    .await
            }
            (address, None) => Err(DownloadError::AcquisitionRejected(format!(
                "{address} is not an inbox the engine can read"
            ))),
        }
    }

    async fn wait_for_link(&self, inbox: &dyn Inbox, since: DateTime<Utc>) -> Result<WaitOutcome> {
        self.waiter
            .await_link(inbox, since, self.options.email_timeout, &self.cancel)
            .await
    }

    /// Address to give the platform, and the inbox to watch when there is one
    async fn mailbox(&self) -> Result<(String, Option<Arc<dyn Inbox>>)> {
        match &self.options.mailbox {
            Mailbox::Address(address) => Ok((address.clone(), None)),
            Mailbox::Inbox(inbox) => Ok((inbox.address().to_string(), Some(inbox.clone()))),
            Mailbox::Disposable { api } => {
                let inbox = self
                    .disposable
                    .get_or_try_init(|| async {
                        let inbox = GuerrillaInbox::open(api.clone()).await?;
                        Ok::<Arc<dyn Inbox>, DownloadError>(Arc::new(inbox))
                    })
                    .await?;
                Ok((inbox.address().to_string(), Some(inbox.clone())))
            }
        }
    }

    async fn fetch_release(&self, url: &Url) -> Result<ReleaseDescriptor> {
        match self.classify_url(url).await? {
            PageInfo::Release(release) => Ok(release),
            PageInfo::Label(_) => Err(DescriptorError::NotARelease.into()),
        }
    }

    fn desired_state(&self) -> ArtifactState {
        if self.options.unpack {
            ArtifactState::Unpacked
        } else {
            ArtifactState::Archived
        }
    }

    /// Ledger says the release needs no further work
    fn is_satisfied(&self, id: &ReleaseId) -> bool {
        let desired = self.desired_state();
        if self.ledger.is_complete(id, desired) {
            return true;
        }
        // Single-file artifacts are recorded unpacked even when archives are kept
        desired == ArtifactState::Archived
            && self
                .ledger
                .entry(id)
                .is_some_and(|entry| !is_archive(Path::new(&entry.artifact_name)))
            && self.ledger.is_complete(id, ArtifactState::Unpacked)
    }

    /// Unpack an archive a previous run transferred but did not unpack
    async fn repair(&self, release: &ReleaseDescriptor) -> Result<Option<ReleaseOutcome>> {
        if !self.options.unpack || !self.ledger.is_complete(&release.id, ArtifactState::Archived) {
            return Ok(None);
        }
        let Some(entry) = self.ledger.entry(&release.id) else {
            return Ok(None);
        };
        let archive = self.options.download_dir.join(&entry.artifact_name);
        if !is_archive(&archive) {
            return Ok(None);
        }

        info!(release = %release.id, archive = %archive.display(), "unpacking archive from earlier run");
        let artifact = self.unpack_and_tag(release, &archive).await?;
        Ok(Some(ReleaseOutcome::Repaired { artifact }))
    }

    async fn finish(
        &self,
        release: &ReleaseDescriptor,
        transferred: TransferResult,
    ) -> Result<ReleaseOutcome> {
        let name = transferred.file_name();
        let path = transferred.path.clone();

        if is_archive(&path) {
            self.ledger
                .record_new(&release.id, &name, transferred.bytes, ArtifactState::Archived)?;
            let artifact = if self.options.unpack {
                self.unpack_and_tag(release, &path).await?
            } else {
                path
            };
            return Ok(ReleaseOutcome::Downloaded {
                artifact,
                bytes: transferred.bytes,
            });
        }

        self.tag(release, vec![path.clone()]).await?;
        let bytes = artifact_size(&path).map_err(|e| DownloadError::io("measure artifact", &path, e))?;
        self.ledger
            .record_new(&release.id, &name, bytes, ArtifactState::Unpacked)?;
        Ok(ReleaseOutcome::Downloaded {
            artifact: path,
            bytes,
        })
    }

    async fn unpack_and_tag(&self, release: &ReleaseDescriptor, archive: &Path) -> Result<PathBuf> {
        let files = unpack_archive(archive).await?;
        self.tag(release, files).await?;

        let dir = unpack_dir(archive);
        let dir_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bytes = artifact_size(&dir).map_err(|e| DownloadError::io("measure artifact", &dir, e))?;
        self.ledger
            .advance_state(&release.id, &dir_name, bytes, ArtifactState::Unpacked)?;
        Ok(dir)
    }

    async fn tag(&self, release: &ReleaseDescriptor, files: Vec<PathBuf>) -> Result<()> {
        let tags = ReleaseTags::from_descriptor(release);
        let tagged = tokio::task::spawn_blocking(move || tag_release(&files, &tags).len())
            .await
            .map_err(|e| DownloadError::io("tag files", PathBuf::new(), std::io::Error::other(e)))?;
        info!(release = %release.id, files = tagged, "tagged audio files");
        Ok(())
    }

    fn record_failure(&self, url: &Url, attempts: u32, message: &str) {
        let Some(failures) = &self.failures else {
            return;
        };
        if let Err(e) = failures.append(&FailureRecord::now(url.as_str(), attempts, message)) {
            warn!(error = %e, "could not write failure record");
        }
    }
}

/// Error message followed by its sources
pub fn error_chain(error: &DownloadError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
