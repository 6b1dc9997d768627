// components/release_downloader/src/lib.rs
//! Downloader for free and already-owned releases of an online music store
//!
//! A requested URL is fetched and classified as a single release or an
//! artist/label page. Each release is resolved to an acquisition path
//! (direct link, email-gated link, purchased collection entry), its archive
//! is transferred with resume and integrity checks, unpacked, tagged and
//! recorded in the download ledger so later runs skip it.

mod cookies;
mod engine;
mod error;
mod fetcher;
pub mod mail;
mod page;
mod platform;
mod resolver;
mod retry;
mod transfer;
mod unpack;
mod utils;

pub use engine::{
    error_chain, Engine, EngineOptions, Mailbox, ReleaseOutcome, ReleaseReport, RunReport,
};
pub use error::{DescriptorError, DownloadError, FetchError, MailError, Result};
pub use fetcher::{Authentication, Page, PageFetcher, USER_AGENT};
pub use mail::{
    EmailWaiter, GuerrillaInbox, Inbox, MailSummary, WaitOutcome, DEFAULT_EMAIL_TIMEOUT,
    GUERRILLA_API,
};
pub use page::{stat_url, BandcampMarkup, DownloadPage, MarkupFormat, PageInfo};
pub use platform::Platform;
pub use resolver::{plan, AcquisitionPath, AcquisitionPlan, EmailIdentity, Resolver};
pub use retry::{ReleaseRetry, RetryPolicy};
pub use transfer::{partial_path, NoProgress, ProgressObserver, TransferEngine, TransferResult};
pub use unpack::{list_files, unpack_archive, unpack_dir};
