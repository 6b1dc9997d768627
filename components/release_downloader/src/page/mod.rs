// components/release_downloader/src/page/mod.rs
//! Page classification and data extraction
//!
//! Markup knowledge lives behind [`MarkupFormat`] so that a change in the
//! platform's page layout means a new strategy, not new branches in callers.

mod bandcamp;

pub use bandcamp::BandcampMarkup;

use crate::error::{DescriptorError, DownloadError};
use release_primitives::{AudioFormat, LabelDescriptor, ReleaseDescriptor, ReleaseId};
use std::collections::HashMap;
use url::Url;

/// What a fetched page turned out to be
#[derive(Debug, Clone, PartialEq)]
pub enum PageInfo {
    Release(ReleaseDescriptor),
    Label(LabelDescriptor),
}

/// Format-to-signed-URL mapping of a download page
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadPage {
    pub release: Option<ReleaseId>,
    /// Keyed by platform format key (`flac`, `mp3-320`, ...)
    pub downloads: HashMap<String, Url>,
}

impl DownloadPage {
    pub fn signed_url(&self, format: AudioFormat) -> Result<&Url, DownloadError> {
        self.downloads
            .get(format.platform_key())
            .ok_or(DownloadError::UnsupportedFormat(format))
    }
}

/// A versioned understanding of the platform's markup
///
/// Every extraction fails closed: a page that does not carry the expected
/// structured blocks is an error, never a partial result.
pub trait MarkupFormat: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decide between a release and a collection page and extract it
    fn classify(&self, page_url: &Url, body: &str) -> Result<PageInfo, DescriptorError>;

    fn download_page(&self, page_url: &Url, body: &str) -> Result<DownloadPage, DescriptorError>;

    /// Renewed signed URL from the status endpoint body, if it carries one
    fn stat_retry_url(&self, body: &str) -> Option<Url>;
}

/// Status endpoint for a signed download URL
pub fn stat_url(signed: &Url) -> Option<Url> {
    let replaced = signed.as_str().replacen("/download/", "/statdownload/", 1);
    if replaced == signed.as_str() {
        return None;
    }
    Url::parse(&replaced).ok()
}
