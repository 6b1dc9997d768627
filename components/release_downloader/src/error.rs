// components/release_downloader/src/error.rs
use download_ledger::LedgerError;
use release_primitives::AudioFormat;
use reqwest::StatusCode;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single outbound HTTP exchange
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error for {url}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered {status}")]
    HttpStatus { url: String, status: StatusCode },

    #[error("unexpected response body from {url}")]
    Body {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to set up http client: {0}")]
    Client(String),

    #[error("request cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn network(url: impl ToString, source: reqwest::Error) -> Self {
        FetchError::Network {
            url: url.to_string(),
            source,
        }
    }

    pub fn status(url: impl ToString, status: StatusCode) -> Self {
        FetchError::HttpStatus {
            url: url.to_string(),
            status,
        }
    }

    /// Network failures and 5xx answers; a 4xx is a permanent condition
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network { .. } => true,
            FetchError::HttpStatus { status, .. } => status.is_server_error(),
            FetchError::Body { .. } | FetchError::Client(_) | FetchError::Cancelled => false,
        }
    }
}

/// Page markup that could not be understood
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("page has no {0}")]
    MissingMarker(&'static str),

    #[error("unrecognized page type {0:?}")]
    UnknownPageType(String),

    #[error("{block} is not well-formed")]
    MalformedBlock {
        block: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{block} lacks {field}")]
    MissingField {
        block: &'static str,
        field: &'static str,
    },

    #[error("invalid link {0:?} on page")]
    InvalidLink(String),

    #[error("expected a release page, found a collection")]
    NotARelease,
}

/// Transient inbox service failure
#[derive(Debug, Error)]
pub enum MailError {
    #[error("inbox request failed")]
    Request(#[from] reqwest::Error),

    #[error("inbox service answered {0}")]
    Status(StatusCode),

    #[error("inbox service returned an unexpected payload: {0}")]
    Payload(String),
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("unrecognized page: {0}")]
    UnrecognizedPage(#[from] DescriptorError),

    #[error("platform rejected the acquisition: {0}")]
    AcquisitionRejected(String),

    #[error("transfer of {path} ended at {actual} bytes, expected {expected}")]
    TransferIntegrity {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("no download email arrived within {0:?}")]
    EmailTimeout(Duration),

    #[error("download page offers no {0} download")]
    UnsupportedFormat(AudioFormat),

    #[error(transparent)]
    Mail(#[from] MailError),

    #[error("io error during {operation} on {path}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("failed to unpack {path}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("cancelled")]
    Cancelled,
}

impl DownloadError {
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DownloadError::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the whole release may change the outcome
    ///
    /// Any answered status counts: a 4xx ends the single request, but a
    /// fresh pass re-fetches the pages and mints new signed links.
    pub fn is_transient(&self) -> bool {
        match self {
            DownloadError::Fetch(FetchError::Network { .. } | FetchError::HttpStatus { .. }) => true,
            DownloadError::TransferIntegrity { .. }
            | DownloadError::EmailTimeout(_)
            | DownloadError::Mail(_) => true,
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            DownloadError::Cancelled | DownloadError::Fetch(FetchError::Cancelled)
        )
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;
