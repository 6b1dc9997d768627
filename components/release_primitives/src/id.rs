// components/release_primitives/src/id.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

/// Kind of a release page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseKind {
    Album,
    Track,
}

impl ReleaseKind {
    /// Parse the platform's item type ("album", "track", "song" or the
    /// single-letter collection form "a"/"t")
    pub fn from_platform_type(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "album" | "a" => Some(ReleaseKind::Album),
            "track" | "song" | "t" => Some(ReleaseKind::Track),
            _ => None,
        }
    }

    /// Item type as the platform's forms and APIs expect it
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseKind::Album => "album",
            ReleaseKind::Track => "track",
        }
    }

    /// Single letter used by the ledger and collection search results
    pub fn letter(&self) -> char {
        match self {
            ReleaseKind::Album => 'a',
            ReleaseKind::Track => 't',
        }
    }
}

impl fmt::Display for ReleaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stable identity of a release, used as the dedup key
///
/// Structured identity is preferred. When a page carries no usable
/// kind + id pair, the normalized page URL stands in for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReleaseId {
    Item { kind: ReleaseKind, id: u64 },
    Url(String),
}

impl ReleaseId {
    pub fn new(kind: ReleaseKind, id: u64) -> Self {
        ReleaseId::Item { kind, id }
    }

    pub fn album(id: u64) -> Self {
        Self::new(ReleaseKind::Album, id)
    }

    pub fn track(id: u64) -> Self {
        Self::new(ReleaseKind::Track, id)
    }

    /// Fallback identity derived from a page URL
    pub fn from_url(url: &Url) -> Self {
        ReleaseId::Url(normalize_url(url))
    }

    pub fn kind(&self) -> Option<ReleaseKind> {
        match self {
            ReleaseId::Item { kind, .. } => Some(*kind),
            ReleaseId::Url(_) => None,
        }
    }

    pub fn numeric_id(&self) -> Option<u64> {
        match self {
            ReleaseId::Item { id, .. } => Some(*id),
            ReleaseId::Url(_) => None,
        }
    }
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseId::Item { kind, id } => write!(f, "{}:{}", kind.letter(), id),
            ReleaseId::Url(url) => write!(f, "u:{}", url),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid release id '{0}'")]
pub struct InvalidReleaseId(pub String);

impl FromStr for ReleaseId {
    type Err = InvalidReleaseId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidReleaseId(s.to_string());
        let (prefix, rest) = s.trim().split_once(':').ok_or_else(invalid)?;

        match prefix {
            "a" | "t" => {
                let kind = ReleaseKind::from_platform_type(prefix).ok_or_else(invalid)?;
                let id = rest.parse::<u64>().map_err(|_| invalid())?;
                Ok(ReleaseId::new(kind, id))
            }
            "u" => {
                let url = Url::parse(rest).map_err(|_| invalid())?;
                Ok(ReleaseId::from_url(&url))
            }
            _ => Err(invalid()),
        }
    }
}

/// Normalize a page URL so repeated fetches of the same page agree
///
/// Scheme and host are lowercased by parsing, query and fragment are
/// dropped, a trailing slash is removed and `;` is escaped so the result
/// can live inside a `;`-separated ledger line.
pub fn normalize_url(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.set_fragment(None);

    let path = url.path().trim_end_matches('/').to_string();
    if path.is_empty() {
        url.set_path("/");
    } else {
        url.set_path(&path);
    }

    let normalized = url.to_string();
    let normalized = if path.is_empty() {
        normalized.trim_end_matches('/').to_string()
    } else {
        normalized
    };
    normalized.replace(';', "%3B")
}
