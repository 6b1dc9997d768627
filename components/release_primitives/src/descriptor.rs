// components/release_primitives/src/descriptor.rs
use crate::id::ReleaseId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use url::Url;

/// Transactional state of a release page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    /// Free download page link, present when the release is a plain free download
    pub direct_link: Option<Url>,

    /// Asking price in the release currency, `None` when the page states none
    pub price: Option<f64>,

    /// Whether a free download is gated behind an email address
    pub requires_email: bool,

    /// Whether the authenticated account already owns the release
    pub purchased: bool,

    /// Collector (fan) account id of the authenticated session, if any
    pub collector_id: Option<u64>,
}

impl Offer {
    pub fn is_free(&self) -> bool {
        self.price == Some(0.0)
    }
}

/// How a release can be obtained, derived from its `Offer`
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionHint {
    DirectLink(Url),
    RequiresEmail,
    AlreadyPurchased { account_id: Option<u64> },
    Priced,
}

/// Everything extracted from a single release page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseDescriptor {
    pub id: ReleaseId,
    pub title: String,
    pub about: String,
    pub credits: String,
    /// Lowercase, deduplicated and sorted
    pub tags: BTreeSet<String>,
    pub page_url: Url,
    pub has_audio: bool,
    pub offer: Offer,
}

impl ReleaseDescriptor {
    /// Acquisition hint in resolution order
    ///
    /// A direct link wins over any price signal, a free email-gated offer
    /// comes before a purchased-collection lookup.
    pub fn acquisition_hint(&self) -> AcquisitionHint {
        let offer = &self.offer;
        if let Some(link) = &offer.direct_link {
            AcquisitionHint::DirectLink(link.clone())
        } else if offer.is_free() && offer.requires_email {
            AcquisitionHint::RequiresEmail
        } else if offer.purchased {
            AcquisitionHint::AlreadyPurchased {
                account_id: offer.collector_id,
            }
        } else {
            AcquisitionHint::Priced
        }
    }
}

/// A release listed on a collection page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRef {
    pub id: ReleaseId,
    pub url: Url,
}

/// A collection ("label") page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelDescriptor {
    pub page_url: Url,
    releases: Vec<ReleaseRef>,
}

impl LabelDescriptor {
    /// Build a listing, keeping the first occurrence of every release id
    pub fn new(page_url: Url, refs: impl IntoIterator<Item = ReleaseRef>) -> Self {
        let mut seen = HashSet::new();
        let releases = refs
            .into_iter()
            .filter(|release| seen.insert(release.id.clone()))
            .collect();
        Self { page_url, releases }
    }

    pub fn releases(&self) -> &[ReleaseRef] {
        &self.releases
    }

    pub fn into_releases(self) -> Vec<ReleaseRef> {
        self.releases
    }

    pub fn is_empty(&self) -> bool {
        self.releases.is_empty()
    }
}
