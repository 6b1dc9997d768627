// components/release_downloader/src/resolver.rs
use crate::error::{DownloadError, Result};
use crate::fetcher::PageFetcher;
use crate::platform::Platform;
use chrono::{DateTime, SubsecRound, Utc};
use release_primitives::{AcquisitionHint, ReleaseDescriptor, ReleaseId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Where a release's download page comes from
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionPath {
    Direct(Url),
    EmailPending {
        release: ReleaseId,
        requested_at: DateTime<Utc>,
    },
    Purchased {
        account_id: u64,
        release: ReleaseId,
    },
    Unobtainable(String),
}

/// First decision on a descriptor, before any request is made
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionPlan {
    Direct(Url),
    RequestEmail,
    LookupPurchase { account_id: u64 },
    Unobtainable(String),
}

/// Postal details sent along with an email-download request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailIdentity {
    pub country: String,
    pub postcode: String,
}

impl Default for EmailIdentity {
    fn default() -> Self {
        Self {
            country: "United States".to_string(),
            postcode: "00000".to_string(),
        }
    }
}

/// Choose the acquisition path for a descriptor
///
/// Pure: never touches the network, so a release without audio or without
/// a free offer costs no request at all.
pub fn plan(release: &ReleaseDescriptor) -> AcquisitionPlan {
    if !release.has_audio {
        return AcquisitionPlan::Unobtainable("no audio".to_string());
    }
    match release.acquisition_hint() {
        AcquisitionHint::DirectLink(link) => AcquisitionPlan::Direct(link),
        AcquisitionHint::RequiresEmail => AcquisitionPlan::RequestEmail,
        AcquisitionHint::AlreadyPurchased {
            account_id: Some(account_id),
        } => AcquisitionPlan::LookupPurchase { account_id },
        AcquisitionHint::AlreadyPurchased { account_id: None } => AcquisitionPlan::Unobtainable(
            "purchased, but the session carries no collector identity".to_string(),
        ),
        AcquisitionHint::Priced => {
            AcquisitionPlan::Unobtainable("not free, not purchased".to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmailReply {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct CollectionQuery<'a> {
    fan_id: u64,
    search_key: &'a str,
    search_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct CollectionSearch {
    #[serde(default)]
    tralbums: Vec<CollectionItem>,
    #[serde(default)]
    redownload_urls: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct CollectionItem {
    #[serde(default)]
    tralbum_type: Option<String>,
    #[serde(default)]
    tralbum_id: Option<u64>,
    #[serde(default)]
    sale_item_type: Option<String>,
    #[serde(default)]
    sale_item_id: Option<u64>,
}

impl CollectionItem {
    fn release_key(&self) -> Option<String> {
        Some(format!("{}:{}", self.tralbum_type.as_deref()?, self.tralbum_id?))
    }

    fn sale_key(&self) -> Option<String> {
        Some(format!("{}{}", self.sale_item_type.as_deref()?, self.sale_item_id?))
    }
}

/// Drives the request sequence of the chosen acquisition path
pub struct Resolver {
    fetcher: Arc<PageFetcher>,
    platform: Platform,
}

impl Resolver {
    pub fn new(fetcher: Arc<PageFetcher>, platform: Platform) -> Self {
        Self { fetcher, platform }
    }

    /// Resolve a descriptor to its acquisition path, submitting the email
    /// request when the release is email-gated
    ///
    /// `address` is only consulted for email-gated releases.
    pub async fn resolve(
        &self,
        release: &ReleaseDescriptor,
        address: Option<&str>,
        identity: &EmailIdentity,
    ) -> Result<AcquisitionPath> {
        Ok(match plan(release) {
            AcquisitionPlan::Direct(link) => AcquisitionPath::Direct(link),
            AcquisitionPlan::Unobtainable(reason) => AcquisitionPath::Unobtainable(reason),
            AcquisitionPlan::LookupPurchase { account_id } => AcquisitionPath::Purchased {
                account_id,
                release: release.id.clone(),
            },
            AcquisitionPlan::RequestEmail => {
                let address = address.ok_or_else(|| {
                    DownloadError::AcquisitionRejected(format!(
                        "{} needs an email address",
                        release.id
                    ))
                })?;
                AcquisitionPath::EmailPending {
                    release: release.id.clone(),
                    requested_at: self.request_email(release, address, identity).await?,
                }
            }
        })
    }

    /// Ask the platform to mail a download link, returning the request time
    ///
    /// A reply without `ok` is a rejection and is not worth repeating.
    pub async fn request_email(
        &self,
        release: &ReleaseDescriptor,
        address: &str,
        identity: &EmailIdentity,
    ) -> Result<DateTime<Utc>> {
        let (Some(kind), Some(item_id)) = (release.id.kind(), release.id.numeric_id()) else {
            return Err(DownloadError::AcquisitionRejected(format!(
                "{} has no item id to request by email",
                release.id
            )));
        };
        let endpoint = self
            .platform
            .email_download_url(&release.page_url)
            .ok_or_else(|| DownloadError::InvalidUrl(release.page_url.to_string()))?;

        // Inbox timestamps carry whole seconds only
        let requested_at = Utc::now().trunc_subsecs(0);
        let form = [
            ("encoding_name", "none".to_string()),
            ("item_id", item_id.to_string()),
            ("item_type", kind.as_str().to_string()),
            ("address", address.to_string()),
            ("country", identity.country.clone()),
            ("postcode", identity.postcode.clone()),
        ];

        let reply: EmailReply = self.fetcher.post_form_json(&endpoint, &form).await?;
        if !reply.ok {
            let detail = reply
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no reason given".to_string());
            return Err(DownloadError::AcquisitionRejected(format!(
                "email request for {} declined: {detail}",
                release.id
            )));
        }

        info!(release = %release.id, address, "download link requested by email");
        Ok(requested_at)
    }

    /// Find the redownload page of a purchased release in the account's
    /// collection
    ///
    /// The search is by title and only narrows the candidates; the entry
    /// used must match the release's type and id exactly.
    pub async fn collection_link(
        &self,
        account_id: u64,
        release: &ReleaseDescriptor,
    ) -> Result<Url> {
        let query = CollectionQuery {
            fan_id: account_id,
            search_key: &release.title,
            search_type: "collection",
        };
        let results: CollectionSearch = self
            .fetcher
            .post_json(&self.platform.collection_search_url, &query)
            .await?;

        let wanted = release.id.to_string();
        let item = results
            .tralbums
            .iter()
            .find(|item| item.release_key().as_deref() == Some(wanted.as_str()))
            .ok_or_else(|| {
                DownloadError::AcquisitionRejected(format!(
                    "{wanted} not found in the collection of account {account_id}"
                ))
            })?;
        debug!(release = %wanted, "matched collection entry");

        let link = item
            .sale_key()
            .and_then(|key| results.redownload_urls.get(&key))
            .ok_or_else(|| {
                DownloadError::AcquisitionRejected(format!("{wanted} has no redownload link"))
            })?;
        Url::parse(link).map_err(|_| DownloadError::InvalidUrl(link.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::Authentication;
    use crate::retry::RetryPolicy;
    use assert_matches::assert_matches;
    use release_primitives::Offer;
    use std::collections::BTreeSet;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{body_json, body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn descriptor(base: &str, has_audio: bool, offer: Offer) -> ReleaseDescriptor {
        ReleaseDescriptor {
            id: ReleaseId::album(12345),
            title: "Free Album".to_string(),
            about: String::new(),
            credits: String::new(),
            tags: BTreeSet::new(),
            page_url: Url::parse(&format!("{base}/album/free-album")).unwrap(),
            has_audio,
            offer,
        }
    }

    fn resolver(server: &MockServer) -> Resolver {
        let base = Url::parse(&server.uri()).unwrap();
        let fetcher = PageFetcher::new(
            &Authentication::default(),
            &base,
            RetryPolicy::none(),
            CancellationToken::new(),
        )
        .unwrap();
        Resolver::new(Arc::new(fetcher), Platform::with_base(base))
    }

    #[test]
    fn no_audio_is_never_obtainable() {
        let release = descriptor(
            "https://a.bandcamp.com",
            false,
            Offer {
                direct_link: Some(Url::parse("https://bandcamp.com/download?id=1").unwrap()),
                ..Offer::default()
            },
        );
        assert_eq!(
            plan(&release),
            AcquisitionPlan::Unobtainable("no audio".to_string())
        );
    }

    #[test]
    fn direct_link_wins_over_price() {
        let link = Url::parse("https://bandcamp.com/download?id=1").unwrap();
        let release = descriptor(
            "https://a.bandcamp.com",
            true,
            Offer {
                direct_link: Some(link.clone()),
                price: Some(9.0),
                ..Offer::default()
            },
        );
        assert_eq!(plan(&release), AcquisitionPlan::Direct(link));
    }

    #[test]
    fn priced_release_is_unobtainable() {
        let release = descriptor(
            "https://a.bandcamp.com",
            true,
            Offer {
                price: Some(9.0),
                ..Offer::default()
            },
        );
        assert_matches!(plan(&release), AcquisitionPlan::Unobtainable(_));
    }

    #[tokio::test]
    async fn email_request_submits_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/email_download"))
            .and(body_string_contains("item_id=12345"))
            .and(body_string_contains("item_type=album"))
            .and(body_string_contains("postcode=00000"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok": true}"#))
            .expect(1)
            .mount(&server)
            .await;

        let release = descriptor(
            &server.uri(),
            true,
            Offer {
                price: Some(0.0),
                requires_email: true,
                ..Offer::default()
            },
        );
        let before = Utc::now().trunc_subsecs(0);
        let path = resolver(&server)
            .resolve(&release, Some("me@example.com"), &EmailIdentity::default())
            .await
            .unwrap();

        assert_matches!(
            path,
            AcquisitionPath::EmailPending { release, requested_at }
                if release == ReleaseId::album(12345) && requested_at >= before
        );
    }

    #[tokio::test]
    async fn declined_email_request_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/email_download"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok": false}"#))
            .mount(&server)
            .await;

        let release = descriptor(
            &server.uri(),
            true,
            Offer {
                price: Some(0.0),
                requires_email: true,
                ..Offer::default()
            },
        );
        let result = resolver(&server)
            .resolve(&release, Some("me@example.com"), &EmailIdentity::default())
            .await;
        assert_matches!(result, Err(DownloadError::AcquisitionRejected(_)));
    }

    #[tokio::test]
    async fn collection_lookup_matches_exact_id() {
        let server = MockServer::start().await;
        let search = serde_json::json!({
            "tralbums": [
                {"tralbum_type": "a", "tralbum_id": 999, "sale_item_type": "p", "sale_item_id": 1},
                {"tralbum_type": "a", "tralbum_id": 12345, "sale_item_type": "p", "sale_item_id": 2}
            ],
            "redownload_urls": {
                "p1": "https://bandcamp.com/download?decoy=1",
                "p2": "https://bandcamp.com/download?payment_id=2"
            }
        });
        Mock::given(method("POST"))
            .and(path("/api/fancollection/1/search_items"))
            .and(body_json(serde_json::json!({
                "fan_id": 42, "search_key": "Free Album", "search_type": "collection"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(search))
            .mount(&server)
            .await;

        let release = descriptor(&server.uri(), true, Offer::default());
        let link = resolver(&server).collection_link(42, &release).await.unwrap();
        assert_eq!(link.as_str(), "https://bandcamp.com/download?payment_id=2");
    }

    #[tokio::test]
    async fn collection_without_match_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tralbums": [{"tralbum_type": "t", "tralbum_id": 12345,
                              "sale_item_type": "p", "sale_item_id": 1}],
                "redownload_urls": {"p1": "https://bandcamp.com/download?x=1"}
            })))
            .mount(&server)
            .await;

        let release = descriptor(&server.uri(), true, Offer::default());
        let result = resolver(&server).collection_link(42, &release).await;
        assert_matches!(result, Err(DownloadError::AcquisitionRejected(_)));
    }

    #[tokio::test]
    async fn matched_entry_without_link_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tralbums": [{"tralbum_type": "a", "tralbum_id": 12345,
                              "sale_item_type": "p", "sale_item_id": 1}],
                "redownload_urls": {}
            })))
            .mount(&server)
            .await;

        let release = descriptor(&server.uri(), true, Offer::default());
        let result = resolver(&server).collection_link(42, &release).await;
        assert_matches!(result, Err(DownloadError::AcquisitionRejected(_)));
    }
}
