// components/release_downloader/src/platform.rs
use url::Url;

/// Endpoints and constants of the content platform
#[derive(Debug, Clone)]
pub struct Platform {
    /// Root of the platform; download links in emails point below it
    pub base_url: Url,
    pub collection_search_url: Url,
    pub notification_sender: String,
    pub subject_keyword: String,
}

impl Default for Platform {
    fn default() -> Self {
        // Static, known-good URL
        let base_url = Url::parse("https://bandcamp.com").expect("static platform url");
        Self::with_base(base_url)
    }
}

impl Platform {
    /// Platform rooted at `base_url`, with every endpoint derived from it
    pub fn with_base(base_url: Url) -> Self {
        let collection_search_url = base_url
            .join("/api/fancollection/1/search_items")
            .unwrap_or_else(|_| base_url.clone());
        Self {
            base_url,
            collection_search_url,
            notification_sender: "noreply@bandcamp.com".to_string(),
            subject_keyword: "download".to_string(),
        }
    }

    /// Base URL as written inside links, without a trailing slash
    pub fn link_prefix(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// Endpoint accepting email-download requests for a release page
    pub fn email_download_url(&self, page_url: &Url) -> Option<Url> {
        page_url.join("/email_download").ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_follow_base() {
        let platform = Platform::with_base(Url::parse("http://127.0.0.1:4000").unwrap());
        assert_eq!(
            platform.collection_search_url.as_str(),
            "http://127.0.0.1:4000/api/fancollection/1/search_items"
        );
        assert_eq!(platform.link_prefix(), "http://127.0.0.1:4000");
    }

    #[test]
    fn email_endpoint_sits_at_artist_root() {
        let platform = Platform::default();
        let page = Url::parse("https://artist.bandcamp.com/album/some-album").unwrap();
        assert_eq!(
            platform.email_download_url(&page).unwrap().as_str(),
            "https://artist.bandcamp.com/email_download"
        );
    }
}
