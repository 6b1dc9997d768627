// components/release_downloader/src/fetcher.rs
use crate::cookies::{add_identity_cookie, load_cookies_txt};
use crate::error::FetchError;
use crate::retry::{is_retryable_reqwest_error, retry_with_backoff, RetryAction, RetryPolicy};
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Credentials the user already holds for the platform
#[derive(Debug, Clone, Default)]
pub struct Authentication {
    /// Netscape cookies.txt exported from a browser session
    pub cookies_file: Option<PathBuf>,
    /// Value of the platform `identity` cookie
    pub identity: Option<String>,
}

/// A fetched page
#[derive(Debug, Clone)]
pub struct Page {
    /// Final URL after redirects
    pub url: Url,
    pub headers: HeaderMap,
    pub body: String,
}

impl Page {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }
}

/// Outbound HTTP with a shared pool, session cookies and bounded retries
///
/// Authentication is fixed at construction for the lifetime of the fetcher.
#[derive(Clone)]
pub struct PageFetcher {
    client: Client,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl PageFetcher {
    pub fn new(
        auth: &Authentication,
        platform_base: &Url,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Result<Self, FetchError> {
        let jar = Arc::new(Jar::default());

        if let Some(path) = &auth.cookies_file {
            let added = load_cookies_txt(&jar, path).map_err(|e| {
                FetchError::Client(format!("cannot read cookies from {}: {e}", path.display()))
            })?;
            info!(cookies = added, file = %path.display(), "loaded session cookies");
        }
        if let Some(identity) = &auth.identity {
            add_identity_cookie(&jar, platform_base, identity);
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .cookie_provider(jar)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            client,
            policy,
            cancel,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// GET a page and read its body as text
    pub async fn fetch(&self, url: &Url) -> Result<Page, FetchError> {
        debug!(%url, "fetching page");
        let response = self.execute(url, || self.client.get(url.clone())).await?;
        let final_url = response.url().clone();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::network(url, e))?;
        Ok(Page {
            url: final_url,
            headers,
            body,
        })
    }

    /// GET with extra headers, returning the response unread for streaming
    pub async fn get_stream(&self, url: &Url, headers: HeaderMap) -> Result<Response, FetchError> {
        self.execute(url, || self.client.get(url.clone()).headers(headers.clone()))
            .await
    }

    /// POST a urlencoded form, decoding a JSON answer
    pub async fn post_form_json<T: DeserializeOwned>(
        &self,
        url: &Url,
        form: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let response = self
            .execute(url, || self.client.post(url.clone()).form(form))
            .await?;
        Self::decode_json(url, response).await
    }

    /// POST a JSON body, decoding a JSON answer
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &Url,
        body: &B,
    ) -> Result<T, FetchError> {
        let response = self
            .execute(url, || self.client.post(url.clone()).json(body))
            .await?;
        Self::decode_json(url, response).await
    }

    async fn decode_json<T: DeserializeOwned>(url: &Url, response: Response) -> Result<T, FetchError> {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::network(url, e))?;
        serde_json::from_slice(&bytes).map_err(|source| FetchError::Body {
            url: url.to_string(),
            source,
        })
    }

    async fn execute<F>(&self, url: &Url, build: F) -> Result<Response, FetchError>
    where
        F: Fn() -> RequestBuilder,
    {
        retry_with_backoff(&self.policy, &self.cancel, |_attempt| {
            let request = build();
            async move {
                match request.send().await {
                    Ok(response) if response.status().is_success() => {
                        RetryAction::Success(response)
                    }
                    Ok(response) => {
                        let err = FetchError::status(url, response.status());
                        if err.is_transient() {
                            RetryAction::Retry(err)
                        } else {
                            RetryAction::Fail(err)
                        }
                    }
                    Err(e) if is_retryable_reqwest_error(&e) => {
                        RetryAction::Retry(FetchError::network(url, e))
                    }
                    Err(e) => RetryAction::Fail(FetchError::network(url, e)),
                }
            }
        })
        .await
    }
}
