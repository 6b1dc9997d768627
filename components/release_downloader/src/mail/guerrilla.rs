// components/release_downloader/src/mail/guerrilla.rs
use super::{Inbox, MailSummary};
use crate::error::MailError;
use crate::fetcher::REQUEST_TIMEOUT;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use tracing::info;
use url::Url;

pub const GUERRILLA_API: &str = "https://api.guerrillamail.com/ajax.php";

/// Disposable Guerrilla Mail inbox
pub struct GuerrillaInbox {
    client: Client,
    api: Url,
    sid_token: String,
    address: String,
}

#[derive(Debug, Deserialize)]
struct AddressReply {
    email_addr: String,
    sid_token: String,
}

#[derive(Debug, Deserialize)]
struct ListReply {
    #[serde(default)]
    list: Vec<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(deserialize_with = "string_or_number")]
    mail_id: String,
    #[serde(default)]
    mail_from: String,
    #[serde(default)]
    mail_subject: String,
    #[serde(deserialize_with = "string_or_number")]
    mail_timestamp: String,
}

#[derive(Debug, Deserialize)]
struct BodyReply {
    #[serde(default)]
    mail_body: String,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!("expected string or number, got {other}"))),
    }
}

impl RawMessage {
    fn into_summary(self) -> Result<MailSummary, MailError> {
        let secs: i64 = self
            .mail_timestamp
            .trim()
            .parse()
            .map_err(|_| MailError::Payload(format!("bad timestamp {:?}", self.mail_timestamp)))?;
        let received_at = DateTime::<Utc>::from_timestamp(secs, 0)
            .ok_or_else(|| MailError::Payload(format!("timestamp {secs} out of range")))?;
        Ok(MailSummary {
            id: self.mail_id,
            sender: self.mail_from,
            subject: self.mail_subject,
            received_at,
        })
    }
}

impl GuerrillaInbox {
    /// Create a session and obtain a fresh address
    pub async fn open(api: Url) -> Result<Self, MailError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let reply: AddressReply = Self::call(&client, &api, &[("f", "get_email_address")]).await?;
        info!(address = %reply.email_addr, "opened disposable inbox");
        Ok(Self {
            client,
            api,
            sid_token: reply.sid_token,
            address: reply.email_addr,
        })
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        client: &Client,
        api: &Url,
        query: &[(&str, &str)],
    ) -> Result<T, MailError> {
        let response = client.get(api.clone()).query(query).send().await?;
        if !response.status().is_success() {
            return Err(MailError::Status(response.status()));
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| MailError::Payload(e.to_string()))
    }
}

#[async_trait]
impl Inbox for GuerrillaInbox {
    fn address(&self) -> &str {
        &self.address
    }

    async fn list_messages(&self, offset: usize) -> Result<Vec<MailSummary>, MailError> {
        let offset = offset.to_string();
        let reply: ListReply = Self::call(
            &self.client,
            &self.api,
            &[
                ("f", "get_email_list"),
                ("offset", &offset),
                ("sid_token", &self.sid_token),
            ],
        )
        .await?;
        reply.list.into_iter().map(RawMessage::into_summary).collect()
    }

    async fn fetch_body(&self, id: &str) -> Result<String, MailError> {
        let reply: BodyReply = Self::call(
            &self.client,
            &self.api,
            &[
                ("f", "fetch_email"),
                ("email_id", id),
                ("sid_token", &self.sid_token),
            ],
        )
        .await?;
        Ok(reply.mail_body)
    }
}
