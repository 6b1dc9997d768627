// components/release_downloader/src/mail/mod.rs
//! Waiting for emailed download links

mod guerrilla;
pub mod stub;

pub use guerrilla::{GuerrillaInbox, GUERRILLA_API};

use crate::error::{DownloadError, MailError};
use crate::platform::Platform;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Header data of one inbox message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailSummary {
    pub id: String,
    pub sender: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
}

/// A transient inbox the platform can mail download links to
#[async_trait]
pub trait Inbox: Send + Sync {
    fn address(&self) -> &str;

    /// One page of messages starting at `offset`, newest first
    async fn list_messages(&self, offset: usize) -> Result<Vec<MailSummary>, MailError>;

    async fn fetch_body(&self, id: &str) -> Result<String, MailError>;
}

/// Result of waiting for a delivery email
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Delivered(Url),
    TimedOut,
}

pub const POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const INBOX_PAGE_SIZE: usize = 20;
pub const DEFAULT_EMAIL_TIMEOUT: Duration = Duration::from_secs(30);

/// Polls an inbox for the platform's download notification
pub struct EmailWaiter {
    sender: String,
    subject_keyword: String,
    poll_interval: Duration,
    page_size: usize,
    link_pattern: Regex,
}

impl EmailWaiter {
    pub fn new(platform: &Platform) -> Self {
        let pattern = format!(
            r#"<a href="(?P<url>{}/download[^"]*)">"#,
            regex::escape(platform.link_prefix())
        );
        Self {
            sender: platform.notification_sender.clone(),
            subject_keyword: platform.subject_keyword.to_lowercase(),
            poll_interval: POLL_INTERVAL,
            page_size: INBOX_PAGE_SIZE,
            // Built from an escaped literal, always valid
            link_pattern: Regex::new(&pattern).expect("escaped link pattern"),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Whether a message may carry the link for a request made at `since`
    pub fn is_candidate(&self, message: &MailSummary, since: DateTime<Utc>) -> bool {
        message.sender.trim().eq_ignore_ascii_case(&self.sender)
            && message.subject.to_lowercase().contains(&self.subject_keyword)
            && message.received_at >= since
    }

    /// First download-page link in a message body
    pub fn extract_link(&self, body: &str) -> Option<Url> {
        let captures = self.link_pattern.captures(body)?;
        let raw = captures.name("url")?.as_str().replace("&amp;", "&");
        Url::parse(&raw).ok()
    }

    /// Poll `inbox` until a matching message yields a link or `timeout` passes
    ///
    /// Every message is examined once. A matching message without a link
    /// does not end the wait. Inbox errors are logged and retried on the
    /// next poll.
    pub async fn await_link(
        &self,
        inbox: &dyn Inbox,
        since: DateTime<Utc>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome, DownloadError> {
        let deadline = Instant::now() + timeout;
        let mut seen: HashSet<String> = HashSet::new();
        info!(address = inbox.address(), ?timeout, "waiting for download email");

        loop {
            if cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }

            if let Some(link) = self.scan(inbox, since, &mut seen).await {
                info!(%link, "download email received");
                return Ok(WaitOutcome::Delivered(link));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }
            let pause = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    async fn scan(
        &self,
        inbox: &dyn Inbox,
        since: DateTime<Utc>,
        seen: &mut HashSet<String>,
    ) -> Option<Url> {
        let mut offset = 0;
        loop {
            let messages = match inbox.list_messages(offset).await {
                Ok(messages) => messages,
                Err(error) => {
                    warn!(%error, offset, "failed to list inbox");
                    return None;
                }
            };

            for message in &messages {
                if seen.contains(&message.id) {
                    continue;
                }
                if !self.is_candidate(message, since) {
                    seen.insert(message.id.clone());
                    continue;
                }
                match inbox.fetch_body(&message.id).await {
                    Ok(body) => {
                        seen.insert(message.id.clone());
                        match self.extract_link(&body) {
                            Some(link) => return Some(link),
                            None => debug!(id = %message.id, "matching email carries no link"),
                        }
                    }
                    Err(error) => warn!(id = %message.id, %error, "failed to fetch email"),
                }
            }

            if messages.len() >= self.page_size {
                offset += self.page_size;
            } else {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::stub::InboxStub;
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    const LINK: &str = "https://bandcamp.com/download?from=email&id=12345&payment_id=9";

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn notification(id: &str, secs: i64) -> MailSummary {
        MailSummary {
            id: id.to_string(),
            sender: "noreply@bandcamp.com".to_string(),
            subject: "Your download of Free Album".to_string(),
            received_at: at(secs),
        }
    }

    fn body_with_link() -> String {
        format!(r#"<p>Enjoy!</p><a href="{}">Download</a>"#, LINK.replace('&', "&amp;"))
    }

    fn waiter() -> EmailWaiter {
        EmailWaiter::new(&Platform::default()).with_poll_interval(Duration::from_secs(3))
    }

    #[test]
    fn extracts_first_download_link() {
        let link = waiter().extract_link(&body_with_link()).unwrap();
        assert_eq!(link.as_str(), LINK);
        assert_eq!(waiter().extract_link(r#"<a href="https://evil.test/download">x</a>"#), None);
    }

    #[test]
    fn candidate_rules() {
        let waiter = waiter();
        let since = at(1_000);
        assert!(waiter.is_candidate(&notification("1", 1_000), since));
        assert!(!waiter.is_candidate(&notification("2", 999), since));

        let mut other_sender = notification("3", 1_001);
        other_sender.sender = "someone@else.test".to_string();
        assert!(!waiter.is_candidate(&other_sender, since));

        let mut other_subject = notification("4", 1_001);
        other_subject.subject = "Welcome".to_string();
        assert!(!waiter.is_candidate(&other_subject, since));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_message_is_never_matched() {
        let inbox = InboxStub::new("me@example.com");
        inbox.deliver(notification("old", 900), &body_with_link());

        let outcome = waiter()
            .await_link(&inbox, at(1_000), Duration::from_secs(30), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert_eq!(inbox.body_fetches("old"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn matching_message_is_read_once() {
        let inbox = InboxStub::new("me@example.com");
        inbox.deliver(notification("decoy", 1_001), "<p>no link here</p>");

        let outcome = waiter()
            .await_link(&inbox, at(1_000), Duration::from_secs(12), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert_eq!(inbox.body_fetches("decoy"), 1);
        assert!(inbox.list_calls() > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn link_arriving_later_is_delivered() {
        let inbox = std::sync::Arc::new(InboxStub::new("me@example.com"));
        inbox.deliver(notification("decoy", 1_001), "<p>no link here</p>");

        let later = inbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            later.deliver(notification("real", 1_010), &body_with_link());
        });

        let outcome = waiter()
            .await_link(inbox.as_ref(), at(1_000), Duration::from_secs(30), &CancellationToken::new())
            .await
            .unwrap();
        assert_matches!(outcome, WaitOutcome::Delivered(url) if url.as_str() == LINK);
    }

    #[tokio::test(start_paused = true)]
    async fn pages_through_full_inbox() {
        let inbox = InboxStub::new("me@example.com");
        for i in 0..25 {
            let mut filler = notification(&format!("filler-{i}"), 1_005);
            filler.subject = "Newsletter".to_string();
            inbox.deliver(filler, "");
        }
        inbox.deliver_oldest(notification("real", 1_001), &body_with_link());

        let outcome = waiter()
            .await_link(&inbox, at(1_000), Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();
        assert_matches!(outcome, WaitOutcome::Delivered(_));
    }

    #[tokio::test(start_paused = true)]
    async fn inbox_errors_do_not_end_the_wait() {
        let inbox = InboxStub::new("me@example.com");
        inbox.fail_next_listings(2);
        inbox.deliver(notification("real", 1_001), &body_with_link());

        let outcome = waiter()
            .await_link(&inbox, at(1_000), Duration::from_secs(30), &CancellationToken::new())
            .await
            .unwrap();
        assert_matches!(outcome, WaitOutcome::Delivered(_));
    }

    #[tokio::test]
    async fn cancellation_unwinds_wait() {
        let inbox = InboxStub::new("me@example.com");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = waiter()
            .await_link(&inbox, at(1_000), Duration::from_secs(30), &cancel)
            .await;
        assert_matches!(result, Err(DownloadError::Cancelled));
    }
}
