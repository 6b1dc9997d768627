// components/release_downloader/src/mail/stub.rs
//! In-memory inbox for tests and offline runs

use super::{Inbox, MailSummary, INBOX_PAGE_SIZE};
use crate::error::MailError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

#[derive(Default)]
struct State {
    /// Newest first
    messages: VecDeque<(MailSummary, String)>,
    body_fetches: HashMap<String, usize>,
    list_calls: usize,
    failing_listings: usize,
}

pub struct InboxStub {
    address: String,
    page_size: usize,
    state: Mutex<State>,
}

impl InboxStub {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            page_size: INBOX_PAGE_SIZE,
            state: Mutex::new(State::default()),
        }
    }

    /// Add a message as the newest in the inbox
    pub fn deliver(&self, summary: MailSummary, body: &str) {
        self.state
            .lock()
            .messages
            .push_front((summary, body.to_string()));
    }

    /// Add a message as the oldest in the inbox
    pub fn deliver_oldest(&self, summary: MailSummary, body: &str) {
        self.state
            .lock()
            .messages
            .push_back((summary, body.to_string()));
    }

    /// Make the next `count` listings fail
    pub fn fail_next_listings(&self, count: usize) {
        self.state.lock().failing_listings = count;
    }

    pub fn body_fetches(&self, id: &str) -> usize {
        self.state.lock().body_fetches.get(id).copied().unwrap_or(0)
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }
}

#[async_trait]
impl Inbox for InboxStub {
    fn address(&self) -> &str {
        &self.address
    }

    async fn list_messages(&self, offset: usize) -> Result<Vec<MailSummary>, MailError> {
        let mut state = self.state.lock();
        state.list_calls += 1;
        if state.failing_listings > 0 {
            state.failing_listings -= 1;
            return Err(MailError::Payload("inbox unavailable".to_string()));
        }
        Ok(state
            .messages
            .iter()
            .skip(offset)
            .take(self.page_size)
            .map(|(summary, _)| summary.clone())
            .collect())
    }

    async fn fetch_body(&self, id: &str) -> Result<String, MailError> {
        let mut state = self.state.lock();
        *state.body_fetches.entry(id.to_string()).or_default() += 1;
        state
            .messages
            .iter()
            .find(|(summary, _)| summary.id == id)
            .map(|(_, body)| body.clone())
            .ok_or_else(|| MailError::Payload(format!("no message {id}")))
    }
}
