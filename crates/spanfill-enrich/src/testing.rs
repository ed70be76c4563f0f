//! Test doubles for the search client

use crate::client::{SearchClient, SearchHit, SearchRequest};
use crate::error::{LookupError, LookupResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Canned answer for [`MockSearchClient`]
pub enum Reply {
    Hits(Vec<SearchHit>),
    /// Answer with only the canned hits whose trace id was requested
    MatchRequested(Vec<SearchHit>),
    Fail(fn() -> LookupError),
}

/// Records every request and close, answers from a canned [`Reply`]
pub struct MockSearchClient {
    reply: Mutex<Reply>,
    delay: Option<Duration>,
    pub requests: Mutex<Vec<SearchRequest>>,
    pub closes: AtomicUsize,
}

impl MockSearchClient {
    pub fn new(reply: Reply) -> Self {
        Self {
            reply: Mutex::new(reply),
            delay: None,
            requests: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn search_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchClient for MockSearchClient {
    async fn search(&self, request: &SearchRequest) -> LookupResult<Vec<SearchHit>> {
        self.requests.lock().push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &*self.reply.lock() {
            Reply::Hits(hits) => Ok(hits.clone()),
            Reply::MatchRequested(hits) => Ok(hits
                .iter()
                .filter(|hit| {
                    hit.field_str(&request.trace_id_field)
                        .is_some_and(|id| request.trace_ids.iter().any(|t| t == id))
                })
                .cloned()
                .collect()),
            Reply::Fail(make_error) => Err(make_error()),
        }
    }

    fn close(&self) -> LookupResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
