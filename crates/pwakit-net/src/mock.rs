//! Scripted, recording [`Network`] for tests and dry runs.

use crate::{NetError, Network, Request, Response};
use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::trace;
use url::Url;

/// One scripted outcome.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Respond with a status and body.
    Respond { status: StatusCode, body: Bytes },
    /// Fail as if the network were down.
    Fail,
}

impl MockReply {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::Respond {
            status: StatusCode::OK,
            body: body.into(),
        }
    }

    pub fn status(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self::Respond {
            status,
            body: body.into(),
        }
    }
}

/// A request as the mock saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub body: String,
}

type Handler = Arc<dyn Fn(&Request) -> MockReply + Send + Sync>;

#[derive(Default)]
struct MockState {
    scripted: HashMap<String, VecDeque<MockReply>>,
    routes: HashMap<String, MockReply>,
    handler: Option<Handler>,
    log: Vec<RecordedRequest>,
}

/// A [`Network`] whose replies are scripted per URL.
///
/// Lookup order for each request: one-shot scripted replies for the URL,
/// then the standing route for the URL, then the handler, then `404`.
/// Every request is recorded, including those that fail.
#[derive(Clone, Default)]
pub struct MockNetwork {
    state: Arc<Mutex<MockState>>,
    down: Arc<AtomicBool>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a standing reply for a URL.
    pub fn route(&self, url: &str, reply: MockReply) -> &Self {
        self.lock().routes.insert(url.to_string(), reply);
        self
    }

    /// Queue a one-shot reply for a URL, consumed before the standing route.
    pub fn push_reply(&self, url: &str, reply: MockReply) -> &Self {
        self.lock()
            .scripted
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Answer unmatched requests with a closure.
    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&Request) -> MockReply + Send + Sync + 'static,
    {
        self.lock().handler = Some(Arc::new(handler));
    }

    /// Make every request fail until brought back up.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// All requests seen so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().log.clone()
    }

    /// Requests seen for one URL.
    pub fn requests_to(&self, url: &Url) -> Vec<RecordedRequest> {
        self.lock()
            .log
            .iter()
            .filter(|r| r.url == url.as_str())
            .cloned()
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.lock().log.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // A panic while holding the lock only happens inside a failing test.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reply_for(&self, request: &Request) -> MockReply {
        let key = request.url.as_str();
        let handler = {
            let mut state = self.lock();
            state.log.push(RecordedRequest {
                method: request.method.clone(),
                url: key.to_string(),
                body: request.body_text(),
            });

            if self.down.load(Ordering::SeqCst) {
                return MockReply::Fail;
            }
            if let Some(reply) = state.scripted.get_mut(key).and_then(|q| q.pop_front()) {
                return reply;
            }
            if let Some(reply) = state.routes.get(key) {
                return reply.clone();
            }
            state.handler.clone()
        };

        match handler {
            Some(handler) => handler(request),
            None => MockReply::status(StatusCode::NOT_FOUND, Bytes::new()),
        }
    }
}

#[async_trait]
impl Network for MockNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        trace!(url = %request.url, method = %request.method, "Mock fetch");
        match self.reply_for(request) {
            MockReply::Respond { status, body } => {
                Ok(Response::new(status, body).with_url(request.url.clone()))
            }
            MockReply::Fail => Err(NetError::unavailable(format!(
                "mock network refused {}",
                request.url
            ))),
        }
    }
}
