//! Durable queue of pending counter mutations and its replayer.

use crate::ServiceWorkerError;
use http::{header, HeaderValue, Method};
use pwakit_common::now_millis;
use pwakit_idb::{Key, KeyValueStore};
use pwakit_net::{Connectivity, Network, Request, Response, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

// ==================== Tokens ====================

/// Identity of a queued mutation. Ascending tokens are enqueue order.
///
/// Tokens are signed so that every numeric store key is a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub i64);

impl Token {
    pub fn key(&self) -> Key {
        Key::from(self.0)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Millisecond timestamps, bumped so that no two tokens are equal.
#[derive(Debug, Default)]
struct TokenClock {
    last: AtomicI64,
}

impl TokenClock {
    fn next(&self) -> Token {
        let now = i64::try_from(now_millis()).unwrap_or(i64::MAX);
        let mut last = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(last.saturating_add(1));
            match self
                .last
                .compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return Token(candidate),
                Err(actual) => last = actual,
            }
        }
    }

    /// Never issue a token at or below one already in the store.
    fn observe(&self, token: Token) {
        self.last.fetch_max(token.0, Ordering::SeqCst);
    }
}

// ==================== Records ====================

/// A mutation that could not reach the origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
    pub token: Token,
    pub method: String,
    pub body: String,
}

/// Value stored under a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMutation {
    method: String,
    body: String,
}

// ==================== Drain results ====================

/// How a drain pass ended.
#[derive(Debug)]
pub enum DrainOutcome {
    /// Connectivity was offline; nothing was attempted.
    Offline,
    /// The queue was already empty.
    Empty,
    /// Every record was replayed and removed.
    Completed,
    /// Replay stopped at `token`, which stays queued with everything after it.
    Halted {
        token: Token,
        error: ServiceWorkerError,
    },
    /// The durable store could not be read or updated.
    StoreUnavailable(ServiceWorkerError),
}

/// Result of one drain pass.
#[derive(Debug)]
pub struct DrainReport {
    /// Records delivered and removed during this pass.
    pub replayed: usize,
    /// Counter total reported by the last successful replay.
    pub last_total: Option<String>,
    pub outcome: DrainOutcome,
}

impl DrainReport {
    fn new(outcome: DrainOutcome) -> Self {
        Self {
            replayed: 0,
            last_total: None,
            outcome,
        }
    }

    /// Pages are told only when a non-empty queue was emptied.
    pub fn should_notify(&self) -> bool {
        self.replayed > 0 && matches!(self.outcome, DrainOutcome::Completed)
    }
}

// ==================== Queue ====================

/// FIFO queue of pending mutations held in a [`KeyValueStore`].
///
/// The queue is the only writer of the store. Drains within one process are
/// serialized; records deleted by anyone else are simply skipped.
pub struct MutationQueue {
    store: Arc<dyn KeyValueStore>,
    clock: TokenClock,
    drain_lock: Mutex<()>,
}

impl MutationQueue {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            clock: TokenClock::default(),
            drain_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Persist a mutation under a fresh token.
    pub async fn enqueue(&self, method: &Method, body: &str) -> Result<Token, ServiceWorkerError> {
        let token = self.clock.next();
        let record = StoredMutation {
            method: method.as_str().to_string(),
            body: body.to_string(),
        };
        let value = serde_json::to_value(&record)
            .map_err(|e| pwakit_idb::IdbError::DataError(e.to_string()))?;

        self.store.set(token.key(), value).await?;
        info!(token = %token, method = %method, "Queued mutation");
        Ok(token)
    }

    /// All decodable pending mutations, oldest first.
    pub async fn pending(&self) -> Result<Vec<PendingMutation>, ServiceWorkerError> {
        let mut pending = Vec::new();
        for key in self.store.keys().await? {
            let Some(token) = token_of(&key) else {
                continue;
            };
            if let Some(value) = self.store.get(&key).await? {
                if let Ok(record) = serde_json::from_value::<StoredMutation>(value) {
                    pending.push(PendingMutation {
                        token,
                        method: record.method,
                        body: record.body,
                    });
                }
            }
        }
        Ok(pending)
    }

    /// Number of queued records.
    pub async fn len(&self) -> Result<usize, ServiceWorkerError> {
        Ok(self
            .store
            .keys()
            .await?
            .iter()
            .filter(|k| token_of(k).is_some())
            .count())
    }

    pub async fn is_empty(&self) -> Result<bool, ServiceWorkerError> {
        Ok(self.len().await? == 0)
    }

    /// Replay queued mutations against `target` in ascending token order.
    ///
    /// Stops at the first failure, leaving that record and every later one
    /// queued. Does nothing while offline.
    pub async fn drain(
        &self,
        target: &Url,
        network: &dyn Network,
        connectivity: &Connectivity,
    ) -> DrainReport {
        if !connectivity.is_online() {
            debug!("Offline, skipping replay");
            return DrainReport::new(DrainOutcome::Offline);
        }

        let _guard = self.drain_lock.lock().await;

        let keys = match self.store.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Cannot read mutation queue");
                return DrainReport::new(DrainOutcome::StoreUnavailable(e.into()));
            }
        };

        let tokens: Vec<Token> = keys.iter().filter_map(token_of).collect();
        if tokens.is_empty() {
            return DrainReport::new(DrainOutcome::Empty);
        }

        let mut report = DrainReport::new(DrainOutcome::Completed);
        for token in tokens {
            self.clock.observe(token);

            let value = match self.store.get(&token.key()).await {
                Ok(Some(value)) => value,
                Ok(None) => {
                    debug!(token = %token, "Record already replayed");
                    continue;
                }
                Err(e) => {
                    report.outcome = DrainOutcome::StoreUnavailable(e.into());
                    return report;
                }
            };

            let request = match decode(token, target, value) {
                Some(request) => request,
                None => {
                    // Undecodable records can never be replayed.
                    if let Err(e) = self.store.delete(&token.key()).await {
                        report.outcome = DrainOutcome::StoreUnavailable(e.into());
                        return report;
                    }
                    continue;
                }
            };

            let response = match replay(token, network, &request).await {
                Ok(response) => response,
                Err(error) => {
                    warn!(token = %token, error = %error, "Replay failed, halting");
                    report.outcome = DrainOutcome::Halted { token, error };
                    return report;
                }
            };

            // Delete only after the origin accepted the mutation.
            if let Err(e) = self.store.delete(&token.key()).await {
                error!(token = %token, error = %e, "Replayed record could not be removed");
                report.outcome = DrainOutcome::StoreUnavailable(e.into());
                return report;
            }

            info!(token = %token, method = %request.method, "Replayed mutation");
            report.replayed += 1;
            if let Some(total) = reported_total(&request.method, &response) {
                report.last_total = Some(total);
            }
        }

        report
    }
}

fn token_of(key: &Key) -> Option<Token> {
    key.as_number().map(Token)
}

fn decode(token: Token, target: &Url, value: serde_json::Value) -> Option<Request> {
    let record: StoredMutation = match serde_json::from_value(value) {
        Ok(record) => record,
        Err(e) => {
            error!(token = %token, error = %e, "Dropping undecodable queued record");
            return None;
        }
    };
    let method = match Method::from_bytes(record.method.as_bytes()) {
        Ok(method) => method,
        Err(_) => {
            error!(
                token = %token,
                method = %record.method,
                "Dropping queued record with bad method"
            );
            return None;
        }
    };

    let mut request = Request::new(method, target.clone());
    if !record.body.is_empty() {
        request = request.with_body(record.body).header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain;charset=UTF-8"),
        );
    }
    Some(request)
}

/// 5xx and transport failures fail the replay; anything else was delivered.
async fn replay(
    token: Token,
    network: &dyn Network,
    request: &Request,
) -> Result<Response, ServiceWorkerError> {
    let response = network
        .fetch(request)
        .await
        .map_err(|e| ServiceWorkerError::ReplayFailed {
            token: token.0,
            reason: e.to_string(),
        })?;

    if response.status.is_server_error() {
        return Err(ServiceWorkerError::ReplayFailed {
            token: token.0,
            reason: format!("status {}", response.status),
        });
    }
    if !response.ok() {
        warn!(token = %token, status = %response.status, "Origin rejected replayed mutation");
    }
    Ok(response)
}

/// The counter total a successful mutation-endpoint response implies.
///
/// A reset answers with an empty body and leaves the total at zero.
pub(crate) fn reported_total(method: &Method, response: &Response) -> Option<String> {
    if !response.ok() {
        return None;
    }
    if *method == Method::DELETE {
        return Some("0".to_string());
    }
    let text = response.text();
    let total = text.trim();
    (!total.is_empty()).then(|| total.to_string())
}
