//! # PwaKit Service Worker
//!
//! Offline cache-and-replay engine for a progressive web app.
//!
//! ## Features
//!
//! - **Classification**: avatar image, counter mutation, or ordinary resource
//! - **Cache-first fetch**: static resources served from the current cache
//! - **Offline fallbacks**: placeholder avatar, synthetic `503`/`404`
//! - **Mutation queue**: failed counter updates persisted and replayed in order
//! - **Lifecycle**: manifest pre-caching on install, stale cache eviction on activate
//! - **Clients**: controlled pages notified when queued actions are processed
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorker (event adapter: install / activate / fetch / message)
//!     │
//!     └── WorkerContext
//!             ├── Classifier
//!             ├── CacheStorage ── Cache ── URL → CachedResource
//!             ├── MutationQueue ── KeyValueStore (token → {method, body})
//!             ├── Network + Connectivity
//!             └── Clients
//! ```
//!
//! [`handle_fetch`] is the whole per-request policy. It takes a request and a
//! context and always produces a response.

use pwakit_common::CommonError;
use pwakit_idb::IdbError;
use pwakit_net::NetError;
use thiserror::Error;

pub mod cache;
pub mod classify;
pub mod clients;
pub mod context;
pub mod fetch;
pub mod lifecycle;
pub mod queue;
pub mod worker;

pub use cache::{Cache, CacheStorage, CachedResource};
pub use classify::{Classifier, RequestClass};
pub use clients::{ClientId, Clients};
pub use context::{WorkerContext, WorkerContextBuilder};
pub use fetch::handle_fetch;
pub use lifecycle::{activate, install, ActivationReport};
pub use queue::{DrainOutcome, DrainReport, MutationQueue, PendingMutation, Token};
pub use worker::{ServiceWorker, WorkerEvent, WorkerHandle, WorkerState};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Store error: {0}")]
    Store(#[from] IdbError),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Bad status {status} for {url}")]
    BadStatus { url: String, status: u16 },

    #[error("Replay failed for token {token}: {reason}")]
    ReplayFailed { token: i64, reason: String },

    #[error("State error: {0}")]
    StateError(String),

    #[error("Config error: {0}")]
    Config(#[from] CommonError),
}

impl ServiceWorkerError {
    /// Short label for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            ServiceWorkerError::Network(_) => "network_unavailable",
            ServiceWorkerError::Store(IdbError::StoreUnavailable(_)) => "store_unavailable",
            ServiceWorkerError::Store(_) => "store_data",
            ServiceWorkerError::CacheError(_) => "cache",
            ServiceWorkerError::BadStatus { .. } => "bad_status",
            ServiceWorkerError::ReplayFailed { .. } => "replay_failed",
            ServiceWorkerError::StateError(_) => "state",
            ServiceWorkerError::Config(_) => "config",
        }
    }
}
