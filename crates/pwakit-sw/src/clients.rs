//! Page clients the worker can message.

use hashbrown::HashMap;
use pwakit_net::Url;
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

/// Client identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

#[derive(Debug)]
struct Client {
    url: Url,
    controlled: bool,
    sender: mpsc::UnboundedSender<JsonValue>,
}

/// Registry of open pages. Clones share the registry.
#[derive(Debug, Clone, Default)]
pub struct Clients {
    clients: Arc<RwLock<HashMap<ClientId, Client>>>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open page. It is uncontrolled until the worker claims it.
    pub async fn connect(&self, url: Url) -> (ClientId, mpsc::UnboundedReceiver<JsonValue>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = ClientId::new();
        debug!(client = %id, url = %url, "Client connected");
        self.clients.write().await.insert(
            id,
            Client {
                url,
                controlled: false,
                sender,
            },
        );
        (id, receiver)
    }

    pub async fn disconnect(&self, id: ClientId) -> bool {
        self.clients.write().await.remove(&id).is_some()
    }

    /// Take control of every open page. Returns how many were newly claimed.
    pub async fn claim(&self) -> usize {
        let mut clients = self.clients.write().await;
        let mut claimed = 0;
        for client in clients.values_mut().filter(|c| !c.controlled) {
            client.controlled = true;
            claimed += 1;
        }
        info!(claimed, "Claimed clients");
        claimed
    }

    pub async fn is_controlled(&self, id: ClientId) -> bool {
        self.clients
            .read()
            .await
            .get(&id)
            .map(|c| c.controlled)
            .unwrap_or(false)
    }

    /// Matching clients and their URLs, ordered by id.
    pub async fn match_all(&self, include_uncontrolled: bool) -> Vec<(ClientId, Url)> {
        let clients = self.clients.read().await;
        let mut matched: Vec<_> = clients
            .iter()
            .filter(|(_, c)| include_uncontrolled || c.controlled)
            .map(|(id, c)| (*id, c.url.clone()))
            .collect();
        matched.sort_by_key(|(id, _)| *id);
        matched
    }

    /// Post a message to every controlled client. Returns how many received it.
    ///
    /// Clients whose receiver has gone away are dropped from the registry.
    pub async fn post_all(&self, message: JsonValue) -> usize {
        let mut clients = self.clients.write().await;
        let mut delivered = 0;
        clients.retain(|id, client| {
            if !client.controlled {
                return true;
            }
            if client.sender.send(message.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                debug!(client = %id, "Dropping closed client");
                false
            }
        });
        delivered
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
