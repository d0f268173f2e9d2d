//! Event adapter between the host environment and the worker core.
//!
//! The host sends install, activate, fetch and message events over a channel.
//! Lifecycle events run one at a time on the worker task; each fetch runs on
//! its own task so slow requests don't hold up the rest.

use crate::{
    activate, handle_fetch, install, ActivationReport, ClientId, ServiceWorkerError, WorkerContext,
};
use pwakit_net::{Request, Response};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// ==================== State ====================

/// Service worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    #[default]
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    /// Install failed. Install may be attempted again.
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        })
    }
}

// ==================== Events ====================

type Reply<T> = oneshot::Sender<Result<T, ServiceWorkerError>>;

/// Events delivered to the worker.
#[derive(Debug)]
pub enum WorkerEvent {
    Install { reply: Reply<usize> },
    Activate { reply: Reply<ActivationReport> },
    Fetch { request: Request, reply: Reply<Response> },
    Message { client: Option<ClientId>, data: JsonValue },
}

// ==================== Worker ====================

/// The running worker task.
pub struct ServiceWorker {
    ctx: Arc<WorkerContext>,
    state: Arc<RwLock<WorkerState>>,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl ServiceWorker {
    /// Start the worker. It stops once every handle has been dropped.
    pub fn spawn(ctx: Arc<WorkerContext>) -> (WorkerHandle, JoinHandle<()>) {
        let (tx, events) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(WorkerState::Parsed));

        let worker = ServiceWorker {
            ctx,
            state: state.clone(),
            events,
        };
        let task = tokio::spawn(worker.run());

        (WorkerHandle { tx, state }, task)
    }

    async fn run(mut self) {
        info!("Service worker started");
        while let Some(event) = self.events.recv().await {
            match event {
                WorkerEvent::Install { reply } => {
                    let _ = reply.send(self.on_install().await);
                }
                WorkerEvent::Activate { reply } => {
                    let _ = reply.send(self.on_activate().await);
                }
                WorkerEvent::Fetch { request, reply } => self.on_fetch(request, reply).await,
                WorkerEvent::Message { client, data } => {
                    info!(client = ?client, data = %data, "Got message");
                }
            }
        }
        info!("Service worker stopped");
    }

    async fn transition(
        &self,
        allowed: &[WorkerState],
        next: WorkerState,
    ) -> Result<(), ServiceWorkerError> {
        let mut state = self.state.write().await;
        if !allowed.contains(&*state) {
            return Err(ServiceWorkerError::StateError(format!(
                "cannot move from {} to {}",
                *state, next
            )));
        }
        debug!(from = %*state, to = %next, "State change");
        *state = next;
        Ok(())
    }

    async fn set_state(&self, next: WorkerState) {
        *self.state.write().await = next;
    }

    async fn on_install(&self) -> Result<usize, ServiceWorkerError> {
        self.transition(&[WorkerState::Parsed, WorkerState::Redundant], WorkerState::Installing)
            .await?;

        match install(&self.ctx).await {
            Ok(count) => {
                self.set_state(WorkerState::Installed).await;
                Ok(count)
            }
            Err(e) => {
                warn!(error = %e, category = e.category(), "Install failed");
                self.set_state(WorkerState::Redundant).await;
                Err(e)
            }
        }
    }

    async fn on_activate(&self) -> Result<ActivationReport, ServiceWorkerError> {
        self.transition(&[WorkerState::Installed], WorkerState::Activating)
            .await?;

        match activate(&self.ctx).await {
            Ok(report) => {
                self.set_state(WorkerState::Activated).await;
                Ok(report)
            }
            Err(e) => {
                warn!(error = %e, "Activation failed");
                self.set_state(WorkerState::Redundant).await;
                Err(e)
            }
        }
    }

    async fn on_fetch(&self, request: Request, reply: Reply<Response>) {
        let state = *self.state.read().await;
        if state != WorkerState::Activated {
            let _ = reply.send(Err(ServiceWorkerError::StateError(format!(
                "fetch while {}",
                state
            ))));
            return;
        }

        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let response = handle_fetch(&ctx, request).await;
            let _ = reply.send(Ok(response));
        });
    }
}

// ==================== Handle ====================

/// Host-side handle for sending events to a running worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    tx: mpsc::UnboundedSender<WorkerEvent>,
    state: Arc<RwLock<WorkerState>>,
}

impl WorkerHandle {
    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    /// Run install and wait for it to finish.
    pub async fn install(&self) -> Result<usize, ServiceWorkerError> {
        self.request(|reply| WorkerEvent::Install { reply }).await
    }

    /// Run activation and wait for it to finish.
    pub async fn activate(&self) -> Result<ActivationReport, ServiceWorkerError> {
        self.request(|reply| WorkerEvent::Activate { reply }).await
    }

    /// Intercept a request.
    pub async fn fetch(&self, request: Request) -> Result<Response, ServiceWorkerError> {
        self.request(|reply| WorkerEvent::Fetch { request, reply }).await
    }

    /// Deliver a message from a page.
    pub fn post_message(
        &self,
        client: Option<ClientId>,
        data: JsonValue,
    ) -> Result<(), ServiceWorkerError> {
        self.tx
            .send(WorkerEvent::Message { client, data })
            .map_err(|_| stopped())
    }

    async fn request<T>(
        &self,
        event: impl FnOnce(Reply<T>) -> WorkerEvent,
    ) -> Result<T, ServiceWorkerError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(event(reply)).map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }
}

fn stopped() -> ServiceWorkerError {
    ServiceWorkerError::StateError("service worker stopped".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WorkerContextBuilder;
    use pwakit_common::WorkerConfig;
    use pwakit_idb::MemoryStore;
    use pwakit_net::{MockNetwork, MockReply, Url};
    use serde_json::json;

    fn spawn(network: &MockNetwork) -> (WorkerHandle, JoinHandle<()>) {
        let config = WorkerConfig {
            manifest: vec!["/".into()],
            ..Default::default()
        };
        let ctx = WorkerContextBuilder::new(config)
            .network(Arc::new(network.clone()))
            .store(Arc::new(MemoryStore::new("my-db", "my-store")))
            .build()
            .unwrap();
        ServiceWorker::spawn(ctx)
    }

    fn index() -> Request {
        Request::get(Url::parse("http://localhost:3000/").unwrap())
    }

    #[tokio::test]
    async fn test_lifecycle_then_fetch() {
        let network = MockNetwork::new();
        network.route("http://localhost:3000/", MockReply::ok("<html>"));
        let (handle, _task) = spawn(&network);

        assert_eq!(handle.state().await, WorkerState::Parsed);
        assert_eq!(handle.install().await.unwrap(), 1);
        assert_eq!(handle.state().await, WorkerState::Installed);
        handle.activate().await.unwrap();
        assert_eq!(handle.state().await, WorkerState::Activated);

        let response = handle.fetch(index()).await.unwrap();
        assert!(response.is_from_cache());
        assert_eq!(network.request_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_before_activation_is_rejected() {
        let (handle, _task) = spawn(&MockNetwork::new());
        let result = handle.fetch(index()).await;
        assert!(matches!(result, Err(ServiceWorkerError::StateError(_))));
    }

    #[tokio::test]
    async fn test_failed_install_is_redundant_and_retryable() {
        let network = MockNetwork::new();
        network.push_reply("http://localhost:3000/", MockReply::Fail);
        network.route("http://localhost:3000/", MockReply::ok("<html>"));
        let (handle, _task) = spawn(&network);

        assert!(handle.install().await.is_err());
        assert_eq!(handle.state().await, WorkerState::Redundant);
        assert!(handle.activate().await.is_err());

        assert_eq!(handle.install().await.unwrap(), 1);
        assert_eq!(handle.state().await, WorkerState::Installed);
    }

    #[tokio::test]
    async fn test_worker_stops_when_handles_drop() {
        let (handle, task) = spawn(&MockNetwork::new());
        handle.post_message(None, json!({"hello": "worker"})).unwrap();
        drop(handle);
        task.await.unwrap();
    }
}
