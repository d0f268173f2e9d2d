//! Fetch interception policy.
//!
//! Every intercepted request first gives the mutation queue a chance to drain,
//! then is classified and served:
//!
//! - **Mutation**: straight to the network, never cached. Offline non-read
//!   requests are queued and answered with `503` and the last known total.
//!   So are non-read requests made while older mutations are still queued,
//!   so that the origin sees them in order.
//! - **Avatar / Ordinary**: cache-first, then network. Avatars are never
//!   stored; offline they redirect to the placeholder image. Offline
//!   ordinary misses get `404 offline`.

use crate::queue::{reported_total, DrainOutcome};
use crate::{RequestClass, WorkerContext};
use http::StatusCode;
use pwakit_net::{Request, Response};
use tracing::{debug, error, info, warn};

/// Body of the synthetic response for an ordinary resource that can't be had.
pub const OFFLINE_BODY: &str = "offline";

/// Serve one intercepted request. Always produces a response.
pub async fn handle_fetch(ctx: &WorkerContext, request: Request) -> Response {
    // Captured once, before anything else can read it.
    let body = request.body_text();

    let backlog = drain_queue(ctx).await;

    let class = ctx.classifier.classify(&request.url);
    debug!(url = %request.url, method = %request.method, class = %class, "Intercepted request");

    match class {
        RequestClass::Mutation if backlog && !request.is_read_only() => {
            info!(
                url = %request.url,
                method = %request.method,
                "Older mutations pending, queueing"
            );
            offline_mutation(ctx, &request, &body).await
        }
        RequestClass::Mutation => fetch_mutation(ctx, &request, &body).await,
        RequestClass::Avatar | RequestClass::Ordinary => {
            fetch_cache_first(ctx, &request, class).await
        }
    }
}

/// Returns true when queued mutations were left behind.
async fn drain_queue(ctx: &WorkerContext) -> bool {
    let report = ctx
        .queue
        .drain(ctx.mutation_url(), ctx.network.as_ref(), &ctx.connectivity)
        .await;

    if let Some(total) = report.last_total.clone() {
        ctx.record_total(total).await;
    }

    if report.should_notify() {
        ctx.notify_processed().await;
    }

    match &report.outcome {
        DrainOutcome::Halted { token, error } => {
            warn!(
                token = %token,
                replayed = report.replayed,
                category = error.category(),
                "Replay halted, remaining mutations stay queued"
            );
            true
        }
        DrainOutcome::StoreUnavailable(e) => {
            warn!(error = %e, category = e.category(), "Replay skipped");
            // A store that can't be read can't take new records either.
            matches!(ctx.queue.is_empty().await, Ok(false))
        }
        DrainOutcome::Offline | DrainOutcome::Empty | DrainOutcome::Completed => false,
    }
}

async fn fetch_mutation(ctx: &WorkerContext, request: &Request, body: &str) -> Response {
    if !ctx.connectivity.is_online() {
        return offline_mutation(ctx, request, body).await;
    }

    match ctx.network.fetch(request).await {
        Ok(response) => {
            info!(url = %request.url, status = %response.status, "Got from network");
            if let Some(total) = reported_total(&request.method, &response) {
                ctx.record_total(total).await;
            }
            response
        }
        Err(e) => {
            debug!(url = %request.url, error = %e, "Mutation request failed");
            offline_mutation(ctx, request, body).await
        }
    }
}

async fn fetch_cache_first(
    ctx: &WorkerContext,
    request: &Request,
    class: RequestClass,
) -> Response {
    if request.is_read_only() {
        if let Some(hit) = ctx.caches.match_url(&request.url).await {
            info!(url = %request.url, "Got from cache");
            return hit.to_response();
        }
    }

    if !ctx.connectivity.is_online() {
        return offline_resource(ctx, request, class);
    }

    match ctx.network.fetch(request).await {
        Ok(response) => {
            info!(url = %request.url, status = %response.status, "Got from network");
            if class == RequestClass::Ordinary
                && request.method == http::Method::GET
                && response.ok()
            {
                ctx.current_cache().await.put(&request.url, &response).await;
            }
            response
        }
        Err(e) => {
            debug!(url = %request.url, error = %e, "Network fetch failed");
            offline_resource(ctx, request, class)
        }
    }
}

async fn offline_mutation(ctx: &WorkerContext, request: &Request, body: &str) -> Response {
    if !request.is_read_only() {
        if let Err(e) = ctx.queue.enqueue(&request.method, body).await {
            // The mutation is lost, but the page still gets an answer.
            error!(
                url = %request.url,
                method = %request.method,
                error = %e,
                category = e.category(),
                "Failed to queue mutation"
            );
        }
    }
    Response::synthetic(StatusCode::SERVICE_UNAVAILABLE, ctx.last_total().await)
}

fn offline_resource(ctx: &WorkerContext, request: &Request, class: RequestClass) -> Response {
    match class {
        RequestClass::Avatar => {
            info!(url = %request.url, "Using generic avatar");
            Response::redirect(ctx.placeholder_url())
        }
        _ => {
            error!(url = %request.url, "Failed to get");
            Response::synthetic(StatusCode::NOT_FOUND, OFFLINE_BODY)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WorkerContextBuilder;
    use bytes::Bytes;
    use http::Method;
    use pwakit_common::WorkerConfig;
    use pwakit_idb::{KeyValueStore, MemoryStore};
    use pwakit_net::{Connectivity, MockNetwork, MockReply, ResponseSource, Url};
    use std::sync::Arc;

    const TOTAL: &str = "http://localhost:3000/total";

    struct Harness {
        ctx: Arc<WorkerContext>,
        network: MockNetwork,
        store: MemoryStore,
        connectivity: Connectivity,
    }

    fn harness() -> Harness {
        let network = MockNetwork::new();
        let store = MemoryStore::new("my-db", "my-store");
        let connectivity = Connectivity::online();
        let ctx = WorkerContextBuilder::new(WorkerConfig::default())
            .network(Arc::new(network.clone()))
            .store(Arc::new(store.clone()))
            .connectivity(connectivity.clone())
            .build()
            .unwrap();
        Harness {
            ctx,
            network,
            store,
            connectivity,
        }
    }

    fn get(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    fn post_total(body: &str) -> Request {
        Request::post(Url::parse(TOTAL).unwrap(), body.to_string())
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let h = harness();
        let url = Url::parse("http://localhost:3000/demo.css").unwrap();
        h.ctx
            .current_cache()
            .await
            .put(&url, &Response::new(StatusCode::OK, "cached"))
            .await;

        let response = handle_fetch(&h.ctx, get(url.as_str())).await;

        assert_eq!(response.body, Bytes::from("cached"));
        assert_eq!(response.source, ResponseSource::Cache);
        assert_eq!(h.network.request_count(), 0);
    }

    #[tokio::test]
    async fn test_miss_is_fetched_and_cached() {
        let h = harness();
        h.network.route("http://localhost:3000/demo.js", MockReply::ok("js"));

        let first = handle_fetch(&h.ctx, get("http://localhost:3000/demo.js")).await;
        let second = handle_fetch(&h.ctx, get("http://localhost:3000/demo.js")).await;

        assert_eq!(first.source, ResponseSource::Network);
        assert_eq!(second.source, ResponseSource::Cache);
        assert_eq!(second.body, first.body);
        assert_eq!(h.network.request_count(), 1);
    }

    #[tokio::test]
    async fn test_error_status_is_not_cached() {
        let h = harness();

        let response = handle_fetch(&h.ctx, get("http://localhost:3000/nope")).await;

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.source, ResponseSource::Network);
        assert!(h.ctx.current_cache().await.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_avatar_is_never_cached() {
        let h = harness();
        let avatar = "https://avatars0.githubusercontent.com/u/1?v=4";
        h.network.route(avatar, MockReply::ok("png"));

        handle_fetch(&h.ctx, get(avatar)).await;
        handle_fetch(&h.ctx, get(avatar)).await;

        assert_eq!(h.network.request_count(), 2);
        assert!(h.ctx.current_cache().await.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_offline_avatar_redirects() {
        let h = harness();
        h.connectivity.set_online(false);

        let avatar = get("https://avatars0.githubusercontent.com/u/1");
        let response = handle_fetch(&h.ctx, avatar).await;

        assert_eq!(response.status, StatusCode::FOUND);
        assert_eq!(
            response.location(),
            Some("http://localhost:3000/images/avatar.jpg")
        );
    }

    #[tokio::test]
    async fn test_failed_avatar_fetch_redirects_while_online() {
        let h = harness();
        h.network.set_down(true);

        let avatar = get("https://avatars0.githubusercontent.com/u/1");
        let response = handle_fetch(&h.ctx, avatar).await;
        assert_eq!(response.status, StatusCode::FOUND);
    }

    #[tokio::test]
    async fn test_offline_ordinary_is_not_found() {
        let h = harness();
        h.connectivity.set_online(false);

        let response = handle_fetch(&h.ctx, get("http://localhost:3000/missing.css")).await;

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.text(), OFFLINE_BODY);
        assert_eq!(h.network.request_count(), 0);
        assert!(h.store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_online_mutation_is_verbatim_and_uncached() {
        let h = harness();
        h.network
            .push_reply(TOTAL, MockReply::status(StatusCode::INTERNAL_SERVER_ERROR, "boom"));

        let response = handle_fetch(&h.ctx, get(TOTAL)).await;

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.text(), "boom");
        assert!(h.ctx.current_cache().await.keys().await.is_empty());
        assert!(h.store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_mutation_is_queued() {
        let h = harness();
        h.connectivity.set_online(false);

        let response = handle_fetch(&h.ctx, post_total("5")).await;

        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.text(), "0");
        let pending = h.ctx.queue.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].method, "POST");
        assert_eq!(pending[0].body, "5");
    }

    #[tokio::test]
    async fn test_offline_read_of_mutation_endpoint_is_not_queued() {
        let h = harness();
        h.connectivity.set_online(false);

        let response = handle_fetch(&h.ctx, get(TOTAL)).await;

        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(h.ctx.queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_mutation_fetch_is_queued() {
        let h = harness();
        h.network.push_reply(TOTAL, MockReply::Fail);

        let response =
            handle_fetch(&h.ctx, Request::new(Method::DELETE, Url::parse(TOTAL).unwrap())).await;

        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(h.ctx.queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_offline_503_carries_last_known_total() {
        let h = harness();
        h.network.route(TOTAL, MockReply::ok("42"));
        handle_fetch(&h.ctx, get(TOTAL)).await;

        h.connectivity.set_online(false);
        let response = handle_fetch(&h.ctx, post_total("1")).await;

        assert_eq!(response.text(), "42");
    }

    #[tokio::test]
    async fn test_store_unavailable_fails_soft() {
        let h = harness();
        h.store.set_available(false);
        h.connectivity.set_online(false);

        let response = handle_fetch(&h.ctx, post_total("5")).await;

        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.text(), "0");
    }

    #[tokio::test]
    async fn test_queued_mutations_replay_before_current_request() {
        let h = harness();
        h.connectivity.set_online(false);
        handle_fetch(&h.ctx, post_total("5")).await;
        handle_fetch(&h.ctx, post_total("3")).await;

        h.connectivity.set_online(true);
        h.network.set_handler(|r| MockReply::ok(r.body_text()));
        handle_fetch(&h.ctx, post_total("1")).await;

        let bodies: Vec<_> = h.network.requests().into_iter().map(|r| r.body).collect();
        assert_eq!(bodies, vec!["5", "3", "1"]);
        assert!(h.ctx.queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_new_mutation_queues_behind_halted_replay() {
        let h = harness();
        h.connectivity.set_online(false);
        handle_fetch(&h.ctx, post_total("5")).await;

        h.connectivity.set_online(true);
        h.network
            .push_reply(TOTAL, MockReply::status(StatusCode::SERVICE_UNAVAILABLE, ""));
        h.network.set_handler(|r| MockReply::ok(r.body_text()));

        let response = handle_fetch(&h.ctx, post_total("1")).await;

        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        let queued: Vec<_> = h
            .ctx
            .queue
            .pending()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.body)
            .collect();
        assert_eq!(queued, vec!["5", "1"]);

        handle_fetch(&h.ctx, get("http://localhost:3000/demo.css")).await;

        let bodies: Vec<_> = h
            .network
            .requests_to(&Url::parse(TOTAL).unwrap())
            .into_iter()
            .map(|r| r.body)
            .collect();
        assert_eq!(bodies, vec!["5", "5", "1"]);
        assert!(h.ctx.queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_read_of_mutation_endpoint_passes_halted_replay() {
        let h = harness();
        h.connectivity.set_online(false);
        handle_fetch(&h.ctx, post_total("5")).await;

        h.connectivity.set_online(true);
        h.network.push_reply(TOTAL, MockReply::Fail);
        h.network.route(TOTAL, MockReply::ok("0"));

        let response = handle_fetch(&h.ctx, get(TOTAL)).await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(h.ctx.queue.len().await.unwrap(), 1);
    }
}
