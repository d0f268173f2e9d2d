//! Install and activate steps.

use crate::{ServiceWorkerError, WorkerContext};
use tracing::{info, instrument};

/// What activation cleaned up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Stale cache names that were deleted.
    pub deleted: Vec<String>,
    /// Pages newly brought under control.
    pub claimed: usize,
}

/// Pre-cache the manifest into the current cache.
///
/// Either every manifest entry is cached or none is; the error tells the
/// caller to retry install.
#[instrument(skip(ctx), fields(cache = %ctx.config.cache_name))]
pub async fn install(ctx: &WorkerContext) -> Result<usize, ServiceWorkerError> {
    let urls = ctx.manifest_urls()?;
    let cache = ctx.current_cache().await;
    cache.add_all(ctx.network.as_ref(), &urls).await?;
    info!(count = urls.len(), "Installed");
    Ok(urls.len())
}

/// Delete every cache but the current one, then claim open pages.
#[instrument(skip(ctx), fields(cache = %ctx.config.cache_name))]
pub async fn activate(ctx: &WorkerContext) -> Result<ActivationReport, ServiceWorkerError> {
    let current = &ctx.config.cache_name;
    let mut report = ActivationReport::default();

    for name in ctx.caches.keys().await {
        if &name != current && ctx.caches.delete(&name).await {
            report.deleted.push(name);
        }
    }

    report.claimed = ctx.clients.claim().await;
    info!(deleted = report.deleted.len(), claimed = report.claimed, "Activated");
    Ok(report)
}
