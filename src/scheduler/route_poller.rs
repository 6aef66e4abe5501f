//! Route poller: keeps the in-memory registry in sync with the database.
//!
//! Admin operations reload the registry themselves, so this loop only
//! matters for changes made out of band (another process writing the same
//! database, manual edits). Each tick is a full reload and is idempotent.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::registry::RouteRegistry;
use crate::repository::ServiceRepository;

pub fn spawn_route_poller(
    registry: RouteRegistry,
    repo: Arc<dyn ServiceRepository>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(interval_seconds = interval.as_secs(), "route poller started");
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = registry.reload(repo.as_ref()).await {
                        tracing::error!(error = %e, "route poller failed to reload registry");
                    }
                }
            }
        }

        tracing::info!("route poller stopped");
    })
}
