//! Check scheduler: re-validates due services against their approved hash.
//!
//! Each tick asks the repository which services are due, then walks them
//! sequentially; the single-loop design is what guarantees that snapshots
//! for one service are never taken concurrently. A failed snapshot writes
//! nothing, so a flapping upstream leaves gaps in the audit trail but is
//! never disabled by accident.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::ApprovalStatus;
use crate::registry::RouteRegistry;
use crate::repository::ServiceRepository;
use crate::snapshot::Snapshotter;

pub fn spawn_check_scheduler(
    registry: RouteRegistry,
    repo: Arc<dyn ServiceRepository>,
    snapshotter: Snapshotter,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(interval_seconds = interval.as_secs(), "check scheduler started");
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    run_check_tick(repo.as_ref(), &snapshotter, &registry).await;
                }
            }
        }

        tracing::info!("check scheduler stopped");
    })
}

/// One scheduler pass: check every due service, then reload the registry if
/// any service was disabled along the way.
pub async fn run_check_tick(
    repo: &dyn ServiceRepository,
    snapshotter: &Snapshotter,
    registry: &RouteRegistry,
) {
    let now = chrono::Utc::now().timestamp();
    let due = match repo.services_due_for_check(now).await {
        Ok(due) => due,
        Err(e) => {
            tracing::error!(error = %e, "failed to query services due for check");
            return;
        }
    };

    if due.is_empty() {
        return;
    }
    tracing::debug!(count = due.len(), "services due for check");

    let mut any_disabled = false;
    for service in due {
        match check_service(repo, snapshotter, &service).await {
            Ok(disabled) => any_disabled |= disabled,
            Err(e) => {
                // One misbehaving upstream must not starve the rest of the
                // loop; the service keeps its current state and becomes due
                // again next tick.
                tracing::warn!(service = %service.name, error = %e, "check failed, skipping");
            }
        }
    }

    if any_disabled {
        tracing::info!("routing changed during checks, reloading route registry");
        if let Err(e) = registry.reload(repo).await {
            tracing::error!(error = %e, "failed to reload registry after checks");
        }
    }
}

/// Checks one service. Returns true when the service was disabled.
async fn check_service(
    repo: &dyn ServiceRepository,
    snapshotter: &Snapshotter,
    service: &crate::models::Service,
) -> anyhow::Result<bool> {
    tracing::info!(service = %service.name, "checking service");

    let outcome = snapshotter.snapshot(&service.upstream_url).await?;
    let payload = serde_json::to_string(&outcome.payload)?;

    let last_approved = repo.latest_approved_snapshot(service.id).await?;

    match last_approved {
        Some(approved) if approved.hash == outcome.hash => {
            tracing::info!(service = %service.name, hash = %outcome.hash, "capability surface unchanged");
            repo.insert_snapshot(
                service.id,
                &payload,
                &outcome.hash,
                ApprovalStatus::SystemApproved,
            )
            .await?;
            Ok(false)
        }
        Some(approved) => {
            tracing::warn!(
                service = %service.name,
                old_hash = %approved.hash,
                new_hash = %outcome.hash,
                "capability surface drifted, disabling service"
            );
            repo.record_drift(service.id, &payload, &outcome.hash).await?;
            Ok(true)
        }
        None => {
            tracing::warn!(service = %service.name, "no approved snapshot, disabling service");
            repo.record_drift(service.id, &payload, &outcome.hash).await?;
            Ok(true)
        }
    }
}
