//! Durable storage for services and their snapshots.
//!
//! The trait is the repository contract the rest of the system programs
//! against; [`SqliteServiceRepository`] is the only production
//! implementation. Snapshot rows are append-only: the single permitted
//! mutation is the status flip performed by [`ServiceRepository::approve_latest`].

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::config::SeedService;
use crate::error::{AppError, Result};
use crate::models::{
    ApprovalStatus, Service, ServiceWithStatus, Snapshot, UpdateServiceRequest,
};

const SERVICE_COLUMNS: &str =
    "id, name, upstream_url, enabled, check_frequency_minutes, created_at, updated_at";
const SNAPSHOT_COLUMNS: &str = "id, service_id, payload, hash, status, created_at";

#[async_trait]
pub trait ServiceRepository: Send + Sync {
    async fn create_service(
        &self,
        name: &str,
        upstream_url: &str,
        enabled: bool,
        check_frequency_minutes: i64,
    ) -> Result<Service>;

    async fn get_service(&self, name: &str) -> Result<Option<Service>>;

    /// All services with the status of their most recent snapshot and the
    /// hash of their most recent approved one, ordered by name.
    async fn list_services(&self) -> Result<Vec<ServiceWithStatus>>;

    async fn update_service(&self, name: &str, patch: &UpdateServiceRequest) -> Result<Service>;

    /// Deletes a service; snapshots cascade. Returns false when absent.
    async fn delete_service(&self, name: &str) -> Result<bool>;

    async fn insert_snapshot(
        &self,
        service_id: i64,
        payload: &str,
        hash: &str,
        status: ApprovalStatus,
    ) -> Result<i64>;

    async fn latest_snapshot(&self, service_id: i64) -> Result<Option<Snapshot>>;

    /// Most recent snapshot whose status is user or system approved.
    async fn latest_approved_snapshot(&self, service_id: i64) -> Result<Option<Snapshot>>;

    /// Most-recent-first snapshot history.
    async fn list_snapshots(&self, service_id: i64, limit: i64) -> Result<Vec<Snapshot>>;

    /// Enabled services with a positive check frequency whose newest
    /// snapshot is at least `check_frequency_minutes` old at `now` (unix
    /// seconds), or which have no snapshot at all.
    async fn services_due_for_check(&self, now: i64) -> Result<Vec<Service>>;

    /// Stores the drifted snapshot as `unapproved` and disables the service
    /// in one transaction, so readers observe both effects or neither.
    async fn record_drift(&self, service_id: i64, payload: &str, hash: &str) -> Result<()>;

    /// Flips the latest snapshot to `user_approved` (a no-op when it already
    /// is approved) and re-enables the service.
    async fn approve_latest(&self, service_id: i64) -> Result<Snapshot>;

    /// Idempotent seeding: inserts the service together with its initial
    /// `user_approved` snapshot, or returns `None` when the name exists.
    async fn upsert_service_from_config(
        &self,
        seed: &SeedService,
        payload: &str,
        hash: &str,
    ) -> Result<Option<Service>>;
}

/// Validates a service name against `[A-Za-z0-9_-]`, length 1 to 64.
pub fn validate_name(name: &str) -> Result<()> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if name.is_empty() || name.len() > 64 || !valid_chars {
        return Err(AppError::Validation(format!(
            "Service name must match [A-Za-z0-9_-], length 1-64, got '{name}'"
        )));
    }
    Ok(())
}

pub fn validate_frequency(minutes: i64, min_check_frequency: i64) -> Result<()> {
    if minutes < 0 || (minutes > 0 && minutes < min_check_frequency) {
        return Err(AppError::Validation(format!(
            "Check frequency must be 0 or >= {min_check_frequency} minutes"
        )));
    }
    Ok(())
}

fn validate_upstream_url(url: &str) -> Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(AppError::Validation(format!(
            "Upstream URL must be an absolute http(s) URL, got '{url}'"
        )));
    }
    Ok(())
}

pub struct SqliteServiceRepository {
    pool: SqlitePool,
    min_check_frequency: i64,
}

impl SqliteServiceRepository {
    pub fn new(pool: SqlitePool, min_check_frequency: i64) -> Self {
        Self {
            pool,
            min_check_frequency,
        }
    }

    async fn fetch_service(&self, name: &str) -> Result<Service> {
        self.get_service(name)
            .await?
            .ok_or_else(|| AppError::ServiceNotFound(name.to_string()))
    }
}

#[async_trait]
impl ServiceRepository for SqliteServiceRepository {
    async fn create_service(
        &self,
        name: &str,
        upstream_url: &str,
        enabled: bool,
        check_frequency_minutes: i64,
    ) -> Result<Service> {
        validate_name(name)?;
        validate_upstream_url(upstream_url)?;
        validate_frequency(check_frequency_minutes, self.min_check_frequency)?;

        if self.get_service(name).await?.is_some() {
            return Err(AppError::DuplicateName(name.to_string()));
        }

        let id = sqlx::query(
            "INSERT INTO services (name, upstream_url, enabled, check_frequency_minutes)
             VALUES (?, ?, ?, ?)",
        )
        .bind(name)
        .bind(upstream_url)
        .bind(enabled)
        .bind(check_frequency_minutes)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        let service = sqlx::query_as::<_, Service>(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services WHERE id = ?"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(service)
    }

    async fn get_service(&self, name: &str) -> Result<Option<Service>> {
        let service = sqlx::query_as::<_, Service>(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services WHERE name = ?"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(service)
    }

    async fn list_services(&self) -> Result<Vec<ServiceWithStatus>> {
        let rows = sqlx::query_as::<_, ServiceStatusRow>(
            "SELECT s.id, s.name, s.upstream_url, s.enabled, s.check_frequency_minutes,
                    s.created_at, s.updated_at,
                    (SELECT status FROM snapshots
                     WHERE service_id = s.id
                     ORDER BY created_at DESC, id DESC LIMIT 1) AS latest_snapshot_status,
                    (SELECT hash FROM snapshots
                     WHERE service_id = s.id
                       AND status IN ('user_approved', 'system_approved')
                     ORDER BY created_at DESC, id DESC LIMIT 1) AS latest_approved_hash
             FROM services s
             ORDER BY s.name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ServiceStatusRow::into_model).collect())
    }

    async fn update_service(&self, name: &str, patch: &UpdateServiceRequest) -> Result<Service> {
        let service = self.fetch_service(name).await?;

        let upstream_url = match &patch.upstream_url {
            Some(url) => {
                validate_upstream_url(url)?;
                url.clone()
            }
            None => service.upstream_url.clone(),
        };
        let enabled = patch.enabled.unwrap_or(service.enabled);
        let check_frequency_minutes = match patch.check_frequency_minutes {
            Some(minutes) => {
                validate_frequency(minutes, self.min_check_frequency)?;
                minutes
            }
            None => service.check_frequency_minutes,
        };

        sqlx::query(
            "UPDATE services
             SET upstream_url = ?, enabled = ?, check_frequency_minutes = ?,
                 updated_at = unixepoch()
             WHERE id = ?",
        )
        .bind(&upstream_url)
        .bind(enabled)
        .bind(check_frequency_minutes)
        .bind(service.id)
        .execute(&self.pool)
        .await?;

        self.fetch_service(name).await
    }

    async fn delete_service(&self, name: &str) -> Result<bool> {
        // Snapshots cascade via the foreign key.
        let result = sqlx::query("DELETE FROM services WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_snapshot(
        &self,
        service_id: i64,
        payload: &str,
        hash: &str,
        status: ApprovalStatus,
    ) -> Result<i64> {
        let id = sqlx::query(
            "INSERT INTO snapshots (service_id, payload, hash, status) VALUES (?, ?, ?, ?)",
        )
        .bind(service_id)
        .bind(payload)
        .bind(hash)
        .bind(status)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(id)
    }

    async fn latest_snapshot(&self, service_id: i64) -> Result<Option<Snapshot>> {
        let snapshot = sqlx::query_as::<_, Snapshot>(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots
             WHERE service_id = ?
             ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(snapshot)
    }

    async fn latest_approved_snapshot(&self, service_id: i64) -> Result<Option<Snapshot>> {
        let snapshot = sqlx::query_as::<_, Snapshot>(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots
             WHERE service_id = ? AND status IN ('user_approved', 'system_approved')
             ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(snapshot)
    }

    async fn list_snapshots(&self, service_id: i64, limit: i64) -> Result<Vec<Snapshot>> {
        let snapshots = sqlx::query_as::<_, Snapshot>(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots
             WHERE service_id = ?
             ORDER BY created_at DESC, id DESC
             LIMIT ?"
        ))
        .bind(service_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(snapshots)
    }

    async fn services_due_for_check(&self, now: i64) -> Result<Vec<Service>> {
        let services = sqlx::query_as::<_, Service>(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services s
             WHERE s.enabled = 1
               AND s.check_frequency_minutes > 0
               AND COALESCE((SELECT MAX(created_at) FROM snapshots
                             WHERE service_id = s.id), 0)
                   <= ? - s.check_frequency_minutes * 60
             ORDER BY s.name"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(services)
    }

    async fn record_drift(&self, service_id: i64, payload: &str, hash: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO snapshots (service_id, payload, hash, status) VALUES (?, ?, ?, ?)",
        )
        .bind(service_id)
        .bind(payload)
        .bind(hash)
        .bind(ApprovalStatus::Unapproved)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE services SET enabled = 0, updated_at = unixepoch() WHERE id = ?")
            .bind(service_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn approve_latest(&self, service_id: i64) -> Result<Snapshot> {
        let latest = self
            .latest_snapshot(service_id)
            .await?
            .ok_or_else(|| AppError::SnapshotNotFound(service_id.to_string()))?;

        let mut tx = self.pool.begin().await?;

        // Already-approved snapshots are left untouched so the audit trail
        // keeps its original status and timestamp.
        if latest.status == ApprovalStatus::Unapproved {
            sqlx::query("UPDATE snapshots SET status = ? WHERE id = ?")
                .bind(ApprovalStatus::UserApproved)
                .bind(latest.id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("UPDATE services SET enabled = 1, updated_at = unixepoch() WHERE id = ?")
            .bind(service_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let approved = self
            .latest_snapshot(service_id)
            .await?
            .ok_or_else(|| AppError::SnapshotNotFound(service_id.to_string()))?;
        Ok(approved)
    }

    async fn upsert_service_from_config(
        &self,
        seed: &SeedService,
        payload: &str,
        hash: &str,
    ) -> Result<Option<Service>> {
        validate_name(&seed.name)?;
        validate_upstream_url(&seed.upstream_url)?;
        validate_frequency(seed.check_frequency_minutes, self.min_check_frequency)?;

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO services (name, upstream_url, enabled, check_frequency_minutes)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(&seed.name)
        .bind(&seed.upstream_url)
        .bind(seed.enabled)
        .bind(seed.check_frequency_minutes)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let service_id = inserted.last_insert_rowid();
        sqlx::query(
            "INSERT INTO snapshots (service_id, payload, hash, status) VALUES (?, ?, ?, ?)",
        )
        .bind(service_id)
        .bind(payload)
        .bind(hash)
        .bind(ApprovalStatus::UserApproved)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let service = sqlx::query_as::<_, Service>(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services WHERE id = ?"
        ))
        .bind(service_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Some(service))
    }
}

#[derive(sqlx::FromRow)]
struct ServiceStatusRow {
    id: i64,
    name: String,
    upstream_url: String,
    enabled: bool,
    check_frequency_minutes: i64,
    created_at: i64,
    updated_at: i64,
    latest_snapshot_status: Option<ApprovalStatus>,
    latest_approved_hash: Option<String>,
}

impl ServiceStatusRow {
    fn into_model(self) -> ServiceWithStatus {
        ServiceWithStatus {
            service: Service {
                id: self.id,
                name: self.name,
                upstream_url: self.upstream_url,
                enabled: self.enabled,
                check_frequency_minutes: self.check_frequency_minutes,
                created_at: self.created_at,
                updated_at: self.updated_at,
            },
            latest_snapshot_status: self.latest_snapshot_status,
            latest_approved_hash: self.latest_approved_hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation_accepts_the_documented_alphabet() {
        assert!(validate_name("svc-1_A").is_ok());
        assert!(validate_name(&"a".repeat(64)).is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name(&"a".repeat(65)).is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name("dots.break").is_err());
    }

    #[test]
    fn frequency_validation_honors_floor_and_zero() {
        assert!(validate_frequency(0, 5).is_ok());
        assert!(validate_frequency(5, 5).is_ok());
        assert!(validate_frequency(60, 5).is_ok());
        assert!(validate_frequency(3, 5).is_err());
        assert!(validate_frequency(-1, 5).is_err());
    }
}
