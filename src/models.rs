use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Approval state of a snapshot.
///
/// `UserApproved` is only ever set by an explicit admin action,
/// `SystemApproved` only by the check scheduler when the fingerprint matches
/// the last approved one, and `Unapproved` marks drift awaiting review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ApprovalStatus {
    UserApproved,
    SystemApproved,
    Unapproved,
}

impl ApprovalStatus {
    pub fn is_approved(self) -> bool {
        matches!(self, ApprovalStatus::UserApproved | ApprovalStatus::SystemApproved)
    }
}

/// A registered upstream MCP service.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub upstream_url: String,
    pub enabled: bool,
    pub check_frequency_minutes: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A stored observation of an upstream's capability surface.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Snapshot {
    pub id: i64,
    pub service_id: i64,
    pub payload: String,
    pub hash: String,
    pub status: ApprovalStatus,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
    pub upstream_url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub check_frequency_minutes: i64,
}

fn default_enabled() -> bool {
    true
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateServiceRequest {
    pub upstream_url: Option<String>,
    pub enabled: Option<bool>,
    pub check_frequency_minutes: Option<i64>,
}

/// Service row joined with the status of its most recent snapshot, as shown
/// in admin listings.
#[derive(Debug, Serialize)]
pub struct ServiceWithStatus {
    #[serde(flatten)]
    pub service: Service,
    pub latest_snapshot_status: Option<ApprovalStatus>,
    pub latest_approved_hash: Option<String>,
}

/// Snapshot without its payload, for listings.
#[derive(Debug, Serialize, FromRow)]
pub struct SnapshotSummary {
    pub id: i64,
    pub hash: String,
    pub status: ApprovalStatus,
    pub created_at: i64,
}

impl From<&Snapshot> for SnapshotSummary {
    fn from(s: &Snapshot) -> Self {
        SnapshotSummary {
            id: s.id,
            hash: s.hash.clone(),
            status: s.status,
            created_at: s.created_at,
        }
    }
}
