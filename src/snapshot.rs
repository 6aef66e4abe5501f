//! Capability snapshotting.
//!
//! A snapshot is the normalized record of everything an upstream advertises:
//! the `initialize` result plus the four listing methods, exhaustively
//! paginated, with volatile fields stripped and each list sorted by its
//! stable key. The normalized payload is what gets stored (so diffs are
//! reproducible) and its RFC 8785 fingerprint is what drift detection
//! compares.
//!
//! Snapshotting is all-or-nothing: any upstream failure aborts the attempt
//! and nothing is persisted.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::canonical::{fingerprint, CanonicalizeError};
use crate::upstream::{UpstreamClient, UpstreamError};

/// `serverInfo` fields that fluctuate without a semantic capability change
/// and are stripped before hashing. Extending this list changes every
/// fingerprint, so it is versioned together with the payload layout below.
const VOLATILE_SERVER_INFO_FIELDS: &[&str] = &["build", "buildTime", "uptime", "instructions"];

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Canonicalize(#[from] CanonicalizeError),

    /// Two items share a sort key, e.g. an upstream exposing two tools with
    /// the same name. Such a surface cannot be deterministically ordered.
    #[error("ambiguous snapshot: duplicate {kind} key '{key}'")]
    Ambiguous { kind: &'static str, key: String },
}

#[derive(Debug, Clone)]
pub struct SnapshotOutcome {
    /// Normalized payload, stored verbatim as the snapshot row.
    pub payload: Value,
    /// Lowercase hex SHA-256 of the payload's canonical encoding.
    pub hash: String,
}

#[derive(Clone)]
pub struct Snapshotter {
    client: Arc<UpstreamClient>,
}

impl Snapshotter {
    pub fn new(client: Arc<UpstreamClient>) -> Self {
        Self { client }
    }

    /// Captures the full capability surface of an upstream.
    pub async fn snapshot(&self, upstream_url: &str) -> Result<SnapshotOutcome, SnapshotError> {
        tracing::debug!(upstream_url, "taking capability snapshot");

        let init = self.client.initialize(upstream_url).await?;

        let tools = self.client.list(upstream_url, "tools/list").await?;
        let resources = self.client.list(upstream_url, "resources/list").await?;
        let resource_templates = self
            .client
            .list(upstream_url, "resources/templates/list")
            .await?;
        let prompts = self.client.list(upstream_url, "prompts/list").await?;

        let payload = json!({
            "protocolVersion": init.protocol_version,
            "capabilities": init.capabilities,
            "serverInfo": strip_volatile_fields(init.server_info),
            "tools": sort_by_key(tools, "name", "tool")?,
            "resources": sort_by_key(resources, "uri", "resource")?,
            "resource_templates": sort_by_key(resource_templates, "uriTemplate", "resource template")?,
            "prompts": sort_by_key(prompts, "name", "prompt")?,
        });

        let hash = fingerprint(&payload)?;
        tracing::debug!(upstream_url, hash, "snapshot complete");

        Ok(SnapshotOutcome { payload, hash })
    }
}

fn strip_volatile_fields(mut server_info: Value) -> Value {
    if let Some(map) = server_info.as_object_mut() {
        for field in VOLATILE_SERVER_INFO_FIELDS {
            map.remove(*field);
        }
    }
    server_info
}

/// Sorts listed items ascending by their stable key. A missing key sorts as
/// the empty string; a duplicate key makes the surface ambiguous.
fn sort_by_key(
    items: Vec<Value>,
    key: &str,
    kind: &'static str,
) -> Result<Vec<Value>, SnapshotError> {
    let mut keyed: Vec<(String, Value)> = items
        .into_iter()
        .map(|item| {
            let sort_key = item
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            (sort_key, item)
        })
        .collect();

    keyed.sort_by(|(a, _), (b, _)| a.cmp(b));

    for pair in keyed.windows(2) {
        if pair[0].0 == pair[1].0 {
            return Err(SnapshotError::Ambiguous {
                kind,
                key: pair[0].0.clone(),
            });
        }
    }

    Ok(keyed.into_iter().map(|(_, item)| item).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volatile_server_info_fields_are_stripped() {
        let server_info = json!({
            "name": "demo",
            "version": "1.2.3",
            "build": "abc123",
            "buildTime": "2025-05-01T00:00:00Z",
            "uptime": 9999,
            "instructions": "be helpful",
        });
        let stripped = strip_volatile_fields(server_info);
        assert_eq!(stripped, json!({"name": "demo", "version": "1.2.3"}));
    }

    #[test]
    fn items_sort_ascending_by_key() {
        let items = vec![
            json!({"name": "ping"}),
            json!({"name": "echo"}),
            json!({"name": "add"}),
        ];
        let sorted = sort_by_key(items, "name", "tool").unwrap();
        let names: Vec<_> = sorted
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["add", "echo", "ping"]);
    }

    #[test]
    fn duplicate_sort_key_is_ambiguous() {
        let items = vec![json!({"name": "echo"}), json!({"name": "echo"})];
        let err = sort_by_key(items, "name", "tool").unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::Ambiguous { kind: "tool", ref key } if key == "echo"
        ));
    }

    #[test]
    fn unknown_item_fields_survive_normalization() {
        let items = vec![json!({"name": "echo", "x-vendor-flag": true})];
        let sorted = sort_by_key(items, "name", "tool").unwrap();
        assert_eq!(sorted[0]["x-vendor-flag"], json!(true));
    }
}
