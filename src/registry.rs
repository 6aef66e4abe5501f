//! In-memory route registry.
//!
//! Holds the `service name -> upstream` map the proxy consults on every
//! request. The map is rebuilt wholesale from the repository and swapped in
//! under a single write-lock acquisition, so a reload is observed atomically
//! by all subsequent lookups. Proxy handlers consult the registry exactly
//! once per request; flipping a service to disabled never tears down streams
//! that are already in flight.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::Result;
use crate::repository::ServiceRepository;

/// Routing state for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub upstream_url: String,
    pub enabled: bool,
}

#[derive(Clone, Default)]
pub struct RouteRegistry {
    routes: Arc<RwLock<HashMap<String, RouteEntry>>>,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the map from the service table and swaps it in atomically.
    pub async fn reload(&self, repo: &dyn ServiceRepository) -> Result<()> {
        let services = repo.list_services().await?;

        let mut routes = HashMap::with_capacity(services.len());
        let mut enabled_count = 0usize;
        for entry in services {
            if entry.service.enabled {
                enabled_count += 1;
            }
            routes.insert(
                entry.service.name,
                RouteEntry {
                    upstream_url: entry.service.upstream_url,
                    enabled: entry.service.enabled,
                },
            );
        }

        let total = routes.len();
        *self.routes.write().await = routes;

        tracing::debug!(total, enabled = enabled_count, "route registry reloaded");
        Ok(())
    }

    /// Looks up a service by name; `None` means not registered at all.
    pub async fn lookup(&self, name: &str) -> Option<RouteEntry> {
        self.routes.read().await.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed(registry: &RouteRegistry, entries: &[(&str, &str, bool)]) {
        let mut routes = HashMap::new();
        for (name, url, enabled) in entries {
            routes.insert(
                name.to_string(),
                RouteEntry {
                    upstream_url: url.to_string(),
                    enabled: *enabled,
                },
            );
        }
        *registry.routes.write().await = routes;
    }

    #[tokio::test]
    async fn lookup_reflects_the_last_swap() {
        let registry = RouteRegistry::new();
        seed(&registry, &[("svc1", "http://a/mcp", true)]).await;

        let entry = registry.lookup("svc1").await.unwrap();
        assert!(entry.enabled);
        assert_eq!(entry.upstream_url, "http://a/mcp");

        // A new map replaces the old one wholesale.
        seed(&registry, &[("svc1", "http://b/mcp", false)]).await;
        let entry = registry.lookup("svc1").await.unwrap();
        assert!(!entry.enabled);
        assert_eq!(entry.upstream_url, "http://b/mcp");
    }

    #[tokio::test]
    async fn unknown_service_is_none() {
        let registry = RouteRegistry::new();
        assert!(registry.lookup("ghost").await.is_none());
    }

    #[tokio::test]
    async fn removed_service_disappears_after_swap() {
        let registry = RouteRegistry::new();
        seed(&registry, &[("svc1", "http://a/mcp", true), ("svc2", "http://b/mcp", true)]).await;
        seed(&registry, &[("svc2", "http://b/mcp", true)]).await;

        assert!(registry.lookup("svc1").await.is_none());
        assert!(registry.lookup("svc2").await.is_some());
    }
}
