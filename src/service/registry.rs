//! Shared registry of monitored services.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::Service;
use crate::collector::ServiceCollector;

/// Registry mapping service id to its [`Service`] record.
///
/// The map is the only mutable state shared between discovery, health
/// checking and scrape handling, and it is guarded by a single
/// readers-writer lock. Records cross the lock by value, so callers never
/// hold an interior reference into the map.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: Arc<RwLock<HashMap<String, Service>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a service record. An existing record with the same id is
    /// overwritten; callers that need idempotency check with [`get`] first.
    ///
    /// [`get`]: ServiceRegistry::get
    pub async fn add(&self, service: Service) {
        let mut services = self.services.write().await;
        services.insert(service.service_id.clone(), service);
    }

    /// Fetch a copy of the record with the given id.
    pub async fn get(&self, id: &str) -> Option<Service> {
        self.services.read().await.get(id).cloned()
    }

    /// Snapshot of all service ids. The returned vector stays valid no
    /// matter how the registry mutates afterwards.
    pub async fn list_ids(&self) -> Vec<String> {
        self.services.read().await.keys().cloned().collect()
    }

    /// Remove a record. Unknown ids are a no-op.
    pub async fn remove(&self, id: &str) {
        let mut services = self.services.write().await;
        services.remove(id);
    }

    /// Increment the failed health check counter.
    pub async fn mark_failed(&self, id: &str) {
        let mut services = self.services.write().await;
        if let Some(service) = services.get_mut(id) {
            service.total_errors += 1;
        }
    }

    /// Reset the failed health check counter to zero.
    pub async fn mark_healthy(&self, id: &str) {
        let mut services = self.services.write().await;
        if let Some(service) = services.get_mut(id) {
            service.total_errors = 0;
        }
    }

    /// Number of failed health checks recorded for the id; zero for
    /// unknown ids.
    pub async fn failure_count(&self, id: &str) -> u32 {
        self.services
            .read()
            .await
            .get(id)
            .map(|s| s.total_errors)
            .unwrap_or(0)
    }

    /// Attach a collector handle to an existing record.
    pub async fn set_collector(&self, id: &str, collector: ServiceCollector) {
        let mut services = self.services.write().await;
        if let Some(service) = services.get_mut(id) {
            service.collector = Some(collector);
        }
    }

    /// Number of registered services.
    pub async fn size(&self) -> usize {
        self.services.read().await.len()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field(
                "size",
                &self.services.try_read().map(|s| s.len()).unwrap_or(0),
            )
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{ConnSetting, ServiceType};

    fn postgres_service(id: &str) -> Service {
        Service::new(
            id,
            ConnSetting::new(ServiceType::Postgres, "host=127.0.0.1 port=5432"),
        )
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let registry = ServiceRegistry::new();
        registry.add(postgres_service("postgres:127.0.0.1:5432")).await;

        let service = registry.get("postgres:127.0.0.1:5432").await.unwrap();
        assert_eq!(service.service_id, "postgres:127.0.0.1:5432");
        assert_eq!(service.total_errors, 0);
        assert!(service.collector.is_none());

        assert!(registry.get("postgres:127.0.0.1:5433").await.is_none());
        assert_eq!(registry.size().await, 1);
    }

    #[tokio::test]
    async fn test_add_overwrites() {
        let registry = ServiceRegistry::new();
        registry.add(postgres_service("postgres:127.0.0.1:5432")).await;
        registry.mark_failed("postgres:127.0.0.1:5432").await;

        registry.add(postgres_service("postgres:127.0.0.1:5432")).await;
        assert_eq!(registry.failure_count("postgres:127.0.0.1:5432").await, 0);
        assert_eq!(registry.size().await, 1);
    }

    #[tokio::test]
    async fn test_remove_unknown_is_noop() {
        let registry = ServiceRegistry::new();
        registry.remove("postgres:127.0.0.1:5432").await;
        assert_eq!(registry.size().await, 0);
    }

    #[tokio::test]
    async fn test_failure_counter() {
        let registry = ServiceRegistry::new();
        registry.add(postgres_service("postgres:127.0.0.1:5432")).await;

        registry.mark_failed("postgres:127.0.0.1:5432").await;
        registry.mark_failed("postgres:127.0.0.1:5432").await;
        assert_eq!(registry.failure_count("postgres:127.0.0.1:5432").await, 2);

        registry.mark_healthy("postgres:127.0.0.1:5432").await;
        assert_eq!(registry.failure_count("postgres:127.0.0.1:5432").await, 0);

        // unknown ids are silently ignored
        registry.mark_failed("pgbouncer:127.0.0.1:6432").await;
        assert_eq!(registry.failure_count("pgbouncer:127.0.0.1:6432").await, 0);
    }

    #[tokio::test]
    async fn test_list_ids_is_a_snapshot() {
        let registry = ServiceRegistry::new();
        registry.add(postgres_service("postgres:127.0.0.1:5432")).await;
        registry.add(postgres_service("postgres:127.0.0.1:5433")).await;

        let ids = registry.list_ids().await;
        registry.remove("postgres:127.0.0.1:5432").await;

        // the snapshot is unaffected by the concurrent removal
        assert_eq!(ids.len(), 2);
        assert_eq!(registry.size().await, 1);
    }
}
