//! Process-wide set of active service collectors.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use prometheus::proto;
use tokio::sync::RwLock;

use super::ServiceCollector;

/// Registrar consulted by the scrape endpoint: maps service id to its
/// aggregate collector.
///
/// Register and unregister are idempotent and serialized internally. A
/// scrape takes an atomic snapshot of the set before collecting, so it
/// either sees a service's collector or does not see the service at all,
/// never a half-registered state.
#[derive(Clone, Default)]
pub struct CollectorRegistrar {
    collectors: Arc<RwLock<HashMap<String, ServiceCollector>>>,
}

impl CollectorRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service collector. Re-registering the same id replaces
    /// the previous collector.
    pub async fn register(&self, collector: ServiceCollector) {
        let id = collector.service_id().to_string();
        let mut collectors = self.collectors.write().await;
        if collectors.insert(id.clone(), collector).is_some() {
            tracing::debug!(service = %id, "collector re-registered");
        } else {
            tracing::debug!(service = %id, "collector registered");
        }
    }

    /// Drop a service's collector. Unknown ids are a no-op.
    pub async fn unregister(&self, id: &str) {
        let mut collectors = self.collectors.write().await;
        if collectors.remove(id).is_some() {
            tracing::debug!(service = %id, "collector unregistered");
        }
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.collectors.read().await.contains_key(id)
    }

    pub async fn size(&self) -> usize {
        self.collectors.read().await.len()
    }

    async fn snapshot(&self) -> Vec<ServiceCollector> {
        self.collectors.read().await.values().cloned().collect()
    }

    /// Collect from every registered service concurrently and merge the
    /// resulting families by metric name. Series from different services
    /// stay distinguishable through their `sid` labels.
    pub async fn gather(&self) -> Vec<proto::MetricFamily> {
        let collectors = self.snapshot().await;
        let results =
            futures::future::join_all(collectors.iter().map(|c| c.collect())).await;

        let mut merged: BTreeMap<String, proto::MetricFamily> = BTreeMap::new();
        for families in results {
            for mut family in families {
                match merged.entry(family.get_name().to_string()) {
                    Entry::Occupied(mut existing) => {
                        for metric in family.take_metric().into_iter() {
                            existing.get_mut().mut_metric().push(metric);
                        }
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(family);
                    }
                }
            }
        }

        merged.into_values().collect()
    }
}

impl std::fmt::Debug for CollectorRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorRegistrar")
            .field(
                "size",
                &self.collectors.try_read().map(|c| c.len()).unwrap_or(0),
            )
            .finish_non_exhaustive()
    }
}
