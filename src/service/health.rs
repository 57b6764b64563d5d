//! Health checking of registered services.

use super::ServiceRegistry;
use crate::collector::CollectorRegistrar;
use crate::probe::ConnectionProbe;

/// Number of consecutive failed health checks after which a service is
/// removed from the registry.
pub(crate) const ERROR_THRESHOLD: u32 = 10;

/// Probe every remote service once. A successful probe resets the
/// service's failure counter; a failed one increments it, and reaching
/// the threshold evicts the service. Eviction unregisters the collector
/// before removing the record, so a scrape that already observed the id
/// still finds its collector.
///
/// The `system:0` pseudo-service has no endpoint and is never probed.
pub(crate) async fn healthcheck_services(
    registry: &ServiceRegistry,
    registrar: &CollectorRegistrar,
    probe: &dyn ConnectionProbe,
) {
    tracing::debug!("services healthcheck started");

    for id in registry.list_ids().await {
        let Some(service) = registry.get(&id).await else {
            continue;
        };
        if !service.conn_settings.service_type.is_remote() {
            continue;
        }

        match probe.probe(&service.conn_settings.conninfo).await {
            Ok(()) => {
                registry.mark_healthy(&id).await;
            }
            Err(e) => {
                let total_errors = registry.failure_count(&id).await + 1;
                if total_errors < ERROR_THRESHOLD {
                    registry.mark_failed(&id).await;
                    tracing::warn!(
                        service = %id,
                        error = %e,
                        tries = total_errors,
                        limit = ERROR_THRESHOLD,
                        "service health check failed"
                    );
                } else {
                    registrar.unregister(&id).await;
                    registry.remove(&id).await;
                    tracing::error!(
                        service = %id,
                        tries = total_errors,
                        limit = ERROR_THRESHOLD,
                        "service removed: too many failures"
                    );
                }
            }
        }
    }

    tracing::debug!("services healthcheck finished");
}
