//! Service supervision: bootstrap, periodic discovery, collector
//! attachment and health checking, under a single cancellation token.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::discovery::{self, ProcessInspector, SysinfoInspector};
use super::health;
use super::{ConnSetting, Service, ServiceRegistry, ServiceType, SYSTEM_SERVICE_ID};
use crate::collector::{
    CollectorConfig, CollectorRegistrar, Factories, PostgresServiceConfig, ServiceCollector,
};
use crate::connstr::ConnString;
use crate::filter::Filters;
use crate::probe::{ConnectionProbe, PgProbe};

/// Default interval between discovery passes.
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(60);

/// Supervision settings derived from the application configuration.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub no_track_mode: bool,
    pub conn_defaults: BTreeMap<String, String>,
    pub conn_settings: Vec<ConnSetting>,
    pub filters: Filters,
    pub disabled_collectors: Vec<String>,
}

/// Composes discovery, collector attachment and health checking over the
/// shared registry and registrar.
pub struct Supervisor {
    registry: ServiceRegistry,
    registrar: CollectorRegistrar,
    config: ServiceConfig,
    inspector: Arc<dyn ProcessInspector>,
    probe: Arc<dyn ConnectionProbe>,
    interval: Duration,
}

impl Supervisor {
    pub fn new(
        registry: ServiceRegistry,
        registrar: CollectorRegistrar,
        config: ServiceConfig,
    ) -> Self {
        Self {
            registry,
            registrar,
            config,
            inspector: Arc::new(SysinfoInspector),
            probe: Arc::new(PgProbe::new()),
            interval: DEFAULT_DISCOVERY_INTERVAL,
        }
    }

    /// Replace the process inspector.
    pub fn with_inspector(mut self, inspector: Arc<dyn ProcessInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    /// Replace the connection probe.
    pub fn with_probe(mut self, probe: Arc<dyn ConnectionProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Change the discovery interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Bootstrap the registry, then run discovery and health ticks until
    /// the token is cancelled. Returns within one interval of the
    /// cancellation. Collector teardown is left to process exit.
    pub async fn start(&self, token: CancellationToken) {
        self.bootstrap().await;

        loop {
            self.run_tick().await;

            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("auto-discovery: exit signaled");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// Insert the host pseudo-service and the services configured
    /// statically. Configured entries that fail to parse or connect are
    /// skipped with a warning; discovery may still pick them up later.
    pub async fn bootstrap(&self) {
        self.registry.add(Service::system()).await;
        tracing::info!(service = SYSTEM_SERVICE_ID, "registered new service");

        for setting in &self.config.conn_settings {
            if setting.service_type == ServiceType::System {
                continue;
            }

            let conn = match ConnString::parse(&setting.conninfo) {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(conninfo = %setting.conninfo, error = %e, "skip");
                    continue;
                }
            };

            if let Err(e) = self.probe.probe(&setting.conninfo).await {
                tracing::warn!(conninfo = %setting.conninfo, error = %e, "skip");
                continue;
            }

            let id = Service::remote_id(
                setting.service_type,
                conn.host_or_default(),
                conn.port_or_default(),
            );
            self.registry
                .add(Service::new(id.clone(), setting.clone()))
                .await;
            tracing::info!(service = %id, "registered new service");
        }
    }

    /// One supervision tick: discovery pass, collector attachment, health
    /// checks. An enumeration failure aborts the whole tick; the next one
    /// starts fresh after the regular interval.
    pub async fn run_tick(&self) {
        if let Err(e) = discovery::lookup_services(
            &self.registry,
            &self.config,
            self.inspector.as_ref(),
            self.probe.as_ref(),
        )
        .await
        {
            tracing::warn!(error = %e, "auto-discovery: services lookup failed; skip");
            return;
        }

        self.setup_services().await;

        health::healthcheck_services(&self.registry, &self.registrar, self.probe.as_ref()).await;
    }

    /// Attach collectors to services that lack one. Failures are logged
    /// and the affected record stays collector-less until the next tick.
    async fn setup_services(&self) {
        tracing::debug!("setting up services");

        for id in self.registry.list_ids().await {
            let Some(service) = self.registry.get(&id).await else {
                continue;
            };
            if service.collector.is_some() {
                continue;
            }

            let mut factories = Factories::new();
            let mut config = CollectorConfig::new(service.conn_settings.service_type);
            config.no_track_mode = self.config.no_track_mode;
            config.conninfo = service.conn_settings.conninfo.clone();
            config.filters = self.config.filters.clone();

            match service.conn_settings.service_type {
                ServiceType::System => {
                    factories.register_system_collectors(&self.config.disabled_collectors);
                }
                ServiceType::Postgres => {
                    factories.register_postgres_collectors(&self.config.disabled_collectors);
                    match PostgresServiceConfig::new(&config.conninfo) {
                        Ok(pg) => config.postgres = Some(pg),
                        Err(e) => {
                            tracing::error!(service = %id, error = %e, "service setup failed; skip");
                            continue;
                        }
                    }
                }
                ServiceType::Pgbouncer => {
                    factories.register_pgbouncer_collectors(&self.config.disabled_collectors);
                }
            }

            match ServiceCollector::new(&id, &factories, &config) {
                Ok(collector) => {
                    self.registrar.register(collector.clone()).await;
                    self.registry.set_collector(&id, collector).await;
                    tracing::debug!(service = %id, "service configured");
                }
                Err(e) => {
                    tracing::error!(service = %id, error = %e, "collector setup failed; retry next tick");
                }
            }
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("interval", &self.interval)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
