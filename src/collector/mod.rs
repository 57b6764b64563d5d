//! Metric collection framework.
//!
//! Every monitored service carries one [`ServiceCollector`]: an aggregate
//! of per-subsystem [`Collector`] implementations selected by service type
//! through [`Factories`]. Collectors emit point-in-time samples into a
//! [`MetricSink`] which accumulates `prometheus` metric families; the
//! scrape endpoint encodes the merged families with the standard text
//! encoder.
//!
//! A collector that fails mid-scrape degrades to fewer (or no) series and
//! a warn log. Scrapes never turn into HTTP errors.

mod registrar;
pub mod pgbouncer;
pub mod postgres;
pub mod system;

pub use registrar::CollectorRegistrar;

use std::collections::BTreeMap;
use std::sync::Arc;

use prometheus::proto;
use thiserror::Error;

use crate::connstr::{ConnString, ConnStringError};
use crate::filter::Filters;
use crate::service::ServiceType;

/// Constant labels attached to every series of a collector, e.g. the
/// per-service `sid` label.
pub type ConstLabels = BTreeMap<String, String>;

/// Errors that can occur while instantiating collectors.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The service conninfo could not be parsed.
    #[error("conninfo error: {0}")]
    Conninfo(#[from] ConnStringError),

    /// A collector factory refused to build.
    #[error("collector '{name}' setup failed: {reason}")]
    Factory { name: &'static str, reason: String },
}

/// Errors that can occur during a collection cycle.
#[derive(Debug, Error)]
pub enum CollectError {
    /// Database query or connection failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The stored conninfo string turned out to be unparsable.
    #[error("conninfo error: {0}")]
    Conninfo(#[from] ConnStringError),

    /// Kernel statistics could not be read.
    #[error("procfs error: {0}")]
    Procfs(#[from] procfs::ProcError),

    /// Statistics file read failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A statistics source produced unparsable content.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Whether a series is a monotonically increasing counter or an
/// instantaneous gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    fn proto_type(self) -> proto::MetricType {
        match self {
            Self::Counter => proto::MetricType::COUNTER,
            Self::Gauge => proto::MetricType::GAUGE,
        }
    }
}

/// Static description of one metric a collector may emit: full name, help
/// text, kind and its label schema.
#[derive(Debug, Clone)]
pub struct Desc {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub variable_labels: Vec<String>,
    pub const_labels: ConstLabels,
}

impl Desc {
    pub fn new(name: impl Into<String>, help: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            kind,
            variable_labels: Vec::new(),
            const_labels: ConstLabels::new(),
        }
    }

    pub fn with_variable_labels(mut self, labels: &[&str]) -> Self {
        self.variable_labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_const_labels(mut self, labels: ConstLabels) -> Self {
        self.const_labels = labels;
        self
    }
}

/// Accumulator for one collection cycle. Samples land in `prometheus`
/// metric families keyed by metric name.
#[derive(Debug, Default)]
pub struct MetricSink {
    families: BTreeMap<String, proto::MetricFamily>,
}

impl MetricSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sample. The number of label values must match the
    /// descriptor's variable labels; mismatches are dropped with a warning
    /// rather than poisoning the whole scrape.
    pub fn put(&mut self, desc: &Desc, value: f64, label_values: &[&str]) {
        if label_values.len() != desc.variable_labels.len() {
            tracing::warn!(
                metric = %desc.name,
                want = desc.variable_labels.len(),
                got = label_values.len(),
                "label cardinality mismatch, sample dropped"
            );
            return;
        }

        let family = self.families.entry(desc.name.clone()).or_insert_with(|| {
            let mut family = proto::MetricFamily::default();
            family.set_name(desc.name.clone());
            family.set_help(desc.help.clone());
            family.set_field_type(desc.kind.proto_type());
            family
        });

        let mut metric = proto::Metric::default();
        for (name, value) in &desc.const_labels {
            let mut pair = proto::LabelPair::default();
            pair.set_name(name.clone());
            pair.set_value(value.clone());
            metric.mut_label().push(pair);
        }
        for (name, value) in desc.variable_labels.iter().zip(label_values) {
            let mut pair = proto::LabelPair::default();
            pair.set_name(name.clone());
            pair.set_value(value.to_string());
            metric.mut_label().push(pair);
        }

        match desc.kind {
            MetricKind::Counter => {
                let mut counter = proto::Counter::default();
                counter.set_value(value);
                metric.set_counter(counter);
            }
            MetricKind::Gauge => {
                let mut gauge = proto::Gauge::default();
                gauge.set_value(value);
                metric.set_gauge(gauge);
            }
        }

        family.mut_metric().push(metric);
    }

    /// Consume the sink, yielding families sorted by name.
    pub fn into_families(self) -> Vec<proto::MetricFamily> {
        self.families
            .into_values()
            .filter(|f| !f.get_metric().is_empty())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }
}

/// One metric collector: a subsystem statistic source attached to a
/// service. `collect` runs concurrently with other collectors and must
/// produce one internally consistent snapshot per invocation.
#[async_trait::async_trait]
pub trait Collector: Send + Sync {
    /// Factory name of the collector, e.g. `system/cpu`.
    fn name(&self) -> &'static str;

    /// The static set of descriptors the collector may ever emit.
    fn describe(&self) -> Vec<Desc>;

    /// Emit a point-in-time sample for each series.
    async fn collect(&self, sink: &mut MetricSink) -> Result<(), CollectError>;
}

/// Per-service configuration handed to collector factories.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Suppress collection of potentially sensitive values (query texts).
    pub no_track_mode: bool,
    pub service_type: ServiceType,
    /// Conninfo of the monitored service; empty for the system service.
    pub conninfo: String,
    pub filters: Filters,
    /// Present for postgres services only.
    pub postgres: Option<PostgresServiceConfig>,
}

impl CollectorConfig {
    pub fn new(service_type: ServiceType) -> Self {
        Self {
            no_track_mode: false,
            service_type,
            conninfo: String::new(),
            filters: Filters::new(),
            postgres: None,
        }
    }

    /// Parsed conninfo for database-backed collectors. Postgres services
    /// reuse the connection settings derived at attachment time.
    pub fn connstr(&self) -> Result<ConnString, ConnStringError> {
        if let Some(ref pg) = self.postgres {
            return Ok(pg.connstr.clone());
        }
        ConnString::parse(&self.conninfo)
    }
}

/// Connection settings derived from a postgres service's conninfo at
/// attachment time.
#[derive(Debug, Clone)]
pub struct PostgresServiceConfig {
    pub connstr: ConnString,
}

impl PostgresServiceConfig {
    /// Derive the service config from a conninfo string.
    ///
    /// # Errors
    /// Fails when the conninfo does not parse.
    pub fn new(conninfo: &str) -> Result<Self, ConnStringError> {
        Ok(Self {
            connstr: ConnString::parse(conninfo)?,
        })
    }
}

/// Collector constructor: receives the per-service constant labels and the
/// service's collector configuration.
pub type FactoryFn = fn(ConstLabels, &CollectorConfig) -> Result<Box<dyn Collector>, SetupError>;

/// Set of collector factories selected for a service type, keyed by
/// factory name. Disabled names are dropped at registration.
#[derive(Default)]
pub struct Factories {
    factories: BTreeMap<&'static str, FactoryFn>,
}

impl Factories {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&mut self, name: &'static str, factory: FactoryFn, disabled: &[String]) {
        if disabled.iter().any(|d| d == name) {
            tracing::debug!(collector = name, "collector disabled by configuration");
            return;
        }
        self.factories.insert(name, factory);
    }

    /// Host metric collectors.
    pub fn register_system_collectors(&mut self, disabled: &[String]) {
        self.register("system/cpu", system::cpu::new, disabled);
        self.register("system/loadavg", system::loadavg::new, disabled);
        self.register("system/meminfo", system::meminfo::new, disabled);
        self.register("system/netdev", system::netdev::new, disabled);
    }

    /// Postgres metric collectors.
    pub fn register_postgres_collectors(&mut self, disabled: &[String]) {
        self.register("postgres/activity", postgres::activity::new, disabled);
        self.register("postgres/databases", postgres::databases::new, disabled);
    }

    /// Pgbouncer metric collectors.
    pub fn register_pgbouncer_collectors(&mut self, disabled: &[String]) {
        self.register("pgbouncer/pools", pgbouncer::pools::new, disabled);
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = (&&'static str, &FactoryFn)> {
        self.factories.iter()
    }
}

struct ServiceCollectorInner {
    service_id: String,
    collectors: Vec<Box<dyn Collector>>,
}

/// Aggregate collector for one service. Cheap to clone; clones share the
/// underlying collector set, so a handle stored in the registry and one
/// held by the registrar refer to the same instance.
#[derive(Clone)]
pub struct ServiceCollector {
    inner: Arc<ServiceCollectorInner>,
}

impl ServiceCollector {
    /// Instantiate all factory collectors for a service. The service id is
    /// attached to every series as the `sid` constant label.
    ///
    /// # Errors
    /// Returns the first factory failure.
    pub fn new(
        service_id: &str,
        factories: &Factories,
        config: &CollectorConfig,
    ) -> Result<Self, SetupError> {
        let mut labels = ConstLabels::new();
        labels.insert("sid".to_string(), service_id.to_string());

        let mut collectors = Vec::with_capacity(factories.len());
        for (name, factory) in factories.iter() {
            let collector = factory(labels.clone(), config)?;
            tracing::debug!(service = service_id, collector = name, "collector created");
            collectors.push(collector);
        }

        Ok(Self {
            inner: Arc::new(ServiceCollectorInner {
                service_id: service_id.to_string(),
                collectors,
            }),
        })
    }

    pub fn service_id(&self) -> &str {
        &self.inner.service_id
    }

    /// Descriptors of every series this service may produce.
    pub fn describe(&self) -> Vec<Desc> {
        self.inner
            .collectors
            .iter()
            .flat_map(|c| c.describe())
            .collect()
    }

    /// Run one collection cycle across all collectors of the service.
    /// Failing collectors are skipped, so the result may hold fewer
    /// families than [`describe`](Self::describe) announces.
    pub async fn collect(&self) -> Vec<proto::MetricFamily> {
        let mut sink = MetricSink::new();
        for collector in &self.inner.collectors {
            if let Err(e) = collector.collect(&mut sink).await {
                tracing::warn!(
                    service = %self.inner.service_id,
                    collector = collector.name(),
                    error = %e,
                    "collection failed; skip"
                );
            }
        }
        sink.into_families()
    }
}

impl std::fmt::Debug for ServiceCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCollector")
            .field("service_id", &self.inner.service_id)
            .field("collectors", &self.inner.collectors.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc_with_labels() -> Desc {
        Desc::new("test_metric_total", "A test counter.", MetricKind::Counter)
            .with_variable_labels(&["mode"])
            .with_const_labels(ConstLabels::from([(
                "sid".to_string(),
                "system:0".to_string(),
            )]))
    }

    #[test]
    fn test_sink_builds_families() {
        let desc = desc_with_labels();
        let mut sink = MetricSink::new();
        sink.put(&desc, 1.5, &["user"]);
        sink.put(&desc, 2.5, &["system"]);

        let families = sink.into_families();
        assert_eq!(families.len(), 1);

        let family = &families[0];
        assert_eq!(family.get_name(), "test_metric_total");
        assert_eq!(family.get_field_type(), proto::MetricType::COUNTER);
        assert_eq!(family.get_metric().len(), 2);

        let labels = family.get_metric()[0].get_label();
        assert_eq!(labels[0].get_name(), "sid");
        assert_eq!(labels[0].get_value(), "system:0");
        assert_eq!(labels[1].get_name(), "mode");
        assert_eq!(labels[1].get_value(), "user");
        assert_eq!(family.get_metric()[0].get_counter().get_value(), 1.5);
    }

    #[test]
    fn test_sink_gauge_kind() {
        let desc = Desc::new("test_gauge", "A test gauge.", MetricKind::Gauge);
        let mut sink = MetricSink::new();
        sink.put(&desc, 42.0, &[]);

        let families = sink.into_families();
        assert_eq!(families[0].get_field_type(), proto::MetricType::GAUGE);
        assert_eq!(families[0].get_metric()[0].get_gauge().get_value(), 42.0);
    }

    #[test]
    fn test_sink_drops_mismatched_labels() {
        let desc = desc_with_labels();
        let mut sink = MetricSink::new();
        sink.put(&desc, 1.0, &[]);
        sink.put(&desc, 1.0, &["a", "b"]);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_sink_families_sorted_by_name() {
        let b = Desc::new("metric_b", "b", MetricKind::Gauge);
        let a = Desc::new("metric_a", "a", MetricKind::Gauge);
        let mut sink = MetricSink::new();
        sink.put(&b, 1.0, &[]);
        sink.put(&a, 1.0, &[]);

        let names: Vec<_> = sink
            .into_families()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect();
        assert_eq!(names, vec!["metric_a", "metric_b"]);
    }

    #[test]
    fn test_factories_disable() {
        let mut factories = Factories::new();
        factories.register_system_collectors(&["system/netdev".to_string()]);
        assert_eq!(factories.len(), 3);

        let mut all = Factories::new();
        all.register_system_collectors(&[]);
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn test_service_collector_carries_sid_label() {
        let mut factories = Factories::new();
        factories.register_system_collectors(&[]);

        let config = CollectorConfig::new(ServiceType::System);
        let collector = ServiceCollector::new("system:0", &factories, &config).unwrap();

        assert_eq!(collector.service_id(), "system:0");
        let descs = collector.describe();
        assert!(!descs.is_empty());
        for desc in descs {
            assert_eq!(desc.const_labels.get("sid").map(String::as_str), Some("system:0"));
        }
    }

    #[test]
    fn test_postgres_service_config() {
        assert!(PostgresServiceConfig::new("host=db dbname=postgres user=pgscv").is_ok());
        assert!(PostgresServiceConfig::new("invalid").is_err());
    }
}
