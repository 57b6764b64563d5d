//! Service model and supervision.
//!
//! A *service* is a metric source: a locally discovered Postgres or
//! Pgbouncer instance, a user-configured remote, or the host itself (the
//! `system:0` pseudo-service). Services live in the [`ServiceRegistry`];
//! the [`Supervisor`] keeps the registry populated via periodic discovery
//! and prunes it via health checking.

mod discovery;
mod health;
mod locator;
mod registry;
mod supervisor;

pub use discovery::{DiscoveryError, ProcessInfo, ProcessInspector, SysinfoInspector};
pub use locator::{ConnectionParams, MetadataError};
pub use registry::ServiceRegistry;
pub use supervisor::{ServiceConfig, Supervisor};

use serde::Deserialize;

use crate::collector::ServiceCollector;

/// Identifier of the host pseudo-service. Always present in the registry
/// and never health-checked or evicted.
pub const SYSTEM_SERVICE_ID: &str = "system:0";

/// Kind of service a connection setting refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Postgres,
    Pgbouncer,
    System,
}

impl ServiceType {
    /// String form used as the service id prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Pgbouncer => "pgbouncer",
            Self::System => "system",
        }
    }

    /// Whether this service has a remote endpoint worth health-checking.
    pub fn is_remote(&self) -> bool {
        !matches!(self, Self::System)
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection settings for one service, as found in the config file or
/// produced by discovery. Immutable once created.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnSetting {
    pub service_type: ServiceType,
    #[serde(default)]
    pub conninfo: String,
}

impl ConnSetting {
    pub fn new(service_type: ServiceType, conninfo: impl Into<String>) -> Self {
        Self {
            service_type,
            conninfo: conninfo.into(),
        }
    }
}

/// Registry record for a single service. Records are plain values: the
/// registry copies them in and out, so holding one never observes later
/// mutations.
#[derive(Debug, Clone)]
pub struct Service {
    /// Canonical key: `system:0` or `<type>:<host>:<port>`. Unique across
    /// the registry; metrics carry it as the `sid` label so two instances
    /// of the same engine on one host stay distinguishable.
    pub service_id: String,
    /// How to reach the service.
    pub conn_settings: ConnSetting,
    /// Metric collector attached once, before the service is first scraped.
    pub collector: Option<ServiceCollector>,
    /// Consecutive failed health checks. Reset to zero on success.
    pub total_errors: u32,
}

impl Service {
    pub fn new(service_id: impl Into<String>, conn_settings: ConnSetting) -> Self {
        Self {
            service_id: service_id.into(),
            conn_settings,
            collector: None,
            total_errors: 0,
        }
    }

    /// The host pseudo-service.
    pub fn system() -> Self {
        Self::new(
            SYSTEM_SERVICE_ID,
            ConnSetting::new(ServiceType::System, ""),
        )
    }

    /// Compose a remote service id from its parts.
    pub fn remote_id(service_type: ServiceType, host: &str, port: u16) -> String {
        format!("{}:{}:{}", service_type.as_str(), host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_type_strings() {
        assert_eq!(ServiceType::Postgres.as_str(), "postgres");
        assert_eq!(ServiceType::Pgbouncer.as_str(), "pgbouncer");
        assert_eq!(ServiceType::System.as_str(), "system");
    }

    #[test]
    fn test_remote_flag() {
        assert!(ServiceType::Postgres.is_remote());
        assert!(ServiceType::Pgbouncer.is_remote());
        assert!(!ServiceType::System.is_remote());
    }

    #[test]
    fn test_remote_id() {
        assert_eq!(
            Service::remote_id(ServiceType::Postgres, "127.0.0.1", 5432),
            "postgres:127.0.0.1:5432"
        );
        assert_eq!(
            Service::remote_id(ServiceType::Pgbouncer, "127.0.0.1", 16432),
            "pgbouncer:127.0.0.1:16432"
        );
    }

    #[test]
    fn test_service_type_deserialize() {
        let cs: ConnSetting =
            serde_yaml::from_str("service_type: postgres\nconninfo: host=127.0.0.1").unwrap();
        assert_eq!(cs.service_type, ServiceType::Postgres);
        assert_eq!(cs.conninfo, "host=127.0.0.1");
    }
}
