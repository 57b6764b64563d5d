//! Auto-discovery of local services.
//!
//! Each discovery pass walks the process table, looking for a postmaster
//! (a process named `postgres` whose parent is pid 1) and for pgbouncer
//! processes. Candidates go through the locator to derive a conninfo,
//! which is verified with a connection probe before the service is
//! admitted to the registry. Already-known service ids are left untouched.

use thiserror::Error;

use super::locator::{self, MetadataError};
use super::supervisor::ServiceConfig;
use super::{ConnSetting, Service, ServiceRegistry, ServiceType};
use crate::probe::{ConnectionProbe, ProbeError};

/// Errors raised by a discovery pass or a single candidate within it.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The process table could not be enumerated; the whole pass is
    /// aborted and retried on the next tick.
    #[error("process enumeration failed: {0}")]
    Enumeration(String),

    /// Process metadata was missing or malformed; the candidate is
    /// skipped this tick.
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// The candidate did not accept a probe connection.
    #[error("probe failed: {0}")]
    Probe(#[from] ProbeError),

    /// No transport accepted a probe connection.
    #[error("service at {addr} not reachable")]
    Unreachable { addr: String },
}

/// One process table entry, as much of it as discovery needs.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub ppid: Option<u32>,
    pub cmdline: Vec<String>,
}

/// Source of process table snapshots.
#[async_trait::async_trait]
pub trait ProcessInspector: Send + Sync {
    async fn processes(&self) -> Result<Vec<ProcessInfo>, DiscoveryError>;
}

/// Process inspector backed by the live process table.
#[derive(Debug, Default)]
pub struct SysinfoInspector;

#[async_trait::async_trait]
impl ProcessInspector for SysinfoInspector {
    async fn processes(&self) -> Result<Vec<ProcessInfo>, DiscoveryError> {
        // enumeration reads the whole process table; keep it off the
        // async runtime
        let system = tokio::task::spawn_blocking(|| {
            let mut system = sysinfo::System::new();
            system.refresh_processes_specifics(
                sysinfo::ProcessesToUpdate::All,
                true,
                sysinfo::ProcessRefreshKind::everything(),
            );
            system
        })
        .await
        .map_err(|e| DiscoveryError::Enumeration(e.to_string()))?;

        if system.processes().is_empty() {
            return Err(DiscoveryError::Enumeration(
                "no processes found".to_string(),
            ));
        }

        Ok(system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessInfo {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().to_string(),
                ppid: process.parent().map(sysinfo::Pid::as_u32),
                cmdline: process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy().to_string())
                    .collect(),
            })
            .collect())
    }
}

/// Run one discovery pass over the process table.
pub(crate) async fn lookup_services(
    registry: &ServiceRegistry,
    config: &ServiceConfig,
    inspector: &dyn ProcessInspector,
    probe: &dyn ConnectionProbe,
) -> Result<(), DiscoveryError> {
    tracing::debug!("auto-discovery: looking up for new services");

    let processes = inspector.processes().await?;

    for process in processes {
        match process.name.as_str() {
            "postgres" if process.ppid == Some(1) => {
                match discover_postgres(&process, config, probe).await {
                    Ok(service) => admit(registry, service).await,
                    Err(e) => {
                        tracing::warn!(pid = process.pid, error = %e, "auto-discovery [postgres]: discovery failed; skip");
                    }
                }
            }
            "pgbouncer" => match discover_pgbouncer(&process, config, probe).await {
                Ok(service) => admit(registry, service).await,
                Err(e) => {
                    tracing::warn!(pid = process.pid, error = %e, "auto-discovery [pgbouncer]: discovery failed; skip");
                }
            },
            _ => {}
        }
    }

    Ok(())
}

async fn admit(registry: &ServiceRegistry, service: Service) {
    if registry.get(&service.service_id).await.is_some() {
        tracing::debug!(service = %service.service_id, "auto-discovery: service already in the registry; skip");
        return;
    }
    tracing::info!(service = %service.service_id, "auto-discovery: service added");
    registry.add(service).await;
}

/// Analyze a postmaster process: read its data directory from the command
/// line, derive connection parameters from `postmaster.pid` and probe the
/// UNIX socket first, then TCP. The first successful transport wins.
async fn discover_postgres(
    process: &ProcessInfo,
    config: &ServiceConfig,
    probe: &dyn ConnectionProbe,
) -> Result<Service, DiscoveryError> {
    tracing::debug!(pid = process.pid, "auto-discovery [postgres]: analyzing process");

    let datadir = locator::parse_postgres_cmdline(&process.cmdline)?;
    let params = locator::read_postmaster_pid(&datadir.join("postmaster.pid"))?;

    let mut conninfo = None;
    for unix in [true, false] {
        let candidate = locator::postgres_conninfo(&params, &config.conn_defaults, unix);
        match probe.probe(&candidate.render()).await {
            Ok(()) => {
                conninfo = Some(candidate);
                break;
            }
            Err(e) => {
                tracing::debug!(pid = process.pid, unix = unix, error = %e, "connection attempt failed");
            }
        }
    }

    let conninfo = conninfo.ok_or_else(|| DiscoveryError::Unreachable {
        addr: format!("{}:{}", params.listen_addr, params.listen_port),
    })?;

    let service_id = Service::remote_id(
        ServiceType::Postgres,
        id_host(&params.listen_addr),
        params.listen_port,
    );

    tracing::debug!(pid = process.pid, conninfo = %conninfo.render(), "auto-discovery [postgres]: service found");

    Ok(Service::new(
        service_id,
        ConnSetting::new(ServiceType::Postgres, conninfo.render()),
    ))
}

/// Analyze a pgbouncer process: locate its ini file through the command
/// line and derive connection parameters from it. Unlike the postmaster
/// branch there is no parent-pid restriction, so multiple instances run
/// under a process supervisor are all eligible.
async fn discover_pgbouncer(
    process: &ProcessInfo,
    config: &ServiceConfig,
    probe: &dyn ConnectionProbe,
) -> Result<Service, DiscoveryError> {
    tracing::debug!(pid = process.pid, "auto-discovery [pgbouncer]: analyzing process");

    let config_path = locator::parse_pgbouncer_cmdline(&process.cmdline)?;
    let params = locator::read_pgbouncer_ini(&config_path)?;

    let conninfo = locator::pgbouncer_conninfo(&params, &config.conn_defaults);
    probe.probe(&conninfo.render()).await?;

    let service_id = Service::remote_id(
        ServiceType::Pgbouncer,
        id_host(&params.listen_addr),
        params.listen_port,
    );

    tracing::debug!(pid = process.pid, conninfo = %conninfo.render(), "auto-discovery [pgbouncer]: service found");

    Ok(Service::new(
        service_id,
        ConnSetting::new(ServiceType::Pgbouncer, conninfo.render()),
    ))
}

// socket-only services still need a host part in their id
fn id_host(listen_addr: &str) -> &str {
    if listen_addr.is_empty() {
        "127.0.0.1"
    } else {
        listen_addr
    }
}
