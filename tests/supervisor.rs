//! End-to-end supervision tests: discovery, attachment, health checking
//! and eviction against a fake process table and probe.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pgscv::collector::CollectorRegistrar;
use pgscv::probe::{ConnectionProbe, ProbeError};
use pgscv::service::{
    DiscoveryError, ProcessInfo, ProcessInspector, ServiceConfig, ServiceRegistry, Supervisor,
};

struct FakeProcessTable {
    processes: std::sync::Mutex<Vec<ProcessInfo>>,
}

impl FakeProcessTable {
    fn new(processes: Vec<ProcessInfo>) -> Self {
        Self {
            processes: std::sync::Mutex::new(processes),
        }
    }
}

#[async_trait::async_trait]
impl ProcessInspector for FakeProcessTable {
    async fn processes(&self) -> Result<Vec<ProcessInfo>, DiscoveryError> {
        Ok(self.processes.lock().unwrap().clone())
    }
}

struct FakeProbe {
    healthy: AtomicBool,
}

impl FakeProbe {
    fn new() -> Self {
        Self {
            healthy: AtomicBool::new(true),
        }
    }

    fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl ConnectionProbe for FakeProbe {
    async fn probe(&self, _conninfo: &str) -> Result<(), ProbeError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProbeError::Timeout)
        }
    }
}

fn postmaster_process(datadir: &Path) -> ProcessInfo {
    ProcessInfo {
        pid: 42,
        name: "postgres".to_string(),
        ppid: Some(1),
        cmdline: vec![
            "/usr/lib/postgresql/bin/postgres".to_string(),
            "-D".to_string(),
            datadir.to_string_lossy().to_string(),
        ],
    }
}

struct Harness {
    supervisor: Supervisor,
    registry: ServiceRegistry,
    registrar: CollectorRegistrar,
    probe: Arc<FakeProbe>,
    _dir: tempfile::TempDir,
}

/// A supervisor watching one postmaster (pid 42, data dir in a tempdir)
/// whose postmaster.pid reports port 5432 listening on all interfaces.
fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("postmaster.pid"),
        "42\n/var/lib/pg\n1700000000\n5432\n/tmp\n*\n",
    )
    .unwrap();

    let probe = Arc::new(FakeProbe::new());
    let registry = ServiceRegistry::new();
    let registrar = CollectorRegistrar::new();

    let inspector = Arc::new(FakeProcessTable::new(vec![postmaster_process(dir.path())]));
    let supervisor = Supervisor::new(
        registry.clone(),
        registrar.clone(),
        ServiceConfig::default(),
    )
    .with_inspector(inspector)
    .with_probe(probe.clone());

    Harness {
        supervisor,
        registry,
        registrar,
        probe,
        _dir: dir,
    }
}

#[tokio::test]
async fn discovery_admits_and_scrape_sees_the_service() {
    let h = harness();

    h.supervisor.bootstrap().await;
    h.supervisor.run_tick().await;

    // registry holds the pseudo-service and the discovered postgres
    assert_eq!(h.registry.size().await, 2);
    let service = h.registry.get("postgres:127.0.0.1:5432").await.unwrap();
    assert!(service.collector.is_some());

    // a scrape of the registrar surfaces the system collectors with the
    // sid label attached
    let families = h.registrar.gather().await;
    let load1 = families
        .iter()
        .find(|f| f.get_name() == "node_load1")
        .expect("system collectors missing from scrape");
    let sid = load1.get_metric()[0]
        .get_label()
        .iter()
        .find(|l| l.get_name() == "sid")
        .unwrap()
        .get_value()
        .to_string();
    assert_eq!(sid, "system:0");
}

#[tokio::test]
async fn repeated_discovery_reaches_fixed_point() {
    let h = harness();

    h.supervisor.bootstrap().await;
    h.supervisor.run_tick().await;
    let ids_before = {
        let mut ids = h.registry.list_ids().await;
        ids.sort();
        ids
    };

    h.supervisor.run_tick().await;
    h.supervisor.run_tick().await;

    let mut ids_after = h.registry.list_ids().await;
    ids_after.sort();
    assert_eq!(ids_before, ids_after);
    assert_eq!(h.registrar.size().await, 2);
}

#[tokio::test]
async fn outage_evicts_after_threshold_and_recovery_readmits() {
    let h = harness();

    h.supervisor.bootstrap().await;
    h.supervisor.run_tick().await;

    // engine goes dark
    h.probe.set_healthy(false);
    for tick in 1..=9 {
        h.supervisor.run_tick().await;
        assert_eq!(
            h.registry.failure_count("postgres:127.0.0.1:5432").await,
            tick,
            "tick {tick} should retain the service"
        );
    }
    assert!(h.registrar.contains("postgres:127.0.0.1:5432").await);

    // tenth consecutive failure: record and collector are gone, the
    // pseudo-service survives
    h.supervisor.run_tick().await;
    assert!(h.registry.get("postgres:127.0.0.1:5432").await.is_none());
    assert!(!h.registrar.contains("postgres:127.0.0.1:5432").await);
    assert!(h.registry.get("system:0").await.is_some());

    // engine returns: next tick re-admits with a fresh collector and a
    // clean counter
    h.probe.set_healthy(true);
    h.supervisor.run_tick().await;

    let service = h.registry.get("postgres:127.0.0.1:5432").await.unwrap();
    assert_eq!(service.total_errors, 0);
    assert!(service.collector.is_some());
    assert!(h.registrar.contains("postgres:127.0.0.1:5432").await);
}
