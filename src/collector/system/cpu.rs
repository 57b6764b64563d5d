//! CPU usage collector.
//!
//! Exposes the kernel's per-mode CPU time counters from `/proc/stat`,
//! aggregated over all CPUs. A per-CPU cache of the last reading detects
//! counters that jump backwards (CPU hot-plug, reboot); the affected CPU's
//! cache entry is reset without touching the other CPUs, and the reported
//! aggregate is always recomputed from the fresh reading.

use std::sync::Mutex;

use procfs::CurrentSI;

use crate::collector::{
    CollectError, Collector, CollectorConfig, ConstLabels, Desc, MetricKind, MetricSink,
    SetupError,
};

/// Per-CPU counters in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct CpuTicks {
    user: f64,
    nice: f64,
    system: f64,
    idle: f64,
    iowait: f64,
    irq: f64,
    softirq: f64,
    steal: f64,
    guest: f64,
    guest_nice: f64,
}

#[derive(Debug, Default)]
struct CpuCache {
    per_cpu: Vec<CpuTicks>,
}

pub struct CpuCollector {
    seconds: Desc,
    guest_seconds: Desc,
    cache: Mutex<CpuCache>,
}

/// Factory for the `system/cpu` collector.
pub fn new(
    labels: ConstLabels,
    _config: &CollectorConfig,
) -> Result<Box<dyn Collector>, SetupError> {
    Ok(Box::new(CpuCollector {
        seconds: Desc::new(
            "node_cpu_seconds_total",
            "Seconds the CPUs spent in each mode.",
            MetricKind::Counter,
        )
        .with_variable_labels(&["mode"])
        .with_const_labels(labels.clone()),
        guest_seconds: Desc::new(
            "node_cpu_guest_seconds_total",
            "Seconds the CPUs spent in guests (VMs) for each mode.",
            MetricKind::Counter,
        )
        .with_variable_labels(&["mode"])
        .with_const_labels(labels),
        cache: Mutex::new(CpuCache::default()),
    }))
}

#[async_trait::async_trait]
impl Collector for CpuCollector {
    fn name(&self) -> &'static str {
        "system/cpu"
    }

    fn describe(&self) -> Vec<Desc> {
        vec![self.seconds.clone(), self.guest_seconds.clone()]
    }

    async fn collect(&self, sink: &mut MetricSink) -> Result<(), CollectError> {
        let fresh = read_cpu_times()?;

        let total = {
            let mut cache = self
                .cache
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            update_cache(&mut cache, &fresh)
        };

        sink.put(&self.seconds, total.user, &["user"]);
        sink.put(&self.seconds, total.nice, &["nice"]);
        sink.put(&self.seconds, total.system, &["system"]);
        sink.put(&self.seconds, total.idle, &["idle"]);
        sink.put(&self.seconds, total.iowait, &["iowait"]);
        sink.put(&self.seconds, total.irq, &["irq"]);
        sink.put(&self.seconds, total.softirq, &["softirq"]);
        sink.put(&self.seconds, total.steal, &["steal"]);

        // guest time is also accounted in user/nice; exposed separately
        sink.put(&self.guest_seconds, total.guest, &["user"]);
        sink.put(&self.guest_seconds, total.guest_nice, &["nice"]);

        Ok(())
    }
}

fn read_cpu_times() -> Result<Vec<CpuTicks>, CollectError> {
    let stat = procfs::KernelStats::current()?;
    let tps = procfs::ticks_per_second() as f64;

    Ok(stat
        .cpu_time
        .iter()
        .map(|ct| CpuTicks {
            user: ct.user as f64 / tps,
            nice: ct.nice as f64 / tps,
            system: ct.system as f64 / tps,
            idle: ct.idle as f64 / tps,
            iowait: ct.iowait.unwrap_or(0) as f64 / tps,
            irq: ct.irq.unwrap_or(0) as f64 / tps,
            softirq: ct.softirq.unwrap_or(0) as f64 / tps,
            steal: ct.steal.unwrap_or(0) as f64 / tps,
            guest: ct.guest.unwrap_or(0) as f64 / tps,
            guest_nice: ct.guest_nice.unwrap_or(0) as f64 / tps,
        })
        .collect())
}

/// Refresh the per-CPU cache from a new reading and return the aggregate
/// across all CPUs of that reading.
///
/// A backwards jump of a CPU's idle counter resets the cache entry for
/// that CPU alone; other counters jumping backwards keep the cached value
/// and are only logged.
fn update_cache(cache: &mut CpuCache, fresh: &[CpuTicks]) -> CpuTicks {
    if cache.per_cpu.len() != fresh.len() {
        cache.per_cpu = vec![CpuTicks::default(); fresh.len()];
    }

    for (i, new) in fresh.iter().enumerate() {
        let cached = &mut cache.per_cpu[i];

        if new.idle < cached.idle {
            tracing::warn!(
                cpu = i,
                old_value = cached.idle,
                new_value = new.idle,
                "CPU idle counter jumped backwards, possible hotplug event, resetting CPU cache"
            );
            *cached = CpuTicks::default();
        }
        cached.idle = new.idle;

        update_field(&mut cached.user, new.user, i, "user");
        update_field(&mut cached.nice, new.nice, i, "nice");
        update_field(&mut cached.system, new.system, i, "system");
        update_field(&mut cached.iowait, new.iowait, i, "iowait");
        update_field(&mut cached.irq, new.irq, i, "irq");
        update_field(&mut cached.softirq, new.softirq, i, "softirq");
        update_field(&mut cached.steal, new.steal, i, "steal");
        update_field(&mut cached.guest, new.guest, i, "guest");
        update_field(&mut cached.guest_nice, new.guest_nice, i, "guest_nice");
    }

    let mut total = CpuTicks::default();
    for new in fresh {
        total.user += new.user;
        total.nice += new.nice;
        total.system += new.system;
        total.idle += new.idle;
        total.iowait += new.iowait;
        total.irq += new.irq;
        total.softirq += new.softirq;
        total.steal += new.steal;
        total.guest += new.guest;
        total.guest_nice += new.guest_nice;
    }
    total
}

fn update_field(cached: &mut f64, new: f64, cpu: usize, mode: &str) {
    if new >= *cached {
        *cached = new;
    } else {
        tracing::warn!(
            cpu = cpu,
            mode = mode,
            old_value = *cached,
            new_value = new,
            "CPU counter jumped backwards"
        );
    }
}
