//! Memory usage collector.

use procfs::Current;

use crate::collector::{
    CollectError, Collector, CollectorConfig, ConstLabels, Desc, MetricKind, MetricSink,
    SetupError,
};

pub struct MeminfoCollector {
    usage: Desc,
}

/// Factory for the `system/meminfo` collector.
pub fn new(
    labels: ConstLabels,
    _config: &CollectorConfig,
) -> Result<Box<dyn Collector>, SetupError> {
    Ok(Box::new(MeminfoCollector {
        usage: Desc::new(
            "node_memory_usage_bytes",
            "Memory usage in bytes, by usage kind.",
            MetricKind::Gauge,
        )
        .with_variable_labels(&["usage"])
        .with_const_labels(labels),
    }))
}

#[async_trait::async_trait]
impl Collector for MeminfoCollector {
    fn name(&self) -> &'static str {
        "system/meminfo"
    }

    fn describe(&self) -> Vec<Desc> {
        vec![self.usage.clone()]
    }

    async fn collect(&self, sink: &mut MetricSink) -> Result<(), CollectError> {
        let meminfo = procfs::Meminfo::current()?;

        sink.put(&self.usage, meminfo.mem_total as f64, &["mem_total"]);
        sink.put(&self.usage, meminfo.mem_free as f64, &["mem_free"]);
        if let Some(available) = meminfo.mem_available {
            sink.put(&self.usage, available as f64, &["mem_available"]);
        }
        sink.put(&self.usage, meminfo.buffers as f64, &["mem_buffers"]);
        sink.put(&self.usage, meminfo.cached as f64, &["mem_cached"]);
        sink.put(&self.usage, meminfo.swap_total as f64, &["swap_total"]);
        sink.put(&self.usage, meminfo.swap_free as f64, &["swap_free"]);

        Ok(())
    }
}
