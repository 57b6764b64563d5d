//! Load average collector.

use procfs::Current;

use crate::collector::{
    CollectError, Collector, CollectorConfig, ConstLabels, Desc, MetricKind, MetricSink,
    SetupError,
};

pub struct LoadavgCollector {
    load1: Desc,
    load5: Desc,
    load15: Desc,
}

/// Factory for the `system/loadavg` collector.
pub fn new(
    labels: ConstLabels,
    _config: &CollectorConfig,
) -> Result<Box<dyn Collector>, SetupError> {
    Ok(Box::new(LoadavgCollector {
        load1: Desc::new("node_load1", "1m load average.", MetricKind::Gauge)
            .with_const_labels(labels.clone()),
        load5: Desc::new("node_load5", "5m load average.", MetricKind::Gauge)
            .with_const_labels(labels.clone()),
        load15: Desc::new("node_load15", "15m load average.", MetricKind::Gauge)
            .with_const_labels(labels),
    }))
}

#[async_trait::async_trait]
impl Collector for LoadavgCollector {
    fn name(&self) -> &'static str {
        "system/loadavg"
    }

    fn describe(&self) -> Vec<Desc> {
        vec![self.load1.clone(), self.load5.clone(), self.load15.clone()]
    }

    async fn collect(&self, sink: &mut MetricSink) -> Result<(), CollectError> {
        let loadavg = procfs::LoadAverage::current()?;

        sink.put(&self.load1, f64::from(loadavg.one), &[]);
        sink.put(&self.load5, f64::from(loadavg.five), &[]);
        sink.put(&self.load15, f64::from(loadavg.fifteen), &[]);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceType;

    #[test]
    fn test_describe() {
        let collector = new(
            ConstLabels::new(),
            &CollectorConfig::new(ServiceType::System),
        )
        .unwrap();
        let names: Vec<_> = collector.describe().iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["node_load1", "node_load5", "node_load15"]);
    }
}
