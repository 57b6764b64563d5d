//! Network interface statistics collector.
//!
//! Reads `/proc/net/dev` directly; the file is line-oriented with a
//! two-line header followed by one row of sixteen counters per interface.
//! Interfaces are matched against the `netdev/device` filter.

use std::collections::BTreeMap;

use crate::collector::{
    CollectError, Collector, CollectorConfig, ConstLabels, Desc, MetricKind, MetricSink,
    SetupError,
};
use crate::filter::Filter;

const PROC_NETDEV: &str = "/proc/net/dev";

pub struct NetdevCollector {
    bytes: Desc,
    packets: Desc,
    events: Desc,
    device_filter: Filter,
}

/// Factory for the `system/netdev` collector.
pub fn new(
    labels: ConstLabels,
    config: &CollectorConfig,
) -> Result<Box<dyn Collector>, SetupError> {
    Ok(Box::new(NetdevCollector {
        bytes: Desc::new(
            "node_network_bytes_total",
            "Total number of bytes processed by network device, by each direction.",
            MetricKind::Counter,
        )
        .with_variable_labels(&["device", "type"])
        .with_const_labels(labels.clone()),
        packets: Desc::new(
            "node_network_packets_total",
            "Total number of packets processed by network device, by each direction.",
            MetricKind::Counter,
        )
        .with_variable_labels(&["device", "type"])
        .with_const_labels(labels.clone()),
        events: Desc::new(
            "node_network_events_total",
            "Total number of events occurred on network device, by each type and direction.",
            MetricKind::Counter,
        )
        .with_variable_labels(&["device", "type", "event"])
        .with_const_labels(labels),
        device_filter: config.filters.get("netdev/device"),
    }))
}

#[async_trait::async_trait]
impl Collector for NetdevCollector {
    fn name(&self) -> &'static str {
        "system/netdev"
    }

    fn describe(&self) -> Vec<Desc> {
        vec![self.bytes.clone(), self.packets.clone(), self.events.clone()]
    }

    async fn collect(&self, sink: &mut MetricSink) -> Result<(), CollectError> {
        let content = std::fs::read_to_string(PROC_NETDEV)?;
        let stats = parse_netdev_stats(&content, &self.device_filter)?;

        for (device, stat) in &stats {
            if stat.len() < 16 {
                tracing::warn!(device = %device, columns = stat.len(), "too few stats columns; skip");
                continue;
            }

            sink.put(&self.bytes, stat[0], &[device, "recv"]);
            sink.put(&self.packets, stat[1], &[device, "recv"]);
            sink.put(&self.events, stat[2], &[device, "recv", "errs"]);
            sink.put(&self.events, stat[3], &[device, "recv", "drop"]);
            sink.put(&self.events, stat[4], &[device, "recv", "fifo"]);
            sink.put(&self.events, stat[5], &[device, "recv", "frame"]);
            sink.put(&self.events, stat[6], &[device, "recv", "compressed"]);
            sink.put(&self.events, stat[7], &[device, "recv", "multicast"]);

            sink.put(&self.bytes, stat[8], &[device, "sent"]);
            sink.put(&self.packets, stat[9], &[device, "sent"]);
            sink.put(&self.events, stat[10], &[device, "sent", "errs"]);
            sink.put(&self.events, stat[11], &[device, "sent", "drop"]);
            sink.put(&self.events, stat[12], &[device, "sent", "fifo"]);
            sink.put(&self.events, stat[13], &[device, "sent", "colls"]);
            sink.put(&self.events, stat[14], &[device, "sent", "carrier"]);
            sink.put(&self.events, stat[15], &[device, "sent", "compressed"]);
        }

        Ok(())
    }
}

/// Parse `/proc/net/dev` content into per-device counter rows, dropping
/// devices rejected by the filter.
fn parse_netdev_stats(
    content: &str,
    filter: &Filter,
) -> Result<BTreeMap<String, Vec<f64>>, CollectError> {
    let mut lines = content.lines();

    // two header lines, each with three '|'-separated sections
    for _ in 0..2 {
        let header = lines
            .next()
            .ok_or_else(|| CollectError::InvalidInput("missing header".to_string()))?;
        if header.split('|').count() != 3 {
            return Err(CollectError::InvalidInput(format!(
                "'{header}': wrong number of values"
            )));
        }
    }

    let mut stats = BTreeMap::new();

    for line in lines {
        let values: Vec<&str> = line.split_whitespace().collect();
        if values.is_empty() {
            continue;
        }

        let device = values[0].trim_end_matches(':');
        if !filter.pass(device) {
            tracing::debug!(device = %device, "ignore device");
            continue;
        }

        let mut stat = vec![0.0; values.len() - 1];
        for (i, value) in values[1..].iter().enumerate() {
            match value.parse::<f64>() {
                Ok(v) => stat[i] = v,
                Err(e) => {
                    tracing::error!(value = %value, error = %e, "invalid input; skip");
                }
            }
        }

        stats.insert(device.to_string(), stat);
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:  100     2    0    0    0     0          0         0      100     2    0    0    0     0       0          0
  eth0: 5000    50    1    2    0     0          0         3     7000    70    4    5    0     6       0          0
docker0:  10     1    0    0    0     0          0         0       10     1    0    0    0     0       0          0
";

    fn pass_all() -> Filter {
        let mut f = Filter::default();
        f.compile().unwrap();
        f
    }

    #[test]
    fn test_parse_netdev_stats() {
        let stats = parse_netdev_stats(SAMPLE, &pass_all()).unwrap();
        assert_eq!(stats.len(), 3);

        let eth0 = &stats["eth0"];
        assert_eq!(eth0.len(), 16);
        assert_eq!(eth0[0], 5000.0); // recv bytes
        assert_eq!(eth0[8], 7000.0); // sent bytes
        assert_eq!(eth0[13], 6.0); // sent colls
    }

    #[test]
    fn test_parse_netdev_stats_filtered() {
        let mut filter = Filter::new(None, Some("docker|virbr"));
        filter.compile().unwrap();

        let stats = parse_netdev_stats(SAMPLE, &filter).unwrap();
        assert!(stats.contains_key("eth0"));
        assert!(!stats.contains_key("docker0"));
    }

    #[test]
    fn test_parse_netdev_stats_bad_header() {
        let err = parse_netdev_stats("bogus\ncontent\n", &pass_all()).unwrap_err();
        assert!(matches!(err, CollectError::InvalidInput(_)));

        assert!(parse_netdev_stats("", &pass_all()).is_err());
    }
}
