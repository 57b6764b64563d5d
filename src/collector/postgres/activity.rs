//! Client backend activity collector, based on `pg_stat_activity`.

use sqlx::Row;

use crate::collector::{
    CollectError, Collector, CollectorConfig, ConstLabels, Desc, MetricKind, MetricSink,
    SetupError,
};
use crate::connstr::ConnString;

const ACTIVITY_QUERY: &str = "SELECT coalesce(state, 'unknown') AS state, count(*) AS count \
     FROM pg_stat_activity WHERE backend_type = 'client backend' GROUP BY state";

pub struct ActivityCollector {
    connections: Desc,
    connstr: ConnString,
}

/// Factory for the `postgres/activity` collector.
pub fn new(
    labels: ConstLabels,
    config: &CollectorConfig,
) -> Result<Box<dyn Collector>, SetupError> {
    Ok(Box::new(ActivityCollector {
        connections: Desc::new(
            "postgres_activity_connections_in_flight",
            "Number of client backends, by connection state.",
            MetricKind::Gauge,
        )
        .with_variable_labels(&["state"])
        .with_const_labels(labels),
        connstr: config.connstr()?,
    }))
}

#[async_trait::async_trait]
impl Collector for ActivityCollector {
    fn name(&self) -> &'static str {
        "postgres/activity"
    }

    fn describe(&self) -> Vec<Desc> {
        vec![self.connections.clone()]
    }

    async fn collect(&self, sink: &mut MetricSink) -> Result<(), CollectError> {
        let mut conn = super::connect(&self.connstr).await?;
        let rows = sqlx::query(ACTIVITY_QUERY).fetch_all(&mut conn).await;
        super::close(conn).await;

        for row in rows? {
            let state: String = row.try_get("state")?;
            let count: i64 = row.try_get("count")?;
            sink.put(&self.connections, count as f64, &[&state]);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceType;

    #[test]
    fn test_describe() {
        let mut config = CollectorConfig::new(ServiceType::Postgres);
        config.conninfo = "host=127.0.0.1 port=5432 user=pgscv dbname=postgres".to_string();

        let collector = new(ConstLabels::new(), &config).unwrap();
        let descs = collector.describe();
        assert_eq!(descs.len(), 1);
        assert_eq!(descs[0].name, "postgres_activity_connections_in_flight");
        assert_eq!(descs[0].variable_labels, vec!["state"]);
    }

    #[test]
    fn test_factory_rejects_bad_conninfo() {
        let mut config = CollectorConfig::new(ServiceType::Postgres);
        config.conninfo = "bogus".to_string();
        assert!(new(ConstLabels::new(), &config).is_err());
    }
}
