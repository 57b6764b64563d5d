//! Pool statistics collector, based on `SHOW POOLS`.

use sqlx::postgres::PgRow;
use sqlx::{Executor, Row};

use crate::collector::{
    CollectError, Collector, CollectorConfig, ConstLabels, Desc, MetricKind, MetricSink,
    SetupError,
};
use crate::connstr::ConnString;

const POOLS_QUERY: &str = "SHOW POOLS";

const CLIENT_STATES: &[&str] = &["cl_active", "cl_waiting"];
const SERVER_STATES: &[&str] = &["sv_active", "sv_idle", "sv_used", "sv_tested", "sv_login"];

pub struct PoolsCollector {
    connections: Desc,
    max_wait: Desc,
    connstr: ConnString,
}

/// Factory for the `pgbouncer/pools` collector.
pub fn new(
    labels: ConstLabels,
    config: &CollectorConfig,
) -> Result<Box<dyn Collector>, SetupError> {
    Ok(Box::new(PoolsCollector {
        connections: Desc::new(
            "pgbouncer_pool_connections_in_flight",
            "Number of connections in the pool, by connection state.",
            MetricKind::Gauge,
        )
        .with_variable_labels(&["database", "user", "pool_mode", "state"])
        .with_const_labels(labels.clone()),
        max_wait: Desc::new(
            "pgbouncer_pool_max_wait_seconds",
            "Age of the oldest unserved client request in the pool.",
            MetricKind::Gauge,
        )
        .with_variable_labels(&["database", "user", "pool_mode"])
        .with_const_labels(labels),
        connstr: config.connstr()?,
    }))
}

#[async_trait::async_trait]
impl Collector for PoolsCollector {
    fn name(&self) -> &'static str {
        "pgbouncer/pools"
    }

    fn describe(&self) -> Vec<Desc> {
        vec![self.connections.clone(), self.max_wait.clone()]
    }

    async fn collect(&self, sink: &mut MetricSink) -> Result<(), CollectError> {
        let mut conn = super::super::postgres::connect(&self.connstr).await?;
        let rows = conn.fetch_all(sqlx::raw_sql(POOLS_QUERY)).await;
        super::super::postgres::close(conn).await;

        for row in rows? {
            let database: String = row.try_get("database")?;
            let user: String = row.try_get("user")?;
            let pool_mode: String = row.try_get("pool_mode")?;

            for state in CLIENT_STATES.iter().chain(SERVER_STATES) {
                let value = get_count(&row, state);
                sink.put(
                    &self.connections,
                    value,
                    &[&database, &user, &pool_mode, state],
                );
            }

            let max_wait = get_count(&row, "maxwait") + get_count(&row, "maxwait_us") / 1_000_000.0;
            sink.put(&self.max_wait, max_wait, &[&database, &user, &pool_mode]);
        }

        Ok(())
    }
}

// pgbouncer reports counts as int4 or int8 depending on version
fn get_count(row: &PgRow, column: &str) -> f64 {
    if let Ok(v) = row.try_get::<i64, _>(column) {
        return v as f64;
    }
    if let Ok(v) = row.try_get::<i32, _>(column) {
        return f64::from(v);
    }
    0.0
}
