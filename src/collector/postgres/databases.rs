//! Per-database statistics collector, based on `pg_stat_database`.

use sqlx::Row;

use crate::collector::{
    CollectError, Collector, CollectorConfig, ConstLabels, Desc, MetricKind, MetricSink,
    SetupError,
};
use crate::connstr::ConnString;

const DATABASES_QUERY: &str = "SELECT datname, xact_commit, xact_rollback, blks_read, blks_hit, \
     tup_returned, tup_fetched, tup_inserted, tup_updated, tup_deleted, deadlocks, temp_bytes \
     FROM pg_stat_database WHERE datname IS NOT NULL";

pub struct DatabasesCollector {
    xact_commits: Desc,
    xact_rollbacks: Desc,
    blocks: Desc,
    tuples: Desc,
    deadlocks: Desc,
    temp_bytes: Desc,
    connstr: ConnString,
}

/// Factory for the `postgres/databases` collector.
pub fn new(
    labels: ConstLabels,
    config: &CollectorConfig,
) -> Result<Box<dyn Collector>, SetupError> {
    Ok(Box::new(DatabasesCollector {
        xact_commits: Desc::new(
            "postgres_database_xact_commits_total",
            "Total number of transactions committed, per database.",
            MetricKind::Counter,
        )
        .with_variable_labels(&["database"])
        .with_const_labels(labels.clone()),
        xact_rollbacks: Desc::new(
            "postgres_database_xact_rollbacks_total",
            "Total number of transactions rolled back, per database.",
            MetricKind::Counter,
        )
        .with_variable_labels(&["database"])
        .with_const_labels(labels.clone()),
        blocks: Desc::new(
            "postgres_database_blocks_total",
            "Total number of disk blocks accessed, per database and access type.",
            MetricKind::Counter,
        )
        .with_variable_labels(&["database", "access"])
        .with_const_labels(labels.clone()),
        tuples: Desc::new(
            "postgres_database_tuples_total",
            "Total number of rows processed, per database and operation.",
            MetricKind::Counter,
        )
        .with_variable_labels(&["database", "op"])
        .with_const_labels(labels.clone()),
        deadlocks: Desc::new(
            "postgres_database_deadlocks_total",
            "Total number of deadlocks detected, per database.",
            MetricKind::Counter,
        )
        .with_variable_labels(&["database"])
        .with_const_labels(labels.clone()),
        temp_bytes: Desc::new(
            "postgres_database_temp_bytes_total",
            "Total amount of data written to temporary files, per database.",
            MetricKind::Counter,
        )
        .with_variable_labels(&["database"])
        .with_const_labels(labels),
        connstr: config.connstr()?,
    }))
}

#[async_trait::async_trait]
impl Collector for DatabasesCollector {
    fn name(&self) -> &'static str {
        "postgres/databases"
    }

    fn describe(&self) -> Vec<Desc> {
        vec![
            self.xact_commits.clone(),
            self.xact_rollbacks.clone(),
            self.blocks.clone(),
            self.tuples.clone(),
            self.deadlocks.clone(),
            self.temp_bytes.clone(),
        ]
    }

    async fn collect(&self, sink: &mut MetricSink) -> Result<(), CollectError> {
        let mut conn = super::connect(&self.connstr).await?;
        let rows = sqlx::query(DATABASES_QUERY).fetch_all(&mut conn).await;
        super::close(conn).await;

        for row in rows? {
            let database: String = row.try_get("datname")?;

            let xact_commit: i64 = row.try_get("xact_commit")?;
            let xact_rollback: i64 = row.try_get("xact_rollback")?;
            let blks_read: i64 = row.try_get("blks_read")?;
            let blks_hit: i64 = row.try_get("blks_hit")?;
            let tup_returned: i64 = row.try_get("tup_returned")?;
            let tup_fetched: i64 = row.try_get("tup_fetched")?;
            let tup_inserted: i64 = row.try_get("tup_inserted")?;
            let tup_updated: i64 = row.try_get("tup_updated")?;
            let tup_deleted: i64 = row.try_get("tup_deleted")?;
            let deadlocks: i64 = row.try_get("deadlocks")?;
            let temp_bytes: i64 = row.try_get("temp_bytes")?;

            sink.put(&self.xact_commits, xact_commit as f64, &[&database]);
            sink.put(&self.xact_rollbacks, xact_rollback as f64, &[&database]);
            sink.put(&self.blocks, blks_read as f64, &[&database, "read"]);
            sink.put(&self.blocks, blks_hit as f64, &[&database, "hit"]);
            sink.put(&self.tuples, tup_returned as f64, &[&database, "returned"]);
            sink.put(&self.tuples, tup_fetched as f64, &[&database, "fetched"]);
            sink.put(&self.tuples, tup_inserted as f64, &[&database, "inserted"]);
            sink.put(&self.tuples, tup_updated as f64, &[&database, "updated"]);
            sink.put(&self.tuples, tup_deleted as f64, &[&database, "deleted"]);
            sink.put(&self.deadlocks, deadlocks as f64, &[&database]);
            sink.put(&self.temp_bytes, temp_bytes as f64, &[&database]);
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
        config.conninfo = "host=127.0.0.1 user=pgscv dbname=postgres".to_string();

        let collector = new(ConstLabels::new(), &config).unwrap();
        let names: Vec<_> = collector.describe().iter().map(|d| d.name.clone()).collect();
        assert!(names.contains(&"postgres_database_xact_commits_total".to_string()));
        assert_eq!(names.len(), 6);
    }
}
