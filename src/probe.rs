//! Short-lived connectivity probes.
//!
//! A probe opens one connection to the target, closes it, and reports the
//! outcome. Probes are never pooled; discovery and health checking both
//! open a fresh one per attempt.

use std::time::Duration;

use sqlx::postgres::PgConnection;
use sqlx::Connection;
use thiserror::Error;

use crate::connstr::{ConnString, ConnStringError};

/// Default per-probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors produced by a connection probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The conninfo string could not be parsed.
    #[error("conninfo error: {0}")]
    Conninfo(#[from] ConnStringError),

    /// The connection attempt failed.
    #[error("connection failed: {0}")]
    Connect(#[from] sqlx::Error),

    /// The connection attempt did not finish within the timeout.
    #[error("connection timed out")]
    Timeout,
}

/// Connectivity check against a conninfo string.
#[async_trait::async_trait]
pub trait ConnectionProbe: Send + Sync {
    /// Open a one-shot connection and close it again.
    async fn probe(&self, conninfo: &str) -> Result<(), ProbeError>;
}

/// Probe backed by a real Postgres-protocol connection. Works against both
/// Postgres and Pgbouncer endpoints.
#[derive(Debug, Clone)]
pub struct PgProbe {
    timeout: Duration,
}

impl PgProbe {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for PgProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ConnectionProbe for PgProbe {
    async fn probe(&self, conninfo: &str) -> Result<(), ProbeError> {
        let opts = ConnString::parse(conninfo)?.connect_options();

        tracing::debug!(conninfo = %conninfo, "making test connection");
        let conn = tokio::time::timeout(self.timeout, PgConnection::connect_with(&opts))
            .await
            .map_err(|_| ProbeError::Timeout)??;

        if let Err(e) = conn.close().await {
            tracing::debug!(error = %e, "failed to close test connection; ignore");
        }

        tracing::debug!("test connection success");
        Ok(())
    }
}
