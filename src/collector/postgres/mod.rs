//! Postgres metric collectors.
//!
//! Every collector opens a one-shot connection inside `collect` and closes
//! it before returning; connections are never kept across scrapes.

pub mod activity;
pub mod databases;

use sqlx::postgres::PgConnection;
use sqlx::Connection;

use super::CollectError;
use crate::connstr::ConnString;

/// Open a one-shot connection to the service.
pub(crate) async fn connect(connstr: &ConnString) -> Result<PgConnection, CollectError> {
    Ok(PgConnection::connect_with(&connstr.connect_options()).await?)
}

/// Close a connection, tolerating failures.
pub(crate) async fn close(conn: PgConnection) {
    if let Err(e) = conn.close().await {
        tracing::debug!(error = %e, "failed to close connection; ignore");
    }
}
