//! Pgbouncer metric collectors.
//!
//! The pgbouncer admin console only understands simple-protocol queries,
//! so these collectors issue their statements via `sqlx::raw_sql`.

pub mod pools;
