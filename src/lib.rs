//! pgSCV - metrics agent for PostgreSQL, Pgbouncer and the host they run
//! on.
//!
//! The agent continuously discovers eligible local services by inspecting
//! the process table and their on-disk metadata, attaches a type-specific
//! bundle of metric collectors to each of them, health-checks the
//! registered services and serves the resulting time series in the
//! Prometheus text format.
//!
//! # Architecture
//!
//! - [`service`]: service registry, auto-discovery, health checking and
//!   the supervisor composing them
//! - [`collector`]: metric collectors, their factories and the registrar
//!   consulted by the scrape endpoint
//! - [`http`] / [`push`]: pull and push delivery of the sample set
//! - [`config`]: YAML configuration with validation

pub mod collector;
pub mod config;
pub mod connstr;
pub mod filter;
pub mod http;
pub mod probe;
pub mod push;
pub mod service;

pub use collector::CollectorRegistrar;
pub use config::AppConfig;
pub use service::{Service, ServiceRegistry, Supervisor};
