//! Gateway service library
//!
//! Pipeline: HTTP request → auth → envelope decode → record store write →
//! anomaly detection over per-series history → grouped alert dispatch.

pub mod audit;
pub mod config;
pub mod detector;
pub mod dispatch;
pub mod ingest;
pub mod metrics;
pub mod retry;
pub mod server;
pub mod store;
