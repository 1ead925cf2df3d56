//! HTTP surface: ingestion, query, health and metrics endpoints.

pub mod auth;
pub mod http;
