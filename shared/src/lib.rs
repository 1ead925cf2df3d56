//! Shared types and envelope codec for Vantage
//!
//! This crate contains the telemetry data model, the storage-key
//! fingerprinting scheme, and the ingestion envelope decoder used by the
//! gateway service.

pub mod envelope;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use error::{DecodeError, DispatchError, StorageError};
pub use types::{key::*, telemetry::*};
