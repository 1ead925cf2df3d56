//! Error taxonomy shared across the ingestion pipeline.
//!
//! Decode and auth failures abort an envelope with no partial effects;
//! storage and dispatch failures degrade to typed partial results and are
//! never fatal to the serving process.

use thiserror::Error;

/// Envelope decoding failures. Terminal for the whole envelope.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Corrupt or truncated compressed stream.
    #[error("compression error: {0}")]
    Compression(#[source] std::io::Error),

    /// Field type mismatch, missing discriminator, or invalid JSON.
    #[error("malformed envelope: {0}")]
    Malformed(String),
}

/// Per-item storage failures, surfaced after bounded retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Backend rejected the write under load; retryable.
    #[error("write throttled")]
    Throttled,

    /// Serialized item exceeds the per-item byte ceiling; not retryable.
    #[error("item exceeds {0} byte limit")]
    ItemTooLarge(usize),

    /// Backend unreachable or erroring; retryable.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Whether another attempt can succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::ItemTooLarge(_))
    }
}

/// Notification delivery failures, surfaced after bounded retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Channel endpoint unreachable or returned a server error.
    #[error("notification channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// Channel rejected the configured target; retrying cannot help.
    #[error("invalid channel target: {0}")]
    InvalidTarget(String),
}

impl DispatchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ChannelUnavailable(_))
    }
}
