//! Data model shared between the decoder, store, detector and dispatcher.

pub mod key;
pub mod telemetry;
