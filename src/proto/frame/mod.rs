//! RESP frame types.
//!
//! Frames are the raw reply values the normalizers in `core::reply`
//! consume, and the request shape the transport sends.

/// Frame type definitions.
pub mod types;

pub use types::Frame;
