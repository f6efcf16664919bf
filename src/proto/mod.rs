//! RESP protocol pieces shared by the router and transports.
//!
//! ## Modules
//!
//! - [`codec`] - Encoder and decoder for RESP2 framing
//! - [`error`] - Error taxonomy for the whole crate
//! - [`frame`] - Frame types representing RESP values

pub mod codec;
/// Error types.
pub mod error;
pub mod frame;
