//! RESP2 codec.
//!
//! Transports use [`Encoder`] to put a command frame on the wire and
//! [`Decoder`] to read replies back incrementally.

mod decoder;
mod encoder;

pub use decoder::Decoder;
pub use encoder::Encoder;
