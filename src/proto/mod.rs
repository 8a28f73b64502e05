//! RESP (Redis Serialization Protocol) support.
//!
//! - [`codec`] - Streaming encoder and decoder
//! - [`error`] - Error types shared by the whole crate
//! - [`frame`] - Frame type representing RESP values

pub mod codec;
/// Error types.
pub mod error;
pub mod frame;
