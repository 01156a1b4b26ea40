// pkv-common - Shared wire types for PipeKV
//
// This crate defines the untyped reply model and the RESP2 codec used by the
// client engine to talk to Redis-compatible servers.

pub mod codec;
pub mod error;
pub mod reply;

// Re-export for convenience
pub use codec::*;
pub use error::*;
pub use reply::*;
