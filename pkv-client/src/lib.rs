// pkv-client - Asynchronous pipelined client engine for PipeKV
//
// A background engine thread owns one connection to a Redis-compatible
// server. Callers submit commands with typed continuations from any thread;
// the engine pipelines them, decodes every reply into the requested type and
// runs delayed or repeating commands on timers.

mod blocking;
mod client;
mod command;
mod config;
mod decode;
mod engine;
mod error;
mod queue;
mod registry;
mod schedule;
mod state;
mod stats;
mod transport;

pub use blocking::BlockingReply;
pub use client::Client;
pub use command::{CommandHandle, CommandId, Schedule, Status};
pub use config::ClientConfig;
pub use decode::{decode, FromReply, Nil, ResultKind};
pub use engine::StateCallback;
pub use error::{CommandError, ConnectionError, ErrorKind};
pub use state::ConnectionState;
pub use stats::EngineStats;
pub use transport::Endpoint;

// Re-export for convenience
pub use pkv_common::{Reply, ReplyKind};
