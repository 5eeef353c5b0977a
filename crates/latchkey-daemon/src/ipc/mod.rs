//! IPC server for CLI and host-shell communication
//!
//! Newline-delimited JSON over a Unix domain socket: one request per line,
//! one response per line. A subscribe request turns its connection into a
//! one-way stream of event frames.

mod client;
mod frame;
mod server;
mod socket;
mod types;

// Public API
pub use client::{IpcClient, Subscription, DEFAULT_REQUEST_TIMEOUT};
pub use frame::MAX_FRAME_BYTES;
pub use server::IpcServer;
pub use types::{IpcRequest, IpcResponse};
