//! Latchkey CLI - command-line control for the Latchkey daemon
//!
//! Every command is one IPC request to the running daemon.

pub mod client;
pub mod commands;

pub use client::{ClientError, LatchkeyClient};
pub use commands::*;
