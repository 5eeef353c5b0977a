//! Latchkey Daemon - foreground monitor and PIN challenge coordinator
//!
//! This crate provides:
//! - The JSON-file backed config & record store
//! - The foreground-change detector over a host activity source
//! - The single-flight intruder capture pipeline
//! - `LockService`, which ties detection, policy, challenges, and captures together
//! - File- and process-backed host adapters
//! - IPC server for CLI and host-shell communication

pub mod adapters;
pub mod capture;
pub mod config;
pub mod detector;
pub mod error;
pub mod ipc;
pub mod service;
pub mod source;
pub mod store;

pub use capture::{CaptureDevice, CaptureError, CapturePipeline};
pub use config::DaemonConfig;
pub use detector::ForegroundDetector;
pub use error::{DaemonError, Result};
pub use ipc::IpcServer;
pub use service::{ChallengeEvent, Collaborators, DismissReason, LockService, ServiceSettings, ServiceStatus};
pub use source::{ActivitySource, Clock, HomeResolver, LabelResolver, SystemClock};
pub use store::StateStore;
