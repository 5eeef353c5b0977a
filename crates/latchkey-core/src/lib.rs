//! Latchkey Core - domain logic for the foreground lock daemon
//!
//! This crate provides:
//! - Identity, lock set, and persisted configuration types
//! - Foreground event selection and change tracking
//! - Lock policy evaluation and the background-duration timer
//! - PIN hashing and the challenge state machine with attempt counting
//! - The retention-capped capture record log
//!
//! Nothing in here performs I/O; the daemon crate wires these pieces to the
//! host, the store, and the capture device.

pub mod auth;
pub mod error;
pub mod foreground;
pub mod policy;
pub mod record;
pub mod types;

pub use auth::{AuthError, AuthOutcome, AuthSession, ChallengeState, LockoutPolicy, PinHasher};
pub use error::{CoreError, Result};
pub use foreground::{ActivityEvent, ActivityKind, ChangeTracker, ForegroundChange, TimeWindow, UsageStat};
pub use policy::{BackgroundTimer, Decision, PolicyEvaluator};
pub use record::{RecordLog, MAX_RECORDS};
pub use types::*;
