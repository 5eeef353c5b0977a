//! PIN authentication for challenge sessions
//!
//! # Security Model
//!
//! - A single device-owner PIN guards every challenge
//! - The PIN is hashed using Argon2id and only the PHC string is persisted
//! - Each challenge session has a fixed wrong-attempt budget; exhausting it
//!   ends the session in a terminal lockout
//! - Intruder captures are requested once the running count reaches the
//!   configured threshold

mod lockout;
mod pin;
mod session;

pub use lockout::{LockoutPolicy, DEFAULT_MAX_ATTEMPTS};
pub use pin::{validate_new_pin, validate_pin, PinHasher, MAX_PIN_LENGTH, MIN_PIN_LENGTH};
pub use session::{AuthSession, ChallengeState, SubmitResult};

use serde::{Deserialize, Serialize};

/// Result of submitting a PIN to the active challenge
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AuthOutcome {
    /// PIN matched; dismiss the challenge surface
    Success,
    /// Wrong PIN; clear input and show the remaining tries
    Retry { attempt_count: u32, remaining: u32 },
    /// Attempt budget exhausted; the challenge is dismissed without unlocking
    LockedOut { attempt_count: u32 },
    /// The session is already resolved; nothing was counted
    Rejected,
    /// No challenge is being shown
    NoActiveChallenge,
}

/// Authentication error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("PIN not set up - run setup first")]
    PinNotSetUp,

    #[error("PIN already set; clear it from a challenge with forgot-PIN first")]
    PinAlreadySet,

    #[error("PIN must be {0}-{1} digits")]
    InvalidPinLength(usize, usize),

    #[error("PIN must contain only digits")]
    InvalidPinFormat,

    #[error("PINs do not match")]
    PinMismatch,

    #[error("Credential reset is not available for this challenge")]
    ResetUnavailable,

    #[error("Crypto error: {0}")]
    CryptoError(String),
}
