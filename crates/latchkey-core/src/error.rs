//! Error types for the Latchkey core library

use thiserror::Error;

use crate::auth::AuthError;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("Attempt threshold must be at least 1 (got {0})")]
    InvalidThreshold(u32),

    #[error("Maximum attempts must be at least 1 (got {0})")]
    InvalidMaxAttempts(u32),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),
}
