//! Per-session wrong-attempt budget
//!
//! A challenge session tolerates `max_attempts - 1` wrong PINs. The attempt
//! that reaches `max_attempts` ends the session in lockout.

use crate::error::{CoreError, Result};

/// Attempts allowed per challenge session by default
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Wrong-attempt budget for one challenge session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockoutPolicy {
    max_attempts: u32,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl LockoutPolicy {
    pub fn new(max_attempts: u32) -> Result<Self> {
        if max_attempts == 0 {
            return Err(CoreError::InvalidMaxAttempts(max_attempts));
        }
        Ok(Self { max_attempts })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Check if the session must end in lockout
    pub fn is_exhausted(&self, failed_attempts: u32) -> bool {
        failed_attempts >= self.max_attempts
    }

    pub fn remaining(&self, failed_attempts: u32) -> u32 {
        self.max_attempts.saturating_sub(failed_attempts)
    }

    /// Get a human-readable description of the current attempt state
    pub fn describe(&self, failed_attempts: u32) -> String {
        match self.remaining(failed_attempts) {
            0 => format!("Wrong PIN entered {} times", self.max_attempts),
            1 => "1 attempt remaining".to_string(),
            n => format!("{} attempts remaining", n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = LockoutPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
        assert!(policy.is_exhausted(10));
    }

    #[test]
    fn test_remaining_saturates() {
        let policy = LockoutPolicy::default();
        assert_eq!(policy.remaining(0), 3);
        assert_eq!(policy.remaining(2), 1);
        assert_eq!(policy.remaining(7), 0);
    }

    #[test]
    fn test_zero_budget_rejected() {
        assert!(LockoutPolicy::new(0).is_err());
        assert_eq!(LockoutPolicy::new(5).unwrap().max_attempts(), 5);
    }

    #[test]
    fn test_describe() {
        let policy = LockoutPolicy::default();
        assert_eq!(policy.describe(0), "3 attempts remaining");
        assert_eq!(policy.describe(2), "1 attempt remaining");
        assert_eq!(policy.describe(3), "Wrong PIN entered 3 times");
    }
}
