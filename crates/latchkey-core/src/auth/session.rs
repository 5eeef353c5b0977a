//! Challenge session state machine
//!
//! ```text
//! Idle -> Prompting -> Success
//!                   -> Retry(n) -> ... -> Success | LockedOut
//! ```
//!
//! A session lives for exactly one challenge. It is owned by whoever shows
//! the challenge and is dropped on success, on lockout, or when the user
//! escapes to the home surface. Another locked identity coming forward moves
//! the session rather than replacing it.

use super::{AuthError, AuthOutcome, LockoutPolicy, PinHasher};
use crate::types::{Identity, IntruderDetectionConfig, Secret};

/// Where a challenge session stands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChallengeState {
    Idle,
    Prompting,
    /// Wrong PIN entered; holds the running attempt count
    Retry(u32),
    Success,
    LockedOut,
}

/// What the session decided for one submission
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmitResult {
    pub outcome: AuthOutcome,
    /// An intruder capture should be started for this attempt
    pub capture: bool,
}

/// One challenge for one target identity
#[derive(Debug)]
pub struct AuthSession {
    target: Identity,
    attempt_count: u32,
    policy: LockoutPolicy,
    state: ChallengeState,
}

impl AuthSession {
    /// Create an idle session for `target`
    pub fn new(target: Identity, policy: LockoutPolicy) -> Self {
        Self {
            target,
            attempt_count: 0,
            policy,
            state: ChallengeState::Idle,
        }
    }

    /// Create a session and start prompting immediately
    pub fn begin(target: Identity, policy: LockoutPolicy, secret: &Secret) -> Result<Self, AuthError> {
        let mut session = Self::new(target, policy);
        session.prompt(secret)?;
        Ok(session)
    }

    /// Move from `Idle` to `Prompting`.
    ///
    /// Without a PIN there is nothing to satisfy the challenge; the caller
    /// routes to setup instead.
    pub fn prompt(&mut self, secret: &Secret) -> Result<(), AuthError> {
        if !secret.is_set {
            return Err(AuthError::PinNotSetUp);
        }
        if self.state == ChallengeState::Idle {
            self.state = ChallengeState::Prompting;
        }
        Ok(())
    }

    /// Verify `pin` against `secret` and advance the state machine
    pub fn submit(
        &mut self,
        pin: &str,
        secret: &Secret,
        intruder: &IntruderDetectionConfig,
    ) -> SubmitResult {
        if !self.is_active() {
            return Self::rejected();
        }
        let matched = PinHasher::verify(secret, pin);
        self.record_attempt(matched, intruder)
    }

    /// Advance the state machine with an already computed verification result.
    ///
    /// Lets callers run the hash comparison off the async executor.
    pub fn record_attempt(&mut self, matched: bool, intruder: &IntruderDetectionConfig) -> SubmitResult {
        if !self.is_active() {
            return Self::rejected();
        }

        if matched {
            self.attempt_count = 0;
            self.state = ChallengeState::Success;
            return SubmitResult {
                outcome: AuthOutcome::Success,
                capture: false,
            };
        }

        self.attempt_count += 1;
        let capture = intruder.should_capture(self.attempt_count);

        let outcome = if self.policy.is_exhausted(self.attempt_count) {
            self.state = ChallengeState::LockedOut;
            AuthOutcome::LockedOut {
                attempt_count: self.attempt_count,
            }
        } else {
            self.state = ChallengeState::Retry(self.attempt_count);
            AuthOutcome::Retry {
                attempt_count: self.attempt_count,
                remaining: self.remaining(),
            }
        };

        SubmitResult { outcome, capture }
    }

    fn rejected() -> SubmitResult {
        SubmitResult {
            outcome: AuthOutcome::Rejected,
            capture: false,
        }
    }

    /// Point a live challenge at a different target.
    ///
    /// The attempt count and state carry over, so moving between locked
    /// identities never starts a fresh attempt budget.
    pub fn retarget(&mut self, target: Identity) {
        self.target = target;
    }

    /// Whether PIN entry is currently accepted
    pub fn is_active(&self) -> bool {
        matches!(self.state, ChallengeState::Prompting | ChallengeState::Retry(_))
    }

    /// The "forgot PIN" path is closed once the session is locked out
    pub fn can_reset_credential(&self) -> bool {
        self.is_active()
    }

    pub fn state(&self) -> ChallengeState {
        self.state
    }

    pub fn target(&self) -> &Identity {
        &self.target
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts()
    }

    pub fn remaining(&self) -> u32 {
        self.policy.remaining(self.attempt_count)
    }

    pub fn describe(&self) -> String {
        self.policy.describe(self.attempt_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> Secret {
        PinHasher::with_cost(64, 1).unwrap().hash("2580").unwrap()
    }

    fn target() -> Identity {
        Identity::new("com.example.mail", "Mail")
    }

    fn intruder(enabled: bool, threshold: u32) -> IntruderDetectionConfig {
        IntruderDetectionConfig::new(enabled, threshold).unwrap()
    }

    #[test]
    fn test_prompt_requires_secret() {
        let result = AuthSession::begin(target(), LockoutPolicy::default(), &Secret::unset());
        assert!(matches!(result, Err(AuthError::PinNotSetUp)));
    }

    #[test]
    fn test_idle_until_prompted() {
        let mut session = AuthSession::new(target(), LockoutPolicy::default());
        assert_eq!(session.state(), ChallengeState::Idle);
        let result = session.record_attempt(false, &intruder(false, 1));
        assert_eq!(result.outcome, AuthOutcome::Rejected);
        assert_eq!(session.attempt_count(), 0);

        session.prompt(&secret()).unwrap();
        assert_eq!(session.state(), ChallengeState::Prompting);
    }

    #[test]
    fn test_correct_pin_succeeds() {
        let secret = secret();
        let mut session = AuthSession::begin(target(), LockoutPolicy::default(), &secret).unwrap();
        let result = session.submit("2580", &secret, &intruder(false, 1));
        assert_eq!(result.outcome, AuthOutcome::Success);
        assert_eq!(session.state(), ChallengeState::Success);
    }

    #[test]
    fn test_success_after_retry_resets_count() {
        let secret = secret();
        let mut session = AuthSession::begin(target(), LockoutPolicy::default(), &secret).unwrap();
        let config = intruder(false, 1);

        let result = session.submit("0000", &secret, &config);
        assert_eq!(
            result.outcome,
            AuthOutcome::Retry {
                attempt_count: 1,
                remaining: 2
            }
        );
        assert_eq!(session.state(), ChallengeState::Retry(1));

        let result = session.record_attempt(false, &config);
        assert_eq!(session.state(), ChallengeState::Retry(2));
        assert_eq!(
            result.outcome,
            AuthOutcome::Retry {
                attempt_count: 2,
                remaining: 1
            }
        );

        let result = session.submit("2580", &secret, &config);
        assert_eq!(result.outcome, AuthOutcome::Success);
        assert_eq!(session.attempt_count(), 0);
    }

    #[test]
    fn test_lockout_after_max_attempts() {
        let mut session =
            AuthSession::begin(target(), LockoutPolicy::default(), &secret()).unwrap();
        let config = intruder(false, 1);

        session.record_attempt(false, &config);
        session.record_attempt(false, &config);
        let result = session.record_attempt(false, &config);
        assert_eq!(result.outcome, AuthOutcome::LockedOut { attempt_count: 3 });
        assert_eq!(session.state(), ChallengeState::LockedOut);

        // Further submissions are rejected without counting
        let result = session.record_attempt(false, &config);
        assert_eq!(result.outcome, AuthOutcome::Rejected);
        assert!(!result.capture);
        assert_eq!(session.attempt_count(), 3);

        // Even the right PIN no longer unlocks this session
        let result = session.record_attempt(true, &config);
        assert_eq!(result.outcome, AuthOutcome::Rejected);
    }

    #[test]
    fn test_capture_from_threshold_onwards() {
        let mut session =
            AuthSession::begin(target(), LockoutPolicy::default(), &secret()).unwrap();
        let config = intruder(true, 2);

        let captures: Vec<bool> = (0..3)
            .map(|_| session.record_attempt(false, &config).capture)
            .collect();
        assert_eq!(captures, vec![false, true, true]);
    }

    #[test]
    fn test_no_capture_when_disabled() {
        let mut session =
            AuthSession::begin(target(), LockoutPolicy::default(), &secret()).unwrap();
        let config = intruder(false, 1);
        for _ in 0..3 {
            assert!(!session.record_attempt(false, &config).capture);
        }
    }

    #[test]
    fn test_reset_closed_after_lockout() {
        let mut session = AuthSession::begin(
            target(),
            LockoutPolicy::new(1).unwrap(),
            &secret(),
        )
        .unwrap();
        assert!(session.can_reset_credential());
        session.record_attempt(false, &intruder(false, 1));
        assert!(!session.can_reset_credential());
    }

    #[test]
    fn test_retarget_keeps_attempts() {
        let mut session =
            AuthSession::begin(target(), LockoutPolicy::default(), &secret()).unwrap();
        let config = intruder(false, 1);
        session.record_attempt(false, &config);
        session.record_attempt(false, &config);

        session.retarget(Identity::new("com.example.bank", "Bank"));
        assert_eq!(session.target().id, "com.example.bank");
        assert_eq!(session.state(), ChallengeState::Retry(2));
        assert_eq!(session.remaining(), 1);

        let result = session.record_attempt(false, &config);
        assert_eq!(result.outcome, AuthOutcome::LockedOut { attempt_count: 3 });
    }
}
