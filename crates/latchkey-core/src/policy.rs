//! Lock policy evaluation
//!
//! Two independent rules decide when a challenge is shown:
//!
//! - A foreground change to an identity in the lock set
//! - The daemon's own session returning from the background after longer
//!   than the configured timeout

use std::collections::HashSet;

use crate::foreground::ForegroundChange;
use crate::types::{Identity, LockConfig, LockSet};

/// Outcome of evaluating a foreground change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Nothing to do
    Ignore,
    /// The identity must be challenged now
    Challenge(Identity),
    /// The home/launcher surface came forward; any open challenge is abandoned
    HomeSurface,
}

/// Evaluates foreground changes against the lock configuration
#[derive(Debug, Clone, Default)]
pub struct PolicyEvaluator {
    home_surfaces: HashSet<String>,
}

impl PolicyEvaluator {
    /// `home_surfaces` is resolved once at startup from the host's home handlers
    pub fn new<I, S>(home_surfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            home_surfaces: home_surfaces.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_home_surface(&self, id: &str) -> bool {
        self.home_surfaces.contains(id)
    }

    pub fn home_surface_count(&self) -> usize {
        self.home_surfaces.len()
    }

    /// Apply the rules in order: disabled, home surface, membership
    pub fn evaluate(
        &self,
        change: &ForegroundChange,
        lock_config: &LockConfig,
        lock_set: &LockSet,
    ) -> Decision {
        if !lock_config.enabled {
            return Decision::Ignore;
        }
        if self.is_home_surface(&change.identity.id) {
            return Decision::HomeSurface;
        }
        if !lock_set.contains(&change.identity.id) {
            return Decision::Ignore;
        }
        Decision::Challenge(change.identity.clone())
    }
}

/// Tracks how long the daemon's own session has been in the background
#[derive(Debug, Clone, Default)]
pub struct BackgroundTimer {
    background_since: Option<u64>,
}

impl BackgroundTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transition to the background at `now_ms`
    pub fn on_background(&mut self, now_ms: u64) {
        self.background_since = Some(now_ms);
    }

    /// Record a transition to the foreground; returns true when a challenge is due.
    ///
    /// The marker is consumed either way. The lock set is not consulted: this
    /// rule covers the whole session rather than one identity.
    pub fn on_foreground(&mut self, now_ms: u64, lock_config: &LockConfig) -> bool {
        let Some(since) = self.background_since.take() else {
            return false;
        };
        lock_config.enabled && now_ms.saturating_sub(since) > lock_config.background_timeout_ms
    }

    /// Clear any pending marker after a successful PIN validation
    pub fn reset(&mut self) {
        self.background_since = None;
    }

    pub fn background_since(&self) -> Option<u64> {
        self.background_since
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(id: &str) -> ForegroundChange {
        ForegroundChange {
            identity: Identity::unlabeled(id),
            timestamp: 1,
            forced: false,
        }
    }

    fn locked(ids: &[&str]) -> LockSet {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_locked_identity_is_challenged() {
        let evaluator = PolicyEvaluator::new(["com.launcher"]);
        let decision = evaluator.evaluate(
            &change("com.mail"),
            &LockConfig::default(),
            &locked(&["com.mail"]),
        );
        assert_eq!(decision, Decision::Challenge(Identity::unlabeled("com.mail")));
    }

    #[test]
    fn test_unlocked_identity_is_ignored() {
        let evaluator = PolicyEvaluator::new(["com.launcher"]);
        let decision =
            evaluator.evaluate(&change("com.maps"), &LockConfig::default(), &locked(&["com.mail"]));
        assert_eq!(decision, Decision::Ignore);
    }

    #[test]
    fn test_disabled_ignores_everything() {
        let evaluator = PolicyEvaluator::new(["com.launcher"]);
        let config = LockConfig {
            enabled: false,
            ..LockConfig::default()
        };
        let set = locked(&["com.mail", "com.launcher"]);
        for id in ["com.mail", "com.launcher", "com.other"] {
            assert_eq!(evaluator.evaluate(&change(id), &config, &set), Decision::Ignore);
        }
    }

    #[test]
    fn test_home_surface_takes_precedence_over_membership() {
        let evaluator = PolicyEvaluator::new(["com.launcher"]);
        let decision = evaluator.evaluate(
            &change("com.launcher"),
            &LockConfig::default(),
            &locked(&["com.launcher"]),
        );
        assert_eq!(decision, Decision::HomeSurface);
    }

    #[test]
    fn test_background_timeout_elapsed() {
        let config = LockConfig {
            enabled: true,
            background_timeout_ms: 30_000,
        };
        let mut timer = BackgroundTimer::new();
        timer.on_background(0);
        assert!(timer.on_foreground(31_000, &config));
    }

    #[test]
    fn test_background_timeout_not_elapsed() {
        let config = LockConfig {
            enabled: true,
            background_timeout_ms: 30_000,
        };
        let mut timer = BackgroundTimer::new();
        timer.on_background(0);
        assert!(!timer.on_foreground(10_000, &config));
        // Exactly at the boundary is not "longer than"
        timer.on_background(0);
        assert!(!timer.on_foreground(30_000, &config));
    }

    #[test]
    fn test_foreground_without_background_is_noop() {
        let mut timer = BackgroundTimer::new();
        assert!(!timer.on_foreground(100_000, &LockConfig::default()));
    }

    #[test]
    fn test_marker_consumed_on_foreground() {
        let config = LockConfig::default();
        let mut timer = BackgroundTimer::new();
        timer.on_background(0);
        assert!(timer.on_foreground(40_000, &config));
        assert!(!timer.on_foreground(80_000, &config));
    }

    #[test]
    fn test_reset_clears_marker() {
        let mut timer = BackgroundTimer::new();
        timer.on_background(5);
        timer.reset();
        assert_eq!(timer.background_since(), None);
        assert!(!timer.on_foreground(100_000, &LockConfig::default()));
    }

    #[test]
    fn test_background_timeout_respects_disabled() {
        let config = LockConfig {
            enabled: false,
            background_timeout_ms: 30_000,
        };
        let mut timer = BackgroundTimer::new();
        timer.on_background(0);
        assert!(!timer.on_foreground(31_000, &config));
    }
}
