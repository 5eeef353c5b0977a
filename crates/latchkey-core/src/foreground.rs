//! Foreground event selection and change tracking
//!
//! The host reports a stream of activity transitions. The current foreground
//! identity is the one with the latest `MoveToForeground` transition in the
//! lookback window; when the window has none, the identity with the most
//! recent "last used" time over a longer window stands in.

use serde::{Deserialize, Serialize};

use crate::types::Identity;

/// Inclusive query window in Unix epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl TimeWindow {
    /// The window of `length_ms` ending at `now_ms`
    pub fn ending_at(now_ms: u64, length_ms: u64) -> Self {
        Self {
            start_ms: now_ms.saturating_sub(length_ms),
            end_ms: now_ms,
        }
    }

    pub fn contains(&self, timestamp_ms: u64) -> bool {
        timestamp_ms >= self.start_ms && timestamp_ms <= self.end_ms
    }
}

/// Kind of activity transition reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    MoveToForeground,
    MoveToBackground,
    #[serde(other)]
    Other,
}

/// One entry from the host's activity log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub identity: String,
    #[serde(rename = "event")]
    pub kind: ActivityKind,
    pub timestamp: u64,
}

impl ActivityEvent {
    pub fn foreground(identity: impl Into<String>, timestamp: u64) -> Self {
        Self {
            identity: identity.into(),
            kind: ActivityKind::MoveToForeground,
            timestamp,
        }
    }
}

/// Aggregated "last time used" figure for one identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStat {
    pub identity: String,
    pub last_used: u64,
}

/// Emitted by the detector when the foreground identity changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForegroundChange {
    pub identity: Identity,
    pub timestamp: u64,
    /// Set when a wake or boot re-check re-emitted an unchanged identity
    pub forced: bool,
}

/// Pick the latest `MoveToForeground` event.
///
/// Enumeration order is irrelevant: a later event overwrites an earlier
/// candidate wherever it appears in the slice. Ties keep the first seen.
pub fn latest_foreground(events: &[ActivityEvent]) -> Option<&ActivityEvent> {
    let mut best: Option<&ActivityEvent> = None;
    for event in events {
        if event.kind != ActivityKind::MoveToForeground {
            continue;
        }
        match best {
            Some(current) if event.timestamp <= current.timestamp => {}
            _ => best = Some(event),
        }
    }
    best
}

/// Pick the identity with the most recent `last_used` time
pub fn most_recent_usage(stats: &[UsageStat]) -> Option<&UsageStat> {
    let mut best: Option<&UsageStat> = None;
    for stat in stats {
        match best {
            Some(current) if stat.last_used <= current.last_used => {}
            _ => best = Some(stat),
        }
    }
    best
}

/// Remembers the last emitted identity and decides whether to emit again
#[derive(Debug, Clone)]
pub struct ChangeTracker {
    self_identity: String,
    last: Option<String>,
}

impl ChangeTracker {
    /// `self_identity` is the daemon's own identity, which never triggers
    pub fn new(self_identity: impl Into<String>) -> Self {
        Self {
            self_identity: self_identity.into(),
            last: None,
        }
    }

    /// Record an observation; returns true when a change must be emitted.
    ///
    /// Our own identity is ignored without touching state, so returning from
    /// the challenge surface to the locked identity is not a new change.
    pub fn observe(&mut self, id: &str, force: bool) -> bool {
        if id == self.self_identity {
            return false;
        }
        if !force && self.last.as_deref() == Some(id) {
            return false;
        }
        self.last = Some(id.to_string());
        true
    }

    pub fn last(&self) -> Option<&str> {
        self.last.as_deref()
    }

    pub fn self_identity(&self) -> &str {
        &self.self_identity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, kind: ActivityKind, ts: u64) -> ActivityEvent {
        ActivityEvent {
            identity: id.to_string(),
            kind,
            timestamp: ts,
        }
    }

    #[test]
    fn test_latest_foreground_ignores_enumeration_order() {
        let events = vec![
            event("com.b", ActivityKind::MoveToForeground, 300),
            event("com.a", ActivityKind::MoveToForeground, 100),
            event("com.c", ActivityKind::MoveToBackground, 400),
            event("com.d", ActivityKind::MoveToForeground, 200),
        ];
        let latest = latest_foreground(&events).unwrap();
        assert_eq!(latest.identity, "com.b");
    }

    #[test]
    fn test_latest_foreground_empty() {
        assert!(latest_foreground(&[]).is_none());
        let only_background = vec![event("com.a", ActivityKind::MoveToBackground, 10)];
        assert!(latest_foreground(&only_background).is_none());
    }

    #[test]
    fn test_latest_foreground_accepts_zero_timestamp() {
        let events = vec![event("com.a", ActivityKind::MoveToForeground, 0)];
        assert_eq!(latest_foreground(&events).unwrap().identity, "com.a");
    }

    #[test]
    fn test_most_recent_usage() {
        let stats = vec![
            UsageStat { identity: "com.a".into(), last_used: 5 },
            UsageStat { identity: "com.b".into(), last_used: 9 },
            UsageStat { identity: "com.c".into(), last_used: 7 },
        ];
        assert_eq!(most_recent_usage(&stats).unwrap().identity, "com.b");
        assert!(most_recent_usage(&[]).is_none());
    }

    #[test]
    fn test_tracker_emits_only_on_change() {
        let mut tracker = ChangeTracker::new("latchkey");
        assert!(tracker.observe("com.a", false));
        assert!(!tracker.observe("com.a", false));
        assert!(tracker.observe("com.b", false));
        assert_eq!(tracker.last(), Some("com.b"));
    }

    #[test]
    fn test_tracker_force_reemits() {
        let mut tracker = ChangeTracker::new("latchkey");
        assert!(tracker.observe("com.a", false));
        assert!(tracker.observe("com.a", true));
    }

    #[test]
    fn test_tracker_never_emits_self() {
        let mut tracker = ChangeTracker::new("latchkey");
        assert!(tracker.observe("com.a", false));
        assert!(!tracker.observe("latchkey", false));
        assert!(!tracker.observe("latchkey", true));
        // Self observations leave the last identity untouched
        assert_eq!(tracker.last(), Some("com.a"));
        assert!(!tracker.observe("com.a", false));
    }

    #[test]
    fn test_window() {
        let window = TimeWindow::ending_at(60_500, 60_000);
        assert_eq!(window.start_ms, 500);
        assert!(window.contains(500));
        assert!(window.contains(60_500));
        assert!(!window.contains(499));
        assert_eq!(TimeWindow::ending_at(10, 60_000).start_ms, 0);
    }

    #[test]
    fn test_activity_kind_wire_names() {
        let parsed: ActivityEvent = serde_json::from_str(
            r#"{"identity":"com.a","event":"move_to_foreground","timestamp":7}"#,
        )
        .unwrap();
        assert_eq!(parsed, ActivityEvent::foreground("com.a", 7));

        let other: ActivityEvent =
            serde_json::from_str(r#"{"identity":"com.a","event":"configuration_change","timestamp":7}"#)
                .unwrap();
        assert_eq!(other.kind, ActivityKind::Other);
    }
}
