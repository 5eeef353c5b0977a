//! Host collaborators consumed by the monitor
//!
//! Each trait is the boundary to something the host provides. The concrete
//! file-backed implementations live in [`crate::adapters`]; tests script
//! their own.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

use latchkey_core::{ActivityEvent, TimeWindow, UsageStat};

use crate::error::Result;

/// Foreground activity queries
#[async_trait]
pub trait ActivitySource: Send + Sync {
    /// Activity transitions with timestamps inside `window`, in any order
    async fn list_recent_events(&self, window: TimeWindow) -> Result<Vec<ActivityEvent>>;

    /// Last-used time per identity over `window`
    async fn list_usage_stats(&self, window: TimeWindow) -> Result<Vec<UsageStat>>;
}

/// Resolves the identities that act as the home/launcher surface
#[async_trait]
pub trait HomeResolver: Send + Sync {
    async fn list_home_handlers(&self) -> Result<HashSet<String>>;
}

/// Resolves human-readable labels for identities
pub trait LabelResolver: Send + Sync {
    /// `None` when the host has no label; callers fall back to the id
    fn display_name(&self, id: &str) -> Option<String>;
}

/// Wall-clock source in Unix epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// The system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// Fixed label table
#[derive(Debug, Clone, Default)]
pub struct StaticLabels {
    labels: HashMap<String, String>,
}

impl StaticLabels {
    pub fn new(labels: HashMap<String, String>) -> Self {
        Self { labels }
    }
}

impl LabelResolver for StaticLabels {
    fn display_name(&self, id: &str) -> Option<String> {
        self.labels.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_epoch_millis() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }

    #[test]
    fn test_static_labels() {
        let labels = StaticLabels::new(HashMap::from([(
            "com.example.mail".to_string(),
            "Mail".to_string(),
        )]));
        assert_eq!(labels.display_name("com.example.mail").as_deref(), Some("Mail"));
        assert!(labels.display_name("com.example.chat").is_none());
    }
}
