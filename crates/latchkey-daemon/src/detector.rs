//! Foreground-change detector
//!
//! Each poll asks the activity source for the latest move-to-foreground
//! transition in the look-back window, falling back to the most recently used
//! identity over a longer window. A change is emitted only when the identity
//! differs from the last one emitted, or when the poll is forced.
//!
//! Query failures and timeouts are logged and reported as "no result"; they
//! never abort the poll loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use latchkey_core::{
    foreground::{latest_foreground, most_recent_usage},
    ChangeTracker, ForegroundChange, Identity, TimeWindow,
};

use crate::error::DaemonError;
use crate::source::{ActivitySource, Clock, LabelResolver};

/// Query windows and bounds for the detector
#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub self_identity: String,
    pub event_lookback_ms: u64,
    pub usage_fallback_window_ms: u64,
    pub query_timeout: Duration,
}

/// Polls the activity source and tracks the last emitted identity
pub struct ForegroundDetector {
    source: Arc<dyn ActivitySource>,
    labels: Arc<dyn LabelResolver>,
    clock: Arc<dyn Clock>,
    settings: DetectorSettings,
    tracker: ChangeTracker,
    /// Resolved display names
    label_cache: HashMap<String, String>,
}

impl ForegroundDetector {
    pub fn new(
        source: Arc<dyn ActivitySource>,
        labels: Arc<dyn LabelResolver>,
        clock: Arc<dyn Clock>,
        settings: DetectorSettings,
    ) -> Self {
        Self {
            tracker: ChangeTracker::new(settings.self_identity.clone()),
            source,
            labels,
            clock,
            settings,
            label_cache: HashMap::new(),
        }
    }

    /// Run one detection; `force` re-emits an unchanged identity
    pub async fn poll(&mut self, force: bool) -> Option<ForegroundChange> {
        let now = self.clock.now_ms();
        let (id, timestamp) = self.current_foreground(now).await?;

        if !self.tracker.observe(&id, force) {
            return None;
        }

        let identity = self.identity_for(&id);
        debug!("Foreground changed to {} (forced: {})", identity, force);
        Some(ForegroundChange {
            identity,
            timestamp,
            forced: force,
        })
    }

    /// Identity most recently emitted
    pub fn last_identity(&mut self) -> Option<Identity> {
        let id = self.tracker.last()?.to_string();
        Some(self.identity_for(&id))
    }

    /// Check whether the usage query returns anything at all.
    ///
    /// An empty fallback window right after start usually means the host has
    /// not granted usage access; detection stays dark until it does.
    pub async fn probe_usage_access(&self) -> bool {
        let window = TimeWindow::ending_at(self.clock.now_ms(), self.settings.usage_fallback_window_ms);
        match tokio::time::timeout(self.settings.query_timeout, self.source.list_usage_stats(window)).await {
            Ok(Ok(stats)) if !stats.is_empty() => true,
            Ok(Ok(_)) => {
                warn!("No usage stats found; usage access permission might not be granted");
                false
            }
            Ok(Err(DaemonError::PermissionDenied(reason))) => {
                warn!("Usage access not granted: {}", reason);
                false
            }
            Ok(Err(e)) => {
                warn!("Usage access probe failed: {}", e);
                false
            }
            Err(_) => {
                warn!("Usage access probe timed out");
                false
            }
        }
    }

    async fn current_foreground(&self, now: u64) -> Option<(String, u64)> {
        let window = TimeWindow::ending_at(now, self.settings.event_lookback_ms);
        let events = match tokio::time::timeout(
            self.settings.query_timeout,
            self.source.list_recent_events(window),
        )
        .await
        {
            Ok(Ok(events)) => events,
            Ok(Err(e)) => {
                warn!("Foreground event query failed: {}", e);
                return None;
            }
            Err(_) => {
                warn!("Foreground event query timed out after {:?}", self.settings.query_timeout);
                return None;
            }
        };

        if let Some(event) = latest_foreground(&events) {
            return Some((event.identity.clone(), event.timestamp));
        }

        let window = TimeWindow::ending_at(now, self.settings.usage_fallback_window_ms);
        let stats = match tokio::time::timeout(
            self.settings.query_timeout,
            self.source.list_usage_stats(window),
        )
        .await
        {
            Ok(Ok(stats)) => stats,
            Ok(Err(e)) => {
                warn!("Usage stats query failed: {}", e);
                return None;
            }
            Err(_) => {
                warn!("Usage stats query timed out after {:?}", self.settings.query_timeout);
                return None;
            }
        };

        most_recent_usage(&stats).map(|stat| (stat.identity.clone(), stat.last_used))
    }

    /// Identity for `id` with its display name resolved and cached
    pub fn identity_for(&mut self, id: &str) -> Identity {
        if let Some(name) = self.label_cache.get(id) {
            return Identity::new(id, name.clone());
        }
        match self.labels.display_name(id) {
            Some(name) => {
                self.label_cache.insert(id.to_string(), name.clone());
                Identity::new(id, name)
            }
            None => Identity::unlabeled(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::source::StaticLabels;
    use async_trait::async_trait;
    use latchkey_core::{ActivityEvent, ActivityKind, UsageStat};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    struct Scripted {
        events: Mutex<Result<Vec<ActivityEvent>>>,
        usage: Mutex<Vec<UsageStat>>,
        usage_queries: AtomicU64,
        hang: bool,
    }

    impl Default for Scripted {
        fn default() -> Self {
            Self {
                events: Mutex::new(Ok(Vec::new())),
                usage: Mutex::new(Vec::new()),
                usage_queries: AtomicU64::new(0),
                hang: false,
            }
        }
    }

    impl Scripted {
        fn with_events(events: Vec<ActivityEvent>) -> Self {
            Self {
                events: Mutex::new(Ok(events)),
                ..Default::default()
            }
        }

        fn set_events(&self, events: Vec<ActivityEvent>) {
            *self.events.lock().unwrap() = Ok(events);
        }
    }

    #[async_trait]
    impl ActivitySource for Scripted {
        async fn list_recent_events(&self, _window: TimeWindow) -> Result<Vec<ActivityEvent>> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            match &*self.events.lock().unwrap() {
                Ok(events) => Ok(events.clone()),
                Err(_) => Err(DaemonError::Query("log unavailable".to_string())),
            }
        }

        async fn list_usage_stats(&self, _window: TimeWindow) -> Result<Vec<UsageStat>> {
            self.usage_queries.fetch_add(1, Ordering::SeqCst);
            Ok(self.usage.lock().unwrap().clone())
        }
    }

    struct FixedClock(u64);

    impl Clock for FixedClock {
        fn now_ms(&self) -> u64 {
            self.0
        }
    }

    fn detector(source: Arc<Scripted>) -> ForegroundDetector {
        let labels = StaticLabels::new(HashMap::from([(
            "com.example.mail".to_string(),
            "Mail".to_string(),
        )]));
        ForegroundDetector::new(
            source,
            Arc::new(labels),
            Arc::new(FixedClock(100_000)),
            DetectorSettings {
                self_identity: "latchkey".to_string(),
                event_lookback_ms: 60_000,
                usage_fallback_window_ms: 86_400_000,
                query_timeout: Duration::from_millis(50),
            },
        )
    }

    #[tokio::test]
    async fn test_emits_latest_event_once() {
        let source = Arc::new(Scripted::with_events(vec![
            ActivityEvent::foreground("com.example.mail", 90_000),
            ActivityEvent::foreground("com.example.chat", 80_000),
        ]));
        let mut detector = detector(Arc::clone(&source));

        let change = detector.poll(false).await.unwrap();
        assert_eq!(change.identity, Identity::new("com.example.mail", "Mail"));
        assert_eq!(change.timestamp, 90_000);
        assert!(!change.forced);

        assert!(detector.poll(false).await.is_none());
        let forced = detector.poll(true).await.unwrap();
        assert!(forced.forced);
    }

    #[tokio::test]
    async fn test_ignores_own_identity() {
        let source = Arc::new(Scripted::with_events(vec![ActivityEvent::foreground(
            "com.example.chat",
            90_000,
        )]));
        let mut detector = detector(Arc::clone(&source));
        assert!(detector.poll(false).await.is_some());

        source.set_events(vec![ActivityEvent::foreground("latchkey", 95_000)]);
        assert!(detector.poll(false).await.is_none());
        assert!(detector.poll(true).await.is_none());
        assert_eq!(detector.last_identity().unwrap().id, "com.example.chat");
    }

    #[tokio::test]
    async fn test_falls_back_to_usage_stats() {
        let source = Arc::new(Scripted::with_events(vec![ActivityEvent {
            identity: "com.example.chat".to_string(),
            kind: ActivityKind::MoveToBackground,
            timestamp: 90_000,
        }]));
        *source.usage.lock().unwrap() = vec![
            UsageStat { identity: "com.example.maps".into(), last_used: 10 },
            UsageStat { identity: "com.example.notes".into(), last_used: 20 },
        ];
        let mut detector = detector(Arc::clone(&source));

        let change = detector.poll(false).await.unwrap();
        assert_eq!(change.identity.id, "com.example.notes");
        assert_eq!(source.usage_queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_everywhere_is_none() {
        let source = Arc::new(Scripted::with_events(Vec::new()));
        let mut detector = detector(source);
        assert!(detector.poll(false).await.is_none());
        assert!(detector.last_identity().is_none());
    }

    #[tokio::test]
    async fn test_query_error_is_swallowed() {
        let source = Arc::new(Scripted {
            events: Mutex::new(Err(DaemonError::Query("boom".to_string()))),
            ..Default::default()
        });
        let mut detector = detector(Arc::clone(&source));
        assert!(detector.poll(false).await.is_none());
        assert_eq!(source.usage_queries.load(Ordering::SeqCst), 0);

        source.set_events(vec![ActivityEvent::foreground("com.example.chat", 99_000)]);
        assert!(detector.poll(false).await.is_some());
    }

    #[tokio::test]
    async fn test_query_timeout_is_swallowed() {
        let source = Arc::new(Scripted {
            hang: true,
            ..Default::default()
        });
        let mut detector = detector(source);
        assert!(detector.poll(false).await.is_none());
    }

    #[tokio::test]
    async fn test_probe_reports_empty_usage() {
        let source = Arc::new(Scripted::with_events(Vec::new()));
        let detector = detector(Arc::clone(&source));
        assert!(!detector.probe_usage_access().await);

        *source.usage.lock().unwrap() = vec![UsageStat {
            identity: "com.example.maps".into(),
            last_used: 10,
        }];
        assert!(detector.probe_usage_access().await);
    }
}
