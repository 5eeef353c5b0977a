//! Monitor and challenge coordinator
//!
//! `LockService` owns the whole "monitor, decide, challenge, record" flow:
//!
//! - A poll task runs the foreground detector on a fixed cadence. It is
//!   single-flight: the next poll is scheduled only after the previous one
//!   has finished.
//! - Detector changes and host lifecycle signals travel over one ordered
//!   channel to a dispatcher task, which applies the lock policy.
//! - All challenge state (the active session and the background marker)
//!   sits behind one mutex shared by the dispatcher and the public API.
//! - Intruder captures run as their own tasks. Escaping to the home surface
//!   detaches them; shutdown aborts them.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use latchkey_core::{
    auth::validate_new_pin, AuthError, AuthOutcome, AuthSession, BackgroundTimer, CaptureRecord,
    Decision, ForegroundChange, Identity, IntruderDetectionConfig, LockConfig, LockSet,
    LockoutPolicy, PinHasher, PolicyEvaluator, Secret,
};

use crate::capture::{CaptureDevice, CapturePipeline, PipelineSettings};
use crate::config::DaemonConfig;
use crate::detector::{DetectorSettings, ForegroundDetector};
use crate::error::{DaemonError, Result};
use crate::source::{ActivitySource, Clock, HomeResolver, LabelResolver};
use crate::store::StateStore;

/// Capacity of the ordered monitor channel
const EVENT_QUEUE_DEPTH: usize = 64;

/// Capacity of the broadcast channels
const BROADCAST_DEPTH: usize = 32;

/// Input to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// The detector saw a new foreground identity
    ForegroundChanged(ForegroundChange),
    /// Our own session came to the foreground at the given time
    Foregrounded { at: u64 },
    /// Our own session went to the background at the given time
    Backgrounded { at: u64 },
}

/// Why a challenge surface went away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DismissReason {
    Unlocked,
    LockedOut,
    HomeSurface,
    Disabled,
}

/// Instructions for whatever renders the challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChallengeEvent {
    /// Show PIN entry for `target`
    Show { target: Identity, remaining: u32 },
    /// Clear input and show the remaining tries
    Retry { remaining: u32 },
    /// Take the challenge surface down
    Dismiss { reason: DismissReason },
    /// No PIN is configured; route to setup
    SetupRequired,
}

/// Summary of the active challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub target: Identity,
    pub attempt_count: u32,
    pub remaining: u32,
}

/// Point-in-time service status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub monitoring: bool,
    pub lock_enabled: bool,
    pub background_timeout_ms: u64,
    pub pin_set: bool,
    pub locked_count: usize,
    pub record_count: usize,
    pub last_identity: Option<Identity>,
    pub session: Option<SessionSummary>,
}

/// Host collaborators the service is wired to
pub struct Collaborators {
    pub activity: Arc<dyn ActivitySource>,
    pub home: Arc<dyn HomeResolver>,
    pub labels: Arc<dyn LabelResolver>,
    pub device: Arc<dyn CaptureDevice>,
    pub clock: Arc<dyn Clock>,
}

/// Timing and policy knobs taken from the daemon configuration
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub poll_interval: Duration,
    pub wake_recheck_delay: Duration,
    pub max_attempts: u32,
    pub detector: DetectorSettings,
    pub capture: PipelineSettings,
}

impl ServiceSettings {
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            wake_recheck_delay: config.wake_recheck_delay(),
            max_attempts: config.max_attempts,
            detector: DetectorSettings {
                self_identity: config.self_identity.clone(),
                event_lookback_ms: config.event_lookback_ms,
                usage_fallback_window_ms: config.usage_fallback_window_ms,
                query_timeout: config.query_timeout(),
            },
            capture: PipelineSettings {
                photo_dir: config.capture.photo_dir.clone(),
                stabilization_delay: config.capture.stabilization_delay(),
                acquire_timeout: config.capture.acquire_timeout(),
                capture_timeout: config.capture.capture_timeout(),
            },
        }
    }
}

/// Challenge state guarded by the single accessor
#[derive(Default)]
struct Shared {
    session: Option<AuthSession>,
    background: BackgroundTimer,
    last_identity: Option<Identity>,
}

/// A running poll task
struct PollTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// The lock daemon's coordinator
pub struct LockService {
    store: Arc<StateStore>,
    policy: PolicyEvaluator,
    lockout: LockoutPolicy,
    hasher: PinHasher,
    clock: Arc<dyn Clock>,
    self_identity: String,
    settings: ServiceSettings,

    detector: Arc<Mutex<ForegroundDetector>>,
    pipeline: Arc<CapturePipeline>,

    shared: Mutex<Shared>,
    captures: Mutex<JoinSet<()>>,

    events_tx: mpsc::Sender<MonitorEvent>,
    changes_tx: broadcast::Sender<ForegroundChange>,
    challenges_tx: broadcast::Sender<ChallengeEvent>,
    rescan: Arc<Notify>,

    poll_task: Mutex<Option<PollTask>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl LockService {
    /// Build the service and start its dispatcher.
    ///
    /// Home surfaces are resolved once here; a resolver failure leaves the
    /// set empty rather than failing startup.
    pub async fn new(
        store: Arc<StateStore>,
        collaborators: Collaborators,
        settings: ServiceSettings,
    ) -> Result<Arc<Self>> {
        Self::with_hasher(store, collaborators, settings, PinHasher::default()).await
    }

    /// Build the service with a specific PIN hasher
    pub async fn with_hasher(
        store: Arc<StateStore>,
        collaborators: Collaborators,
        settings: ServiceSettings,
        hasher: PinHasher,
    ) -> Result<Arc<Self>> {
        let lockout = LockoutPolicy::new(settings.max_attempts)?;

        let home = match collaborators.home.list_home_handlers().await {
            Ok(home) => home,
            Err(e) => {
                warn!("Failed to resolve home surfaces: {}", e);
                Default::default()
            }
        };
        let policy = PolicyEvaluator::new(home);
        info!("Resolved {} home surfaces", policy.home_surface_count());

        let detector = ForegroundDetector::new(
            collaborators.activity,
            collaborators.labels,
            Arc::clone(&collaborators.clock),
            settings.detector.clone(),
        );
        let pipeline = CapturePipeline::new(
            collaborators.device,
            Arc::clone(&collaborators.clock),
            settings.capture.clone(),
        );

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (changes_tx, _) = broadcast::channel(BROADCAST_DEPTH);
        let (challenges_tx, _) = broadcast::channel(BROADCAST_DEPTH);

        let service = Arc::new(Self {
            store,
            policy,
            lockout,
            hasher,
            clock: collaborators.clock,
            self_identity: settings.detector.self_identity.clone(),
            settings,
            detector: Arc::new(Mutex::new(detector)),
            pipeline: Arc::new(pipeline),
            shared: Mutex::new(Shared::default()),
            captures: Mutex::new(JoinSet::new()),
            events_tx,
            changes_tx,
            challenges_tx,
            rescan: Arc::new(Notify::new()),
            poll_task: Mutex::new(None),
            dispatcher: Mutex::new(None),
        });

        let handle = tokio::spawn(dispatch(Arc::downgrade(&service), events_rx));
        *service.dispatcher.lock().await = Some(handle);

        Ok(service)
    }

    // ========================================================================
    // Monitoring lifecycle
    // ========================================================================

    /// Start the poll task; returns false if it was already running
    pub async fn start_monitoring(&self) -> bool {
        let mut poll_task = self.poll_task.lock().await;
        if poll_task.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            return false;
        }

        self.detector.lock().await.probe_usage_access().await;

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.detector),
            self.events_tx.clone(),
            Arc::clone(&self.rescan),
            self.settings.poll_interval,
            stop_rx,
        ));
        *poll_task = Some(PollTask { stop, handle });

        info!(
            "Foreground monitoring started ({:?} interval)",
            self.settings.poll_interval
        );
        true
    }

    /// Stop the poll task; returns false if it was not running
    pub async fn stop_monitoring(&self) -> bool {
        let Some(task) = self.poll_task.lock().await.take() else {
            return false;
        };
        let _ = task.stop.send(true);
        if let Err(e) = task.handle.await {
            if !e.is_cancelled() {
                error!("Poll task failed: {}", e);
            }
        }
        info!("Foreground monitoring stopped");
        true
    }

    pub async fn is_monitoring(&self) -> bool {
        self.poll_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Schedule a forced re-check after a wake or boot signal.
    ///
    /// Only issued while locking is enabled and the monitor is running.
    pub async fn rescan(&self) -> Result<bool> {
        let config: LockConfig = self.store.get()?;
        if !config.enabled || !self.is_monitoring().await {
            debug!("Skipping re-check: locking disabled or monitor stopped");
            return Ok(false);
        }

        let rescan = Arc::clone(&self.rescan);
        let delay = self.settings.wake_recheck_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            rescan.notify_one();
        });
        debug!("Forced re-check scheduled in {:?}", delay);
        Ok(true)
    }

    /// Our own session came to the foreground
    pub async fn signal_foregrounded(&self) -> Result<()> {
        self.send(MonitorEvent::Foregrounded {
            at: self.clock.now_ms(),
        })
        .await
    }

    /// Our own session went to the background
    pub async fn signal_backgrounded(&self) -> Result<()> {
        self.send(MonitorEvent::Backgrounded {
            at: self.clock.now_ms(),
        })
        .await
    }

    async fn send(&self, event: MonitorEvent) -> Result<()> {
        self.events_tx
            .send(event)
            .await
            .map_err(|_| DaemonError::Cancelled)
    }

    /// Stop everything: poll task, dispatcher, and in-flight captures
    pub async fn shutdown(&self) {
        self.stop_monitoring().await;

        if let Some(handle) = self.dispatcher.lock().await.take() {
            handle.abort();
        }

        let mut captures = self.captures.lock().await;
        if !captures.is_empty() {
            info!("Aborting {} in-flight captures", captures.len());
        }
        captures.abort_all();
        while captures.join_next().await.is_some() {}
    }

    // ========================================================================
    // Subscriptions and queries
    // ========================================================================

    pub fn subscribe_changes(&self) -> broadcast::Receiver<ForegroundChange> {
        self.changes_tx.subscribe()
    }

    pub fn subscribe_challenges(&self) -> broadcast::Receiver<ChallengeEvent> {
        self.challenges_tx.subscribe()
    }

    /// Identity from the most recent foreground change
    pub async fn get_last_identity(&self) -> Option<Identity> {
        self.shared.lock().await.last_identity.clone()
    }

    pub async fn status(&self) -> Result<ServiceStatus> {
        let config: LockConfig = self.store.get()?;
        let secret: Secret = self.store.get()?;
        let lock_set: LockSet = self.store.get()?;
        let record_count = self.store.count()?;
        let monitoring = self.is_monitoring().await;

        let shared = self.shared.lock().await;
        let session = shared
            .session
            .as_ref()
            .filter(|s| s.is_active())
            .map(|s| SessionSummary {
                target: s.target().clone(),
                attempt_count: s.attempt_count(),
                remaining: s.remaining(),
            });

        Ok(ServiceStatus {
            monitoring,
            lock_enabled: config.enabled,
            background_timeout_ms: config.background_timeout_ms,
            pin_set: secret.is_set,
            locked_count: lock_set.len(),
            record_count,
            last_identity: shared.last_identity.clone(),
            session,
        })
    }

    // ========================================================================
    // Event handling
    // ========================================================================

    /// Apply one monitor event; failures are logged, never propagated
    pub async fn handle_event(&self, event: MonitorEvent) {
        match event {
            MonitorEvent::ForegroundChanged(change) => {
                let _ = self.changes_tx.send(change.clone());
                if let Err(e) = self.on_foreground_change(change).await {
                    error!("Failed to evaluate foreground change: {}", e);
                }
            }
            MonitorEvent::Backgrounded { at } => {
                self.shared.lock().await.background.on_background(at);
                debug!("Session backgrounded at {}", at);
            }
            MonitorEvent::Foregrounded { at } => {
                if let Err(e) = self.on_session_foreground(at).await {
                    error!("Failed to evaluate background timeout: {}", e);
                }
            }
        }
    }

    async fn on_foreground_change(&self, change: ForegroundChange) -> Result<()> {
        let config: LockConfig = self.store.get()?;
        let lock_set: LockSet = self.store.get()?;

        let mut shared = self.shared.lock().await;
        shared.last_identity = Some(change.identity.clone());

        match self.policy.evaluate(&change, &config, &lock_set) {
            Decision::Ignore => {}
            Decision::HomeSurface => {
                if shared.session.as_ref().is_some_and(AuthSession::is_active) {
                    info!("Home surface came forward; abandoning challenge");
                    shared.session = None;
                    self.emit(ChallengeEvent::Dismiss {
                        reason: DismissReason::HomeSurface,
                    });
                }
            }
            Decision::Challenge(target) => self.activate(&mut shared, target)?,
        }
        Ok(())
    }

    async fn on_session_foreground(&self, at: u64) -> Result<()> {
        let config: LockConfig = self.store.get()?;
        let mut shared = self.shared.lock().await;
        if shared.background.on_foreground(at, &config) {
            info!("Background timeout elapsed; challenging session");
            let target = Identity::unlabeled(self.self_identity.clone());
            self.activate(&mut shared, target)?;
        }
        Ok(())
    }

    /// Open a challenge for `target`, or route to setup without a PIN.
    ///
    /// A challenge that is still accepting input is moved to the new target
    /// with its attempt count intact.
    fn activate(&self, shared: &mut Shared, target: Identity) -> Result<()> {
        if let Some(session) = shared.session.as_mut().filter(|s| s.is_active()) {
            if session.target().id == target.id {
                debug!("Challenge for {} already showing", target);
                return Ok(());
            }

            info!(
                "Moving challenge from {} to {} ({})",
                session.target(),
                target,
                session.describe()
            );
            session.retarget(target.clone());
            let remaining = session.remaining();
            self.emit(ChallengeEvent::Show { target, remaining });
            return Ok(());
        }

        let secret: Secret = self.store.get()?;
        match AuthSession::begin(target.clone(), self.lockout, &secret) {
            Ok(session) => {
                info!("Challenging {}", target);
                let remaining = session.remaining();
                shared.session = Some(session);
                self.emit(ChallengeEvent::Show { target, remaining });
            }
            Err(AuthError::PinNotSetUp) => {
                info!("No PIN configured; routing {} to setup", target);
                shared.session = None;
                self.emit(ChallengeEvent::SetupRequired);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn emit(&self, event: ChallengeEvent) {
        // No subscribers is fine
        let _ = self.challenges_tx.send(event);
    }

    // ========================================================================
    // Challenge API
    // ========================================================================

    /// Trigger a challenge for `identity_id` on demand.
    ///
    /// Returns false when locking is disabled.
    pub async fn request_challenge(&self, identity_id: &str) -> Result<bool> {
        Identity::validate_id(identity_id)?;
        let config: LockConfig = self.store.get()?;
        if !config.enabled {
            return Ok(false);
        }

        let target = self.detector.lock().await.identity_for(identity_id);

        let mut shared = self.shared.lock().await;
        self.activate(&mut shared, target)?;
        Ok(true)
    }

    /// Submit a PIN to the active challenge
    pub async fn submit_pin(&self, pin: Zeroizing<String>) -> Result<AuthOutcome> {
        let mut shared = self.shared.lock().await;
        let Some(session) = shared.session.as_ref() else {
            return Ok(AuthOutcome::NoActiveChallenge);
        };
        if !session.is_active() {
            return Ok(AuthOutcome::Rejected);
        }

        let secret: Secret = self.store.get()?;
        let intruder: IntruderDetectionConfig = self.store.get()?;
        let matched = verify_blocking(secret, pin).await?;

        let Some(session) = shared.session.as_mut() else {
            return Ok(AuthOutcome::NoActiveChallenge);
        };
        let result = session.record_attempt(matched, &intruder);
        let target = session.target().clone();
        let attempt_count = session.attempt_count();
        let summary = session.describe();

        match &result.outcome {
            AuthOutcome::Success => {
                info!("Challenge for {} passed", target);
                shared.session = None;
                shared.background.reset();
                self.emit(ChallengeEvent::Dismiss {
                    reason: DismissReason::Unlocked,
                });
            }
            AuthOutcome::Retry { remaining, .. } => {
                warn!("Wrong PIN for {}: {}", target, summary);
                self.emit(ChallengeEvent::Retry {
                    remaining: *remaining,
                });
            }
            AuthOutcome::LockedOut { .. } => {
                warn!("Challenge for {} locked out: {}", target, summary);
                shared.session = None;
                self.emit(ChallengeEvent::Dismiss {
                    reason: DismissReason::LockedOut,
                });
            }
            AuthOutcome::Rejected | AuthOutcome::NoActiveChallenge => {}
        }
        drop(shared);

        if result.capture {
            self.spawn_capture(target, attempt_count).await;
        }

        Ok(result.outcome)
    }

    /// Start an intruder capture on its own task
    async fn spawn_capture(&self, subject: Identity, attempt_count: u32) {
        let pipeline = Arc::clone(&self.pipeline);
        let store = Arc::clone(&self.store);
        let timestamp = self.clock.now_ms();

        let mut captures = self.captures.lock().await;
        while let Some(finished) = captures.try_join_next() {
            if let Err(e) = finished {
                if !e.is_cancelled() {
                    error!("Capture task failed: {}", e);
                }
            }
        }

        info!("Starting intruder capture for {} (attempt {})", subject, attempt_count);
        captures.spawn(async move {
            let image_path = match pipeline.capture().await {
                Ok(path) => path.map(|p| p.to_string_lossy().into_owned()),
                Err(e) => {
                    warn!("Intruder capture failed, recording without image: {}", e);
                    None
                }
            };

            match store.record_capture(subject, image_path, attempt_count, timestamp) {
                Ok((record, evicted)) => {
                    info!("Stored capture record {}", record.id);
                    remove_images(&evicted).await;
                }
                Err(e) => error!("Failed to store capture record: {}", e),
            }
        });
    }

    /// Wait for every in-flight capture to finish
    pub async fn wait_for_captures(&self) {
        let mut captures = self.captures.lock().await;
        while let Some(finished) = captures.join_next().await {
            if let Err(e) = finished {
                if !e.is_cancelled() {
                    error!("Capture task failed: {}", e);
                }
            }
        }
    }

    // ========================================================================
    // PIN management
    // ========================================================================

    /// Configure the PIN when none is set.
    ///
    /// A configured PIN is only replaced by clearing it through
    /// [`forgot_pin`](Self::forgot_pin) from a live challenge, so every
    /// guess at the old PIN goes through the attempt budget.
    pub async fn set_pin(&self, pin: Zeroizing<String>, confirm: Zeroizing<String>) -> Result<()> {
        validate_new_pin(&pin, &confirm)?;
        let current: Secret = self.store.get()?;
        if current.is_set {
            return Err(AuthError::PinAlreadySet.into());
        }

        let secret = self.hash_blocking(pin).await?;
        self.store.set(&secret)?;
        info!("PIN configured");
        Ok(())
    }

    /// Clear the PIN from the active challenge and route to setup.
    ///
    /// Only reachable while a challenge is accepting input.
    pub async fn forgot_pin(&self) -> Result<()> {
        let mut shared = self.shared.lock().await;
        let allowed = shared
            .session
            .as_ref()
            .is_some_and(AuthSession::can_reset_credential);
        if !allowed {
            return Err(AuthError::ResetUnavailable.into());
        }

        self.store.set(&Secret::unset())?;
        shared.session = None;
        warn!("PIN cleared through the forgot-PIN path");
        self.emit(ChallengeEvent::SetupRequired);
        Ok(())
    }

    async fn hash_blocking(&self, pin: Zeroizing<String>) -> Result<Secret> {
        let hasher = self.hasher.clone();
        let secret = tokio::task::spawn_blocking(move || hasher.hash(&pin))
            .await
            .map_err(|e| AuthError::CryptoError(format!("Hash task failed: {}", e)))??;
        Ok(secret)
    }

    // ========================================================================
    // Lock configuration
    // ========================================================================

    /// Turn locking on or off; turning it off abandons any open challenge
    pub async fn set_lock_enabled(&self, enabled: bool) -> Result<()> {
        self.store
            .update::<LockConfig, _, _>(|config| config.enabled = enabled)?;
        info!("Locking {}", if enabled { "enabled" } else { "disabled" });

        if !enabled {
            let mut shared = self.shared.lock().await;
            shared.background.reset();
            if shared.session.take().is_some_and(|s| s.is_active()) {
                self.emit(ChallengeEvent::Dismiss {
                    reason: DismissReason::Disabled,
                });
            }
        }
        Ok(())
    }

    pub async fn set_background_timeout(&self, timeout_ms: u64) -> Result<()> {
        self.store
            .update::<LockConfig, _, _>(|config| config.background_timeout_ms = timeout_ms)?;
        info!("Background timeout set to {} ms", timeout_ms);
        Ok(())
    }

    pub fn lock_config(&self) -> Result<LockConfig> {
        self.store.get()
    }

    /// Add an identity to the lock set; returns false if already locked
    pub fn lock(&self, identity_id: &str) -> Result<bool> {
        Identity::validate_id(identity_id)?;
        let added = self
            .store
            .update::<LockSet, _, _>(|set| set.insert(identity_id))?;
        if added {
            info!("Locked {}", identity_id);
        }
        Ok(added)
    }

    /// Remove an identity from the lock set; returns false if it was not locked
    pub fn unlock(&self, identity_id: &str) -> Result<bool> {
        let removed = self
            .store
            .update::<LockSet, _, _>(|set| set.remove(identity_id))?;
        if removed {
            info!("Unlocked {}", identity_id);
        }
        Ok(removed)
    }

    /// Locked identifiers in lexical order
    pub fn locked_identities(&self) -> Result<Vec<String>> {
        Ok(self.store.get::<LockSet>()?.sorted())
    }

    pub fn set_intruder_detection(&self, enabled: bool, attempt_threshold: u32) -> Result<()> {
        let config = IntruderDetectionConfig::new(enabled, attempt_threshold)?;
        self.store.set(&config)?;
        info!(
            "Intruder detection {} (threshold {})",
            if enabled { "enabled" } else { "disabled" },
            attempt_threshold
        );
        Ok(())
    }

    pub fn intruder_detection(&self) -> Result<IntruderDetectionConfig> {
        self.store.get()
    }

    // ========================================================================
    // Capture records
    // ========================================================================

    pub fn list_capture_records(&self) -> Result<Vec<CaptureRecord>> {
        self.store.list()
    }

    pub fn list_capture_records_for(&self, identity_id: &str) -> Result<Vec<CaptureRecord>> {
        self.store.list_for(identity_id)
    }

    pub fn list_capture_records_between(&self, start_ms: u64, end_ms: u64) -> Result<Vec<CaptureRecord>> {
        self.store.list_between(start_ms, end_ms)
    }

    pub fn count_capture_records(&self) -> Result<usize> {
        self.store.count()
    }

    /// Delete a record and its image; returns false if no such record
    pub async fn delete_capture_record(&self, id: u64) -> Result<bool> {
        match self.store.delete(id)? {
            Some(record) => {
                remove_images(std::slice::from_ref(&record)).await;
                info!("Deleted capture record {}", id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delete every record and image; returns how many were removed
    pub async fn clear_capture_records(&self) -> Result<usize> {
        let removed = self.store.delete_all()?;
        remove_images(&removed).await;
        info!("Cleared {} capture records", removed.len());
        Ok(removed.len())
    }
}

/// Consume monitor events in order until the service or channel goes away
async fn dispatch(service: Weak<LockService>, mut events: mpsc::Receiver<MonitorEvent>) {
    while let Some(event) = events.recv().await {
        let Some(service) = service.upgrade() else {
            break;
        };
        service.handle_event(event).await;
    }
    debug!("Monitor dispatcher exited");
}

/// Single-flight detector loop
async fn poll_loop(
    detector: Arc<Mutex<ForegroundDetector>>,
    events: mpsc::Sender<MonitorEvent>,
    rescan: Arc<Notify>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut force = false;
    loop {
        let change = detector.lock().await.poll(force).await;
        if let Some(change) = change {
            if events.send(MonitorEvent::ForegroundChanged(change)).await.is_err() {
                break;
            }
        }

        tokio::select! {
            _ = stop.changed() => break,
            _ = rescan.notified() => force = true,
            _ = tokio::time::sleep(interval) => force = false,
        }
    }
    debug!("Poll loop exited");
}

/// Run the Argon2 comparison off the async executor
async fn verify_blocking(secret: Secret, pin: Zeroizing<String>) -> Result<bool> {
    tokio::task::spawn_blocking(move || PinHasher::verify(&secret, &pin))
        .await
        .map_err(|e| AuthError::CryptoError(format!("Verify task failed: {}", e)).into())
}

/// Remove image files referenced by deleted or evicted records
async fn remove_images(records: &[CaptureRecord]) {
    for path in records.iter().filter_map(|r| r.image_path.as_ref()) {
        let path = PathBuf::from(path);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!("Removed capture image {:?}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove capture image {:?}: {}", path, e),
        }
    }
}
