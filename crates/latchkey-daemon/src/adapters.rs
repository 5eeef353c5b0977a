//! File- and process-backed host collaborators
//!
//! The host shell appends activity transitions to a JSON-lines spool and
//! lists its launcher identities in a JSON array. The camera is driven by an
//! external still-capture command.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, info, warn};

use latchkey_core::{ActivityEvent, TimeWindow, UsageStat};

use crate::capture::{CaptureDevice, CaptureError, CaptureSettings, DeviceHandle};
use crate::config::CaptureConfig;
use crate::error::{DaemonError, Result};
use crate::source::{ActivitySource, HomeResolver, StaticLabels};

// ============================================================================
// Activity spool
// ============================================================================

/// Reads activity transitions from a JSON-lines spool file
pub struct SpoolActivitySource {
    path: PathBuf,
}

impl SpoolActivitySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_events(&self) -> Result<Vec<ActivityEvent>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DaemonError::PermissionDenied(format!(
                    "activity spool {:?} does not exist",
                    self.path
                )));
            }
            Err(e) => {
                return Err(DaemonError::Query(format!(
                    "failed to read activity spool {:?}: {}",
                    self.path, e
                )));
            }
        };

        let mut events = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<ActivityEvent>(line) {
                Ok(event) => events.push(event),
                // A line may be half-written while the host appends
                Err(e) => debug!("Skipping spool line {}: {}", index + 1, e),
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl ActivitySource for SpoolActivitySource {
    async fn list_recent_events(&self, window: TimeWindow) -> Result<Vec<ActivityEvent>> {
        let events = self.read_events().await?;
        Ok(events
            .into_iter()
            .filter(|event| window.contains(event.timestamp))
            .collect())
    }

    async fn list_usage_stats(&self, window: TimeWindow) -> Result<Vec<UsageStat>> {
        let events = self.read_events().await?;

        let mut last_used: HashMap<String, u64> = HashMap::new();
        for event in events.into_iter().filter(|e| window.contains(e.timestamp)) {
            let entry = last_used.entry(event.identity).or_insert(event.timestamp);
            if event.timestamp > *entry {
                *entry = event.timestamp;
            }
        }

        Ok(last_used
            .into_iter()
            .map(|(identity, last_used)| UsageStat {
                identity,
                last_used,
            })
            .collect())
    }
}

// ============================================================================
// Home handlers and labels
// ============================================================================

/// Reads launcher identities from a JSON array
pub struct FileHomeResolver {
    path: PathBuf,
}

impl FileHomeResolver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl HomeResolver for FileHomeResolver {
    async fn list_home_handlers(&self) -> Result<HashSet<String>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Home handler list {:?} not found; home escape is disabled",
                    self.path
                );
                return Ok(HashSet::new());
            }
            Err(e) => return Err(e.into()),
        };
        let handlers: Vec<String> = serde_json::from_str(&content)?;
        Ok(handlers.into_iter().collect())
    }
}

/// Load a JSON object of identity to display name
pub fn load_labels(path: &Path) -> Result<StaticLabels> {
    let content = std::fs::read_to_string(path)?;
    let labels: HashMap<String, String> = serde_json::from_str(&content)?;
    info!("Loaded {} display names from {:?}", labels.len(), path);
    Ok(StaticLabels::new(labels))
}

// ============================================================================
// Command-driven camera
// ============================================================================

/// Placeholder in the capture command replaced with the device path
const DEVICE_PLACEHOLDER: &str = "{device}";

/// Still camera driven by an external capture command
///
/// Exclusive ownership is a lock file created with `create_new`; a second
/// acquirer sees the device as busy.
pub struct CommandCaptureDevice {
    permission: bool,
    device_path: PathBuf,
    command: Vec<String>,
    lock_path: PathBuf,
    capture_timeout: Duration,
}

impl CommandCaptureDevice {
    /// `lock_dir` holds the ownership lock file; a stale one from a previous
    /// run is removed here
    pub fn new(config: &CaptureConfig, lock_dir: &Path) -> Self {
        let lock_path = lock_dir.join("capture.lock");
        match std::fs::remove_file(&lock_path) {
            Ok(()) => info!("Removed stale capture lock {:?}", lock_path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove stale capture lock {:?}: {}", lock_path, e),
        }

        Self {
            permission: config.enabled_permission,
            device_path: config.device_path.clone(),
            command: config.command.clone(),
            lock_path,
            capture_timeout: config.capture_timeout(),
        }
    }

    /// Command argv with the device placeholder substituted
    fn argv(&self) -> Vec<String> {
        let device = self.device_path.to_string_lossy();
        self.command
            .iter()
            .map(|arg| arg.replace(DEVICE_PLACEHOLDER, &device))
            .collect()
    }
}

#[async_trait]
impl CaptureDevice for CommandCaptureDevice {
    fn permission_granted(&self) -> bool {
        self.permission
    }

    async fn has_front_device(&self) -> bool {
        tokio::fs::metadata(&self.device_path).await.is_ok()
    }

    async fn acquire_front_device(&self) -> std::result::Result<DeviceHandle, CaptureError> {
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await
        {
            Ok(_) => Ok(DeviceHandle {
                id: self.device_path.to_string_lossy().into_owned(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(
                CaptureError::DeviceUnavailable(format!("{:?} is busy", self.device_path)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn capture_still(
        &self,
        handle: &DeviceHandle,
        settings: &CaptureSettings,
    ) -> std::result::Result<Vec<u8>, CaptureError> {
        let argv = self.argv();
        let Some((program, args)) = argv.split_first() else {
            return Err(CaptureError::Device("no capture command configured".to_string()));
        };

        debug!("Capturing from {} with {}", handle.id, program);
        let child = tokio::process::Command::new(program)
            .args(args)
            .env("LATCHKEY_FOCUS_MODE", settings.focus.as_str())
            .env("LATCHKEY_AUTO_EXPOSURE", settings.auto_exposure.to_string())
            .env("LATCHKEY_AUTO_WHITE_BALANCE", settings.auto_white_balance.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::Device(format!("failed to start {}: {}", program, e)))?;

        let output = tokio::time::timeout(self.capture_timeout, child.wait_with_output())
            .await
            .map_err(|_| CaptureError::Timeout)??;

        if !output.status.success() {
            return Err(CaptureError::Device(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }

    fn release(&self, handle: &DeviceHandle) {
        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            warn!("Failed to release capture device {}: {}", handle.id, e);
        }
    }
}
