//! Daemon configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DaemonError, Result};

/// Environment variable overriding the configuration file location
pub const CONFIG_ENV: &str = "LATCHKEY_CONFIG";

/// Daemon configuration
///
/// Missing fields take their defaults, so a partial file is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory holding settings and capture records
    pub data_dir: PathBuf,

    /// Unix socket path for IPC
    pub ipc_socket_path: PathBuf,

    /// Delay between the end of one foreground poll and the start of the next
    pub poll_interval_ms: u64,

    /// Look-back window for foreground transition events
    pub event_lookback_ms: u64,

    /// Window for the last-used fallback query
    pub usage_fallback_window_ms: u64,

    /// Upper bound for any single activity query
    pub query_timeout_ms: u64,

    /// Delay before the forced re-check after a wake or boot signal
    pub wake_recheck_delay_ms: u64,

    /// Our own identity as reported by the host; never challenged
    pub self_identity: String,

    /// Wrong PINs allowed per challenge before lockout
    pub max_attempts: u32,

    /// JSON-lines activity log written by the host shell
    pub activity_spool_path: PathBuf,

    /// JSON array of launcher identities
    pub home_handlers_path: PathBuf,

    /// Optional JSON map of identity to display name
    pub labels_path: Option<PathBuf>,

    /// Intruder capture device settings
    pub capture: CaptureConfig,
}

/// Capture device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Whether the daemon may use the camera at all
    pub enabled_permission: bool,

    /// Front-facing device node
    pub device_path: PathBuf,

    /// Still capture command; `{device}` is replaced with `device_path` and
    /// the command must write JPEG bytes to stdout
    pub command: Vec<String>,

    /// Settle time for focus, exposure, and white balance
    pub stabilization_delay_ms: u64,

    /// Upper bound for acquiring the device
    pub acquire_timeout_ms: u64,

    /// Upper bound for the still capture itself
    pub capture_timeout_ms: u64,

    /// Directory for captured images
    pub photo_dir: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let data_dir = Self::default_data_dir();
        Self {
            ipc_socket_path: Self::default_ipc_path(),
            poll_interval_ms: 500,
            event_lookback_ms: 60_000,
            usage_fallback_window_ms: 86_400_000,
            query_timeout_ms: 2_000,
            wake_recheck_delay_ms: 2_000,
            self_identity: "latchkey".to_string(),
            max_attempts: latchkey_core::auth::DEFAULT_MAX_ATTEMPTS,
            activity_spool_path: data_dir.join("activity.jsonl"),
            home_handlers_path: data_dir.join("home_handlers.json"),
            labels_path: None,
            capture: CaptureConfig::with_photo_dir(data_dir.join("photos")),
            data_dir,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::with_photo_dir(DaemonConfig::default_data_dir().join("photos"))
    }
}

impl CaptureConfig {
    fn with_photo_dir(photo_dir: PathBuf) -> Self {
        Self {
            enabled_permission: true,
            device_path: PathBuf::from("/dev/video0"),
            command: [
                "fswebcam",
                "--device",
                "{device}",
                "--no-banner",
                "--jpeg",
                "90",
                "-",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            stabilization_delay_ms: 1_500,
            acquire_timeout_ms: 5_000,
            capture_timeout_ms: 10_000,
            photo_dir,
        }
    }

    pub fn stabilization_delay(&self) -> Duration {
        Duration::from_millis(self.stabilization_delay_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }
}

impl DaemonConfig {
    /// Default IPC path under the runtime directory
    fn default_ipc_path() -> PathBuf {
        dirs::runtime_dir()
            .map(|dir| dir.join("latchkey.sock"))
            .unwrap_or_else(|| PathBuf::from("/tmp/latchkey.sock"))
    }

    fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/var/lib"))
            .join("latchkey")
    }

    /// Configuration file location: `$LATCHKEY_CONFIG`, else the user config dir
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("/etc"))
                    .join("latchkey")
                    .join("daemon.json")
            })
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file at `path`, writing the defaults there first if it is missing
    pub fn load_or_create(path: &Path) -> Result<(Self, bool)> {
        if path.exists() {
            return Ok((Self::load(path)?, false));
        }
        let config = Self::default();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        config.save(path)?;
        Ok((config, true))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values that would stall or disable the monitor
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(DaemonError::Config("poll_interval_ms must be positive".to_string()));
        }
        if self.query_timeout_ms == 0 {
            return Err(DaemonError::Config("query_timeout_ms must be positive".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(DaemonError::Config("max_attempts must be at least 1".to_string()));
        }
        if self.self_identity.trim().is_empty() {
            return Err(DaemonError::Config("self_identity must not be empty".to_string()));
        }
        Ok(())
    }

    /// Create directories if they don't exist
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.capture.photo_dir)?;
        if let Some(parent) = self.ipc_socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn wake_recheck_delay(&self) -> Duration {
        Duration::from_millis(self.wake_recheck_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reference_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.event_lookback_ms, 60_000);
        assert_eq!(config.usage_fallback_window_ms, 86_400_000);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.capture.stabilization_delay_ms, 1_500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("daemon.json");

        let (_, created) = DaemonConfig::load_or_create(&path).unwrap();
        assert!(created);
        assert!(path.exists());

        let (loaded, created) = DaemonConfig::load_or_create(&path).unwrap();
        assert!(!created);
        assert_eq!(loaded.self_identity, "latchkey");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("daemon.json");
        std::fs::write(&path, r#"{"poll_interval_ms": 250, "capture": {"enabled_permission": false}}"#)
            .unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.query_timeout_ms, 2_000);
        assert!(!config.capture.enabled_permission);
        assert_eq!(config.capture.acquire_timeout_ms, 5_000);
    }

    #[test]
    fn test_validation_rejects_zero_interval() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("daemon.json");
        std::fs::write(&path, r#"{"poll_interval_ms": 0}"#).unwrap();
        assert!(matches!(DaemonConfig::load(&path), Err(DaemonError::Config(_))));
    }
}
