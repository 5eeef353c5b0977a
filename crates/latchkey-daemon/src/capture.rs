//! Evidence capture pipeline
//!
//! One still image per request from the front-facing device. Requests queue
//! behind a single in-flight capture; a request that cannot get its turn in
//! time fails with [`CaptureError::Busy`]. Missing permission or a missing
//! device is a soft failure (`Ok(None)`): the caller still writes a record,
//! just without an image.
//!
//! The device is held through a [`DeviceLease`], which releases it exactly
//! once when dropped. That covers success, every error branch, and a capture
//! task being aborted mid-flight.

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::source::Clock;

/// JPEG quality used when re-encoding a rotated image
const JPEG_QUALITY: u8 = 80;

/// Capture pipeline errors
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Camera permission not granted")]
    PermissionDenied,

    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Another capture is in progress")]
    Busy,

    #[error("Capture timed out")]
    Timeout,

    #[error("Device error: {0}")]
    Device(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque handle to an acquired device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub id: String,
}

/// Focus mode requested for the still
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusMode {
    ContinuousPicture,
    Auto,
}

impl FocusMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FocusMode::ContinuousPicture => "continuous-picture",
            FocusMode::Auto => "auto",
        }
    }
}

/// 3A settings for the still capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSettings {
    pub focus: FocusMode,
    pub auto_exposure: bool,
    pub auto_white_balance: bool,
}

impl CaptureSettings {
    /// Continuous focus with automatic exposure and white balance
    pub fn auto() -> Self {
        Self {
            focus: FocusMode::ContinuousPicture,
            auto_exposure: true,
            auto_white_balance: true,
        }
    }
}

/// A front-facing still camera
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Whether the daemon may use the camera
    fn permission_granted(&self) -> bool;

    /// Whether a front-facing device exists
    async fn has_front_device(&self) -> bool;

    /// Take exclusive ownership of the front-facing device
    async fn acquire_front_device(&self) -> Result<DeviceHandle, CaptureError>;

    /// Capture one still as encoded bytes
    async fn capture_still(
        &self,
        handle: &DeviceHandle,
        settings: &CaptureSettings,
    ) -> Result<Vec<u8>, CaptureError>;

    /// Give the device back; called exactly once per successful acquire
    fn release(&self, handle: &DeviceHandle);
}

/// Scoped ownership of an acquired device
pub struct DeviceLease {
    device: Arc<dyn CaptureDevice>,
    handle: DeviceHandle,
}

impl DeviceLease {
    pub fn new(device: Arc<dyn CaptureDevice>, handle: DeviceHandle) -> Self {
        Self { device, handle }
    }

    pub fn handle(&self) -> &DeviceHandle {
        &self.handle
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        debug!("Releasing capture device {}", self.handle.id);
        self.device.release(&self.handle);
    }
}

/// Timing for one capture
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub photo_dir: PathBuf,
    pub stabilization_delay: Duration,
    pub acquire_timeout: Duration,
    pub capture_timeout: Duration,
}

/// Single-flight still capture into the photo directory
pub struct CapturePipeline {
    device: Arc<dyn CaptureDevice>,
    clock: Arc<dyn Clock>,
    settings: PipelineSettings,
    in_flight: Mutex<()>,
}

impl CapturePipeline {
    pub fn new(device: Arc<dyn CaptureDevice>, clock: Arc<dyn Clock>, settings: PipelineSettings) -> Self {
        Self {
            device,
            clock,
            settings,
            in_flight: Mutex::new(()),
        }
    }

    /// Capture one still and return where it was written.
    ///
    /// `Ok(None)` means the capture was skipped for lack of permission or
    /// hardware.
    pub async fn capture(&self) -> Result<Option<PathBuf>, CaptureError> {
        if !self.device.permission_granted() {
            info!("Skipping capture: camera permission not granted");
            return Ok(None);
        }
        if !self.device.has_front_device().await {
            info!("Skipping capture: no front-facing device");
            return Ok(None);
        }

        let _turn = tokio::time::timeout(self.settings.acquire_timeout, self.in_flight.lock())
            .await
            .map_err(|_| CaptureError::Busy)?;

        let handle = match tokio::time::timeout(
            self.settings.acquire_timeout,
            self.device.acquire_front_device(),
        )
        .await
        {
            Ok(Ok(handle)) => handle,
            Ok(Err(CaptureError::PermissionDenied)) => {
                info!("Skipping capture: camera permission revoked");
                return Ok(None);
            }
            Ok(Err(CaptureError::DeviceUnavailable(reason))) => {
                warn!("Skipping capture: {}", reason);
                return Ok(None);
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(CaptureError::Timeout),
        };
        let lease = DeviceLease::new(Arc::clone(&self.device), handle);

        tokio::time::sleep(self.settings.stabilization_delay).await;

        let bytes = tokio::time::timeout(
            self.settings.capture_timeout,
            self.device.capture_still(lease.handle(), &CaptureSettings::auto()),
        )
        .await
        .map_err(|_| CaptureError::Timeout)??;

        if bytes.is_empty() {
            return Err(CaptureError::Device("device returned no image data".to_string()));
        }

        let path = self.write_raw(&bytes).await?;

        let raw = bytes;
        match tokio::task::spawn_blocking(move || normalize_orientation(&raw)).await {
            Ok(Ok(Some(rotated))) => match write_replace(&path, &rotated).await {
                Ok(()) => debug!("Rotated landscape capture {:?}", path),
                Err(e) => warn!("Keeping raw capture {:?}: {}", path, e),
            },
            Ok(Ok(None)) => {}
            Ok(Err(e)) => warn!("Keeping raw capture {:?}: {}", path, e),
            Err(e) => warn!("Orientation task failed for {:?}: {}", path, e),
        }

        drop(lease);
        info!("Captured still to {:?}", path);
        Ok(Some(path))
    }

    /// Write bytes to a new timestamp-named file in the photo directory
    async fn write_raw(&self, bytes: &[u8]) -> Result<PathBuf, CaptureError> {
        tokio::fs::create_dir_all(&self.settings.photo_dir).await?;
        let stamp = self.clock.now_ms();

        let mut suffix = 0u32;
        loop {
            let name = if suffix == 0 {
                format!("intruder_{}.jpg", stamp)
            } else {
                format!("intruder_{}_{}.jpg", stamp, suffix)
            };
            let path = self.settings.photo_dir.join(name);
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(bytes).await?;
                    file.flush().await?;
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => suffix += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Rotate a landscape image 90 degrees counter-clockwise.
///
/// Returns the re-encoded JPEG, or `None` when the image is already portrait
/// or square.
pub fn normalize_orientation(bytes: &[u8]) -> Result<Option<Vec<u8>>, CaptureError> {
    let decoded = image::load_from_memory(bytes).map_err(|e| CaptureError::Image(e.to_string()))?;
    if decoded.width() <= decoded.height() {
        return Ok(None);
    }

    let rotated = decoded.rotate270().to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode_image(&rotated)
        .map_err(|e| CaptureError::Image(e.to_string()))?;
    Ok(Some(out))
}

/// Replace a file's contents through a temp file and a rename
async fn write_replace(path: &Path, bytes: &[u8]) -> Result<(), CaptureError> {
    let temp_path = path.with_extension("jpg.tmp");
    let written = match tokio::fs::write(&temp_path, bytes).await {
        Ok(()) => tokio::fs::rename(&temp_path, path).await,
        Err(e) => Err(e),
    };
    if written.is_err() {
        let _ = tokio::fs::remove_file(&temp_path).await;
    }
    written.map_err(CaptureError::from)
}
