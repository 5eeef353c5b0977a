//! Client for communicating with the Latchkey daemon

use std::path::PathBuf;
use tracing::debug;
use zeroize::Zeroizing;

use latchkey_core::{AuthOutcome, CaptureRecord, Identity, IntruderDetectionConfig};
use latchkey_daemon::error::DaemonError;
use latchkey_daemon::ipc::{IpcClient, IpcRequest, IpcResponse, Subscription};
use latchkey_daemon::{DaemonConfig, ServiceStatus};

/// Client for the Latchkey daemon
pub struct LatchkeyClient {
    inner: IpcClient,
}

/// Error type for client operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Daemon not running")]
    DaemonNotRunning,

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Unexpected response from daemon")]
    UnexpectedResponse,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Daemon error: {0}")]
    DaemonError(String),
}

impl ClientError {
    fn from_daemon_error(e: DaemonError) -> Self {
        match &e {
            DaemonError::Ipc(msg) if msg.contains("not running") => ClientError::DaemonNotRunning,
            _ => ClientError::DaemonError(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Unwrap the expected response variant or turn anything else into an error
macro_rules! expect_response {
    ($response:expr, $pattern:pat => $value:expr) => {
        match $response {
            $pattern => Ok($value),
            IpcResponse::Error { message } => Err(ClientError::RequestFailed(message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    };
}

impl Default for LatchkeyClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LatchkeyClient {
    /// Create a client for the socket named in the daemon configuration
    pub fn new() -> Self {
        let socket_path = DaemonConfig::load(&DaemonConfig::default_path())
            .map(|config| config.ipc_socket_path)
            .unwrap_or_else(|_| DaemonConfig::default().ipc_socket_path);
        Self::with_socket_path(socket_path)
    }

    /// Create a new client with a custom socket path
    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            inner: IpcClient::new(socket_path),
        }
    }

    async fn send(&self, request: IpcRequest) -> Result<IpcResponse> {
        debug!("Sending {} request", request.kind());
        self.inner
            .request(&request)
            .await
            .map_err(ClientError::from_daemon_error)
    }

    /// Send a request that answers with `Ok`
    async fn send_ok(&self, request: IpcRequest) -> Result<()> {
        expect_response!(self.send(request).await?, IpcResponse::Ok => ())
    }

    /// Send a request that answers with `Changed`
    async fn send_changed(&self, request: IpcRequest) -> Result<bool> {
        expect_response!(self.send(request).await?, IpcResponse::Changed { changed } => changed)
    }

    /// Check if the daemon is running
    pub async fn ping(&self) -> Result<String> {
        expect_response!(self.send(IpcRequest::Ping).await?, IpcResponse::Pong { version } => version)
    }

    pub async fn status(&self) -> Result<ServiceStatus> {
        expect_response!(self.send(IpcRequest::Status).await?, IpcResponse::Status { status } => status)
    }

    pub async fn start_monitoring(&self) -> Result<bool> {
        self.send_changed(IpcRequest::StartMonitoring).await
    }

    pub async fn stop_monitoring(&self) -> Result<bool> {
        self.send_changed(IpcRequest::StopMonitoring).await
    }

    pub async fn last_identity(&self) -> Result<Option<Identity>> {
        expect_response!(
            self.send(IpcRequest::GetLastIdentity).await?,
            IpcResponse::LastIdentity { identity } => identity
        )
    }

    pub async fn submit_pin(&self, pin: Zeroizing<String>) -> Result<AuthOutcome> {
        let request = IpcRequest::SubmitPin {
            pin: pin.to_string(),
        };
        expect_response!(self.send(request).await?, IpcResponse::Auth { outcome } => outcome)
    }

    pub async fn set_pin(&self, pin: Zeroizing<String>, confirm: Zeroizing<String>) -> Result<()> {
        self.send_ok(IpcRequest::SetPin {
            pin: pin.to_string(),
            confirm: confirm.to_string(),
        })
        .await
    }

    pub async fn forgot_pin(&self) -> Result<()> {
        self.send_ok(IpcRequest::ForgotPin).await
    }

    pub async fn set_lock_enabled(&self, enabled: bool) -> Result<()> {
        self.send_ok(IpcRequest::SetLockEnabled { enabled }).await
    }

    pub async fn set_background_timeout(&self, timeout_ms: u64) -> Result<()> {
        self.send_ok(IpcRequest::SetBackgroundTimeout { timeout_ms }).await
    }

    pub async fn lock(&self, identity: &str) -> Result<bool> {
        self.send_changed(IpcRequest::Lock {
            identity: identity.to_string(),
        })
        .await
    }

    pub async fn unlock(&self, identity: &str) -> Result<bool> {
        self.send_changed(IpcRequest::Unlock {
            identity: identity.to_string(),
        })
        .await
    }

    pub async fn locked(&self) -> Result<Vec<String>> {
        expect_response!(
            self.send(IpcRequest::ListLocked).await?,
            IpcResponse::Locked { identities } => identities
        )
    }

    pub async fn request_challenge(&self, identity: &str) -> Result<bool> {
        self.send_changed(IpcRequest::RequestChallenge {
            identity: identity.to_string(),
        })
        .await
    }

    pub async fn set_intruder_detection(&self, enabled: bool, threshold: u32) -> Result<()> {
        self.send_ok(IpcRequest::SetIntruderDetection { enabled, threshold })
            .await
    }

    pub async fn intruder_detection(&self) -> Result<IntruderDetectionConfig> {
        expect_response!(
            self.send(IpcRequest::GetIntruderDetection).await?,
            IpcResponse::IntruderDetection { config } => config
        )
    }

    pub async fn list_records(
        &self,
        identity: Option<String>,
        since: Option<u64>,
        until: Option<u64>,
    ) -> Result<Vec<CaptureRecord>> {
        let request = IpcRequest::ListRecords {
            identity,
            since,
            until,
        };
        expect_response!(self.send(request).await?, IpcResponse::Records { records } => records)
    }

    pub async fn count_records(&self) -> Result<usize> {
        expect_response!(self.send(IpcRequest::CountRecords).await?, IpcResponse::Count { count } => count)
    }

    pub async fn delete_record(&self, id: u64) -> Result<bool> {
        self.send_changed(IpcRequest::DeleteRecord { id }).await
    }

    pub async fn clear_records(&self) -> Result<usize> {
        expect_response!(self.send(IpcRequest::ClearRecords).await?, IpcResponse::Count { count } => count)
    }

    pub async fn signal_foreground(&self) -> Result<()> {
        self.send_ok(IpcRequest::Foregrounded).await
    }

    pub async fn signal_background(&self) -> Result<()> {
        self.send_ok(IpcRequest::Backgrounded).await
    }

    pub async fn signal_wake(&self) -> Result<bool> {
        self.send_changed(IpcRequest::ScreenOn).await
    }

    /// Follow challenge events (show, retry, dismiss, setup)
    pub async fn watch_challenges(&self) -> Result<EventStream> {
        self.watch(IpcRequest::SubscribeChallenges).await
    }

    /// Follow foreground changes
    pub async fn watch_changes(&self) -> Result<EventStream> {
        self.watch(IpcRequest::SubscribeChanges).await
    }

    async fn watch(&self, request: IpcRequest) -> Result<EventStream> {
        debug!("Subscribing with {:?}", request);
        let inner = self
            .inner
            .subscribe(&request)
            .await
            .map_err(ClientError::from_daemon_error)?;
        Ok(EventStream { inner })
    }
}

/// Events streamed by the daemon after a watch request
pub struct EventStream {
    inner: Subscription,
}

impl EventStream {
    /// Next event, or `None` when the daemon shuts the stream
    pub async fn next_event(&mut self) -> Result<Option<IpcResponse>> {
        self.inner
            .next_event()
            .await
            .map_err(ClientError::from_daemon_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_daemon_is_reported() {
        let dir = std::env::temp_dir().join(format!("latchkey-cli-test-{}", std::process::id()));
        let client = LatchkeyClient::with_socket_path(dir.join("absent.sock"));
        assert!(matches!(client.ping().await, Err(ClientError::DaemonNotRunning)));
    }
}
