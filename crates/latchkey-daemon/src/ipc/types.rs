//! IPC protocol types

use serde::{Deserialize, Serialize};

use latchkey_core::{
    AuthOutcome, CaptureRecord, ForegroundChange, Identity, IntruderDetectionConfig,
};

use crate::service::{ChallengeEvent, ServiceStatus};

/// IPC request types
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcRequest {
    /// Check if daemon is running
    Ping,

    /// Get service status
    Status,

    /// Start foreground monitoring
    StartMonitoring,

    /// Stop foreground monitoring
    StopMonitoring,

    /// Identity from the latest foreground change
    GetLastIdentity,

    /// Submit a PIN to the active challenge
    SubmitPin { pin: String },

    /// Configure the PIN for the first time
    SetPin { pin: String, confirm: String },

    /// Clear the PIN from the active challenge
    ForgotPin,

    /// Turn locking on or off
    SetLockEnabled { enabled: bool },

    /// Set the background-duration timeout
    SetBackgroundTimeout { timeout_ms: u64 },

    /// Add an identity to the lock set
    Lock { identity: String },

    /// Remove an identity from the lock set
    Unlock { identity: String },

    /// List locked identities
    ListLocked,

    /// Configure intruder captures
    SetIntruderDetection { enabled: bool, threshold: u32 },

    /// Read intruder capture settings
    GetIntruderDetection,

    /// Challenge an identity now
    RequestChallenge { identity: String },

    /// List capture records, optionally filtered
    ListRecords {
        identity: Option<String>,
        since: Option<u64>,
        until: Option<u64>,
    },

    /// Count capture records
    CountRecords,

    /// Delete one capture record and its image
    DeleteRecord { id: u64 },

    /// Delete every capture record and image
    ClearRecords,

    /// Host shell: our session came to the foreground
    Foregrounded,

    /// Host shell: our session went to the background
    Backgrounded,

    /// Host shell: screen on, user present, or boot completed
    ScreenOn,

    /// Stream foreground changes on this connection
    SubscribeChanges,

    /// Stream challenge events on this connection
    SubscribeChallenges,
}

impl IpcRequest {
    /// Request name for logging; PIN fields never reach the log
    pub fn kind(&self) -> &'static str {
        match self {
            IpcRequest::Ping => "ping",
            IpcRequest::Status => "status",
            IpcRequest::StartMonitoring => "start_monitoring",
            IpcRequest::StopMonitoring => "stop_monitoring",
            IpcRequest::GetLastIdentity => "get_last_identity",
            IpcRequest::SubmitPin { .. } => "submit_pin",
            IpcRequest::SetPin { .. } => "set_pin",
            IpcRequest::ForgotPin => "forgot_pin",
            IpcRequest::SetLockEnabled { .. } => "set_lock_enabled",
            IpcRequest::SetBackgroundTimeout { .. } => "set_background_timeout",
            IpcRequest::Lock { .. } => "lock",
            IpcRequest::Unlock { .. } => "unlock",
            IpcRequest::ListLocked => "list_locked",
            IpcRequest::SetIntruderDetection { .. } => "set_intruder_detection",
            IpcRequest::GetIntruderDetection => "get_intruder_detection",
            IpcRequest::RequestChallenge { .. } => "request_challenge",
            IpcRequest::ListRecords { .. } => "list_records",
            IpcRequest::CountRecords => "count_records",
            IpcRequest::DeleteRecord { .. } => "delete_record",
            IpcRequest::ClearRecords => "clear_records",
            IpcRequest::Foregrounded => "foregrounded",
            IpcRequest::Backgrounded => "backgrounded",
            IpcRequest::ScreenOn => "screen_on",
            IpcRequest::SubscribeChanges => "subscribe_changes",
            IpcRequest::SubscribeChallenges => "subscribe_challenges",
        }
    }
}

impl std::fmt::Debug for IpcRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

/// IPC response types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcResponse {
    /// Success with no data
    Ok,

    /// Pong response
    Pong { version: String },

    /// Error response
    Error { message: String },

    /// Service status
    Status { status: ServiceStatus },

    /// Latest foreground identity
    LastIdentity { identity: Option<Identity> },

    /// Outcome of a PIN submission
    Auth { outcome: AuthOutcome },

    /// Whether a toggle-style request changed anything
    Changed { changed: bool },

    /// Locked identities
    Locked { identities: Vec<String> },

    /// Intruder capture settings
    IntruderDetection { config: IntruderDetectionConfig },

    /// Capture records, newest first
    Records { records: Vec<CaptureRecord> },

    /// Record count
    Count { count: usize },

    /// The connection now streams events until either side closes it
    Subscribed,

    /// Streamed foreground change
    Change { change: ForegroundChange },

    /// Streamed challenge event
    Challenge { challenge: ChallengeEvent },

    /// The subscriber fell behind and `missed` events were dropped
    Lagged { missed: u64 },
}

impl IpcRequest {
    /// Whether the request turns its connection into an event stream
    pub fn is_subscription(&self) -> bool {
        matches!(
            self,
            IpcRequest::SubscribeChanges | IpcRequest::SubscribeChallenges
        )
    }
}
