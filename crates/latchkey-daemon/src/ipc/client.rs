//! IPC client used by the CLI and the host shell

use std::path::PathBuf;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

use crate::error::{DaemonError, Result};

use super::frame::{read_frame, write_frame};
use super::socket;
use super::types::{IpcRequest, IpcResponse};

/// Upper bound for one request/response exchange
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One-shot request client; each request opens its own connection
pub struct IpcClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl IpcClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the exchange timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send a request and wait for its response
    pub async fn request(&self, request: &IpcRequest) -> Result<IpcResponse> {
        tokio::time::timeout(self.timeout, self.exchange(request))
            .await
            .map_err(|_| DaemonError::Timeout)?
    }

    async fn exchange(&self, request: &IpcRequest) -> Result<IpcResponse> {
        let stream = socket::connect(&self.socket_path).await?;
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);

        write_frame(&mut writer, request).await?;

        let mut line = String::new();
        if !read_frame(&mut reader, &mut line).await? {
            return Err(DaemonError::Ipc(format!(
                "Daemon closed the connection during {}",
                request.kind()
            )));
        }
        Ok(serde_json::from_str(&line)?)
    }

    /// Open an event stream with a subscribe request.
    ///
    /// Waits (bounded by the request timeout) for the daemon to acknowledge;
    /// after that the stream has no timeout.
    pub async fn subscribe(&self, request: &IpcRequest) -> Result<Subscription> {
        if !request.is_subscription() {
            return Err(DaemonError::Ipc(format!(
                "{} does not open a stream",
                request.kind()
            )));
        }

        let stream = socket::connect(&self.socket_path).await?;
        let (reader, mut writer) = stream.into_split();
        write_frame(&mut writer, request).await?;

        let mut subscription = Subscription {
            reader: BufReader::new(reader),
            _writer: writer,
            line: String::new(),
        };
        let ack = tokio::time::timeout(self.timeout, subscription.next_event())
            .await
            .map_err(|_| DaemonError::Timeout)??;
        match ack {
            Some(IpcResponse::Subscribed) => Ok(subscription),
            Some(IpcResponse::Error { message }) => Err(DaemonError::Ipc(message)),
            Some(other) => Err(DaemonError::Ipc(format!(
                "Unexpected reply to {}: {:?}",
                request.kind(),
                other
            ))),
            None => Err(DaemonError::Ipc(format!(
                "Daemon closed the connection during {}",
                request.kind()
            ))),
        }
    }

    /// Whether a daemon answers on the socket
    pub async fn ping(&self) -> bool {
        matches!(
            self.request(&IpcRequest::Ping).await,
            Ok(IpcResponse::Pong { .. })
        )
    }
}

/// Event stream opened by [`IpcClient::subscribe`]
pub struct Subscription {
    reader: BufReader<OwnedReadHalf>,
    // Dropping the write half reads as a hang-up on the daemon side
    _writer: OwnedWriteHalf,
    line: String,
}

impl Subscription {
    /// Next streamed frame, or `None` once the daemon ends the stream
    pub async fn next_event(&mut self) -> Result<Option<IpcResponse>> {
        if !read_frame(&mut self.reader, &mut self.line).await? {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&self.line)?))
    }
}
