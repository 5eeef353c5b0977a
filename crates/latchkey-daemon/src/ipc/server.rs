//! IPC server implementation

use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::error::{DaemonError, Result};
use crate::service::LockService;

use super::frame::{read_frame, write_frame};
use super::socket::SocketListener;
use super::types::{IpcRequest, IpcResponse};

/// IPC server
pub struct IpcServer {
    socket_path: PathBuf,

    /// Service handling every request
    service: Arc<LockService>,
}

impl IpcServer {
    pub fn new(socket_path: PathBuf, service: Arc<LockService>) -> Self {
        Self {
            socket_path,
            service,
        }
    }

    /// Serve connections until `shutdown` flips to true.
    ///
    /// The socket file is removed when this returns.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let listener = SocketListener::bind(&self.socket_path).await?;
        info!("IPC server listening on {:?}", listener.path());
        let streams_shutdown = shutdown.clone();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok(stream) => {
                        let service = Arc::clone(&self.service);
                        let shutdown = streams_shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, service, shutdown).await {
                                warn!("Connection closed with error: {}", e);
                            }
                        });
                    }
                    Err(e) => error!("{}", e),
                },
            }
        }

        drop(listener);
        info!("IPC server stopped");
        Ok(())
    }
}

/// Serve requests on one connection until the peer hangs up.
///
/// A subscribe request turns the connection into an event stream for the
/// rest of its life.
async fn handle_connection<S>(
    stream: S,
    service: Arc<LockService>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    // Request lines may carry PINs
    let mut line = Zeroizing::new(String::new());

    while read_frame(&mut reader, &mut line).await? {
        let response = match serde_json::from_str::<IpcRequest>(&line) {
            Ok(request) if request.is_subscription() => {
                debug!("Connection subscribed: {:?}", request);
                return match request {
                    IpcRequest::SubscribeChanges => {
                        stream_events(
                            service.subscribe_changes(),
                            |change| IpcResponse::Change { change },
                            &mut reader,
                            &mut writer,
                            &mut shutdown,
                        )
                        .await
                    }
                    _ => {
                        stream_events(
                            service.subscribe_challenges(),
                            |challenge| IpcResponse::Challenge { challenge },
                            &mut reader,
                            &mut writer,
                            &mut shutdown,
                        )
                        .await
                    }
                };
            }
            Ok(request) => {
                debug!("Received IPC request: {:?}", request);
                handle_request(request, &service)
                    .await
                    .unwrap_or_else(|e| IpcResponse::Error {
                        message: e.to_string(),
                    })
            }
            Err(e) => IpcResponse::Error {
                message: format!("Invalid request: {}", e),
            },
        };
        write_frame(&mut writer, &response).await?;
    }

    Ok(())
}

/// Forward broadcast events as frames until the peer hangs up or the server
/// stops
async fn stream_events<T, R, W>(
    mut events: broadcast::Receiver<T>,
    wrap: fn(T) -> IpcResponse,
    reader: &mut R,
    writer: &mut W,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()>
where
    T: Clone,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_frame(writer, &IpcResponse::Subscribed).await?;
    // Input after subscribing is read only to notice the hang-up
    let mut ignored = String::new();

    while !*shutdown.borrow() {
        tokio::select! {
            _ = shutdown.changed() => break,
            open = read_frame(reader, &mut ignored) => {
                if !open? {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(event) => write_frame(writer, &wrap(event)).await?,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Subscriber fell behind; dropped {} events", missed);
                    write_frame(writer, &IpcResponse::Lagged { missed }).await?;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    debug!("Event stream closed");
    Ok(())
}

/// Handle a single request
async fn handle_request(request: IpcRequest, service: &LockService) -> Result<IpcResponse> {
    let response = match request {
        IpcRequest::Ping => IpcResponse::Pong {
            version: env!("CARGO_PKG_VERSION").to_string(),
        },

        IpcRequest::Status => IpcResponse::Status {
            status: service.status().await?,
        },

        IpcRequest::StartMonitoring => IpcResponse::Changed {
            changed: service.start_monitoring().await,
        },

        IpcRequest::StopMonitoring => IpcResponse::Changed {
            changed: service.stop_monitoring().await,
        },

        IpcRequest::GetLastIdentity => IpcResponse::LastIdentity {
            identity: service.get_last_identity().await,
        },

        IpcRequest::SubmitPin { pin } => IpcResponse::Auth {
            outcome: service.submit_pin(Zeroizing::new(pin)).await?,
        },

        IpcRequest::SetPin { pin, confirm } => {
            service
                .set_pin(Zeroizing::new(pin), Zeroizing::new(confirm))
                .await?;
            IpcResponse::Ok
        }

        IpcRequest::ForgotPin => {
            service.forgot_pin().await?;
            IpcResponse::Ok
        }

        IpcRequest::SetLockEnabled { enabled } => {
            service.set_lock_enabled(enabled).await?;
            IpcResponse::Ok
        }

        IpcRequest::SetBackgroundTimeout { timeout_ms } => {
            service.set_background_timeout(timeout_ms).await?;
            IpcResponse::Ok
        }

        IpcRequest::Lock { identity } => IpcResponse::Changed {
            changed: service.lock(&identity)?,
        },

        IpcRequest::Unlock { identity } => IpcResponse::Changed {
            changed: service.unlock(&identity)?,
        },

        IpcRequest::ListLocked => IpcResponse::Locked {
            identities: service.locked_identities()?,
        },

        IpcRequest::SetIntruderDetection { enabled, threshold } => {
            service.set_intruder_detection(enabled, threshold)?;
            IpcResponse::Ok
        }

        IpcRequest::GetIntruderDetection => IpcResponse::IntruderDetection {
            config: service.intruder_detection()?,
        },

        IpcRequest::RequestChallenge { identity } => IpcResponse::Changed {
            changed: service.request_challenge(&identity).await?,
        },

        IpcRequest::ListRecords {
            identity,
            since,
            until,
        } => {
            let start = since.unwrap_or(0);
            let end = until.unwrap_or(u64::MAX);
            if start > end {
                return Err(DaemonError::Ipc(format!(
                    "Empty time range: {} > {}",
                    start, end
                )));
            }
            let ranged = since.is_some() || until.is_some();
            let records = match identity {
                Some(identity) => {
                    let mut records = service.list_capture_records_for(&identity)?;
                    records.retain(|r| r.timestamp >= start && r.timestamp <= end);
                    records
                }
                None if ranged => service.list_capture_records_between(start, end)?,
                None => service.list_capture_records()?,
            };
            IpcResponse::Records { records }
        }

        IpcRequest::CountRecords => IpcResponse::Count {
            count: service.count_capture_records()?,
        },

        IpcRequest::DeleteRecord { id } => IpcResponse::Changed {
            changed: service.delete_capture_record(id).await?,
        },

        IpcRequest::ClearRecords => IpcResponse::Count {
            count: service.clear_capture_records().await?,
        },

        IpcRequest::Foregrounded => {
            service.signal_foregrounded().await?;
            IpcResponse::Ok
        }

        IpcRequest::Backgrounded => {
            service.signal_backgrounded().await?;
            IpcResponse::Ok
        }

        IpcRequest::ScreenOn => IpcResponse::Changed {
            changed: service.rescan().await?,
        },

        IpcRequest::SubscribeChanges | IpcRequest::SubscribeChallenges => {
            return Err(DaemonError::Ipc(
                "Subscriptions are served on their own connection".to_string(),
            ));
        }
    };

    Ok(response)
}
