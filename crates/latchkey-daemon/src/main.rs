//! Latchkey Daemon - Main entry point
//!
//! The daemon watches the foreground identity, raises PIN challenges, and
//! records intruder captures.

use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use latchkey_daemon::{
    adapters::{load_labels, CommandCaptureDevice, FileHomeResolver, SpoolActivitySource},
    source::StaticLabels,
    ChallengeEvent, Collaborators, DaemonConfig, IpcServer, LabelResolver, LockService,
    ServiceSettings, StateStore, SystemClock,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "latchkey_daemon=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Latchkey daemon v{}", env!("CARGO_PKG_VERSION"));

    // Load or create config
    let config_path = DaemonConfig::default_path();
    let (config, created) = DaemonConfig::load_or_create(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    }

    // Ensure directories exist
    config.ensure_directories()?;

    // Initialize components
    let store = Arc::new(StateStore::open(&config.data_dir)?);

    let labels: Arc<dyn LabelResolver> = match &config.labels_path {
        Some(path) => match load_labels(path) {
            Ok(labels) => Arc::new(labels),
            Err(e) => {
                warn!("Failed to load display names from {:?}: {}", path, e);
                Arc::new(StaticLabels::default())
            }
        },
        None => Arc::new(StaticLabels::default()),
    };

    let collaborators = Collaborators {
        activity: Arc::new(SpoolActivitySource::new(&config.activity_spool_path)),
        home: Arc::new(FileHomeResolver::new(&config.home_handlers_path)),
        labels,
        device: Arc::new(CommandCaptureDevice::new(&config.capture, &config.data_dir)),
        clock: Arc::new(SystemClock),
    };

    let service = LockService::new(
        Arc::clone(&store),
        collaborators,
        ServiceSettings::from_config(&config),
    )
    .await?;

    // Mirror challenge events into the log; the PIN screen follows them over IPC
    let challenge_log = {
        let mut challenges = service.subscribe_challenges();
        tokio::spawn(async move {
            loop {
                match challenges.recv().await {
                    Ok(ChallengeEvent::Show { target, remaining }) => {
                        info!("Challenge shown for {} ({} attempts)", target, remaining)
                    }
                    Ok(event) => info!("Challenge event: {:?}", event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Challenge log skipped {} events", n)
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    };

    // Start IPC server
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ipc_server = IpcServer::new(config.ipc_socket_path.clone(), Arc::clone(&service));
    let mut ipc_handle = tokio::spawn(async move {
        if let Err(e) = ipc_server.run(shutdown_rx).await {
            error!("IPC server error: {}", e);
        }
    });

    service.start_monitoring().await;

    info!("Daemon started successfully");

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = &mut ipc_handle => {
            error!("IPC server exited unexpectedly");
        }
    }

    info!("Daemon shutting down");

    let _ = shutdown_tx.send(true);
    service.shutdown().await;
    challenge_log.abort();
    if !ipc_handle.is_finished() {
        let _ = ipc_handle.await;
    }

    Ok(())
}
