//! CLI command implementations

use std::io::{BufRead, Write};
use std::path::PathBuf;

use chrono::{DateTime, Local};
use clap::{Parser, Subcommand, ValueEnum};
use zeroize::Zeroizing;

use latchkey_core::{AuthOutcome, CaptureRecord};
use latchkey_daemon::ipc::IpcResponse;
use latchkey_daemon::{ChallengeEvent, DismissReason};

use crate::client::{ClientError, LatchkeyClient};

/// Latchkey CLI - control the foreground lock daemon
#[derive(Parser)]
#[command(name = "latchkey")]
#[command(about = "PIN-gated app locking with intruder captures")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to daemon socket (defaults to the configured socket)
    #[arg(long)]
    pub socket: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show daemon status
    Status,

    /// Start or stop foreground monitoring
    Monitor {
        #[arg(value_enum)]
        action: MonitorAction,
    },

    /// PIN management
    #[command(subcommand)]
    Pin(PinCommands),

    /// Add an application to the lock set
    Lock { identity: String },

    /// Remove an application from the lock set
    Unlock { identity: String },

    /// List locked applications
    Locked,

    /// Challenge an application now
    Challenge { identity: String },

    /// Turn locking on
    Enable,

    /// Turn locking off
    Disable,

    /// Set the background timeout in milliseconds
    Timeout { ms: u64 },

    /// Configure intruder captures
    Intruder {
        #[arg(value_enum)]
        state: Toggle,

        /// Wrong attempts before each capture
        #[arg(long)]
        threshold: Option<u32>,
    },

    /// Intruder capture records
    #[command(subcommand)]
    Records(RecordCommands),

    /// Deliver a host-shell signal
    Signal {
        #[arg(value_enum)]
        signal: Signal,
    },

    /// Follow daemon events until interrupted
    Watch {
        #[arg(value_enum, default_value = "challenges")]
        stream: WatchStream,

        /// Print each event as a JSON line
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum MonitorAction {
    Start,
    Stop,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Signal {
    Foreground,
    Background,
    Wake,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum WatchStream {
    /// Show, retry, dismiss and setup events for the PIN screen
    Challenges,
    /// Foreground changes seen by the monitor
    Changes,
}

#[derive(Subcommand)]
pub enum PinCommands {
    /// Set the PIN when none is configured
    Set,
    /// Answer the active challenge
    Submit,
    /// Clear the PIN from the active challenge
    Forgot,
}

#[derive(Subcommand)]
pub enum RecordCommands {
    /// List records, newest first
    List {
        /// Only records for this application
        #[arg(long)]
        app: Option<String>,

        /// Earliest capture time (epoch milliseconds)
        #[arg(long)]
        since: Option<u64>,

        /// Latest capture time (epoch milliseconds)
        #[arg(long)]
        until: Option<u64>,
    },
    /// Delete one record and its image
    Delete { id: u64 },
    /// Delete every record and image
    Clear,
    /// Show the record count
    Count,
}

/// Run the CLI
pub async fn run(cli: Cli) -> Result<(), ClientError> {
    let client = match cli.socket {
        Some(path) => LatchkeyClient::with_socket_path(path),
        None => LatchkeyClient::new(),
    };

    match cli.command {
        Commands::Status => {
            let version = match client.ping().await {
                Ok(version) => version,
                Err(ClientError::DaemonNotRunning) => {
                    println!("Latchkey daemon is not running");
                    println!("Start it with: latchkey-daemon");
                    return Err(ClientError::DaemonNotRunning);
                }
                Err(e) => return Err(e),
            };
            let status = client.status().await?;

            println!("Latchkey daemon v{} is running", version);
            println!("  Monitoring: {}", yes_no(status.monitoring));
            println!("  Locking: {}", if status.lock_enabled { "enabled" } else { "disabled" });
            println!("  PIN set: {}", yes_no(status.pin_set));
            println!("  Locked apps: {}", status.locked_count);
            println!("  Background timeout: {}", timeout_label(status.background_timeout_ms));
            println!("  Capture records: {}", status.record_count);
            if let Some(identity) = status.last_identity {
                println!("  Foreground: {} ({})", identity.display_name, identity.id);
            }
            if let Some(session) = status.session {
                println!(
                    "  Challenge: {} ({} attempts, {} remaining)",
                    session.target.display_name, session.attempt_count, session.remaining
                );
            }
        }

        Commands::Monitor { action } => match action {
            MonitorAction::Start => {
                if client.start_monitoring().await? {
                    println!("Monitoring started");
                } else {
                    println!("Monitoring already running");
                }
            }
            MonitorAction::Stop => {
                if client.stop_monitoring().await? {
                    println!("Monitoring stopped");
                } else {
                    println!("Monitoring was not running");
                }
            }
        },

        Commands::Pin(cmd) => handle_pin_command(&client, cmd).await?,

        Commands::Lock { identity } => {
            if client.lock(&identity).await? {
                println!("Locked {}", identity);
            } else {
                println!("{} is already locked", identity);
            }
        }

        Commands::Unlock { identity } => {
            if client.unlock(&identity).await? {
                println!("Unlocked {}", identity);
            } else {
                println!("{} was not locked", identity);
            }
        }

        Commands::Locked => {
            let identities = client.locked().await?;
            if identities.is_empty() {
                println!("No locked apps");
            }
            for identity in identities {
                println!("{}", identity);
            }
        }

        Commands::Challenge { identity } => {
            if client.request_challenge(&identity).await? {
                println!("Challenge shown for {}", identity);
            } else {
                println!("No challenge for {}", identity);
            }
        }

        Commands::Enable => {
            client.set_lock_enabled(true).await?;
            println!("Locking enabled");
        }

        Commands::Disable => {
            client.set_lock_enabled(false).await?;
            println!("Locking disabled");
        }

        Commands::Timeout { ms } => {
            client.set_background_timeout(ms).await?;
            println!("Background timeout: {}", timeout_label(ms));
        }

        Commands::Intruder { state, threshold } => {
            let enabled = matches!(state, Toggle::On);
            let threshold = match threshold {
                Some(threshold) => threshold,
                None => client.intruder_detection().await?.attempt_threshold,
            };
            client.set_intruder_detection(enabled, threshold).await?;
            if enabled {
                println!("Intruder captures on, after {} wrong attempts", threshold);
            } else {
                println!("Intruder captures off");
            }
        }

        Commands::Records(cmd) => handle_record_command(&client, cmd).await?,

        Commands::Signal { signal } => match signal {
            Signal::Foreground => {
                client.signal_foreground().await?;
                println!("Foreground signal delivered");
            }
            Signal::Background => {
                client.signal_background().await?;
                println!("Background signal delivered");
            }
            Signal::Wake => {
                if client.signal_wake().await? {
                    println!("Wake signal delivered, monitoring started");
                } else {
                    println!("Wake signal delivered");
                }
            }
        },

        Commands::Watch { stream, json } => {
            let mut events = match stream {
                WatchStream::Challenges => client.watch_challenges().await?,
                WatchStream::Changes => client.watch_changes().await?,
            };
            while let Some(event) = events.next_event().await? {
                if json {
                    println!("{}", serde_json::to_string(&event)?);
                } else {
                    println!("{}", format_event(&event));
                }
            }
            eprintln!("Daemon closed the event stream");
        }
    }

    Ok(())
}

async fn handle_pin_command(client: &LatchkeyClient, cmd: PinCommands) -> Result<(), ClientError> {
    match cmd {
        PinCommands::Set => {
            let pin = read_pin("New PIN: ")?;
            let confirm = read_pin("Confirm PIN: ")?;
            client.set_pin(pin, confirm).await?;
            println!("✓ PIN set");
        }

        PinCommands::Submit => {
            let pin = read_pin("PIN: ")?;
            match client.submit_pin(pin).await? {
                AuthOutcome::Success => println!("✓ Unlocked"),
                AuthOutcome::Retry { remaining, .. } => {
                    println!("Incorrect PIN, {} attempts remaining", remaining)
                }
                AuthOutcome::LockedOut { attempt_count } => {
                    println!("Locked out after {} attempts", attempt_count)
                }
                AuthOutcome::Rejected => println!("Challenge already resolved"),
                AuthOutcome::NoActiveChallenge => println!("No active challenge"),
            }
        }

        PinCommands::Forgot => {
            client.forgot_pin().await?;
            println!("PIN cleared; set a new one with: latchkey pin set");
        }
    }

    Ok(())
}

async fn handle_record_command(
    client: &LatchkeyClient,
    cmd: RecordCommands,
) -> Result<(), ClientError> {
    match cmd {
        RecordCommands::List { app, since, until } => {
            let records = client.list_records(app, since, until).await?;
            if records.is_empty() {
                println!("No capture records");
            }
            for record in &records {
                println!("{}", format_record(record));
            }
        }

        RecordCommands::Delete { id } => {
            if client.delete_record(id).await? {
                println!("Deleted record {}", id);
            } else {
                println!("No record {}", id);
            }
        }

        RecordCommands::Clear => {
            let count = client.clear_records().await?;
            println!("Deleted {} records", count);
        }

        RecordCommands::Count => {
            println!("{}", client.count_records().await?);
        }
    }

    Ok(())
}

/// Read one PIN line from stdin
fn read_pin(prompt: &str) -> Result<Zeroizing<String>, ClientError> {
    let mut stderr = std::io::stderr();
    write!(stderr, "{}", prompt)?;
    stderr.flush()?;

    let mut line = Zeroizing::new(String::new());
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(Zeroizing::new(line.trim().to_string()))
}

fn format_record(record: &CaptureRecord) -> String {
    format!(
        "{:>14}  {}  {} ({})  attempts={}  {}",
        record.id,
        format_timestamp(record.timestamp),
        record.subject.display_name,
        record.subject.id,
        record.attempt_count,
        record.image_path.as_deref().unwrap_or("-")
    )
}

fn format_event(event: &IpcResponse) -> String {
    match event {
        IpcResponse::Change { change } => format!(
            "foreground  {} ({}){}",
            change.identity.display_name,
            change.identity.id,
            if change.forced { " [re-check]" } else { "" }
        ),
        IpcResponse::Challenge { challenge } => match challenge {
            ChallengeEvent::Show { target, remaining } => format!(
                "show        {} ({}), {} attempts remaining",
                target.display_name, target.id, remaining
            ),
            ChallengeEvent::Retry { remaining } => {
                format!("retry       {} attempts remaining", remaining)
            }
            ChallengeEvent::Dismiss { reason } => format!(
                "dismiss     {}",
                match reason {
                    DismissReason::Unlocked => "unlocked",
                    DismissReason::LockedOut => "locked out",
                    DismissReason::HomeSurface => "home screen",
                    DismissReason::Disabled => "locking disabled",
                }
            ),
            ChallengeEvent::SetupRequired => "setup       no PIN configured".to_string(),
        },
        IpcResponse::Lagged { missed } => format!("lagged      {} events dropped", missed),
        other => format!("{:?}", other),
    }
}

fn format_timestamp(ms: u64) -> String {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map(|dt| dt.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn timeout_label(ms: u64) -> String {
    if ms % 1_000 == 0 {
        format!("{} s", ms / 1_000)
    } else {
        format!("{} ms", ms)
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latchkey_core::Identity;

    #[test]
    fn test_parse_intruder_command() {
        let cli = Cli::try_parse_from(["latchkey", "intruder", "on", "--threshold", "2"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Intruder {
                state: Toggle::On,
                threshold: Some(2)
            }
        ));
    }

    #[test]
    fn test_parse_records_filter() {
        let cli = Cli::try_parse_from([
            "latchkey",
            "--socket",
            "/tmp/x.sock",
            "records",
            "list",
            "--app",
            "com.example.mail",
        ])
        .unwrap();
        assert_eq!(cli.socket, Some(PathBuf::from("/tmp/x.sock")));
        match cli.command {
            Commands::Records(RecordCommands::List { app, since, until }) => {
                assert_eq!(app.as_deref(), Some("com.example.mail"));
                assert!(since.is_none() && until.is_none());
            }
            _ => panic!("expected records list"),
        }
    }

    #[test]
    fn test_rejects_unknown_signal() {
        assert!(Cli::try_parse_from(["latchkey", "signal", "reboot"]).is_err());
    }

    #[test]
    fn test_format_record_without_image() {
        let record = CaptureRecord {
            id: 42,
            image_path: None,
            subject: Identity::new("com.example.mail", "Mail"),
            timestamp: 0,
            attempt_count: 3,
        };
        let line = format_record(&record);
        assert!(line.contains("Mail (com.example.mail)"));
        assert!(line.contains("attempts=3"));
        assert!(line.ends_with('-'));
    }

    #[test]
    fn test_parse_watch_defaults_to_challenges() {
        let cli = Cli::try_parse_from(["latchkey", "watch"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Watch {
                stream: WatchStream::Challenges,
                json: false
            }
        ));
        assert!(Cli::try_parse_from(["latchkey", "watch", "changes", "--json"]).is_ok());
    }

    #[test]
    fn test_no_pin_change_command() {
        assert!(Cli::try_parse_from(["latchkey", "pin", "change"]).is_err());
    }

    #[test]
    fn test_format_challenge_events() {
        let show = IpcResponse::Challenge {
            challenge: ChallengeEvent::Show {
                target: Identity::new("com.example.mail", "Mail"),
                remaining: 2,
            },
        };
        assert_eq!(
            format_event(&show),
            "show        Mail (com.example.mail), 2 attempts remaining"
        );

        let dismiss = IpcResponse::Challenge {
            challenge: ChallengeEvent::Dismiss {
                reason: DismissReason::HomeSurface,
            },
        };
        assert_eq!(format_event(&dismiss), "dismiss     home screen");
    }

    #[test]
    fn test_timeout_label() {
        assert_eq!(timeout_label(30_000), "30 s");
        assert_eq!(timeout_label(1500), "1500 ms");
    }
}
