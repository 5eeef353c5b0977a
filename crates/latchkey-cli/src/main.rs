//! Latchkey CLI - command-line control for the Latchkey daemon

use clap::Parser;
use tracing_subscriber::EnvFilter;

use latchkey_cli::{run, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("latchkey_cli=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    run(cli).await?;
    Ok(())
}
