use clap::Parser;
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use vm_clone_manager::cli::{self, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting VM clone manager v{}", env!("CARGO_PKG_VERSION"));
    cli::run(args).await
}
