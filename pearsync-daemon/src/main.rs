//! pearsyncd entry point

use clap::Parser;
use pearsync_daemon::Daemon;
use pearsync_model::AppPaths;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pearsyncd", version, about = "pearsync daemon")]
struct Args {
    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    tracing::info!("pearsyncd v{} starting...", env!("CARGO_PKG_VERSION"));

    let daemon = Arc::new(Daemon::new(AppPaths::from_env()));
    pearsync_daemon::server::run(daemon).await.map_err(|e| {
        tracing::error!("daemon failed: {}", e);
        anyhow::anyhow!("{}", e)
    })?;

    Ok(())
}

fn init_tracing(verbosity: u8) {
    let mut filter = EnvFilter::from_default_env();

    // Only apply defaults if RUST_LOG is not set
    if std::env::var("RUST_LOG").is_err() {
        let level = match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        filter = filter.add_directive(level.parse().unwrap());
    }

    // Always silence noisy transport crates
    const SILENCE: &[&str] = &[
        "iroh::magicsock=error",
        "iroh_net::magicsock=error",
        "swarm_discovery=error",
    ];
    for directive in SILENCE {
        filter = filter.add_directive(directive.parse().unwrap());
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
