//! ClawPilot CLI binary entry point.

use clap::Parser;
use clawpilot::cli::{pairing, watch, Cli, Commands};
use clawpilot::config::ClawPilotConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();

    let cli = Cli::parse();
    let mut config = ClawPilotConfig::from_env();
    if let Some(gateway) = cli.gateway {
        config.gateway_url = gateway;
    }

    let result = match cli.command {
        Commands::Pair(args) => pairing::handle_pair(config, args.timeout).await,
        Commands::Status => pairing::handle_status(config).await,
        Commands::Unpair => pairing::handle_unpair(config).await,
        Commands::Watch(args) => watch::handle_watch(config, args).await,
        #[cfg(feature = "skills")]
        Commands::Skills => watch::handle_skills(config).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
