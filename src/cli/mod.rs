//! CLI entry point for ClawPilot.

pub mod pairing;
pub mod watch;

use clap::{Parser, Subcommand};

/// ClawPilot operator CLI
#[derive(Parser, Debug)]
#[command(name = "clawpilot", version, about = "Pair with an agent gateway and supervise its runs")]
pub struct Cli {
    /// Gateway URL (overrides CLAWPILOT_GATEWAY_URL)
    #[arg(long, global = true)]
    pub gateway: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pair this device with the gateway
    Pair(PairArgs),
    /// Show pairing status
    Status,
    /// Forget the stored device token
    Unpair,
    /// Follow runs and approve or reject risky tool calls
    Watch(WatchArgs),
    /// List the skills advertised by the gateway
    #[cfg(feature = "skills")]
    Skills,
}

/// Arguments for `clawpilot pair`.
#[derive(Parser, Debug)]
pub struct PairArgs {
    /// Give up after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

/// Arguments for `clawpilot watch`.
#[derive(Parser, Debug)]
pub struct WatchArgs {
    /// Thread to open the run on
    #[arg(long)]
    pub thread: Option<String>,

    /// Drop events for runs that were never started
    #[arg(long)]
    pub strict: bool,

    /// Reconnect attempts if the event stream drops
    #[arg(long)]
    pub reconnects: Option<usize>,

    /// Start a REST run and poll its status instead of streaming events
    #[arg(long)]
    pub poll: bool,

    /// Message sent to open the run (defaults to a heartbeat)
    pub prompt: Option<String>,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
