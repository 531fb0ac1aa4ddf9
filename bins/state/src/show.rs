//! Show command - print the current network state.

use anyhow::Result;
use clap::Args;
use nlstate::NetState;
use nlstate::lab::SimulatedHost;

use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct ShowArgs {
    /// Show the persistent configuration only (no leases, learned routes or DNS)
    #[arg(short, long)]
    pub running_config: bool,
}

pub async fn run(engine: &NetState<SimulatedHost>, args: ShowArgs, format: OutputFormat) -> Result<()> {
    let state = if args.running_config {
        engine.show_running_config().await?
    } else {
        engine.show().await?
    };
    output::print(&state, format)
}
