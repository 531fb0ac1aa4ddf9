//! Apply command - reconcile the host with a desired state.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use nlstate::lab::SimulatedHost;
use nlstate::{ApplyOptions, NetState};

use crate::host;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct ApplyArgs {
    /// Desired state document (YAML or JSON, `-` for stdin)
    pub desired: String,

    /// Skip verification (and with it, automatic rollback)
    #[arg(long)]
    pub no_verify: bool,

    /// Program the kernel directly; DHCP and autoconf are rejected
    #[arg(long)]
    pub kernel: bool,

    /// Verification window in seconds, overriding the per-family defaults
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Print the resulting state
    #[arg(long)]
    pub show: bool,
}

pub async fn run(engine: &NetState<SimulatedHost>, args: ApplyArgs, format: OutputFormat) -> Result<()> {
    let desired = host::read_document(&args.desired)?;

    let mut options = ApplyOptions::default();
    if args.no_verify {
        options = options.no_verify();
    }
    if args.kernel {
        options = options.kernel_only();
    }
    if let Some(secs) = args.timeout {
        options = options.timeout(Duration::from_secs(secs));
    }

    let before = engine.backend().apply_count();
    let state = engine
        .apply_with_options(&desired, options)
        .await
        .with_context(|| format!("failed to apply {}", args.desired))?;

    // The plan the host executed, computed under the transaction lock.
    let executed = engine
        .backend()
        .applied_plans()
        .into_iter()
        .nth(before)
        .unwrap_or_default();
    eprintln!("{}", executed.summary());
    if args.show {
        output::print(&state, format)?;
    }
    Ok(())
}
