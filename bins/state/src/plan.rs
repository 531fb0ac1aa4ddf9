//! Plan command - preview the operations a desired state needs.

use anyhow::Result;
use clap::Args;
use nlstate::NetState;
use nlstate::lab::SimulatedHost;

use crate::host;

#[derive(Args)]
pub struct PlanArgs {
    /// Desired state document (YAML or JSON, `-` for stdin)
    pub desired: String,
}

pub async fn run(engine: &NetState<SimulatedHost>, args: PlanArgs) -> Result<()> {
    let desired = host::read_document(&args.desired)?;
    let plan = engine.plan(&desired).await?;
    println!("{}", plan.summary());
    Ok(())
}
