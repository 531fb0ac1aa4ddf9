//! nlstatectl - Declarative network state utility
//!
//! Shows, plans and applies network state documents against a simulated
//! host whose configuration is kept in a YAML file.

mod apply;
mod host;
mod output;
mod plan;
mod show;

use clap::{Parser, Subcommand};

use crate::host::HostArgs;
use crate::output::OutputFormat;

#[derive(Parser)]
#[command(name = "nlstatectl")]
#[command(about = "Declarative network state utility", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    host: HostArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value = "yaml", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the current network state
    Show(show::ShowArgs),

    /// Show the changes a desired state would make
    Plan(plan::PlanArgs),

    /// Apply a desired state, verify it and roll back on failure
    Apply(apply::ApplyArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let engine = cli.host.engine()?;

    match cli.command {
        Command::Show(args) => show::run(&engine, args, cli.format).await,
        Command::Plan(args) => plan::run(&engine, args).await,
        Command::Apply(args) => {
            apply::run(&engine, args, cli.format).await?;
            cli.host.save(engine.backend())
        }
    }
}
