pub mod args;
pub mod commands;

pub use args::{HashArgs, PlanArgs, RunArgs};
use crate::core::config::loader::BatchFileLoader;
use clap::{Parser, Subcommand};

const HELP_TEMPLATE: &str = "\
{name} {version}\n\
{about-with-newline}\n\
USAGE:\n    {usage}\n\
\nOPTIONS:\n{options}\n\
BATCH COMMANDS:\n{subcommands}\n";

#[derive(Parser)]
#[command(name = "meltsbatch")]
#[command(version = crate::VERSION)]
#[command(about = "Batch automation for interactive MELTS simulation runs")]
#[command(help_template = HELP_TEMPLATE)]
#[command(
    after_long_help = "Typical flow: plan a batch to inspect its jobs, then run it. Re-running skips jobs that already have a directory."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

const RUN_EXAMPLE: &str = "Example:\n    meltsbatch run batch.toml --timeout 120 --exclude P2O5";

/// Example plus the environment variables that override batch file values.
fn run_long_help() -> String {
    let mut text = format!("{}\n\nEnvironment variables:\n", RUN_EXAMPLE);
    for line in BatchFileLoader::env_var_documentation() {
        text.push_str("    ");
        text.push_str(line);
        text.push('\n');
    }
    text
}

#[derive(Subcommand)]
pub enum Command {
    #[command(
        about = "Expand and run a batch",
        long_about = "Run expands the batch file into unique jobs, writes the job index to the batch root and drives the simulation executable once per pending job.",
        after_help = RUN_EXAMPLE,
        after_long_help = run_long_help()
    )]
    Run(RunArgs),
    #[command(
        about = "Expand a batch and write its index without running",
        long_about = "Plan prints the hash and name of every job along with the estimated calculation time.",
        after_help = "Example:\n    meltsbatch plan batch.toml"
    )]
    Plan(PlanArgs),
    #[command(
        about = "Print the hash and job name of one configuration",
        long_about = "Hash reads a JSON configuration object and prints the identity a batch would give it.",
        after_help = "Example:\n    meltsbatch hash config.json --length 12"
    )]
    Hash(HashArgs),
}

pub async fn run(args: Args) -> crate::Result<()> {
    match args.command {
        Command::Run(run_args) => commands::run(run_args).await,
        Command::Plan(plan_args) => commands::plan(plan_args).await,
        Command::Hash(hash_args) => commands::hash(hash_args).await,
    }
}
