use clap::Parser;
use meltsbatch::cli::{self, Args};

#[tokio::main]
async fn main() -> meltsbatch::Result<()> {
    let args = Args::parse();
    cli::run(args).await
}
