use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct RunArgs {
    /// Batch definition (TOML)
    #[arg(value_name = "BATCH_FILE")]
    pub batch_file: PathBuf,

    /// Re-run jobs whose output directory already exists
    #[arg(long)]
    pub overwrite: bool,

    /// Per-job timeout in seconds (overrides the batch file and environment)
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Simulation executable (overrides the batch file and environment)
    #[arg(long, value_name = "PATH")]
    pub executable: Option<PathBuf>,

    /// Component to leave out of every input file; may be repeated
    #[arg(long, value_name = "COMPONENT")]
    pub exclude: Vec<String>,
}

#[derive(Args)]
pub struct PlanArgs {
    /// Batch definition (TOML)
    #[arg(value_name = "BATCH_FILE")]
    pub batch_file: PathBuf,
}

#[derive(Args)]
pub struct HashArgs {
    /// JSON file holding a single configuration object
    #[arg(value_name = "CONFIG_JSON")]
    pub config: PathBuf,

    /// Hex characters kept from the digest (0 keeps all)
    #[arg(long, default_value = "10")]
    pub length: usize,

    /// Digest algorithm: sha1 or sha256
    #[arg(long, default_value = "sha1")]
    pub algorithm: String,
}
