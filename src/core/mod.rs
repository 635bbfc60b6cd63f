pub mod batch;
pub mod chemistry;
pub mod config;
pub mod environment;
pub mod error;
pub mod experiment;
pub mod meltsfile;
pub mod naming;
pub mod process;
pub mod types;
pub mod workspace;

pub use batch::{expand, BatchIndex, BatchReport, BatchScheduler, RunOptions};
pub use config::Configuration;
pub use environment::Environment;
pub use error::AppError;
pub use experiment::{JobOutcome, JobRunner};
pub use process::{InteractiveProcess, ProcessConfig, ProcessError, ProcessState};
pub use types::*;
pub use workspace::JobWorkspace;
