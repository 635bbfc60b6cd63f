#![allow(clippy::result_large_err)]

//! One job: workspace, interactive session, fixed menu sequence, teardown.

use crate::core::environment::Environment;
use crate::core::error::AppError;
use crate::core::meltsfile::MELTSFILE_EXTENSION;
use crate::core::process::{InteractiveProcess, ProcessConfig, ProcessError};
use crate::core::workspace::JobWorkspace;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, Dispatch};

/// Menu selection that runs the loaded input file.
const EXECUTE: &str = "4";
/// Menu selection that asks for the liquidus-finding flag.
const SET_LIQUIDUS: &str = "3";

/// How a job's process phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// The session deadline passed and the run was cut short.
    TimedOut,
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Completed => write!(f, "completed"),
            JobOutcome::TimedOut => write!(f, "timed out"),
        }
    }
}

/// The command lines sent after the initial arguments.
pub fn command_sequence(superliquidus_start: bool) -> [&'static str; 3] {
    [SET_LIQUIDUS, if superliquidus_start { "1" } else { "0" }, EXECUTE]
}

/// Runs single jobs inside a batch root.
#[derive(Debug, Clone)]
pub struct JobRunner {
    root: PathBuf,
    process: ProcessConfig,
    dispatch: Dispatch,
    input_extension: String,
}

impl JobRunner {
    pub fn new<P: Into<PathBuf>>(root: P, process: ProcessConfig, dispatch: Dispatch) -> Self {
        Self {
            root: root.into(),
            process,
            dispatch,
            input_extension: MELTSFILE_EXTENSION.to_string(),
        }
    }

    /// Extension, without the dot, of the input files this runner writes.
    pub fn with_input_extension(mut self, extension: &str) -> Self {
        self.input_extension = extension.to_string();
        self
    }

    pub fn input_extension(&self) -> &str {
        &self.input_extension
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn process_config(&self) -> &ProcessConfig {
        &self.process
    }

    /// Write the job's inputs into `<root>/<hash>/`, drive the tool through
    /// the command sequence and always terminate the session before
    /// returning.
    pub async fn run(
        &self,
        hash: &str,
        title: &str,
        input_text: &str,
        environment: &Environment,
        superliquidus_start: bool,
    ) -> Result<JobOutcome, AppError> {
        let workspace = JobWorkspace::create_with_extension(
            hash,
            title,
            input_text,
            &self.root,
            &environment.to_envfile(),
            &self.input_extension,
        )?;

        let mut process =
            InteractiveProcess::new(self.process.clone(), workspace.root(), self.dispatch.clone())
                .meltsfile(workspace.input_file())
                .environment_file(workspace.environment_file());

        let result = drive(&mut process, superliquidus_start).await;
        process.terminate().await;

        if let Err(err) = result {
            let stderr = process.read_errors();
            if !stderr.trim().is_empty() {
                debug!("stderr of {}:\n{}", hash, stderr.trim_end());
            }
            return Err(AppError::from(err).with_context(process.callstring()));
        }
        if process.timed_out() {
            Ok(JobOutcome::TimedOut)
        } else {
            Ok(JobOutcome::Completed)
        }
    }
}

async fn drive(process: &mut InteractiveProcess, superliquidus_start: bool) -> Result<(), ProcessError> {
    process.start().await?;
    process
        .write(command_sequence(superliquidus_start), true, false)
        .await
}
