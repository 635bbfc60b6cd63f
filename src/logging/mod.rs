pub mod config;
pub mod layers;

pub use layers::console::ConsoleOutput;

use crate::logging::config::LoggingConfig;
use crate::logging::layers::{console, file};
use crate::Result;
use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::dispatcher::{self, DefaultGuard};
use tracing::Dispatch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::Registry;

/// Explicit logging handle owned by whoever runs a batch.
///
/// Nothing here installs a process-wide subscriber. Work that should log
/// through this context is scoped to [`LogContext::dispatch`] (for futures,
/// via `tracing::instrument::WithSubscriber`). Dropping the context flushes
/// and closes the file sink.
pub struct LogContext {
    dispatch: Dispatch,
    _file_guard: Option<WorkerGuard>,
    console_output: ConsoleOutput,
    log_file_path: Option<PathBuf>,
}

impl std::fmt::Debug for LogContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogContext")
            .field("console_output", &self.console_output)
            .field("log_file_path", &self.log_file_path)
            .finish()
    }
}

impl LogContext {
    /// Console plus `<batch_root>/autolog.log` (or the configured file).
    pub fn for_batch(batch_root: &Path, config: &LoggingConfig) -> Result<Self> {
        let log_file = config
            .enable_file
            .then(|| file::log_file_path(config, batch_root));
        Self::build(config, log_file)
    }

    /// Discards every event.
    pub fn disabled() -> Self {
        Self {
            dispatch: Dispatch::none(),
            _file_guard: None,
            console_output: ConsoleOutput::None,
            log_file_path: None,
        }
    }

    fn build(config: &LoggingConfig, log_file: Option<PathBuf>) -> Result<Self> {
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.default_level))
            .context("failed to configure tracing level")?;

        let (file_layer, file_guard) = match &log_file {
            Some(path) => {
                let (layer, guard) = file::file_layer::<Registry>(path)?;
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        let subscriber = tracing_subscriber::registry().with(file_layer);
        let subscriber = subscriber.with(console::console_layer(config.console_output, env_filter));

        Ok(Self {
            dispatch: Dispatch::new(subscriber),
            _file_guard: file_guard,
            console_output: config.console_output,
            log_file_path: log_file,
        })
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Route events on the current thread through this context until the guard drops.
    pub fn enter(&self) -> DefaultGuard {
        dispatcher::set_default(&self.dispatch)
    }

    pub fn console_output(&self) -> ConsoleOutput {
        self.console_output
    }

    pub fn log_file_path(&self) -> Option<&Path> {
        self.log_file_path.as_deref()
    }
}
