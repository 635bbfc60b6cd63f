#![allow(clippy::result_large_err)]

use crate::core::error::AppError;
use crate::core::naming::HashSettings;
use crate::core::process::ProcessConfig;
use crate::core::types::ErrorCategory;
use crate::logging::config::LoggingSection;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_EXECUTABLE: &str = "MELTSBATCH_EXECUTABLE";
pub const ENV_TIMEOUT_SECONDS: &str = "MELTSBATCH_TIMEOUT_SECONDS";

const DEFAULT_TIMEOUT_SECONDS: u64 = 60;

/// A batch definition as written in a TOML batch file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchFile {
    /// Batch root; relative paths resolve against the batch file's directory.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub executable: PathBuf,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_superliquidus_start")]
    pub superliquidus_start: bool,
    /// Components left out of every rendered input file.
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub hash: HashSettings,
    #[serde(default)]
    pub process: ProcessSettings,
    #[serde(default)]
    pub default: Map<String, Value>,
    #[serde(default)]
    pub grid: IndexMap<String, Vec<Value>>,
    #[serde(default)]
    pub compositions: Vec<Map<String, Value>>,
    #[serde(default)]
    pub environment: Map<String, Value>,
    #[serde(default)]
    pub logging: Option<LoggingSection>,
}

/// Tuning for the interactive process controller (`[process]`).
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProcessSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
    /// Descendants whose command name contains this are killed on teardown.
    #[serde(default = "default_descendant_pattern")]
    pub descendant_pattern: Option<String>,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_superliquidus_start() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_settle_ms() -> u64 {
    500
}

fn default_grace_ms() -> u64 {
    500
}

fn default_descendant_pattern() -> Option<String> {
    Some("alpha".to_string())
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            settle_ms: default_settle_ms(),
            grace_ms: default_grace_ms(),
            descendant_pattern: default_descendant_pattern(),
        }
    }
}

impl BatchFile {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn process_config(&self) -> ProcessConfig {
        ProcessConfig {
            executable: self.executable.clone(),
            timeout: self.timeout(),
            poll_interval: Duration::from_millis(self.process.poll_interval_ms),
            settle_delay: Duration::from_millis(self.process.settle_ms),
            grace_period: Duration::from_millis(self.process.grace_ms),
            descendant_pattern: self.process.descendant_pattern.clone(),
        }
    }
}

pub struct BatchFileLoader;

impl BatchFileLoader {
    /// Load, resolve, override and validate a batch file.
    pub fn load(path: &Path) -> Result<BatchFile, AppError> {
        Self::load_with_overrides(path, |_| {})
    }

    /// Like [`BatchFileLoader::load`], with `overrides` applied after the
    /// environment and before validation.
    pub fn load_with_overrides<F>(path: &Path, overrides: F) -> Result<BatchFile, AppError>
    where
        F: FnOnce(&mut BatchFile),
    {
        let mut batch = Self::load_from_file(path)?.ok_or_else(|| {
            AppError::new(
                ErrorCategory::IoError,
                format!("Batch file {} does not exist", path.display()),
            )
            .with_suggestion("Pass the path to an existing batch TOML file")
        })?;

        let base_dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Self::resolve_paths(&mut batch, base_dir);
        Self::apply_env_overrides(&mut batch);
        overrides(&mut batch);
        Self::validate(&batch)?;
        Ok(batch)
    }

    /// Parse a batch file as-is. Returns Ok(None) if the file doesn't exist.
    pub fn load_from_file(path: &Path) -> Result<Option<BatchFile>, AppError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::new(
                ErrorCategory::IoError,
                format!("Failed to read batch file {}: {}", path.display(), e),
            )
        })?;

        let batch: BatchFile = toml::from_str(&content).map_err(|e| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("Failed to parse batch file {}: {}", path.display(), e),
            )
        })?;

        Ok(Some(batch))
    }

    fn resolve_paths(batch: &mut BatchFile, base_dir: &Path) {
        if batch.root.is_relative() {
            batch.root = base_dir.join(&batch.root);
        }
        // Bare command names stay as given.
        if batch.executable.is_relative() && batch.executable.components().count() > 1 {
            batch.executable = base_dir.join(&batch.executable);
        }
    }

    /// Environment variables take precedence over batch file values.
    pub fn apply_env_overrides(batch: &mut BatchFile) {
        if let Ok(executable) = env::var(ENV_EXECUTABLE) {
            if !executable.trim().is_empty() {
                batch.executable = PathBuf::from(executable);
            }
        }

        if let Ok(timeout) = env::var(ENV_TIMEOUT_SECONDS) {
            if let Ok(timeout) = timeout.trim().parse::<u64>() {
                batch.timeout_seconds = timeout;
            }
        }
    }

    pub fn env_var_documentation() -> &'static [&'static str] {
        &[
            "MELTSBATCH_EXECUTABLE - Override the simulation executable path",
            "MELTSBATCH_TIMEOUT_SECONDS - Override the per-job timeout in seconds (default: 60)",
            "MELTSBATCH_LOG_LEVEL - Override the console log level (default: info)",
            "MELTSBATCH_CONSOLE_OUTPUT - Console log sink: stdout, stderr or none (default: stderr)",
        ]
    }

    pub fn validate(batch: &BatchFile) -> Result<(), AppError> {
        if batch.executable.as_os_str().is_empty() {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                "Executable path cannot be empty".to_string(),
            )
            .with_suggestion(format!(
                "Set `executable` in the batch file or export {}",
                ENV_EXECUTABLE
            )));
        }

        if batch.timeout_seconds == 0 {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                "Timeout must be greater than zero seconds".to_string(),
            ));
        }

        if batch.process.poll_interval_ms == 0 {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                "process.poll_interval_ms must be greater than zero".to_string(),
            ));
        }

        batch.hash.validate()?;

        if let Some((name, _)) = batch.grid.iter().find(|(_, values)| values.is_empty()) {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!("Grid parameter '{}' has no candidate values", name),
            ));
        }

        Ok(())
    }
}
