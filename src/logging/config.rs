use crate::logging::layers::console::ConsoleOutput;
use crate::Result;
use anyhow::anyhow;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::filter::Directive;

const DEFAULT_LEVEL: &str = "info";
pub const DEFAULT_LOG_FILE: &str = "autolog.log";

pub const ENV_LOG_LEVEL: &str = "MELTSBATCH_LOG_LEVEL";
pub const ENV_CONSOLE_OUTPUT: &str = "MELTSBATCH_CONSOLE_OUTPUT";

/// Resolved logging configuration after reading the batch file and env overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Directory for the file sink; relative paths resolve against the batch root.
    pub log_dir: Option<PathBuf>,
    pub file_name: String,
    pub default_level: String,
    pub enable_file: bool,
    pub console_output: ConsoleOutput,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            file_name: DEFAULT_LOG_FILE.to_string(),
            default_level: DEFAULT_LEVEL.to_string(),
            enable_file: true,
            console_output: ConsoleOutput::Stderr,
        }
    }
}

impl LoggingConfig {
    /// Resolve with deterministic precedence: defaults, `[logging]` table, env overrides.
    pub fn resolve(section: Option<&LoggingSection>) -> Result<Self> {
        let mut config = LoggingConfig::default();
        if let Some(section) = section {
            config.apply(section);
        }
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, section: &LoggingSection) {
        if let Some(log_dir) = &section.log_dir {
            self.log_dir = Some(log_dir.clone());
        }
        if let Some(file_name) = &section.file_name {
            self.file_name = file_name.clone();
        }
        if let Some(default_level) = &section.default_level {
            self.default_level = default_level.clone();
        }
        if let Some(enable_file) = section.enable_file {
            self.enable_file = enable_file;
        }
        if let Some(console_output) = section.console_output {
            self.console_output = console_output;
        }
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(level) = env::var(ENV_LOG_LEVEL) {
            if !level.trim().is_empty() {
                self.default_level = level;
            }
        }
        if let Ok(output) = env::var(ENV_CONSOLE_OUTPUT) {
            self.console_output = ConsoleOutput::from_str(&output).map_err(|err| anyhow!(err))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        Directive::from_str(&self.default_level)
            .map_err(|_| anyhow!("logging.default_level must be a valid tracing directive"))?;
        if self.file_name.trim().is_empty() {
            return Err(anyhow!("logging.file_name cannot be empty"));
        }
        Ok(())
    }
}

/// The optional `[logging]` table of a batch file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    pub log_dir: Option<PathBuf>,
    pub file_name: Option<String>,
    pub default_level: Option<String>,
    pub enable_file: Option<bool>,
    #[serde(default)]
    pub console_output: Option<ConsoleOutput>,
}
