//! Rendering of configurations into the tool's line-oriented input format.

use crate::core::chemistry::{is_element, is_oxide};
use crate::core::config::{
    Configuration, FINAL_PRESSURE, FINAL_TEMPERATURE, INCREMENT_PRESSURE, INCREMENT_TEMPERATURE,
    INITIAL_PRESSURE, INITIAL_TEMPERATURE, LOG_FO2_DELTA, LOG_FO2_PATH, SUPPRESS,
};
use crate::core::naming::format_number;
use serde_json::Value;

/// File extension of rendered input files.
pub const MELTSFILE_EXTENSION: &str = "melts";

/// Produces the text of a job's input file.
pub trait InputRenderer: Send + Sync {
    fn render(&self, config: &Configuration, modes: &[String], exclude: &[String]) -> String;

    /// Extension, without the dot, of files holding rendered text.
    fn extension(&self) -> &str {
        MELTSFILE_EXTENSION
    }
}

/// Renders `Title:`, composition, P/T path, optional parameters and modes,
/// one `Key: value` line each.
#[derive(Debug, Clone)]
pub struct MeltsFileRenderer {
    pub line_separator: String,
    pub write_traces: bool,
}

impl Default for MeltsFileRenderer {
    fn default() -> Self {
        Self {
            line_separator: "\n".to_string(),
            write_traces: true,
        }
    }
}

/// Parameters read from the free-form part of a configuration, matched
/// case-insensitively.
const FREE_FORM_PARAMETERS: &[&str] = &["dp/dt", "Limit coexisting", "Fractionate"];

impl InputRenderer for MeltsFileRenderer {
    fn render(&self, config: &Configuration, modes: &[String], exclude: &[String]) -> String {
        let mut lines = vec![format!("Title: {}", config.title)];

        let included = |component: &&String| !exclude.contains(component);
        for (component, value) in config.chemistry.iter().filter(|(c, _)| included(c)) {
            if is_oxide(component) {
                lines.push(format!(
                    "Initial Composition: {} {}",
                    component,
                    format_number(value)
                ));
            }
        }
        if self.write_traces {
            for (component, value) in config.chemistry.iter().filter(|(c, _)| included(c)) {
                if is_element(component) {
                    lines.push(format!("Initial Trace: {} {}", component, format_number(value)));
                }
            }
        }

        let path = [
            (INITIAL_TEMPERATURE, &config.initial_temperature),
            (INITIAL_PRESSURE, &config.initial_pressure),
            (FINAL_TEMPERATURE, &config.final_temperature),
            (FINAL_PRESSURE, &config.final_pressure),
            (INCREMENT_TEMPERATURE, &config.increment_temperature),
            (INCREMENT_PRESSURE, &config.increment_pressure),
        ];
        for (key, value) in path {
            if let Some(value) = value {
                lines.push(format!("{}: {}", key, format_number(value)));
            }
        }

        push_free_form(&mut lines, config, FREE_FORM_PARAMETERS[0]);
        if let Some(path) = &config.log_fo2_path {
            lines.push(format!("{}: {}", LOG_FO2_PATH, path));
        }
        if let Some(delta) = &config.log_fo2_delta {
            lines.push(format!("{}: {}", LOG_FO2_DELTA, format_number(delta)));
        }
        for phase in config.suppress.iter().flatten() {
            lines.push(format!("{}: {}", SUPPRESS, phase));
        }
        for parameter in &FREE_FORM_PARAMETERS[1..] {
            push_free_form(&mut lines, config, parameter);
        }

        for mode in modes {
            lines.push(format!("Mode: {}", mode));
        }
        lines.join(&self.line_separator)
    }
}

fn push_free_form(lines: &mut Vec<String>, config: &Configuration, parameter: &str) {
    let Some(value) = config
        .extra
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(parameter))
        .map(|(_, value)| value)
    else {
        return;
    };
    match value {
        Value::Array(items) => {
            for item in items {
                if let Some(text) = render_scalar(item) {
                    lines.push(format!("{}: {}", parameter, text));
                }
            }
        }
        other => {
            if let Some(text) = render_scalar(other) {
                lines.push(format!("{}: {}", parameter, text));
            }
        }
    }
}

fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(format_number(number)),
        Value::Bool(flag) => Some(flag.to_string()),
        other => Some(other.to_string()),
    }
}
