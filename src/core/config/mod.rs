#![allow(clippy::result_large_err)]

pub mod loader;

pub use loader::{BatchFile, BatchFileLoader, ProcessSettings};

use crate::core::chemistry::is_chemical_component;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Loosely typed value accepted in configuration mappings.
pub type ConfigValue = Value;

pub const TITLE: &str = "Title";
pub const INITIAL_PRESSURE: &str = "Initial Pressure";
pub const FINAL_PRESSURE: &str = "Final Pressure";
pub const INCREMENT_PRESSURE: &str = "Increment Pressure";
pub const INITIAL_TEMPERATURE: &str = "Initial Temperature";
pub const FINAL_TEMPERATURE: &str = "Final Temperature";
pub const INCREMENT_TEMPERATURE: &str = "Increment Temperature";
pub const LOG_FO2_PATH: &str = "Log fO2 Path";
pub const LOG_FO2_DELTA: &str = "Log fO2 Delta";
pub const MODES: &str = "modes";
pub const MODIFY_CHEMISTRY: &str = "modifychem";
pub const SUPPRESS: &str = "Suppress";
pub const EXCLUDE: &str = "exclude";

/// One job's starting composition and scenario path.
///
/// Serializes to the flat key/value object used in the batch index, with
/// chemical components and unknown keys inlined at the top level. Keys that
/// were absent on input stay absent on output, so hashes are stable across a
/// load/save cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Configuration {
    pub title: String,
    pub initial_pressure: Option<Number>,
    pub final_pressure: Option<Number>,
    pub increment_pressure: Option<Number>,
    pub initial_temperature: Option<Number>,
    pub final_temperature: Option<Number>,
    pub increment_temperature: Option<Number>,
    pub log_fo2_path: Option<String>,
    pub log_fo2_delta: Option<Number>,
    pub modes: Option<Vec<String>>,
    /// Components to inject; `None` entries are treated as missing values.
    pub modify_chemistry: Option<IndexMap<String, Option<Number>>>,
    pub suppress: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
    /// Oxide and element abundances.
    pub chemistry: IndexMap<String, Number>,
    /// Keys with no dedicated field, kept verbatim.
    pub extra: IndexMap<String, Value>,
}

impl Configuration {
    pub fn new<T: Into<String>>(title: T) -> Self {
        Configuration {
            title: title.into(),
            initial_pressure: None,
            final_pressure: None,
            increment_pressure: None,
            initial_temperature: None,
            final_temperature: None,
            increment_temperature: None,
            log_fo2_path: None,
            log_fo2_delta: None,
            modes: None,
            modify_chemistry: None,
            suppress: None,
            exclude: None,
            chemistry: IndexMap::new(),
            extra: IndexMap::new(),
        }
    }

    pub fn from_value(value: Value) -> Result<Self, AppError> {
        match value {
            Value::Object(map) => Self::from_map(map),
            other => Err(invalid(format!(
                "configuration must be a JSON object, got {}",
                type_name(&other)
            ))),
        }
    }

    /// Validate and type a flat configuration mapping in a single pass.
    pub fn from_map(map: Map<String, Value>) -> Result<Self, AppError> {
        let mut config = Configuration::new(String::new());
        let mut has_title = false;

        for (key, value) in map {
            match key.as_str() {
                TITLE | "title" => {
                    config.title = match value {
                        Value::String(title) => title,
                        Value::Number(number) => number.to_string(),
                        other => {
                            return Err(invalid(format!(
                                "{} must be a string, got {}",
                                TITLE,
                                type_name(&other)
                            )))
                        }
                    };
                    has_title = true;
                }
                INITIAL_PRESSURE => config.initial_pressure = number_field(&key, value)?,
                FINAL_PRESSURE => config.final_pressure = number_field(&key, value)?,
                INCREMENT_PRESSURE => config.increment_pressure = number_field(&key, value)?,
                INITIAL_TEMPERATURE => config.initial_temperature = number_field(&key, value)?,
                FINAL_TEMPERATURE => config.final_temperature = number_field(&key, value)?,
                INCREMENT_TEMPERATURE => {
                    config.increment_temperature = number_field(&key, value)?
                }
                LOG_FO2_PATH => {
                    config.log_fo2_path = match value {
                        Value::Null => None,
                        Value::String(path) => Some(path),
                        other => {
                            return Err(invalid(format!(
                                "{} must be a string, got {}",
                                key,
                                type_name(&other)
                            )))
                        }
                    }
                }
                LOG_FO2_DELTA => config.log_fo2_delta = number_field(&key, value)?,
                MODES => config.modes = string_list(&key, value)?,
                SUPPRESS => config.suppress = string_list(&key, value)?,
                EXCLUDE => config.exclude = string_list(&key, value)?,
                MODIFY_CHEMISTRY => config.modify_chemistry = modifications(value)?,
                _ if is_chemical_component(&key) => match value {
                    Value::Number(number) => {
                        config.chemistry.insert(key, number);
                    }
                    other => {
                        return Err(invalid(format!(
                            "chemical component {} must be numeric, got {}",
                            key,
                            type_name(&other)
                        )))
                    }
                },
                _ => {
                    config.extra.insert(key, value);
                }
            }
        }

        if !has_title {
            return Err(invalid(format!("configuration is missing the {} field", TITLE)));
        }
        Ok(config)
    }

    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(TITLE.to_string(), Value::String(self.title.clone()));
        for (component, value) in &self.chemistry {
            map.insert(component.clone(), Value::Number(value.clone()));
        }
        let numbers = [
            (INITIAL_TEMPERATURE, &self.initial_temperature),
            (FINAL_TEMPERATURE, &self.final_temperature),
            (INCREMENT_TEMPERATURE, &self.increment_temperature),
            (INITIAL_PRESSURE, &self.initial_pressure),
            (FINAL_PRESSURE, &self.final_pressure),
            (INCREMENT_PRESSURE, &self.increment_pressure),
        ];
        for (key, value) in numbers {
            if let Some(number) = value {
                map.insert(key.to_string(), Value::Number(number.clone()));
            }
        }
        if let Some(path) = &self.log_fo2_path {
            map.insert(LOG_FO2_PATH.to_string(), Value::String(path.clone()));
        }
        if let Some(delta) = &self.log_fo2_delta {
            map.insert(LOG_FO2_DELTA.to_string(), Value::Number(delta.clone()));
        }
        let lists = [
            (SUPPRESS, &self.suppress),
            (MODES, &self.modes),
            (EXCLUDE, &self.exclude),
        ];
        for (key, value) in lists {
            if let Some(items) = value {
                map.insert(
                    key.to_string(),
                    Value::Array(items.iter().cloned().map(Value::String).collect()),
                );
            }
        }
        if let Some(mods) = &self.modify_chemistry {
            let mods = mods
                .iter()
                .map(|(component, value)| {
                    let value = value.clone().map(Value::Number).unwrap_or(Value::Null);
                    (component.clone(), value)
                })
                .collect::<Map<_, _>>();
            map.insert(MODIFY_CHEMISTRY.to_string(), Value::Object(mods));
        }
        for (key, value) in &self.extra {
            map.insert(key.clone(), value.clone());
        }
        map
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.to_map())
    }

    /// Sum of all chemical components.
    pub fn chemistry_total(&self) -> f64 {
        self.chemistry
            .values()
            .filter_map(Number::as_f64)
            .sum()
    }

    pub fn modes(&self) -> &[String] {
        self.modes.as_deref().unwrap_or_default()
    }
}

impl TryFrom<Map<String, Value>> for Configuration {
    type Error = AppError;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        Configuration::from_map(map)
    }
}

impl From<Configuration> for Map<String, Value> {
    fn from(config: Configuration) -> Self {
        config.to_map()
    }
}

fn invalid(message: String) -> AppError {
    AppError::new(ErrorCategory::ValidationError, message).with_code("CFG-001")
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn number_field(key: &str, value: Value) -> Result<Option<Number>, AppError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(number) => Ok(Some(number)),
        other => Err(invalid(format!(
            "{} must be numeric, got {}",
            key,
            type_name(&other)
        ))),
    }
}

fn string_list(key: &str, value: Value) -> Result<Option<Vec<String>>, AppError> {
    match value {
        Value::Null => Ok(None),
        Value::String(single) => Ok(Some(vec![single])),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(text) => Ok(text),
                other => Err(invalid(format!(
                    "{} entries must be strings, got {}",
                    key,
                    type_name(&other)
                ))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        other => Err(invalid(format!(
            "{} must be a list of strings, got {}",
            key,
            type_name(&other)
        ))),
    }
}

fn modifications(value: Value) -> Result<Option<IndexMap<String, Option<Number>>>, AppError> {
    match value {
        Value::Null => Ok(None),
        Value::Object(entries) => {
            let mut mods = IndexMap::new();
            for (component, amount) in entries {
                if !is_chemical_component(&component) {
                    return Err(invalid(format!(
                        "{} entry {} is not a chemical component",
                        MODIFY_CHEMISTRY, component
                    )));
                }
                let amount = match amount {
                    Value::Null => None,
                    Value::Number(number) => Some(number),
                    other => {
                        return Err(invalid(format!(
                            "{} entry {} must be numeric, got {}",
                            MODIFY_CHEMISTRY,
                            component,
                            type_name(&other)
                        )))
                    }
                };
                mods.insert(component, amount);
            }
            Ok(Some(mods))
        }
        other => Err(invalid(format!(
            "{} must be a mapping of component to amount, got {}",
            MODIFY_CHEMISTRY,
            type_name(&other)
        ))),
    }
}
