#![allow(clippy::result_large_err)]

//! Tool environment variables shared by the jobs of a batch.

use crate::core::error::AppError;
use crate::core::naming::format_number;
use crate::core::types::ErrorCategory;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;

pub const DEFAULT_PREFIX: &str = "ALPHAMELTS_";

const ENVFILE_PREAMBLE: &str = "! Default values of environment variables (meltsbatch export)\n\
! Variables preceeded by '!' are 'unset' (i.e. 'false')\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VarKind {
    Text,
    Float,
    Int,
    Flag,
}

#[derive(Debug, Clone, Copy)]
enum Initial {
    Unset,
    Text(&'static str),
    Float(f64),
    Int(i64),
    /// Maximum/minimum pressure bounds depend on the liquid model.
    Pressure { melts: f64, other: f64 },
}

struct Variable {
    name: &'static str,
    kind: VarKind,
    default: Initial,
}

const fn var(name: &'static str, kind: VarKind, default: Initial) -> Variable {
    Variable {
        name,
        kind,
        default,
    }
}

use Initial::Unset;
use VarKind::{Flag, Float, Int, Text};

/// Known variables in the order the tool documents them.
const VARIABLES: &[Variable] = &[
    var("VERSION", Text, Initial::Text("pMELTS")),
    var("OLD_GARNET", Flag, Unset),
    var("OLD_SPINEL", Flag, Unset),
    var("OLD_BIOTITE", Flag, Unset),
    var("2_AMPH", Flag, Unset),
    var("NO_CHLORITE", Flag, Unset),
    var("MODE", Text, Initial::Text("isentropic")),
    var("PTPATH_FILE", Text, Unset),
    var("DELTAP", Float, Initial::Float(1000.0)),
    var("DELTAT", Float, Initial::Float(10.0)),
    var(
        "MAXP",
        Float,
        Initial::Pressure {
            melts: 30000.0,
            other: 40000.0,
        },
    ),
    var(
        "MINP",
        Float,
        Initial::Pressure {
            melts: 1.0,
            other: 10000.0,
        },
    ),
    var("MAXT", Float, Initial::Float(2000.0)),
    var("MINT", Float, Initial::Float(0.0)),
    var("ALTERNATIVE_FO2", Flag, Unset),
    var("LIQUID_FO2", Flag, Unset),
    var("IMPOSE_FO2", Flag, Unset),
    var("FO2_PRESSURE_TERM", Flag, Unset),
    var("CONTINUOUS_MELTING", Flag, Unset),
    var("MINF", Float, Initial::Float(0.005)),
    var("MINPHI", Float, Unset),
    var("CONTINUOUS_RATIO", Float, Unset),
    var("CONTINUOUS_VOLUME", Float, Unset),
    var("FRACTIONATE_SOLIDS", Flag, Unset),
    var("MASSIN", Float, Initial::Float(0.001)),
    var("FRACTIONATE_WATER", Flag, Unset),
    var("MINW", Float, Unset),
    var("FRACTIONATE_TARGET", Float, Unset),
    var("MGO_TARGET", Float, Initial::Float(8.0)),
    var("MGNUMBER_TARGET", Float, Unset),
    var("ASSIMILATE", Flag, Unset),
    var("FLUX_MELTING", Flag, Unset),
    var("DRY_ITER_PATIENCE", Int, Initial::Int(100)),
    var("DO_TRACE", Flag, Unset),
    var("DO_TRACE_H2O", Flag, Unset),
    var("HK_OL_TRACE_H2O", Flag, Unset),
    var("HK_PXGT_TRACE_H2O", Text, Initial::Text("mineral-melt")),
    var("2X_OPX_TRACE_H2O", Flag, Unset),
    var("TRACE_DEFAULT_DPTX", Flag, Unset),
    var("TS_TRACE_NORMALIZATION", Int, Unset),
    var("TRACE_INPUT_FILE", Text, Unset),
    var("TRACE_USELIQFEMG", Flag, Unset),
    var("ALPHAMELTS_ADIABAT_BIN_FILE", Text, Unset),
    var("CELSIUS_OUTPUT", Flag, Unset),
    var("SAVE_ALL", Flag, Unset),
    var("SKIP_FAILURE", Flag, Unset),
    var("FAILED_ITER_PATIENCE", Int, Initial::Int(10)),
    var("INTEGRATE_FILE", Flag, Unset),
    var("LATENT_HEAT", Flag, Unset),
    var("QUICK_OUTPUT", Flag, Unset),
    var("MULTIPLE_LIQUIDS", Flag, Unset),
    var("FRACTIONATE_SECOND_LIQUID", Flag, Unset),
    var("FOCUS", Flag, Unset),
    var("FOCUS_FACTOR", Float, Unset),
    var("INTEGRATE_PHI", Flag, Unset),
];

fn lookup(name: &str) -> Option<&'static Variable> {
    let find = |name: &str| VARIABLES.iter().find(|variable| variable.name == name);
    find(name).or_else(|| find(strip_prefix(name)))
}

/// Set environment variables for one batch, keyed by prefix-less name.
///
/// `false` and null values mean "unset" and are never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Environment {
    prefix: String,
    values: HashMap<&'static str, Value>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::with_version("pMELTS")
    }
}

impl Environment {
    /// Defaults for every variable that is set out of the box.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_version(version: &str) -> Self {
        let melts = version == "MELTS";
        let values = VARIABLES
            .iter()
            .filter_map(|variable| {
                let value = match variable.default {
                    Unset => return None,
                    Initial::Text(text) => Value::String(text.to_string()),
                    Initial::Float(value) => float(value),
                    Initial::Int(value) => Value::Number(Number::from(value)),
                    Initial::Pressure { melts: m, other } => float(if melts { m } else { other }),
                };
                Some((variable.name, value))
            })
            .collect();
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            values,
        }
    }

    /// Defaults overlaid with user values. `VERSION` is applied first so the
    /// pressure bounds it controls default consistently.
    pub fn with_overrides(overrides: &Map<String, Value>) -> Result<Self, AppError> {
        let version = overrides
            .iter()
            .find(|(name, _)| lookup(name).is_some_and(|variable| variable.name == "VERSION"))
            .and_then(|(_, value)| value.as_str())
            .unwrap_or("pMELTS");
        let mut environment = Self::with_version(version);
        for (name, value) in overrides {
            environment.set(name, value.clone())?;
        }
        Ok(environment)
    }

    /// Rebuild exactly the variables of a previous [`Environment::dump`].
    pub fn from_dump(dump: &Map<String, Value>) -> Result<Self, AppError> {
        let mut environment = Self {
            prefix: DEFAULT_PREFIX.to_string(),
            values: HashMap::new(),
        };
        for (name, value) in dump {
            environment.set(name, value.clone())?;
        }
        Ok(environment)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Set a variable by name, with or without the prefix.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), AppError> {
        let variable = lookup(name).ok_or_else(|| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("unknown environment variable '{}'", strip_prefix(name)),
            )
            .with_code("ENV-001")
        })?;

        match coerce(variable, value)? {
            Some(value) => {
                self.values.insert(variable.name, value);
            }
            None => {
                self.values.remove(variable.name);
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        lookup(name).and_then(|variable| self.values.get(variable.name))
    }

    /// Set variables, prefix-less, in documented order.
    pub fn dump(&self) -> Map<String, Value> {
        VARIABLES
            .iter()
            .filter_map(|variable| {
                self.values
                    .get(variable.name)
                    .map(|value| (variable.name.to_string(), value.clone()))
            })
            .collect()
    }

    /// Environment file text: a comment preamble then one
    /// `<PREFIX><NAME> <value>` line per set variable.
    pub fn to_envfile(&self) -> String {
        let lines = self
            .dump()
            .iter()
            .map(|(name, value)| format!("{}{} {}", self.prefix, name, render_value(value)))
            .collect::<Vec<_>>();
        format!("{}{}", ENVFILE_PREAMBLE, lines.join("\n"))
    }
}

impl TryFrom<Map<String, Value>> for Environment {
    type Error = AppError;

    fn try_from(dump: Map<String, Value>) -> Result<Self, Self::Error> {
        Environment::from_dump(&dump)
    }
}

impl From<Environment> for Map<String, Value> {
    fn from(environment: Environment) -> Self {
        environment.dump()
    }
}

fn strip_prefix(name: &str) -> &str {
    name.strip_prefix(DEFAULT_PREFIX).unwrap_or(name)
}

fn float(value: f64) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn invalid(variable: &Variable, value: &Value) -> AppError {
    AppError::new(
        ErrorCategory::ValidationError,
        format!(
            "environment variable {} cannot take the value {}",
            variable.name, value
        ),
    )
    .with_code("ENV-002")
}

/// Normalize a user value to the variable's kind; `None` means unset.
fn coerce(variable: &Variable, value: Value) -> Result<Option<Value>, AppError> {
    match (&value, variable.kind) {
        (Value::Null, _) | (Value::Bool(false), _) => Ok(None),
        (Value::Bool(true), Flag) => Ok(Some(value)),
        (Value::String(text), Flag) => match text.trim().to_lowercase().as_str() {
            "" | "false" | "none" => Ok(None),
            _ => Ok(Some(Value::Bool(true))),
        },
        (Value::Number(_), Flag) => Ok(Some(Value::Bool(true))),
        (Value::String(text), Text) => Ok(Some(Value::String(text.clone()))),
        (Value::Number(number), Text) => Ok(Some(Value::String(format_number(number)))),
        (Value::Number(number), Float) => number
            .as_f64()
            .map(|v| Some(float(v)))
            .ok_or_else(|| invalid(variable, &value)),
        (Value::String(text), Float) => text
            .trim()
            .parse::<f64>()
            .map(|v| Some(float(v)))
            .map_err(|_| invalid(variable, &value)),
        (Value::Number(number), Int) => match number.as_i64() {
            Some(int) => Ok(Some(Value::Number(Number::from(int)))),
            None => match number.as_f64() {
                Some(v) if v.fract() == 0.0 => Ok(Some(Value::Number(Number::from(v as i64)))),
                _ => Err(invalid(variable, &value)),
            },
        },
        (Value::String(text), Int) => text
            .trim()
            .parse::<i64>()
            .map(|v| Some(Value::Number(Number::from(v))))
            .map_err(|_| invalid(variable, &value)),
        _ => Err(invalid(variable, &value)),
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => format_number(number),
        Value::Bool(true) => "true".to_string(),
        other => other.to_string(),
    }
}
