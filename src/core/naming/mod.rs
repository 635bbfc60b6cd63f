//! Job identity: content hashes and human-readable job names.

pub mod canonical;

use crate::core::config::Configuration;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::sync::OnceLock;

pub use canonical::{format_float, format_number, to_canonical_string};

/// Default number of hex characters kept from the digest.
pub const DEFAULT_HASH_LENGTH: usize = 10;

/// Mode abbreviations used in job names; unknown modes are used verbatim.
const MODE_ABBREVIATIONS: &[(&str, &str)] =
    &[("fractionate solids", "frac"), ("isobaric", "isobar")];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha1,
    Sha256,
}

impl FromStr for HashAlgorithm {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "sha1" => Ok(HashAlgorithm::Sha1),
            "sha256" => Ok(HashAlgorithm::Sha256),
            other => Err(AppError::new(
                ErrorCategory::ValidationError,
                format!("unsupported hash algorithm '{}'; use sha1 or sha256", other),
            )),
        }
    }
}

/// Digest algorithm and truncation applied to canonical configurations.
///
/// A `length` of zero keeps the entire hex digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashSettings {
    #[serde(default)]
    pub algorithm: HashAlgorithm,
    #[serde(default = "default_hash_length")]
    pub length: usize,
}

fn default_hash_length() -> usize {
    DEFAULT_HASH_LENGTH
}

impl Default for HashSettings {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::Sha1,
            length: DEFAULT_HASH_LENGTH,
        }
    }
}

impl HashSettings {
    pub fn digest_len(&self) -> usize {
        match self.algorithm {
            HashAlgorithm::Sha1 => 40,
            HashAlgorithm::Sha256 => 64,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.length > self.digest_len() {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!(
                    "hash.length {} exceeds the {}-character {:?} digest",
                    self.length,
                    self.digest_len(),
                    self.algorithm
                ),
            ));
        }
        Ok(())
    }
}

/// Hash an arbitrary JSON value in canonical form.
pub fn hash_value(value: &Value, settings: &HashSettings) -> String {
    let canonical = to_canonical_string(value);
    let digest = match settings.algorithm {
        HashAlgorithm::Sha1 => hex::encode(Sha1::digest(canonical.as_bytes())),
        HashAlgorithm::Sha256 => hex::encode(Sha256::digest(canonical.as_bytes())),
    };
    match settings.length {
        0 => digest,
        n => digest.chars().take(n).collect(),
    }
}

/// Hash of a configuration with the default settings (10 chars of SHA-1).
pub fn config_hash(config: &Configuration) -> String {
    config_hash_with(config, &HashSettings::default())
}

pub fn config_hash_with(config: &Configuration, settings: &HashSettings) -> String {
    hash_value(&config.to_value(), settings)
}

/// Derive a filesystem-safe job name from the displayed scenario fields,
/// suffixed with the configuration hash.
pub fn job_name(config: &Configuration) -> String {
    job_name_with(config, &HashSettings::default())
}

pub fn job_name_with(config: &Configuration, settings: &HashSettings) -> String {
    let p0 = config
        .initial_pressure
        .as_ref()
        .map(|p| kbar(p.as_f64().unwrap_or_default()))
        .unwrap_or_default();
    let p1 = config
        .final_pressure
        .as_ref()
        .map(|p| kbar(p.as_f64().unwrap_or_default()))
        .unwrap_or_default();
    let t0 = config
        .initial_temperature
        .as_ref()
        .map(|t| truncate(t.as_f64().unwrap_or_default()))
        .unwrap_or_default();
    let t1 = config
        .final_temperature
        .as_ref()
        .map(|t| truncate(t.as_f64().unwrap_or_default()))
        .unwrap_or_default();

    let title = slugify(&config.title);
    let modes = match config.modes.as_deref() {
        Some(modes) => modes
            .iter()
            .map(|mode| abbreviate_mode(mode))
            .collect::<String>(),
        None => String::new(),
    };
    let pressure = span(&p0, &p1, "kbar");
    let temperature = span(&t0, &t1, "C");
    let fo2 = format!(
        "{}{}",
        config
            .log_fo2_delta
            .as_ref()
            .map(format_number)
            .unwrap_or_default(),
        config.log_fo2_path.as_deref().unwrap_or_default()
    );
    let chemistry = config
        .modify_chemistry
        .as_ref()
        .map(|mods| {
            mods.iter()
                .map(|(component, value)| {
                    let value = value.as_ref().map(format_number).unwrap_or("nan".into());
                    format!("{}{}", component, value)
                })
                .collect::<Vec<_>>()
                .join("-")
        })
        .unwrap_or_default();
    let suppress = config
        .suppress
        .as_ref()
        .map(|phases| {
            phases
                .iter()
                .map(|phase| format!("no_{}", phase))
                .collect::<Vec<_>>()
                .join("-")
        })
        .unwrap_or_default();
    let hash = config_hash_with(config, settings);

    slugify(
        &[
            title,
            modes,
            pressure,
            temperature,
            fo2,
            chemistry,
            suppress,
            hash,
        ]
        .concat(),
    )
}

fn abbreviate_mode(mode: &str) -> &str {
    MODE_ABBREVIATIONS
        .iter()
        .find(|(name, _)| *name == mode)
        .map(|(_, short)| *short)
        .unwrap_or(mode)
}

fn kbar(bars: f64) -> String {
    truncate(bars / 1000.0)
}

fn truncate(value: f64) -> String {
    format!("{}", value.trunc() as i64)
}

fn span(start: &str, end: &str, unit: &str) -> String {
    let mut out = start.to_string();
    if !end.is_empty() {
        out.push('-');
        out.push_str(end);
    }
    if !(start.is_empty() && end.is_empty()) {
        out.push_str(unit);
    }
    out
}

/// Drop characters other than word characters, whitespace and hyphens, then
/// collapse whitespace/hyphen runs into a single hyphen.
pub fn slugify(value: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    static SEPARATORS: OnceLock<Regex> = OnceLock::new();
    let unsafe_chars = UNSAFE.get_or_init(|| Regex::new(r"[^\w\s-]").expect("valid regex"));
    let separators = SEPARATORS.get_or_init(|| Regex::new(r"[-\s]+").expect("valid regex"));

    let cleaned = unsafe_chars.replace_all(value, "");
    separators
        .replace_all(cleaned.trim(), "-")
        .into_owned()
}
