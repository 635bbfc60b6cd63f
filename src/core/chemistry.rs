//! Recognition of chemical components and compositional modifications.

use crate::core::config::Configuration;
use regex::Regex;
use serde_json::Number;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Element symbols from H through U.
const ELEMENTS: &[&str] = &[
    "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg", "Al", "Si", "P", "S", "Cl",
    "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", "Ga", "Ge", "As",
    "Se", "Br", "Kr", "Rb", "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd", "Ag", "Cd", "In",
    "Sn", "Sb", "Te", "I", "Xe", "Cs", "Ba", "La", "Ce", "Pr", "Nd", "Pm", "Sm", "Eu", "Gd", "Tb",
    "Dy", "Ho", "Er", "Tm", "Yb", "Lu", "Hf", "Ta", "W", "Re", "Os", "Ir", "Pt", "Au", "Hg", "Tl",
    "Pb", "Bi", "Po", "At", "Rn", "Fr", "Ra", "Ac", "Th", "Pa", "U",
];

/// Oxide-like totals reported by analytical tables.
const SPECIAL_OXIDES: &[&str] = &["FeOT", "Fe2O3T", "LOI"];

/// Decimal places kept when rescaling unmodified components.
const MODIFICATION_PRECISION: i32 = 4;

fn elements() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| ELEMENTS.iter().copied().collect())
}

fn oxide_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([A-Z][a-z]?)(\d*)O(\d*)$").expect("valid regex"))
}

/// Element symbol, e.g. `Ni` or `La`.
pub fn is_element(name: &str) -> bool {
    elements().contains(name)
}

/// Oxide formula such as `SiO2`, `Fe2O3` or `H2O`, plus `FeOT`, `Fe2O3T` and `LOI`.
pub fn is_oxide(name: &str) -> bool {
    if SPECIAL_OXIDES.contains(&name) {
        return true;
    }
    oxide_pattern()
        .captures(name)
        .and_then(|captures| captures.get(1))
        .map(|cation| cation.as_str() != "O" && is_element(cation.as_str()))
        .unwrap_or(false)
}

/// Major (oxide, wt%) or trace (element, µg/g) component.
pub fn is_chemical_component(name: &str) -> bool {
    is_oxide(name) || is_element(name)
}

/// Apply the configuration's `modifychem` entries to its chemistry.
///
/// Non-missing modification values replace their components. Every component
/// not named in the modifications is scaled by `(100 - offset) / 100`, where
/// `offset` is the sum of the non-missing modification values, and rounded to
/// four decimal places. The modification mapping is removed from the result.
pub fn process_modifications(mut config: Configuration) -> Configuration {
    let Some(modifications) = config.modify_chemistry.take() else {
        return config;
    };

    let unmodified: Vec<String> = config
        .chemistry
        .keys()
        .filter(|component| !modifications.contains_key(component.as_str()))
        .cloned()
        .collect();

    let mut offset = 0.0;
    for (component, value) in &modifications {
        if let Some(value) = value {
            offset += value.as_f64().unwrap_or_default();
            config.chemistry.insert(component.clone(), value.clone());
        }
    }

    let factor = (100.0 - offset) / 100.0;
    for component in unmodified {
        if let Some(current) = config.chemistry.get_mut(&component) {
            let scaled = round_to(current.as_f64().unwrap_or_default() * factor);
            if let Some(scaled) = Number::from_f64(scaled) {
                *current = scaled;
            }
        }
    }
    config
}

fn round_to(value: f64) -> f64 {
    let scale = 10f64.powi(MODIFICATION_PRECISION);
    (value * scale).round() / scale
}
