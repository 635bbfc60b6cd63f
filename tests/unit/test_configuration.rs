use meltsbatch::core::chemistry::{is_chemical_component, process_modifications};
use meltsbatch::core::config::Configuration;
use meltsbatch::core::environment::Environment;
use meltsbatch::core::meltsfile::{InputRenderer, MeltsFileRenderer};
use meltsbatch::core::types::ErrorCategory;
use meltsbatch::core::workspace::JobWorkspace;
use serde_json::{json, Value};
use std::fs;
use tempfile::TempDir;

fn config(value: Value) -> Configuration {
    Configuration::from_value(value).unwrap()
}

#[test]
fn test_configuration_serde_round_trip() {
    let value = json!({
        "Title": "MORB",
        "SiO2": 50.0,
        "Ni": 120,
        "Initial Pressure": 5000,
        "modes": ["isobaric"],
        "exclude": ["P2O5"],
        "modifychem": {"H2O": 1.0, "CO2": null},
        "Limit coexisting": true,
    });
    let parsed: Configuration = serde_json::from_value(value).unwrap();
    assert_eq!(parsed.chemistry.len(), 2);
    assert_eq!(parsed.exclude.as_deref(), Some(&["P2O5".to_string()][..]));
    assert!(parsed.extra.contains_key("Limit coexisting"));

    let text = serde_json::to_string(&parsed).unwrap();
    let reparsed: Configuration = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, reparsed);
}

#[test]
fn test_configuration_errors_are_validation_errors() {
    for value in [
        json!({"SiO2": 50.0}),
        json!({"Title": "x", "SiO2": "fifty"}),
        json!({"Title": "x", "modes": 3}),
        json!({"Title": "x", "modifychem": {"Unobtainium": 1.0}}),
        json!(["not", "an", "object"]),
    ] {
        let err = Configuration::from_value(value).unwrap_err();
        assert_eq!(err.category, ErrorCategory::ValidationError);
    }
}

#[test]
fn test_single_string_mode_becomes_list() {
    let cfg = config(json!({"Title": "x", "modes": "isobaric"}));
    assert_eq!(cfg.modes(), ["isobaric".to_string()]);
}

#[test]
fn test_modification_closure() {
    let cfg = config(json!({
        "Title": "x",
        "SiO2": 50.0,
        "Al2O3": 15.0,
        "MgO": 10.0,
        "FeO": 10.0,
        "CaO": 15.0,
        "modifychem": {"H2O": 4.0},
    }));
    assert!((cfg.chemistry_total() - 100.0).abs() < 1e-9);

    let modified = process_modifications(cfg);
    let unmodified: f64 = ["SiO2", "Al2O3", "MgO", "FeO", "CaO"]
        .iter()
        .map(|c| modified.chemistry[*c].as_f64().unwrap())
        .sum();
    assert!((unmodified - 96.0).abs() < 1e-3);
    assert!((modified.chemistry_total() - 100.0).abs() < 1e-3);
    assert!(modified.modify_chemistry.is_none());
}

#[test]
fn test_component_names() {
    assert!(is_chemical_component("SiO2"));
    assert!(is_chemical_component("La"));
    assert!(!is_chemical_component("Title"));
    assert!(!is_chemical_component("Initial Pressure"));
}

#[test]
fn test_environment_overrides_and_envfile() {
    let overrides = json!({"VERSION": "MELTS", "MODE": "isobaric", "ALPHAMELTS_CELSIUS_OUTPUT": true});
    let env = Environment::with_overrides(overrides.as_object().unwrap()).unwrap();

    assert_eq!(env.get("VERSION"), Some(&json!("MELTS")));
    assert_eq!(env.get("MAXP"), Some(&json!(30000.0)));
    let text = env.to_envfile();
    assert!(text.starts_with('!'));
    assert!(text.contains("ALPHAMELTS_MODE isobaric"));
    assert!(text.contains("ALPHAMELTS_CELSIUS_OUTPUT true"));

    let dumped = serde_json::to_value(&env).unwrap();
    let restored: Environment = serde_json::from_value(dumped).unwrap();
    assert_eq!(restored, env);
}

#[test]
fn test_rendered_job_workspace() {
    let temp_dir = TempDir::new().unwrap();
    let cfg = config(json!({
        "Title": "MORB",
        "SiO2": 50.0,
        "P2O5": 0.2,
        "Initial Temperature": 1300,
        "modes": ["isobaric"],
    }));
    let text = MeltsFileRenderer::default().render(&cfg, cfg.modes(), &["P2O5".to_string()]);
    assert!(!text.contains("P2O5"));

    let workspace = JobWorkspace::create(
        "0123456789",
        "MORB1300C0123456789",
        &text,
        temp_dir.path(),
        &Environment::default().to_envfile(),
    )
    .unwrap();

    let written = fs::read_to_string(workspace.root().join(workspace.input_file())).unwrap();
    assert_eq!(written, text);
    assert_eq!(workspace.input_file(), "MORB1300C0123456789.melts");
    assert!(written.ends_with("Mode: isobaric"));
}
