#![cfg(unix)]

use indexmap::IndexMap;
use meltsbatch::core::batch::{expand, BatchIndex, BatchScheduler, RunOptions, INDEX_FILE};
use meltsbatch::core::config::Configuration;
use meltsbatch::core::environment::Environment;
use meltsbatch::core::meltsfile::InputRenderer;
use meltsbatch::core::naming::{config_hash, HashSettings};
use meltsbatch::core::process::ProcessConfig;
use meltsbatch::logging::LogContext;
use serde_json::{json, Map, Value};
use serial_test::serial;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Emulates the menu: fails at once for `BAD*` input files and writes an
/// output file when asked to execute.
const TOOL_SCRIPT: &str = r#"#!/bin/sh
case "$2" in
  BAD*) echo "cannot read $2" >&2; exit 3 ;;
esac
echo "MAIN MENU"
while IFS= read -r line; do
  case "$line" in
    0) exit 0 ;;
    4) echo "executing" ; echo "$2" > System_main_tbl.txt ;;
    *) echo "selected $line" ;;
  esac
done
"#;

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

fn tool(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("alphamelts_tool");
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn process_config(executable: PathBuf) -> ProcessConfig {
    ProcessConfig {
        poll_interval: Duration::from_millis(100),
        settle_delay: Duration::from_millis(50),
        grace_period: Duration::from_millis(20),
        ..ProcessConfig::new(executable)
    }
}

fn pressure_grid() -> IndexMap<String, Vec<Value>> {
    let mut grid = IndexMap::new();
    grid.insert("Initial Pressure".to_string(), vec![json!(5000), json!(7000)]);
    grid
}

fn index_for(rows: &[Map<String, Value>]) -> BatchIndex {
    expand(
        &object(json!({
            "Title": "MORB",
            "Initial Temperature": 1300,
            "Final Temperature": 1000,
            "modes": ["isobaric"],
        })),
        &pressure_grid(),
        rows,
        &Environment::default(),
        &HashSettings::default(),
    )
    .unwrap()
}

#[tokio::test]
#[serial]
async fn test_end_to_end_batch_is_resumable() {
    let temp_dir = TempDir::new().unwrap();
    let executable = tool(temp_dir.path(), TOOL_SCRIPT);
    let root = temp_dir.path().join("batch");

    let rows = vec![
        object(json!({"Title": "A", "SiO2": 50.0, "MgO": 8.0})),
        object(json!({"Title": "B", "SiO2": 48.0, "MgO": 10.0})),
    ];
    let index = index_for(&rows);
    assert_eq!(index.len(), 4);

    let scheduler = BatchScheduler::new(
        &root,
        index.clone(),
        process_config(executable),
        LogContext::disabled(),
    );

    let first = scheduler.run(&RunOptions::default()).await.unwrap();
    assert_eq!(first.succeeded.len(), 4, "{first:?}");
    assert!(first.failed.is_empty());
    assert!(first.skipped.is_empty());

    for (hash, job) in &index {
        let job_dir = root.join(hash);
        let input = job_dir.join(format!("{}.melts", job.name()));
        assert!(input.is_file());
        assert!(fs::read_to_string(&input)
            .unwrap()
            .starts_with(&format!("Title: {}", job.config().title)));
        assert!(job_dir.join("environment.txt").is_file());
        assert!(job_dir.join("System_main_tbl.txt").is_file());
    }

    let reloaded = BatchIndex::load(&root).unwrap();
    assert_eq!(&reloaded, scheduler.index());
    for (hash, job) in &reloaded {
        assert_eq!(&config_hash(job.config()), hash);
        assert_eq!(index.get(hash).unwrap().name(), job.name());
    }

    let second = scheduler.run(&RunOptions::default()).await.unwrap();
    assert_eq!(second.executed(), 0);
    assert_eq!(second.skipped.len(), 4);
    assert!(root.join(INDEX_FILE).is_file());
}

#[tokio::test]
#[serial]
async fn test_overwrite_reruns_existing_jobs() {
    let temp_dir = TempDir::new().unwrap();
    let executable = tool(temp_dir.path(), TOOL_SCRIPT);
    let root = temp_dir.path().join("batch");
    let index = index_for(&[object(json!({"Title": "A", "SiO2": 50.0}))]);

    let scheduler = BatchScheduler::new(
        &root,
        index,
        process_config(executable),
        LogContext::disabled(),
    );
    scheduler.run(&RunOptions::default()).await.unwrap();

    let options = RunOptions {
        overwrite: true,
        ..RunOptions::default()
    };
    let report = scheduler.run(&options).await.unwrap();
    assert_eq!(report.succeeded.len(), 2);
    assert!(report.skipped.is_empty());
}

#[tokio::test]
#[serial]
async fn test_failing_job_is_isolated() {
    let temp_dir = TempDir::new().unwrap();
    let executable = tool(temp_dir.path(), TOOL_SCRIPT);
    let root = temp_dir.path().join("batch");

    let rows = vec![
        object(json!({"Title": "BAD", "SiO2": 50.0})),
        object(json!({"Title": "GOOD", "SiO2": 50.0})),
    ];
    let scheduler = BatchScheduler::new(
        &root,
        index_for(&rows),
        process_config(executable),
        LogContext::disabled(),
    );
    let report = scheduler.run(&RunOptions::default()).await.unwrap();

    assert_eq!(report.failed.len(), 2, "{report:?}");
    assert!(report.failed.iter().all(|name| name.starts_with("BAD")));
    assert_eq!(report.succeeded.len(), 2);
    assert!(report.succeeded.iter().all(|name| name.starts_with("GOOD")));
    assert!(report.has_failures());
}

#[tokio::test]
#[serial]
async fn test_timed_out_jobs_are_reported_separately() {
    let temp_dir = TempDir::new().unwrap();
    let executable = tool(
        temp_dir.path(),
        "#!/bin/sh\nwhile true; do echo working; sleep 0.05; done\n",
    );
    let root = temp_dir.path().join("batch");
    let index = expand(
        &object(json!({"Title": "slow", "SiO2": 50.0})),
        &IndexMap::new(),
        &[],
        &Environment::default(),
        &HashSettings::default(),
    )
    .unwrap();

    let scheduler = BatchScheduler::new(
        &root,
        index,
        process_config(executable),
        LogContext::disabled(),
    );
    let options = RunOptions {
        timeout: Some(Duration::from_secs(1)),
        ..RunOptions::default()
    };
    let report = scheduler.run(&options).await.unwrap();

    assert_eq!(report.timed_out.len(), 1);
    assert!(report.succeeded.is_empty());
    assert!(!report.has_failures());
}

#[tokio::test]
#[serial]
async fn test_run_and_job_level_excludes_are_combined() {
    let temp_dir = TempDir::new().unwrap();
    let executable = tool(temp_dir.path(), TOOL_SCRIPT);
    let root = temp_dir.path().join("batch");
    let index = expand(
        &object(json!({
            "Title": "ex",
            "SiO2": 50.0,
            "P2O5": 0.2,
            "Cr2O3": 0.1,
            "exclude": ["Cr2O3"],
        })),
        &IndexMap::new(),
        &[],
        &Environment::default(),
        &HashSettings::default(),
    )
    .unwrap();
    let (hash, job) = index.iter().next().map(|(h, j)| (h.clone(), j.clone())).unwrap();

    let scheduler = BatchScheduler::new(
        &root,
        index,
        process_config(executable),
        LogContext::disabled(),
    );
    let options = RunOptions {
        exclude: vec!["P2O5".to_string()],
        ..RunOptions::default()
    };
    scheduler.run(&options).await.unwrap();

    let input =
        fs::read_to_string(root.join(&hash).join(format!("{}.melts", job.name()))).unwrap();
    assert!(input.contains("SiO2"));
    assert!(!input.contains("P2O5"));
    assert!(!input.contains("Cr2O3"));
}

/// Writes only the title, into `.inp` files.
struct TitleOnlyRenderer;

impl InputRenderer for TitleOnlyRenderer {
    fn render(&self, config: &Configuration, _modes: &[String], _exclude: &[String]) -> String {
        format!("Title: {}\n", config.title)
    }

    fn extension(&self) -> &str {
        "inp"
    }
}

#[tokio::test]
#[serial]
async fn test_custom_renderer_controls_input_file() {
    let temp_dir = TempDir::new().unwrap();
    let executable = tool(temp_dir.path(), TOOL_SCRIPT);
    let root = temp_dir.path().join("batch");
    let index = index_for(&[object(json!({"Title": "A", "SiO2": 50.0}))]);

    let scheduler = BatchScheduler::new(
        &root,
        index.clone(),
        process_config(executable),
        LogContext::disabled(),
    )
    .with_renderer(Box::new(TitleOnlyRenderer));
    let report = scheduler.run(&RunOptions::default()).await.unwrap();
    assert_eq!(report.succeeded.len(), 2, "{report:?}");

    for (hash, job) in &index {
        let job_dir = root.join(hash);
        let input = job_dir.join(format!("{}.inp", job.name()));
        assert_eq!(
            fs::read_to_string(&input).unwrap(),
            format!("Title: {}\n", job.config().title)
        );
        assert!(!job_dir.join(format!("{}.melts", job.name())).exists());
    }
}
