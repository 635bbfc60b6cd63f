#![allow(clippy::result_large_err)]

//! Grid expansion, deduplication and sequential execution of a batch.

pub mod index;

pub use index::{BatchIndex, IndexEntry, INDEX_FILE};

use crate::core::chemistry::process_modifications;
use crate::core::config::loader::BatchFile;
use crate::core::config::Configuration;
use crate::core::environment::Environment;
use crate::core::error::AppError;
use crate::core::experiment::{JobOutcome, JobRunner};
use crate::core::meltsfile::{InputRenderer, MeltsFileRenderer};
use crate::core::naming::{hash_value, job_name_with, HashSettings};
use crate::core::process::ProcessConfig;
use crate::core::types::JobStatus;
use crate::logging::config::LoggingConfig;
use crate::logging::LogContext;
use indexmap::IndexMap;
use serde_json::{Map, Number, Value};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::instrument::WithSubscriber;
use tracing::{debug, info, warn};

/// Rough wall-clock cost of one job, used for the up-front estimate.
pub const SECONDS_PER_JOB: u64 = 15;

/// Every combination of grid values, in grid order. An empty grid yields a
/// single empty combination.
pub fn grid_combinations(grid: &IndexMap<String, Vec<Value>>) -> Vec<Map<String, Value>> {
    let mut combinations = vec![Map::new()];
    for (key, values) in grid {
        combinations = combinations
            .into_iter()
            .flat_map(|combination| {
                values.iter().map(move |value| {
                    let mut next = combination.clone();
                    next.insert(key.clone(), value.clone());
                    next
                })
            })
            .collect();
    }
    combinations
}

/// Default configuration overlaid with each grid combination, without
/// repeats.
pub fn scenario_configs(
    default: &Map<String, Value>,
    grid: &IndexMap<String, Vec<Value>>,
) -> Vec<Map<String, Value>> {
    let mut configs: Vec<Map<String, Value>> = Vec::new();
    for combination in grid_combinations(grid) {
        let mut config = default.clone();
        config.extend(combination);
        if !configs.contains(&config) {
            configs.push(config);
        }
    }
    configs
}

fn fill_missing(row: &Map<String, Value>) -> Map<String, Value> {
    row.iter()
        .map(|(key, value)| {
            let value = match value {
                Value::Null => Number::from_f64(0.0).map(Value::Number).unwrap_or(Value::Null),
                other => other.clone(),
            };
            (key.clone(), value)
        })
        .collect()
}

/// Build the job index for `scenarios × composition rows`.
///
/// Row values override scenario values; null row values count as zero.
/// Chemistry modifications are applied before hashing. Jobs sharing a hash
/// are collapsed with the last one kept.
pub fn expand(
    default: &Map<String, Value>,
    grid: &IndexMap<String, Vec<Value>>,
    rows: &[Map<String, Value>],
    environment: &Environment,
    settings: &HashSettings,
) -> Result<BatchIndex, AppError> {
    let rows: Vec<Map<String, Value>> = if rows.is_empty() {
        vec![Map::new()]
    } else {
        rows.iter().map(fill_missing).collect()
    };

    let mut index = BatchIndex::new();
    for scenario in scenario_configs(default, grid) {
        for row in &rows {
            let mut merged = scenario.clone();
            merged.extend(row.clone());
            let config = process_modifications(Configuration::from_map(merged)?);
            let hash = hash_value(&config.to_value(), settings);
            let name = job_name_with(&config, settings);

            if let Some(existing) = index.get(&hash) {
                if existing.config() == &config {
                    debug!("Duplicate job {} ({})", name, hash);
                } else {
                    warn!(
                        "Hash collision on {}: {} replaces {}",
                        hash,
                        name,
                        existing.name()
                    );
                }
            }
            index.insert(hash, name, config, environment.clone());
        }
    }
    Ok(index)
}

/// Informational duration estimate for `jobs` jobs.
pub fn estimate_duration(jobs: usize) -> Duration {
    Duration::from_secs(jobs as u64 * SECONDS_PER_JOB)
}

/// Per-invocation run settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Re-run jobs whose directory already exists.
    pub overwrite: bool,
    /// Components left out of every input file, before each job's own list.
    pub exclude: Vec<String>,
    /// Overrides the scheduler's per-job timeout.
    pub timeout: Option<Duration>,
    pub superliquidus_start: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            exclude: Vec::new(),
            timeout: None,
            superliquidus_start: true,
        }
    }
}

impl RunOptions {
    pub fn from_batch_file(batch: &BatchFile) -> Self {
        Self {
            overwrite: false,
            exclude: batch.exclude.clone(),
            timeout: Some(batch.timeout()),
            superliquidus_start: batch.superliquidus_start,
        }
    }
}

/// Job names by outcome for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub timed_out: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn record(&mut self, name: &str, status: JobStatus) {
        let bucket = match status {
            JobStatus::Completed => &mut self.succeeded,
            JobStatus::TimedOut => &mut self.timed_out,
            JobStatus::Failed => &mut self.failed,
            JobStatus::Skipped => &mut self.skipped,
        };
        bucket.push(name.to_string());
    }

    /// Jobs that were actually started.
    pub fn executed(&self) -> usize {
        self.succeeded.len() + self.timed_out.len() + self.failed.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Expands a batch once and runs its jobs one after another.
pub struct BatchScheduler {
    root: PathBuf,
    index: BatchIndex,
    process: ProcessConfig,
    renderer: Box<dyn InputRenderer>,
    log: LogContext,
}

impl std::fmt::Debug for BatchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("root", &self.root)
            .field("jobs", &self.index.len())
            .field("process", &self.process)
            .field("log", &self.log)
            .finish()
    }
}

impl BatchScheduler {
    pub fn new<P: Into<PathBuf>>(
        root: P,
        index: BatchIndex,
        process: ProcessConfig,
        log: LogContext,
    ) -> Self {
        let scheduler = Self {
            root: root.into(),
            index,
            process,
            renderer: Box::new(MeltsFileRenderer::default()),
            log,
        };
        {
            let _guard = scheduler.log.enter();
            info!(
                "{} jobs, estimated calculation time: {}",
                scheduler.index.len(),
                humantime::format_duration(scheduler.estimated_duration())
            );
        }
        scheduler
    }

    /// Expand a loaded batch file, logging into `log`.
    pub fn from_batch_file(batch: &BatchFile, log: LogContext) -> Result<Self, AppError> {
        let index = {
            let _guard = log.enter();
            let environment = Environment::with_overrides(&batch.environment)?;
            expand(
                &batch.default,
                &batch.grid,
                &batch.compositions,
                &environment,
                &batch.hash,
            )?
        };
        Ok(Self::new(&batch.root, index, batch.process_config(), log))
    }

    /// Expand a loaded batch file with logging set up from its `[logging]`
    /// table, writing the log file into the batch root.
    pub fn open(batch: &BatchFile) -> Result<Self, AppError> {
        let config = LoggingConfig::resolve(batch.logging.as_ref())?;
        let log = LogContext::for_batch(&batch.root, &config)?;
        Self::from_batch_file(batch, log)
    }

    pub fn with_renderer(mut self, renderer: Box<dyn InputRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index(&self) -> &BatchIndex {
        &self.index
    }

    pub fn log_context(&self) -> &LogContext {
        &self.log
    }

    pub fn estimated_duration(&self) -> Duration {
        estimate_duration(self.index.len())
    }

    /// Write the index file into the batch root.
    pub fn persist(&self) -> Result<PathBuf, AppError> {
        let target = self.index.persist(&self.root)?;
        let _guard = self.log.enter();
        debug!("Wrote batch index to {}", target.display());
        Ok(target)
    }

    /// Persist the index, then run every pending job in index order.
    ///
    /// Only index persistence aborts the run; per-job errors are recorded
    /// in the report.
    pub async fn run(&self, options: &RunOptions) -> Result<BatchReport, AppError> {
        let dispatch = self.log.dispatch().clone();
        self.run_jobs(options).with_subscriber(dispatch).await
    }

    async fn run_jobs(&self, options: &RunOptions) -> Result<BatchReport, AppError> {
        let target = self.index.persist(&self.root)?;
        debug!("Wrote batch index to {}", target.display());

        let started = Instant::now();
        let process = match options.timeout {
            Some(timeout) => self.process.clone().with_timeout(timeout),
            None => self.process.clone(),
        };
        let runner = JobRunner::new(&self.root, process, self.log.dispatch().clone())
            .with_input_extension(self.renderer.extension());

        let mut report = BatchReport::default();
        let mut pending = Vec::new();
        for (hash, job) in &self.index {
            if !options.overwrite && self.root.join(hash).exists() {
                debug!("Skipping {}: directory exists", job.name());
                report.record(job.name(), JobStatus::Skipped);
            } else {
                pending.push((hash, job));
            }
        }

        info!("Starting {} calculations", pending.len());
        let total = pending.len();
        for (position, (hash, job)) in pending.into_iter().enumerate() {
            let config = job.config();
            let mut exclude = options.exclude.clone();
            exclude.extend(config.exclude.iter().flatten().cloned());

            debug!("Start {}", job.name());
            let input = self.renderer.render(config, config.modes(), &exclude);
            let status = match runner
                .run(
                    hash,
                    job.name(),
                    &input,
                    job.environment(),
                    options.superliquidus_start,
                )
                .await
            {
                Ok(JobOutcome::Completed) => {
                    debug!("Finished {}", job.name());
                    JobStatus::Completed
                }
                Ok(JobOutcome::TimedOut) => {
                    warn!("Timed out: {}", job.name());
                    JobStatus::TimedOut
                }
                Err(err) => {
                    let callstring = err.context.get("context").cloned().unwrap_or_default();
                    warn!("Errored @ {}: {}", callstring, err.message);
                    JobStatus::Failed
                }
            };
            report.record(job.name(), status);
            info!("[{}/{}] {} {}", position + 1, total, job.name(), status);
        }

        report.elapsed = started.elapsed();
        info!(
            "Calculations complete after {}",
            humantime::format_duration(Duration::from_secs(report.elapsed.as_secs()))
        );
        if !report.timed_out.is_empty() {
            warn!("Some calculations timed out:");
            for name in &report.timed_out {
                warn!("{}", name);
            }
        }
        if !report.failed.is_empty() {
            warn!("Some calculations errored:");
            for name in &report.failed {
                warn!("{}", name);
            }
        }
        Ok(report)
    }
}
