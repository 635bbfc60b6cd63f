use crate::{
    cli::args::{HashArgs, PlanArgs, RunArgs},
    core::{
        batch::{BatchReport, BatchScheduler, RunOptions},
        config::{loader::BatchFileLoader, Configuration},
        naming::{hash_value, job_name_with, HashAlgorithm, HashSettings},
    },
    Result,
};
use anyhow::{anyhow, Context};
use std::fs;
use std::time::Duration;

pub async fn run(args: RunArgs) -> Result<()> {
    let batch = BatchFileLoader::load_with_overrides(&args.batch_file, |batch| {
        if let Some(executable) = &args.executable {
            batch.executable = executable.clone();
        }
        if let Some(timeout) = args.timeout {
            batch.timeout_seconds = timeout;
        }
    })?;

    let scheduler = BatchScheduler::open(&batch)?;
    let mut options = RunOptions::from_batch_file(&batch);
    options.overwrite = args.overwrite;
    options.exclude.extend(args.exclude);

    let report = scheduler.run(&options).await?;
    print_report(&report);

    if report.has_failures() {
        return Err(anyhow!("{} job(s) failed", report.failed.len()));
    }
    Ok(())
}

pub async fn plan(args: PlanArgs) -> Result<()> {
    let batch = BatchFileLoader::load(&args.batch_file)?;
    let scheduler = BatchScheduler::open(&batch)?;
    let index_path = scheduler.persist()?;

    for (hash, job) in scheduler.index() {
        let status = if batch.root.join(hash).exists() {
            "exists"
        } else {
            "pending"
        };
        println!("{}  {}  {}", hash, status, job.name());
    }
    println!(
        "{} jobs, estimated calculation time: {}",
        scheduler.index().len(),
        humantime::format_duration(scheduler.estimated_duration())
    );
    println!("Index written to {}", index_path.display());
    Ok(())
}

pub async fn hash(args: HashArgs) -> Result<()> {
    let settings = HashSettings {
        algorithm: args.algorithm.parse::<HashAlgorithm>()?,
        length: args.length,
    };
    settings.validate()?;

    let content = fs::read_to_string(&args.config)
        .with_context(|| format!("failed to read {}", args.config.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", args.config.display()))?;
    let config = Configuration::from_value(value)?;

    println!("{}", hash_value(&config.to_value(), &settings));
    println!("{}", job_name_with(&config, &settings));
    Ok(())
}

fn print_report(report: &BatchReport) {
    println!("Succeeded: {}", report.succeeded.len());
    println!("Timed out: {}", report.timed_out.len());
    println!("Failed:    {}", report.failed.len());
    println!("Skipped:   {}", report.skipped.len());
    println!(
        "Elapsed:   {}",
        humantime::format_duration(Duration::from_secs(report.elapsed.as_secs()))
    );
    for (label, names) in [("timed out", &report.timed_out), ("failed", &report.failed)] {
        for name in names {
            println!("  {} {}", label, name);
        }
    }
}

