use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tracing::error;
use tracing_subscriber::EnvFilter;

use claysim::analysis::{self, AggregateResult, DistStats};
use claysim::config::{Assumptions, ParameterSetBuilder};
use claysim::monte_carlo::{BatchOutcome, MonteCarlo};
use claysim::ConfigError;

#[derive(Parser, Debug)]
#[command(name = "claysim", about = "Monte Carlo cash-flow projection for a membership pottery studio")]
struct Cli {
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(long, default_value_t = 500)]
    runs: u64,
    #[arg(long, help = "Override the simulation horizon in months")]
    months: Option<u32>,
    #[arg(long, help = "Assumptions JSON file; canonical defaults when omitted")]
    params: Option<PathBuf>,
    #[arg(long, help = "Write every run's month records as NDJSON")]
    output: Option<PathBuf>,
    #[arg(long, help = "Write the aggregate result as JSON")]
    summary: Option<PathBuf>,
    #[arg(long, help = "Abandon unfinished runs after this many seconds")]
    timeout_secs: Option<u64>,
    #[arg(long)]
    quiet: bool,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },
    #[error("{}: {source}", path.display())]
    Json { path: PathBuf, source: serde_json::Error },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(target: "claysim::batch", error = %e, "aborted");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let assumptions = match &cli.params {
        Some(path) => load_assumptions(path)?,
        None => Assumptions::canonical(),
    };
    let mut builder = ParameterSetBuilder::new(assumptions);
    if let Some(m) = cli.months {
        builder = builder.horizon_months(m);
    }
    let params = builder.build()?;

    let mut driver = MonteCarlo::new(cli.seed, cli.runs);
    if let Some(secs) = cli.timeout_secs {
        driver = driver.with_timeout(Duration::from_secs(secs));
    }
    let batch = driver.run(&params)?;
    let agg = analysis::aggregate(&batch);

    if let Some(path) = &cli.output {
        write_records(&batch, path)?;
    }
    if let Some(path) = &cli.summary {
        let mut writer = BufWriter::new(create(path)?);
        serde_json::to_writer_pretty(&mut writer, &agg)
            .map_err(|source| CliError::Json { path: path.clone(), source })?;
        writer.flush().map_err(|source| CliError::Io { path: path.clone(), source })?;
    }

    if !cli.quiet {
        print_summary(&agg);
    }
    Ok(())
}

fn load_assumptions(path: &PathBuf) -> Result<Assumptions, CliError> {
    let file = File::open(path).map_err(|source| CliError::Io { path: path.clone(), source })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| CliError::Json { path: path.clone(), source })
}

fn create(path: &PathBuf) -> Result<File, CliError> {
    File::create(path).map_err(|source| CliError::Io { path: path.clone(), source })
}

/// One line per run and month: `{"run": i, "record": {...}}`.
fn write_records(batch: &BatchOutcome, path: &PathBuf) -> Result<(), CliError> {
    let mut writer = BufWriter::new(create(path)?);
    let io_err = |source: std::io::Error| CliError::Io { path: path.clone(), source };
    for run in &batch.runs {
        for record in &run.records {
            let line = serde_json::json!({ "run": run.run_index, "record": record });
            serde_json::to_writer(&mut writer, &line).map_err(|source| CliError::Json { path: path.clone(), source })?;
            writeln!(writer).map_err(io_err)?;
        }
    }
    writer.flush().map_err(io_err)
}

fn print_band(title: &str, agg: &AggregateResult, field: &str) {
    println!("\n--- {title} ---");
    println!(
        "{:>5} | {:>11} | {:>11} | {:>11} | {:>11} | {:>11} | {:>5}",
        "Month", "p10", "p25", "p50", "p75", "p90", "n"
    );
    for m in &agg.months {
        if let Some(ds) = m.field(field) {
            println!(
                "{:>5} | {:>11.2} | {:>11.2} | {:>11.2} | {:>11.2} | {:>11.2} | {:>5}",
                m.month.0, ds.p10, ds.p25, ds.p50, ds.p75, ds.p90, ds.n
            );
        }
    }
}

fn print_dist(label: &str, ds: Option<&DistStats>) {
    match ds {
        Some(ds) => println!(
            "  {label:<24} p5 {:>11.2} | p50 {:>11.2} | p95 {:>11.2} | mean {:>11.2}",
            ds.p5, ds.p50, ds.p95, ds.mean
        ),
        None => println!("  {label:<24} n/a"),
    }
}

fn print_summary(agg: &AggregateResult) {
    println!(
        "\n=== Monte Carlo summary (seed {}, {}/{} runs complete) ===",
        agg.master_seed, agg.completed_runs, agg.requested_runs
    );
    if agg.is_partial() {
        println!(
            "  PARTIAL: {} cancelled, {} failed",
            agg.cancelled_runs,
            agg.failures.len() as u64 - agg.cancelled_runs
        );
        for f in agg.failures.iter().filter(|f| !f.cancelled) {
            println!("    run {}: {}", f.run_index, f.message);
        }
    }

    print_band("Cash balance", agg, "cash_balance");
    print_band("Members", agg, "members");
    print_band("DSCR (months with debt service)", agg, "dscr");

    let r = &agg.risk;
    println!("\n=== Risk ===");
    println!("  P(cash ever negative)    {:>6.1}%", r.prob_cash_negative * 100.0);
    println!("  P(any DSCR breach)       {:>6.1}%", r.prob_dscr_breach * 100.0);
    println!("  Mean breach months       {:>6.2}", r.mean_dscr_breach_months);
    print_dist("Minimum cash", r.min_cash.as_ref());
    print_dist("Ending cash", r.ending_cash.as_ref());
    print_dist("First cash-out month", r.first_cash_out_month.as_ref());
    if !r.first_cash_out_histogram.is_empty() {
        println!("  First cash-out by month:");
        for (month, count) in &r.first_cash_out_histogram {
            println!("    {month:>4} | {count}");
        }
    }
}
