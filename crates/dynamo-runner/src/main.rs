//! dynamo_run: runs a built-in System-Dynamics model and reports its series.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

use dynamo_core::DiagnosticsMode;
use dynamo_runner::{default_config_toml, parse_override, run, ModelKind, RunConfig, RunError};

/// Command line arguments for a run
#[derive(Parser, Debug)]
#[command(name = "dynamo_run")]
#[command(about = "Runs a discrete-time System-Dynamics model")]
struct Args {
    /// Model to run (overrides the config file)
    #[arg(long, value_enum)]
    model: Option<ModelKind>,

    /// TOML run configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Fixed time step
    #[arg(long)]
    dt: Option<f64>,

    /// Simulated time to stop at
    #[arg(long)]
    final_time: Option<f64>,

    /// Comma-separated quantities to report
    #[arg(long, value_delimiter = ',')]
    series: Vec<String>,

    /// Write the run export as JSON to this path
    #[arg(long)]
    output: Option<PathBuf>,

    /// Setting edit as name=value; repeatable
    #[arg(long = "set", value_name = "NAME=VALUE")]
    set: Vec<String>,

    /// Disable numerical and ordering diagnostics
    #[arg(long)]
    no_diagnostics: bool,

    /// Print a default configuration file and exit
    #[arg(long)]
    print_config: bool,
}

fn load_config(args: &Args) -> Result<RunConfig, RunError> {
    let mut config = match &args.config {
        Some(path) => RunConfig::from_file(path)?,
        None => RunConfig::default(),
    };

    if let Some(model) = args.model {
        config.run.model = model;
    }
    if let Some(dt) = args.dt {
        config.run.dt = Some(dt);
    }
    if let Some(final_time) = args.final_time {
        config.run.final_time = Some(final_time);
    }
    if !args.series.is_empty() {
        config.run.series = args.series.clone();
    }
    if let Some(output) = &args.output {
        config.run.output = Some(output.clone());
    }
    if args.no_diagnostics {
        config.run.diagnostics = DiagnosticsMode::OFF;
    }
    Ok(config)
}

fn execute(args: &Args) -> Result<(), RunError> {
    let config = load_config(args)?;
    let edits = args
        .set
        .iter()
        .map(|text| parse_override(text))
        .collect::<Result<Vec<_>, _>>()?;

    let export = run(&config, &edits)?;

    println!(
        "{} model: {} ticks, dt {}, run {}",
        export.model, export.ticks, export.dt, export.run_id
    );
    for line in export.summary_lines() {
        println!("  {line}");
    }
    if !export.findings.is_empty() {
        println!("  {} diagnostics findings", export.findings.len());
    }

    if let Some(path) = &config.run.output {
        export.write_json(path)?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.print_config {
        print!("{}", default_config_toml());
        return ExitCode::SUCCESS;
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match execute(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
