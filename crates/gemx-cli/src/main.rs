//! gemx-bench: scenario runner for the GEMX accelerator runtime.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use gemx_cli::{
    BasicCommand, ChainCommand, ChainPerfCommand, PerfCommand, RunContext, ScenarioReport, exit,
};
use gemx_common::AcceleratorConfig;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "gemx-bench")]
#[command(about = "Run and verify GEMM scenarios against the GEMX host runtime")]
#[command(long_about = r#"
Runs GEMM scenarios through the coordinator and checks every output against
the exact host reference. Exits non-zero if any result mismatches.

Examples:
  gemx-bench basic --size 32 --grid 4
  gemx-bench chain --bias
  gemx-bench perf --max-size 1024 --csv
  GEMX_ENGINE_COUNT=2 gemx-bench --seed 7 basic
"#)]
#[command(version)]
struct Cli {
    /// Accelerator configuration file (TOML); defaults plus GEMX_* overrides otherwise
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Seed for operand generation
    #[arg(long, default_value_t = 123, global = true)]
    seed: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,

    /// Write the full report as JSON to PATH
    #[arg(long, value_name = "PATH", global = true)]
    json: Option<PathBuf>,

    /// Print DATA_CSV rows for perf results
    #[arg(long, global = true)]
    csv: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Random GEMMs over a grid of scale/shift values on every engine
    Basic(BasicCommand),
    /// Two chained GEMMs in one batch
    Chain(ChainCommand),
    /// Deep chain with a throughput report
    ChainPerf(ChainPerfCommand),
    /// Square-size throughput sweep
    Perf(PerfCommand),
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Pretty,
    Compact,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level.as_deref(), cli.log_format);

    let config = load_configuration(&cli)?;
    let ctx = RunContext::new(config, cli.seed);

    let result = match &cli.command {
        Commands::Basic(cmd) => cmd.run(&ctx),
        Commands::Chain(cmd) => cmd.run(&ctx),
        Commands::ChainPerf(cmd) => cmd.run(&ctx),
        Commands::Perf(cmd) => cmd.run(&ctx),
        Commands::Config => {
            let text = toml::to_string_pretty(&ctx.config)
                .context("Failed to serialize configuration")?;
            println!("{text}");
            return Ok(());
        }
    };

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            error!("Scenario failed: {}", e);
            for cause in e.chain().skip(1) {
                error!("  Caused by: {}", cause);
            }
            std::process::exit(exit::EXIT_GENERIC_FAIL);
        }
    };

    emit(&cli, &report)?;
    if !report.passed() {
        error!(
            mismatches = report.mismatches(),
            checks = report.checks.len(),
            "verification failed"
        );
        std::process::exit(exit::EXIT_MISMATCH);
    }
    info!(checks = report.checks.len(), "all results verified");
    Ok(())
}

fn load_configuration(cli: &Cli) -> Result<AcceleratorConfig> {
    match &cli.config {
        Some(path) => AcceleratorConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => AcceleratorConfig::from_env().context("Failed to build configuration"),
    }
}

fn emit(cli: &Cli, report: &ScenarioReport) -> Result<()> {
    for check in &report.checks {
        println!("{check}");
    }
    if cli.csv && !report.perf.is_empty() {
        println!("{}", report.csv());
    } else {
        for perf in &report.perf {
            println!("{perf}");
        }
    }
    println!(
        "{}: {}/{} passed (seed {})",
        report.scenario,
        report.checks.len() - report.mismatches(),
        report.checks.len(),
        report.seed
    );

    if let Some(path) = &cli.json {
        let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "report written");
    }
    Ok(())
}

fn setup_logging(level_override: Option<&str>, format: LogFormat) {
    let level = level_override.unwrap_or("info");

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => {
            subscriber.json().with_timer(tracing_subscriber::fmt::time::uptime()).init();
        }
        LogFormat::Compact => {
            subscriber.compact().init();
        }
        LogFormat::Pretty => {
            subscriber.pretty().init();
        }
    }
}
