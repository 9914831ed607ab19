//! Binary entry point for the rangeopt CLI.
#![forbid(unsafe_code)]

#[path = "rangeopt/config.rs"]
mod config;

use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use rangeopt::optimizer::{explain_access, optimize_access, OptimizerConfig};
use rangeopt::quick::collect_rows;
use rangeopt::scenario::Scenario;
use rangeopt::storage::{Cursor, MemoryTable, Row};
use rangeopt::types::RangeError;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "rangeopt",
    version,
    about = "Explain index access plans for single-table queries",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "RANGEOPT_CONFIG",
        help = "Optimizer config (TOML); defaults to the per-user config file"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Print the access plan chosen for a scenario")]
    Explain(ExplainCmd),
    #[command(about = "Print the effective optimizer config")]
    Config,
}

#[derive(Args, Debug)]
struct ExplainCmd {
    #[arg(long, value_name = "FILE", help = "Scenario file (JSON)")]
    scenario: PathBuf,

    #[arg(long, help = "Run the plan and print the matching row ids")]
    execute: bool,

    #[arg(long, help = "Hide literal values in the output")]
    redact: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("RANGEOPT_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let (optimizer_config, config_path) = config::load(cli.config.as_deref())?;
    if let Some(path) = &config_path {
        debug!(path = %path.display(), "optimizer config loaded");
    }

    match cli.command {
        Command::Explain(cmd) => run_explain(&cmd, &optimizer_config, cli.format)?,
        Command::Config => {
            let rendered = match cli.format {
                OutputFormat::Json => serde_json::to_string_pretty(&optimizer_config)?,
                OutputFormat::Text => toml::to_string_pretty(&optimizer_config)?,
            };
            println!("{}", rendered.trim_end());
        }
    }
    Ok(())
}

fn run_explain(
    cmd: &ExplainCmd,
    optimizer_config: &OptimizerConfig,
    format: OutputFormat,
) -> Result<(), Box<dyn Error>> {
    let text = fs::read_to_string(&cmd.scenario)
        .map_err(|e| RangeError::Scenario(format!("{}: {e}", cmd.scenario.display())))?;
    let scenario = Scenario::from_json(&text)?;
    let table = scenario.build_table()?;
    let cond = scenario.predicate.as_ref();
    let plan = optimize_access(&table, optimizer_config, &scenario.query, cond);
    let explain = explain_access(&table, &plan);

    let rows = if cmd.execute {
        let rows = match plan.make_quick(&table)? {
            Some(mut quick) => collect_rows(quick.as_mut())?,
            None if plan.is_impossible() => Vec::new(),
            None => table.table_scan()?,
        };
        Some(filter_rows(&table, cond, rows))
    } else {
        None
    };

    match format {
        OutputFormat::Json => {
            let mut json = explain.to_json(cmd.redact);
            if let (Some(rows), Some(map)) = (&rows, json.as_object_mut()) {
                let ids: Vec<u64> = rows.iter().map(|r| r.rowid.0).collect();
                map.insert("rows".into(), serde_json::to_value(ids)?);
            }
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            print!("{}", explain.to_text(cmd.redact));
            if let Some(rows) = &rows {
                let ids: Vec<String> = rows.iter().map(|r| r.rowid.0.to_string()).collect();
                println!("matched {} rows: {}", rows.len(), ids.join(","));
            }
        }
    }
    Ok(())
}

/// Rows of the access for which the predicate holds.
fn filter_rows(table: &MemoryTable, cond: Option<&rangeopt::query::Cond>, rows: Vec<Row>) -> Vec<Row> {
    let Some(cond) = cond else {
        return rows;
    };
    let share = table.share();
    rows.into_iter()
        .filter(|row| cond.eval(share, &row.values) == Some(true))
        .collect()
}
