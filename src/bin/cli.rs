//! Binary entry point for the arbor bulk-load CLI.
#![forbid(unsafe_code)]

#[path = "cli/config.rs"]
mod config;
#[path = "cli/ui.rs"]
mod ui;

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;

use arbor::cli::load::{run_load, LoadConfig, LoadSummary};
use arbor::cli::scan::run_scan;
use arbor::storage::btree::Layout;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use config::CliConfig;
use ui::{format_duration, LoadProgress};

#[derive(Parser, Debug)]
#[command(
    name = "arbor",
    version,
    about = "Bulk load and inspect arbor page stores",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(long, global = true, help = "Suppress progress output")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct LoadCmd {
    #[arg(value_name = "STORE")]
    store: PathBuf,

    #[arg(long, value_name = "FILE", help = "CSV file to load")]
    input: PathBuf,

    #[arg(long, value_enum, help = "Record layout (overrides the config file)")]
    layout: Option<LayoutArg>,

    #[arg(long, value_name = "N", help = "Records per leaf page")]
    records_per_page: Option<u64>,

    #[arg(long, value_name = "BYTES", help = "Value width for the fix layout")]
    fixed_width: Option<u8>,

    #[arg(long, value_name = "FILE", env = "ARBOR_CONFIG", help = "TOML config file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Treat the first CSV row as data")]
    no_headers: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Bulk load a CSV file into a new store")]
    Load(LoadCmd),
    #[command(about = "Print every record of a store")]
    Scan {
        #[arg(value_name = "STORE")]
        store: PathBuf,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum LayoutArg {
    Fix,
    Rle,
    Var,
    Row,
}

impl From<LayoutArg> for Layout {
    fn from(layout: LayoutArg) -> Self {
        match layout {
            LayoutArg::Fix => Layout::FixedColumn,
            LayoutArg::Rle => Layout::RunLengthColumn,
            LayoutArg::Var => Layout::VariableColumn,
            LayoutArg::Row => Layout::Row,
        }
    }
}

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .try_init();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    match cli.command {
        Command::Load(cmd) => {
            let cfg = build_load_config(&cmd)?;
            let progress = LoadProgress::new("loading", cli.quiet);
            let summary = run_load(&cfg, |records| progress.update(records))?;
            let elapsed = progress.finish();
            emit(cli.format, &summary, || print_load_text(&summary, elapsed))?;
        }
        Command::Scan { store } => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            run_scan(&store, &mut out)?;
            out.flush()?;
        }
    }
    Ok(())
}

fn build_load_config(cmd: &LoadCmd) -> Result<LoadConfig, Box<dyn Error>> {
    let file_cfg = CliConfig::load(cmd.config.as_deref())?;
    let mut tree = file_cfg.tree;
    let mut bulk = file_cfg.bulk;
    if let Some(layout) = cmd.layout {
        tree.layout = layout.into();
    }
    if let Some(width) = cmd.fixed_width {
        tree.fixed_width = width;
    }
    if let Some(records) = cmd.records_per_page {
        bulk.records_per_page = records;
    }
    tree.validate()?;
    bulk.validate()?;
    Ok(LoadConfig {
        store_path: cmd.store.clone(),
        input: cmd.input.clone(),
        tree,
        bulk,
        has_headers: !cmd.no_headers,
    })
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_load_text(summary: &LoadSummary, elapsed: std::time::Duration) {
    println!(
        "Loaded {} records into {} leaf pages in {} (root {}, {} bytes)",
        summary.records,
        summary.leaf_pages,
        format_duration(elapsed),
        summary.root,
        summary.store_bytes
    );
    println!("Metadata written to {}", summary.meta_path.display());
}
