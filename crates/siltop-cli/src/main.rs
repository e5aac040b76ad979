//! CLI for siltop: live Apple Silicon utilization and power in your terminal.

mod commands;
mod tui;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "siltop")]
#[command(about = "siltop: live Apple Silicon CPU/GPU/ANE utilization and power")]
#[command(version = siltop_core::VERSION)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Append log output to this file (filter from RUST_LOG, default "info")
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,

    /// Dashboard options, used when no subcommand is given
    #[command(flatten)]
    monitor: MonitorArgs,
}

#[derive(Args, Clone, Debug)]
struct MonitorArgs {
    /// Sampling and refresh interval in seconds
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u64).range(1..))]
    interval: u64,

    /// Theme color, 0-8
    #[arg(long, default_value = "2", value_parser = clap::value_parser!(u8).range(0..=8))]
    color: u8,

    /// Window for averaged power readouts, in seconds
    #[arg(long, default_value = "30", value_parser = clap::value_parser!(u64).range(1..))]
    avg: u64,

    /// Show a gauge per CPU core
    #[arg(long)]
    show_cores: bool,

    /// Restart the sampler every N readings to bound its output file (0 = never)
    #[arg(long, default_value = "0")]
    max_count: u64,

    /// Scheduling niceness for the sampler process
    #[arg(long, default_value = "10", allow_negative_numbers = true)]
    nice: i32,
}

#[derive(Subcommand)]
enum Commands {
    /// Live dashboard (default)
    Monitor(MonitorArgs),

    /// Take one reading and print it as JSON
    Snapshot {
        /// Give up if no reading arrives within this many seconds
        #[arg(long, default_value = "10")]
        timeout: u64,

        /// Sampling interval in milliseconds
        #[arg(long, default_value = "1000")]
        interval_ms: u64,

        /// Scheduling niceness for the sampler process
        #[arg(long, default_value = "10", allow_negative_numbers = true)]
        nice: i32,
    },

    /// Decode the newest complete frame of an existing powermetrics capture
    Inspect {
        /// Capture written by `powermetrics -f plist -o <file>`
        file: PathBuf,

        /// Chip name for ceilings (default: this machine's chip)
        #[arg(long)]
        chip: Option<String>,
    },

    /// Show the detected chip and its rated ceilings
    Info {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(log_file: Option<&Path>) {
    // Anything on stderr would tear the full-screen dashboard.
    let default_filter = if log_file.is_some() { "info" } else { "off" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter));

    if let Some(path) = log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                eprintln!("Error: cannot open log file {}: {e}", path.display());
                std::process::exit(1);
            }
        }
    }
    builder.init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref());

    match cli.command.unwrap_or(Commands::Monitor(cli.monitor)) {
        Commands::Monitor(args) => commands::monitor::run(tui::app::MonitorConfig {
            interval_secs: args.interval,
            color: args.color,
            avg_secs: args.avg,
            show_cores: args.show_cores,
            max_count: args.max_count,
            niceness: args.nice,
        }),
        Commands::Snapshot {
            timeout,
            interval_ms,
            nice,
        } => commands::snapshot::run(timeout, interval_ms, nice),
        Commands::Inspect { file, chip } => commands::inspect::run(&file, chip.as_deref()),
        Commands::Info { json } => commands::info::run(json),
    }
}
