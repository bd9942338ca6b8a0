//! FPGA Rowhammer payload compiler and hammering engine: CLI entry point.
//!
//! Owns configuration loading, logging setup, and dispatch to the query
//! server, retention CLI, and TRR CLI — the "external collaborators"
//! `spec.md` §1 leaves unspecified, wired here the way the teacher's
//! `swage-bin` wires CLI + logging + orchestration around `swage-core`.

mod config;
mod log_summary;
mod retention;
mod server;
mod trr;

use clap::{Parser, Subcommand};
use config::{load_config, AdapterConfig};
use hammer_core::{parse_action_line, HammeringMode, HardwareExecutor, RowMapping, Transport};
use hammer_sim_transport::SimTransport;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

#[derive(Parser)]
#[command(name = "hammer", about = "FPGA Rowhammer payload compiler and hammering engine")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "hammer.yaml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the line-oriented HAMMER() query protocol over TCP.
    Serve,
    /// Run a retention (idle) test over a set of logical rows.
    Retention {
        /// Comma-separated logical row numbers.
        #[arg(long, value_delimiter = ',')]
        rows: Vec<u32>,
        /// Idle duration between fill and re-check, in seconds.
        #[arg(long)]
        idle_seconds: f64,
        /// Number of fill/idle/check rounds.
        #[arg(long, default_value_t = 1)]
        iterations: u32,
        /// Optional path to append a JSON summary line to after each round.
        #[arg(long)]
        log_summary: Option<PathBuf>,
    },
    /// Run a targeted-row-refresh test.
    Trr {
        /// Whitespace-separated `HAMMER(row,reads,bitflips)` tokens.
        #[arg(long)]
        actions: String,
        /// Number of hammer/refresh rounds.
        #[arg(long)]
        rounds: u32,
        /// Explicit refreshes injected after each round's hammering body.
        #[arg(long)]
        refreshes_per_round: u32,
    },
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

fn apply_adapter_config<T: Transport>(
    executor: &mut HardwareExecutor<T>,
    adapter: &AdapterConfig,
) -> Result<(), String> {
    executor.set_row_pattern(&adapter.row_pattern).map_err(|e| e.to_string())?;
    executor.set_row_check_distance(adapter.row_check_distance);
    executor.set_bank(adapter.bank);
    executor.set_row_mapping(RowMapping::trivial());
    let mode = HammeringMode::from_str(&adapter.hammering_mode).map_err(|e| e.to_string())?;
    executor.set_hammering_mode(mode);
    Ok(())
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let hammer_config = match load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let settings = hammer_config.settings;
    let transport = SimTransport::new(settings.main_ram, settings.payload);
    let mut executor = HardwareExecutor::new(transport, settings);

    if let Err(e) = apply_adapter_config(&mut executor, &hammer_config.adapter) {
        log::error!("invalid adapter configuration: {e}");
        return ExitCode::FAILURE;
    }

    let outcome: Result<(), String> = match cli.command {
        Command::Serve => server::serve(&mut executor, hammer_config.adapter.port).map_err(|e| e.to_string()),
        Command::Retention { rows, idle_seconds, iterations, log_summary } => retention::run(
            &mut executor,
            &retention::RetentionOptions { rows, idle_seconds, iterations, log_summary_path: log_summary },
        )
        .map_err(|e| e.to_string()),
        Command::Trr { actions, rounds, refreshes_per_round } => parse_action_line(&actions)
            .map_err(|e| e.to_string())
            .and_then(|actions| {
                trr::run(&mut executor, &trr::TrrOptions { actions, rounds, refreshes_per_round })
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }),
    };

    let _ = executor.stop();

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
