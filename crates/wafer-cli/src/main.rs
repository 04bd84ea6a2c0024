//! `wafer` command line: run the timed tiled multiply or list devices.
//!
//! Exit code is 0 when the run validates, 1 on a validation failure or
//! any error. Set `RUST_LOG=debug` for queue and launch tracing.

use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use wafer_core::{context, Device, DeviceError};
use wafer_kernels::{multiply, MatrixDims, MultiplyConfig, SUPPORTED_TILE_EDGES};

#[derive(Parser)]
#[command(
    name = "wafer",
    version,
    about = "Tiled matrix multiply on a software compute device"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the timed multiply and validate the result
    Run(RunArgs),
    /// Show the devices this process can see
    Info,
}

#[derive(Args)]
struct RunArgs {
    /// Device index; the highest-capability device when omitted
    #[arg(long)]
    device: Option<usize>,

    /// Width of matrix A
    #[arg(long, default_value_t = 320)]
    wa: usize,

    /// Height of matrix A
    #[arg(long, default_value_t = 320)]
    ha: usize,

    /// Width of matrix B
    #[arg(long, default_value_t = 320)]
    wb: usize,

    /// Height of matrix B; must equal the width of A
    #[arg(long, default_value_t = 320)]
    hb: usize,

    /// Tile edge: groups cover tile x tile elements of C
    #[arg(long, default_value_t = 32)]
    tile: usize,

    /// Timed iterations after the warmup launch
    #[arg(long, default_value_t = 300)]
    iterations: usize,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    match Cli::parse().command {
        Command::Run(args) => run(&args),
        Command::Info => info(),
    }
}

fn pick_device(index: Option<usize>) -> Result<&'static Device, DeviceError> {
    match index {
        Some(i) => context::get_device(i),
        None => context::best_device(),
    }
}

fn run(args: &RunArgs) -> ExitCode {
    println!("[wafer] tiled matrix multiply starting...");
    let device = match pick_device(args.device) {
        Ok(dev) => dev,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    info!(device = device.name(), lanes = device.config().lanes, "device selected");
    println!(
        "device: {} ({} lanes, {} MiB)",
        device.name(),
        device.config().lanes,
        device.memory_total() >> 20
    );
    println!(
        "MatrixA({},{}), MatrixB({},{})",
        args.wa, args.ha, args.wb, args.hb
    );

    let config = MultiplyConfig {
        dims_a: MatrixDims::new(args.wa, args.ha),
        dims_b: MatrixDims::new(args.wb, args.hb),
        tile_edge: args.tile,
        iterations: args.iterations,
    };
    match multiply(device, &config) {
        Ok(report) => {
            println!("{report}");
            if report.passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn info() -> ExitCode {
    if !context::is_available() {
        eprintln!("no devices available");
        return ExitCode::FAILURE;
    }
    println!(
        "{:<6} {:<12} {:>6} {:>9} {:>8}",
        "index", "name", "lanes", "mem MiB", "score"
    );
    for index in 0..context::device_count() {
        if let Ok(dev) = context::get_device(index) {
            let cfg = dev.config();
            println!(
                "{:<6} {:<12} {:>6} {:>9} {:>8}",
                index,
                cfg.name,
                cfg.lanes,
                cfg.memory_bytes >> 20,
                cfg.capability_score()
            );
        }
    }
    println!("supported tile edges: {SUPPORTED_TILE_EDGES:?}");
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_defaults_match_driver_defaults() {
        let cli = Cli::parse_from(["wafer", "run"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let config = MultiplyConfig {
            dims_a: MatrixDims::new(args.wa, args.ha),
            dims_b: MatrixDims::new(args.wb, args.hb),
            tile_edge: args.tile,
            iterations: args.iterations,
        };
        assert_eq!(config, MultiplyConfig::default());
    }

    #[test]
    fn test_run_flags_parse() {
        let cli = Cli::parse_from([
            "wafer", "run", "--wa", "64", "--ha", "32", "--wb", "96", "--hb", "64", "--tile",
            "16", "--iterations", "10", "--device", "0",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.wa, 64);
        assert_eq!(args.ha, 32);
        assert_eq!(args.wb, 96);
        assert_eq!(args.hb, 64);
        assert_eq!(args.tile, 16);
        assert_eq!(args.iterations, 10);
        assert_eq!(args.device, Some(0));
    }
}
