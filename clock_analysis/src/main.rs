use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clock_analysis::{average_jitter, cycle_to_cycle_jitter, mean_period, read_trace, sync_error};

/// Compares the clock traces recorded by two synchronised parties.
#[derive(Debug, Parser)]
#[command(name = "clock_analysis")]
struct Cli {
    #[arg(default_value = "a.txt")]
    first: PathBuf,
    #[arg(default_value = "b.txt")]
    second: PathBuf,
    /// Edges of the first trace ignored by the jitter and period statistics.
    #[arg(long, default_value_t = 10)]
    skip: usize,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let (a, b) = match (read_trace(&cli.first), read_trace(&cli.second)) {
        (Ok(a), Ok(b)) => (a, b),
        (Err(e), _) => {
            eprintln!("{}: {}", cli.first.display(), e);
            return ExitCode::FAILURE;
        }
        (_, Err(e)) => {
            eprintln!("{}: {}", cli.second.display(), e);
            return ExitCode::FAILURE;
        }
    };

    match sync_error(&a.timestamps, &b.timestamps) {
        Some(error) => println!("Sync error {}, Avg: {}", error.max, error.average),
        None => println!("Sync error: not enough edges"),
    }

    let settled = a.timestamps.get(cli.skip..).unwrap_or(&[]);
    match cycle_to_cycle_jitter(settled) {
        Some((jitter, edge)) => println!("CC Jitter: {} - @{}", jitter, edge),
        None => println!("CC Jitter: not enough edges"),
    }
    match average_jitter(settled) {
        Some(jitter) => println!("AVG Jitter: {}", jitter),
        None => println!("AVG Jitter: not enough edges"),
    }
    match mean_period(settled) {
        Some(period) => println!("Mean Period: {}", period),
        None => println!("Mean Period: not enough edges"),
    }
    ExitCode::SUCCESS
}
