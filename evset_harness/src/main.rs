use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{ArgAction, Parser};
use evset_harness::config::{DEFAULT_ELEVATION, DEFAULT_PROBE, DEFAULT_SUCCESS_MARKER};
use evset_harness::{
    run_trials, CommandProbe, Elevation, HarnessConfig, HarnessError, DEFAULT_ASSOCIATIVITY,
    DEFAULT_TRIALS,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Runs an eviction set finder many times and checks every set it reports.
#[derive(Debug, Parser)]
#[command(name = "evset_harness", version)]
struct Cli {
    /// Eviction set finder to run.
    #[arg(default_value = DEFAULT_PROBE)]
    probe: PathBuf,
    /// Arguments passed to the finder.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    probe_args: Vec<String>,
    /// Ways per cache set.
    #[arg(short, long, default_value_t = DEFAULT_ASSOCIATIVITY)]
    associativity: u32,
    /// Number of trials.
    #[arg(short = 'n', long, default_value_t = DEFAULT_TRIALS)]
    trials: usize,
    /// Trials run at the same time. Concurrent finders disturb each other's timing.
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,
    /// Kill a trial after this many seconds, it then counts as failed.
    #[arg(short, long = "timeout-secs")]
    timeout_secs: Option<f64>,
    /// Command used to get root, split on whitespace.
    #[arg(long, default_value = DEFAULT_ELEVATION)]
    elevate_with: String,
    /// Run the finder with the current privileges.
    #[arg(long)]
    no_elevate: bool,
    /// Text printed by the finder when the reduction succeeded.
    #[arg(long, default_value = DEFAULT_SUCCESS_MARKER)]
    success_marker: String,
    /// Print the report as JSON.
    #[arg(long)]
    json: bool,
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "verbose")]
    quiet: u8,
}

impl Cli {
    fn config(&self) -> Result<HarnessConfig, HarnessError> {
        let timeout = match self.timeout_secs {
            Some(secs) => Some(Duration::try_from_secs_f64(secs).map_err(|e| {
                HarnessError::InvalidConfig(format!("timeout of {} seconds: {}", secs, e))
            })?),
            None => None,
        };
        let elevation = if self.no_elevate {
            Elevation::None
        } else {
            let mut words = self.elevate_with.split_whitespace();
            match words.next() {
                Some(program) => Elevation::Command {
                    program: PathBuf::from(program),
                    args: words.map(String::from).collect(),
                },
                None => {
                    return Err(HarnessError::InvalidConfig(String::from(
                        "empty elevation command, use --no-elevate instead",
                    )));
                }
            }
        };
        Ok(HarnessConfig {
            probe: self.probe.clone(),
            probe_args: self.probe_args.clone(),
            associativity: self.associativity,
            trials: self.trials,
            jobs: self.jobs,
            timeout,
            elevation,
            success_marker: self.success_marker.clone(),
        })
    }
}

fn init_logging(verbose: u8, quiet: u8) {
    let level = match (verbose, quiet) {
        (_, q) if q >= 2 => "error",
        (_, 1) => "warn",
        (0, _) => "info",
        (1, _) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<(), HarnessError> {
    let config = cli.config()?;
    config.validate()?;
    let probe = CommandProbe::new(&config)?;
    info!(
        trials = config.trials,
        associativity = config.associativity,
        jobs = config.jobs,
        "starting run"
    );

    let summary = run_trials(&probe, &config)?;
    info!(
        trials = summary.trials(),
        passes = summary.samples_ms.len() + summary.untimed_passes,
        fails = summary.fails,
        "run finished"
    );
    if summary.untimed_passes > 0 {
        warn!(
            "{} passing trials did not report a time, they are not in the average",
            summary.untimed_passes
        );
    }

    let report = summary.summarize()?;
    if cli.json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!("{}", report);
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_match_the_library() {
        let cli = Cli::parse_from(["evset_harness"]);
        let config = cli.config().unwrap();
        assert_eq!(config.probe, PathBuf::from("./ev_sets"));
        assert_eq!(config.associativity, 16);
        assert_eq!(config.trials, 500);
        assert_eq!(config.elevation, Elevation::sudo());
        assert_eq!(config.timeout, None);
    }

    #[test]
    fn probe_arguments_and_elevation() {
        let cli = Cli::parse_from([
            "evset_harness",
            "-a",
            "12",
            "--elevate-with",
            "doas -n",
            "-t",
            "2.5",
            "./ev_sets",
            "--",
            "--verbose-probe",
            "1",
        ]);
        let config = cli.config().unwrap();
        assert_eq!(config.associativity, 12);
        assert_eq!(config.probe_args, vec!["--verbose-probe", "1"]);
        assert_eq!(config.timeout, Some(Duration::from_millis(2500)));
        assert_eq!(
            config.elevation,
            Elevation::Command {
                program: PathBuf::from("doas"),
                args: vec![String::from("-n")],
            }
        );
    }

    #[test]
    fn negative_timeout_is_rejected() {
        let cli = Cli::parse_from(["evset_harness", "--timeout-secs=-1"]);
        assert!(matches!(cli.config(), Err(HarnessError::InvalidConfig(_))));
    }

    #[test]
    fn no_elevate() {
        let cli = Cli::parse_from(["evset_harness", "--no-elevate"]);
        assert_eq!(cli.config().unwrap().elevation, Elevation::None);
    }
}
