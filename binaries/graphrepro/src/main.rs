//! graphrepro - Replay graph compiler repro units.
//!
//! A repro unit is a directory written when a graph compiler crashed or
//! produced wrong numbers: the exported graph, a script that rebuilds the
//! inputs, and any large tensor data. This tool replays such a unit.
//!
//! # Usage
//!
//! ```bash
//! # Replay with the command the failure was captured with
//! graphrepro repro.grepro
//!
//! # Compile and run on a given device
//! graphrepro repro.grepro run --device cuda:0
//!
//! # Rebuild the inputs without compiling
//! graphrepro repro.grepro get_args
//!
//! # Shrink the graph while the failure keeps reproducing
//! graphrepro repro.grepro minify --save-dir /tmp/min --check-str "kernel launch"
//! ```
//!
//! # Exit codes
//!
//! | Code | Meaning                                                         |
//! |------|-----------------------------------------------------------------|
//! | 0    | command completed; `minifier-query` reproduced the failure      |
//! | 1    | fatal error; `minifier-query` ran cleanly                       |
//! | 2    | invalid command-line arguments                                  |

mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::CliConfig;
use graphrepro_core::{Compiler, ReferenceCompiler, ReferenceExporter, ReproCommand};
use graphrepro_replay::{ReplayDriver, ReplayOptions, ReplayOutcome};
use graphrepro_report::ReproScript;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// CLI arguments for graphrepro.
#[derive(Parser, Debug)]
#[command(
    name = "graphrepro",
    about = "Replay, inspect and minimize graph compiler repro units",
    version,
    author
)]
pub struct CliArgs {
    /// Repro script to replay.
    #[arg(value_name = "SCRIPT", required_unless_present = "print_config")]
    script: Option<PathBuf>,

    /// Command to run; defaults to the one recorded in the script.
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to the configuration file.
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Enable JSON log output.
    #[arg(long, global = true)]
    json_logs: bool,

    /// Print the default configuration and exit.
    #[arg(long)]
    print_config: bool,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Compile, load and execute the graph.
    Run(CommonArgs),

    /// Shrink the graph while the failure reproduces.
    Minify(MinifyArgs),

    /// Rebuild the inputs and print them, without compiling.
    #[command(name = "get_args")]
    GetArgs(CommonArgs),

    /// Run and report whether the failure reproduced (exit 0) or not (exit 1).
    #[command(name = "minifier-query")]
    MinifierQuery(QueryArgs),
}

#[derive(Args, Debug, Clone, Default)]
struct CommonArgs {
    /// Directory holding storage files and receiving checkpoints.
    #[arg(long, value_name = "DIR", conflicts_with = "no_save_dir")]
    save_dir: Option<PathBuf>,

    /// Ignore the save directory recorded in the script.
    #[arg(long)]
    no_save_dir: bool,

    /// Device to compile for (cpu, cuda, cuda:N).
    #[arg(long, value_name = "DEV")]
    device: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
struct MinifyArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Store offloaded intermediates as random recipes instead of data.
    #[arg(long)]
    skip_saving_eager_intermediates: bool,

    /// Keep eager intermediates on disk instead of in memory.
    #[arg(long)]
    offload_to_disk: bool,

    /// Do not check that the unshrunk graph fails before minimizing.
    #[arg(long)]
    skip_sanity: bool,

    /// Starting chunk size; must be a power of two.
    #[arg(long, value_name = "N", value_parser = parse_granularity)]
    max_granularity: Option<usize>,

    /// Only count failures whose message contains this text.
    #[arg(long, value_name = "STR")]
    check_str: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
struct QueryArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Only count failures whose message contains this text.
    #[arg(long, value_name = "STR")]
    check_str: Option<String>,
}

fn parse_granularity(s: &str) -> std::result::Result<usize, String> {
    let value: usize = s.parse().map_err(|e| format!("{e}"))?;
    if value.is_power_of_two() {
        Ok(value)
    } else {
        Err(format!("{value} is not a power of two"))
    }
}

impl Command {
    fn kind(&self) -> ReproCommand {
        match self {
            Self::Run(_) => ReproCommand::Run,
            Self::Minify(_) => ReproCommand::Minify,
            Self::GetArgs(_) => ReproCommand::GetArgs,
            Self::MinifierQuery(_) => ReproCommand::MinifierQuery,
        }
    }

    fn apply(&self, options: ReplayOptions) -> ReplayOptions {
        match self {
            Self::Run(common) | Self::GetArgs(common) => common.apply(options),
            Self::Minify(args) => override_check_str(
                args.common
                    .apply(options)
                    .with_offload_to_disk(args.offload_to_disk)
                    .with_skip_saving_eager_intermediates(args.skip_saving_eager_intermediates)
                    .with_skip_sanity(args.skip_sanity)
                    .with_max_granularity(args.max_granularity),
                &args.check_str,
            ),
            Self::MinifierQuery(args) => override_check_str(args.common.apply(options), &args.check_str),
        }
    }
}

impl CommonArgs {
    fn apply(&self, mut options: ReplayOptions) -> ReplayOptions {
        if self.no_save_dir {
            options = options.with_save_dir(None);
        } else if let Some(dir) = &self.save_dir {
            options = options.with_save_dir(Some(dir.clone()));
        }
        if let Some(device) = &self.device {
            options = options.with_device(device.clone());
        }
        options
    }
}

fn override_check_str(options: ReplayOptions, check_str: &Option<String>) -> ReplayOptions {
    match check_str {
        Some(s) => options.with_check_str(Some(s.clone())),
        None => options,
    }
}

/// Options recorded in the script, overridden by the command line.
fn replay_options(script: &ReproScript, command: Option<&Command>) -> ReplayOptions {
    let options = ReplayOptions::from_entry(&script.entry);
    match command {
        Some(command) => command.apply(options),
        None => options,
    }
}

/// Initialize tracing/logging.
fn init_tracing(config: &config::LoggingConfig, json_logs: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Failed to parse log filter")?;

    let format = if json_logs || config.format == "json" {
        "json"
    } else {
        &config.format
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
    }

    Ok(())
}

fn report(outcome: &ReplayOutcome, script: &ReproScript) {
    match outcome {
        ReplayOutcome::Completed => println!("No failure reproduced."),
        ReplayOutcome::Args { graph, args } => {
            println!("{graph}");
            for (placeholder, value) in graph.placeholders.iter().zip(args.iter()) {
                println!("{} = {}", placeholder.name, value);
            }
        }
        ReplayOutcome::Minified { result, checkpoints } => {
            println!("{result}");
            println!("{}", result.stats);
            match checkpoints.last() {
                Some(path) => println!("Minimal repro written to {}", path.display()),
                None => println!("No checkpoints were written."),
            }
        }
        ReplayOutcome::Query { reproduced, verdict } => {
            let status = if *reproduced { "reproduced" } else { "did not reproduce" };
            println!("{} {status}: {verdict}", script.module.display());
        }
    }
}

fn run(args: CliArgs) -> Result<u8> {
    if args.print_config {
        println!("{}", toml::to_string_pretty(&CliConfig::default())?);
        return Ok(0);
    }

    let mut config = if let Some(ref config_path) = args.config {
        CliConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        CliConfig::default()
    };
    config.merge_cli_args(&args);
    config.validate().context("Invalid configuration")?;

    init_tracing(&config.logging, args.json_logs)?;
    info!(version = env!("CARGO_PKG_VERSION"), "graphrepro starting");

    let script_path = args.script.as_ref().context("No repro script given")?;
    let script = ReproScript::load(script_path)
        .with_context(|| format!("Failed to read repro script {:?}", script_path))?;

    let command = args.command.as_ref().map_or(script.entry.command, Command::kind);
    let options = replay_options(&script, args.command.as_ref());

    let compiler = ReferenceCompiler;
    if let Some(recorded) = script.compiler.as_deref() {
        if recorded != compiler.name() {
            warn!(recorded, replaying_with = compiler.name(), "script was captured with a different compiler");
        }
    }

    let driver = ReplayDriver::new(&ReferenceExporter, &compiler).with_comparator(&config.accuracy);
    let outcome = driver.replay(&script, &options, command)?;
    report(&outcome, &script);
    Ok(outcome.exit_code())
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    match run(args) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %e, "graphrepro failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
