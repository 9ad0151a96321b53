//! image-assembler - runtime image assembly CLI.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use image_assembler::logging::{adjust_level, init_logging, parse_level, LoggingConfig};
use image_assembler::preflight::check_inputs;
use image_assembler::{AssemblyConfig, Orchestrator, StageGraph};

#[derive(Parser)]
#[command(name = "image-assembler")]
#[command(about = "Assemble a self-contained runtime image with launchers")]
#[command(
    after_help = "QUICK START:\n  image-assembler preflight --config assembly.toml\n  image-assembler plan --config assembly.toml\n  image-assembler assemble --config assembly.toml --install-dir /opt/app"
)]
struct Cli {
    /// More log output (repeatable)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Less log output (repeatable)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    quiet: u8,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full assembly pipeline
    Assemble(Target),

    /// Print the stages that would run, in order
    Plan(Target),

    /// Check inputs without building anything
    Preflight(Target),
}

#[derive(Args)]
struct Target {
    /// Path to assembly.toml
    #[arg(short, long, default_value = "assembly.toml")]
    config: PathBuf,

    /// Copy the finished image here (overrides install_dir in the config)
    #[arg(long, env = "IMAGE_ASSEMBLER_INSTALL_DIR")]
    install_dir: Option<PathBuf>,
}

impl Target {
    fn load(&self) -> Result<AssemblyConfig> {
        let config = AssemblyConfig::load(&self.config)
            .with_context(|| format!("loading configuration '{}'", self.config.display()))?;
        Ok(config.with_install_dir(self.install_dir.clone()))
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let explicit = match cli.log_level.as_deref() {
        Some(raw) => match parse_level(raw) {
            Some(level) => Some(level),
            None => {
                eprintln!(
                    "Invalid log level '{raw}'. Valid levels: trace, debug, info, warn, error"
                );
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };
    let mut logging = LoggingConfig::from_env(explicit, cli.log_json);
    logging.level = adjust_level(logging.level, cli.verbose, cli.quiet);
    init_logging(logging);

    match run(cli.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the command succeeded.
fn run(command: Commands) -> Result<bool> {
    match command {
        Commands::Assemble(target) => {
            let config = target.load()?;
            let build_dir = config.build_dir.clone();
            let report = Orchestrator::new(config)
                .context("building the stage graph")?
                .run()
                .with_context(|| format!("assembling in '{}'", build_dir.display()))?;
            if let Some((stage, message)) = report.first_failure() {
                eprintln!("Assembly failed in stage '{stage}': {message}");
            }
            Ok(report.succeeded())
        }
        Commands::Plan(target) => {
            let config = target.load()?;
            let graph = StageGraph::for_config(&config).context("building the stage graph")?;
            print!("{}", graph.describe());
            Ok(true)
        }
        Commands::Preflight(target) => {
            let config = target.load()?;
            let problems = check_inputs(&config);
            if problems.is_empty() {
                println!("All preflight checks passed");
                return Ok(true);
            }
            println!("Preflight found {} problem(s):", problems.len());
            for problem in &problems {
                println!("  [{}] {problem}", problem.kind());
            }
            Ok(false)
        }
    }
}
