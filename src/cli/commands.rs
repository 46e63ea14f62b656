use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "urbanpulse", version, about = "Neighborhood data collection and analysis pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the collect/process/analyze pipeline
    Run(RunArgs),
    /// Show the latest persisted batch per source
    Status(StatusArgs),
    /// Validate a configuration file
    Validate(ValidateArgs),
}

#[derive(Args, Clone)]
pub struct RunArgs {
    /// YAML configuration file; built-in defaults when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Stop after this many seconds instead of running until interrupted
    #[arg(short, long)]
    pub duration: Option<u64>,
}

#[derive(Args, Clone)]
pub struct StatusArgs {
    /// YAML configuration file; built-in defaults when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output directory to inspect, overriding the configured one
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Clone)]
pub struct ValidateArgs {
    /// YAML configuration file
    #[arg(short, long)]
    pub config: PathBuf,
}
