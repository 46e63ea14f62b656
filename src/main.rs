use clap::Parser;
use tracing_subscriber::EnvFilter;

use urbanpulse::cli;
use urbanpulse::config::PipelineConfig;
use urbanpulse::errors::PulseError;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(!cli.no_color)
        .init();

    let result = match cli.command {
        cli::Commands::Run(args) => cli::run::handle_run(args).await,
        cli::Commands::Status(args) => cli::status::handle_status(args).await,
        cli::Commands::Validate(args) => handle_validate(args).await,
    };

    match result {
        Ok(()) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            let exit_code = match &e {
                PulseError::Config(_) => 2,
                _ => 1,
            };
            std::process::exit(exit_code);
        }
    }
}

async fn handle_validate(args: cli::commands::ValidateArgs) -> Result<(), PulseError> {
    let config = PipelineConfig::load(Some(args.config.as_path()))?;
    config.validate()?;
    println!("Configuration is valid: {}", args.config.display());
    Ok(())
}
