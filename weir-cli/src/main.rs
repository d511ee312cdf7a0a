use color_eyre::Result;

mod commands;
mod output;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Weir - declarative data pipeline runner
///
/// Load a pipeline definition, run it once, validate it, or serve its
/// webhook triggers.
#[derive(Parser, Debug)]
#[command(name = "weir", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a pipeline file once
    Run(commands::run::RunArgs),

    /// Validate a pipeline file
    Validate(commands::validate::ValidateArgs),

    /// Serve a pipeline's webhook triggers
    Serve(commands::serve::ServeArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => commands::run::execute(args).await,
        Commands::Validate(args) => commands::validate::execute(args),
        Commands::Serve(args) => commands::serve::execute(args).await,
    }
}
