mod commands;
mod summary;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "serialign", about = "Non-rigid image series registration and averaging")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a single template to a reference image
    Register(commands::register::RegisterArgs),
    /// Register a whole series and average it
    Series(commands::series::SeriesArgs),
    /// Average a series from previously saved deformations
    Average(commands::average::AverageArgs),
    /// Print deformation statistics for saved deformations
    Analyze(commands::analyze::AnalyzeArgs),
    /// Apply a saved deformation to an image
    Apply(commands::apply::ApplyArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Register(args) => commands::register::run(args),
        Commands::Series(args) => commands::series::run(args),
        Commands::Average(args) => commands::average::run(args),
        Commands::Analyze(args) => commands::analyze::run(args),
        Commands::Apply(args) => commands::apply::run(args),
    }
}
