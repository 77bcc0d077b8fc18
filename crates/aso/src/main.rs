use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod error;
mod output;

use commands::Commands;

#[derive(Parser)]
#[command(name = "aso", version, about = "Approved intents in, verifiable build evidence out")]
struct Cli {
    /// Home directory holding aso.toml, the ledger and the vault
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if let Err(err) = cli.command.run(cli.home).await {
        eprintln!("{}", error::format_error(&err));
        std::process::exit(1);
    }
}
