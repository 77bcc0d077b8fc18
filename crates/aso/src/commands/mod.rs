pub mod build;
pub mod evidence;
pub mod init;
pub mod intent;

use std::path::PathBuf;

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Create the home directory and a default aso.toml
    Init(init::InitArgs),
    /// Create, review and approve intents
    Intent(intent::IntentArgs),
    /// Run builds for approved intents
    Build(build::BuildArgs),
    /// Inspect and verify sealed evidence
    Evidence(evidence::EvidenceArgs),
}

impl Commands {
    pub async fn run(self, home: Option<PathBuf>) -> anyhow::Result<()> {
        match self {
            Commands::Init(args) => init::run(args, home),
            Commands::Intent(args) => intent::run(args, home),
            Commands::Build(args) => build::run(args, home).await,
            Commands::Evidence(args) => evidence::run(args, home),
        }
    }
}
