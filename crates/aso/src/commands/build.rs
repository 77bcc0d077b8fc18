use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Subcommand};
use tokio::sync::watch;
use tracing::warn;

use aso_core::id::IntentId;
use aso_core::types::BuildConfig;
use aso_ledger::BuildLog;

use crate::config::Home;
use crate::output::{header, kv, or_dash};

#[derive(Args)]
pub struct BuildArgs {
    #[command(subcommand)]
    command: BuildCommand,
}

#[derive(Subcommand)]
enum BuildCommand {
    /// Build an approved intent and seal the evidence
    Run {
        intent_id: String,
        /// Build configuration (.json or .toml)
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List recorded builds, newest first
    List {
        #[arg(short, long)]
        intent: Option<String>,
    },
}

pub async fn run(args: BuildArgs, home: Option<PathBuf>) -> anyhow::Result<()> {
    let home = Home::load(home)?;
    match args.command {
        BuildCommand::Run { intent_id, config } => {
            let intent_id = IntentId::parse(&intent_id)?;
            let config = load_build_config(&config)?;
            let pipeline = home.pipeline()?;

            let (cancel_tx, cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, cancelling build");
                    let _ = cancel_tx.send(true);
                }
            });

            let outcome = pipeline
                .execute_with_cancel(&intent_id, &config, cancel_rx)
                .await?;
            println!("{}", header(&format!("Build {}", outcome.result.build_id)));
            println!("{}", kv("intent", outcome.intent.id.as_str()));
            println!("{}", kv("status", outcome.result.status.as_str()));
            for step in &outcome.result.steps {
                let exit = step
                    .exit_code
                    .map_or_else(|| "-".to_string(), |c| c.to_string());
                println!(
                    "{}",
                    kv(&step.name, &format!("{} (exit {exit})", step.status))
                );
                if let Some(error) = &step.error {
                    println!("{}", kv("", error.trim()));
                }
            }
            println!("{}", kv("files", &outcome.manifest.files.len().to_string()));
            println!("{}", kv("chain hash", &outcome.manifest.chain_hash));
            if !outcome.result.succeeded() {
                anyhow::bail!(
                    "build {} finished {}",
                    outcome.result.build_id,
                    outcome.result.status
                );
            }
        }
        BuildCommand::List { intent } => {
            let intent = intent.as_deref().map(IntentId::parse).transpose()?;
            let builds = BuildLog::new(home.open_ledger()?).list(intent.as_ref())?;
            if builds.is_empty() {
                println!("No builds found.");
            }
            for build in &builds {
                println!(
                    "{} {:<9} {} {}",
                    build.build_id.as_str(),
                    build.status.as_str(),
                    build.intent_id,
                    or_dash(build.chain_hash.as_deref())
                );
            }
        }
    }
    Ok(())
}

/// Reads a build config, as TOML when the extension says so and JSON otherwise.
pub fn load_build_config(path: &Path) -> anyhow::Result<BuildConfig> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let is_toml = path.extension().is_some_and(|ext| ext == "toml");
    let config = if is_toml {
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?
    } else {
        serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))?
    };
    Ok(config)
}
