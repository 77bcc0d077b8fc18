use std::path::PathBuf;

use clap::{Args, Subcommand};

use aso_core::id::BuildId;

use crate::config::Home;
use crate::output::{header, kv};

#[derive(Args)]
pub struct EvidenceArgs {
    #[command(subcommand)]
    command: EvidenceCommand,
}

#[derive(Subcommand)]
enum EvidenceCommand {
    /// Check a build's files and chain hash against its manifest
    Verify { project: String, build_id: String },
    /// List sealed builds, newest first
    List {
        #[arg(short, long)]
        project: Option<String>,
        /// Print build directories in path order instead
        #[arg(long)]
        paths: bool,
    },
}

pub fn run(args: EvidenceArgs, home: Option<PathBuf>) -> anyhow::Result<()> {
    let home = Home::load(home)?;
    let vault = home.open_vault()?;

    match args.command {
        EvidenceCommand::Verify { project, build_id } => {
            let build_id = BuildId::parse(&build_id)?;
            let report = vault.verify_integrity(&project, &build_id)?;
            println!("{}", header(&format!("Evidence {project}/{build_id}")));
            if report.valid {
                if let Some(manifest) = vault.read_manifest(&project, &build_id)? {
                    println!("{}", kv("intent", manifest.intent_id.as_str()));
                    println!("{}", kv("files", &manifest.files.len().to_string()));
                    println!("{}", kv("bytes", &manifest.total_size().to_string()));
                    println!("{}", kv("chain hash", &manifest.chain_hash));
                }
                println!("{}", kv("result", "valid"));
            } else {
                println!("{}", kv("result", "INVALID"));
                for error in &report.errors {
                    println!("  - {error}");
                }
                anyhow::bail!(
                    "integrity check failed for {project}/{build_id} ({} problem(s))",
                    report.errors.len()
                );
            }
        }
        EvidenceCommand::List { project, paths } => {
            if paths {
                for dir in vault.list_build_dirs(project.as_deref())? {
                    println!("{}", dir.display());
                }
                return Ok(());
            }
            let manifests = vault.list_builds(project.as_deref())?;
            if manifests.is_empty() {
                println!("No sealed builds found.");
            }
            for manifest in &manifests {
                println!(
                    "{} {}/{} {} files {}",
                    manifest.created_at.to_rfc3339(),
                    manifest.project,
                    manifest.build_id,
                    manifest.files.len(),
                    manifest.intent_id
                );
            }
        }
    }
    Ok(())
}
