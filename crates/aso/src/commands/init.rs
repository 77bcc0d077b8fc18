use std::path::PathBuf;

use clap::Args;

use crate::config::{Home, CONFIG_FILE};
use crate::output::kv;

#[derive(Args)]
pub struct InitArgs {}

pub fn run(_args: InitArgs, home: Option<PathBuf>) -> anyhow::Result<()> {
    let (home, created) = Home::init(home)?;
    home.open_ledger()?;
    if created {
        println!("Initialized aso home at {}", home.root().display());
    } else {
        println!("aso home already initialized at {}", home.root().display());
    }
    println!("{}", kv("config", &home.root().join(CONFIG_FILE).display().to_string()));
    println!("{}", kv("ledger", &home.ledger_path().display().to_string()));
    println!("{}", kv("vault", &home.vault_dir().display().to_string()));
    println!("{}", kv("work", &home.work_dir().display().to_string()));
    println!("{}", kv("runtime", &home.config().container_program));
    Ok(())
}
