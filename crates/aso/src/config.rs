use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use aso_agent::{BuildAgent, DockerRuntime, Pipeline};
use aso_ledger::{BuildLog, IntentStore, Ledger};
use aso_vault::EvidenceVault;

pub const CONFIG_FILE: &str = "aso.toml";

/// `aso.toml`. Relative paths are resolved against the home directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsoConfig {
    pub version: u32,
    pub ledger_file: PathBuf,
    pub vault_dir: PathBuf,
    pub work_dir: PathBuf,
    pub container_program: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_timeout_secs: Option<u64>,
}

impl Default for AsoConfig {
    fn default() -> Self {
        Self {
            version: 1,
            ledger_file: PathBuf::from("ledger.redb"),
            vault_dir: PathBuf::from("vault"),
            work_dir: PathBuf::from("work"),
            container_program: "docker".to_string(),
            step_timeout_secs: None,
        }
    }
}

pub fn default_home() -> anyhow::Result<PathBuf> {
    dirs::data_dir()
        .map(|d| d.join("aso"))
        .ok_or_else(|| anyhow::anyhow!("could not determine a data directory, pass --home"))
}

/// A resolved home directory and its configuration.
pub struct Home {
    root: PathBuf,
    config: AsoConfig,
}

impl Home {
    /// Loads `aso.toml` from `root` (or the default home). A missing file
    /// means defaults.
    pub fn load(root: Option<PathBuf>) -> anyhow::Result<Self> {
        let root = match root {
            Some(root) => root,
            None => default_home()?,
        };
        let path = root.join(CONFIG_FILE);
        let config = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?
        } else {
            AsoConfig::default()
        };
        Ok(Self { root, config })
    }

    /// Creates the home layout, writing a default `aso.toml` unless one exists.
    pub fn init(root: Option<PathBuf>) -> anyhow::Result<(Self, bool)> {
        let root = match root {
            Some(root) => root,
            None => default_home()?,
        };
        std::fs::create_dir_all(&root)?;
        let path = root.join(CONFIG_FILE);
        let created = !path.exists();
        if created {
            let content = toml::to_string_pretty(&AsoConfig::default())?;
            std::fs::write(&path, content)?;
        }
        let home = Self::load(Some(root))?;
        std::fs::create_dir_all(home.vault_dir())?;
        std::fs::create_dir_all(home.work_dir())?;
        Ok((home, created))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &AsoConfig {
        &self.config
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join(&self.config.ledger_file)
    }

    pub fn vault_dir(&self) -> PathBuf {
        self.root.join(&self.config.vault_dir)
    }

    pub fn work_dir(&self) -> PathBuf {
        self.root.join(&self.config.work_dir)
    }

    pub fn open_ledger(&self) -> anyhow::Result<Ledger> {
        let path = self.ledger_path();
        Ledger::open(&path).with_context(|| format!("opening ledger {}", path.display()))
    }

    pub fn open_vault(&self) -> anyhow::Result<EvidenceVault> {
        Ok(EvidenceVault::open(&self.vault_dir())?)
    }

    pub fn agent(&self) -> BuildAgent {
        let runtime = Arc::new(DockerRuntime::new(self.config.container_program.clone()));
        BuildAgent::new(&self.work_dir(), runtime)
            .with_step_timeout(self.config.step_timeout_secs.map(Duration::from_secs))
    }

    pub fn pipeline(&self) -> anyhow::Result<Pipeline> {
        let ledger = self.open_ledger()?;
        Ok(Pipeline::new(
            IntentStore::new(ledger.clone()),
            BuildLog::new(ledger),
            self.agent(),
            self.open_vault()?,
        ))
    }
}
