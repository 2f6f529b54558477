use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::bb_folders;
use crate::block::{Block, BlockConfig, LiveConfig};

pub const WORKSPACE_CONFIG_FILE: &str = "bb.config.json";
pub const BLOCK_CONFIG_FILE: &str = "block.config.json";
const LIVE_STATE_FILE: &str = "live.json";

/// Root workspace configuration: the package name plus the member block and
/// sub-package directories, all relative to the workspace root.
#[derive(Debug, Deserialize)]
pub struct WorkspaceConfig {
    pub name: String,
    #[serde(default)]
    pub blocks: Vec<PathBuf>,
    #[serde(default, rename = "subPackages")]
    pub sub_packages: Vec<PathBuf>,
}

/// A declared sub-package of the root package.
#[derive(Debug, Clone)]
pub struct SubPackage {
    pub name: String,
    pub directory: PathBuf,
}

/// Config store collaborator: reads block records from disk and persists
/// per-block live state under `._bb_/live.json`.
#[derive(Debug)]
pub struct AppConfig {
    pub cwd: PathBuf,
    pub workspace: WorkspaceConfig,
}

impl AppConfig {
    pub fn load(cwd: &Path) -> Result<Self> {
        let path = cwd.join(WORKSPACE_CONFIG_FILE);
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let workspace: WorkspaceConfig = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Self {
            cwd: cwd.to_path_buf(),
            workspace,
        })
    }

    pub fn package_name(&self) -> &str {
        &self.workspace.name
    }

    /// Load every member block's config record.
    pub fn load_blocks(&self) -> Result<Vec<Block>> {
        let mut blocks = Vec::with_capacity(self.workspace.blocks.len());
        for member in &self.workspace.blocks {
            let directory = self.cwd.join(member);
            let path = directory.join(BLOCK_CONFIG_FILE);
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: BlockConfig = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            blocks.push(Block::new(directory, config));
        }
        Ok(blocks)
    }

    /// Resolve declared sub-packages to their package names.
    pub fn sub_packages(&self) -> Result<Vec<SubPackage>> {
        let mut packages = Vec::with_capacity(self.workspace.sub_packages.len());
        for member in &self.workspace.sub_packages {
            let directory = self.cwd.join(member);
            let path = directory.join(WORKSPACE_CONFIG_FILE);
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: WorkspaceConfig = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            packages.push(SubPackage {
                name: config.name,
                directory,
            });
        }
        Ok(packages)
    }

    pub fn live_state_path(&self) -> PathBuf {
        bb_folders::bb_folder_path(&self.cwd, LIVE_STATE_FILE)
    }

    /// Upsert one block's live state. Last write wins; the file maps block
    /// name to its live config.
    pub fn persist_live(&self, block_name: &str, live: &LiveConfig) -> Result<()> {
        let path = self.live_state_path();
        let mut state: BTreeMap<String, LiveConfig> = match fs::read_to_string(&path) {
            Ok(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?,
            _ => BTreeMap::new(),
        };
        state.insert(block_name.to_string(), live.clone());

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let rendered = serde_json::to_string_pretty(&state)?;
        fs::write(&path, rendered)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}
