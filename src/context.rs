use std::path::PathBuf;

use crate::appconfig::{AppConfig, SubPackage};
use crate::block::{Block, BlockGroup, BlockType};

/// Options the start command consumes, already narrowed from the CLI surface.
#[derive(Debug, Clone, Default)]
pub struct StartOpts {
    /// Start only this block (positional CLI argument).
    pub block_name: Option<String>,
    /// Restrict the run to one block category.
    pub block_type: Option<BlockType>,
    /// Merge all function blocks into one install + one process.
    pub single_instance: bool,
    /// Target environment name for env file resolution (e.g. `staging`).
    pub environment: Option<String>,
    /// Delegate process lifecycle to pm2 instead of a detached spawn.
    pub pm2: bool,
    /// Preferred emulator port.
    pub port: Option<u16>,
}

/// Aggregated non-fatal warnings about env keys that remain required-but-unset.
#[derive(Debug, Clone, Default)]
pub struct EnvWarning {
    pub keys: Vec<String>,
    pub prefixes: Vec<String>,
}

impl EnvWarning {
    pub fn extend(&mut self, other: EnvWarning) {
        self.keys.extend(other.keys);
        self.prefixes.extend(other.prefixes);
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Shared mutable execution context passed through every hook subscriber in
/// registration order. Later subscribers depend on mutations made by earlier
/// ones, so each subscriber declares the fields it reads and writes (see
/// [`crate::pipeline::Subscriber`]).
#[derive(Debug)]
pub struct StartContext {
    pub cmd_opts: StartOpts,
    pub cwd: PathBuf,
    pub app: AppConfig,
    pub package_name: String,
    pub sub_packages: Vec<SubPackage>,
    /// Partition of the discovered blocks, built once per run and read-only
    /// to the orchestrator (block live state and port reservations excepted).
    pub block_groups: Vec<BlockGroup>,
    pub middleware_blocks: Vec<Block>,
    pub env_warning: EnvWarning,
}

impl StartContext {
    pub fn group(&self, group_type: BlockType) -> Option<&BlockGroup> {
        self.block_groups
            .iter()
            .find(|group| group.group_type == group_type)
    }

    pub fn group_mut(&mut self, group_type: BlockType) -> Option<&mut BlockGroup> {
        self.block_groups
            .iter_mut()
            .find(|group| group.group_type == group_type)
    }
}
