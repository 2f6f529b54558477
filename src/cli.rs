use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::block::BlockType;

#[derive(Parser, Debug)]
#[command(name = "bb-dev")]
#[command(version)]
#[command(about = "Appblocks developer tooling CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start blocks in the local function emulator
    Start(StartArgs),
    /// Manage bb-dev configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Start only this block (defaults to every block in the workspace)
    pub block_name: Option<String>,
    /// Restrict the run to one block category
    #[arg(long = "type", value_enum)]
    pub block_type: Option<BlockTypeArg>,
    /// Merge all function blocks into one install and one process
    #[arg(long = "single-instance")]
    pub single_instance: bool,
    /// Target environment name (selects .env.function.<env> / .env.view.<env>)
    #[arg(long = "env")]
    pub environment: Option<String>,
    /// Delegate emulator lifecycle to pm2 instead of a detached spawn
    #[arg(long = "pm2")]
    pub pm2: bool,
    /// Preferred emulator port (a free port is reserved otherwise)
    #[arg(long = "port")]
    pub port: Option<u16>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum BlockTypeArg {
    Function,
    SharedFn,
    Middleware,
    View,
    Package,
}

impl From<BlockTypeArg> for BlockType {
    fn from(value: BlockTypeArg) -> Self {
        match value {
            BlockTypeArg::Function => BlockType::Function,
            BlockTypeArg::SharedFn => BlockType::SharedFn,
            BlockTypeArg::Middleware => BlockType::Middleware,
            BlockTypeArg::View => BlockType::View,
            BlockTypeArg::Package => BlockType::Package,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Set a key in bb-dev config (e.g. defaults.installer)
    Set(ConfigSetArgs),
}

#[derive(Args, Debug)]
pub struct ConfigSetArgs {
    /// Config key path (e.g. defaults.pm2_name)
    pub key: String,
    /// Value to assign to the key (stored as a string)
    pub value: String,
    /// Override config file path (default: $XDG_CONFIG_HOME/bb-dev/config.toml)
    #[arg(long = "file")]
    pub file: Option<PathBuf>,
}
