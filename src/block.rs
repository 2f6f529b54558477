use std::net::TcpListener;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::appconfig::AppConfig;

/// Language tag of blocks the function emulator can serve.
pub const NODE_LANGUAGE: &str = "nodejs";

/// Category a block belongs to. The start groups are keyed by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockType {
    Function,
    SharedFn,
    Middleware,
    View,
    Package,
}

impl BlockType {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockType::Function => "function",
            BlockType::SharedFn => "shared-fn",
            BlockType::Middleware => "middleware",
            BlockType::View => "view",
            BlockType::Package => "package",
        }
    }
}

/// Per-block configuration, read from the block's `block.config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub middlewares: Vec<String>,
}

/// Mutable live state written back after a successful start. Field names match
/// the persisted JSON surface downstream tooling reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveConfig {
    pub is_on: bool,
    #[serde(default)]
    pub single_instance: bool,
    pub pid: Option<u32>,
    pub port: Option<u16>,
    pub live_url: Option<String>,
    pub pm2_instance_name: Option<String>,
    pub log_out: Option<PathBuf>,
    pub log_err: Option<PathBuf>,
}

/// A port held on the block's behalf until just before the emulator binds it.
/// Releasing drops the listener; the OS frees the port for the child process.
#[derive(Debug)]
pub struct PortReservation {
    port: u16,
    listener: Option<TcpListener>,
}

impl PortReservation {
    /// Reserve `preferred` if given (and free), otherwise any free port.
    pub fn take(preferred: Option<u16>) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", preferred.unwrap_or(0)))
            .with_context(|| match preferred {
                Some(port) => format!("failed to reserve port {port}"),
                None => "failed to reserve a free port".to_string(),
            })?;
        let port = listener.local_addr().context("failed to read reserved port")?.port();
        Ok(Self {
            port,
            listener: Some(listener),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_held(&self) -> bool {
        self.listener.is_some()
    }

    /// Give the port back. Idempotent.
    pub fn release(&mut self) {
        self.listener.take();
    }
}

/// A unit of deployable functionality with its own directory and config.
#[derive(Debug)]
pub struct Block {
    pub directory: PathBuf,
    pub config: BlockConfig,
    pub reservation: Option<PortReservation>,
    pub live: LiveConfig,
}

impl Block {
    pub fn new(directory: PathBuf, config: BlockConfig) -> Self {
        Self {
            directory,
            config,
            reservation: None,
            live: LiveConfig::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Directory relative to the workspace root; empty when the block sits at
    /// the root itself, the full path when it sits outside it.
    pub fn relative_directory(&self, cwd: &Path) -> String {
        match self.directory.strip_prefix(cwd) {
            Ok(relative) => relative.to_string_lossy().to_string(),
            Err(_) => self.directory.to_string_lossy().to_string(),
        }
    }

    pub fn is_node(&self) -> bool {
        self.config.language == NODE_LANGUAGE
    }

    pub fn available_port(&self) -> Option<u16> {
        self.reservation.as_ref().map(PortReservation::port)
    }

    /// Update the in-memory live config and persist it through the store.
    pub fn update_live_config(&mut self, live: LiveConfig, app: &AppConfig) -> Result<()> {
        self.live = live;
        app.persist_live(self.name(), &self.live)
    }
}

/// One start group: a block category and its ordered members.
#[derive(Debug)]
pub struct BlockGroup {
    pub group_type: BlockType,
    pub blocks: Vec<Block>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, block_type: BlockType) -> BlockConfig {
        BlockConfig {
            name: name.into(),
            block_type,
            language: "nodejs".into(),
            middlewares: Vec::new(),
        }
    }

    #[test]
    fn reservation_frees_the_port_on_release() {
        let mut reservation = PortReservation::take(None).unwrap();
        let port = reservation.port();
        assert!(reservation.is_held());
        // Port is in use while held.
        assert!(TcpListener::bind(("127.0.0.1", port)).is_err());

        reservation.release();
        assert!(!reservation.is_held());
        // A released reservation can be taken again.
        TcpListener::bind(("127.0.0.1", port)).unwrap();
        // Releasing twice is fine.
        reservation.release();
    }

    #[test]
    fn relative_directory_falls_back_to_full_path_outside_cwd() {
        let block = Block::new(PathBuf::from("/work/app/fns/auth"), config("auth", BlockType::Function));
        assert_eq!(block.relative_directory(Path::new("/work/app")), "fns/auth");
        assert_eq!(block.relative_directory(Path::new("/elsewhere")), "/work/app/fns/auth");
    }

    #[test]
    fn block_type_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&BlockType::SharedFn).unwrap(),
            "\"shared-fn\""
        );
        assert_eq!(BlockType::SharedFn.as_str(), "shared-fn");
    }
}
