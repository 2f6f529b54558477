use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::debug;

use crate::block::{BlockType, LiveConfig};
use crate::context::StartContext;

/// Inputs shared by every block's live-state update for one run.
#[derive(Debug, Clone)]
pub struct LiveReport {
    pub pid: Option<u32>,
    pub port: u16,
    pub pm2_instance_name: Option<String>,
    pub log_out: PathBuf,
    pub log_err: PathBuf,
}

/// Reachable URL for a block behind the shared port. Falls back to the base
/// directory name when the block sits at the workspace root.
pub fn live_url(port: u16, relative_dir: &str, directory: &Path) -> String {
    let path = if relative_dir.is_empty() {
        directory
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        relative_dir.to_string()
    };
    format!("localhost:{port}/{path}")
}

/// Mark every served function, middleware, and shared-fn block live.
/// Middleware and shared-fn blocks run inside the same merged process, so
/// skipping them would report reachable blocks as down. Non-nodejs blocks are
/// never mounted by the emulator and keep their previous state.
pub fn report_all(ctx: &mut StartContext, report: &LiveReport) -> Result<()> {
    let StartContext {
        app,
        cwd,
        block_groups,
        middleware_blocks,
        ..
    } = ctx;

    for group in block_groups.iter_mut() {
        if !matches!(group.group_type, BlockType::Function | BlockType::SharedFn) {
            continue;
        }
        for block in group.blocks.iter_mut().filter(|block| block.is_node()) {
            let relative = block.relative_directory(cwd);
            let live = live_config_for(report, &relative, &block.directory);
            debug!(block = block.name(), url = ?live.live_url, "marking block live");
            block.update_live_config(live, app)?;
        }
    }

    for block in middleware_blocks.iter_mut() {
        let relative = block.relative_directory(cwd);
        let live = live_config_for(report, &relative, &block.directory);
        debug!(block = block.name(), url = ?live.live_url, "marking middleware live");
        block.update_live_config(live, app)?;
    }

    Ok(())
}

fn live_config_for(report: &LiveReport, relative_dir: &str, directory: &Path) -> LiveConfig {
    LiveConfig {
        is_on: true,
        single_instance: true,
        pid: report.pid,
        port: Some(report.port),
        live_url: Some(live_url(report.port, relative_dir, directory)),
        pm2_instance_name: report.pm2_instance_name.clone(),
        log_out: Some(report.log_out.clone()),
        log_err: Some(report.log_err.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appconfig::{AppConfig, WorkspaceConfig};
    use crate::block::{Block, BlockConfig, BlockGroup};
    use crate::context::{EnvWarning, StartOpts};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn block(root: &Path, name: &str, language: &str) -> Block {
        Block::new(
            root.join("fns").join(name),
            BlockConfig {
                name: name.into(),
                block_type: BlockType::Function,
                language: language.into(),
                middlewares: Vec::new(),
            },
        )
    }

    #[test]
    fn url_uses_the_relative_directory() {
        assert_eq!(
            live_url(5000, "fns/auth", Path::new("/work/app/fns/auth")),
            "localhost:5000/fns/auth"
        );
    }

    #[test]
    fn url_falls_back_to_the_base_directory_name() {
        assert_eq!(
            live_url(5000, "", Path::new("/work/app/auth")),
            "localhost:5000/auth"
        );
    }

    #[test]
    fn only_node_function_blocks_are_marked_live() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let mut ctx = StartContext {
            cmd_opts: StartOpts::default(),
            cwd: root.to_path_buf(),
            app: AppConfig {
                cwd: root.to_path_buf(),
                workspace: WorkspaceConfig {
                    name: "todo".into(),
                    blocks: Vec::new(),
                    sub_packages: Vec::new(),
                },
            },
            package_name: "todo".into(),
            sub_packages: Vec::new(),
            block_groups: vec![BlockGroup {
                group_type: BlockType::Function,
                blocks: vec![block(root, "auth", "nodejs"), block(root, "native", "go")],
            }],
            middleware_blocks: Vec::new(),
            env_warning: EnvWarning::default(),
        };

        let report = LiveReport {
            pid: Some(42),
            port: 5000,
            pm2_instance_name: None,
            log_out: root.join("out.log"),
            log_err: root.join("err.log"),
        };
        report_all(&mut ctx, &report).unwrap();

        let raw = std::fs::read_to_string(ctx.app.live_state_path()).unwrap();
        let state: BTreeMap<String, LiveConfig> = serde_json::from_str(&raw).unwrap();
        // The emulator never mounts the non-nodejs block.
        assert!(state.contains_key("auth"));
        assert!(!state.contains_key("native"));
        assert_eq!(state["auth"].port, Some(5000));
    }
}
