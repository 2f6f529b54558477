use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::{info, warn};

use crate::bb_folders::{self, FUNCTIONS_LOG_FILE};
use crate::block::BlockType;
use crate::config;
use crate::context::StartContext;
use crate::emulator::{self, BlockEmulateData, EmulatorContext};
use crate::envsync::{self, EnvScope};
use crate::installer::{self, InstallTarget};
use crate::live::{self, LiveReport};
use crate::package_manager::node_package_installer;
use crate::pipeline::Subscriber;
use crate::supervisor::{SpawnStrategy, Supervisor};

/// Read-only snapshot of one block, captured up front so the orchestration can
/// borrow the context mutably later without re-walking the groups.
#[derive(Debug, Clone)]
struct BlockView {
    name: String,
    directory: PathBuf,
    middlewares: Vec<String>,
    relative_directory: String,
    port: Option<u16>,
}

/// Orchestrates the node function blocks into one running emulator process:
/// merged or isolated installs, env sync, workspace generation, supervised
/// spawn, and live-state write-back. Registered on `before_start`.
pub struct HandleFunctionStart;

#[async_trait]
impl Subscriber for HandleFunctionStart {
    fn reads(&self) -> &'static [&'static str] {
        &[
            "cmd_opts",
            "cwd",
            "package_name",
            "sub_packages",
            "block_groups",
            "middleware_blocks",
        ]
    }

    fn writes(&self) -> &'static [&'static str] {
        &[
            "block_groups (port reservation, live state)",
            "middleware_blocks (live state)",
            "env_warning",
        ]
    }

    async fn call(&self, ctx: &mut StartContext) -> Result<()> {
        if let Some(filter) = ctx.cmd_opts.block_type
            && filter != BlockType::Function
        {
            return Ok(());
        }

        let fn_views = snapshot(ctx, BlockType::Function);
        let shared_views = snapshot(ctx, BlockType::SharedFn);
        if fn_views.is_empty() {
            return Ok(());
        }

        let em_path = bb_folders::functions_emulator_path(&ctx.cwd);
        bb_folders::ensure_log_dirs(&ctx.cwd)?;
        let log_out = bb_folders::out_log_path(&ctx.cwd, FUNCTIONS_LOG_FILE);
        let log_err = bb_folders::err_log_path(&ctx.cwd, FUNCTIONS_LOG_FILE);

        let mut em_ctx = EmulatorContext::new();
        for view in &fn_views {
            em_ctx.insert(BlockEmulateData {
                name: view.name.clone(),
                block_type: BlockType::Function,
                directory: view.directory.clone(),
                middlewares: view.middlewares.clone(),
                relative_directory: view.relative_directory.clone(),
            })?;
        }
        let mut middleware_map: IndexMap<String, BlockEmulateData> = IndexMap::new();
        for block in &ctx.middleware_blocks {
            middleware_map.insert(
                block.name().to_string(),
                BlockEmulateData {
                    name: block.name().to_string(),
                    block_type: BlockType::Middleware,
                    directory: block.directory.clone(),
                    middlewares: Vec::new(),
                    relative_directory: block.relative_directory(&ctx.cwd),
                },
            );
        }

        // Port-dependent metadata is derived from this value; the reservation
        // itself is only released right before the spawn.
        let port = fn_views[0]
            .port
            .or(ctx.cmd_opts.port)
            .unwrap_or(5000);

        info!(blocks = fn_views.len(), port, "building function emulator");
        emulator::ensure_workspace(&em_path)?;

        let installer = node_package_installer(&ctx.cwd);
        if ctx.cmd_opts.single_instance {
            let mut dirs: Vec<PathBuf> =
                fn_views.iter().map(|view| view.directory.clone()).collect();
            dirs.extend(shared_views.iter().map(|view| view.directory.clone()));
            emulator::merge_single_build_manifest(&em_path, &dirs)?;
            installer::install_merged(&em_path, &installer.command).await?;
        } else {
            let targets = fn_views
                .iter()
                .map(|view| InstallTarget {
                    block_name: view.name.clone(),
                    directory: view.directory.clone(),
                })
                .collect();
            let report = installer::install_isolated(targets, installer.command.clone()).await;
            for outcome in report.iter().filter(|outcome| !outcome.succeeded) {
                warn!(
                    block = %outcome.block_name,
                    error = outcome.error.as_deref().unwrap_or("unknown"),
                    "✗ error installing dependencies"
                );
            }
        }

        // Env sync must complete before the workspace is generated: the
        // emulator embeds the URLs derived here.
        let environment = ctx
            .cmd_opts
            .environment
            .clone()
            .or_else(|| config::headless().defaults.environment.clone());
        let current_prefix = envsync::env_prefix(&ctx.package_name);
        let mut prefixes = vec![current_prefix.clone()];
        let mut update_values = BTreeMap::new();
        update_values.insert(
            envsync::env_key(&current_prefix, "FUNCTION_URL"),
            envsync::function_url(port, ""),
        );
        for sub in &ctx.sub_packages {
            let prefix = envsync::env_prefix(&sub.name);
            let relative = sub
                .directory
                .strip_prefix(&ctx.cwd)
                .unwrap_or(&sub.directory)
                .to_string_lossy()
                .to_string();
            update_values.insert(
                envsync::env_key(&prefix, "FUNCTION_URL"),
                envsync::function_url(port, &relative),
            );
            prefixes.push(prefix);
        }

        let fn_env = envsync::upsert_env(
            &ctx.cwd,
            EnvScope::Function,
            &BTreeMap::new(),
            environment.as_deref(),
            &prefixes,
        )?;
        let view_env = envsync::upsert_env(
            &ctx.cwd,
            EnvScope::View,
            &update_values,
            environment.as_deref(),
            &prefixes,
        )?;
        ctx.env_warning.extend(fn_env.warning);
        ctx.env_warning.extend(view_env.warning);

        let api_docs = envsync::is_enabled(
            fn_env
                .env
                .get(&envsync::env_key(&current_prefix, "SWAGGER_ENABLE")),
        );

        emulator::generate_workspace(&em_path, &em_ctx, &middleware_map, port, api_docs)
            .context("function emulator build failed")?;

        let mut supervisor = Supervisor::new(
            em_path.clone(),
            log_out.clone(),
            log_err.clone(),
            ctx.cwd.clone(),
        );
        let primary_name = fn_views[0].name.clone();
        let reservation = ctx
            .group_mut(BlockType::Function)
            .and_then(|group| {
                group
                    .blocks
                    .iter_mut()
                    .find(|block| block.name() == primary_name)
            })
            .and_then(|block| block.reservation.as_mut());
        supervisor.release_port(reservation)?;

        let strategy = if ctx.cmd_opts.pm2 {
            let fallback_instance_name = config::pm2_name_override()
                .or_else(|| ctx.cmd_opts.block_name.clone())
                .unwrap_or_else(|| ctx.package_name.clone());
            SpawnStrategy::Pm2 {
                project_root: ctx.cwd.clone(),
                fallback_instance_name,
            }
        } else {
            SpawnStrategy::Direct {
                command: vec!["node".to_string(), "index.js".to_string()],
            }
        };
        let spawned = supervisor.spawn(strategy)?;

        let report = LiveReport {
            pid: spawned.handle.pid,
            port,
            pm2_instance_name: spawned.pm2_instance_name.clone(),
            log_out,
            log_err,
        };
        live::report_all(ctx, &report)?;

        // TypeScript blocks get a detached watcher companion alongside the
        // directly spawned emulator.
        if !ctx.cmd_opts.pm2 {
            let ts_dirs: Vec<PathBuf> = fn_views
                .iter()
                .filter(|view| view.directory.join("index.ts").exists())
                .map(|view| view.directory.clone())
                .collect();
            if !ts_dirs.is_empty() {
                supervisor.spawn_watcher(&ts_dirs)?;
            }
        }

        println!("✓ Function emulator started at http://localhost:{port}");
        Ok(())
    }
}

fn snapshot(ctx: &StartContext, group_type: BlockType) -> Vec<BlockView> {
    let Some(group) = ctx.group(group_type) else {
        return Vec::new();
    };
    group
        .blocks
        .iter()
        .filter(|block| block.is_node())
        .map(|block| BlockView {
            name: block.name().to_string(),
            directory: block.directory.clone(),
            middlewares: block.config.middlewares.clone(),
            relative_directory: block.relative_directory(&ctx.cwd),
            port: block.available_port(),
        })
        .collect()
}
