use anyhow::{Context, Result, bail};
use tokio::runtime::Runtime;
use tracing::{error, warn};

use crate::appconfig::AppConfig;
use crate::block::{Block, BlockGroup, BlockType, PortReservation};
use crate::cli::StartArgs;
use crate::context::{EnvWarning, StartContext, StartOpts};
use crate::fn_start::HandleFunctionStart;
use crate::pipeline::{Hook, StartPipeline};

pub fn run(args: &StartArgs) -> Result<()> {
    let rt = Runtime::new().context("failed to start tokio runtime for the start flow")?;
    let result = rt.block_on(run_async(args));
    if let Err(err) = &result {
        error!("start failed: {err:#}");
    }
    result
}

async fn run_async(args: &StartArgs) -> Result<()> {
    let cwd = std::env::current_dir().context("failed to resolve the workspace root")?;
    let app = AppConfig::load(&cwd)?;
    let package_name = app.package_name().to_string();
    let sub_packages = app.sub_packages()?;
    let mut blocks = app.load_blocks()?;

    let opts = StartOpts {
        block_name: args.block_name.clone(),
        block_type: args.block_type.map(Into::into),
        single_instance: args.single_instance,
        environment: args.environment.clone(),
        pm2: args.pm2,
        port: args.port,
    };

    if let Some(name) = &opts.block_name {
        blocks.retain(|block| block.name() == name);
        if blocks.is_empty() {
            bail!("block `{name}` not found in this workspace");
        }
    }

    let (middleware_blocks, block_groups) = group_blocks(blocks, opts.port)?;

    let mut ctx = StartContext {
        cmd_opts: opts,
        cwd,
        app,
        package_name,
        sub_packages,
        block_groups,
        middleware_blocks,
        env_warning: EnvWarning::default(),
    };

    let mut pipeline = StartPipeline::new();
    pipeline.register(
        Hook::BeforeStart,
        "handle-function-start",
        Box::new(HandleFunctionStart),
    );

    for hook in Hook::ALL {
        pipeline.run(hook, &mut ctx).await?;
    }

    if !ctx.env_warning.is_empty() {
        warn!(
            "missing values for env keys: {}",
            ctx.env_warning.keys.join(", ")
        );
    }
    Ok(())
}

/// Partition discovered blocks into start groups, and reserve a port for the
/// primary function block so the emulator's address is stable until spawn.
/// The primary is the first nodejs function block, the same block the
/// orchestrator serves first; reserving on any other block would leave the
/// reservation unreleased.
fn group_blocks(
    blocks: Vec<Block>,
    preferred_port: Option<u16>,
) -> Result<(Vec<Block>, Vec<BlockGroup>)> {
    let mut middleware_blocks = Vec::new();
    let mut groups: Vec<BlockGroup> = [
        BlockType::Function,
        BlockType::SharedFn,
        BlockType::View,
        BlockType::Package,
    ]
    .into_iter()
    .map(|group_type| BlockGroup {
        group_type,
        blocks: Vec::new(),
    })
    .collect();

    for block in blocks {
        if block.config.block_type == BlockType::Middleware {
            middleware_blocks.push(block);
            continue;
        }
        if let Some(group) = groups
            .iter_mut()
            .find(|group| group.group_type == block.config.block_type)
        {
            group.blocks.push(block);
        }
    }

    if let Some(primary) = groups
        .iter_mut()
        .find(|group| group.group_type == BlockType::Function)
        .and_then(|group| group.blocks.iter_mut().find(|block| block.is_node()))
    {
        primary.reservation = Some(PortReservation::take(preferred_port)?);
    }

    Ok((middleware_blocks, groups))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockConfig;
    use std::path::PathBuf;

    fn block(name: &str, block_type: BlockType) -> Block {
        block_in(name, block_type, "nodejs")
    }

    fn block_in(name: &str, block_type: BlockType, language: &str) -> Block {
        Block::new(
            PathBuf::from("/work/app").join(name),
            BlockConfig {
                name: name.into(),
                block_type,
                language: language.into(),
                middlewares: Vec::new(),
            },
        )
    }

    #[test]
    fn groups_blocks_and_reserves_a_port_for_the_primary_function() {
        let blocks = vec![
            block("auth", BlockType::Function),
            block("cors", BlockType::Middleware),
            block("util", BlockType::SharedFn),
            block("billing", BlockType::Function),
        ];
        let (middleware, groups) = group_blocks(blocks, None).unwrap();

        assert_eq!(middleware.len(), 1);
        assert_eq!(middleware[0].name(), "cors");

        let functions = groups
            .iter()
            .find(|g| g.group_type == BlockType::Function)
            .unwrap();
        assert_eq!(functions.blocks.len(), 2);
        assert!(functions.blocks[0].available_port().is_some());
        assert!(functions.blocks[1].available_port().is_none());
    }

    #[test]
    fn reserves_the_port_on_the_first_nodejs_function_block() {
        let blocks = vec![
            block_in("native", BlockType::Function, "go"),
            block("auth", BlockType::Function),
        ];
        let (_, groups) = group_blocks(blocks, None).unwrap();

        let functions = groups
            .iter()
            .find(|g| g.group_type == BlockType::Function)
            .unwrap();
        // The emulator serves the nodejs block, so it carries the reservation.
        assert!(functions.blocks[0].available_port().is_none());
        assert!(functions.blocks[1].available_port().is_some());
    }

    #[test]
    fn no_reservation_without_a_nodejs_function_block() {
        let blocks = vec![block_in("native", BlockType::Function, "go")];
        let (_, groups) = group_blocks(blocks, None).unwrap();
        let functions = groups
            .iter()
            .find(|g| g.group_type == BlockType::Function)
            .unwrap();
        assert!(functions.blocks[0].available_port().is_none());
    }
}
