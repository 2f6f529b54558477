use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::util::process::{CommandSpec, run_captured};

/// One unit of install work in isolated mode.
#[derive(Debug, Clone)]
pub struct InstallTarget {
    pub block_name: String,
    pub directory: PathBuf,
}

/// Per-target install result. Collected into a report; never discarded, even
/// on partial failure.
#[derive(Debug)]
pub struct InstallOutcome {
    pub block_name: String,
    pub directory: PathBuf,
    pub succeeded: bool,
    pub error: Option<String>,
}

/// Single-instance mode: one install against the merged emulator workspace.
/// Failure is fatal — no block can run without the workspace's dependencies.
pub async fn install_merged(workspace: &Path, install_command: &str) -> Result<()> {
    info!(command = install_command, "installing function emulator dependencies");
    let output = run_captured(CommandSpec::shell(install_command).current_dir(workspace)).await?;
    if !output.status.success() {
        bail!(
            "dependency install failed for the function emulator ({}): {}",
            install_command,
            output.stderr_tail()
        );
    }
    Ok(())
}

/// Isolated mode: one install per function block, run concurrently. Every task
/// is joined to completion regardless of individual failures (fan-out/join,
/// never fail-fast); outcomes keep the input order.
pub async fn install_isolated(
    targets: Vec<InstallTarget>,
    install_command: String,
) -> Vec<InstallOutcome> {
    let fallback = targets.clone();
    let mut set = JoinSet::new();
    for (index, target) in targets.into_iter().enumerate() {
        let command = install_command.clone();
        set.spawn(async move {
            let result =
                run_captured(CommandSpec::shell(&command).current_dir(&target.directory)).await;
            let outcome = match result {
                Ok(output) if output.status.success() => InstallOutcome {
                    block_name: target.block_name,
                    directory: target.directory,
                    succeeded: true,
                    error: None,
                },
                Ok(output) => InstallOutcome {
                    block_name: target.block_name,
                    directory: target.directory,
                    succeeded: false,
                    error: Some(output.stderr_tail()),
                },
                Err(err) => InstallOutcome {
                    block_name: target.block_name,
                    directory: target.directory,
                    succeeded: false,
                    error: Some(err.to_string()),
                },
            };
            (index, outcome)
        });
    }

    let mut slots: Vec<Option<InstallOutcome>> = Vec::new();
    slots.resize_with(fallback.len(), || None);
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, outcome)) => slots[index] = Some(outcome),
            // A panicked or cancelled task still owes its block an outcome;
            // the unfilled slot is backfilled below.
            Err(err) => warn!(error = %err, "install task aborted"),
        }
    }
    slots
        .into_iter()
        .zip(fallback)
        .map(|(slot, target)| {
            slot.unwrap_or(InstallOutcome {
                block_name: target.block_name,
                directory: target.directory,
                succeeded: false,
                error: Some("install task aborted before completion".to_string()),
            })
        })
        .collect()
}
