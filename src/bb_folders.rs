use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Hidden workspace folder every bb-dev managed project carries.
pub const BB_FOLDER: &str = "._bb_";
pub const FUNCTIONS_EMULATOR_FOLDER: &str = "functions_emulator";
pub const FUNCTIONS_LOG_FILE: &str = "functions.log";

/// Persisted process-state file inside the emulator workspace.
pub const EMULATOR_STATE_FILE: &str = ".emconfig.json";

pub fn bb_folder_path(cwd: &Path, name: &str) -> PathBuf {
    cwd.join(BB_FOLDER).join(name)
}

pub fn functions_emulator_path(cwd: &Path) -> PathBuf {
    bb_folder_path(cwd, FUNCTIONS_EMULATOR_FOLDER)
}

pub fn out_log_path(cwd: &Path, file: &str) -> PathBuf {
    cwd.join(BB_FOLDER).join("logs").join("out").join(file)
}

pub fn err_log_path(cwd: &Path, file: &str) -> PathBuf {
    cwd.join(BB_FOLDER).join("logs").join("err").join(file)
}

/// Create the log directories (and the parent `._bb_` folder) on demand.
pub fn ensure_log_dirs(cwd: &Path) -> Result<()> {
    for dir in [
        cwd.join(BB_FOLDER).join("logs").join("out"),
        cwd.join(BB_FOLDER).join("logs").join("err"),
    ] {
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    Ok(())
}
