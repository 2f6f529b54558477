use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bb_folders::EMULATOR_STATE_FILE;
use crate::block::PortReservation;

/// Supervisor progress within one orchestration run. `Running` is terminal; a
/// later run drives a fresh instance and supersedes the persisted handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    ReservingPort,
    PortReleased,
    Spawning,
    Running,
}

impl SupervisorState {
    pub fn as_str(self) -> &'static str {
        match self {
            SupervisorState::Idle => "idle",
            SupervisorState::ReservingPort => "reserving-port",
            SupervisorState::PortReleased => "port-released",
            SupervisorState::Spawning => "spawning",
            SupervisorState::Running => "running",
        }
    }
}

/// Persisted view of the spawned emulator. Written to `.emconfig.json` in the
/// workspace after every (re)start; latest write is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessHandle {
    /// None when pm2 owns the process lifecycle.
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watcher_pid: Option<u32>,
}

#[derive(Debug)]
pub enum SpawnStrategy {
    /// Delegate lifecycle to pm2. `project_root` is probed for a `pm2.json`;
    /// its first app name wins over `fallback_instance_name`.
    Pm2 {
        project_root: PathBuf,
        fallback_instance_name: String,
    },
    /// Launch the entry point directly as a detached process.
    Direct { command: Vec<String> },
}

#[derive(Debug)]
pub struct SpawnedEmulator {
    pub handle: ProcessHandle,
    pub pm2_instance_name: Option<String>,
}

/// Minimal slice of a pm2 config file we care about.
#[derive(Debug, Deserialize)]
struct Pm2Config {
    #[serde(default)]
    apps: Vec<Pm2App>,
}

#[derive(Debug, Deserialize)]
struct Pm2App {
    name: Option<String>,
}

/// Drives `Idle → ReservingPort → PortReleased → Spawning → Running` for one
/// emulator workspace, persisting the process handle on every transition into
/// `Running`.
#[derive(Debug)]
pub struct Supervisor {
    state: SupervisorState,
    em_path: PathBuf,
    log_out: PathBuf,
    log_err: PathBuf,
    parent_path: PathBuf,
    handle: Option<ProcessHandle>,
}

impl Supervisor {
    pub fn new(em_path: PathBuf, log_out: PathBuf, log_err: PathBuf, parent_path: PathBuf) -> Self {
        Self {
            state: SupervisorState::Idle,
            em_path,
            log_out,
            log_err,
            parent_path,
            handle: None,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn state_file_path(&self) -> PathBuf {
        self.em_path.join(EMULATOR_STATE_FILE)
    }

    fn transition(&mut self, from: SupervisorState, to: SupervisorState) -> Result<()> {
        if self.state != from {
            bail!(
                "invalid supervisor transition {} -> {} (currently {})",
                from.as_str(),
                to.as_str(),
                self.state.as_str()
            );
        }
        self.state = to;
        Ok(())
    }

    /// Release the primary block's reserved port immediately before the spawn
    /// binds it. All port-dependent metadata must already be captured. `None`
    /// still advances the state machine (nothing was reserved for this run).
    pub fn release_port(&mut self, reservation: Option<&mut PortReservation>) -> Result<()> {
        self.transition(SupervisorState::Idle, SupervisorState::ReservingPort)?;
        if let Some(reservation) = reservation {
            reservation.release();
        }
        self.transition(SupervisorState::ReservingPort, SupervisorState::PortReleased)
    }

    /// Spawn the emulator and persist its handle, overwriting any prior state
    /// file content. Fatal on any spawn failure; the prior state file is left
    /// intact in that case.
    pub fn spawn(&mut self, strategy: SpawnStrategy) -> Result<SpawnedEmulator> {
        self.transition(SupervisorState::PortReleased, SupervisorState::Spawning)?;

        let spawned = match strategy {
            SpawnStrategy::Pm2 {
                project_root,
                fallback_instance_name,
            } => self.spawn_pm2(&project_root, fallback_instance_name),
            SpawnStrategy::Direct { command } => self.spawn_direct(&command),
        };
        let spawned = match spawned {
            Ok(spawned) => spawned,
            Err(err) => {
                // Leave the state machine parked; a new run starts fresh.
                return Err(err);
            }
        };

        self.write_state(&spawned.handle)?;
        self.handle = Some(spawned.handle.clone());
        self.transition(SupervisorState::Spawning, SupervisorState::Running)?;
        Ok(spawned)
    }

    fn spawn_pm2(&self, project_root: &Path, fallback_name: String) -> Result<SpawnedEmulator> {
        which::which("pm2")
            .map_err(|_| anyhow!("pm2 is not installed; install pm2 and try again"))?;

        let pm2_config_path = project_root.join("pm2.json");
        let (args, instance_name) = if pm2_config_path.exists() {
            let raw = fs::read_to_string(&pm2_config_path)
                .with_context(|| format!("failed to read {}", pm2_config_path.display()))?;
            let config: Pm2Config = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse {}", pm2_config_path.display()))?;
            let name = config
                .apps
                .first()
                .and_then(|app| app.name.clone())
                .unwrap_or(fallback_name);
            (
                vec![
                    "start".to_string(),
                    pm2_config_path.to_string_lossy().into_owned(),
                    "-f".to_string(),
                ],
                name,
            )
        } else {
            (
                vec![
                    "start".to_string(),
                    "index.js".to_string(),
                    "-i".to_string(),
                    "max".to_string(),
                    "--name".to_string(),
                    fallback_name.clone(),
                ],
                fallback_name,
            )
        };

        info!(instance = %instance_name, "starting emulator under pm2");
        let status = Command::new("pm2")
            .args(&args)
            .current_dir(&self.em_path)
            .stdin(Stdio::null())
            .stdout(self.open_log(&self.log_out)?)
            .stderr(self.open_log(&self.log_err)?)
            .env("BB_PARENT_PATH", &self.parent_path)
            .status()
            .context("failed to spawn emulator: could not invoke pm2")?;
        if !status.success() {
            bail!("failed to spawn emulator under pm2 (exit status {status})");
        }

        Ok(SpawnedEmulator {
            // pm2 owns the process; no pid to track directly.
            handle: ProcessHandle {
                pid: None,
                watcher_pid: None,
            },
            pm2_instance_name: Some(instance_name),
        })
    }

    fn spawn_direct(&self, command: &[String]) -> Result<SpawnedEmulator> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("failed to spawn emulator: empty command"))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.em_path)
            .stdin(Stdio::null())
            .stdout(self.open_log(&self.log_out)?)
            .stderr(self.open_log(&self.log_err)?)
            .env("BB_PARENT_PATH", &self.parent_path);
        // Own process group: the emulator must outlive this CLI.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn emulator via `{program}`"))?;
        let pid = child.id();
        // Dropping the handle detaches; the CLI exits without waiting.
        drop(child);

        info!(pid, "emulator started");
        Ok(SpawnedEmulator {
            handle: ProcessHandle {
                pid: Some(pid),
                watcher_pid: None,
            },
            pm2_instance_name: None,
        })
    }

    /// Companion file watcher for TypeScript blocks: writes the watcher script
    /// into the workspace, spawns it detached, and rewrites the state file
    /// with the watcher pid.
    pub fn spawn_watcher(&mut self, ts_block_dirs: &[PathBuf]) -> Result<u32> {
        if self.state != SupervisorState::Running {
            bail!(
                "invalid supervisor transition: watcher requires running state (currently {})",
                self.state.as_str()
            );
        }
        let script_path = self.em_path.join("tsWatcher.js");
        fs::write(&script_path, WATCHER_SCRIPT)
            .with_context(|| format!("failed to write {}", script_path.display()))?;

        let mut cmd = Command::new("node");
        cmd.arg(&script_path)
            .args(ts_block_dirs)
            .current_dir(&self.em_path)
            .stdin(Stdio::null())
            .stdout(self.open_log(&self.log_out)?)
            .stderr(self.open_log(&self.log_err)?);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let child = cmd.spawn().context("failed to spawn typescript watcher")?;
        let watcher_pid = child.id();
        drop(child);

        let mut handle = self.handle.clone().unwrap_or(ProcessHandle {
            pid: None,
            watcher_pid: None,
        });
        handle.watcher_pid = Some(watcher_pid);
        self.write_state(&handle)?;
        self.handle = Some(handle);
        Ok(watcher_pid)
    }

    /// Overwrite `.emconfig.json` with the latest handle. Single writer
    /// assumed; last write wins.
    pub fn write_state(&self, handle: &ProcessHandle) -> Result<()> {
        let path = self.state_file_path();
        fs::create_dir_all(&self.em_path)
            .with_context(|| format!("failed to create {}", self.em_path.display()))?;
        fs::write(&path, serde_json::to_string(handle)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    fn open_log(&self, path: &Path) -> Result<File> {
        File::create(path).with_context(|| format!("failed to open log file {}", path.display()))
    }
}

const WATCHER_SCRIPT: &str = r#"// Generated by bb-dev: recompiles TypeScript blocks on change.
const { watch } = require('fs')
const { execSync } = require('child_process')

const dirs = process.argv.slice(2)
for (const dir of dirs) {
  watch(dir, { recursive: true }, (_event, file) => {
    if (!file || !file.endsWith('.ts')) return
    try {
      execSync('npx tsc', { cwd: dir, stdio: 'inherit' })
    } catch (err) {
      console.error(`tsc failed in ${dir}:`, err.message)
    }
  })
}
"#;
