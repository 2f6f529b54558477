use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::Deserialize;

/// Headless configuration for bb-dev. Everything here is optional; the CLI
/// works without a config file at all.
#[derive(Debug, Default, Deserialize)]
pub struct BbConfig {
    #[serde(default)]
    pub defaults: DefaultsSection,
}

#[derive(Debug, Default, Deserialize)]
pub struct DefaultsSection {
    /// Override for the dependency install command (e.g. `pnpm install --frozen-lockfile`).
    pub installer: Option<String>,
    /// Default pm2 instance name, superseded by the BB_PM2_NAME env var.
    pub pm2_name: Option<String>,
    /// Default target environment for env file resolution.
    pub environment: Option<String>,
}

static HEADLESS: Lazy<BbConfig> = Lazy::new(|| load().unwrap_or_default());

/// Lazily loaded process-wide config, mirroring the headless config store the
/// start flow reads without prompting.
pub fn headless() -> &'static BbConfig {
    &HEADLESS
}

pub fn load() -> Result<BbConfig> {
    let path_override = std::env::var("BB_DEV_CONFIG").ok();
    load_from(path_override.as_deref())
}

pub fn load_from(path_override: Option<&str>) -> Result<BbConfig> {
    let Some(path) = config_path_override(path_override) else {
        return Ok(BbConfig::default());
    };

    if !path.exists() {
        return Ok(BbConfig::default());
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    let config: BbConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config at {}", path.display()))?;
    Ok(config)
}

fn config_path_override(path_override: Option<&str>) -> Option<PathBuf> {
    if let Some(raw) = path_override {
        return Some(PathBuf::from(raw));
    }
    config_path()
}

pub fn config_path() -> Option<PathBuf> {
    // Prefer the XDG-style config path, but fall back to legacy ~/.bb/config.toml.
    if let Some(mut dir) = dirs::config_dir() {
        dir.push("bb-dev");
        dir.push("config.toml");
        if dir.exists() {
            return Some(dir);
        }
    }
    dirs::home_dir().map(|mut home| {
        home.push(".bb");
        home.push("config.toml");
        home
    })
}

/// pm2 instance name override: env var wins over the config file.
pub fn pm2_name_override() -> Option<String> {
    std::env::var("BB_PM2_NAME")
        .ok()
        .filter(|name| !name.is_empty())
        .or_else(|| headless().defaults.pm2_name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        let config = load_from(Some(path.to_str().unwrap())).unwrap();
        assert!(config.defaults.installer.is_none());
        assert!(config.defaults.pm2_name.is_none());
    }

    #[test]
    fn parses_defaults_section() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            r#"
[defaults]
installer = "pnpm install"
pm2_name = "bb-functions"
"#,
        )
        .unwrap();
        let config = load_from(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.defaults.installer.as_deref(), Some("pnpm install"));
        assert_eq!(config.defaults.pm2_name.as_deref(), Some("bb-functions"));
    }
}
