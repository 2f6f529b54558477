use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::context::EnvWarning;

/// Which generated env file a sync call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvScope {
    Function,
    View,
}

impl EnvScope {
    pub fn as_str(self) -> &'static str {
        match self {
            EnvScope::Function => "function",
            EnvScope::View => "view",
        }
    }
}

/// Result of one upsert call: the merged key set plus the warning entries for
/// keys that remain required-but-unset.
#[derive(Debug)]
pub struct EnvUpsert {
    pub env: BTreeMap<String, String>,
    pub warning: EnvWarning,
}

/// Namespace prefix for generated env keys: the uppercased package name.
pub fn env_prefix(package_name: &str) -> String {
    package_name.to_uppercase()
}

pub fn env_key(prefix: &str, suffix: &str) -> String {
    format!("BB_{prefix}_{suffix}")
}

/// Reachable URL for a package behind the shared emulator port. The relative
/// path is empty for the root package.
pub fn function_url(port: u16, relative_path: &str) -> String {
    if relative_path.is_empty() {
        format!("http://localhost:{port}")
    } else {
        format!("http://localhost:{port}/{relative_path}")
    }
}

/// `.env.<scope>` at the workspace root, with an optional environment
/// qualifier (`.env.function.staging`).
pub fn env_file_path(cwd: &Path, scope: EnvScope, environment: Option<&str>) -> PathBuf {
    match environment {
        Some(env) if !env.is_empty() => cwd.join(format!(".env.{}.{env}", scope.as_str())),
        _ => cwd.join(format!(".env.{}", scope.as_str())),
    }
}

/// Parse a dotenv-style file into a map. A missing file reads as empty.
pub fn read_env(path: &Path) -> Result<BTreeMap<String, String>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    Ok(parse_env(&raw))
}

fn parse_env(raw: &str) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        env.insert(key.trim().to_string(), value.to_string());
    }
    env
}

/// Key of a `KEY=VALUE` line; `None` for blanks, comments, and broken lines.
fn env_line_key(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    line.split_once('=').map(|(key, _)| key.trim())
}

/// Merge `new_values` into the target env file, write it back, and report
/// every declared `BB_<PREFIX>_*` key that is still unset. Only lines whose
/// key is being updated are rewritten; comments, ordering, and the formatting
/// of every other line are kept as found.
pub fn upsert_env(
    cwd: &Path,
    scope: EnvScope,
    new_values: &BTreeMap<String, String>,
    environment: Option<&str>,
    prefixes: &[String],
) -> Result<EnvUpsert> {
    let path = env_file_path(cwd, scope, environment);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };

    let mut replaced: BTreeSet<String> = BTreeSet::new();
    let mut rendered = String::new();
    for line in raw.lines() {
        match env_line_key(line).and_then(|key| new_values.get_key_value(key)) {
            Some((key, value)) => {
                rendered.push_str(key);
                rendered.push('=');
                rendered.push_str(value);
                replaced.insert(key.clone());
            }
            None => rendered.push_str(line),
        }
        rendered.push('\n');
    }
    for (key, value) in new_values {
        if replaced.contains(key) {
            continue;
        }
        rendered.push_str(key);
        rendered.push('=');
        rendered.push_str(value);
        rendered.push('\n');
    }
    fs::write(&path, rendered).with_context(|| format!("failed to write {}", path.display()))?;

    let mut env = parse_env(&raw);
    for (key, value) in new_values {
        env.insert(key.clone(), value.clone());
    }

    let mut warning = EnvWarning::default();
    for (key, value) in &env {
        if !value.is_empty() {
            continue;
        }
        if let Some(prefix) = prefixes
            .iter()
            .find(|prefix| key.starts_with(&format!("BB_{prefix}_")))
        {
            warning.keys.push(key.clone());
            if !warning.prefixes.contains(prefix) {
                warning.prefixes.push(prefix.clone());
            }
        }
    }

    Ok(EnvUpsert { env, warning })
}

/// Truthy check for toggles like `BB_<PREFIX>_SWAGGER_ENABLE`.
pub fn is_enabled(value: Option<&String>) -> bool {
    matches!(
        value.map(String::as_str),
        Some("1") | Some("true") | Some("TRUE") | Some("yes")
    )
}
