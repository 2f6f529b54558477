use std::path::Path;

use crate::config;

/// Resolved dependency install invocation for the ambient project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInstaller {
    pub name: &'static str,
    pub command: String,
}

/// Pick the node package installer for `dir`: a headless config override wins,
/// then lockfile sniffing (pnpm, yarn), then npm.
pub fn node_package_installer(dir: &Path) -> PackageInstaller {
    if let Some(command) = config::headless().defaults.installer.clone() {
        return PackageInstaller {
            name: "custom",
            command,
        };
    }
    resolve_from_lockfiles(dir)
}

fn resolve_from_lockfiles(dir: &Path) -> PackageInstaller {
    if dir.join("pnpm-lock.yaml").exists() && which::which("pnpm").is_ok() {
        return PackageInstaller {
            name: "pnpm",
            command: "pnpm install".into(),
        };
    }
    if dir.join("yarn.lock").exists() && which::which("yarn").is_ok() {
        return PackageInstaller {
            name: "yarn",
            command: "yarn install".into(),
        };
    }
    PackageInstaller {
        name: "npm",
        command: "npm install".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_to_npm_without_lockfiles() {
        let temp = TempDir::new().unwrap();
        let installer = resolve_from_lockfiles(temp.path());
        assert_eq!(installer.name, "npm");
        assert_eq!(installer.command, "npm install");
    }
}
