use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Value as JsonValue, json};

use crate::block::BlockType;

/// Flattened per-block metadata the emulator workspace is generated from.
#[derive(Debug, Clone, Serialize)]
pub struct BlockEmulateData {
    pub name: String,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    pub directory: PathBuf,
    pub middlewares: Vec<String>,
    pub relative_directory: String,
}

/// Route-keyed view of the blocks one emulator run serves. Keys are relative
/// paths and must be unique: two blocks resolving to the same mount point is
/// an input defect, rejected instead of silently overwritten.
#[derive(Debug, Default)]
pub struct EmulatorContext {
    entries: IndexMap<String, BlockEmulateData>,
}

impl EmulatorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, data: BlockEmulateData) -> Result<()> {
        let key = data.relative_directory.clone();
        if let Some(existing) = self.entries.get(&key) {
            bail!(
                "blocks `{}` and `{}` both resolve to the route `/{}`; block mount points must be unique",
                existing.name,
                data.name,
                key
            );
        }
        self.entries.insert(key, data);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BlockEmulateData)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Create the workspace folder and its base `package.json` if absent. The
/// manifest is preserved across runs so merged dependencies survive.
pub fn ensure_workspace(em_path: &Path) -> Result<()> {
    fs::create_dir_all(em_path)
        .with_context(|| format!("failed to create emulator workspace {}", em_path.display()))?;
    let manifest = em_path.join("package.json");
    if manifest.exists() {
        return Ok(());
    }
    let base = json!({
        "name": "bb-functions-emulator",
        "version": "1.0.0",
        "private": true,
        "main": "index.js",
        "dependencies": {
            "express": "^4.18.2"
        }
    });
    fs::write(&manifest, serde_json::to_string_pretty(&base)?)
        .with_context(|| format!("failed to write {}", manifest.display()))?;
    Ok(())
}

/// Single-instance build: fold every block's declared dependencies into the
/// emulator manifest so one install serves all blocks. On a version conflict
/// the first declaration wins.
pub fn merge_single_build_manifest(em_path: &Path, block_dirs: &[PathBuf]) -> Result<()> {
    let manifest_path = em_path.join("package.json");
    let raw = fs::read_to_string(&manifest_path)
        .with_context(|| format!("failed to read {}", manifest_path.display()))?;
    let mut manifest: JsonValue = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", manifest_path.display()))?;

    let deps = manifest
        .as_object_mut()
        .and_then(|m| {
            m.entry("dependencies")
                .or_insert_with(|| json!({}))
                .as_object_mut()
        })
        .context("emulator package.json has a non-object `dependencies` field")?;

    for dir in block_dirs {
        let block_manifest = dir.join("package.json");
        let raw = match fs::read_to_string(&block_manifest) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read {}", block_manifest.display()));
            }
        };
        let block: JsonValue = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", block_manifest.display()))?;
        if let Some(block_deps) = block.get("dependencies").and_then(JsonValue::as_object) {
            for (name, version) in block_deps {
                deps.entry(name.clone()).or_insert(version.clone());
            }
        }
    }

    fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)
        .with_context(|| format!("failed to write {}", manifest_path.display()))?;
    Ok(())
}

/// Materialize the emulator entry point: one process mounting every function
/// block at its relative path, per-block middlewares on the route, middleware
/// blocks applied globally. Any write failure is fatal to the orchestration.
pub fn generate_workspace(
    em_path: &Path,
    context: &EmulatorContext,
    middleware_blocks: &IndexMap<String, BlockEmulateData>,
    port: u16,
    api_docs: bool,
) -> Result<()> {
    ensure_workspace(em_path)?;

    let routes: IndexMap<&String, JsonValue> = context
        .iter()
        .map(|(route, data)| {
            (
                route,
                json!({
                    "name": data.name,
                    "directory": data.directory,
                    "middlewares": data.middlewares,
                }),
            )
        })
        .collect();
    let middlewares: IndexMap<&String, JsonValue> = middleware_blocks
        .iter()
        .map(|(name, data)| (name, json!({ "directory": data.directory })))
        .collect();

    let entry = render_entry_point(
        &serde_json::to_string_pretty(&routes)?,
        &serde_json::to_string_pretty(&middlewares)?,
        port,
        api_docs,
    );
    let entry_path = em_path.join("index.js");
    fs::write(&entry_path, entry)
        .with_context(|| format!("failed to write {}", entry_path.display()))?;
    Ok(())
}

fn render_entry_point(routes: &str, middlewares: &str, port: u16, api_docs: bool) -> String {
    let api_docs_route = if api_docs {
        "\napp.get('/api-docs', (_req, res) => res.json({ routes: Object.keys(routes) }))\n"
    } else {
        ""
    };
    format!(
        r#"// Generated by bb-dev. Do not edit; regenerated on every start.
const express = require('express')

const port = {port}
const routes = {routes}
const middlewares = {middlewares}

const app = express()
app.use(express.json())

const loadMiddleware = (name) => {{
  const entry = middlewares[name]
  if (!entry) throw new Error(`unknown middleware: ${{name}}`)
  return require(entry.directory)
}}

// Middleware blocks apply to every route.
for (const name of Object.keys(middlewares)) {{
  app.use(loadMiddleware(name))
}}

for (const [route, block] of Object.entries(routes)) {{
  const stack = (block.middlewares || []).map(loadMiddleware)
  app.all(`/${{route}}`, ...stack, async (req, res, next) => {{
    try {{
      const handler = require(block.directory)
      await handler(req, res, next)
    }} catch (err) {{
      next(err)
    }}
  }})
}}

app.get('/health', (_req, res) => res.json({{ ok: true }}))
{api_docs_route}
app.listen(port, () => console.log(`functions emulator listening on http://localhost:${{port}}`))
"#
    )
}
