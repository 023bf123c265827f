//! `.claude-plugin/marketplace.json` parsing and sub-package root resolution.

use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use crate::{
    error::{Error, Result},
    layout::{CATEGORY_DIRS, LEGACY_PLUGINS_DIR, is_single_component},
};

/// Manifest location relative to the source root.
pub const MANIFEST_PATH: &str = ".claude-plugin/marketplace.json";

#[derive(Debug, Deserialize)]
struct MarketplaceJson {
    #[serde(default)]
    name: Option<String>,
    plugins: Vec<PluginJson>,
}

#[derive(Debug, Deserialize)]
struct PluginJson {
    name: String,
    #[serde(default)]
    source: Option<PluginSource>,
}

/// `source` must be a path string; anything else (objects describing remote
/// plugin sources, numbers, ...) is rejected.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PluginSource {
    Path(String),
    Other(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marketplace {
    pub name: Option<String>,
    pub plugins: Vec<PluginSpec>,
}

/// One sub-package entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSpec {
    pub name: String,
    /// Source-root-relative path as written in the manifest.
    pub source: String,
}

/// Read and validate the manifest under `source_root`.
pub fn parse_marketplace(source_root: &Path) -> Result<Marketplace> {
    let path = source_root.join(MANIFEST_PATH);
    if !path.is_file() {
        return Err(Error::acquisition(
            source_root.display().to_string(),
            format!("no {MANIFEST_PATH} found"),
        ));
    }
    let raw = std::fs::read_to_string(&path)?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| Error::invalid_manifest(&path, format!("failed to parse JSON: {e}")))?;
    if !value.get("plugins").is_some_and(serde_json::Value::is_array) {
        return Err(Error::invalid_manifest(&path, "plugins array is missing"));
    }
    let manifest: MarketplaceJson =
        serde_json::from_value(value).map_err(|e| Error::invalid_manifest(&path, e.to_string()))?;

    let mut plugins = Vec::with_capacity(manifest.plugins.len());
    for plugin in manifest.plugins {
        let source = match plugin.source {
            None => "./".to_string(),
            Some(PluginSource::Path(source)) => source,
            Some(PluginSource::Other(_)) => {
                return Err(Error::invalid_subpackage(
                    &plugin.name,
                    "<non-string>",
                    "expected a path string",
                ));
            },
        };
        plugins.push(PluginSpec {
            name: plugin.name,
            source,
        });
    }

    let name = manifest.name.filter(|n| !n.trim().is_empty());
    if let Some(name) = &name
        && !is_valid_identity(name)
    {
        return Err(Error::invalid_manifest(
            &path,
            format!("marketplace name {name:?} must be a single word path component"),
        ));
    }
    Ok(Marketplace { name, plugins })
}

/// A source identity doubles as marker content and registry key.
#[must_use]
pub fn is_valid_identity(name: &str) -> bool {
    is_single_component(name) && !name.contains(char::is_whitespace)
}

impl PluginSpec {
    /// Resolve the sub-package root inside `source_root`.
    ///
    /// Returns the absolute root and its `/`-separated path relative to the
    /// source root (`""` for the root itself).
    pub fn resolve_root(&self, source_root: &Path) -> Result<(PathBuf, String)> {
        let invalid = |reason: &str| Error::invalid_subpackage(&self.name, &self.source, reason);

        if !is_single_component(&self.name)
            || CATEGORY_DIRS.contains(&self.name.as_str())
            || self.name == LEGACY_PLUGINS_DIR
        {
            return Err(invalid("plugin name must be a single, non-reserved path component"));
        }

        let trimmed = self.source.trim();
        let relative = Path::new(trimmed);
        if relative.has_root() {
            return Err(invalid("path must be relative to the marketplace root"));
        }
        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {},
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(invalid("path must stay within marketplace root"));
                },
            }
        }

        let root = parts.iter().fold(source_root.to_path_buf(), |acc, p| acc.join(p));
        let canonical_source = std::fs::canonicalize(source_root)?;
        let Ok(canonical_root) = std::fs::canonicalize(&root) else {
            return Err(invalid("path does not exist"));
        };
        if !canonical_root.starts_with(&canonical_source) {
            return Err(invalid("path must stay within marketplace root"));
        }
        if !canonical_root.is_dir() {
            return Err(invalid("path is not a directory"));
        }
        Ok((root, parts.join("/")))
    }
}
