//! Durable record of which source owns which destination paths.

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
};

use {
    chrono::{DateTime, Utc},
    ombc_config::BridgeConfig,
    serde::{Deserialize, Serialize},
    tracing::{debug, warn},
};

use crate::{
    error::Result,
    layout::{Category, LEGACY_REGISTRY_FILE},
};

/// All installations in one project, keyed by source identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    pub installations: BTreeMap<String, RegistryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    /// Origin descriptor the source was installed from.
    pub source: String,
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_filter: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub agents: Vec<String>,
    /// Project-relative sub-package subtrees.
    #[serde(default)]
    pub placed_dirs: Vec<String>,
    #[serde(default = "Utc::now")]
    pub installed_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
    /// Project-relative cache directory from the earlier cache layout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<String>,
}

impl RegistryEntry {
    /// Names this entry owns in `category`.
    #[must_use]
    pub fn names(&self, category: Category) -> &[String] {
        match category {
            Category::Skill => &self.skills,
            Category::Command => &self.commands,
            Category::Agent => &self.agents,
            Category::Subtree => &self.placed_dirs,
        }
    }

    fn names_mut(&mut self, category: Category) -> &mut Vec<String> {
        match category {
            Category::Skill => &mut self.skills,
            Category::Command => &mut self.commands,
            Category::Agent => &mut self.agents,
            Category::Subtree => &mut self.placed_dirs,
        }
    }
}

impl Registry {
    /// Name → owning source for one category across every installation.
    #[must_use]
    pub fn owners(&self, category: Category) -> HashMap<String, String> {
        let mut owners = HashMap::new();
        for (source, entry) in &self.installations {
            for name in entry.names(category) {
                owners.insert(name.clone(), source.clone());
            }
        }
        owners
    }

    /// Drop `name` from `owner`'s entry after another source took it over.
    pub fn forget(&mut self, owner: &str, category: Category, name: &str) {
        if let Some(entry) = self.installations.get_mut(owner) {
            entry.names_mut(category).retain(|n| n != name);
        }
    }
}

/// Registry persistence with atomic writes and legacy fallback.
pub struct RegistryStore {
    path: PathBuf,
    legacy_path: PathBuf,
}

impl RegistryStore {
    #[must_use]
    pub fn new(project_root: &Path, config: &BridgeConfig) -> Self {
        let managed = project_root.join(&config.managed_dir);
        Self {
            path: managed.join(&config.registry_file),
            legacy_path: managed.join(LEGACY_REGISTRY_FILE),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the registry. Missing, unreadable, or malformed files fall back
    /// to the legacy file and then to an empty registry.
    #[must_use]
    pub fn load(&self) -> Registry {
        for path in [&self.path, &self.legacy_path] {
            if let Some(registry) = read_registry(path) {
                return registry;
            }
        }
        Registry::default()
    }

    /// Save atomically via temp file + rename, then drop the legacy file.
    pub fn save(&self, registry: &Registry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension(format!("json.tmp-{}", std::process::id()));
        let mut data = serde_json::to_string_pretty(registry)?;
        data.push('\n');
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        if self.legacy_path.exists() {
            std::fs::remove_file(&self.legacy_path)?;
        }
        debug!(path = %self.path.display(), "saved registry");
        Ok(())
    }
}

fn read_registry(path: &Path) -> Option<Registry> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read registry, treating as empty");
            return None;
        },
    };
    match serde_json::from_str(&data) {
        Ok(registry) => Some(registry),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt registry, treating as empty");
            None
        },
    }
}
