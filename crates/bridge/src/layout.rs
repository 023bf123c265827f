//! Destination layout under the managed root.

use std::path::{Component, Path, PathBuf};

use ombc_config::BridgeConfig;

/// Reserved category directories holding entry documents.
pub const CATEGORY_DIRS: [&str; 3] = ["skills", "commands", "agents"];

/// Marker file name written by earlier releases.
pub const LEGACY_MARKER_FILE: &str = ".my-marketplace-managed";

/// Registry file name written by earlier releases.
pub const LEGACY_REGISTRY_FILE: &str = ".my-marketplace-registry.json";

/// Cache layout of earlier releases, relative to the managed root.
pub const LEGACY_PLUGINS_DIR: &str = "plugins";
pub const LEGACY_CACHE_DIR: &str = "cache";

/// Kind of materialized destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    /// `<managed>/skills/<name>/`, marker-owned.
    Skill,
    /// `<managed>/commands/<name>.md`, registry-owned.
    Command,
    /// `<managed>/agents/<name>.md`, registry-owned.
    Agent,
    /// `<managed>/<subpackage>/`, marker-owned.
    Subtree,
}

impl Category {
    /// Singular label used in conflict messages.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Skill => "skill",
            Self::Command => "command",
            Self::Agent => "agent",
            Self::Subtree => "plugin directory",
        }
    }

    /// Source directory name inside a sub-package, if this is an entry category.
    #[must_use]
    pub fn source_dir(self) -> Option<&'static str> {
        match self {
            Self::Skill => Some("skills"),
            Self::Command => Some("commands"),
            Self::Agent => Some("agents"),
            Self::Subtree => None,
        }
    }

    /// Whether ownership is tracked by the registry instead of a marker file.
    #[must_use]
    pub fn is_flat(self) -> bool {
        matches!(self, Self::Command | Self::Agent)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Resolved destination paths for one project.
#[derive(Debug, Clone)]
pub struct Layout {
    project_root: PathBuf,
    managed_dir: String,
}

impl Layout {
    #[must_use]
    pub fn new(project_root: &Path, config: &BridgeConfig) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            managed_dir: config.managed_dir.clone(),
        }
    }

    #[must_use]
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// `<project>/<managed_dir>`.
    #[must_use]
    pub fn managed_root(&self) -> PathBuf {
        self.project_root.join(&self.managed_dir)
    }

    /// Directory holding the entries of a category (the managed root itself
    /// for sub-package subtrees).
    #[must_use]
    pub fn category_root(&self, category: Category) -> PathBuf {
        match category.source_dir() {
            Some(dir) => self.managed_root().join(dir),
            None => self.managed_root(),
        }
    }

    /// Absolute destination of a named entry.
    #[must_use]
    pub fn destination(&self, category: Category, name: &str) -> PathBuf {
        let root = self.category_root(category);
        if category.is_flat() {
            root.join(format!("{name}.md"))
        } else {
            root.join(name)
        }
    }

    /// Project-relative, forward-slash form of a sub-package subtree path as
    /// recorded in `placedDirs`.
    #[must_use]
    pub fn placed_dir(&self, subpackage: &str) -> String {
        format!("{}/{subpackage}", self.managed_dir)
    }

    /// `<managed>/<subpackage>/`, the prefix rewritten references receive.
    #[must_use]
    pub fn destination_prefix(&self, subpackage: &str) -> String {
        format!("{}/{subpackage}/", self.managed_dir)
    }

    /// Resolve a project-relative path recorded in the registry, refusing
    /// anything that would land outside the managed root.
    #[must_use]
    pub fn resolve_recorded(&self, relative: &str) -> Option<PathBuf> {
        let parts = plain_components(relative)?;
        (parts.len() > 1 && parts[0] == self.managed_dir)
            .then(|| self.project_root.join(relative))
    }

    /// Resolve a recorded `placedDirs` entry. Older layouts placed subtrees
    /// directly in the project root, so any path below the project is
    /// accepted except the managed root itself; callers remove it only when
    /// its marker allows.
    #[must_use]
    pub fn resolve_placed(&self, relative: &str) -> Option<PathBuf> {
        let parts = plain_components(relative)?;
        (parts != [self.managed_dir.as_str()]).then(|| self.project_root.join(relative))
    }

    /// Legacy `<managed>/plugins/cache`.
    #[must_use]
    pub fn legacy_cache_root(&self) -> PathBuf {
        self.managed_root()
            .join(LEGACY_PLUGINS_DIR)
            .join(LEGACY_CACHE_DIR)
    }
}

/// The normal components of a relative path; `None` if it is empty, absolute
/// or climbs with `..`.
fn plain_components(relative: &str) -> Option<Vec<&str>> {
    let mut parts = Vec::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {},
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!parts.is_empty()).then_some(parts)
}

/// Whether `name` is one plain path component.
#[must_use]
pub fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Join path components with `/` regardless of platform.
#[must_use]
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
