//! Reachability closure over a sub-package's reference graph.

use std::{
    collections::{BTreeSet, HashSet, VecDeque},
    path::{Component, Path},
};

use {ombc_config::BridgeConfig, tracing::debug};

use crate::{
    boundary::{Boundary, BoundaryMode, EntryKind},
    error::Result,
    layout::{CATEGORY_DIRS, to_slash},
    references::ReferenceExtractor,
};

/// Files and top-level directories reachable from the entry documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reachability {
    /// Sub-package-relative, `/`-separated file paths.
    pub files: BTreeSet<String>,
    /// Top-level directory names owning at least one reachable file.
    pub dirs: BTreeSet<String>,
}

impl Reachability {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Walks references outward from `skills/`, `commands/` and `agents/`.
pub struct GraphBuilder<'a> {
    config: &'a BridgeConfig,
    mode: BoundaryMode,
}

impl<'a> GraphBuilder<'a> {
    #[must_use]
    pub fn new(config: &'a BridgeConfig) -> Self {
        Self {
            config,
            mode: BoundaryMode::Lenient,
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: BoundaryMode) -> Self {
        self.mode = mode;
        self
    }

    fn is_scannable(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.config.is_scannable_extension(e))
    }

    /// Top-level names a reference may start with.
    pub fn known_names(&self, boundary: &Boundary, subpackage_root: &Path) -> Result<Vec<String>> {
        Ok(boundary
            .list_dir_names(subpackage_root)?
            .into_iter()
            .filter(|name| !CATEGORY_DIRS.contains(&name.as_str()))
            .filter(|name| !self.config.skip_dirs.contains(name))
            .collect())
    }

    /// Compute the closure for the sub-package rooted at `subpackage_root`,
    /// with every access bounded by `allowed_root`.
    pub fn build(&self, allowed_root: &Path, subpackage_root: &Path) -> Result<Reachability> {
        let boundary = Boundary::new(allowed_root, self.mode)?.with_exclude(&self.config.copy_exclude);
        let known = self.known_names(&boundary, subpackage_root)?;
        let extractor = ReferenceExtractor::new(&known, &self.config.managed_dir)?;

        let mut queue = VecDeque::new();
        for category in CATEGORY_DIRS {
            let dir = subpackage_root.join(category);
            if boundary.classify(&dir)? != Some(EntryKind::Dir) {
                continue;
            }
            for file in boundary.walk_files(&dir)? {
                if self.is_scannable(&file) {
                    queue.push_back(dir.join(file));
                }
            }
        }

        let mut visited = HashSet::new();
        let mut closure = Reachability::default();
        while let Some(path) = queue.pop_front() {
            let Some(canonical) = crate::boundary::resolve(&path) else {
                continue;
            };
            if !visited.insert(canonical) || !self.is_scannable(&path) {
                continue;
            }
            let text = match std::fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "skipping unreadable document");
                    continue;
                },
            };

            for reference in extractor.scan(&text) {
                let Some(relative) = normalize_reference(&reference) else {
                    debug!(%reference, "discarding reference outside the sub-package");
                    continue;
                };
                let Some(top) = relative.split('/').next().map(str::to_string) else {
                    continue;
                };
                let target = subpackage_root.join(&relative);
                match boundary.classify(&target)? {
                    Some(EntryKind::Dir) => {
                        closure.dirs.insert(top);
                        for file in boundary.walk_files(&target)? {
                            let file_ref = format!("{relative}/{}", to_slash(&file));
                            queue.push_back(subpackage_root.join(&file_ref));
                            closure.files.insert(file_ref);
                        }
                    },
                    Some(EntryKind::File) => {
                        closure.dirs.insert(top);
                        closure.files.insert(relative);
                        queue.push_back(target);
                    },
                    None => debug!(%reference, "reference does not resolve"),
                }
            }
        }

        debug!(
            root = %subpackage_root.display(),
            files = closure.files.len(),
            dirs = closure.dirs.len(),
            "computed reachability"
        );
        Ok(closure)
    }
}

/// Lenient closure for a sub-package bounded by its own root.
pub fn build_reachability(subpackage_root: &Path, config: &BridgeConfig) -> Result<Reachability> {
    GraphBuilder::new(config).build(subpackage_root, subpackage_root)
}

/// Canonical `/`-joined form of a reference; `None` for anything with `..`.
fn normalize_reference(reference: &str) -> Option<String> {
    let mut parts = Vec::new();
    for component in Path::new(reference).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {},
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}
