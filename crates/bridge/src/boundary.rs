//! Source-root containment for every filesystem access during an install.
//!
//! All paths are compared in canonical (symlink-free) form. In
//! [`BoundaryMode::Strict`] an escaping or broken symbolic link is a hard
//! [`Error::BoundaryViolation`]; in [`BoundaryMode::Lenient`] it is skipped.

use std::{
    cell::Cell,
    path::{Path, PathBuf},
};

use {tracing::debug, walkdir::WalkDir};

use crate::error::{Error, Result, ViolationKind};

/// Follow symbolic links to the final target. `None` if it does not exist or
/// cannot be read.
#[must_use]
pub fn resolve(path: &Path) -> Option<PathBuf> {
    std::fs::canonicalize(path).ok()
}

/// Whether the canonical form of `candidate` equals or descends from the
/// canonical form of `root`. Whole components are compared, so `/a/bc` is not
/// inside `/a/b`.
#[must_use]
pub fn contains(root: &Path, candidate: &Path) -> bool {
    match (resolve(root), resolve(candidate)) {
        (Some(root), Some(candidate)) => candidate.starts_with(root),
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BoundaryMode {
    /// Out-of-bound or broken links are silently skipped.
    #[default]
    Lenient,
    /// Out-of-bound or broken links abort the operation.
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

/// A canonical root plus the rules for touching anything beneath it.
#[derive(Debug, Clone)]
pub struct Boundary {
    root: PathBuf,
    mode: BoundaryMode,
    exclude: Vec<String>,
}

impl Boundary {
    /// Canonicalizes `root`; fails if it does not exist.
    pub fn new(root: &Path, mode: BoundaryMode) -> Result<Self> {
        let root = std::fs::canonicalize(root).map_err(|e| {
            Error::external(format!("cannot resolve source root {}", root.display()), e)
        })?;
        Ok(Self {
            root,
            mode,
            exclude: Vec::new(),
        })
    }

    /// Entry names never listed, walked, or copied.
    #[must_use]
    pub fn with_exclude(mut self, names: &[String]) -> Self {
        self.exclude = names.to_vec();
        self
    }

    /// Same root and excludes, different mode.
    #[must_use]
    pub fn with_mode(&self, mode: BoundaryMode) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }

    fn is_excluded(&self, name: &str) -> bool {
        self.exclude.iter().any(|e| e == name)
    }

    fn reject(&self, path: &Path, kind: ViolationKind) -> Result<()> {
        match self.mode {
            BoundaryMode::Strict => Err(Error::boundary(path, kind)),
            BoundaryMode::Lenient => {
                debug!(path = %path.display(), %kind, "skipping out-of-bound path");
                Ok(())
            },
        }
    }

    /// An entry that cannot be read: fatal in strict mode, skipped otherwise.
    fn tolerate(&self, path: &Path, err: impl Into<Error>) -> Result<()> {
        let err = err.into();
        match self.mode {
            BoundaryMode::Strict => Err(err),
            BoundaryMode::Lenient => {
                debug!(path = %path.display(), error = %err, "skipping unreadable entry");
                Ok(())
            },
        }
    }

    /// Classify `path` after resolving links.
    ///
    /// Returns `Ok(None)` for missing targets and for lenient-mode rejects.
    pub fn classify(&self, path: &Path) -> Result<Option<EntryKind>> {
        let Ok(link_meta) = std::fs::symlink_metadata(path) else {
            return Ok(None);
        };
        let canonical = match std::fs::canonicalize(path) {
            Ok(canonical) => canonical,
            Err(_) if link_meta.file_type().is_symlink() => {
                self.reject(path, ViolationKind::Broken)?;
                return Ok(None);
            },
            Err(_) => return Ok(None),
        };
        if !canonical.starts_with(&self.root) {
            self.reject(path, ViolationKind::Escape)?;
            return Ok(None);
        }
        let meta = std::fs::metadata(&canonical)?;
        Ok(if meta.is_dir() {
            Some(EntryKind::Dir)
        } else if meta.is_file() {
            Some(EntryKind::File)
        } else {
            None
        })
    }

    fn list(&self, dir: &Path, kind: EntryKind) -> Result<Vec<String>> {
        if self.classify(dir)? != Some(EntryKind::Dir) {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                self.tolerate(dir, e)?;
                return Ok(names);
            },
        };
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    self.tolerate(dir, e)?;
                    continue;
                },
            };
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if self.is_excluded(&name) {
                continue;
            }
            if self.classify(&entry.path())? == Some(kind) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Sorted names of the directories directly inside `dir`.
    pub fn list_dirs(&self, dir: &Path) -> Result<Vec<String>> {
        self.list(dir, EntryKind::Dir)
    }

    /// Sorted names of the regular files directly inside `dir`.
    pub fn list_files(&self, dir: &Path) -> Result<Vec<String>> {
        self.list(dir, EntryKind::File)
    }

    /// Names of the directories directly inside `dir`, including symbolic
    /// links whose target is not a regular file. Links are not checked here;
    /// the check happens when something beneath them is actually touched.
    pub fn list_dir_names(&self, dir: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Ok(names);
        };
        for entry in entries {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if self.is_excluded(&name) {
                continue;
            }
            let file_type = entry.file_type()?;
            let is_dir_like = file_type.is_dir()
                || (file_type.is_symlink()
                    && !std::fs::metadata(entry.path()).is_ok_and(|m| m.is_file()));
            if is_dir_like {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn check_link(&self, path: &Path) -> Result<bool> {
        match std::fs::canonicalize(path) {
            Ok(canonical) if canonical.starts_with(&self.root) => Ok(true),
            Ok(_) => self.reject(path, ViolationKind::Escape).map(|()| false),
            Err(_) => self.reject(path, ViolationKind::Broken).map(|()| false),
        }
    }

    /// Every regular file beneath `dir`, relative to it, in file-name order.
    ///
    /// Links are followed only while they stay inside the root. A link that
    /// loops back to a directory on the current path is skipped.
    pub fn walk_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let violation: Cell<Option<Error>> = Cell::new(None);
        let walker = WalkDir::new(dir)
            .follow_links(true)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| self.is_excluded(name))
                {
                    return false;
                }
                if !entry.path_is_symlink() {
                    return true;
                }
                match self.check_link(entry.path()) {
                    Ok(keep) => keep,
                    Err(e) => {
                        violation.set(Some(e));
                        false
                    },
                }
            });

        let mut files = Vec::new();
        for entry in walker {
            if let Some(e) = violation.take() {
                return Err(e);
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.loop_ancestor().is_some() => {
                    debug!(path = ?e.path(), "skipping symbolic link loop");
                    continue;
                },
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf);
                    match path {
                        Some(path) if is_symlink(&path) => {
                            self.reject(&path, ViolationKind::Broken)?;
                            continue;
                        },
                        Some(path) => {
                            self.tolerate(&path, e)?;
                            continue;
                        },
                        None => return Err(e.into()),
                    }
                },
            };
            if entry.file_type().is_file() {
                files.push(entry.path().strip_prefix(dir)?.to_path_buf());
            }
        }
        if let Some(e) = violation.take() {
            return Err(e);
        }
        Ok(files)
    }
}

fn is_symlink(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink())
}
