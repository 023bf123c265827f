//! Ownership of destination paths and the overwrite decision.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use crate::{error::Result, layout::LEGACY_MARKER_FILE};

/// Who currently owns a destination path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnershipState {
    /// Nothing exists at the path.
    Absent,
    /// Something exists with no ownership record: user-managed.
    Unowned,
    /// Owned by the named source.
    Owned(String),
    /// A legacy marker that records ownership but not the owner.
    Unknown,
}

impl OwnershipState {
    /// Whether `source` may remove this path when releasing what it owns.
    #[must_use]
    pub fn releasable_by(&self, source: &str) -> bool {
        match self {
            Self::Owned(owner) => owner == source,
            Self::Unknown => true,
            Self::Absent | Self::Unowned => false,
        }
    }
}

/// Reads the ownership state of named destinations.
pub trait OwnershipProbe {
    fn probe(&self, name: &str) -> Result<OwnershipState>;
}

/// Ownership held by a marker file inside each destination directory.
pub struct MarkerProbe<'a> {
    parent: &'a Path,
    marker_file: &'a str,
}

impl<'a> MarkerProbe<'a> {
    #[must_use]
    pub fn new(parent: &'a Path, marker_file: &'a str) -> Self {
        Self {
            parent,
            marker_file,
        }
    }
}

impl OwnershipProbe for MarkerProbe<'_> {
    fn probe(&self, name: &str) -> Result<OwnershipState> {
        marker_state(&self.parent.join(name), self.marker_file)
    }
}

/// State of a marker-owned directory.
pub fn marker_state(dir: &Path, marker_file: &str) -> Result<OwnershipState> {
    if std::fs::symlink_metadata(dir).is_err() {
        return Ok(OwnershipState::Absent);
    }
    let marker = dir.join(marker_file);
    let legacy = dir.join(LEGACY_MARKER_FILE);
    let path = if marker.is_file() {
        marker
    } else if legacy.is_file() {
        legacy
    } else {
        return Ok(OwnershipState::Unowned);
    };
    let content = std::fs::read_to_string(&path)?;
    let owner = content.trim();
    if owner.is_empty() || owner.contains(char::is_whitespace) {
        return Ok(OwnershipState::Unknown);
    }
    Ok(OwnershipState::Owned(owner.to_string()))
}

/// Tag `dir` as owned by `owner`, dropping any legacy marker.
pub fn write_marker(dir: &Path, marker_file: &str, owner: &str) -> Result<()> {
    std::fs::write(dir.join(marker_file), format!("{owner}\n"))?;
    if marker_file != LEGACY_MARKER_FILE {
        let legacy = dir.join(LEGACY_MARKER_FILE);
        if legacy.exists() {
            std::fs::remove_file(legacy)?;
        }
    }
    Ok(())
}

/// Ownership of flat `<name>.md` documents, held by the registry.
pub struct RegistryProbe<'a> {
    dir: PathBuf,
    owners: HashMap<String, String>,
    owned_this_run: &'a HashSet<String>,
    source: &'a str,
}

impl<'a> RegistryProbe<'a> {
    /// `owners` maps document name → owning source identity. Names in
    /// `owned_this_run` were written earlier in the current run and count as
    /// owned by `source`.
    #[must_use]
    pub fn new(
        dir: &Path,
        owners: HashMap<String, String>,
        owned_this_run: &'a HashSet<String>,
        source: &'a str,
    ) -> Self {
        Self {
            dir: dir.to_path_buf(),
            owners,
            owned_this_run,
            source,
        }
    }
}

impl OwnershipProbe for RegistryProbe<'_> {
    fn probe(&self, name: &str) -> Result<OwnershipState> {
        if std::fs::symlink_metadata(self.dir.join(format!("{name}.md"))).is_err() {
            return Ok(OwnershipState::Absent);
        }
        if let Some(owner) = self.owners.get(name) {
            return Ok(OwnershipState::Owned(owner.clone()));
        }
        if self.owned_this_run.contains(name) {
            return Ok(OwnershipState::Owned(self.source.to_string()));
        }
        Ok(OwnershipState::Unowned)
    }
}

/// Why a write was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    UserManaged,
    OwnedBy(String),
    UnknownOwner,
}

/// Outcome of asking to write a destination path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Nothing there yet.
    Create,
    /// Already ours; replace the content.
    Replace,
    /// Someone else's; replace it and take ownership.
    Reassign { previous: Option<String> },
    Refuse(ConflictReason),
}

/// Decide whether `source` may write a path in `state`.
#[must_use]
pub fn decide(state: &OwnershipState, source: &str, force: bool) -> Decision {
    match state {
        OwnershipState::Absent => Decision::Create,
        OwnershipState::Unowned => Decision::Refuse(ConflictReason::UserManaged),
        OwnershipState::Owned(owner) if owner == source => Decision::Replace,
        OwnershipState::Owned(owner) if force => Decision::Reassign {
            previous: Some(owner.clone()),
        },
        OwnershipState::Owned(owner) => Decision::Refuse(ConflictReason::OwnedBy(owner.clone())),
        OwnershipState::Unknown if force => Decision::Reassign { previous: None },
        OwnershipState::Unknown => Decision::Refuse(ConflictReason::UnknownOwner),
    }
}
