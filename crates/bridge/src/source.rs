//! Obtaining a source tree: local directory or a shallow remote fetch into a
//! temporary directory owned by the run.

use std::path::{Component, Path, PathBuf};

use {
    async_trait::async_trait,
    ombc_config::FetchConfig,
    tempfile::TempDir,
    tracing::{info, warn},
};

use crate::error::{Error, Result};

/// Where a source lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// `owner/repo` shorthand.
    GitHub { owner: String, repo: String },
    /// `http(s)://…` or `git@…`.
    Remote { url: String },
    Local { path: PathBuf },
}

impl SourceSpec {
    /// Classify a user-supplied source string. Relative local paths resolve
    /// against `cwd`.
    #[must_use]
    pub fn parse(source: &str, cwd: &Path) -> Self {
        let source = source.trim();
        if let Some((owner, repo)) = github_shorthand(source) {
            return Self::GitHub {
                owner: owner.to_string(),
                repo: repo.to_string(),
            };
        }
        let lower = source.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("git@") {
            return Self::Remote {
                url: source.to_string(),
            };
        }
        Self::Local {
            path: cwd.join(source),
        }
    }

    /// Clone URL for remote sources.
    #[must_use]
    pub fn url(&self) -> Option<String> {
        match self {
            Self::GitHub { owner, repo } => Some(format!("https://github.com/{owner}/{repo}.git")),
            Self::Remote { url } => Some(url.clone()),
            Self::Local { .. } => None,
        }
    }

    /// Origin descriptor recorded in the registry and used by `update`.
    #[must_use]
    pub fn origin(&self) -> String {
        match self {
            Self::GitHub { owner, repo } => format!("{owner}/{repo}"),
            Self::Remote { url } => url.clone(),
            Self::Local { path } => std::fs::canonicalize(path)
                .unwrap_or_else(|_| path.clone())
                .display()
                .to_string(),
        }
    }

    /// Identity used when the manifest has no `name`: the last path segment
    /// without a `.git` suffix.
    #[must_use]
    pub fn default_identity(&self) -> String {
        let raw = match self {
            Self::GitHub { repo, .. } => repo.clone(),
            Self::Remote { url } => url.clone(),
            Self::Local { path } => {
                local_base_name(path).unwrap_or_else(|| path.display().to_string())
            },
        };
        let last = raw
            .trim_end_matches('/')
            .rsplit(['/', ':'])
            .next()
            .unwrap_or_default();
        last.trim_end_matches(".git").to_string()
    }
}

fn local_base_name(path: &Path) -> Option<String> {
    let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    resolved
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

/// `owner/repo`: exactly one slash, no `\`, `:` or `@` in the owner, not a
/// dotted relative path.
fn github_shorthand(source: &str) -> Option<(&str, &str)> {
    if source.starts_with('.') {
        return None;
    }
    let (owner, repo) = source.split_once('/')?;
    let owner_ok = !owner.is_empty() && !owner.contains(['\\', ':', '@']);
    let repo_ok = !repo.is_empty() && !repo.contains(['/', '\\']);
    (owner_ok && repo_ok).then_some((owner, repo))
}

/// Fetches a remote source into an existing, empty directory.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, spec: &SourceSpec, dest: &Path) -> Result<()>;
}

/// GitHub tarball download, `git clone --depth 1` for everything else.
pub struct DefaultFetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl DefaultFetcher {
    #[must_use]
    pub fn new(config: FetchConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn fetch_tarball(&self, owner: &str, repo: &str, dest: &Path) -> Result<()> {
        let origin = format!("{owner}/{repo}");
        let url = format!(
            "{}/repos/{owner}/{repo}/tarball",
            self.config.github_api.trim_end_matches('/')
        );
        let resp = self
            .client
            .get(&url)
            .header("User-Agent", &self.config.user_agent)
            .send()
            .await
            .map_err(|e| Error::acquisition(&origin, format!("failed to fetch: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::acquisition(
                &origin,
                format!("failed to fetch: HTTP {}", resp.status()),
            ));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::acquisition(&origin, format!("failed to fetch: {e}")))?;

        let target = dest.to_path_buf();
        tokio::task::spawn_blocking(move || unpack_tarball(&bytes, &target))
            .await
            .map_err(|e| Error::external("tarball extraction task failed", e))??;

        info!(%owner, %repo, "fetched source via HTTP tarball");
        Ok(())
    }

    async fn clone_shallow(&self, url: &str, dest: &Path) -> Result<()> {
        let output = tokio::process::Command::new(&self.config.git_program)
            .arg("clone")
            .arg("--depth")
            .arg("1")
            .arg(url)
            .arg(dest)
            .output()
            .await
            .map_err(|e| Error::acquisition(url, format!("failed to clone: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::acquisition(
                url,
                format!("failed to clone: {}", stderr.trim()),
            ));
        }
        info!(%url, "cloned source");
        Ok(())
    }
}

#[async_trait]
impl SourceFetcher for DefaultFetcher {
    async fn fetch(&self, spec: &SourceSpec, dest: &Path) -> Result<()> {
        match spec {
            SourceSpec::GitHub { owner, repo } => self.fetch_tarball(owner, repo, dest).await,
            SourceSpec::Remote { url } => self.clone_shallow(url, dest).await,
            SourceSpec::Local { path } => Err(Error::message(format!(
                "local source {} does not need fetching",
                path.display()
            ))),
        }
    }
}

/// Unpack a gzipped GitHub tarball, dropping its top-level directory.
fn unpack_tarball(bytes: &[u8], target: &Path) -> Result<()> {
    let canonical_target = std::fs::canonicalize(target)?;
    let decoder = flate2::read::GzDecoder::new(bytes);
    let mut archive = tar::Archive::new(decoder);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_type = entry.header().entry_type();
        if entry_type.is_symlink() || entry_type.is_hard_link() {
            warn!("skipping symlink/hardlink archive entry");
            continue;
        }

        let path = entry.path()?.into_owned();
        let Some(stripped) = sanitize_archive_path(&path)? else {
            continue;
        };

        let dest = target.join(&stripped);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
            let canonical_parent = std::fs::canonicalize(parent)?;
            if !canonical_parent.starts_with(&canonical_target) {
                return Err(Error::message("archive entry escaped the fetch directory"));
            }
        }

        if entry_type.is_dir() {
            std::fs::create_dir_all(&dest)?;
            continue;
        }
        entry.unpack(&dest)?;
    }
    Ok(())
}

fn sanitize_archive_path(path: &Path) -> Result<Option<PathBuf>> {
    let stripped: PathBuf = path.components().skip(1).collect();
    if stripped.as_os_str().is_empty() {
        return Ok(None);
    }
    for component in stripped.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {},
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::message(format!(
                    "archive contains unsafe path component: {}",
                    path.display()
                )));
            },
        }
    }
    Ok(Some(stripped))
}

/// A source tree for one run. Fetched trees live in a temporary directory
/// removed when this value is dropped.
#[derive(Debug)]
pub struct AcquiredSource {
    root: PathBuf,
    temp: Option<TempDir>,
}

impl AcquiredSource {
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }
}

/// Resolve `spec` to a readable source tree.
pub async fn acquire(spec: &SourceSpec, fetcher: &dyn SourceFetcher) -> Result<AcquiredSource> {
    if let SourceSpec::Local { path } = spec {
        if !path.is_dir() {
            return Err(Error::acquisition(
                path.display().to_string(),
                "local path not found",
            ));
        }
        return Ok(AcquiredSource {
            root: path.clone(),
            temp: None,
        });
    }

    let temp = tempfile::Builder::new().prefix("ombc-").tempdir()?;
    fetcher.fetch(spec, temp.path()).await?;
    Ok(AcquiredSource {
        root: temp.path().to_path_buf(),
        temp: Some(temp),
    })
}
