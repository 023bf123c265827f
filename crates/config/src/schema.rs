/// Config schema types for the materialization engine.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Managed root used when the config does not name one.
pub const DEFAULT_MANAGED_DIR: &str = ".opencode";

/// Root configuration.
///
/// Every field has a default so an empty file (or no file at all) yields a
/// working configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Managed root directory, relative to the project root.
    pub managed_dir: String,
    /// File name of the ownership marker written into managed directories.
    pub marker_file: String,
    /// File name of the installation registry inside `managed_dir`.
    pub registry_file: String,
    /// Extensions (without the dot) whose contents are scanned for references
    /// and rewritten on copy.
    pub scannable_extensions: Vec<String>,
    /// Entry names never walked or copied.
    pub copy_exclude: Vec<String>,
    /// Top-level directory names never treated as reference targets.
    pub skip_dirs: Vec<String>,
    /// Short model alias → fully-qualified `provider/model` identifier.
    pub model_aliases: BTreeMap<String, String>,
    pub fetch: FetchConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            managed_dir: DEFAULT_MANAGED_DIR.into(),
            marker_file: ".ombc-managed".into(),
            registry_file: ".ombc-registry.json".into(),
            scannable_extensions: ["md", "mdx", "markdown", "txt"]
                .into_iter()
                .map(String::from)
                .collect(),
            copy_exclude: [".git", "node_modules", ".DS_Store"]
                .into_iter()
                .map(String::from)
                .collect(),
            skip_dirs: [".git", ".github", ".claude", "node_modules", ".DS_Store"]
                .into_iter()
                .map(String::from)
                .collect(),
            model_aliases: default_model_aliases(),
            fetch: FetchConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Whether a file extension (case-insensitive, no dot) is scannable.
    #[must_use]
    pub fn is_scannable_extension(&self, ext: &str) -> bool {
        self.scannable_extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(ext))
    }

    /// Resolve a model alias (case-insensitive).
    #[must_use]
    pub fn model_alias(&self, alias: &str) -> Option<&str> {
        let lowered = alias.to_ascii_lowercase();
        self.model_aliases.get(&lowered).map(String::as_str)
    }
}

fn default_model_aliases() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("opus".to_string(), "anthropic/claude-opus-4-5".to_string()),
        ("sonnet".to_string(), "anthropic/claude-sonnet-4-5".to_string()),
        ("haiku".to_string(), "anthropic/claude-haiku-4-5".to_string()),
    ])
}

/// Settings for obtaining remote sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Base URL of the GitHub REST API used for tarball downloads.
    pub github_api: String,
    /// `User-Agent` header sent with API requests.
    pub user_agent: String,
    /// Program used for `clone --depth 1` of non-GitHub remotes.
    pub git_program: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            github_api: "https://api.github.com".into(),
            user_agent: concat!("ombc/", env!("CARGO_PKG_VERSION")).into(),
            git_program: "git".into(),
        }
    }
}
