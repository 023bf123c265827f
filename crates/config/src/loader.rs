use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::BridgeConfig,
    validate::validate,
};

/// Config file names checked in the user config directory, in order.
const CONFIG_FILENAMES: &[&str] = &["ombc.toml", "ombc.json"];

/// Env var overriding `fetch.github_api`.
pub const GITHUB_API_ENV: &str = "OMBC_GITHUB_API";
/// Env var overriding `fetch.git_program`.
pub const GIT_PROGRAM_ENV: &str = "OMBC_GIT";

/// Load config from the given path (`.toml` or `.json`), apply env overrides,
/// and validate it.
pub fn load_config(path: &Path) -> Result<BridgeConfig> {
    let raw = std::fs::read_to_string(path).map_err(|e| Error::read(path, e))?;
    let raw = substitute_env(&raw);
    let mut config = parse_config(&raw, path)?;
    apply_env_overrides(&mut config);
    check(&config)?;
    Ok(config)
}

/// Discover and load config for a project.
///
/// Search order:
/// 1. `<project>/ombc.toml`
/// 2. `<project>/.opencode/ombc.toml`
/// 3. `<user config dir>/ombc.{toml,json}`
///
/// Returns `BridgeConfig::default()` (with env overrides) if nothing is found
/// or the discovered file fails to load.
pub fn discover_and_load(project_root: &Path) -> BridgeConfig {
    if let Some(path) = find_config_file(project_root) {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    let mut config = BridgeConfig::default();
    apply_env_overrides(&mut config);
    config
}

/// Find the first config file in standard locations.
pub fn find_config_file(project_root: &Path) -> Option<PathBuf> {
    let local = [
        project_root.join("ombc.toml"),
        project_root.join(".opencode").join("ombc.toml"),
    ];
    if let Some(p) = local.into_iter().find(|p| p.is_file()) {
        return Some(p);
    }

    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.is_file())
}

/// Returns the user-global config directory (`~/.config/ombc/` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "ombc").map(|d| d.config_dir().to_path_buf())
}

/// Apply `OMBC_GITHUB_API` / `OMBC_GIT` overrides from the process environment.
pub fn apply_env_overrides(config: &mut BridgeConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut BridgeConfig, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
    if let Some(api) = non_empty(GITHUB_API_ENV) {
        config.fetch.github_api = api.trim_end_matches('/').to_string();
    }
    if let Some(git) = non_empty(GIT_PROGRAM_ENV) {
        config.fetch.git_program = git;
    }
}

fn parse_config(raw: &str, path: &Path) -> Result<BridgeConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(Error::UnsupportedFormat { ext: ext.into() }),
    }
}

fn check(config: &BridgeConfig) -> Result<()> {
    let result = validate(config);
    for diag in &result.diagnostics {
        warn!(path = %diag.path, severity = %diag.severity, "{}", diag.message);
    }
    match result.first_error() {
        Some(diag) => Err(Error::invalid(diag.to_string())),
        None => Ok(()),
    }
}
