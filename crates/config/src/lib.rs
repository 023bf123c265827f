//! Configuration loading, validation, and env substitution.
//!
//! Config files: `ombc.toml` in the project root or its `.opencode/`
//! directory, then `ombc.toml` / `ombc.json` in the user config directory.
//!
//! Supports `${ENV_VAR}` substitution in the raw file text.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{apply_env_overrides, config_dir, discover_and_load, find_config_file, load_config},
    schema::{BridgeConfig, DEFAULT_MANAGED_DIR, FetchConfig},
    validate::{Diagnostic, Severity, ValidationResult},
};
