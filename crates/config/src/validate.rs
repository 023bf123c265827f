//! Semantic checks on a loaded [`BridgeConfig`].

use std::path::{Component, Path};

use crate::schema::BridgeConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted field path, e.g. "fetch.git_program".
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.severity, self.path, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// First error diagnostic, if any.
    #[must_use]
    pub fn first_error(&self) -> Option<&Diagnostic> {
        self.diagnostics
            .iter()
            .find(|d| d.severity == Severity::Error)
    }

    fn error(&mut self, path: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            path: path.into(),
            message: message.into(),
        });
    }

    fn warning(&mut self, path: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate a config value.
#[must_use]
pub fn validate(config: &BridgeConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    for (path, value) in [
        ("managed_dir", &config.managed_dir),
        ("marker_file", &config.marker_file),
        ("registry_file", &config.registry_file),
    ] {
        if !is_single_component(value) {
            result.error(path, format!("must be a single relative path component, got {value:?}"));
        }
    }

    if config.scannable_extensions.is_empty() {
        result.error("scannable_extensions", "at least one extension is required");
    }
    for ext in &config.scannable_extensions {
        if ext.starts_with('.') {
            result.warning(
                "scannable_extensions",
                format!("extension {ext:?} should not include the leading dot"),
            );
        }
    }

    for (alias, target) in &config.model_aliases {
        if alias.chars().any(char::is_uppercase) {
            result.warning(
                &format!("model_aliases.{alias}"),
                "aliases are matched lowercased; uppercase keys never match",
            );
        }
        if !target.contains('/') {
            result.warning(
                &format!("model_aliases.{alias}"),
                format!("target {target:?} is not a provider/model identifier"),
            );
        }
    }

    if config.fetch.git_program.trim().is_empty() {
        result.error("fetch.git_program", "must not be empty");
    }
    if !(config.fetch.github_api.starts_with("http://")
        || config.fetch.github_api.starts_with("https://"))
    {
        result.error("fetch.github_api", "must be an http(s) URL");
    }

    result
}

fn is_single_component(value: &str) -> bool {
    let mut components = Path::new(value).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
