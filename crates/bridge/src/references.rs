//! Path-reference extraction from free-form documentation text.
//!
//! Scanning is two stages: [`NoiseFilter`] lazily drops lines that mention
//! paths without meaning them (code fences, tables, tree diagrams, headings,
//! comments, URLs, home-directory paths), then [`ReferenceExtractor`] matches
//! `<known-name>/...` tokens on the retained lines.

use std::{collections::BTreeSet, iter::Peekable, str::Lines};

use {ombc_config::DEFAULT_MANAGED_DIR, regex::Regex};

use crate::error::Result;

/// Lazily yields the lines of a document that may carry real references.
pub struct NoiseFilter<'a> {
    lines: Peekable<Lines<'a>>,
    /// Open fence character and run length.
    fence: Option<(char, usize)>,
    in_table: bool,
}

impl<'a> NoiseFilter<'a> {
    #[must_use]
    pub fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().peekable(),
            fence: None,
            in_table: false,
        }
    }

    fn keep(&mut self, line: &str) -> bool {
        if let Some((ch, len)) = fence_run(line) {
            match self.fence {
                None => self.fence = Some((ch, len)),
                Some((open_ch, open_len)) if ch == open_ch && len >= open_len => self.fence = None,
                Some(_) => {},
            }
            return false;
        }
        if self.fence.is_some() {
            return false;
        }

        let trimmed = line.trim_start();
        if self.in_table {
            if trimmed.contains('|') {
                return false;
            }
            self.in_table = false;
        }
        if trimmed.starts_with('|') || is_delimiter_row(trimmed) {
            self.in_table = is_delimiter_row(trimmed);
            return false;
        }
        if trimmed.contains('|') && self.lines.peek().is_some_and(|next| is_delimiter_row(next)) {
            return false;
        }

        !(is_tree_line(line)
            || is_heading(trimmed)
            || trimmed.starts_with("//")
            || trimmed.contains("http://")
            || trimmed.contains("https://")
            || trimmed.contains("~/"))
    }
}

impl<'a> Iterator for NoiseFilter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            if self.keep(line) {
                return Some(line);
            }
        }
    }
}

/// Retained lines joined with `\n`.
#[must_use]
pub fn filter_noise(text: &str) -> String {
    NoiseFilter::new(text).collect::<Vec<_>>().join("\n")
}

/// A run of three or more backticks or tildes at the start of a
/// (possibly indented) line.
fn fence_run(line: &str) -> Option<(char, usize)> {
    let trimmed = line.trim_start();
    let ch = trimmed.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let len = trimmed.chars().take_while(|c| *c == ch).count();
    (len >= 3).then_some((ch, len))
}

/// `|---|:---:|`, `--- | ---`, and friends.
fn is_delimiter_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.contains('|')
        && trimmed.contains('-')
        && trimmed
            .chars()
            .all(|c| matches!(c, '-' | ':' | '|') || c.is_whitespace())
}

/// `├── docs/`, `│   └── guide.md`.
fn is_tree_line(line: &str) -> bool {
    ["├──", "└──"].iter().any(|marker| {
        line.match_indices(marker).any(|(idx, _)| {
            line[..idx]
                .chars()
                .all(|c| matches!(c, '│' | '├' | '└' | '─') || c.is_whitespace())
        })
    })
}

/// One or more `#` followed by whitespace.
fn is_heading(trimmed: &str) -> bool {
    let rest = trimmed.trim_start_matches('#');
    rest.len() < trimmed.len() && rest.starts_with(char::is_whitespace)
}

/// Matches `<name>/<path>` tokens for a fixed set of top-level names.
pub struct ReferenceExtractor {
    pattern: Option<Regex>,
}

impl ReferenceExtractor {
    /// Compile the matcher for `known_names`. References already rewritten
    /// under `managed_dir` (`<managed_dir>/<plugin>/...`) are matched too.
    pub fn new<S: AsRef<str>>(known_names: &[S], managed_dir: &str) -> Result<Self> {
        if known_names.is_empty() {
            return Ok(Self { pattern: None });
        }
        let names = known_names
            .iter()
            .map(|n| regex::escape(n.as_ref()))
            .collect::<Vec<_>>()
            .join("|");
        let managed = regex::escape(managed_dir);
        let pattern = Regex::new(&format!(
            r#"(?m)(?:^|[\s`("'@\[])(?:\./|/)?(?:{managed}/(?:plugins/)?[\w.-]+/)?(?:plugins/[\w.-]+/)?((?:{names})/[^\s`)"'\]]*)"#
        ))?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    /// Sub-package-relative reference strings found in already filtered text.
    #[must_use]
    pub fn extract(&self, text: &str) -> BTreeSet<String> {
        let Some(pattern) = &self.pattern else {
            return BTreeSet::new();
        };
        pattern
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| {
                m.as_str()
                    .trim_end_matches(['.', ',', ';', ':', '!', '?'])
                    .to_string()
            })
            .collect()
    }

    /// Filter `text` for noise, then extract.
    #[must_use]
    pub fn scan(&self, text: &str) -> BTreeSet<String> {
        self.extract(&filter_noise(text))
    }
}

/// One-shot extraction: noise suppression plus matching against `known_names`,
/// with rewritten references recognized under the default managed dir.
pub fn extract_references<S: AsRef<str>>(text: &str, known_names: &[S]) -> Result<BTreeSet<String>> {
    Ok(ReferenceExtractor::new(known_names, DEFAULT_MANAGED_DIR)?.scan(text))
}
