//! Rewrites materialized text for the destination layout.
//!
//! Three passes, each idempotent: `tools:` declarations become a lowercase
//! record, `model:` aliases become `provider/model` identifiers, and
//! references into reachable directories gain the sub-package destination
//! prefix.

use {
    ombc_config::BridgeConfig,
    regex::{Captures, Regex},
};

use crate::error::Result;

/// Compiled rewrite passes for one sub-package.
pub struct ContentRewriter {
    tools_list: Regex,
    tools_inline: Regex,
    model: Regex,
    url_tail: Regex,
    references: Option<Regex>,
    destination_prefix: String,
    config: BridgeConfig,
}

impl ContentRewriter {
    /// `destination_prefix` is e.g. `.opencode/my-plugin/`; `reachable_dirs`
    /// are the top-level names whose references get rewritten.
    pub fn new<S: AsRef<str>>(
        config: &BridgeConfig,
        destination_prefix: &str,
        reachable_dirs: &[S],
    ) -> Result<Self> {
        let references = if reachable_dirs.is_empty() {
            None
        } else {
            let names = reachable_dirs
                .iter()
                .map(|n| regex::escape(n.as_ref()))
                .collect::<Vec<_>>()
                .join("|");
            let managed = regex::escape(&config.managed_dir);
            Some(Regex::new(&format!(
                r#"(?m)(^|[\s`("'@\[])((?:\./|/)?(?:{managed}/(?:plugins/)?[\w.-]+/)?(?:plugins/[\w.-]+/)?)({names})/"#
            ))?)
        };

        Ok(Self {
            tools_list: Regex::new(r"(?mR)^tools:[ \t]*\[([^\]\n]*)\][ \t]*$")?,
            tools_inline: Regex::new(
                r"(?mR)^tools:[ \t]+([A-Za-z*][\w*]*(?:[ \t]*,[ \t]*[A-Za-z*][\w*]*)*)[ \t]*$",
            )?,
            model: Regex::new(r"(?mR)^(model:[ \t]*)(\S+)[ \t]*$")?,
            url_tail: Regex::new(r"https?://\S*$")?,
            references,
            destination_prefix: destination_prefix.to_string(),
            config: config.clone(),
        })
    }

    /// Apply every pass.
    #[must_use]
    pub fn rewrite(&self, text: &str) -> String {
        let text = self.rewrite_references(text);
        let text = self.normalize_tools(&text);
        self.normalize_model(&text)
    }

    /// `tools: [A, B]` / `tools: A, B` → `tools:` plus `  a: true` lines.
    #[must_use]
    pub fn normalize_tools(&self, text: &str) -> String {
        let text = self.tools_list.replace_all(text, |caps: &Captures<'_>| {
            let tools: Vec<&str> = caps[1]
                .split(',')
                .map(|item| item.trim().trim_matches(|c| c == '"' || c == '\''))
                .filter(|item| !item.is_empty())
                .collect();
            tools_record(&tools)
        });
        self.tools_inline
            .replace_all(&text, |caps: &Captures<'_>| {
                let tools: Vec<&str> = caps[1].split(',').map(str::trim).collect();
                tools_record(&tools)
            })
            .into_owned()
    }

    /// `model: sonnet` → `model: anthropic/claude-sonnet-4-5`.
    #[must_use]
    pub fn normalize_model(&self, text: &str) -> String {
        self.model
            .replace_all(text, |caps: &Captures<'_>| {
                let value = &caps[2];
                let mapped = (!value.contains('/'))
                    .then(|| self.config.model_alias(value))
                    .flatten();
                match mapped {
                    Some(target) => format!("{}{target}", &caps[1]),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Point references into reachable directories at the destination prefix.
    #[must_use]
    pub fn rewrite_references(&self, text: &str) -> String {
        let Some(pattern) = &self.references else {
            return text.to_string();
        };
        pattern
            .replace_all(text, |caps: &Captures<'_>| {
                let whole = &caps[0];
                let (Some(anchor), Some(prefix)) = (caps.get(1), caps.get(2)) else {
                    return whole.to_string();
                };
                if prefix.as_str() == self.destination_prefix {
                    return whole.to_string();
                }
                let line_start = text[..anchor.end()].rfind('\n').map_or(0, |i| i + 1);
                if self.url_tail.is_match(&text[line_start..anchor.end()]) {
                    return whole.to_string();
                }
                format!(
                    "{}{}{}/",
                    anchor.as_str(),
                    self.destination_prefix,
                    &caps[3]
                )
            })
            .into_owned()
    }
}

fn tools_record(tools: &[&str]) -> String {
    if tools.is_empty() {
        return "tools:".to_string();
    }
    let mut out = String::from("tools:");
    for tool in tools {
        out.push_str("\n  ");
        out.push_str(&tool.to_lowercase());
        out.push_str(": true");
    }
    out
}
