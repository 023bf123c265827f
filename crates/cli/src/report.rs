//! ASCII reports printed on stdout.

use ombc_bridge::{InstallSummary, RegistryEntry, UpdateSummary};

const WIDE_RULE: &str = "+=================================================================+";
const LIST_RULE: &str = "+===============================================================+";
const LIST_SEPARATOR: &str = " ---------------------------------------------------------------";

fn name_list(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

pub fn install_report(summary: &InstallSummary) -> String {
    [
        WIDE_RULE.to_string(),
        "|                    OMBC INSTALL ASCII REPORT                    |".to_string(),
        WIDE_RULE.to_string(),
        format!(" Marketplace : {}", summary.source_identity),
        format!(" Source      : {}", summary.origin),
        format!(
            " Plugin      : {}",
            summary.subpackage_filter.as_deref().unwrap_or("(all)")
        ),
        format!(" Plugins     : {}", name_list(&summary.subpackages)),
        format!(
            " Placed  ({}) : {}",
            summary.placed_paths.len(),
            name_list(&summary.placed_paths)
        ),
        " -----------------------------------------------------------------".to_string(),
        format!(" Skills   ({}) : {}", summary.skills.len(), name_list(&summary.skills)),
        format!(
            " Commands ({}) : {}",
            summary.commands.len(),
            name_list(&summary.commands)
        ),
        format!(" Agents   ({}) : {}", summary.agents.len(), name_list(&summary.agents)),
        WIDE_RULE.to_string(),
    ]
    .join("\n")
}

pub fn list_report(entries: &[(String, RegistryEntry)]) -> String {
    let mut lines = vec![
        LIST_RULE.to_string(),
        "|                 OMBC MARKETPLACE LIST REPORT                  |".to_string(),
        LIST_RULE.to_string(),
    ];
    if entries.is_empty() {
        lines.push(" No marketplaces installed.".to_string());
    }
    for (name, entry) in entries {
        lines.push(format!(" Marketplace : {name}"));
        lines.push(format!(" Plugins     : {}", name_list(&entry.plugins)));
        lines.push(format!(" Skills      : {}", name_list(&entry.skills)));
        lines.push(format!(" Commands    : {}", name_list(&entry.commands)));
        lines.push(format!(" Agents      : {}", name_list(&entry.agents)));
        lines.push(format!(
            " LastUpdate  : {}",
            entry.last_updated.format("%Y-%m-%dT%H:%M:%S%.3fZ")
        ));
        lines.push(LIST_SEPARATOR.to_string());
    }
    lines.push(LIST_RULE.to_string());
    lines.join("\n")
}

pub fn update_report(summary: &UpdateSummary) -> String {
    let mut lines = vec![
        WIDE_RULE.to_string(),
        "|                       OMBC UPDATE REPORT                        |".to_string(),
        WIDE_RULE.to_string(),
    ];
    if summary.updated.is_empty() && summary.failed.is_empty() {
        lines.push(" No marketplaces installed.".to_string());
    } else {
        lines.push(format!(
            " Updated ({}) : {}",
            summary.updated.len(),
            name_list(&summary.updated)
        ));
        lines.push(format!(
            " Failed  ({}) : {}",
            summary.failed.len(),
            if summary.failed.is_empty() { "(none)" } else { "" }
        ));
        for (name, error) in &summary.failed {
            lines.push(format!("  - {name}: {error}"));
        }
    }
    lines.push(WIDE_RULE.to_string());
    lines.join("\n")
}
