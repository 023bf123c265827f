//! End-to-end install / uninstall / update scenarios against temp projects.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use {
    async_trait::async_trait,
    ombc_bridge::{
        Error, InstallOptions, Materializer, SourceFetcher, SourceSpec,
        ownership::ConflictReason,
    },
    ombc_config::BridgeConfig,
    walkdir::WalkDir,
};

// ── Fixtures ────────────────────────────────────────────────────────────────

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn read(root: &Path, rel: &str) -> String {
    std::fs::read_to_string(root.join(rel)).unwrap()
}

fn manifest(root: &Path, json: &str) {
    write(root, ".claude-plugin/marketplace.json", json);
}

fn local(root: &Path) -> SourceSpec {
    SourceSpec::Local {
        path: root.to_path_buf(),
    }
}

fn materializer(project: &Path) -> Materializer {
    Materializer::new(project, BridgeConfig::default())
}

fn forced() -> InstallOptions {
    InstallOptions {
        force: true,
        ..InstallOptions::default()
    }
}

/// Single-plugin marketplace named `name` whose plugin lives at the root.
fn review_marketplace(root: &Path, name: &str) {
    manifest(
        root,
        &format!(r#"{{"name":"{name}","plugins":[{{"name":"my-plugin","source":"./"}}]}}"#),
    );
    write(
        root,
        "skills/review/SKILL.md",
        "---\nname: review\n---\nRead `rules/common/review.md` and `templates/pr.md`.\n",
    );
    write(root, "rules/common/review.md", "Review rules.\n");
    write(root, "templates/pr.md", "PR template.\n");
    write(root, "docs/guide.md", "Never referenced.\n");
    write(
        root,
        "commands/deploy.md",
        "---\nmodel: sonnet\ntools: Read, Bash\n---\nFollow rules/common/review.md\n",
    );
    write(root, "agents/helper.md", "---\ntools: [Grep]\n---\nHelper.\n");
}

/// Every file under the managed root except the registry, with contents.
fn snapshot(project: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let managed = project.join(".opencode");
    WalkDir::new(&managed)
        .into_iter()
        .map(Result::unwrap)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name() != ".ombc-registry.json")
        .map(|e| {
            (
                e.path().strip_prefix(&managed).unwrap().to_path_buf(),
                std::fs::read(e.path()).unwrap(),
            )
        })
        .collect()
}

fn registry_json(project: &Path) -> serde_json::Value {
    serde_json::from_str(&read(project, ".opencode/.ombc-registry.json")).unwrap()
}

// ── Fetchers ────────────────────────────────────────────────────────────────

/// Copies a prepared tree into the fetch directory and remembers where.
struct CopyFetcher {
    from: PathBuf,
    dest: Mutex<Option<PathBuf>>,
}

impl CopyFetcher {
    fn new(from: &Path) -> Self {
        Self {
            from: from.to_path_buf(),
            dest: Mutex::new(None),
        }
    }

    fn fetched_into(&self) -> PathBuf {
        self.dest.lock().unwrap().clone().unwrap()
    }
}

#[async_trait]
impl SourceFetcher for CopyFetcher {
    async fn fetch(&self, _spec: &SourceSpec, dest: &Path) -> ombc_bridge::Result<()> {
        *self.dest.lock().unwrap() = Some(dest.to_path_buf());
        for entry in WalkDir::new(&self.from).min_depth(1) {
            let entry = entry.unwrap();
            let target = dest.join(entry.path().strip_prefix(&self.from).unwrap());
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&target).unwrap();
            } else {
                std::fs::copy(entry.path(), &target).unwrap();
            }
        }
        Ok(())
    }
}

/// Leaves a partial tree behind, then fails like a broken clone.
struct FailingFetcher {
    dest: Mutex<Option<PathBuf>>,
}

#[async_trait]
impl SourceFetcher for FailingFetcher {
    async fn fetch(&self, spec: &SourceSpec, dest: &Path) -> ombc_bridge::Result<()> {
        *self.dest.lock().unwrap() = Some(dest.to_path_buf());
        std::fs::write(dest.join("partial"), "x").unwrap();
        Err(Error::acquisition(
            spec.url().unwrap_or_default(),
            "failed to clone: repository not found",
        ))
    }
}

// ── Install ─────────────────────────────────────────────────────────────────

#[test]
fn installs_only_reachable_content_with_rewritten_references() {
    let source = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    review_marketplace(source.path(), "mp");

    let summary = materializer(project.path())
        .install_from_dir(source.path(), &local(source.path()), &InstallOptions::default())
        .unwrap();

    assert_eq!(summary.source_identity, "mp");
    assert_eq!(summary.subpackages, vec!["my-plugin".to_string()]);
    assert_eq!(summary.skills, vec!["review".to_string()]);
    assert_eq!(summary.commands, vec!["deploy".to_string()]);
    assert_eq!(summary.agents, vec!["helper".to_string()]);
    assert_eq!(summary.placed_paths, vec![".opencode/my-plugin".to_string()]);
    assert!(summary.conflicts.is_empty());

    let p = project.path();
    let skill = read(p, ".opencode/skills/review/SKILL.md");
    assert!(skill.contains("`.opencode/my-plugin/rules/common/review.md`"), "{skill}");
    assert!(skill.contains("`.opencode/my-plugin/templates/pr.md`"), "{skill}");
    assert_eq!(read(p, ".opencode/skills/review/.ombc-managed"), "mp\n");

    assert_eq!(read(p, ".opencode/my-plugin/rules/common/review.md"), "Review rules.\n");
    assert_eq!(read(p, ".opencode/my-plugin/templates/pr.md"), "PR template.\n");
    assert_eq!(read(p, ".opencode/my-plugin/.ombc-managed"), "mp\n");
    assert!(!p.join(".opencode/my-plugin/docs").exists());
    assert!(!p.join(".opencode/my-plugin/skills").exists());

    let command = read(p, ".opencode/commands/deploy.md");
    assert!(command.contains("model: anthropic/claude-sonnet-4-5"), "{command}");
    assert!(command.contains("tools:\n  read: true\n  bash: true"), "{command}");
    assert!(command.contains("Follow .opencode/my-plugin/rules/common/review.md"));
    assert!(read(p, ".opencode/agents/helper.md").contains("tools:\n  grep: true"));

    let registry = registry_json(p);
    let entry = &registry["installations"]["mp"];
    assert_eq!(entry["skills"], serde_json::json!(["review"]));
    assert_eq!(entry["placedDirs"], serde_json::json!([".opencode/my-plugin"]));
    assert_eq!(entry["plugins"], serde_json::json!(["my-plugin"]));
    assert!(entry.get("pluginFilter").is_none());
}

#[test]
fn reinstall_is_byte_identical_and_keeps_install_time() {
    let source = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    review_marketplace(source.path(), "mp");
    let m = materializer(project.path());

    m.install_from_dir(source.path(), &local(source.path()), &InstallOptions::default())
        .unwrap();
    let first = snapshot(project.path());
    let installed_at = registry_json(project.path())["installations"]["mp"]["installedAt"].clone();

    let summary = m
        .install_from_dir(source.path(), &local(source.path()), &InstallOptions::default())
        .unwrap();
    assert!(summary.conflicts.is_empty());
    assert_eq!(snapshot(project.path()), first);
    assert_eq!(
        registry_json(project.path())["installations"]["mp"]["installedAt"],
        installed_at
    );
}

#[test]
fn reinstall_drops_paths_no_longer_produced() {
    let source = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    review_marketplace(source.path(), "mp");
    let m = materializer(project.path());
    m.install_from_dir(source.path(), &local(source.path()), &InstallOptions::default())
        .unwrap();

    std::fs::remove_dir_all(source.path().join("skills")).unwrap();
    std::fs::remove_file(source.path().join("agents/helper.md")).unwrap();
    let summary = m
        .install_from_dir(source.path(), &local(source.path()), &InstallOptions::default())
        .unwrap();

    assert!(summary.skills.is_empty());
    assert!(!project.path().join(".opencode/skills/review").exists());
    assert!(!project.path().join(".opencode/agents/helper.md").exists());
    // Still reachable from the command.
    assert!(project.path().join(".opencode/my-plugin/rules/common/review.md").exists());
    assert!(!project.path().join(".opencode/my-plugin/templates").exists());
}

#[test]
fn reference_cycles_terminate() {
    let source = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    manifest(source.path(), r#"{"name":"mp","plugins":[{"name":"p"}]}"#);
    write(source.path(), "commands/go.md", "start at rules/a.md");
    write(source.path(), "rules/a.md", "then rules/b.md");
    write(source.path(), "rules/b.md", "back to rules/a.md");

    materializer(project.path())
        .install_from_dir(source.path(), &local(source.path()), &InstallOptions::default())
        .unwrap();
    assert_eq!(
        read(project.path(), ".opencode/p/rules/a.md"),
        "then .opencode/p/rules/b.md"
    );
    assert_eq!(
        read(project.path(), ".opencode/p/rules/b.md"),
        "back to .opencode/p/rules/a.md"
    );
}

#[test]
fn references_only_inside_noise_are_not_materialized() {
    let source = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    manifest(source.path(), r#"{"name":"mp","plugins":[{"name":"p"}]}"#);
    write(
        source.path(),
        "skills/s/SKILL.md",
        "```bash\ncat rules/a.md\n```\n| file |\n|---|\n| rules/a.md |\n└── rules/a.md\n",
    );
    write(source.path(), "rules/a.md", "a");

    let summary = materializer(project.path())
        .install_from_dir(source.path(), &local(source.path()), &InstallOptions::default())
        .unwrap();
    assert!(summary.placed_paths.is_empty());
    assert!(!project.path().join(".opencode/p").exists());
    assert_eq!(
        registry_json(project.path())["installations"]["mp"]["placedDirs"],
        serde_json::json!([])
    );
}

#[test]
fn nested_plugin_sources_and_filter() {
    let source = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    manifest(
        source.path(),
        r#"{"name":"mp","plugins":[{"name":"a","source":"./plugins/a"},{"name":"b","source":"plugins/b/"}]}"#,
    );
    write(source.path(), "plugins/a/commands/one.md", "see rules/x.md");
    write(source.path(), "plugins/a/rules/x.md", "x");
    write(source.path(), "plugins/b/commands/two.md", "see ./rules/y.md");
    write(source.path(), "plugins/b/rules/y.md", "y");
    let m = materializer(project.path());

    let options = InstallOptions {
        subpackage_filter: Some("b".into()),
        ..InstallOptions::default()
    };
    let summary = m
        .install_from_dir(source.path(), &local(source.path()), &options)
        .unwrap();
    assert_eq!(summary.subpackages, vec!["b".to_string()]);
    assert_eq!(summary.commands, vec!["two".to_string()]);
    assert_eq!(
        read(project.path(), ".opencode/commands/two.md"),
        "see .opencode/b/rules/y.md"
    );
    assert!(project.path().join(".opencode/b/rules/y.md").exists());
    assert!(!project.path().join(".opencode/a").exists());
    assert_eq!(
        registry_json(project.path())["installations"]["mp"]["pluginFilter"],
        "b"
    );

    let options = InstallOptions {
        subpackage_filter: Some("zzz".into()),
        ..InstallOptions::default()
    };
    let err = m
        .install_from_dir(source.path(), &local(source.path()), &options)
        .unwrap_err();
    assert!(matches!(err, Error::SubpackageNotFound { .. }), "{err}");
    assert_eq!(err.to_string(), "plugin \"zzz\" not found in marketplace");
}

#[test]
fn duplicate_flat_names_across_plugins_last_wins() {
    let source = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    manifest(
        source.path(),
        r#"{"name":"mp","plugins":[{"name":"a","source":"./a"},{"name":"b","source":"./b"}]}"#,
    );
    write(source.path(), "a/commands/deploy.md", "from a");
    write(source.path(), "b/commands/deploy.md", "from b");

    let summary = materializer(project.path())
        .install_from_dir(source.path(), &local(source.path()), &InstallOptions::default())
        .unwrap();
    assert!(summary.conflicts.is_empty());
    assert_eq!(summary.commands, vec!["deploy".to_string()]);
    assert_eq!(read(project.path(), ".opencode/commands/deploy.md"), "from b");
}

#[test]
fn invalid_plugin_source_writes_nothing() {
    let source = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    manifest(
        source.path(),
        r#"{"name":"mp","plugins":[{"name":"ok"},{"name":"bad","source":"../outside"}]}"#,
    );
    write(source.path(), "commands/go.md", "go");

    let err = materializer(project.path())
        .install_from_dir(source.path(), &local(source.path()), &InstallOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::InvalidSubpackage { .. }), "{err}");
    assert!(!project.path().join(".opencode").exists());
}

#[test]
fn corrupt_registry_is_replaced() {
    let source = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    review_marketplace(source.path(), "mp");
    write(project.path(), ".opencode/.ombc-registry.json", "{ not json");

    materializer(project.path())
        .install_from_dir(source.path(), &local(source.path()), &InstallOptions::default())
        .unwrap();
    assert!(registry_json(project.path())["installations"]["mp"].is_object());
}

// ── Boundary ────────────────────────────────────────────────────────────────

#[cfg(unix)]
#[test]
fn referenced_symlink_outside_source_aborts_without_output() {
    let outside = tempfile::tempdir().unwrap();
    write(outside.path(), "secret.md", "secret");
    let source = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    manifest(source.path(), r#"{"name":"mp","plugins":[{"name":"p"}]}"#);
    write(source.path(), "skills/s/SKILL.md", "Read rules/secret.md");
    std::os::unix::fs::symlink(outside.path(), source.path().join("rules")).unwrap();

    let err = materializer(project.path())
        .install_from_dir(source.path(), &local(source.path()), &InstallOptions::default())
        .unwrap_err();
    assert!(err.is_boundary_violation(), "{err}");
    assert!(err.to_string().starts_with("Symbolic link escapes source root"));
    assert!(!project.path().join(".opencode").exists());
}

#[cfg(unix)]
#[test]
fn escaping_link_inside_a_skill_aborts_before_any_write() {
    let outside = tempfile::tempdir().unwrap();
    write(outside.path(), "secret.md", "secret");
    let source = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    manifest(
        source.path(),
        r#"{"name":"mp","plugins":[{"name":"a","source":"./a"},{"name":"b","source":"./b"}]}"#,
    );
    write(source.path(), "a/commands/fine.md", "fine");
    write(source.path(), "b/skills/s/SKILL.md", "skill");
    std::os::unix::fs::symlink(
        outside.path().join("secret.md"),
        source.path().join("b/skills/s/leak.md"),
    )
    .unwrap();

    let err = materializer(project.path())
        .install_from_dir(source.path(), &local(source.path()), &InstallOptions::default())
        .unwrap_err();
    assert!(err.is_boundary_violation(), "{err}");
    assert!(!project.path().join(".opencode/commands/fine.md").exists());
    assert!(!project.path().join(".opencode/.ombc-registry.json").exists());
}

#[cfg(unix)]
#[test]
fn internal_symlinks_are_materialized_as_files() {
    let source = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    manifest(source.path(), r#"{"name":"mp","plugins":[{"name":"p"}]}"#);
    write(source.path(), "skills/s/SKILL.md", "Use shared/base.md");
    write(source.path(), "vendor/base.md", "base");
    std::os::unix::fs::symlink(source.path().join("vendor"), source.path().join("shared")).unwrap();

    materializer(project.path())
        .install_from_dir(source.path(), &local(source.path()), &InstallOptions::default())
        .unwrap();
    let placed = project.path().join(".opencode/p/shared/base.md");
    assert_eq!(std::fs::read_to_string(&placed).unwrap(), "base");
    assert!(!std::fs::symlink_metadata(&placed).unwrap().file_type().is_symlink());
}

// ── Ownership ───────────────────────────────────────────────────────────────

#[test]
fn foreign_paths_need_force_and_are_reassigned() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    review_marketplace(first.path(), "mp-a");
    review_marketplace(second.path(), "mp-b");
    write(second.path(), "skills/review/SKILL.md", "second version");
    let m = materializer(project.path());

    m.install_from_dir(first.path(), &local(first.path()), &InstallOptions::default())
        .unwrap();
    let before = snapshot(project.path());

    let summary = m
        .install_from_dir(second.path(), &local(second.path()), &InstallOptions::default())
        .unwrap();
    assert!(summary.skills.is_empty());
    assert!(summary.commands.is_empty());
    assert!(summary.placed_paths.is_empty());
    assert!(summary.conflicts.iter().any(|c| {
        c.to_string() == "Skipping skill review: owned by mp-a (use --force to overwrite)"
    }));
    assert!(summary
        .conflicts
        .iter()
        .all(|c| c.reason == ConflictReason::OwnedBy("mp-a".into())));
    assert_eq!(snapshot(project.path()), before);

    let summary = m
        .install_from_dir(second.path(), &local(second.path()), &forced())
        .unwrap();
    assert!(summary.conflicts.is_empty());
    assert_eq!(summary.skills, vec!["review".to_string()]);
    assert_eq!(
        read(project.path(), ".opencode/skills/review/SKILL.md"),
        "second version"
    );
    assert_eq!(read(project.path(), ".opencode/skills/review/.ombc-managed"), "mp-b\n");

    let registry = registry_json(project.path());
    let a = &registry["installations"]["mp-a"];
    assert_eq!(a["skills"], serde_json::json!([]));
    assert_eq!(a["commands"], serde_json::json!([]));
    assert_eq!(a["placedDirs"], serde_json::json!([]));
    assert_eq!(registry["installations"]["mp-b"]["commands"], serde_json::json!(["deploy"]));

    // mp-a no longer owns anything it could remove.
    assert!(m.uninstall("mp-a").unwrap());
    assert!(project.path().join(".opencode/skills/review/SKILL.md").exists());
    assert!(project.path().join(".opencode/commands/deploy.md").exists());
    assert!(project.path().join(".opencode/my-plugin").exists());
}

#[test]
fn user_managed_paths_are_never_touched() {
    let source = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    review_marketplace(source.path(), "mp");
    write(project.path(), ".opencode/skills/review/SKILL.md", "mine");
    write(project.path(), ".opencode/commands/deploy.md", "mine too");
    write(project.path(), ".opencode/my-plugin/notes.md", "my notes");

    let summary = materializer(project.path())
        .install_from_dir(source.path(), &local(source.path()), &forced())
        .unwrap();

    let messages: Vec<String> = summary.conflicts.iter().map(ToString::to_string).collect();
    assert_eq!(
        messages,
        vec![
            "Skipping skill review: user-managed skill exists".to_string(),
            "Skipping command deploy: user-managed file exists".to_string(),
            "Skipping plugin directory my-plugin: user-managed directory exists".to_string(),
        ]
    );
    assert_eq!(read(project.path(), ".opencode/skills/review/SKILL.md"), "mine");
    assert_eq!(read(project.path(), ".opencode/commands/deploy.md"), "mine too");
    assert!(!project.path().join(".opencode/my-plugin/rules").exists());
    assert_eq!(summary.agents, vec!["helper".to_string()]);
}

#[test]
fn unknown_legacy_owner_requires_force() {
    let source = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    review_marketplace(source.path(), "mp");
    write(
        project.path(),
        ".opencode/skills/review/.my-marketplace-managed",
        "managed by my-marketplace",
    );
    let m = materializer(project.path());

    let summary = m
        .install_from_dir(source.path(), &local(source.path()), &InstallOptions::default())
        .unwrap();
    assert_eq!(summary.conflicts[0].reason, ConflictReason::UnknownOwner);

    let summary = m
        .install_from_dir(source.path(), &local(source.path()), &forced())
        .unwrap();
    assert_eq!(summary.skills, vec!["review".to_string()]);
    assert!(!project
        .path()
        .join(".opencode/skills/review/.my-marketplace-managed")
        .exists());
}

// ── Uninstall ───────────────────────────────────────────────────────────────

#[test]
fn uninstall_removes_owned_paths_and_empty_parents() {
    let source = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    review_marketplace(source.path(), "mp");
    write(project.path(), ".opencode/commands/mine.md", "user command");
    let m = materializer(project.path());
    m.install_from_dir(source.path(), &local(source.path()), &InstallOptions::default())
        .unwrap();

    assert!(m.uninstall("mp").unwrap());
    let p = project.path();
    assert!(!p.join(".opencode/skills").exists());
    assert!(!p.join(".opencode/agents").exists());
    assert!(!p.join(".opencode/my-plugin").exists());
    assert!(!p.join(".opencode/commands/deploy.md").exists());
    assert_eq!(read(p, ".opencode/commands/mine.md"), "user command");
    assert!(p.join(".opencode").is_dir());
    assert!(registry_json(p)["installations"].as_object().unwrap().is_empty());
    assert!(m.list().is_empty());

    assert!(!m.uninstall("mp").unwrap());
}

#[test]
fn legacy_layout_is_cleaned_up_on_reinstall() {
    let source = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    review_marketplace(source.path(), "mp");
    let p = project.path();
    write(
        p,
        ".opencode/.my-marketplace-registry.json",
        r#"{"installations":{"mp":{"source":"o/r","plugins":["my-plugin"],"skills":["review"],"commands":["old"],"agents":[],"cacheDir":".opencode/plugins/cache/mp","installedAt":"2025-01-01T00:00:00.000Z","lastUpdated":"2025-01-01T00:00:00.000Z"}}}"#,
    );
    write(p, ".opencode/skills/review/.my-marketplace-managed", "");
    write(p, ".opencode/skills/review/SKILL.md", "old");
    write(p, ".opencode/commands/old.md", "old");
    write(p, ".opencode/plugins/cache/mp/rules/x.md", "cached");

    materializer(p)
        .install_from_dir(source.path(), &local(source.path()), &InstallOptions::default())
        .unwrap();

    assert!(!p.join(".opencode/plugins").exists());
    assert!(!p.join(".opencode/commands/old.md").exists());
    assert!(!p.join(".opencode/.my-marketplace-registry.json").exists());
    assert_eq!(read(p, ".opencode/skills/review/.ombc-managed"), "mp\n");
    let entry = &registry_json(p)["installations"]["mp"];
    assert!(entry.get("cacheDir").is_none());
    assert_eq!(entry["installedAt"], "2025-01-01T00:00:00Z");
}

#[test]
fn legacy_root_level_placed_dirs_are_removed_when_marked_as_ours() {
    let project = tempfile::tempdir().unwrap();
    let p = project.path();
    write(
        p,
        ".opencode/.ombc-registry.json",
        r#"{"installations":{"mp":{"source":"o/r","plugins":["my-plugin"],"placedDirs":["rules","docs","src","../escape"]}}}"#,
    );
    write(p, "rules/.ombc-managed", "mp\n");
    write(p, "rules/a.md", "ours");
    write(p, "docs/.ombc-managed", "other-mp\n");
    write(p, "docs/a.md", "theirs");
    write(p, "src/main.rs", "user code");

    assert!(materializer(p).uninstall("mp").unwrap());

    assert!(!p.join("rules").exists());
    assert_eq!(read(p, "docs/a.md"), "theirs");
    assert_eq!(read(p, "src/main.rs"), "user code");
}

// ── Remote sources & update ─────────────────────────────────────────────────

#[tokio::test]
async fn fetched_source_is_installed_and_temp_dir_removed() {
    let upstream = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    review_marketplace(upstream.path(), "mp");
    let fetcher = CopyFetcher::new(upstream.path());

    let summary = materializer(project.path())
        .install("owner/repo", &InstallOptions::default(), &fetcher)
        .await
        .unwrap();

    assert_eq!(summary.origin, "owner/repo");
    assert!(project.path().join(".opencode/skills/review/SKILL.md").exists());
    assert!(!fetcher.fetched_into().exists());
    assert_eq!(
        registry_json(project.path())["installations"]["mp"]["source"],
        "owner/repo"
    );
}

#[tokio::test]
async fn failed_fetch_cleans_up_and_writes_nothing() {
    let project = tempfile::tempdir().unwrap();
    let fetcher = FailingFetcher {
        dest: Mutex::new(None),
    };

    let err = materializer(project.path())
        .install(
            "https://example.com/team/market.git",
            &InstallOptions::default(),
            &fetcher,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::SourceAcquisition { .. }), "{err}");
    assert!(err.to_string().contains("failed to clone"));
    assert!(!fetcher.dest.lock().unwrap().clone().unwrap().exists());
    assert!(!project.path().join(".opencode").exists());
}

#[tokio::test]
async fn manifest_without_name_uses_source_base_name() {
    let upstream = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    manifest(upstream.path(), r#"{"plugins":[{"name":"p"}]}"#);
    write(upstream.path(), "commands/go.md", "go");

    let summary = materializer(project.path())
        .install(
            "git@example.com:team/market.git",
            &InstallOptions::default(),
            &CopyFetcher::new(upstream.path()),
        )
        .await
        .unwrap();
    assert_eq!(summary.source_identity, "market");
}

#[tokio::test]
async fn update_reinstalls_from_recorded_origin_and_collects_failures() {
    let upstream = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    review_marketplace(upstream.path(), "mp");
    let m = materializer(project.path());
    let fetcher = CopyFetcher::new(upstream.path());

    m.install(
        upstream.path().to_str().unwrap(),
        &InstallOptions::default(),
        &fetcher,
    )
    .await
    .unwrap();

    let gone = tempfile::tempdir().unwrap();
    manifest(gone.path(), r#"{"name":"gone","plugins":[{"name":"g"}]}"#);
    write(gone.path(), "commands/g.md", "g");
    m.install(gone.path().to_str().unwrap(), &InstallOptions::default(), &fetcher)
        .await
        .unwrap();
    let gone_path = gone.path().to_path_buf();
    drop(gone);
    assert!(!gone_path.exists());

    write(upstream.path(), "templates/pr.md", "New template.\n");
    let summary = m.update(None, false, &fetcher).await;
    assert_eq!(summary.updated, vec!["mp".to_string()]);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, "gone");
    assert!(summary.failed[0].1.contains("local path not found"));
    assert_eq!(
        read(project.path(), ".opencode/my-plugin/templates/pr.md"),
        "New template.\n"
    );

    let summary = m.update(Some("nope"), false, &fetcher).await;
    assert!(summary.updated.is_empty());
    assert_eq!(
        summary.failed,
        vec![("nope".to_string(), "not installed".to_string())]
    );
}

#[tokio::test]
async fn list_is_sorted_by_name() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    manifest(a.path(), r#"{"name":"zeta","plugins":[]}"#);
    manifest(b.path(), r#"{"name":"alpha","plugins":[]}"#);
    let m = materializer(project.path());
    let fetcher = CopyFetcher::new(a.path());

    for source in [a.path(), b.path()] {
        m.install(source.to_str().unwrap(), &InstallOptions::default(), &fetcher)
            .await
            .unwrap();
    }
    let names: Vec<String> = m.list().into_iter().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["alpha".to_string(), "zeta".to_string()]);
}
