//! Install, uninstall, update and list marketplaces in one project.
//!
//! An install plans every sub-package (roots, reachability, copy sources) in
//! strict boundary mode before touching the destination, so a violation
//! leaves the project and the registry exactly as they were. Ownership
//! conflicts are recoverable: the path is skipped and reported.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use {
    chrono::Utc,
    ombc_config::BridgeConfig,
    tracing::{debug, info, warn},
};

use crate::{
    boundary::{Boundary, BoundaryMode},
    error::{Error, Result},
    graph::{GraphBuilder, Reachability},
    layout::{Category, Layout, is_single_component},
    marketplace::{PluginSpec, is_valid_identity, parse_marketplace},
    ownership::{
        ConflictReason, Decision, MarkerProbe, OwnershipProbe, OwnershipState, RegistryProbe, decide,
        marker_state, write_marker,
    },
    registry::{Registry, RegistryEntry, RegistryStore},
    rewrite::ContentRewriter,
    source::{SourceFetcher, SourceSpec, acquire},
};

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Replace paths owned by other sources.
    pub force: bool,
    /// Install only the sub-package with this name.
    pub subpackage_filter: Option<String>,
}

/// A destination skipped because someone else owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub category: Category,
    pub name: String,
    pub reason: ConflictReason,
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Skipping {} {}: ", self.category, self.name)?;
        match &self.reason {
            ConflictReason::OwnedBy(owner) => {
                write!(f, "owned by {owner} (use --force to overwrite)")
            },
            ConflictReason::UnknownOwner => {
                write!(f, "owned by another marketplace (use --force to overwrite)")
            },
            ConflictReason::UserManaged => {
                let what = match self.category {
                    Category::Skill => "skill",
                    Category::Command | Category::Agent => "file",
                    Category::Subtree => "directory",
                };
                write!(f, "user-managed {what} exists")
            },
        }
    }
}

/// What one install produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallSummary {
    pub source_identity: String,
    pub origin: String,
    pub subpackage_filter: Option<String>,
    pub subpackages: Vec<String>,
    /// Project-relative sub-package subtrees.
    pub placed_paths: Vec<String>,
    pub skills: Vec<String>,
    pub commands: Vec<String>,
    pub agents: Vec<String>,
    pub conflicts: Vec<Conflict>,
}

impl InstallSummary {
    fn names_mut(&mut self, category: Category) -> &mut Vec<String> {
        match category {
            Category::Skill => &mut self.skills,
            Category::Command => &mut self.commands,
            Category::Agent => &mut self.agents,
            Category::Subtree => &mut self.placed_paths,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub updated: Vec<String>,
    /// `(source identity, error message)`.
    pub failed: Vec<(String, String)>,
}

/// Everything needed to materialize one sub-package, computed up front.
#[derive(Debug)]
struct SubpackagePlan {
    name: String,
    root: PathBuf,
    closure: Reachability,
    /// Skill name → files relative to the skill directory.
    skills: Vec<(String, Vec<PathBuf>)>,
    commands: Vec<String>,
    agents: Vec<String>,
}

impl SubpackagePlan {
    fn flat_names(&self, category: Category) -> &[String] {
        match category {
            Category::Command => &self.commands,
            Category::Agent => &self.agents,
            Category::Skill | Category::Subtree => &[],
        }
    }
}

/// Per-run state threaded through the placement steps.
struct Run<'a> {
    identity: &'a str,
    force: bool,
    registry: Registry,
    owned_commands: HashSet<String>,
    owned_agents: HashSet<String>,
    summary: InstallSummary,
}

impl Run<'_> {
    fn admit(&mut self, category: Category, name: &str, state: &OwnershipState) -> bool {
        self.admit_recorded(category, name, name, state)
    }

    /// Ask whether a destination may be written, recording refusals and
    /// dropping the previous owner's claim (`recorded` as it appears in the
    /// registry) on reassignment.
    fn admit_recorded(
        &mut self,
        category: Category,
        name: &str,
        recorded: &str,
        state: &OwnershipState,
    ) -> bool {
        match decide(state, self.identity, self.force) {
            Decision::Refuse(reason) => {
                let conflict = Conflict {
                    category,
                    name: name.to_string(),
                    reason,
                };
                warn!(%conflict, "ownership conflict");
                self.summary.conflicts.push(conflict);
                false
            },
            Decision::Reassign { previous } => {
                info!(
                    category = %category,
                    name,
                    previous = previous.as_deref().unwrap_or("unknown"),
                    "reassigning ownership"
                );
                if let Some(previous) = previous {
                    self.registry.forget(&previous, category, recorded);
                }
                true
            },
            Decision::Create | Decision::Replace => true,
        }
    }

    fn record(&mut self, category: Category, name: String) {
        let names = self.summary.names_mut(category);
        if !names.contains(&name) {
            names.push(name);
        }
    }
}

/// Materializes marketplaces into one project.
pub struct Materializer {
    layout: Layout,
    config: BridgeConfig,
}

impl Materializer {
    #[must_use]
    pub fn new(project_root: &Path, config: BridgeConfig) -> Self {
        Self {
            layout: Layout::new(project_root, &config),
            config,
        }
    }

    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    fn store(&self) -> RegistryStore {
        RegistryStore::new(self.layout.project_root(), &self.config)
    }

    /// Resolve `source`, fetching it if remote, and install it. A fetched
    /// tree is removed before this returns, on success or failure.
    pub async fn install(
        &self,
        source: &str,
        options: &InstallOptions,
        fetcher: &dyn SourceFetcher,
    ) -> Result<InstallSummary> {
        let cwd = std::env::current_dir()?;
        let spec = SourceSpec::parse(source, &cwd);
        let acquired = acquire(&spec, fetcher).await?;
        debug!(
            origin = %spec.origin(),
            root = %acquired.root().display(),
            temporary = acquired.is_temporary(),
            "acquired source"
        );
        self.install_from_dir(acquired.root(), &spec, options)
    }

    /// Install from an already available source tree.
    pub fn install_from_dir(
        &self,
        source_root: &Path,
        spec: &SourceSpec,
        options: &InstallOptions,
    ) -> Result<InstallSummary> {
        let origin = spec.origin();
        let marketplace = parse_marketplace(source_root)?;
        let identity = marketplace
            .name
            .clone()
            .unwrap_or_else(|| spec.default_identity());
        if !is_valid_identity(&identity) {
            return Err(Error::acquisition(
                &origin,
                format!("cannot use {identity:?} as a marketplace name"),
            ));
        }

        let selected: Vec<&PluginSpec> = match &options.subpackage_filter {
            Some(filter) => {
                let selected: Vec<_> = marketplace
                    .plugins
                    .iter()
                    .filter(|p| &p.name == filter)
                    .collect();
                if selected.is_empty() {
                    return Err(Error::SubpackageNotFound {
                        name: filter.clone(),
                    });
                }
                selected
            },
            None => marketplace.plugins.iter().collect(),
        };

        let plans = selected
            .iter()
            .map(|plugin| self.plan(source_root, plugin))
            .collect::<Result<Vec<_>>>()?;

        let store = self.store();
        let mut registry = store.load();
        let previous = registry.installations.remove(&identity);
        if let Some(previous) = &previous {
            self.release(&identity, previous)?;
        }

        let mut run = Run {
            identity: &identity,
            force: options.force,
            registry,
            owned_commands: HashSet::new(),
            owned_agents: HashSet::new(),
            summary: InstallSummary {
                source_identity: identity.clone(),
                origin: origin.clone(),
                subpackage_filter: options.subpackage_filter.clone(),
                ..InstallSummary::default()
            },
        };

        for plan in &plans {
            run.summary.subpackages.push(plan.name.clone());
            let prefix = self.layout.destination_prefix(&plan.name);
            let dirs: Vec<&str> = plan.closure.dirs.iter().map(String::as_str).collect();
            let rewriter = ContentRewriter::new(&self.config, &prefix, &dirs)?;

            self.place_skills(plan, &rewriter, &mut run)?;
            self.place_flat(Category::Command, plan, &rewriter, &mut run)?;
            self.place_flat(Category::Agent, plan, &rewriter, &mut run)?;
            self.place_subtree(plan, &rewriter, &mut run)?;
        }

        let now = Utc::now();
        let summary = run.summary;
        let mut registry = run.registry;
        registry.installations.insert(identity.clone(), RegistryEntry {
            source: origin,
            plugins: summary.subpackages.clone(),
            plugin_filter: options.subpackage_filter.clone(),
            skills: summary.skills.clone(),
            commands: summary.commands.clone(),
            agents: summary.agents.clone(),
            placed_dirs: summary.placed_paths.clone(),
            installed_at: previous.as_ref().map_or(now, |p| p.installed_at),
            last_updated: now,
            cache_dir: None,
        });
        store.save(&registry)?;

        info!(
            marketplace = %identity,
            plugins = summary.subpackages.len(),
            skills = summary.skills.len(),
            commands = summary.commands.len(),
            agents = summary.agents.len(),
            placed = summary.placed_paths.len(),
            conflicts = summary.conflicts.len(),
            "installed marketplace"
        );
        Ok(summary)
    }

    /// Remove everything `identity` owns. `false` if it is not installed.
    pub fn uninstall(&self, identity: &str) -> Result<bool> {
        let store = self.store();
        let mut registry = store.load();
        let Some(entry) = registry.installations.remove(identity) else {
            info!(marketplace = %identity, "not installed");
            return Ok(false);
        };
        self.release(identity, &entry)?;
        store.save(&registry)?;
        info!(marketplace = %identity, "uninstalled marketplace");
        Ok(true)
    }

    /// Reinstall one or every recorded source from its origin with its
    /// recorded sub-package filter. Failures are collected; the remaining
    /// sources still update.
    pub async fn update(
        &self,
        identity: Option<&str>,
        force: bool,
        fetcher: &dyn SourceFetcher,
    ) -> UpdateSummary {
        let registry = self.store().load();
        let mut summary = UpdateSummary::default();
        let targets: Vec<(String, RegistryEntry)> = match identity {
            Some(name) => match registry.installations.get(name) {
                Some(entry) => vec![(name.to_string(), entry.clone())],
                None => {
                    summary
                        .failed
                        .push((name.to_string(), "not installed".to_string()));
                    return summary;
                },
            },
            None => registry.installations.into_iter().collect(),
        };

        for (name, entry) in targets {
            let options = InstallOptions {
                force,
                subpackage_filter: entry.plugin_filter.clone(),
            };
            match self.install(&entry.source, &options, fetcher).await {
                Ok(result) => {
                    if result.source_identity != name {
                        warn!(
                            recorded = %name,
                            current = %result.source_identity,
                            "marketplace name changed upstream"
                        );
                    }
                    summary.updated.push(name);
                },
                Err(e) => {
                    warn!(marketplace = %name, error = %e, "update failed");
                    summary.failed.push((name, e.to_string()));
                },
            }
        }
        summary
    }

    /// Recorded installations in name order.
    #[must_use]
    pub fn list(&self) -> Vec<(String, RegistryEntry)> {
        self.store().load().installations.into_iter().collect()
    }

    fn plan(&self, source_root: &Path, plugin: &PluginSpec) -> Result<SubpackagePlan> {
        let (root, _) = plugin.resolve_root(source_root)?;
        let closure = GraphBuilder::new(&self.config)
            .with_mode(BoundaryMode::Strict)
            .build(source_root, &root)?;
        let boundary =
            Boundary::new(source_root, BoundaryMode::Strict)?.with_exclude(&self.config.copy_exclude);

        let skills_dir = root.join("skills");
        let mut skills = Vec::new();
        for name in boundary.list_dirs(&skills_dir)? {
            let files = boundary.walk_files(&skills_dir.join(&name))?;
            skills.push((name, files));
        }
        let commands = flat_documents(&boundary, &root.join("commands"))?;
        let agents = flat_documents(&boundary, &root.join("agents"))?;

        debug!(
            plugin = %plugin.name,
            skills = skills.len(),
            commands = commands.len(),
            agents = agents.len(),
            reachable = closure.files.len(),
            "planned sub-package"
        );
        Ok(SubpackagePlan {
            name: plugin.name.clone(),
            root,
            closure,
            skills,
            commands,
            agents,
        })
    }

    fn place_skills(&self, plan: &SubpackagePlan, rewriter: &ContentRewriter, run: &mut Run<'_>) -> Result<()> {
        let skills_root = self.layout.category_root(Category::Skill);
        let probe = MarkerProbe::new(&skills_root, &self.config.marker_file);
        for (name, files) in &plan.skills {
            let dest = self.layout.destination(Category::Skill, name);
            let state = probe.probe(name)?;
            if !run.admit(Category::Skill, name, &state) {
                continue;
            }
            remove_path(&dest)?;
            std::fs::create_dir_all(&dest)?;
            let from = plan.root.join("skills").join(name);
            for file in files {
                self.copy_file(&from.join(file), &dest.join(file), rewriter)?;
            }
            write_marker(&dest, &self.config.marker_file, run.identity)?;
            run.record(Category::Skill, name.clone());
        }
        Ok(())
    }

    fn place_flat(
        &self,
        category: Category,
        plan: &SubpackagePlan,
        rewriter: &ContentRewriter,
        run: &mut Run<'_>,
    ) -> Result<()> {
        let names = plan.flat_names(category);
        if names.is_empty() {
            return Ok(());
        }
        let target_dir = self.layout.category_root(category);
        let states = {
            let owned = match category {
                Category::Agent => &run.owned_agents,
                _ => &run.owned_commands,
            };
            let probe = RegistryProbe::new(
                &target_dir,
                run.registry.owners(category),
                owned,
                run.identity,
            );
            names
                .iter()
                .map(|name| Ok((name, probe.probe(name)?)))
                .collect::<Result<Vec<_>>>()?
        };

        std::fs::create_dir_all(&target_dir)?;
        let from_dir = plan.root.join(category.source_dir().unwrap_or_default());
        for (name, state) in states {
            if !run.admit(category, name, &state) {
                continue;
            }
            let dest = self.layout.destination(category, name);
            remove_path(&dest)?;
            self.copy_file(&from_dir.join(format!("{name}.md")), &dest, rewriter)?;
            match category {
                Category::Agent => run.owned_agents.insert(name.clone()),
                _ => run.owned_commands.insert(name.clone()),
            };
            run.record(category, name.clone());
        }
        Ok(())
    }

    fn place_subtree(&self, plan: &SubpackagePlan, rewriter: &ContentRewriter, run: &mut Run<'_>) -> Result<()> {
        if plan.closure.is_empty() {
            return Ok(());
        }
        let dest = self.layout.destination(Category::Subtree, &plan.name);
        let recorded = self.layout.placed_dir(&plan.name);
        let state = marker_state(&dest, &self.config.marker_file)?;
        if !run.admit_recorded(Category::Subtree, &plan.name, &recorded, &state) {
            return Ok(());
        }
        remove_path(&dest)?;
        std::fs::create_dir_all(&dest)?;
        for file in &plan.closure.files {
            self.copy_file(&plan.root.join(file), &dest.join(file), rewriter)?;
        }
        write_marker(&dest, &self.config.marker_file, run.identity)?;
        run.record(Category::Subtree, recorded);
        Ok(())
    }

    /// Write one file, rewriting scannable text and copying anything else
    /// byte for byte.
    fn copy_file(&self, from: &Path, to: &Path, rewriter: &ContentRewriter) -> Result<()> {
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let scannable = from
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.config.is_scannable_extension(e));
        if scannable {
            match std::fs::read_to_string(from) {
                Ok(text) => {
                    std::fs::write(to, rewriter.rewrite(&text))?;
                    return Ok(());
                },
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    debug!(path = %from.display(), "not UTF-8, copying unchanged");
                },
                Err(e) => return Err(e.into()),
            }
        }
        std::fs::copy(from, to)?;
        Ok(())
    }

    /// Remove every destination recorded for `identity` that it still owns.
    fn release(&self, identity: &str, entry: &RegistryEntry) -> Result<()> {
        for name in &entry.skills {
            if !is_single_component(name) {
                continue;
            }
            let dir = self.layout.destination(Category::Skill, name);
            if marker_state(&dir, &self.config.marker_file)?.releasable_by(identity) {
                remove_path(&dir)?;
                self.prune_empty_parents(&dir);
            }
        }

        for category in [Category::Command, Category::Agent] {
            for name in entry.names(category) {
                if !is_single_component(name) {
                    continue;
                }
                let file = self.layout.destination(category, name);
                remove_path(&file)?;
                self.prune_empty_parents(&file);
            }
        }

        for placed in &entry.placed_dirs {
            let Some(dir) = self.layout.resolve_placed(placed) else {
                warn!(path = %placed, "ignoring recorded path outside the project");
                continue;
            };
            if marker_state(&dir, &self.config.marker_file)?.releasable_by(identity) {
                remove_path(&dir)?;
                self.prune_empty_parents(&dir);
            }
        }

        if let Some(cache) = &entry.cache_dir {
            if let Some(dir) = self.layout.resolve_recorded(cache) {
                remove_path(&dir)?;
                debug!(path = %dir.display(), "removed legacy cache directory");
            }
            let cache_root = self.layout.legacy_cache_root();
            for dir in [cache_root.as_path(), cache_root.parent().unwrap_or(cache_root.as_path())] {
                if dir.is_dir() && std::fs::remove_dir(dir).is_err() {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Remove empty directories above `path`, stopping at the managed root.
    fn prune_empty_parents(&self, path: &Path) {
        let stop = self.layout.managed_root();
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == stop || !dir.starts_with(&stop) {
                break;
            }
            if std::fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

/// Names of the `<name>.md` documents directly inside `dir`.
fn flat_documents(boundary: &Boundary, dir: &Path) -> Result<Vec<String>> {
    Ok(boundary
        .list_files(dir)?
        .into_iter()
        .filter_map(|file| file.strip_suffix(".md").map(str::to_string))
        .filter(|name| !name.is_empty())
        .collect())
}

/// Remove a file, link, or directory tree; missing paths are fine.
fn remove_path(path: &Path) -> Result<()> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if meta.is_dir() {
        std::fs::remove_dir_all(path)?;
    } else {
        std::fs::remove_file(path)?;
    }
    Ok(())
}
