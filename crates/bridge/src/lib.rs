//! Selective materialization of plugin marketplaces into a project.
//!
//! A marketplace is a source tree with `.claude-plugin/marketplace.json`
//! listing sub-packages. Each sub-package exposes entry documents under
//! `skills/`, `commands/` and `agents/`; everything else is copied only when
//! an entry document (transitively) references it.

pub mod boundary;
pub mod error;
pub mod graph;
pub mod install;
pub mod layout;
pub mod marketplace;
pub mod ownership;
pub mod references;
pub mod registry;
pub mod rewrite;
pub mod source;

pub use {
    error::{Error, Result},
    graph::{Reachability, build_reachability},
    install::{Conflict, InstallOptions, InstallSummary, Materializer, UpdateSummary},
    references::extract_references,
    registry::{Registry, RegistryEntry},
    source::{DefaultFetcher, SourceFetcher, SourceSpec},
};
