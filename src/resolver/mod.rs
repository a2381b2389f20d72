// src/resolver/mod.rs

//! Dependency resolution
//!
//! A [`Resolver`] turns a list of specs into an [`ActionPlan`] for one
//! environment. Failures are classified: unknown names come back as
//! [`Error::MissingPackages`](crate::Error::MissingPackages), contradictory
//! constraints as [`Error::Unsatisfiable`](crate::Error::Unsatisfiable).

mod latest;
mod order;

pub use latest::LatestResolver;
pub use order::graph_sort;

use crate::error::Result;
use crate::index::Index;
use crate::plan::ActionPlan;
use crate::spec::MatchSpec;
use std::collections::BTreeSet;
use std::path::Path;

/// Modifiers passed through to the resolver
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Re-extract and relink everything selected, even if already linked
    pub force: bool,
    /// Restrict the plan to these names (`--no-deps`, `--force`)
    pub only_names: Option<BTreeSet<String>>,
    /// Add the environment's pinned specs
    pub pinned: bool,
    /// Prefer keeping what is already linked over the newest build
    pub minimal_hint: bool,
}

/// Constraint solving capability
pub trait Resolver {
    fn resolve(
        &self,
        prefix: &Path,
        index: &Index,
        specs: &[MatchSpec],
        options: &ResolveOptions,
    ) -> Result<ActionPlan>;
}
