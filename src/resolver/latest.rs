// src/resolver/latest.rs

//! Greedy "newest matching candidate" resolver
//!
//! Walks the dependency closure of the requested specs breadth first and
//! picks, for each name, the newest record satisfying every constraint seen
//! so far. When a later constraint rules out an earlier pick the name is
//! picked again. There is no backtracking: a name whose constraints exclude
//! every candidate fails the whole resolution.

use super::{ResolveOptions, Resolver, graph_sort};
use crate::environment::{Environment, LinkedPackage};
use crate::error::{Error, Result};
use crate::index::{Index, PackageRecord};
use crate::plan::{ActionPlan, ensure_linked_actions, force_linked_actions};
use crate::spec::MatchSpec;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LatestResolver {
    pkgs_dir: PathBuf,
}

impl LatestResolver {
    /// `pkgs_dir` is the package cache consulted to skip fetch/extract steps
    pub fn new(pkgs_dir: impl Into<PathBuf>) -> Self {
        Self {
            pkgs_dir: pkgs_dir.into(),
        }
    }
}

/// Working state of one resolution
struct Selection<'a> {
    index: &'a Index,
    linked: BTreeMap<String, LinkedPackage>,
    requested: BTreeSet<String>,
    minimal_hint: bool,
    constraints: BTreeMap<String, Vec<MatchSpec>>,
    required_by: BTreeMap<String, String>,
    selected: BTreeMap<String, PackageRecord>,
    missing: BTreeSet<String>,
    queue: VecDeque<String>,
}

impl<'a> Selection<'a> {
    fn constrain(&mut self, spec: MatchSpec) {
        let name = spec.name.clone();
        let list = self.constraints.entry(name.clone()).or_default();
        if !list.contains(&spec) {
            list.push(spec.clone());
        }

        match self.selected.get(&name) {
            Some(current) if spec.matches(current) => {}
            _ => {
                if !self.queue.contains(&name) {
                    self.queue.push_back(name);
                }
            }
        }
    }

    fn satisfies(&self, record: &PackageRecord) -> bool {
        self.constraints
            .get(&record.name)
            .map(|specs| specs.iter().all(|s| s.matches(record)))
            .unwrap_or(true)
    }

    fn pick(&self, name: &str) -> Result<Option<PackageRecord>> {
        let all = self.index.get_pkgs(&MatchSpec::name_only(name));
        if all.is_empty() {
            return Ok(None);
        }

        let candidates: Vec<&PackageRecord> =
            all.into_iter().filter(|r| self.satisfies(r)).collect();
        if candidates.is_empty() {
            let specs: Vec<String> = self
                .constraints
                .get(name)
                .map(|specs| specs.iter().map(ToString::to_string).collect())
                .unwrap_or_default();
            let mut reason = format!(
                "no version of {} satisfies all of: {}",
                name,
                specs.join(", ")
            );
            if let Some(parent) = self.required_by.get(name) {
                reason.push_str(&format!(" (required by {})", parent));
            }
            return Err(Error::Unsatisfiable(reason));
        }

        let keep_linked = self.minimal_hint || !self.requested.contains(name);
        if keep_linked {
            if let Some(linked) = self.linked.get(name) {
                let dist = linked.dist();
                if let Some(record) = candidates.iter().find(|r| r.dist() == dist) {
                    return Ok(Some((*record).clone()));
                }
            }
        }

        // get_pkgs sorts ascending
        Ok(candidates.last().map(|r| (*r).clone()))
    }

    fn run(&mut self) -> Result<()> {
        while let Some(name) = self.queue.pop_front() {
            let Some(record) = self.pick(&name)? else {
                debug!("No package named {} in the index", name);
                self.missing.insert(name);
                continue;
            };

            if self.selected.get(&name) == Some(&record) {
                continue;
            }
            debug!("Selected {}", record.dist());
            let parent = record.dist();
            let deps = record.dependency_specs();
            self.selected.insert(name, record);

            for dep in deps {
                self.required_by
                    .entry(dep.name.clone())
                    .or_insert_with(|| parent.clone());
                self.constrain(dep);
            }
        }
        Ok(())
    }

    fn missing_error(&self) -> Error {
        let names: Vec<String> = self.missing.iter().cloned().collect();
        let mut message = String::from("No packages found in current channels matching:\n");
        for name in &names {
            match self.required_by.get(name) {
                Some(parent) if !self.requested.contains(name) => {
                    message.push_str(&format!("  - {} (required by {})\n", name, parent));
                }
                _ => message.push_str(&format!("  - {}\n", name)),
            }
        }
        Error::MissingPackages {
            names,
            message: message.trim_end().to_string(),
        }
    }
}

impl Resolver for LatestResolver {
    fn resolve(
        &self,
        prefix: &Path,
        index: &Index,
        specs: &[MatchSpec],
        options: &ResolveOptions,
    ) -> Result<ActionPlan> {
        let env = Environment::new(prefix);
        let linked: BTreeMap<String, LinkedPackage> = env
            .linked()?
            .into_iter()
            .map(|pkg| (pkg.name.clone(), pkg))
            .collect();

        let mut roots: Vec<MatchSpec> = specs.to_vec();
        if options.pinned {
            for pin in env.pinned_specs()? {
                debug!("Adding pinned spec {}", pin);
                roots.push(pin.parse()?);
            }
        }

        let mut selection = Selection {
            index,
            linked,
            requested: specs.iter().map(|s| s.name.clone()).collect(),
            minimal_hint: options.minimal_hint,
            constraints: BTreeMap::new(),
            required_by: BTreeMap::new(),
            selected: BTreeMap::new(),
            missing: BTreeSet::new(),
            queue: VecDeque::new(),
        };
        for spec in roots {
            selection.constrain(spec);
        }
        selection.run()?;

        if !selection.missing.is_empty() {
            return Err(selection.missing_error());
        }

        let mut must_have = selection.selected;
        if let Some(only) = &options.only_names {
            must_have.retain(|name, _| only.contains(name));
        }

        let order = graph_sort(&must_have);
        let dists: Vec<String> = order
            .iter()
            .filter_map(|name| must_have.get(name))
            .map(PackageRecord::dist)
            .collect();

        let mut plan = if options.force {
            force_linked_actions(&dists, &env, index, &self.pkgs_dir)?
        } else {
            ensure_linked_actions(&dists, &env, index, &self.pkgs_dir)?
        };

        // dependents are unlinked before what they depend on
        for name in order.iter().rev() {
            let Some(linked) = selection.linked.get(name) else {
                continue;
            };
            let dist = linked.dist();
            if must_have.get(name).map(PackageRecord::dist).as_deref() != Some(dist.as_str()) {
                plan.add_unlink(&dist);
            }
        }

        Ok(plan)
    }
}
