// src/plan.rs

//! Action plans
//!
//! An [`ActionPlan`] is the ordered set of instructions that moves an
//! environment from its current state to the requested one. Within each
//! instruction kind the operand order matters: `Link` lists dependencies
//! before their dependents.

use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::history::History;
use crate::index::{Index, PackageRecord, split_dist};
use crate::version::PackageVersion;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Instruction kinds understood by an interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Instruction {
    Fetch,
    Extract,
    Unlink,
    Link,
    RmExtracted,
}

impl Instruction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Instruction::Fetch => "FETCH",
            Instruction::Extract => "EXTRACT",
            Instruction::Unlink => "UNLINK",
            Instruction::Link => "LINK",
            Instruction::RmExtracted => "RM_EXTRACTED",
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default execution order
pub const ACTION_ORDER: [Instruction; 5] = [
    Instruction::Fetch,
    Instruction::Extract,
    Instruction::Unlink,
    Instruction::Link,
    Instruction::RmExtracted,
];

/// Order for forced reinstalls: clear the cache entry before re-extracting
pub const FORCE_ORDER: [Instruction; 5] = [
    Instruction::Fetch,
    Instruction::RmExtracted,
    Instruction::Extract,
    Instruction::Unlink,
    Instruction::Link,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionPlan {
    pub prefix: PathBuf,
    #[serde(flatten)]
    actions: BTreeMap<Instruction, Vec<String>>,
    #[serde(skip)]
    op_order: Option<[Instruction; 5]>,
}

impl ActionPlan {
    pub fn new(prefix: &Path) -> Self {
        Self {
            prefix: prefix.to_path_buf(),
            actions: BTreeMap::new(),
            op_order: None,
        }
    }

    pub fn push(&mut self, instruction: Instruction, dist: impl Into<String>) {
        self.actions.entry(instruction).or_default().push(dist.into());
    }

    /// Add an `Unlink` unless it is already present
    pub fn add_unlink(&mut self, dist: &str) {
        let list = self.actions.entry(Instruction::Unlink).or_default();
        if !list.iter().any(|d| d == dist) {
            list.push(dist.to_string());
        }
    }

    pub fn get(&self, instruction: Instruction) -> &[String] {
        self.actions
            .get(&instruction)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn set_force_order(&mut self) {
        self.op_order = Some(FORCE_ORDER);
    }

    pub fn op_order(&self) -> [Instruction; 5] {
        self.op_order.unwrap_or(ACTION_ORDER)
    }

    /// Nothing would be linked or unlinked
    pub fn nothing_to_do(&self) -> bool {
        self.get(Instruction::Link).is_empty() && self.get(Instruction::Unlink).is_empty()
    }

    /// Flatten into `(instruction, dist)` pairs in execution order
    pub fn instructions(&self) -> Vec<(Instruction, &str)> {
        let mut out = Vec::new();
        for op in self.op_order() {
            for dist in self.get(op) {
                out.push((op, dist.as_str()));
            }
        }
        out
    }
}

/// Where an extracted package lives in the cache
pub fn extracted_dir(pkgs_dir: &Path, dist: &str) -> PathBuf {
    pkgs_dir.join(dist)
}

pub fn is_extracted(pkgs_dir: &Path, dist: &str) -> bool {
    extracted_dir(pkgs_dir, dist)
        .join("info")
        .join("index.json")
        .is_file()
}

/// Filename of a dist's archive, from the index when known
pub fn archive_filename(index: &Index, dist: &str) -> String {
    index
        .filename_of(dist)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}.tar.gz", dist))
}

pub fn is_fetched(pkgs_dir: &Path, index: &Index, dist: &str) -> bool {
    pkgs_dir.join(archive_filename(index, dist)).is_file()
}

/// Link every dist that is not linked yet, extracting and fetching as needed
pub fn ensure_linked_actions(
    dists: &[String],
    env: &Environment,
    index: &Index,
    pkgs_dir: &Path,
) -> Result<ActionPlan> {
    let mut plan = ActionPlan::new(env.prefix());
    for dist in dists {
        if env.is_linked(dist)?.is_some() {
            continue;
        }
        plan.push(Instruction::Link, dist.as_str());
        if is_extracted(pkgs_dir, dist) {
            continue;
        }
        plan.push(Instruction::Extract, dist.as_str());
        if !is_fetched(pkgs_dir, index, dist) {
            plan.push(Instruction::Fetch, dist.as_str());
        }
    }
    Ok(plan)
}

/// Re-fetch (when missing), re-extract and relink every dist
pub fn force_linked_actions(
    dists: &[String],
    env: &Environment,
    index: &Index,
    pkgs_dir: &Path,
) -> Result<ActionPlan> {
    let mut plan = ActionPlan::new(env.prefix());
    plan.set_force_order();
    for dist in dists {
        if !is_fetched(pkgs_dir, index, dist) {
            plan.push(Instruction::Fetch, dist.as_str());
        }
        plan.push(Instruction::RmExtracted, dist.as_str());
        plan.push(Instruction::Extract, dist.as_str());
        if env.is_linked(dist)?.is_some() {
            plan.add_unlink(dist);
        }
        plan.push(Instruction::Link, dist.as_str());
    }
    Ok(plan)
}

/// Plan that returns the environment to a recorded history revision
pub fn revert_actions(
    env: &Environment,
    index: &Index,
    pkgs_dir: &Path,
    revision: usize,
) -> Result<ActionPlan> {
    let history = History::new(env);
    history.update()?;

    let state = history
        .get_state(Some(revision))?
        .ok_or_else(|| Error::Unsatisfiable(format!("no such revision: {}", revision)))?;
    let current = history.get_state(None)?.unwrap_or_default();
    debug!("Reverting to revision {} ({} packages)", revision, state.len());

    if state == current {
        return Ok(ActionPlan::new(env.prefix()));
    }

    let target: Vec<String> = state.iter().cloned().collect();
    let mut plan = ensure_linked_actions(&target, env, index, pkgs_dir)?;
    for dist in current.difference(&state) {
        plan.add_unlink(dist);
    }
    Ok(plan)
}

/// Format a byte count the way the download table shows it
pub fn human_bytes(n: u64) -> String {
    if n < 1024 {
        return format!("{} B", n);
    }
    let k = n as f64 / 1024.0;
    if k < 1024.0 {
        return format!("{} KB", k.round() as u64);
    }
    let m = k / 1024.0;
    if m < 1024.0 {
        return format!("{:.1} MB", m);
    }
    format!("{:.2} GB", m / 1024.0)
}

fn channel_name(channel: Option<&str>) -> &str {
    channel.unwrap_or("<unknown>")
}

/// What the plan does to one package name
#[derive(Debug, Default)]
struct Change {
    old: Option<PackageRecord>,
    new: Option<PackageRecord>,
}

fn record_for(index: &Index, env: &Environment, dist: &str) -> PackageRecord {
    if let Some(record) = index.get_dist(dist) {
        return record.clone();
    }
    if let Ok(Some(linked)) = env.is_linked(dist) {
        let mut record =
            PackageRecord::new(&linked.name, &linked.version, &linked.build, linked.build_number);
        record.channel = linked.channel;
        return record;
    }
    // not in the index and not linked: fake what we can from the dist itself
    let (name, version, build) = split_dist(dist).unwrap_or((dist, "", ""));
    PackageRecord::new(name, version, build, build.parse().unwrap_or(0))
}

/// Human-readable summary of a plan
pub fn render_plan(plan: &ActionPlan, index: &Index, show_channel_urls: bool) -> String {
    let env = Environment::new(&plan.prefix);
    let mut out = String::new();

    let fetch = plan.get(Instruction::Fetch);
    if !fetch.is_empty() {
        let _ = writeln!(out, "\nThe following packages will be downloaded:\n");
        let _ = writeln!(out, "    {:<27}|{:>17}", "package", "build");
        let _ = writeln!(out, "    {:<27}|{:>17}", "-".repeat(27), "-".repeat(17));
        let mut total = 0;
        for dist in fetch {
            let record = record_for(index, &env, dist);
            total += record.size;
            let (head, build) = dist.rsplit_once('-').unwrap_or((dist.as_str(), ""));
            let mut line = format!(
                "    {:<27}|{:>17}{:>15}",
                head,
                build,
                human_bytes(record.size)
            );
            if show_channel_urls {
                let _ = write!(line, "  {}", channel_name(record.channel.as_deref()));
            }
            let _ = writeln!(out, "{}", line);
        }
        if fetch.len() > 1 {
            let _ = writeln!(out, "    {}", "-".repeat(60));
            let _ = writeln!(out, "{}Total: {:>14}", " ".repeat(43), human_bytes(total));
        }
    }

    let mut changes: BTreeMap<String, Change> = BTreeMap::new();
    for dist in plan.get(Instruction::Link) {
        let record = record_for(index, &env, dist);
        let key = record.name.clone();
        changes.entry(key).or_default().new = Some(record);
    }
    for dist in plan.get(Instruction::Unlink) {
        let record = record_for(index, &env, dist);
        let key = record.name.clone();
        changes.entry(key).or_default().old = Some(record);
    }

    let describe = |r: &PackageRecord| {
        let mut s = format!("{}-{}", r.version, r.build);
        if show_channel_urls {
            let _ = write!(s, " {}", channel_name(r.channel.as_deref()));
        }
        if let Some(features) = r.features.as_deref().filter(|f| !f.is_empty()) {
            let _ = write!(s, " [{}]", features);
        }
        s
    };
    let width = changes.keys().map(|k| k.len()).max().unwrap_or(0) + 1;

    let mut new = Vec::new();
    let mut removed = Vec::new();
    let mut updated = Vec::new();
    let mut downgraded = Vec::new();
    for (name, change) in &changes {
        let label = format!("{:<width$}", format!("{}:", name), width = width);
        match (&change.old, &change.new) {
            (None, Some(n)) => new.push(format!("    {} {}", label, describe(n))),
            (Some(o), None) => removed.push(format!("    {} {}", label, describe(o))),
            (Some(o), Some(n)) => {
                let line = format!("    {} {} --> {}", label, describe(o), describe(n));
                let newer = (PackageVersion::parse(&o.version), o.build_number)
                    <= (PackageVersion::parse(&n.version), n.build_number);
                if newer {
                    updated.push(line);
                } else {
                    downgraded.push(line);
                }
            }
            (None, None) => {}
        }
    }

    for (title, lines) in [
        ("The following NEW packages will be INSTALLED:", &new),
        ("The following packages will be REMOVED:", &removed),
        ("The following packages will be UPDATED:", &updated),
        ("The following packages will be DOWNGRADED:", &downgraded),
    ] {
        if lines.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n{}\n", title);
        for line in lines {
            let _ = writeln!(out, "{}", line);
        }
    }
    out
}
