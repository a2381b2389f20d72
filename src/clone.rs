// src/clone.rs

//! Environment cloning
//!
//! A clone links every package of the source environment into the new
//! prefix and copies the files no package owns, rewriting the source prefix
//! to the destination prefix inside text files.

use crate::config::Config;
use crate::environment::{Environment, META_DIR, find_prefix_name};
use crate::error::{Error, Result};
use crate::index::{Index, name_dist};
use crate::interpreter::{InstructionInterpreter, UNDO_PREFIX};
use crate::lock::LOCK_FILE;
use crate::plan::{ActionPlan, Instruction, ensure_linked_actions};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Top-level entries of a prefix that are never copied
const IGNORED: &[&str] = &[
    "pkgs",
    "envs",
    "conda-bld",
    META_DIR,
    LOCK_FILE,
    "info",
    ".index",
    ".nonadmin",
];

/// Files under `bin/` that belong to the tool itself
const BIN_IGNORED: &[&str] = &["strata", "activate", "deactivate"];

/// Package that is never cloned into another environment
const SELF_PACKAGE: &str = "conda";

/// What a clone did
#[derive(Debug, Serialize)]
pub struct CloneReport {
    pub src_prefix: PathBuf,
    pub dst_prefix: PathBuf,
    pub actions: ActionPlan,
    pub untracked_files: Vec<String>,
}

/// Locate the environment to clone from: a path when the argument contains a
/// separator, otherwise a known environment name
pub fn find_source(config: &Config, arg: &str) -> Result<PathBuf> {
    if arg.contains(MAIN_SEPARATOR) {
        let path = PathBuf::from(arg);
        if !path.is_dir() {
            return Err(Error::EnvironmentNotFound(format!("no such directory: {}", arg)));
        }
        return Ok(path);
    }
    find_prefix_name(config, arg)
        .ok_or_else(|| Error::EnvironmentNotFound(format!("could not find environment: {}", arg)))
}

/// Files in `prefix` that no linked package owns, relative and `/`-separated
pub fn untracked(prefix: &Path) -> Result<BTreeSet<String>> {
    let env = Environment::new(prefix);
    let owned: BTreeSet<String> = env
        .linked()?
        .into_iter()
        .flat_map(|pkg| pkg.files)
        .collect();

    let mut files = BTreeSet::new();
    let walker = WalkDir::new(prefix).min_depth(1).into_iter().filter_entry(|entry| {
        let name = entry.file_name().to_string_lossy();
        entry.depth() != 1
            || !(IGNORED.iter().any(|ignored| *ignored == name) || name.starts_with(UNDO_PREFIX))
    });
    for entry in walker {
        let entry = entry.map_err(|e| Error::Internal(format!("walking {}: {}", prefix.display(), e)))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(prefix) else {
            continue;
        };
        let rel: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        if rel.len() == 2 && rel[0] == "bin" && BIN_IGNORED.contains(&rel[1].as_str()) {
            continue;
        }
        let rel = rel.join("/");

        if owned.contains(&rel) || rel.ends_with('~') {
            continue;
        }
        if let Some(source) = rel.strip_suffix(".pyc") {
            if owned.contains(&format!("{}.py", source)) {
                continue;
            }
        }
        files.insert(rel);
    }
    Ok(files)
}

/// Copy one untracked file, rewriting the prefix when it is UTF-8 text
fn copy_untracked(src_prefix: &Path, dst_prefix: &Path, rel: &str) -> Result<()> {
    let src = src_prefix.join(rel);
    let dst = dst_prefix.join(rel);
    if let Some(parent) = dst.parent() {
        if parent.is_file() || parent.is_symlink() {
            fs::remove_file(parent)?;
        }
        fs::create_dir_all(parent)?;
    }

    let Ok(data) = fs::read(&src) else {
        debug!("Skipping unreadable {}", src.display());
        return Ok(());
    };
    let data = match String::from_utf8(data) {
        Ok(text) => text
            .replace(&*src_prefix.to_string_lossy(), &dst_prefix.to_string_lossy())
            .into_bytes(),
        Err(binary) => binary.into_bytes(),
    };

    fs::write(&dst, data).map_err(|e| Error::os(format!("failed to write {}", dst.display()), e))?;
    let permissions = fs::metadata(&src)?.permissions();
    fs::set_permissions(&dst, permissions)?;
    Ok(())
}

/// Links that recreate the packages of `src_prefix` in `dst_prefix`
pub fn clone_plan(
    src_prefix: &Path,
    dst_prefix: &Path,
    index: &Index,
    pkgs_dir: &Path,
) -> Result<ActionPlan> {
    let dists: Vec<String> = Environment::new(src_prefix)
        .linked_dists()?
        .into_iter()
        .filter(|dist| name_dist(dist) != SELF_PACKAGE)
        .collect();
    ensure_linked_actions(&dists, &Environment::new(dst_prefix), index, pkgs_dir)
}

/// Clone `src_prefix` into the new prefix `dst_prefix`
pub fn clone_env(
    src_prefix: &Path,
    dst_prefix: &Path,
    index: &Index,
    pkgs_dir: &Path,
    interpreter: &dyn InstructionInterpreter,
) -> Result<CloneReport> {
    let untracked_files = untracked(src_prefix)?;
    let actions = clone_plan(src_prefix, dst_prefix, index, pkgs_dir)?;
    info!(
        "Cloning {} packages and {} files from {}",
        actions.get(Instruction::Link).len(),
        untracked_files.len(),
        src_prefix.display()
    );

    for rel in &untracked_files {
        copy_untracked(src_prefix, dst_prefix, rel)?;
    }
    interpreter.execute(&actions, index)?;

    Ok(CloneReport {
        src_prefix: src_prefix.to_path_buf(),
        dst_prefix: dst_prefix.to_path_buf(),
        actions,
        untracked_files: untracked_files.into_iter().collect(),
    })
}
