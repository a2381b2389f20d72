// src/interpreter.rs

//! Plan execution against a prefix
//!
//! The interpreter holds the prefix lock for the whole plan, brings the
//! history log up to date before and after, and runs each instruction in
//! plan order. Unlinked files are moved aside rather than deleted, so if an
//! instruction fails the links and unlinks already done can be reverted
//! before the error is returned.

use crate::archive;
use crate::environment::{Environment, LinkedPackage};
use crate::error::{Error, Result};
use crate::history::History;
use crate::index::{Index, PackageRecord};
use crate::lock::PrefixLock;
use crate::plan::{ActionPlan, Instruction, archive_filename, extracted_dir};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Instruction execution capability
///
/// Implementations fail with [`Error::AlreadyLocked`] when another process
/// holds the environment, and with [`Error::ExecutionFailure`] when an
/// instruction cannot be carried out.
pub trait InstructionInterpreter {
    fn execute(&self, plan: &ActionPlan, index: &Index) -> Result<()>;
}

/// A completed step that can be undone
#[derive(Debug)]
enum Done {
    Linked(LinkedPackage),
    /// Files moved aside into `backup`, restored on rollback
    Unlinked {
        record: LinkedPackage,
        backup: PathBuf,
    },
}

/// Interpreter that links packages from the local package cache
#[derive(Debug, Clone)]
pub struct PrefixInterpreter {
    pkgs_dir: PathBuf,
}

impl PrefixInterpreter {
    pub fn new(pkgs_dir: impl Into<PathBuf>) -> Self {
        Self {
            pkgs_dir: pkgs_dir.into(),
        }
    }

    /// Copy a package archive into the package cache
    fn fetch(&self, index: &Index, dist: &str) -> Result<()> {
        let record = index
            .get_dist(dist)
            .ok_or_else(|| Error::ExecutionFailure(format!("{} is not in the index", dist)))?;
        let source = record.source.as_ref().ok_or_else(|| {
            Error::ExecutionFailure(format!("no archive location known for {}", dist))
        })?;

        let dest = self.pkgs_dir.join(archive_filename(index, dist));
        if source == &dest {
            return Ok(());
        }
        fs::create_dir_all(&self.pkgs_dir)?;
        debug!("Fetching {} -> {}", source.display(), dest.display());
        fs::copy(source, &dest)
            .map_err(|e| Error::os(format!("failed to fetch {}", source.display()), e))?;
        Ok(())
    }

    fn extract(&self, index: &Index, dist: &str) -> Result<()> {
        let path = self.pkgs_dir.join(archive_filename(index, dist));
        let dest = extracted_dir(&self.pkgs_dir, dist);
        self.rm_extracted(dist)?;
        archive::extract(&path, &dest)?;
        Ok(())
    }

    fn rm_extracted(&self, dist: &str) -> Result<()> {
        match fs::remove_dir_all(extracted_dir(&self.pkgs_dir, dist)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Place the payload of an extracted package into the prefix
    ///
    /// Files linked before a failure are removed again, so a failed link
    /// leaves nothing behind.
    fn link(&self, env: &Environment, index: &Index, dist: &str) -> Result<LinkedPackage> {
        let source = extracted_dir(&self.pkgs_dir, dist);
        let meta = source.join(archive::INDEX_JSON);
        let mut record: PackageRecord = match fs::read_to_string(&meta) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::ExecutionFailure(format!("{} is not extracted", dist)));
            }
            Err(e) => return Err(e.into()),
        };
        if let Some(indexed) = index.get_dist(dist) {
            record.channel = indexed.channel.clone();
        }

        let mut files = Vec::new();
        if let Err(e) = link_payload(&source, env.prefix(), &mut files) {
            remove_files(env.prefix(), &files);
            return Err(e);
        }
        files.sort();

        let linked = LinkedPackage::from_record(&record, files);
        if let Err(e) = env.write_linked(&linked) {
            remove_files(env.prefix(), &linked.files);
            return Err(e);
        }
        Ok(linked)
    }

    /// Move a linked package's files into `undo` and drop its record
    fn unlink(&self, env: &Environment, dist: &str, undo: &Path) -> Result<Option<Done>> {
        let Some(linked) = env.is_linked(dist)? else {
            warn!("{} is not linked, nothing to unlink", dist);
            return Ok(None);
        };

        let backup = undo.join(dist);
        let mut moved = Vec::new();
        for file in &linked.files {
            let path = env.prefix().join(file);
            if !path.exists() && !path.is_symlink() {
                continue;
            }
            if let Err(e) = move_file(&path, &backup.join(file)) {
                restore_files(env.prefix(), &backup, &moved);
                return Err(Error::os(format!("failed to remove {}", path.display()), e));
            }
            remove_empty_parents(env.prefix(), &path);
            moved.push(file.clone());
        }

        if let Err(e) = env.remove_linked(dist) {
            restore_files(env.prefix(), &backup, &moved);
            return Err(e);
        }
        Ok(Some(Done::Unlinked {
            record: linked,
            backup,
        }))
    }

    fn run(
        &self,
        env: &Environment,
        index: &Index,
        op: Instruction,
        dist: &str,
        undo: &Path,
        done: &mut Vec<Done>,
    ) -> Result<()> {
        match op {
            Instruction::Fetch => self.fetch(index, dist),
            Instruction::Extract => self.extract(index, dist),
            Instruction::RmExtracted => self.rm_extracted(dist),
            Instruction::Unlink => {
                done.extend(self.unlink(env, dist, undo)?);
                Ok(())
            }
            Instruction::Link => {
                done.push(Done::Linked(self.link(env, index, dist)?));
                Ok(())
            }
        }
    }

    fn roll_back(&self, env: &Environment, done: Vec<Done>) {
        for step in done.into_iter().rev() {
            let result = match &step {
                Done::Linked(pkg) => {
                    remove_files(env.prefix(), &pkg.files);
                    env.remove_linked(&pkg.dist())
                }
                Done::Unlinked { record, backup } => {
                    restore_files(env.prefix(), backup, &record.files);
                    env.write_linked(record)
                }
            };
            if let Err(e) = result {
                warn!("Could not undo {:?}: {}", step, e);
            }
        }
    }
}

impl InstructionInterpreter for PrefixInterpreter {
    fn execute(&self, plan: &ActionPlan, index: &Index) -> Result<()> {
        let _lock = PrefixLock::acquire(&plan.prefix)?;
        let env = Environment::new(&plan.prefix);
        let history = History::new(&env);
        history.update()?;

        // unlinked files wait here until the plan has run
        let undo = tempfile::Builder::new()
            .prefix(UNDO_PREFIX)
            .tempdir_in(&plan.prefix)?;

        let mut done = Vec::new();
        for (op, dist) in plan.instructions() {
            info!("{} {}", op, dist);
            if let Err(e) = self.run(&env, index, op, dist, undo.path(), &mut done) {
                self.roll_back(&env, done);
                return Err(match e {
                    Error::ExecutionFailure(msg) => Error::ExecutionFailure(msg),
                    other => Error::ExecutionFailure(format!("{} {}: {}", op, dist, other)),
                });
            }
        }

        // every instruction succeeded; a stale log is rebuilt on the next run
        if let Err(e) = history.update() {
            warn!("Could not update {}: {}", env.history_path().display(), e);
        }
        Ok(())
    }
}

/// Name prefix of the per-run directory holding unlinked files
pub const UNDO_PREFIX: &str = ".strata-undo-";

fn link_payload(source: &Path, prefix: &Path, files: &mut Vec<String>) -> Result<()> {
    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(|e| Error::ExecutionFailure(e.to_string()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = match entry.path().strip_prefix(source) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        if rel.starts_with("info") {
            continue;
        }

        let dest = prefix.join(rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        link_file(entry.path(), &dest)?;
        files.push(
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
        );
    }
    Ok(())
}

/// Hard link `src` to `dest`, copying when the link cannot be made
fn link_file(src: &Path, dest: &Path) -> Result<()> {
    if dest.exists() || dest.is_symlink() {
        fs::remove_file(dest)?;
    }
    if fs::hard_link(src, dest).is_err() {
        fs::copy(src, dest)
            .map_err(|e| Error::os(format!("failed to link {}", dest.display()), e))?;
    }
    Ok(())
}

fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(from, to).is_err() {
        fs::copy(from, to)?;
        fs::remove_file(from)?;
    }
    Ok(())
}

fn remove_files(prefix: &Path, files: &[String]) {
    for file in files {
        let path = prefix.join(file);
        match fs::remove_file(&path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                warn!("Could not remove {}: {}", path.display(), e);
            }
            _ => remove_empty_parents(prefix, &path),
        }
    }
}

/// Move saved files from `backup` back into the prefix
fn restore_files(prefix: &Path, backup: &Path, files: &[String]) {
    for file in files {
        let saved = backup.join(file);
        if !saved.exists() {
            continue;
        }
        if let Err(e) = move_file(&saved, &prefix.join(file)) {
            warn!("Could not restore {}: {}", file, e);
        }
    }
}

fn remove_empty_parents(prefix: &Path, path: &Path) {
    let mut dir = path.parent();
    while let Some(d) = dir {
        if d == prefix || !d.starts_with(prefix) {
            break;
        }
        // stops at the first non-empty directory
        if fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
}
