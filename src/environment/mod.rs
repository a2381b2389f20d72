// src/environment/mod.rs

//! Package environments
//!
//! An environment is a directory prefix. Every linked package is recorded as
//! `<prefix>/conda-meta/<dist>.json`; the same directory holds the history
//! log and the pin file.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::index::PackageRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{MAIN_SEPARATOR, Path, PathBuf};
use tracing::{debug, warn};

mod guard;

pub use guard::{check_new_prefix, ensure_existing_prefix};

/// Metadata directory name inside each prefix
pub const META_DIR: &str = "conda-meta";

/// A package linked into an environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedPackage {
    pub name: String,
    pub version: String,
    pub build: String,
    pub build_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Files installed by this package, relative to the prefix
    #[serde(default)]
    pub files: Vec<String>,
}

impl LinkedPackage {
    pub fn from_record(record: &PackageRecord, files: Vec<String>) -> Self {
        Self {
            name: record.name.clone(),
            version: record.version.clone(),
            build: record.build.clone(),
            build_number: record.build_number,
            channel: record.channel.clone(),
            files,
        }
    }

    pub fn dist(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.build)
    }
}

/// Handle on an environment prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    prefix: PathBuf,
}

impl Environment {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn exists(&self) -> bool {
        self.prefix.is_dir()
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.prefix.join(META_DIR)
    }

    pub fn history_path(&self) -> PathBuf {
        self.meta_dir().join("history")
    }

    pub fn pinned_path(&self) -> PathBuf {
        self.meta_dir().join("pinned")
    }

    fn record_path(&self, dist: &str) -> PathBuf {
        self.meta_dir().join(format!("{}.json", dist))
    }

    /// All linked packages, sorted by dist
    pub fn linked(&self) -> Result<Vec<LinkedPackage>> {
        let meta_dir = self.meta_dir();
        let entries = match fs::read_dir(&meta_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::os(format!("failed to read {}", meta_dir.display()), e)),
        };

        let mut linked = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            match serde_json::from_str::<LinkedPackage>(&content) {
                Ok(pkg) => linked.push(pkg),
                Err(e) => warn!("Ignoring unreadable package record {}: {}", path.display(), e),
            }
        }
        linked.sort_by_key(|p| p.dist());
        Ok(linked)
    }

    pub fn linked_dists(&self) -> Result<BTreeSet<String>> {
        Ok(self.linked()?.iter().map(LinkedPackage::dist).collect())
    }

    /// Record for `dist` if it is linked
    pub fn is_linked(&self, dist: &str) -> Result<Option<LinkedPackage>> {
        let path = self.record_path(dist);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write_linked(&self, pkg: &LinkedPackage) -> Result<()> {
        fs::create_dir_all(self.meta_dir())?;
        let content = serde_json::to_string_pretty(pkg)?;
        fs::write(self.record_path(&pkg.dist()), content)?;
        Ok(())
    }

    pub fn remove_linked(&self, dist: &str) -> Result<()> {
        match fs::remove_file(self.record_path(dist)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Specs from the pin file; blank lines and comments are skipped
    pub fn pinned_specs(&self) -> Result<Vec<String>> {
        let path = self.pinned_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::os(format!("failed to read {}", path.display()), e)),
        };
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect())
    }

    /// Fail with `Os` unless the metadata directory (or the prefix, before
    /// anything was linked) can be written to
    pub fn check_write(&self) -> Result<()> {
        let meta_dir = self.meta_dir();
        let target = if meta_dir.is_dir() {
            meta_dir
        } else {
            self.prefix.clone()
        };
        let probe = target.join(format!(".write-test-{}", std::process::id()));
        fs::write(&probe, b"")
            .map_err(|e| Error::os(format!("cannot write to {}", target.display()), e))?;
        let _ = fs::remove_file(&probe);
        Ok(())
    }
}

/// Find an existing environment by name
pub fn find_prefix_name(config: &Config, name: &str) -> Option<PathBuf> {
    if name == config.root_env_name {
        return Some(config.root_dir.clone());
    }
    config
        .envs_dirs
        .iter()
        .map(|dir| dir.join(name))
        .find(|prefix| prefix.is_dir())
}

/// Resolve `--name`/`--prefix` into a prefix path
pub fn resolve_prefix(
    config: &Config,
    name: Option<&str>,
    prefix: Option<&Path>,
    new_env: bool,
) -> Result<PathBuf> {
    match (name, prefix) {
        (Some(_), Some(_)) => Err(Error::InvalidArgument(
            "--name and --prefix are mutually exclusive".to_string(),
        )),
        (None, Some(prefix)) => Ok(absolute(prefix)?),
        (Some(name), None) => {
            if name.contains(MAIN_SEPARATOR) {
                return Err(Error::InvalidArgument(format!(
                    "environment name cannot contain '{}': {}",
                    MAIN_SEPARATOR, name
                )));
            }
            if new_env {
                if name == config.root_env_name {
                    return Err(Error::EnvironmentAlreadyExists(format!(
                        "'{}' is a reserved environment name",
                        name
                    )));
                }
                let envs_dir = config.envs_dirs.first().ok_or_else(|| {
                    Error::Config("no envs_dirs configured".to_string())
                })?;
                return Ok(envs_dir.join(name));
            }
            find_prefix_name(config, name).ok_or_else(|| {
                Error::EnvironmentNotFound(format!("could not find environment: {}", name))
            })
        }
        (None, None) if new_env => Err(Error::InvalidArgument(
            "either -n NAME or -p PREFIX option required".to_string(),
        )),
        (None, None) => Ok(config.root_dir.clone()),
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Record a newly created environment in the user registry; failures are ignored
pub fn append_env(config: &Config, prefix: &Path) {
    let Some(registry) = &config.registry_path else {
        return;
    };
    let result = (|| -> io::Result<()> {
        if let Some(parent) = registry.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(registry)?;
        writeln!(file, "{}", prefix.display())
    })();
    if let Err(e) = result {
        debug!("Could not record environment in {}: {}", registry.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linked(name: &str, version: &str, build: &str) -> LinkedPackage {
        LinkedPackage {
            name: name.to_string(),
            version: version.to_string(),
            build: build.to_string(),
            build_number: 0,
            channel: None,
            files: vec![format!("bin/{}", name)],
        }
    }

    #[test]
    fn test_linked_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let env = Environment::new(temp_dir.path());

        env.write_linked(&linked("foo", "1.0", "0")).unwrap();
        env.write_linked(&linked("bar", "2.0", "1")).unwrap();

        let dists: Vec<String> = env.linked().unwrap().iter().map(|p| p.dist()).collect();
        assert_eq!(dists, vec!["bar-2.0-1".to_string(), "foo-1.0-0".to_string()]);
        assert!(env.is_linked("foo-1.0-0").unwrap().is_some());

        env.remove_linked("foo-1.0-0").unwrap();
        assert!(env.is_linked("foo-1.0-0").unwrap().is_none());
    }

    #[test]
    fn test_pinned_specs_skip_comments() {
        let temp_dir = tempfile::tempdir().unwrap();
        let env = Environment::new(temp_dir.path());
        fs::create_dir_all(env.meta_dir()).unwrap();
        fs::write(env.pinned_path(), "# pins\nnumpy 1.9*\n\n  python 2.7*\n").unwrap();

        assert_eq!(
            env.pinned_specs().unwrap(),
            vec!["numpy 1.9*".to_string(), "python 2.7*".to_string()]
        );
    }

    #[test]
    fn test_resolve_prefix_by_name() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = Config::with_root(temp_dir.path());
        fs::create_dir_all(temp_dir.path().join("envs/py27")).unwrap();

        let found = resolve_prefix(&config, Some("py27"), None, false).unwrap();
        assert_eq!(found, temp_dir.path().join("envs/py27"));

        let missing = resolve_prefix(&config, Some("nope"), None, false);
        assert!(matches!(missing, Err(Error::EnvironmentNotFound(_))));

        let new_env = resolve_prefix(&config, Some("nope"), None, true).unwrap();
        assert_eq!(new_env, temp_dir.path().join("envs/nope"));
    }
}
