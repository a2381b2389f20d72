// src/index.rs

//! Package index
//!
//! The index maps package filenames to their metadata. It is produced once
//! per orchestration attempt by an [`IndexProvider`] and is read-only after
//! that.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::spec::MatchSpec;
use crate::version::PackageVersion;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Metadata for one package build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub build: String,
    #[serde(default)]
    pub build_number: u64,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_features: Option<String>,
    /// Where the archive can be fetched from (local file)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
}

impl PackageRecord {
    pub fn new(name: &str, version: &str, build: &str, build_number: u64) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            build: build.to_string(),
            build_number,
            depends: Vec::new(),
            channel: None,
            size: 0,
            features: None,
            track_features: None,
            source: None,
        }
    }

    /// The `name-version-build` identifier
    pub fn dist(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.build)
    }

    /// Sort key used to pick the best candidate
    pub fn sort_key(&self) -> (PackageVersion, u64) {
        (PackageVersion::parse(&self.version), self.build_number)
    }

    /// Parsed dependency specs; malformed entries are skipped with a warning
    pub fn dependency_specs(&self) -> Vec<MatchSpec> {
        self.depends
            .iter()
            .filter_map(|dep| match dep.parse::<MatchSpec>() {
                Ok(spec) => Some(spec),
                Err(e) => {
                    warn!("Ignoring malformed dependency '{}' of {}: {}", dep, self.dist(), e);
                    None
                }
            })
            .collect()
    }
}

/// Split a dist identifier into `(name, version, build)`
pub fn split_dist(dist: &str) -> Option<(&str, &str, &str)> {
    let mut parts = dist.rsplitn(3, '-');
    let build = parts.next()?;
    let version = parts.next()?;
    let name = parts.next()?;
    if name.is_empty() || version.is_empty() {
        return None;
    }
    Some((name, version, build))
}

/// Name component of a dist identifier
pub fn name_dist(dist: &str) -> &str {
    split_dist(dist).map(|(name, _, _)| name).unwrap_or(dist)
}

/// Filename → record mapping for one orchestration run
#[derive(Debug, Clone, Default)]
pub struct Index {
    records: BTreeMap<String, PackageRecord>,
    by_dist: BTreeMap<String, String>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, filename: String, record: PackageRecord) {
        self.by_dist.insert(record.dist(), filename.clone());
        self.records.insert(filename, record);
    }

    pub fn get(&self, filename: &str) -> Option<&PackageRecord> {
        self.records.get(filename)
    }

    /// Look a record up by its dist identifier
    pub fn get_dist(&self, dist: &str) -> Option<&PackageRecord> {
        self.by_dist.get(dist).and_then(|fn_| self.records.get(fn_))
    }

    pub fn filename_of(&self, dist: &str) -> Option<&str> {
        self.by_dist.get(dist).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PackageRecord)> {
        self.records.iter()
    }

    /// All distinct package names in the index
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.records.values().map(|r| r.name.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    /// Records matching `spec`, sorted ascending by (version, build number)
    pub fn get_pkgs(&self, spec: &MatchSpec) -> Vec<&PackageRecord> {
        let mut pkgs: Vec<&PackageRecord> =
            self.records.values().filter(|r| spec.matches(r)).collect();
        pkgs.sort_by_key(|r| r.sort_key());
        pkgs
    }

    /// Best (newest) record matching `spec`
    pub fn best(&self, spec: &MatchSpec) -> Option<&PackageRecord> {
        self.get_pkgs(spec).pop()
    }
}

impl FromIterator<PackageRecord> for Index {
    fn from_iter<T: IntoIterator<Item = PackageRecord>>(iter: T) -> Self {
        let mut index = Index::new();
        for record in iter {
            let filename = format!("{}.tar.gz", record.dist());
            index.insert(filename, record);
        }
        index
    }
}

/// What to fetch: the channel list and fetch modifiers
#[derive(Debug, Clone, Default)]
pub struct IndexRequest {
    pub channels: Vec<String>,
    pub offline: bool,
    /// Also index packages already present in the package cache
    pub unknown: bool,
}

impl IndexRequest {
    /// Assemble the channel list: explicit channels, then (unless overridden)
    /// the configured ones, with the local build root in front when requested
    pub fn from_args(
        config: &Config,
        channels: &[String],
        override_channels: bool,
        use_local: bool,
        offline: bool,
    ) -> Self {
        let mut list: Vec<String> = Vec::new();
        if use_local {
            if let Some(root) = &config.local_build_root {
                if root.exists() {
                    list.push(root.display().to_string());
                }
            }
        }
        list.extend(channels.iter().cloned());
        if !override_channels {
            for channel in &config.channels {
                if !list.contains(channel) {
                    list.push(channel.clone());
                }
            }
        }
        Self {
            channels: list,
            offline: offline || config.offline,
            unknown: false,
        }
    }
}

/// Capability that produces an index for a set of channels
pub trait IndexProvider {
    fn fetch_index(&self, request: &IndexRequest) -> Result<Index>;
}

#[derive(Debug, Deserialize)]
struct RepoData {
    #[serde(default)]
    packages: BTreeMap<String, PackageRecord>,
}

/// Index provider reading `repodata.json` from channels on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalChannelIndex {
    subdir: String,
    pkgs_dirs: Vec<PathBuf>,
}

impl LocalChannelIndex {
    pub fn new(config: &Config) -> Self {
        Self {
            subdir: config.subdir.clone(),
            pkgs_dirs: config.pkgs_dirs.clone(),
        }
    }

    fn channel_root(channel: &str) -> Option<PathBuf> {
        if let Some(path) = channel.strip_prefix("file://") {
            return Some(PathBuf::from(path));
        }
        if channel.contains("://") {
            return None;
        }
        Some(PathBuf::from(channel))
    }

    fn read_repodata(&self, index: &mut Index, channel: &str, dir: &Path) -> Result<()> {
        let path = dir.join("repodata.json");
        if !path.is_file() {
            debug!("No repodata at {}", path.display());
            return Ok(());
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| Error::os(format!("failed to read {}", path.display()), e))?;
        let repodata: RepoData = serde_json::from_str(&content)?;

        for (filename, mut record) in repodata.packages {
            record.channel = Some(channel.to_string());
            record.source = Some(dir.join(&filename));
            index.insert(filename, record);
        }
        Ok(())
    }

    /// Add records for packages extracted in the package cache
    fn read_cache(&self, index: &mut Index) -> Result<()> {
        for pkgs_dir in &self.pkgs_dirs {
            let Ok(entries) = fs::read_dir(pkgs_dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let meta = entry.path().join("info").join("index.json");
                if !meta.is_file() {
                    continue;
                }
                let content = fs::read_to_string(&meta)?;
                let record: PackageRecord = match serde_json::from_str(&content) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!("Skipping unreadable cache entry {}: {}", meta.display(), e);
                        continue;
                    }
                };
                let filename = format!("{}.tar.gz", record.dist());
                if index.get_dist(&record.dist()).is_none() {
                    index.insert(filename, record);
                }
            }
        }
        Ok(())
    }
}

impl IndexProvider for LocalChannelIndex {
    fn fetch_index(&self, request: &IndexRequest) -> Result<Index> {
        let mut index = Index::new();

        for channel in &request.channels {
            let Some(root) = Self::channel_root(channel) else {
                if request.offline {
                    debug!("Offline mode, skipping remote channel {}", channel);
                    continue;
                }
                return Err(Error::MissingOptionalCapability {
                    capability: "remote channel fetching".to_string(),
                    remedy: format!(
                        "mirror {} to a local directory and use it as a channel",
                        channel
                    ),
                });
            };

            self.read_repodata(&mut index, channel, &root.join(&self.subdir))?;
            self.read_repodata(&mut index, channel, &root.join("noarch"))?;
        }

        if request.unknown {
            self.read_cache(&mut index)?;
        }

        info!("Fetched index with {} packages", index.len());
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, version: &str, build_number: u64) -> PackageRecord {
        PackageRecord::new(name, version, &build_number.to_string(), build_number)
    }

    #[test]
    fn test_split_dist() {
        assert_eq!(split_dist("foo-bar-1.0-py27_0"), Some(("foo-bar", "1.0", "py27_0")));
        assert_eq!(name_dist("numpy-1.9.2-py27_0"), "numpy");
        assert_eq!(split_dist("broken"), None);
    }

    #[test]
    fn test_best_prefers_version_then_build_number() {
        let index: Index = vec![
            record("foo", "1.0", 0),
            record("foo", "1.0", 2),
            record("foo", "0.9", 5),
            record("bar", "3.0", 0),
        ]
        .into_iter()
        .collect();

        let best = index.best(&MatchSpec::name_only("foo")).unwrap();
        assert_eq!(best.version, "1.0");
        assert_eq!(best.build_number, 2);
        assert_eq!(index.names(), vec!["bar".to_string(), "foo".to_string()]);
        assert!(index.get_dist("foo-1.0-2").is_some());
    }

    #[test]
    fn test_local_channel_reads_repodata() {
        let temp_dir = tempfile::tempdir().unwrap();
        let channel = temp_dir.path().join("channel");
        let subdir = channel.join("linux-64");
        fs::create_dir_all(&subdir).unwrap();
        fs::write(
            subdir.join("repodata.json"),
            r#"{"packages": {"foo-1.0-0.tar.gz": {"name": "foo", "version": "1.0",
                "build": "0", "build_number": 0, "depends": ["bar >=1"], "size": 10}}}"#,
        )
        .unwrap();

        let mut config = Config::with_root(temp_dir.path());
        config.subdir = "linux-64".to_string();
        let provider = LocalChannelIndex::new(&config);
        let request = IndexRequest {
            channels: vec![channel.display().to_string()],
            ..Default::default()
        };

        let index = provider.fetch_index(&request).unwrap();
        let rec = index.get("foo-1.0-0.tar.gz").unwrap();
        assert_eq!(rec.depends, vec!["bar >=1".to_string()]);
        assert_eq!(rec.source.as_deref(), Some(subdir.join("foo-1.0-0.tar.gz").as_path()));
    }

    #[test]
    fn test_remote_channel_requires_capability() {
        let temp_dir = tempfile::tempdir().unwrap();
        let provider = LocalChannelIndex::new(&Config::with_root(temp_dir.path()));
        let request = IndexRequest {
            channels: vec!["https://example.com/channel".to_string()],
            ..Default::default()
        };
        let err = provider.fetch_index(&request).unwrap_err();
        assert_eq!(err.kind(), "MissingOptionalCapability");

        let offline = IndexRequest {
            offline: true,
            ..request
        };
        assert!(provider.fetch_index(&offline).unwrap().is_empty());
    }
}
