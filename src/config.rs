// src/config.rs

//! Orchestration configuration
//!
//! Configuration is an explicit, immutable value. It is loaded once (from
//! `$STRATARC`, `~/.stratarc` or `<root_dir>/.stratarc`, in that order) and
//! then passed by reference into every orchestration call. Nothing here is
//! process-global, so several environments can be orchestrated side by side.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name reserved for the root environment
pub const DEFAULT_ROOT_ENV_NAME: &str = "root";

/// Keys accepted in the rc file
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RcFile {
    root_dir: Option<PathBuf>,
    root_env_name: Option<String>,
    envs_dirs: Option<Vec<PathBuf>>,
    pkgs_dirs: Option<Vec<PathBuf>>,
    channels: Option<Vec<String>>,
    create_default_packages: Option<Vec<String>>,
    show_channel_urls: Option<bool>,
    always_yes: Option<bool>,
    offline: Option<bool>,
    local_build_root: Option<PathBuf>,
    subdir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub root_dir: PathBuf,
    pub root_env_name: String,
    pub envs_dirs: Vec<PathBuf>,
    pub pkgs_dirs: Vec<PathBuf>,
    pub channels: Vec<String>,
    pub create_default_packages: Vec<String>,
    pub show_channel_urls: bool,
    pub always_yes: bool,
    pub offline: bool,
    /// Local build output used by `--use-local`
    pub local_build_root: Option<PathBuf>,
    /// Platform subdirectory of each channel, e.g. `linux-64`
    pub subdir: String,
    /// File listing every environment created by this user
    pub registry_path: Option<PathBuf>,
}

impl Config {
    /// Defaults derived from a root directory
    pub fn with_root(root_dir: &Path) -> Self {
        Self {
            root_dir: root_dir.to_path_buf(),
            root_env_name: DEFAULT_ROOT_ENV_NAME.to_string(),
            envs_dirs: vec![root_dir.join("envs")],
            pkgs_dirs: vec![root_dir.join("pkgs")],
            channels: Vec::new(),
            create_default_packages: Vec::new(),
            show_channel_urls: false,
            always_yes: false,
            offline: false,
            local_build_root: None,
            subdir: default_subdir(),
            registry_path: None,
        }
    }

    /// Load configuration from the environment and the first rc file found
    pub fn load() -> Result<Self> {
        let home = env::var_os("HOME").map(PathBuf::from);

        let mut root_dir = match env::var_os("STRATA_ROOT") {
            Some(root) => PathBuf::from(root),
            None => match &home {
                Some(home) => home.join(".strata").join("root"),
                None => env::current_dir()?.join(".strata"),
            },
        };

        let rc = match rc_path(home.as_deref(), &root_dir) {
            Some(path) => load_rc(&path)?,
            None => RcFile::default(),
        };

        if env::var_os("STRATA_ROOT").is_none() {
            if let Some(dir) = &rc.root_dir {
                root_dir = expand_home(dir, home.as_deref());
            }
        }

        let mut config = Self::with_root(&root_dir);
        config.apply(rc, home.as_deref());

        if let Some(paths) = env::var_os("STRATA_ENVS_PATH") {
            config.envs_dirs = env::split_paths(&paths).collect();
        }
        config.registry_path = home.map(|h| h.join(".strata").join("environments.txt"));

        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    fn apply(&mut self, rc: RcFile, home: Option<&Path>) {
        if let Some(name) = rc.root_env_name {
            self.root_env_name = name;
        }
        if let Some(dirs) = rc.envs_dirs {
            self.envs_dirs = dirs.iter().map(|d| expand_home(d, home)).collect();
        }
        if let Some(dirs) = rc.pkgs_dirs {
            self.pkgs_dirs = dirs.iter().map(|d| expand_home(d, home)).collect();
        }
        if let Some(channels) = rc.channels {
            self.channels = channels;
        }
        if let Some(packages) = rc.create_default_packages {
            self.create_default_packages = packages;
        }
        self.show_channel_urls = rc.show_channel_urls.unwrap_or(self.show_channel_urls);
        self.always_yes = rc.always_yes.unwrap_or(self.always_yes);
        self.offline = rc.offline.unwrap_or(self.offline);
        if let Some(root) = rc.local_build_root {
            self.local_build_root = Some(expand_home(&root, home));
        }
        if let Some(subdir) = rc.subdir {
            self.subdir = subdir;
        }
    }

    /// Package cache where fetched archives are stored and extracted
    pub fn pkgs_dir(&self) -> &Path {
        self.pkgs_dirs
            .first()
            .map(PathBuf::as_path)
            .unwrap_or(self.root_dir.as_path())
    }}

fn rc_path(home: Option<&Path>, root_dir: &Path) -> Option<PathBuf> {
    if let Some(path) = env::var_os("STRATARC") {
        if path.is_empty() || path == " " {
            return None;
        }
        return Some(PathBuf::from(path));
    }
    let candidates = home
        .map(|h| h.join(".stratarc"))
        .into_iter()
        .chain(std::iter::once(root_dir.join(".stratarc")));
    candidates.into_iter().find(|p| p.is_file())
}

fn load_rc(path: &Path) -> Result<RcFile> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
    parse_rc(&content).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

fn parse_rc(content: &str) -> std::result::Result<RcFile, toml::de::Error> {
    toml::from_str(content)
}

fn expand_home(path: &Path, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix("~"), home) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

fn default_subdir() -> String {
    let platform = match env::consts::OS {
        "macos" => "osx",
        "windows" => "win",
        other => other,
    };
    let arch = match env::consts::ARCH {
        "x86_64" => "64",
        "x86" => "32",
        other => other,
    };
    format!("{}-{}", platform, arch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_root() {
        let config = Config::with_root(Path::new("/opt/strata"));
        assert_eq!(config.envs_dirs, vec![PathBuf::from("/opt/strata/envs")]);
        assert_eq!(config.pkgs_dir(), Path::new("/opt/strata/pkgs"));
        assert_eq!(config.root_env_name, "root");
    }

    #[test]
    fn test_rc_overrides() {
        let rc = parse_rc(
            r#"
            channels = ["/srv/channel"]
            create_default_packages = ["pip", "ipython"]
            envs_dirs = ["~/envs"]
            show_channel_urls = true
            "#,
        )
        .unwrap();

        let mut config = Config::with_root(Path::new("/opt/strata"));
        config.apply(rc, Some(Path::new("/home/user")));

        assert_eq!(config.channels, vec!["/srv/channel".to_string()]);
        assert_eq!(config.create_default_packages.len(), 2);
        assert_eq!(config.envs_dirs, vec![PathBuf::from("/home/user/envs")]);
        assert!(config.show_channel_urls);
        assert!(!config.always_yes);
    }

    #[test]
    fn test_unknown_rc_key_is_rejected() {
        assert!(parse_rc("no_such_key = 1").is_err());
    }
}
