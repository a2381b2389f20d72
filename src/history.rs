// src/history.rs

//! Append-only history log of an environment
//!
//! The file is a sequence of revision blocks. A block starts with a
//! `==> <timestamp> <==` header and a `# cmd:` line. The first block lists
//! every linked dist; later blocks list `+dist` / `-dist` changes. Lines
//! starting with `#` are annotations (including the per-command
//! `# <command> specs: [...]` lines) and are ignored when reconstructing
//! states.

use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::index::split_dist;
use crate::spec::MatchSpec;
use crate::version::PackageVersion;
use chrono::Local;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::{debug, warn};

/// One revision: its timestamp and either a full dist list or a diff
pub type Revision = (String, BTreeSet<String>);

/// Structured view of one revision
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RevisionEvent {
    pub date: String,
    pub rev: usize,
    pub install: Vec<String>,
    pub remove: Vec<String>,
    pub upgrade: Vec<(String, String)>,
    pub downgrade: Vec<(String, String)>,
}

pub struct History {
    env: Environment,
    path: PathBuf,
}

impl History {
    pub fn new(env: &Environment) -> Self {
        Self {
            env: env.clone(),
            path: env.history_path(),
        }
    }

    /// Bring the log up to date with the linked set, creating it if needed
    ///
    /// Permission failures are logged and ignored.
    pub fn update(&self) -> Result<()> {
        match self.try_update() {
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::PermissionDenied => {
                debug!("Can't write the history file {}: {}", self.path.display(), e);
                Ok(())
            }
            other => other,
        }
    }

    fn try_update(&self) -> Result<()> {
        if !self.path.is_file() {
            return self.write_dists(&self.env.linked_dists()?);
        }
        let last = match self.get_state(None) {
            Ok(state) => state.unwrap_or_default(),
            Err(Error::Internal(msg)) => {
                warn!("Error in {}: {}", self.path.display(), msg);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let current = self.env.linked_dists()?;
        if last == current {
            return Ok(());
        }
        self.write_changes(&last, &current)
    }

    /// Parse the log into revisions
    pub fn parse(&self) -> Result<Vec<Revision>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut revisions: Vec<Revision> = Vec::new();
        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(date) = parse_header(line) {
                revisions.push((date.to_string(), BTreeSet::new()));
                continue;
            }
            match revisions.last_mut() {
                Some((_, content)) => {
                    content.insert(line.to_string());
                }
                None => {
                    return Err(Error::Internal(format!(
                        "entry before first revision header: {}",
                        line
                    )));
                }
            }
        }
        Ok(revisions)
    }

    /// The full dist set after every revision
    pub fn construct_states(&self) -> Result<Vec<Revision>> {
        let mut states = Vec::new();
        let mut current: BTreeSet<String> = BTreeSet::new();
        for (date, content) in self.parse()? {
            if !is_diff(&content) {
                current = content;
            } else {
                for entry in &content {
                    if let Some(dist) = entry.strip_prefix('-') {
                        current.remove(dist);
                    } else if let Some(dist) = entry.strip_prefix('+') {
                        current.insert(dist.to_string());
                    } else {
                        return Err(Error::Internal(format!("did not expect: {}", entry)));
                    }
                }
            }
            states.push((date, current.clone()));
        }
        Ok(states)
    }

    /// The dist set at revision `rev` (latest when `None`)
    ///
    /// Returns `Ok(None)` for a revision that does not exist. An empty log
    /// has an empty latest state.
    pub fn get_state(&self, rev: Option<usize>) -> Result<Option<BTreeSet<String>>> {
        let mut states = self.construct_states()?;
        match rev {
            None => Ok(Some(states.pop().map(|(_, s)| s).unwrap_or_default())),
            Some(i) if i < states.len() => Ok(Some(states.swap_remove(i).1)),
            Some(_) => Ok(None),
        }
    }

    /// Per-revision install/remove/upgrade/downgrade summary
    pub fn object_log(&self) -> Result<Vec<RevisionEvent>> {
        let mut events = Vec::new();
        for (rev, (date, content)) in self.parse()?.into_iter().enumerate() {
            let mut event = RevisionEvent {
                date,
                rev,
                ..Default::default()
            };

            if !is_diff(&content) {
                event.install = content.into_iter().collect();
                events.push(event);
                continue;
            }

            let mut added: BTreeMap<String, (String, String)> = BTreeMap::new();
            let mut removed: BTreeMap<String, (String, String)> = BTreeMap::new();
            for entry in &content {
                let (target, dist) = if let Some(dist) = entry.strip_prefix('+') {
                    (&mut added, dist)
                } else if let Some(dist) = entry.strip_prefix('-') {
                    (&mut removed, dist)
                } else {
                    continue;
                };
                if let Some((name, version, build)) = split_dist(dist) {
                    target.insert(name.to_lowercase(), (version.to_string(), build.to_string()));
                }
            }

            for (name, new) in &added {
                let full_new = format!("{}-{}-{}", name, new.0, new.1);
                match removed.get(name) {
                    Some(old) => {
                        let full_old = format!("{}-{}-{}", name, old.0, old.1);
                        let newer = (PackageVersion::parse(&new.0), &new.1)
                            > (PackageVersion::parse(&old.0), &old.1);
                        if newer {
                            event.upgrade.push((full_old, full_new));
                        } else {
                            event.downgrade.push((full_old, full_new));
                        }
                    }
                    None => event.install.push(full_new),
                }
            }
            for (name, old) in &removed {
                if !added.contains_key(name) {
                    event.remove.push(format!("{}-{}-{}", name, old.0, old.1));
                }
            }
            events.push(event);
        }
        Ok(events)
    }

    /// Append `# <command> specs: [...]` after a successful mutating command
    ///
    /// A permission failure is logged and swallowed; any other I/O failure
    /// is returned.
    pub fn append_command(&self, command: &str, specs: &[MatchSpec]) -> Result<()> {
        let line = format!("# {} specs: {}\n", command, format_specs(specs));
        let result = (|| -> io::Result<()> {
            let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            file.write_all(line.as_bytes())
        })();

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                debug!("Can't write the history file {}: {}", self.path.display(), e);
                Ok(())
            }
            Err(e) => Err(Error::os(
                format!("failed to append to {}", self.path.display()),
                e,
            )),
        }
    }

    fn write_dists(&self, dists: &BTreeSet<String>) -> Result<()> {
        if dists.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.env.meta_dir())?;
        let mut out = head();
        for dist in dists {
            out.push_str(dist);
            out.push('\n');
        }
        fs::write(&self.path, out)?;
        Ok(())
    }

    fn write_changes(&self, last: &BTreeSet<String>, current: &BTreeSet<String>) -> Result<()> {
        let mut out = head();
        for dist in last.difference(current) {
            out.push_str(&format!("-{}\n", dist));
        }
        for dist in current.difference(last) {
            out.push_str(&format!("+{}\n", dist));
        }
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(out.as_bytes())?;
        Ok(())
    }
}

/// Render specs as `['a', 'b 1.0*']`
pub fn format_specs(specs: &[MatchSpec]) -> String {
    let quoted: Vec<String> = specs.iter().map(|s| format!("'{}'", s)).collect();
    format!("[{}]", quoted.join(", "))
}

fn head() -> String {
    let args: Vec<String> = std::env::args().collect();
    format!(
        "==> {} <==\n# cmd: {}\n",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        args.join(" ")
    )
}

fn parse_header(line: &str) -> Option<&str> {
    line.strip_prefix("==>")?
        .strip_suffix("<==")
        .map(str::trim)
}

fn is_diff(content: &BTreeSet<String>) -> bool {
    content.iter().any(|s| s.starts_with('-') || s.starts_with('+'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::LinkedPackage;

    fn link(env: &Environment, name: &str, version: &str) {
        env.write_linked(&LinkedPackage {
            name: name.to_string(),
            version: version.to_string(),
            build: "0".to_string(),
            build_number: 0,
            channel: None,
            files: Vec::new(),
        })
        .unwrap();
    }

    #[test]
    fn test_update_records_revisions() {
        let temp_dir = tempfile::tempdir().unwrap();
        let env = Environment::new(temp_dir.path());
        let history = History::new(&env);

        link(&env, "foo", "1.0");
        history.update().unwrap();

        env.remove_linked("foo-1.0-0").unwrap();
        link(&env, "foo", "2.0");
        link(&env, "bar", "1.0");
        history.update().unwrap();

        // unchanged state writes nothing
        history.update().unwrap();

        let states = history.construct_states().unwrap();
        assert_eq!(states.len(), 2);
        assert!(states[0].1.contains("foo-1.0-0"));
        assert!(states[1].1.contains("foo-2.0-0"));
        assert!(states[1].1.contains("bar-1.0-0"));

        assert_eq!(history.get_state(Some(0)).unwrap().unwrap().len(), 1);
        assert!(history.get_state(Some(7)).unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_read_only_history_is_not_fatal() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::tempdir().unwrap();
        let env = Environment::new(temp_dir.path());
        let history = History::new(&env);

        link(&env, "foo", "1.0");
        history.update().unwrap();
        fs::set_permissions(env.history_path(), fs::Permissions::from_mode(0o444)).unwrap();

        link(&env, "bar", "1.0");
        assert!(history.update().is_ok());
        assert!(
            history
                .append_command("install", &[MatchSpec::name_only("bar")])
                .is_ok()
        );

        fs::set_permissions(env.history_path(), fs::Permissions::from_mode(0o644)).unwrap();
    }

    #[test]
    fn test_object_log_classifies_changes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let env = Environment::new(temp_dir.path());
        fs::create_dir_all(env.meta_dir()).unwrap();
        fs::write(
            env.history_path(),
            "==> 2015-01-01 00:00:00 <==\n# cmd: strata create\nfoo-1.0-0\nbaz-1.0-0\n\
             ==> 2015-01-02 00:00:00 <==\n# install specs: ['foo']\n\
             -foo-1.0-0\n+foo-1.1-0\n-baz-1.0-0\n+qux-0.1-0\n",
        )
        .unwrap();

        let events = History::new(&env).object_log().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].install.len(), 2);
        assert_eq!(
            events[1].upgrade,
            vec![("foo-1.0-0".to_string(), "foo-1.1-0".to_string())]
        );
        assert_eq!(events[1].remove, vec!["baz-1.0-0".to_string()]);
        assert_eq!(events[1].install, vec!["qux-0.1-0".to_string()]);
    }

    #[test]
    fn test_append_command_line() {
        let temp_dir = tempfile::tempdir().unwrap();
        let env = Environment::new(temp_dir.path());
        fs::create_dir_all(env.meta_dir()).unwrap();
        let history = History::new(&env);

        let specs = vec![MatchSpec::name_only("foo"), "bar 2.0*".parse().unwrap()];
        history.append_command("install", &specs).unwrap();

        let content = fs::read_to_string(env.history_path()).unwrap();
        assert_eq!(content, "# install specs: ['foo', 'bar 2.0*']\n");
        // command lines never become revision content
        assert!(history.parse().unwrap().is_empty());
    }
}
