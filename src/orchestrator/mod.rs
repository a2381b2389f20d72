// src/orchestrator/mod.rs

//! Request orchestration
//!
//! [`Orchestrator::run`] turns one install, update or create request into
//! an executed [`ActionPlan`]:
//!
//! 1. Resolve and guard the target prefix
//! 2. Probe optional capabilities
//! 3. Take the clone or revert path when requested
//! 4. Otherwise collect specs, fetch the index, drop up-to-date names,
//!    and resolve
//! 5. Hand a non-empty plan to the executor
//!
//! When `update --all` hits packages that can no longer be found, they are
//! added to a skip-set and the request starts over from spec collection.
//! Every restart grows the skip-set, so the loop is bounded.

mod skip;

pub use skip::skip_up_to_date;

use crate::capability;
use crate::clone::{CloneReport, clone_env, clone_plan, find_source};
use crate::collect::{ALWAYS_SKIPPED, collect_specs};
use crate::config::Config;
use crate::environment::{
    Environment, append_env, check_new_prefix, ensure_existing_prefix, resolve_prefix,
};
use crate::error::{Error, Result};
use crate::executor::{Confirm, ExecuteOptions, classify_execution_error, execute_plan};
use crate::index::{Index, IndexProvider, IndexRequest};
use crate::interpreter::InstructionInterpreter;
use crate::plan::{ActionPlan, revert_actions};
use crate::resolver::{ResolveOptions, Resolver};
use crate::spec::MatchSpec;
use crate::suggest::{DEFAULT_CUTOFF, close_matches};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Mutating commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    #[default]
    Install,
    Update,
    Create,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Install => "install",
            Command::Update => "update",
            Command::Create => "create",
        }
    }
}

/// Everything one invocation asks for
#[derive(Debug, Clone, Default)]
pub struct InstallRequest {
    pub command: Command,
    pub name: Option<String>,
    pub prefix: Option<PathBuf>,
    /// Specs, package archives, or a single bundle
    pub packages: Vec<String>,
    pub file: Option<PathBuf>,
    pub all: bool,
    pub force: bool,
    pub no_deps: bool,
    pub dry_run: bool,
    /// Name or path of the environment to clone (create only)
    pub clone: Option<String>,
    /// History revision to go back to (install only)
    pub revision: Option<String>,
    pub offline: bool,
    pub use_local: bool,
    pub mkdir: bool,
    pub no_default_packages: bool,
    pub no_pin: bool,
    pub alt_hint: bool,
    pub channels: Vec<String>,
    pub override_channels: bool,
    pub yes: bool,
}

/// How a request ended
#[derive(Debug)]
pub enum Outcome {
    /// Everything requested is already installed
    NothingToDo {
        prefix: PathBuf,
        specs: Vec<MatchSpec>,
    },
    /// The plan that would have run
    DryRun(ActionPlan),
    /// Declined at the confirmation prompt
    Aborted,
    Executed(ActionPlan),
    Cloned(CloneReport),
}

/// Wires the collaborators of one orchestration together
pub struct Orchestrator<'a> {
    config: &'a Config,
    index_provider: &'a dyn IndexProvider,
    resolver: &'a dyn Resolver,
    interpreter: &'a dyn InstructionInterpreter,
    confirm: &'a dyn Confirm,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a Config,
        index_provider: &'a dyn IndexProvider,
        resolver: &'a dyn Resolver,
        interpreter: &'a dyn InstructionInterpreter,
        confirm: &'a dyn Confirm,
    ) -> Self {
        Self {
            config,
            index_provider,
            resolver,
            interpreter,
            confirm,
        }
    }

    pub fn run(&self, request: &InstallRequest) -> Result<Outcome> {
        let config = self.config;
        let command = request.command;
        let new_env = command == Command::Create;

        let prefix = resolve_prefix(
            config,
            request.name.as_deref(),
            request.prefix.as_deref(),
            new_env,
        )?;
        let env = Environment::new(&prefix);
        debug!("{} into {}", command.as_str(), prefix.display());

        if new_env {
            check_new_prefix(config, &prefix)?;
        }
        self.validate(request)?;
        let revision = parse_revision(request.revision.as_deref())?;

        let index_request = IndexRequest::from_args(
            config,
            &request.channels,
            request.override_channels,
            request.use_local,
            request.offline,
        );
        capability::probe(config, &request.channels, request.use_local, request.offline)?;

        if !new_env {
            ensure_existing_prefix(&prefix, request.mkdir)?;
        }

        if let Some(revision) = revision {
            return self.revert(request, &env, &index_request, revision);
        }
        if let Some(source) = &request.clone {
            return self.clone_from(request, &prefix, &index_request, source);
        }

        let update_all = command == Command::Update && request.all;
        let max_attempts = if update_all {
            1 + env.linked()?.len()
        } else {
            1
        };
        let mut skip: BTreeSet<String> = BTreeSet::from([ALWAYS_SKIPPED.to_string()]);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let collected = collect_specs(config, &env, request, &skip)?;

            let mut fetch = index_request.clone();
            fetch.unknown = collected.unknown;
            let mut index = self.index_provider.fetch_index(&fetch)?;
            for record in collected.local_records {
                let filename = record
                    .source
                    .as_deref()
                    .and_then(Path::file_name)
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_else(|| format!("{}.tar.gz", record.dist()));
                index.insert(filename, record);
            }
            debug!("Index has {} records", index.len());

            let mut specs = collected.specs;
            if command == Command::Update && !request.all && !request.force {
                let names: Vec<String> = specs.iter().map(|s| s.name.clone()).collect();
                let remaining = skip_up_to_date(&env, &index, &names)?;
                if remaining.is_empty() {
                    info!("All requested packages already installed");
                    return Ok(Outcome::NothingToDo { prefix, specs });
                }
                specs.retain(|s| remaining.contains(&s.name));
            }

            let options = ResolveOptions {
                force: request.force,
                only_names: (request.no_deps || request.force)
                    .then(|| specs.iter().map(|s| s.name.clone()).collect()),
                pinned: !request.no_pin,
                minimal_hint: request.alt_hint,
            };

            let plan = match self.resolver.resolve(&prefix, &index, &specs, &options) {
                Ok(plan) => plan,
                Err(Error::MissingPackages { names, message }) if update_all => {
                    let before = skip.len();
                    skip.extend(names.iter().cloned());
                    if skip.len() == before || attempt >= max_attempts {
                        return Err(self.enrich_missing(&env, &index, names, message));
                    }
                    warn!("{}, skipping", message);
                    continue;
                }
                Err(Error::MissingPackages { names, message }) => {
                    return Err(self.enrich_missing(&env, &index, names, message));
                }
                Err(e) => return Err(e),
            };

            if plan.nothing_to_do() {
                info!("All requested packages already installed");
                return Ok(Outcome::NothingToDo { prefix, specs });
            }

            let outcome = execute_plan(
                config,
                plan,
                &index,
                &specs,
                ExecuteOptions {
                    command,
                    dry_run: request.dry_run,
                    yes: request.yes,
                    skip_history: update_all,
                },
                self.interpreter,
                self.confirm,
            );
            // unpacked bundle contents live until the plan has run
            drop(collected.bundle_dir);
            return outcome;
        }
    }

    /// Flag combinations rejected before touching the filesystem
    fn validate(&self, request: &InstallRequest) -> Result<()> {
        if request.override_channels && request.channels.is_empty() {
            return Err(Error::InvalidArgument(
                "--override-channels requires -c/--channel".to_string(),
            ));
        }
        if request.clone.is_some() {
            if request.command != Command::Create {
                return Err(Error::InvalidArgument(
                    "--clone can only be used with create".to_string(),
                ));
            }
            let defaults: &[String] = if request.no_default_packages {
                &[]
            } else {
                &self.config.create_default_packages
            };
            if request.packages.iter().any(|p| !defaults.contains(p)) {
                return Err(Error::InvalidArgument(
                    "did not expect any arguments for --clone".to_string(),
                ));
            }
        }
        if request.revision.is_some() && request.command != Command::Install {
            return Err(Error::InvalidArgument(
                "--revision can only be used with install".to_string(),
            ));
        }
        Ok(())
    }

    fn revert(
        &self,
        request: &InstallRequest,
        env: &Environment,
        index_request: &IndexRequest,
        revision: usize,
    ) -> Result<Outcome> {
        let index = self.index_provider.fetch_index(index_request)?;
        let plan = revert_actions(env, &index, self.config.pkgs_dir(), revision)?;
        if plan.nothing_to_do() {
            info!("Already at revision {}", revision);
            return Ok(Outcome::NothingToDo {
                prefix: env.prefix().to_path_buf(),
                specs: Vec::new(),
            });
        }

        execute_plan(
            self.config,
            plan,
            &index,
            &[],
            ExecuteOptions {
                command: request.command,
                dry_run: request.dry_run,
                yes: request.yes,
                skip_history: false,
            },
            self.interpreter,
            self.confirm,
        )
    }

    fn clone_from(
        &self,
        request: &InstallRequest,
        prefix: &Path,
        index_request: &IndexRequest,
        source: &str,
    ) -> Result<Outcome> {
        let src = find_source(self.config, source)?;
        let index = self.index_provider.fetch_index(index_request)?;

        if request.dry_run {
            let plan = clone_plan(&src, prefix, &index, self.config.pkgs_dir())?;
            return Ok(Outcome::DryRun(plan));
        }

        let report = clone_env(&src, prefix, &index, self.config.pkgs_dir(), self.interpreter)
            .map_err(classify_execution_error)?;
        append_env(self.config, prefix);
        Ok(Outcome::Cloned(report))
    }

    /// Add close matches and the environment's pins to a missing-package error
    fn enrich_missing(
        &self,
        env: &Environment,
        index: &Index,
        names: Vec<String>,
        mut message: String,
    ) -> Error {
        let known = index.names();
        for name in &names {
            let close = close_matches(name, &known, DEFAULT_CUTOFF);
            if !close.is_empty() {
                message.push_str(&format!(
                    "\n\nDid you mean one of these?\n\n    {}",
                    close.join(", ")
                ));
            }
        }

        match env.pinned_specs() {
            Ok(pinned) if !pinned.is_empty() => {
                let quoted: Vec<String> = pinned.iter().map(|p| format!("'{}'", p)).collect();
                message.push_str(&format!(
                    "\n\nNote that you have pinned specs in {}:\n\n    [{}]",
                    env.pinned_path().display(),
                    quoted.join(", ")
                ));
            }
            Ok(_) => {}
            Err(e) => debug!("Could not read pinned specs: {}", e),
        }

        Error::MissingPackages { names, message }
    }
}

/// `--revision` must be a non-negative integer
fn parse_revision(arg: Option<&str>) -> Result<Option<usize>> {
    arg.map(|rev| {
        rev.trim().parse::<usize>().map_err(|_| {
            Error::InvalidArgument(format!(
                "expected a non-negative integer for --revision, got '{}'",
                rev
            ))
        })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::LinkedPackage;
    use crate::executor::AlwaysYes;
    use crate::index::PackageRecord;
    use crate::plan::Instruction;
    use crate::resolver::LatestResolver;
    use std::cell::Cell;
    use std::fs;

    struct StaticIndex(Index);

    impl IndexProvider for StaticIndex {
        fn fetch_index(&self, _request: &IndexRequest) -> Result<Index> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct Counter {
        calls: Cell<usize>,
    }

    impl InstructionInterpreter for Counter {
        fn execute(&self, _plan: &ActionPlan, _index: &Index) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            Ok(())
        }
    }

    fn setup() -> (tempfile::TempDir, Config) {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = Config::with_root(temp_dir.path());
        fs::create_dir_all(temp_dir.path().join("envs")).unwrap();
        (temp_dir, config)
    }

    fn link(prefix: &Path, name: &str, version: &str) {
        Environment::new(prefix)
            .write_linked(&LinkedPackage {
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
    fn test_parse_revision() {
        assert_eq!(parse_revision(None).unwrap(), None);
        assert_eq!(parse_revision(Some("3")).unwrap(), Some(3));
        assert!(matches!(parse_revision(Some("-1")), Err(Error::InvalidArgument(_))));
        assert!(matches!(parse_revision(Some("abc")), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_missing_package_gets_suggestions() {
        let (temp_dir, config) = setup();
        let prefix = temp_dir.path().join("envs/work");
        link(&prefix, "python", "3.4");
        fs::write(prefix.join("conda-meta/pinned"), "python 3.4*\n").unwrap();

        let index = StaticIndex([PackageRecord::new("numpy", "1.9", "0", 0)].into_iter().collect());
        let resolver = LatestResolver::new(config.pkgs_dir());
        let interpreter = Counter::default();
        let orchestrator = Orchestrator::new(&config, &index, &resolver, &interpreter, &AlwaysYes);

        let request = InstallRequest {
            prefix: Some(prefix.clone()),
            packages: vec!["numpi".to_string()],
            no_pin: true,
            ..Default::default()
        };
        let err = orchestrator.run(&request).unwrap_err();
        let message = err.to_string();
        assert_eq!(err.kind(), "MissingPackages");
        assert!(message.contains("Did you mean one of these?\n\n    numpy"), "{}", message);
        assert!(message.contains("['python 3.4*']"), "{}", message);
        assert_eq!(interpreter.calls.get(), 0);
    }

    #[test]
    fn test_install_executes_plan() {
        let (temp_dir, config) = setup();
        let prefix = temp_dir.path().join("envs/work");
        link(&prefix, "python", "3.4");

        let mut numpy = PackageRecord::new("numpy", "1.9", "0", 0);
        numpy.depends = vec!["python".to_string()];
        let index = StaticIndex(
            [numpy, PackageRecord::new("python", "3.4", "0", 0)]
                .into_iter()
                .collect(),
        );
        let resolver = LatestResolver::new(config.pkgs_dir());
        let interpreter = Counter::default();
        let orchestrator = Orchestrator::new(&config, &index, &resolver, &interpreter, &AlwaysYes);

        let request = InstallRequest {
            prefix: Some(prefix.clone()),
            packages: vec!["numpy".to_string()],
            ..Default::default()
        };
        let Outcome::Executed(plan) = orchestrator.run(&request).unwrap() else {
            panic!("expected an executed plan");
        };
        assert_eq!(plan.get(Instruction::Link), ["numpy-1.9-0"]);
        assert_eq!(interpreter.calls.get(), 1);

        let history = fs::read_to_string(prefix.join("conda-meta/history")).unwrap();
        assert!(history.ends_with("# install specs: ['numpy']\n"));
    }

    #[test]
    fn test_flag_validation_precedes_filesystem_access() {
        let (temp_dir, config) = setup();
        let index = StaticIndex(Index::new());
        let resolver = LatestResolver::new(config.pkgs_dir());
        let interpreter = Counter::default();
        let orchestrator = Orchestrator::new(&config, &index, &resolver, &interpreter, &AlwaysYes);
        let missing = temp_dir.path().join("envs/nowhere");

        let request = InstallRequest {
            prefix: Some(missing.clone()),
            packages: vec!["foo".to_string()],
            override_channels: true,
            ..Default::default()
        };
        let err = orchestrator.run(&request).unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");

        let request = InstallRequest {
            prefix: Some(missing.clone()),
            packages: vec!["foo".to_string()],
            ..Default::default()
        };
        let err = orchestrator.run(&request).unwrap_err();
        assert_eq!(err.kind(), "EnvironmentNotFound");
        assert!(!missing.exists());
    }

    /// Reports `name` missing however often it is asked
    struct AlwaysMissing {
        name: &'static str,
        calls: Cell<usize>,
    }

    impl Resolver for AlwaysMissing {
        fn resolve(
            &self,
            _prefix: &Path,
            _index: &Index,
            _specs: &[MatchSpec],
            _options: &ResolveOptions,
        ) -> Result<ActionPlan> {
            self.calls.set(self.calls.get() + 1);
            Err(Error::MissingPackages {
                names: vec![self.name.to_string()],
                message: format!("No packages found matching: {}", self.name),
            })
        }
    }

    #[test]
    fn test_fatal_update_all_failure_gets_suggestions() {
        let (temp_dir, config) = setup();
        let prefix = temp_dir.path().join("envs/work");
        link(&prefix, "numpy", "1.9");
        fs::write(prefix.join("conda-meta/pinned"), "numpy 1.9*\n").unwrap();

        let index = StaticIndex([PackageRecord::new("numpy", "1.9", "0", 0)].into_iter().collect());
        let resolver = AlwaysMissing {
            name: "numpi",
            calls: Cell::new(0),
        };
        let interpreter = Counter::default();
        let orchestrator = Orchestrator::new(&config, &index, &resolver, &interpreter, &AlwaysYes);

        let request = InstallRequest {
            command: Command::Update,
            prefix: Some(prefix.clone()),
            all: true,
            ..Default::default()
        };
        let err = orchestrator.run(&request).unwrap_err();
        let message = err.to_string();
        assert_eq!(err.kind(), "MissingPackages");
        // the second attempt adds nothing new to the skip-set
        assert_eq!(resolver.calls.get(), 2);
        assert!(message.contains("Did you mean one of these?\n\n    numpy"), "{}", message);
        assert!(message.contains("['numpy 1.9*']"), "{}", message);
        assert_eq!(interpreter.calls.get(), 0);
    }

    #[test]
    fn test_clone_arguments_follow_effective_defaults() {
        let (temp_dir, mut config) = setup();
        config.create_default_packages = vec!["pip".to_string()];
        let index = StaticIndex(Index::new());
        let resolver = LatestResolver::new(config.pkgs_dir());
        let interpreter = Counter::default();
        let orchestrator = Orchestrator::new(&config, &index, &resolver, &interpreter, &AlwaysYes);

        let request = InstallRequest {
            command: Command::Create,
            prefix: Some(temp_dir.path().join("envs/copy")),
            clone: Some("base".to_string()),
            packages: vec!["pip".to_string()],
            no_default_packages: true,
            ..Default::default()
        };
        let err = orchestrator.run(&request).unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");
        assert!(err.to_string().contains("did not expect any arguments for --clone"));
        assert_eq!(interpreter.calls.get(), 0);
    }
}
