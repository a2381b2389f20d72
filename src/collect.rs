// src/collect.rs

//! Spec collection
//!
//! Gathers the specs of one request from every place they can come from
//! (command-line arguments, a requirements file, the linked set for
//! `--all`, package archives and bundles, and the configured defaults on
//! create) and reduces them to one spec per name.

use crate::archive;
use crate::config::Config;
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::index::PackageRecord;
use crate::orchestrator::{Command, InstallRequest};
use crate::spec::{MatchSpec, arg_name};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tracing::debug;

/// Meta-package never reinstalled by `update --all`
pub const ALWAYS_SKIPPED: &str = "anaconda";

/// Marker of explicit URL lists, which are not supported
const EXPLICIT_MARKER: &str = "@EXPLICIT";

/// Outcome of spec collection
#[derive(Debug, Default)]
pub struct Collected {
    /// One spec per name, in first-seen order
    pub specs: Vec<MatchSpec>,
    /// Records read from package archives given on the command line; they
    /// are added to the index so the archives themselves can be planned
    pub local_records: Vec<PackageRecord>,
    /// Index the package cache as well (set for archive installs)
    pub unknown: bool,
    /// Holds unpacked bundle contents until the plan has run
    pub bundle_dir: Option<TempDir>,
}

/// Collect the specs for an install, update or create request
pub fn collect_specs(
    config: &Config,
    env: &Environment,
    request: &InstallRequest,
    skip: &BTreeSet<String>,
) -> Result<Collected> {
    let packages = &request.packages;
    if request.all && !packages.is_empty() {
        return Err(Error::InvalidArgument(
            "--all cannot be used with packages".to_string(),
        ));
    }
    if request.command == Command::Update && !request.all {
        validate_update(env, packages)?;
    }

    let mut collected = Collected::default();
    let mut specs = Vec::new();

    if let Some(file) = &request.file {
        specs.extend(specs_from_file(file)?);
    } else if request.all {
        specs.extend(specs_from_linked(env, skip)?);
    }

    let archive_count = packages
        .iter()
        .filter(|p| archive::is_package_archive(p))
        .count();
    if archive_count > 0 {
        if archive_count != packages.len() {
            return Err(Error::InvalidArgument(
                "cannot mix specifications with package archive filenames".to_string(),
            ));
        }
        collected.local_records = read_archives(packages.iter().map(Path::new))?;
    } else if packages.len() == 1 && archive::is_bundle(&packages[0]) {
        let (dir, paths) = archive::unpack_bundle(Path::new(&packages[0]))?;
        if paths.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "no package archives found in {}",
                packages[0]
            )));
        }
        collected.local_records = read_archives(paths.iter().map(|p| p.as_path()))?;
        collected.bundle_dir = Some(dir);
    } else {
        for arg in packages {
            specs.push(MatchSpec::from_arg(arg)?);
        }
        if request.command == Command::Create && !request.no_default_packages {
            for default in &config.create_default_packages {
                if packages.iter().any(|p| arg_name(p) == default.as_str()) {
                    debug!("Default package {} overridden on the command line", default);
                    continue;
                }
                specs.push(MatchSpec::from_arg(default)?);
            }
        }
    }

    if !collected.local_records.is_empty() {
        // archives replace every other source of specs
        specs = archive_specs(&collected.local_records);
        collected.unknown = true;
    }

    if specs.is_empty() && request.command == Command::Install {
        return Err(Error::InvalidArgument(
            "too few arguments, must supply command line package specs or --file".to_string(),
        ));
    }

    collected.specs = dedup_specs(specs)?;
    Ok(collected)
}

/// `update` takes plain names of packages that are already linked
fn validate_update(env: &Environment, packages: &[String]) -> Result<()> {
    if packages.is_empty() {
        return Err(Error::InvalidArgument(
            "no package names supplied\n\
             # If you want to update every package in the environment, type:\n\
             #\n\
             # $ strata update --all"
                .to_string(),
        ));
    }

    let linked: BTreeSet<String> = env.linked()?.into_iter().map(|p| p.name).collect();
    for name in packages {
        MatchSpec::from_arg(name)?;
        if name.contains('=') {
            return Err(Error::InvalidArgument(format!(
                "Invalid package name: '{}'",
                name
            )));
        }
        if !linked.contains(name) {
            return Err(Error::InvalidArgument(format!(
                "package '{}' is not installed in {}",
                name,
                env.prefix().display()
            )));
        }
    }
    Ok(())
}

/// One spec per line; blank lines and `#` comments are skipped
pub fn specs_from_file(path: &Path) -> Result<Vec<MatchSpec>> {
    let content = fs::read_to_string(path).map_err(|e| {
        Error::InvalidArgument(format!("could not read file {}: {}", path.display(), e))
    })?;

    let mut specs = Vec::new();
    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line == EXPLICIT_MARKER {
            return Err(Error::InvalidArgument(format!(
                "{}: explicit package lists are not supported",
                path.display()
            )));
        }
        specs.push(MatchSpec::from_arg(line)?);
    }
    Ok(specs)
}

/// Specs that reinstall everything linked, minus the skip-set
fn specs_from_linked(env: &Environment, skip: &BTreeSet<String>) -> Result<Vec<MatchSpec>> {
    let linked = env.linked()?;
    if linked.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "There are no packages installed in the prefix {}",
            env.prefix().display()
        )));
    }

    let mut specs = Vec::new();
    for pkg in linked {
        if pkg.name == ALWAYS_SKIPPED || skip.contains(&pkg.name) {
            debug!("Skipping {}", pkg.name);
            continue;
        }
        if pkg.name == "python" && pkg.version.starts_with('2') {
            // stay on the 2.x line
            specs.push(format!("python >={},<3", pkg.version).parse()?);
        } else {
            specs.push(MatchSpec::name_only(&pkg.name));
        }
    }
    Ok(specs)
}

fn read_archives<'a>(paths: impl Iterator<Item = &'a Path>) -> Result<Vec<PackageRecord>> {
    paths
        .map(|path| {
            if !path.is_file() {
                return Err(Error::InvalidArgument(format!(
                    "File does not exist: {}",
                    path.display()
                )));
            }
            archive::read_index_json(path)
        })
        .collect()
}

/// An exact spec for every archive, plus the dependencies the archives do
/// not satisfy among themselves
fn archive_specs(records: &[PackageRecord]) -> Vec<MatchSpec> {
    let provided: BTreeSet<&str> = records.iter().map(|r| r.name.as_str()).collect();
    let mut specs: Vec<MatchSpec> = Vec::new();
    for record in records {
        specs.push(MatchSpec {
            name: record.name.clone(),
            version: Some(record.version.clone()),
            build: Some(record.build.clone()),
        });
    }
    for record in records {
        for dep in record.dependency_specs() {
            if !provided.contains(dep.name.as_str()) && !specs.contains(&dep) {
                specs.push(dep);
            }
        }
    }
    specs
}

/// Reduce to one spec per name
///
/// Identical duplicates collapse and a bare name gives way to a constrained
/// spec for the same name. Two different constraints are an error.
pub fn dedup_specs(specs: Vec<MatchSpec>) -> Result<Vec<MatchSpec>> {
    let mut out: Vec<MatchSpec> = Vec::with_capacity(specs.len());
    let mut position: HashMap<String, usize> = HashMap::new();

    for spec in specs {
        let Some(&i) = position.get(&spec.name) else {
            position.insert(spec.name.clone(), out.len());
            out.push(spec);
            continue;
        };
        let existing = &out[i];
        if *existing == spec || spec.strictness() == 1 {
            continue;
        }
        if existing.strictness() == 1 {
            out[i] = spec;
            continue;
        }
        return Err(Error::InvalidArgument(format!(
            "conflicting specifications for {}: '{}' and '{}'",
            spec.name, existing, spec
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::test_support::{write_archive, write_bundle};
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

    fn request(command: Command, packages: &[&str]) -> InstallRequest {
        InstallRequest {
            command,
            packages: packages.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }

    fn names(collected: &Collected) -> Vec<String> {
        collected.specs.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_create_defaults_yield_to_explicit_args() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::with_root(temp_dir.path());
        config.create_default_packages = vec!["bar".to_string(), "pip".to_string()];
        let env = Environment::new(temp_dir.path().join("envs/new"));

        let collected = collect_specs(
            &config,
            &env,
            &request(Command::Create, &["bar=2.0"]),
            &BTreeSet::new(),
        )
        .unwrap();
        assert_eq!(names(&collected), vec!["bar 2.0*", "pip"]);

        let mut no_defaults = request(Command::Create, &["bar=2.0"]);
        no_defaults.no_default_packages = true;
        let collected = collect_specs(&config, &env, &no_defaults, &BTreeSet::new()).unwrap();
        assert_eq!(names(&collected), vec!["bar 2.0*"]);
    }

    #[test]
    fn test_all_skips_and_pins_python2() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = Config::with_root(temp_dir.path());
        let env = Environment::new(temp_dir.path());
        link(&env, "python", "2.7.9");
        link(&env, "anaconda", "2.1.0");
        link(&env, "numpy", "1.9.1");
        link(&env, "gone", "0.1");

        let mut req = request(Command::Update, &[]);
        req.all = true;
        let skip: BTreeSet<String> = ["gone".to_string()].into_iter().collect();

        let collected = collect_specs(&config, &env, &req, &skip).unwrap();
        assert_eq!(names(&collected), vec!["numpy", "python >=2.7.9,<3"]);
    }

    #[test]
    fn test_all_requires_linked_packages_and_no_args() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = Config::with_root(temp_dir.path());
        let env = Environment::new(temp_dir.path());

        let mut req = request(Command::Update, &[]);
        req.all = true;
        let empty = collect_specs(&config, &env, &req, &BTreeSet::new());
        assert!(matches!(empty, Err(Error::InvalidArgument(_))));

        req.packages = vec!["foo".to_string()];
        let mixed = collect_specs(&config, &env, &req, &BTreeSet::new());
        assert!(matches!(mixed, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_update_validation() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = Config::with_root(temp_dir.path());
        let env = Environment::new(temp_dir.path());
        link(&env, "foo", "1.0");

        for bad in [&[][..], &["foo=1.0"][..], &["bar"][..]] {
            let result = collect_specs(&config, &env, &request(Command::Update, bad), &BTreeSet::new());
            assert!(matches!(result, Err(Error::InvalidArgument(_))), "{:?}", bad);
        }
        assert!(collect_specs(&config, &env, &request(Command::Update, &["foo"]), &BTreeSet::new()).is_ok());
    }

    #[test]
    fn test_requirements_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("requirements.txt");
        fs::write(&path, "# deps\nnumpy=1.9\n\nscipy 0.14*\n").unwrap();
        let specs = specs_from_file(&path).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].to_string(), "numpy 1.9*");

        fs::write(&path, "@EXPLICIT\nhttp://example.com/foo-1.0-0.tar.bz2\n").unwrap();
        assert!(matches!(specs_from_file(&path), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_archives_replace_specs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = Config::with_root(temp_dir.path());
        let env = Environment::new(temp_dir.path().join("env"));

        let mut foo = PackageRecord::new("foo", "1.0", "0", 0);
        foo.depends = vec!["bar >=1".to_string(), "python".to_string()];
        let mut bar = PackageRecord::new("bar", "1.2", "0", 0);
        bar.depends = vec!["python".to_string()];
        let foo_path = write_archive(temp_dir.path(), &foo, &[]);
        let bar_path = write_archive(temp_dir.path(), &bar, &[]);

        let args = [foo_path.to_str().unwrap(), bar_path.to_str().unwrap()];
        let collected =
            collect_specs(&config, &env, &request(Command::Install, &args), &BTreeSet::new()).unwrap();
        assert_eq!(names(&collected), vec!["foo 1.0 0", "bar 1.2 0", "python"]);
        assert_eq!(collected.local_records.len(), 2);
        assert!(collected.unknown);

        let mixed = [foo_path.to_str().unwrap(), "numpy"];
        let result = collect_specs(&config, &env, &request(Command::Install, &mixed), &BTreeSet::new());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_bundle_stages_its_archives() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = Config::with_root(temp_dir.path());
        let env = Environment::new(temp_dir.path().join("env"));

        let built = temp_dir.path().join("built");
        fs::create_dir_all(&built).unwrap();
        let mut foo = PackageRecord::new("foo", "1.0", "0", 0);
        foo.depends = vec!["bar".to_string(), "zlib 1.2*".to_string()];
        let bar = PackageRecord::new("bar", "2.0", "1", 1);
        let archives = vec![
            write_archive(&built, &foo, &[("bin/foo", "foo")]),
            write_archive(&built, &bar, &[]),
        ];
        let bundle = temp_dir.path().join("release.tar");
        write_bundle(&bundle, &archives);

        let collected = collect_specs(
            &config,
            &env,
            &request(Command::Install, &[bundle.to_str().unwrap()]),
            &BTreeSet::new(),
        )
        .unwrap();

        // archives come back sorted by path, so bar before foo
        assert_eq!(names(&collected), vec!["bar 2.0 1", "foo 1.0 0", "zlib 1.2*"]);
        assert!(collected.unknown);

        let staged = collected.bundle_dir.as_ref().unwrap().path().to_path_buf();
        assert_eq!(collected.local_records.len(), 2);
        for record in &collected.local_records {
            let source = record.source.as_ref().unwrap();
            assert!(source.starts_with(&staged));
            assert!(source.is_file());
        }

        drop(collected);
        assert!(!staged.exists());
    }

    #[test]
    fn test_empty_bundle_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = Config::with_root(temp_dir.path());
        let env = Environment::new(temp_dir.path().join("env"));
        let bundle = temp_dir.path().join("empty.tar");
        write_bundle(&bundle, &[]);

        let result = collect_specs(
            &config,
            &env,
            &request(Command::Install, &[bundle.to_str().unwrap()]),
            &BTreeSet::new(),
        );
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_dedup_specs() {
        let parse = |s: &str| MatchSpec::from_arg(s).unwrap();

        let merged = dedup_specs(vec![parse("foo"), parse("bar"), parse("foo=1.0"), parse("foo")]).unwrap();
        assert_eq!(merged, vec![parse("foo=1.0"), parse("bar")]);

        let conflict = dedup_specs(vec![parse("foo=1.0"), parse("foo=2.0")]);
        assert!(matches!(conflict, Err(Error::InvalidArgument(_))));
    }
}
