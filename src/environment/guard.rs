// src/environment/guard.rs

//! Prefix checks run before anything is planned

use crate::config::Config;
use crate::error::{Error, Result};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Validate the prefix of an environment about to be created
pub fn check_new_prefix(config: &Config, prefix: &Path) -> Result<()> {
    let name = prefix
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    if prefix.exists() {
        return Err(Error::EnvironmentAlreadyExists(format!(
            "prefix already exists: {}",
            prefix.display()
        )));
    }
    if name.starts_with('.') {
        return Err(Error::EnvironmentAlreadyExists(format!(
            "environment name cannot start with '.': {}",
            name
        )));
    }
    if name == config.root_env_name {
        return Err(Error::EnvironmentAlreadyExists(format!(
            "'{}' is a reserved environment name",
            name
        )));
    }
    Ok(())
}

/// Require an existing prefix for install/update, optionally creating it
pub fn ensure_existing_prefix(prefix: &Path, mkdir: bool) -> Result<()> {
    if prefix.is_dir() {
        return Ok(());
    }
    if !mkdir {
        return Err(Error::EnvironmentNotFound(format!(
            "environment does not exist: {}\n\
             #\n\
             # Use 'strata create' to create an environment before installing packages\n\
             # into it.\n\
             #",
            prefix.display()
        )));
    }
    debug!("Creating missing prefix {}", prefix.display());
    fs::create_dir_all(prefix).map_err(|e| {
        Error::os(format!("could not create directory: {}", prefix.display()), e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_new_prefix() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = Config::with_root(temp_dir.path());

        let existing = check_new_prefix(&config, temp_dir.path());
        assert!(matches!(existing, Err(Error::EnvironmentAlreadyExists(_))));

        let hidden = check_new_prefix(&config, &temp_dir.path().join(".hidden"));
        assert!(matches!(hidden, Err(Error::EnvironmentAlreadyExists(_))));

        let reserved = check_new_prefix(&config, &temp_dir.path().join("envs/root"));
        assert!(matches!(reserved, Err(Error::EnvironmentAlreadyExists(_))));

        assert!(check_new_prefix(&config, &temp_dir.path().join("envs/fresh")).is_ok());
    }

    #[test]
    fn test_ensure_existing_prefix() {
        let temp_dir = tempfile::tempdir().unwrap();
        let missing = temp_dir.path().join("missing");

        let result = ensure_existing_prefix(&missing, false);
        assert!(matches!(result, Err(Error::EnvironmentNotFound(_))));
        assert!(!missing.exists());

        ensure_existing_prefix(&missing, true).unwrap();
        assert!(missing.is_dir());
    }
}
