// src/orchestrator/skip.rs

use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::index::Index;
use crate::spec::MatchSpec;
use tracing::debug;

/// Drop the names whose linked version and build number already equal the
/// newest candidate in the index
///
/// A name without any candidate is kept so the resolver can report it.
pub fn skip_up_to_date(env: &Environment, index: &Index, names: &[String]) -> Result<Vec<String>> {
    let linked = env.linked()?;
    let mut remaining = Vec::with_capacity(names.len());

    for name in names {
        let installed: Vec<_> = linked.iter().filter(|pkg| &pkg.name == name).collect();
        let [pkg] = installed.as_slice() else {
            return Err(Error::Internal(format!(
                "expected exactly one linked instance of {} in {}, found {}",
                name,
                env.prefix().display(),
                installed.len()
            )));
        };

        match index.best(&MatchSpec::name_only(name)) {
            Some(best) if best.version == pkg.version && best.build_number == pkg.build_number => {
                debug!("{} {} is already the newest", name, pkg.version);
            }
            _ => remaining.push(name.clone()),
        }
    }
    Ok(remaining)
}
