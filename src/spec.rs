// src/spec.rs

//! Package specifications
//!
//! A `MatchSpec` names a package and optionally constrains its version and
//! build string. Two textual forms are accepted:
//!
//! - space separated: `numpy`, `numpy 1.9*`, `python >=2.7,<3`, `foo 1.0 py27_0`
//! - command-line form: `numpy=1.9`, `foo=1.0=py27_0`

use crate::error::{Error, Result};
use crate::index::PackageRecord;
use crate::version::PackageVersion;
use std::fmt;
use std::str::FromStr;

/// A requested package: name plus optional version/build constraints
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchSpec {
    pub name: String,
    pub version: Option<String>,
    pub build: Option<String>,
}

impl MatchSpec {
    /// An unconstrained spec for `name`
    pub fn name_only(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: None,
            build: None,
        }
    }

    /// Parse a spec given on the command line, accepting the `name=ver[=build]` form
    pub fn from_arg(arg: &str) -> Result<Self> {
        let arg = arg.trim();
        if arg.contains(' ') || !arg.contains('=') || is_relational(arg) {
            return arg.parse();
        }

        let parts: Vec<&str> = arg.split('=').collect();
        match parts.as_slice() {
            [name, version] if !version.is_empty() => {
                let version = if version.ends_with('*') {
                    version.to_string()
                } else {
                    format!("{}*", version)
                };
                Self::validated(name, Some(version), None)
            }
            [name, version, build] if !version.is_empty() && !build.is_empty() => {
                Self::validated(name, Some(version.to_string()), Some(build.to_string()))
            }
            _ => Err(Error::InvalidArgument(format!(
                "invalid package specification: {}",
                arg
            ))),
        }
    }

    fn validated(name: &str, version: Option<String>, build: Option<String>) -> Result<Self> {
        validate_name(name)?;
        if let Some(version) = &version {
            VersionSpec::parse(version)?;
        }
        Ok(Self {
            name: name.to_string(),
            version,
            build,
        })
    }

    /// Number of constrained fields, 1 (name only) to 3 (fully explicit)
    pub fn strictness(&self) -> usize {
        1 + usize::from(self.version.is_some()) + usize::from(self.build.is_some())
    }

    /// Check a version/build pair against this spec
    pub fn matches_version(&self, version: &str, build: &str) -> bool {
        if let Some(pattern) = &self.version {
            match VersionSpec::parse(pattern) {
                Ok(spec) if spec.matches(version) => {}
                _ => return false,
            }
        }
        match &self.build {
            Some(b) => b == build,
            None => true,
        }
    }

    /// Check an index record against this spec
    pub fn matches(&self, record: &PackageRecord) -> bool {
        record.name == self.name && self.matches_version(&record.version, &record.build)
    }
}

impl FromStr for MatchSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split_whitespace();
        let name = parts
            .next()
            .ok_or_else(|| Error::InvalidArgument("empty package specification".to_string()))?;
        let version = parts.next().map(str::to_string);
        let build = parts.next().map(str::to_string);
        if parts.next().is_some() {
            return Err(Error::InvalidArgument(format!(
                "invalid package specification: {}",
                s
            )));
        }
        Self::validated(name, version, build)
    }
}

impl fmt::Display for MatchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(version) = &self.version {
            write!(f, " {}", version)?;
        }
        if let Some(build) = &self.build {
            write!(f, " {}", build)?;
        }
        Ok(())
    }
}

fn is_relational(arg: &str) -> bool {
    arg.contains(['<', '>', '!', ',', '|']) || arg.contains("==")
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "invalid package name: '{}'",
            name
        )))
    }
}

/// The part of a command-line argument before any version separator
pub fn arg_name(arg: &str) -> &str {
    arg.split(['=', ' ']).next().unwrap_or(arg)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Clause {
    Exact(String),
    Glob(String),
    Compare(Op, String),
}

/// Parsed version constraint: alternatives (`|`) of conjunctions (`,`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSpec {
    alternatives: Vec<Vec<Clause>>,
}

impl VersionSpec {
    pub fn parse(text: &str) -> Result<Self> {
        let mut alternatives = Vec::new();
        for alt in text.split('|') {
            let mut clauses = Vec::new();
            for raw in alt.split(',') {
                clauses.push(parse_clause(raw.trim(), text)?);
            }
            alternatives.push(clauses);
        }
        Ok(Self { alternatives })
    }

    pub fn matches(&self, version: &str) -> bool {
        self.alternatives
            .iter()
            .any(|clauses| clauses.iter().all(|c| clause_matches(c, version)))
    }
}

fn parse_clause(raw: &str, whole: &str) -> Result<Clause> {
    let invalid = || Error::InvalidArgument(format!("invalid version specification: '{}'", whole));
    if raw.is_empty() {
        return Err(invalid());
    }

    const OPS: [(&str, Op); 6] = [
        ("==", Op::Eq),
        ("!=", Op::Ne),
        ("<=", Op::Le),
        (">=", Op::Ge),
        ("<", Op::Lt),
        (">", Op::Gt),
    ];
    for (token, op) in OPS {
        if let Some(rest) = raw.strip_prefix(token) {
            let rest = rest.trim();
            if rest.is_empty() || rest.contains('*') {
                return Err(invalid());
            }
            return Ok(Clause::Compare(op, rest.to_string()));
        }
    }

    if let Some(prefix) = raw.strip_suffix('*') {
        if prefix.contains('*') {
            return Err(invalid());
        }
        return Ok(Clause::Glob(prefix.to_string()));
    }
    if raw.contains('*') {
        return Err(invalid());
    }
    Ok(Clause::Exact(raw.to_string()))
}

fn clause_matches(clause: &Clause, version: &str) -> bool {
    match clause {
        Clause::Exact(v) => v == version,
        Clause::Glob(prefix) => version.starts_with(prefix.as_str()),
        Clause::Compare(op, bound) => {
            let ord = PackageVersion::parse(version).cmp(&PackageVersion::parse(bound));
            match op {
                Op::Eq => ord.is_eq(),
                Op::Ne => !ord.is_eq(),
                Op::Lt => ord.is_lt(),
                Op::Le => ord.is_le(),
                Op::Gt => ord.is_gt(),
                Op::Ge => ord.is_ge(),
            }
        }
    }
}
