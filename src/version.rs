// src/version.rs

//! Package version ordering
//!
//! Versions in a channel are free-form (`1.0`, `2.7.10`, `1.9.0rc1`,
//! `2013b`). Anything that normalizes to a semantic version is compared with
//! `semver`; the rest falls back to a segment-wise comparison where numeric
//! runs compare numerically and alphabetic runs sort before numbers
//! (`1.0rc1 < 1.0`).

use semver::Version;
use std::cmp::Ordering;
use std::fmt;

/// A comparable package version
#[derive(Debug, Clone)]
pub struct PackageVersion {
    raw: String,
    semver: Option<Version>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Num(u64),
    Alpha(String),
}

impl PackageVersion {
    pub fn parse(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            semver: normalize_semver(raw),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn segments(&self) -> Vec<Vec<Segment>> {
        self.raw
            .to_lowercase()
            .split(['.', '_', '-'])
            .map(split_segment)
            .collect()
    }
}

/// Pad `1` / `1.2` to three components and try `semver`
fn normalize_semver(raw: &str) -> Option<Version> {
    if let Ok(v) = Version::parse(raw) {
        return Some(v);
    }
    let parts: Vec<&str> = raw.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    if !parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit())) {
        return None;
    }
    let mut padded: Vec<&str> = parts.clone();
    while padded.len() < 3 {
        padded.push("0");
    }
    Version::parse(&padded.join(".")).ok()
}

fn split_segment(part: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut numeric = None;

    for c in part.chars() {
        let is_digit = c.is_ascii_digit();
        if numeric.is_some_and(|n| n != is_digit) {
            out.push(make_segment(&current, numeric == Some(true)));
            current.clear();
        }
        numeric = Some(is_digit);
        current.push(c);
    }
    if !current.is_empty() {
        out.push(make_segment(&current, numeric == Some(true)));
    }
    out
}

fn make_segment(text: &str, numeric: bool) -> Segment {
    if numeric {
        Segment::Num(text.parse().unwrap_or(u64::MAX))
    } else {
        Segment::Alpha(text.to_string())
    }
}

fn compare_segment(a: &Segment, b: &Segment) -> Ordering {
    match (a, b) {
        (Segment::Num(x), Segment::Num(y)) => x.cmp(y),
        (Segment::Alpha(x), Segment::Alpha(y)) => x.cmp(y),
        // pre-release tags sort below numbers
        (Segment::Alpha(_), Segment::Num(_)) => Ordering::Less,
        (Segment::Num(_), Segment::Alpha(_)) => Ordering::Greater,
    }
}

fn compare_parts(a: &[Segment], b: &[Segment]) -> Ordering {
    for i in 0..a.len().max(b.len()) {
        let ord = match (a.get(i), b.get(i)) {
            (Some(x), Some(y)) => compare_segment(x, y),
            // "1.0rc1" vs "1.0": a trailing tag is a pre-release
            (Some(Segment::Alpha(_)), None) => Ordering::Less,
            (None, Some(Segment::Alpha(_))) => Ordering::Greater,
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        if let (Some(a), Some(b)) = (&self.semver, &other.semver) {
            return a.cmp(b);
        }

        let left = self.segments();
        let right = other.segments();
        for i in 0..left.len().max(right.len()) {
            let empty = Vec::new();
            let a = left.get(i).unwrap_or(&empty);
            let b = right.get(i).unwrap_or(&empty);
            let ord = match (a.is_empty(), b.is_empty()) {
                (true, true) => Ordering::Equal,
                // missing trailing components count as zero
                (true, false) => compare_parts(&[Segment::Num(0)], b),
                (false, true) => compare_parts(a, &[Segment::Num(0)]),
                (false, false) => compare_parts(a, b),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PackageVersion {}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> PackageVersion {
        PackageVersion::parse(s)
    }

    #[test]
    fn test_numeric_ordering() {
        assert!(v("1.10") > v("1.9"));
        assert!(v("2.7.10") > v("2.7.9"));
        assert!(v("3") > v("2.7.10"));
    }

    #[test]
    fn test_padded_versions_are_equal() {
        assert_eq!(v("1.0"), v("1.0.0"));
        assert_eq!(v("1"), v("1.0"));
    }

    #[test]
    fn test_prerelease_sorts_first() {
        assert!(v("1.0rc1") < v("1.0"));
        assert!(v("1.9.0rc1") < v("1.9.0"));
        assert!(v("1.0a") < v("1.0b"));
    }

    #[test]
    fn test_four_component_versions() {
        assert!(v("1.2.3.4") > v("1.2.3"));
        assert!(v("1.2.3.4") < v("1.2.4"));
    }
}
