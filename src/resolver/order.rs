// src/resolver/order.rs

use crate::index::PackageRecord;
use std::collections::{BTreeMap, BTreeSet};

/// Order selected packages so that every package comes after its
/// dependencies. Members of a dependency cycle are appended by name.
pub fn graph_sort(selected: &BTreeMap<String, PackageRecord>) -> Vec<String> {
    let mut reverse: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();

    for (name, record) in selected {
        let deps: BTreeSet<String> = record
            .dependency_specs()
            .into_iter()
            .map(|spec| spec.name)
            .filter(|dep| dep != name && selected.contains_key(dep))
            .collect();
        in_degree.insert(name.as_str(), deps.len());
        for dep in deps {
            if let Some((key, _)) = selected.get_key_value(&dep) {
                reverse.entry(key.as_str()).or_default().insert(name.as_str());
            }
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter_map(|(name, degree)| (*degree == 0).then_some(*name))
        .collect();
    let mut ordered: Vec<String> = Vec::with_capacity(selected.len());

    while let Some(next) = ready.pop_first() {
        ordered.push(next.to_string());
        if let Some(children) = reverse.get(next) {
            for child in children {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        ready.insert(*child);
                    }
                }
            }
        }
    }

    if ordered.len() != selected.len() {
        let done: BTreeSet<&str> = ordered.iter().map(String::as_str).collect();
        let cycle: Vec<String> = selected
            .keys()
            .filter(|name| !done.contains(name.as_str()))
            .cloned()
            .collect();
        tracing::warn!("Dependency cycle between: {}", cycle.join(", "));
        ordered.extend(cycle);
    }

    ordered
}
