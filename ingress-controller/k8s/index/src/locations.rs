use ahash::AHashSet as HashSet;
use mci_ingress_controller_core::{Location, ROOT_LOCATION};
use mci_ingress_controller_k8s_api::PathType;
use std::cmp::Ordering;

/// Expands prefix locations so that `/foo` matches `/foo` and `/foo/...` but
/// not `/foobar`: the prefix becomes `/foo/` and an exact `/foo` location is
/// added beside it.
///
/// Locations that rewrite to a different target, use regular expressions, or
/// whose expansion would collide with an existing location are left as is.
pub(crate) fn expand_prefixes(locations: Vec<Location>) -> Vec<Location> {
    let existing = locations
        .iter()
        .map(|l| (l.path.clone(), l.path_type))
        .collect::<HashSet<_>>();

    let mut out = Vec::with_capacity(locations.len());
    for mut loc in locations {
        if loc.path == ROOT_LOCATION {
            out.push(loc);
            continue;
        }
        loc.ingress_path = loc.path.clone();

        let rewrites = !loc.rewrite.target.is_empty() && loc.rewrite.target != loc.path;
        if loc.path_type != PathType::Prefix || rewrites || loc.rewrite.use_regex {
            out.push(loc);
            continue;
        }

        let normalized = normalize_prefix_path(&loc.path);
        if normalized != loc.path && existing.contains(&(normalized.clone(), PathType::Prefix)) {
            out.push(loc);
            continue;
        }

        if existing.contains(&(loc.path.clone(), PathType::Exact)) {
            loc.path = normalized;
            out.push(loc);
            continue;
        }

        let mut exact = loc.clone();
        exact.path_type = PathType::Exact;
        loc.path = normalized;
        out.push(loc);
        out.push(exact);
    }
    out
}

/// Appends a trailing slash to a prefix path.
pub(crate) fn normalize_prefix_path(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// Orders locations by path length, longest first, then by path in
/// descending order. Otherwise equal locations keep their relative order.
pub(crate) fn sort(locations: &mut [Location]) {
    locations.sort_by(|a, b| match b.path.len().cmp(&a.path.len()) {
        Ordering::Equal => b.path.cmp(&a.path),
        ord => ord,
    });
}
