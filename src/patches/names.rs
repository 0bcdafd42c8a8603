use std::hash::Hasher;

use metrohash::MetroHash64;

pub const DEFAULT_NODE_NAME: &str = "NewPatch";

/// Node ids become directory names, so only a small charset is accepted.
pub fn is_valid_node_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// File paths are `/`-separated and relative; `.` and `..` segments are refused.
pub fn is_valid_path(path: &str) -> bool {
    !path.is_empty()
        && path.split('/').all(|segment| {
            !segment.is_empty()
                && segment != "."
                && segment != ".."
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || "-_.~".contains(c))
        })
}

/// Paths that may be looked up. Looser than [`is_valid_path`] so base files with any name stay
/// readable, but nothing may step outside the snapshot.
pub fn is_readable_path(path: &str) -> bool {
    !path.is_empty()
        && path.split('/').all(|segment| {
            !segment.is_empty()
                && segment != "."
                && segment != ".."
                && !segment.contains(['\\', '\0'])
        })
}

/// Candidate ids for a new node: `base`, `base_1`, `base_2`, ...
pub fn id_candidates(base: &str) -> impl Iterator<Item = String> + '_ {
    (0u32..).map(move |n| match n {
        0 => base.to_string(),
        n => format!("{base}_{n}"),
    })
}

/// Name of the blob holding a changed path inside a node directory. The hash suffix keeps
/// `a/b` and `a_b` apart.
pub fn storage_name(path: &str) -> String {
    let mut hasher = MetroHash64::default();
    hasher.write(path.as_bytes());
    format!("{}.{:08x}", path.replace('/', "_"), hasher.finish() as u32)
}

/// Normalizes a directory argument to a prefix ending in `/`, or the empty prefix.
pub fn dir_prefix(dir: &str) -> String {
    match dir.trim_matches('/') {
        "" => String::new(),
        trimmed => format!("{trimmed}/"),
    }
}
