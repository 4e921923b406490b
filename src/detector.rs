use crate::models::Ecosystem;

/// Map a manifest path to its ecosystem by filename suffix.
pub fn detect_ecosystem(path: &str) -> Option<Ecosystem> {
    Ecosystem::ALL
        .into_iter()
        .find(|e| path.ends_with(e.manifest_name()))
}

/// Infer the ecosystem of a sealed batch from its object key.
///
/// Keys look like `<prefix>/<ecosystem>/<index>_<ecosystem>.zip`; the first
/// segment after the prefix names the ecosystem.
pub fn detect_batch_ecosystem(prefix: &str, key: &str) -> Option<Ecosystem> {
    let rest = key.strip_prefix(prefix)?.trim_start_matches('/');
    let segment = rest.split('/').next()?;
    Ecosystem::from_name(segment)
}
