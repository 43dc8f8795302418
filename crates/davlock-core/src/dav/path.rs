//! Resource path helpers
//!
//! Lock forests are keyed by canonical paths: absolute, `/`-separated, no
//! empty or dot segments and no trailing slash except for the root itself.

/// The root of every lock forest
pub const ROOT: &str = "/";

/// Return the canonical form of `path`, resolving `.` and `..` segments.
///
/// Backslashes are treated as separators and repeated separators collapse.
/// Returns `None` for an empty path or one that climbs above the root.
pub fn normalize(path: &str) -> Option<String> {
    if path.is_empty() {
        return None;
    }

    let unified = path.replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }

    let mut normalized = String::with_capacity(unified.len());
    for segment in &segments {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    Some(normalized)
}

/// Whether `path` is already in canonical form
pub fn is_canonical(path: &str) -> bool {
    if path == ROOT {
        return true;
    }
    path.starts_with('/')
        && !path.ends_with('/')
        && path[1..]
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}

/// Parent of a canonical path (`/a/b` -> `/a`, `/a` -> `/`, `/` -> None)
pub fn parent_path(path: &str) -> Option<&str> {
    match path.rfind('/') {
        None => None,
        Some(0) if path.len() == 1 => None,
        Some(0) => Some(ROOT),
        Some(index) => Some(&path[..index]),
    }
}

/// Number of segments between `ancestor` and `path`, if `ancestor` contains `path`
pub fn distance(ancestor: &str, path: &str) -> Option<usize> {
    if ancestor == path {
        return Some(0);
    }
    let rest = if ancestor == ROOT {
        path.strip_prefix('/')?
    } else {
        path.strip_prefix(ancestor)?.strip_prefix('/')?
    };
    if rest.is_empty() {
        return None;
    }
    Some(rest.split('/').count())
}

/// Remove one trailing slash, keeping the root intact
pub fn clean_path(path: &str) -> &str {
    if path.len() > 1 && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

/// Strip the servlet-style context prefix from a request path
pub fn strip_context_path<'a>(path: &'a str, context_path: &str) -> &'a str {
    if context_path.is_empty() || context_path == ROOT {
        return path;
    }
    match path.strip_prefix(context_path) {
        Some("") => ROOT,
        Some(rest) if rest.starts_with('/') => rest,
        _ => path,
    }
}
