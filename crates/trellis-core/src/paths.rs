//! Path and id derivation.
//!
//! Pure functions that turn a source path and its type root into a stable
//! content id, and compute relative asset paths between output directories.
//! All inputs are normalised to forward slashes before any computation, so
//! Windows-style paths yield the same ids as their POSIX equivalents.

/// Normalise a path string to forward slashes.
///
/// Backslashes become `/`, empty and `.` segments are dropped and `..`
/// segments are folded into their parent where one exists. A leading `/` is
/// kept, a trailing one is not.
pub fn normalize(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let absolute = unified.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if absolute => {}
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    if absolute { format!("/{joined}") } else { joined }
}

/// Join two path fragments and normalise the result; empty fragments are
/// skipped so relative roots stay relative.
pub fn join(base: &str, rest: &str) -> String {
    match (base.is_empty(), rest.is_empty()) {
        (true, _) => normalize(rest),
        (false, true) => normalize(base),
        (false, false) => normalize(&format!("{base}/{rest}")),
    }
}

/// File name of a path (`pages/a.hbs` → `a.hbs`).
pub fn basename(path: &str) -> String {
    let normalized = normalize(path);
    normalized
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// File name without its last extension (`pages/a.hbs` → `a`).
pub fn file_stem(path: &str) -> String {
    let name = basename(path);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(dot) => name[..dot].to_string(),
    }
}

/// Last extension including the dot (`pages/a.hbs` → `.hbs`), or empty.
pub fn extension(path: &str) -> String {
    let name = basename(path);
    match name.rfind('.') {
        Some(0) | None => String::new(),
        Some(dot) => name[dot..].to_string(),
    }
}

/// Parent directory of a path, normalised (`pages/sub/a.hbs` → `pages/sub`).
pub fn dirname(path: &str) -> String {
    let normalized = normalize(path);
    match normalized.rfind('/') {
        Some(0) => "/".to_string(),
        Some(slash) => normalized[..slash].to_string(),
        None => String::new(),
    }
}

/// Sub-directory of `path` below `root`, or `None` when `path` is not
/// inside `root`. Both arguments are expected to be normalised.
fn relative_to<'a>(path: &'a str, root: &str) -> Option<&'a str> {
    if root.is_empty() {
        return Some(path);
    }
    if path == root {
        return Some("");
    }
    path.strip_prefix(root)
        .and_then(|rest| rest.strip_prefix('/'))
}

/// Build a deep id: the sub-directories of `src_path` below `type_root`,
/// followed by `filename`, joined with `/`.
///
/// A file directly under the root yields `filename` alone. A file outside
/// the root also yields `filename`.
pub fn build_id(src_path: &str, type_root: &str, filename: &str) -> String {
    let parent = dirname(src_path);
    let root = normalize(type_root);

    match relative_to(&parent, &root) {
        Some(sub) if !sub.is_empty() => format!("{sub}/{filename}"),
        _ => filename.to_string(),
    }
}

/// Same as [`build_id`], with every `/` replaced by `delimiter`.
pub fn clean_id(src_path: &str, type_root: &str, filename: &str, delimiter: &str) -> String {
    build_id(src_path, type_root, filename).replace('/', delimiter)
}

/// Derive the id for a source file according to its type's id settings.
pub fn derive_id(
    src_path: &str,
    type_root: &str,
    filename: &str,
    deep_ids: bool,
    delimiter: Option<&str>,
) -> String {
    match (deep_ids, delimiter) {
        (false, _) => filename.to_string(),
        (true, Some(delimiter)) => clean_id(src_path, type_root, filename, delimiter),
        (true, None) => build_id(src_path, type_root, filename),
    }
}

/// Relative path from `from_dir` to `assets_dir`.
///
/// Returns `./` when both point at the same directory; otherwise a relative
/// path that always ends with `/`, e.g. `../../` or `../assets/`.
pub fn assets_path(from_dir: &str, assets_dir: &str) -> String {
    let from = normalize(from_dir);
    let to = normalize(assets_dir);

    let from_segments: Vec<&str> = from.split('/').filter(|s| !s.is_empty()).collect();
    let to_segments: Vec<&str> = to.split('/').filter(|s| !s.is_empty()).collect();

    let common = from_segments
        .iter()
        .zip(&to_segments)
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = vec![".."; from_segments.len() - common];
    parts.extend(&to_segments[common..]);

    if parts.is_empty() {
        "./".to_string()
    } else {
        format!("{}/", parts.join("/"))
    }
}

/// Ensure a non-empty directory path ends with `/`.
pub fn with_trailing_slash(dir: &str) -> String {
    if dir.is_empty() || dir.ends_with('/') {
        dir.to_string()
    } else {
        format!("{dir}/")
    }
}
