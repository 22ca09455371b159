//! Lexical path handling for plaintext paths.
//!
//! Plaintext paths arrive from clients in arbitrary shapes (`/a//b/./../b`).
//! The resolver and the facade operate on cleaned paths only, so equal paths
//! always hit the same cache keys.

/// Lexically normalize `path`: collapse repeated separators, drop `.`
/// elements, resolve `..` against preceding elements (never above the root
/// of a rooted path), and strip trailing slashes. An empty relative result
/// becomes `.`; a rooted path stays rooted.
pub fn clean(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut out: Vec<&str> = Vec::new();

    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                if out.last().is_some_and(|c| *c != "..") {
                    out.pop();
                } else if !rooted {
                    out.push("..");
                }
            }
            c => out.push(c),
        }
    }

    let joined = out.join("/");
    if rooted {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_owned()
    } else {
        joined
    }
}

/// Parent directory of the cleaned `path`; `/` is its own parent.
pub fn parent(path: &str) -> String {
    let cleaned = clean(path);
    match cleaned.rfind('/') {
        Some(0) => "/".to_owned(),
        Some(i) => cleaned[..i].to_owned(),
        None => ".".to_owned(),
    }
}

/// Final element of the cleaned `path`; `/` for the root itself.
pub fn base_name(path: &str) -> String {
    let cleaned = clean(path);
    if cleaned == "/" {
        return cleaned;
    }
    match cleaned.rfind('/') {
        Some(i) => cleaned[i + 1..].to_owned(),
        None => cleaned,
    }
}

/// Join `name` onto `dir` and clean the result.
pub fn join(dir: &str, name: &str) -> String {
    clean(&format!("{dir}/{name}"))
}
