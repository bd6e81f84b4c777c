//! Workspace path normalization and containment checks.
//!
//! Scope comparison works on string keys so that `D:\ws`, `D:/ws/` and `/d/ws` all compare
//! equal on every platform. Filesystem access goes through [`resolve_within`], which refuses
//! any target that normalizes outside the workspace root.

use std::path::{Component, Path, PathBuf};

use crate::error::{Result, RikkiError};

/// Canonical comparison key for an absolute location such as a workspace root.
///
/// Trims, unifies separators, maps POSIX drive emulation (`/d/...`) onto `d:/...`,
/// lowercases the drive letter, resolves `.`/`..` lexically and drops trailing slashes.
/// The whole key is case-folded on Windows.
pub fn scope_key(raw: &str) -> String {
    let unified = raw.trim().replace('\\', "/");
    let with_drive = posix_drive_to_windows(&unified).unwrap_or(unified);

    let (prefix, rest) = match split_drive(&with_drive) {
        Some((drive, rest)) => (format!("{}:", drive.to_ascii_lowercase()), rest.to_string()),
        None if with_drive.starts_with('/') => (String::new(), with_drive),
        None => {
            let cwd = std::env::current_dir()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            let joined = format!("{cwd}/{with_drive}");
            return scope_key(&joined);
        }
    };

    let segments = normalize_segments(&rest, true);
    let key = format!("{prefix}/{}", segments.join("/"));
    let key = if key.len() > 1 {
        key.trim_end_matches('/').to_string()
    } else {
        key
    };
    fold_case(key)
}

/// Comparison key for a path relative to a workspace root.
pub fn relative_key(raw: &str) -> String {
    let unified = raw.trim().replace('\\', "/");
    if unified.starts_with('/') || split_drive(&unified).is_some() {
        return scope_key(&unified);
    }
    fold_case(normalize_segments(&unified, false).join("/"))
}

/// Convert a user-supplied path into a native filesystem path.
pub fn to_fs_path(raw: &str) -> PathBuf {
    let trimmed = raw.trim();
    if cfg!(windows) {
        let unified = trimmed.replace('\\', "/");
        if let Some(converted) = posix_drive_to_windows(&unified) {
            return PathBuf::from(converted);
        }
        PathBuf::from(unified)
    } else {
        PathBuf::from(trimmed.replace('\\', "/"))
    }
}

/// Resolve `.` and `..` without touching the filesystem.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out.iter().map(|c| c.as_os_str()).collect()
}

/// Absolute, lexically normalized form of a workspace root.
pub fn root_path(root: &str) -> Result<PathBuf> {
    if root.trim().is_empty() {
        return Err(RikkiError::InvalidArgument(
            "workspaceRoot is required".to_string(),
        ));
    }
    let raw = to_fs_path(root);
    let absolute = if raw.is_absolute() {
        raw
    } else {
        std::env::current_dir()?.join(raw)
    };
    Ok(lexical_normalize(&absolute))
}

/// Resolve `path` against `root`, failing closed when the result leaves the root.
///
/// Absolute paths are accepted as-is when they lie inside the root.
pub fn resolve_within(root: &str, path: &str) -> Result<PathBuf> {
    if path.trim().is_empty() {
        return Err(RikkiError::InvalidArgument("path is required".to_string()));
    }
    let root_dir = root_path(root)?;
    let candidate = to_fs_path(path);
    let target = if candidate.is_absolute() {
        lexical_normalize(&candidate)
    } else {
        lexical_normalize(&root_dir.join(candidate))
    };

    if !is_strictly_inside(&root_dir, &target) {
        return Err(RikkiError::PathEscape {
            path: target.to_string_lossy().into_owned(),
            root: root_dir.to_string_lossy().into_owned(),
        });
    }
    Ok(target)
}

/// Slash-separated path of `target` relative to `root`.
///
/// Both paths must already be normalized and `target` must lie inside `root`.
pub fn relative_to(root: &Path, target: &Path) -> String {
    let depth = root.components().count();
    target
        .components()
        .skip(depth)
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_strictly_inside(root: &Path, target: &Path) -> bool {
    let root_key = scope_key(&root.to_string_lossy());
    let target_key = scope_key(&target.to_string_lossy());
    if root_key == "/" {
        return target_key.len() > 1;
    }
    target_key.len() > root_key.len()
        && target_key.starts_with(&root_key)
        && target_key.as_bytes()[root_key.len()] == b'/'
}

fn posix_drive_to_windows(unified: &str) -> Option<String> {
    let bytes = unified.as_bytes();
    if bytes.len() >= 2
        && bytes[0] == b'/'
        && bytes[1].is_ascii_alphabetic()
        && (bytes.len() == 2 || bytes[2] == b'/')
    {
        let drive = bytes[1] as char;
        let rest = &unified[2..];
        let rest = if rest.is_empty() { "/" } else { rest };
        return Some(format!("{drive}:{rest}"));
    }
    None
}

fn split_drive(unified: &str) -> Option<(char, &str)> {
    let bytes = unified.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        Some((bytes[0] as char, &unified[2..]))
    } else {
        None
    }
}

fn normalize_segments(path: &str, absolute: bool) -> Vec<&str> {
    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match out.last() {
                Some(&last) if last != ".." => {
                    out.pop();
                }
                _ if absolute => {}
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    out
}

fn fold_case(key: String) -> String {
    if cfg!(windows) {
        key.to_lowercase()
    } else {
        key
    }
}
