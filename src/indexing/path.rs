//! Path identity for indexed files.
//!
//! Every component that names a file (directory walker, watcher, CLI
//! arguments, manifest, vector store) goes through [`PathNormalizer`] so the
//! same file always yields the same key: relative to the workspace root,
//! `/`-separated, with `.` and `..` resolved lexically.
//!
//! Normalization is purely textual. It never touches the filesystem, so it
//! works for files that were deleted since they were indexed.

use std::path::{Path, PathBuf};

/// Maps arbitrary paths onto root-relative keys.
#[derive(Debug, Clone)]
pub struct PathNormalizer {
    /// Absolute root, `/`-separated, no trailing slash (except a bare `/`).
    root: String,
    root_path: PathBuf,
}

impl PathNormalizer {
    /// Create a normalizer for `root`. A relative root is resolved against
    /// the current directory.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let absolute = if is_absolute(&to_slashes(root)) {
            root.to_path_buf()
        } else {
            std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf())
        };
        let root = clean(&to_slashes(&absolute));
        Self {
            root_path: PathBuf::from(&root),
            root,
        }
    }

    /// Workspace root as given (absolute).
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root_path
    }

    /// Normalize `path` to its root-relative key.
    ///
    /// Relative paths are taken relative to the root. Paths outside the
    /// root keep their absolute, `/`-separated form. The root itself
    /// normalizes to `"."`.
    #[must_use]
    pub fn normalize(&self, path: impl AsRef<Path>) -> String {
        let raw = to_slashes(path.as_ref());
        let joined = if is_absolute(&raw) {
            raw
        } else if self.root == "/" {
            format!("/{raw}")
        } else {
            format!("{}/{raw}", self.root)
        };
        let cleaned = clean(&joined);

        if same_path(&cleaned, &self.root) {
            return ".".to_string();
        }
        let prefix_len = if self.root.ends_with('/') {
            self.root.len()
        } else {
            self.root.len() + 1
        };
        if cleaned.len() > prefix_len
            && cleaned
                .get(..self.root.len())
                .is_some_and(|head| same_path(head, &self.root))
            && cleaned.as_bytes()[prefix_len - 1] == b'/'
        {
            return cleaned[prefix_len..].to_string();
        }
        cleaned
    }

    /// Filesystem path for a normalized key.
    #[must_use]
    pub fn resolve(&self, normalized: &str) -> PathBuf {
        if is_absolute(normalized) {
            PathBuf::from(normalized)
        } else if normalized == "." {
            self.root_path.clone()
        } else {
            self.root_path.join(normalized)
        }
    }
}

fn to_slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// `/x`, `C:/x` or a bare `C:`.
fn is_absolute(path: &str) -> bool {
    path.starts_with('/') || drive_prefix(path).is_some()
}

fn drive_prefix(path: &str) -> Option<&str> {
    let bytes = path.as_bytes();
    let is_drive = bytes.len() >= 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes.len() == 2 || bytes[2] == b'/');
    is_drive.then(|| &path[..2])
}

/// Drive letters compare case-insensitively, everything else exactly.
fn same_path(a: &str, b: &str) -> bool {
    match (drive_prefix(a), drive_prefix(b)) {
        (Some(da), Some(db)) => da.eq_ignore_ascii_case(db) && a[2..] == b[2..],
        _ => a == b,
    }
}

/// Lexically resolve `.`, `..` and repeated separators.
///
/// `..` never climbs above the prefix of an absolute path; for a relative
/// path, leading `..` segments are kept.
fn clean(path: &str) -> String {
    let (prefix, rest) = match drive_prefix(path) {
        Some(drive) => (format!("{}/", drive.to_ascii_uppercase()), &path[2..]),
        None if path.starts_with('/') => ("/".to_string(), path),
        None => (String::new(), path),
    };
    let absolute = !prefix.is_empty();

    let mut parts: Vec<&str> = Vec::new();
    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    let body = parts.join("/");
    if body.is_empty() && !absolute {
        ".".to_string()
    } else {
        format!("{prefix}{body}")
    }
}
