//! Small filesystem and path helpers shared across the build.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};

/// A blake3 content hash, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        Fingerprint(blake3::hash(bytes).to_hex().to_string())
    }

    pub fn of_file(path: &Path) -> io::Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(Self::of(&bytes))
    }

    /// Fingerprint of several parts, each length-prefixed so that part
    /// boundaries cannot shift without changing the hash.
    pub fn of_parts<'a>(parts: impl IntoIterator<Item = &'a str>) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        Fingerprint(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalizes a path to use forward slashes.
pub fn normalize_separators(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Lexically resolves `.` and `..` components without touching the
/// filesystem. Returns `None` when `..` would climb above the first
/// component of a relative path.
pub fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut result = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                result.pop();
                depth -= 1;
            }
            Component::Normal(part) => {
                result.push(part);
                depth += 1;
            }
            Component::RootDir | Component::Prefix(_) => {
                result.push(component.as_os_str());
            }
        }
    }
    Some(result)
}

/// The document name of a source path: relative, extension-less,
/// forward-slash separated (`guides/setup.rst` -> `guides/setup`).
pub fn docname_for(relative_path: &Path) -> String {
    normalize_separators(&relative_path.with_extension(""))
}

/// Directory part of a docname (`guides/setup` -> `guides`, `index` -> ``).
pub fn docname_dir(docname: &str) -> &str {
    match docname.rfind('/') {
        Some(pos) => &docname[..pos],
        None => "",
    }
}

/// Resolves a document reference written inside `current` to a docname.
/// Absolute targets (leading `/`) are relative to the source root.
pub fn resolve_docname(current: &str, target: &str) -> Option<String> {
    let target = target.trim().trim_end_matches(".rst");
    let joined = if let Some(absolute) = target.strip_prefix('/') {
        PathBuf::from(absolute)
    } else {
        Path::new(docname_dir(current)).join(target)
    };
    normalize_lexically(&joined).map(|p| normalize_separators(&p))
}

/// Relative URL from the page of `from_docname` to the page of `to_docname`.
pub fn relative_page_url(from_docname: &str, to_docname: &str) -> String {
    let target = PathBuf::from(format!("{}.html", to_docname));
    let base = Path::new(docname_dir(from_docname));
    let relative = pathdiff::diff_paths(&target, base).unwrap_or(target);
    normalize_separators(&relative)
}
