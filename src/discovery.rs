//! Source file discovery.
//!
//! Content files end in `.rst`; partials end in `.rst.inc` and are only
//! pulled into other documents through the `include` directive, so they are
//! never built standalone.

use log::debug;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::config::BuildConfig;
use crate::error::BuildError;
use crate::matching::PathMatcher;
use crate::utils;

pub const CONTENT_SUFFIX: &str = ".rst";
pub const PARTIAL_SUFFIX: &str = ".rst.inc";

/// A discovered content file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Extension-less, forward-slash path relative to the content root.
    pub docname: String,
    /// Path relative to the content root.
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
}

/// Snapshot of the discovery settings. Cloning is cheap and every call to
/// [`SourceFinder::find`] walks the tree afresh.
#[derive(Debug, Clone)]
pub struct SourceFinder {
    root: PathBuf,
    scope: Option<String>,
    excluded: PathMatcher,
    skip_dirs: Vec<PathBuf>,
}

impl SourceFinder {
    pub fn new(
        root: PathBuf,
        scope: Option<String>,
        excluded_paths: &[String],
        skip_dirs: Vec<PathBuf>,
    ) -> Result<Self, BuildError> {
        let excluded = PathMatcher::new(excluded_paths)
            .map_err(|e| BuildError::config(format!("invalid excluded path pattern: {}", e)))?;
        Ok(Self {
            root,
            scope,
            excluded,
            skip_dirs,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// True if `docname` lies inside the configured subdirectory scope.
    pub fn in_scope(&self, docname: &str) -> bool {
        match &self.scope {
            Some(scope) => docname
                .strip_prefix(scope.as_str())
                .is_some_and(|rest| rest.starts_with('/')),
            None => true,
        }
    }

    /// Walks the tree and returns content files sorted by relative path.
    pub fn find(&self) -> Result<Vec<SourceFile>, BuildError> {
        let walk_root = match &self.scope {
            Some(scope) => self.root.join(scope),
            None => self.root.clone(),
        };
        if !walk_root.is_dir() {
            return Err(BuildError::config(format!(
                "directory to build \"{}\" does not exist",
                walk_root.display()
            )));
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(&walk_root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| self.should_descend(entry));

        for entry in walker {
            let entry = entry.map_err(|e| {
                BuildError::Io(std::io::Error::other(format!(
                    "failed to walk {}: {}",
                    walk_root.display(),
                    e
                )))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let relative_str = utils::normalize_separators(relative);
            if !is_content_file(&relative_str) {
                continue;
            }
            if self.excluded.matches(&relative_str) {
                debug!("Excluding {}", relative_str);
                continue;
            }
            files.push(SourceFile {
                docname: utils::docname_for(relative),
                relative_path: relative.to_path_buf(),
                absolute_path: path.to_path_buf(),
            });
        }

        files.sort_by(|a, b| {
            utils::normalize_separators(&a.relative_path)
                .cmp(&utils::normalize_separators(&b.relative_path))
        });
        debug!("Discovered {} content files under {}", files.len(), walk_root.display());
        Ok(files)
    }

    fn should_descend(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        let hidden = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'));
        if hidden {
            return false;
        }
        if self.skip_dirs.iter().any(|skip| entry.path() == skip) {
            return false;
        }
        match entry.path().strip_prefix(&self.root) {
            Ok(relative) => !self.excluded.matches(&utils::normalize_separators(relative)),
            Err(_) => true,
        }
    }
}

fn is_content_file(name: &str) -> bool {
    name.ends_with(CONTENT_SUFFIX) && !name.ends_with(PARTIAL_SUFFIX)
}

/// Discovers the content files of a build.
pub fn discover(config: &BuildConfig) -> Result<Vec<SourceFile>, BuildError> {
    config.create_file_finder()?.find()
}
