//! Error types and build diagnostics.
//!
//! Configuration errors abort a build before anything is rendered. Every
//! other error is scoped to a single document and ends up in the build
//! summary as a [`BuildErrorReport`] or [`BuildWarning`].

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    /// Invalid or missing configuration. Fatal for the whole invocation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed content in one document.
    #[error("{}:{line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// A reference, term or directive name that could not be resolved.
    #[error("{}:{line}: unresolved {role} reference '{target}'", path.display())]
    UnresolvedReference {
        path: PathBuf,
        line: usize,
        role: String,
        target: String,
    },

    #[error("build cache at {} is unreadable: {reason}", path.display())]
    CacheCorruption { path: PathBuf, reason: String },

    #[error("failed to render {}: {message}", path.display())]
    Render { path: PathBuf, message: String },

    #[error("failed to publish image '{image}' referenced by {}: {message}", path.display())]
    Asset {
        path: PathBuf,
        image: String,
        message: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BuildError {
    pub fn config(message: impl Into<String>) -> Self {
        BuildError::Configuration(message.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, BuildError::Configuration(_))
    }
}

/// Category of a recoverable problem found while building a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WarningKind {
    UnknownDirective,
    UnknownRole,
    DirectiveError,
    UnresolvedReference,
    MissingImage,
    CacheCorruption,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WarningKind::UnknownDirective => "unknown directive",
            WarningKind::UnknownRole => "unknown role",
            WarningKind::DirectiveError => "directive error",
            WarningKind::UnresolvedReference => "unresolved reference",
            WarningKind::MissingImage => "missing image",
            WarningKind::CacheCorruption => "cache corruption",
        };
        f.write_str(name)
    }
}

/// A warning surfaced in the build summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildWarning {
    pub file: PathBuf,
    pub line: Option<usize>,
    pub kind: WarningKind,
    pub message: String,
}

impl BuildWarning {
    pub fn new(file: PathBuf, line: Option<usize>, kind: WarningKind, message: String) -> Self {
        Self {
            file,
            line,
            kind,
            message,
        }
    }

    pub fn unresolved_reference(file: PathBuf, line: usize, role: &str, target: &str) -> Self {
        Self::new(
            file,
            Some(line),
            WarningKind::UnresolvedReference,
            format!("unresolved :{}: reference '{}'", role, target),
        )
    }

    pub fn cache_corruption(file: PathBuf, reason: &str) -> Self {
        Self::new(
            file,
            None,
            WarningKind::CacheCorruption,
            format!("ignoring unreadable build cache: {}", reason),
        )
    }
}

impl fmt::Display for BuildWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(
                f,
                "{}:{}: {}: {}",
                self.file.display(),
                line,
                self.kind,
                self.message
            ),
            None => write!(f, "{}: {}: {}", self.file.display(), self.kind, self.message),
        }
    }
}

/// A per-document failure surfaced in the build summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildErrorReport {
    pub file: PathBuf,
    pub line: Option<usize>,
    pub message: String,
}

impl BuildErrorReport {
    pub fn from_error(file: PathBuf, error: &BuildError) -> Self {
        let line = match error {
            BuildError::Parse { line, .. } | BuildError::UnresolvedReference { line, .. } => {
                Some(*line)
            }
            _ => None,
        };
        Self {
            file,
            line,
            message: error.to_string(),
        }
    }
}

impl fmt::Display for BuildErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
