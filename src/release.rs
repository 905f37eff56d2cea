//! Publishing a release of the builder.
//!
//! [`Releaser`] drives any [`ReleaseApi`]: it creates a draft release for a
//! tag, attaches the packaged artifact and publishes the draft. When a step
//! fails after the draft exists, the draft is deleted again; if that deletion
//! fails too, both errors are reported together.

use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable holding the API token.
pub const TOKEN_ENV_VAR: &str = "GITHUB_API_TOKEN";

/// File name of the uploaded artifact.
pub const ASSET_NAME: &str = "docs.phar";

const RELEASE_TITLE: &str = "Symfony docs builder";

lazy_static! {
    static ref TAG_RE: Regex = Regex::new(r"^v\d+\.\d+\.\d+$").unwrap();
}

/// Failure reported by a [`ReleaseApi`] implementation.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(String),
}

/// Step of the release flow that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStage {
    CreatingDraft,
    AttachingAsset,
    Publishing,
}

impl fmt::Display for ReleaseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReleaseStage::CreatingDraft => "creating the draft release",
            ReleaseStage::AttachingAsset => "attaching the asset to the release",
            ReleaseStage::Publishing => "publishing the release",
        })
    }
}

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("\"{0}\" is not a valid tag")]
    InvalidTag(String),

    #[error("missing \"GITHUB_API_TOKEN\" environment variable")]
    MissingToken,

    #[error("failed to read release artifact {}: {source}", path.display())]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("release failed while {stage}: {source}")]
    Failed {
        stage: ReleaseStage,
        #[source]
        source: ApiError,
    },

    /// The draft could not be deleted after an earlier failure.
    #[error("failed to delete release {release_id} ({cleanup}) after: {original}")]
    CompensationFailed {
        release_id: u64,
        original: Box<ReleaseError>,
        #[source]
        cleanup: ApiError,
    },
}

/// A validated `vMAJOR.MINOR.PATCH` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseTag(String);

impl ReleaseTag {
    pub fn parse(tag: &str) -> Result<Self, ReleaseError> {
        if TAG_RE.is_match(tag) {
            Ok(Self(tag.to_string()))
        } else {
            Err(ReleaseError::InvalidTag(tag.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReleaseTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// API token. Never printed.
#[derive(Clone)]
pub struct ReleaseToken(String);

impl ReleaseToken {
    pub fn from_env() -> Result<Self, ReleaseError> {
        Self::from_value(std::env::var(TOKEN_ENV_VAR).ok())
    }

    pub fn from_value(value: Option<String>) -> Result<Self, ReleaseError> {
        match value {
            Some(token) if !token.trim().is_empty() => Ok(Self(token)),
            _ => Err(ReleaseError::MissingToken),
        }
    }

    /// Value of the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("token {}", self.0)
    }
}

impl fmt::Debug for ReleaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReleaseToken(***)")
    }
}

/// Body of the draft creation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DraftRelease {
    pub tag_name: String,
    pub target_commitish: String,
    pub name: String,
    pub description: String,
    pub draft: bool,
    pub prerelease: bool,
}

impl DraftRelease {
    pub fn for_tag(tag: &ReleaseTag) -> Self {
        let title = format!("{} {}", RELEASE_TITLE, tag);
        Self {
            tag_name: tag.to_string(),
            target_commitish: "master".to_string(),
            name: title.clone(),
            description: title,
            draft: true,
            prerelease: false,
        }
    }
}

/// The release endpoints of a code hosting service.
pub trait ReleaseApi {
    /// Creates a draft and returns its id.
    fn create_draft(&self, release: &DraftRelease) -> Result<u64, ApiError>;

    fn upload_asset(&self, release_id: u64, name: &str, content: &[u8]) -> Result<(), ApiError>;

    fn publish(&self, release_id: u64) -> Result<(), ApiError>;

    fn delete(&self, release_id: u64) -> Result<(), ApiError>;
}

pub struct Releaser<A> {
    api: A,
}

impl<A: ReleaseApi> Releaser<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Creates and publishes the release for `tag` with `artifact` attached.
    /// Returns the release id.
    pub fn create_release(&self, tag: &str, artifact: &Path) -> Result<u64, ReleaseError> {
        let tag = ReleaseTag::parse(tag)?;
        let content = std::fs::read(artifact).map_err(|source| ReleaseError::Artifact {
            path: artifact.to_path_buf(),
            source,
        })?;

        let release_id = self
            .api
            .create_draft(&DraftRelease::for_tag(&tag))
            .map_err(|source| ReleaseError::Failed {
                stage: ReleaseStage::CreatingDraft,
                source,
            })?;
        info!("Created draft release {} for {}", release_id, tag);

        if let Err(source) = self.api.upload_asset(release_id, ASSET_NAME, &content) {
            return Err(self.abandon(release_id, ReleaseStage::AttachingAsset, source));
        }
        if let Err(source) = self.api.publish(release_id) {
            return Err(self.abandon(release_id, ReleaseStage::Publishing, source));
        }

        info!("Published release {} ({} bytes)", tag, content.len());
        Ok(release_id)
    }

    fn abandon(&self, release_id: u64, stage: ReleaseStage, source: ApiError) -> ReleaseError {
        let original = ReleaseError::Failed { stage, source };
        warn!("{}, deleting draft release {}", original, release_id);
        match self.api.delete(release_id) {
            Ok(()) => original,
            Err(cleanup) => ReleaseError::CompensationFailed {
                release_id,
                original: Box::new(original),
                cleanup,
            },
        }
    }
}
