//! Image publishing.
//!
//! Images referenced by documents are copied into the images directory under
//! their path relative to the content root, so two images with the same file
//! name in different directories never collide. Copies of one destination
//! are serialized and skipped when the destination already holds identical
//! bytes, which makes publishing idempotent across documents and builds.

use dashmap::DashMap;
use log::debug;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::config::BuildConfig;
use crate::error::BuildError;
use crate::utils::{self, Fingerprint};

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("image path escapes the content directory")]
    OutsideContentRoot,

    #[error("image not found at {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to publish image to {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// True for URIs that are not files of this site.
pub fn is_external(uri: &str) -> bool {
    uri.contains("://") || uri.starts_with("data:") || uri.starts_with("//")
}

pub struct AssetPublisher {
    content_root: PathBuf,
    images_dir: PathBuf,
    public_prefix: String,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
    copied: AtomicUsize,
}

impl AssetPublisher {
    pub fn new(content_root: PathBuf, images_dir: PathBuf, public_prefix: &str) -> Self {
        Self {
            content_root,
            images_dir,
            public_prefix: public_prefix.trim_end_matches('/').to_string(),
            locks: DashMap::new(),
            copied: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &BuildConfig) -> Result<Self, BuildError> {
        Ok(Self::new(
            config.content_dir()?.to_path_buf(),
            config.images_dir()?,
            config.images_public_prefix(),
        ))
    }

    /// Publishes an image referenced from a document in `document_dir` and
    /// returns its public URL.
    pub fn publish(&self, document_dir: &str, uri: &str) -> Result<String, AssetError> {
        let relative = match uri.strip_prefix('/') {
            Some(absolute) => PathBuf::from(absolute),
            None => Path::new(document_dir).join(uri),
        };
        let relative = utils::normalize_lexically(&relative)
            .filter(|p| p.is_relative() && !p.as_os_str().is_empty())
            .ok_or(AssetError::OutsideContentRoot)?;

        let source = self.content_root.join(&relative);
        if !source.is_file() {
            return Err(AssetError::NotFound(source));
        }
        let destination = self.images_dir.join(&relative);

        let lock = Arc::clone(&self.locks.entry(destination.clone()).or_default());
        let _guard = lock.lock();

        let io_error = |source: std::io::Error| AssetError::Io {
            path: destination.clone(),
            source,
        };
        let fingerprint = Fingerprint::of_file(&source).map_err(io_error)?;
        let up_to_date = destination.is_file()
            && Fingerprint::of_file(&destination).ok().as_ref() == Some(&fingerprint);

        if !up_to_date {
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent).map_err(io_error)?;
            }
            std::fs::copy(&source, &destination).map_err(io_error)?;
            self.copied.fetch_add(1, Ordering::Relaxed);
            debug!("Published {} to {}", relative.display(), destination.display());
        }

        Ok(self.public_url(&relative))
    }

    fn public_url(&self, relative: &Path) -> String {
        let relative = utils::normalize_separators(relative);
        if self.public_prefix.is_empty() {
            relative
        } else {
            format!("{}/{}", self.public_prefix, relative)
        }
    }

    /// Number of files actually copied so far.
    pub fn copied_count(&self) -> usize {
        self.copied.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, TempDir) {
        let content = TempDir::new().unwrap();
        fs::create_dir_all(content.path().join("images")).unwrap();
        fs::create_dir_all(content.path().join("guides/img")).unwrap();
        fs::write(content.path().join("images/logo.png"), b"logo").unwrap();
        fs::write(content.path().join("guides/img/logo.png"), b"other logo").unwrap();
        (content, TempDir::new().unwrap())
    }

    #[test]
    fn test_publish_namespaces_by_source_path() {
        let (content, images) = setup();
        let publisher = AssetPublisher::new(
            content.path().to_path_buf(),
            images.path().to_path_buf(),
            "/assets/",
        );

        let a = publisher.publish("guides", "../images/logo.png").unwrap();
        let b = publisher.publish("guides", "img/logo.png").unwrap();
        assert_eq!(a, "/assets/images/logo.png");
        assert_eq!(b, "/assets/guides/img/logo.png");
        assert_eq!(fs::read(images.path().join("images/logo.png")).unwrap(), b"logo");
        assert_eq!(
            fs::read(images.path().join("guides/img/logo.png")).unwrap(),
            b"other logo"
        );
    }

    #[test]
    fn test_publish_is_idempotent() {
        let (content, images) = setup();
        let publisher =
            AssetPublisher::new(content.path().to_path_buf(), images.path().to_path_buf(), "");

        let urls: Vec<String> = (0..16)
            .into_par_iter()
            .map(|_| publisher.publish("", "/images/logo.png").unwrap())
            .collect();
        assert!(urls.iter().all(|url| url == "images/logo.png"));
        assert_eq!(publisher.copied_count(), 1);
    }

    #[test]
    fn test_paths_outside_the_content_root_are_rejected() {
        let (content, images) = setup();
        let publisher =
            AssetPublisher::new(content.path().to_path_buf(), images.path().to_path_buf(), "");
        assert!(matches!(
            publisher.publish("guides", "../../secret.png"),
            Err(AssetError::OutsideContentRoot)
        ));
        assert!(matches!(
            publisher.publish("", "missing.png"),
            Err(AssetError::NotFound(_))
        ));
    }

    #[test]
    fn test_external_uris() {
        assert!(is_external("https://example.com/a.png"));
        assert!(is_external("data:image/png;base64,AAAA"));
        assert!(!is_external("/images/logo.png"));
    }
}
