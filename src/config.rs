//! Build configuration.
//!
//! [`BuildConfig`] is assembled once per build invocation through validating
//! setters (or from a `docs-builder.yaml` / `docs-builder.toml` file via
//! [`ConfigFile`]) and is read-only once the build starts.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::discovery::SourceFinder;
use crate::error::BuildError;
use crate::utils::Fingerprint;

/// Placeholder replaced by the target version in URL templates.
pub const VERSION_PLACEHOLDER: &str = "{version}";

const DEFAULT_VERSION: &str = "4.4";
const DEFAULT_THEME: &str = "default";
const PHP_DOC_URL: &str = "https://secure.php.net/manual/en";
const API_URL_TEMPLATE: &str = "https://api.symfony.com/{version}";
const DOC_URL_TEMPLATE: &str = "https://symfony.com/doc/{version}";

/// File names probed by [`BuildConfig::discover_file`].
pub const CONFIG_FILE_NAMES: [&str; 3] =
    ["docs-builder.yaml", "docs-builder.yml", "docs-builder.toml"];

#[derive(Debug, Clone)]
pub struct BuildConfig {
    content_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    images_dir: Option<PathBuf>,
    images_public_prefix: String,
    theme: String,
    version: String,
    subdirectory_to_build: Option<String>,
    excluded_paths: Vec<String>,
    use_build_cache: bool,
    json_output: bool,
    content_is_string: bool,
    parallel_jobs: Option<usize>,
    api_url_template: String,
    doc_url_template: String,
    php_doc_url: String,
    /// Snapshot taken the first time discovery is requested.
    file_finder: OnceLock<SourceFinder>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            content_dir: None,
            output_dir: None,
            cache_dir: None,
            images_dir: None,
            images_public_prefix: String::new(),
            theme: DEFAULT_THEME.to_string(),
            version: DEFAULT_VERSION.to_string(),
            subdirectory_to_build: None,
            excluded_paths: Vec::new(),
            use_build_cache: true,
            json_output: true,
            content_is_string: false,
            parallel_jobs: None,
            api_url_template: API_URL_TEMPLATE.to_string(),
            doc_url_template: DOC_URL_TEMPLATE.to_string(),
            php_doc_url: PHP_DOC_URL.to_string(),
            file_finder: OnceLock::new(),
        }
    }
}

impl BuildConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration file. Relative paths inside it are resolved
    /// against the file's directory.
    pub fn from_file(path: &Path) -> Result<Self, BuildError> {
        let file = ConfigFile::load(path)?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut config = Self::new();
        file.apply(&mut config, base_dir)?;
        Ok(config)
    }

    /// Finds the first known configuration file inside `dir`.
    pub fn discover_file(dir: &Path) -> Option<PathBuf> {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    }

    // --- setters -----------------------------------------------------------

    /// Sets the source directory. It is an input and is never created.
    pub fn set_content_dir(&mut self, dir: impl AsRef<Path>) -> Result<&mut Self, BuildError> {
        let dir = dir.as_ref();
        if !dir.exists() {
            return Err(BuildError::config(format!(
                "content directory \"{}\" does not exist",
                dir.display()
            )));
        }
        self.content_dir = Some(canonical_dir(dir, "content")?);
        Ok(self)
    }

    pub fn set_output_dir(&mut self, dir: impl AsRef<Path>) -> Result<&mut Self, BuildError> {
        self.output_dir = Some(ensure_dir(dir.as_ref(), "output")?);
        Ok(self)
    }

    pub fn set_cache_dir(&mut self, dir: impl AsRef<Path>) -> Result<&mut Self, BuildError> {
        self.cache_dir = Some(ensure_dir(dir.as_ref(), "cache")?);
        Ok(self)
    }

    /// The directory images are copied to, e.g. the public directory of a
    /// web application.
    pub fn set_images_dir(&mut self, dir: impl AsRef<Path>) -> Result<&mut Self, BuildError> {
        self.images_dir = Some(ensure_dir(dir.as_ref(), "images")?);
        Ok(self)
    }

    /// Prefix for the `src` attribute of published images.
    pub fn set_images_public_prefix(&mut self, prefix: impl Into<String>) -> &mut Self {
        self.images_public_prefix = prefix.into();
        self
    }

    pub fn set_theme(&mut self, theme: impl Into<String>) -> &mut Self {
        self.theme = theme.into();
        self
    }

    pub fn set_version(&mut self, version: impl Into<String>) -> &mut Self {
        self.version = version.into();
        self
    }

    pub fn set_subdirectory_to_build(&mut self, subdirectory: &str) -> &mut Self {
        let trimmed = subdirectory.trim_matches(|c| c == '/' || c == '\\');
        self.subdirectory_to_build = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
        self
    }

    /// Sets the glob patterns excluded from discovery.
    ///
    /// # Panics
    ///
    /// Panics when called after [`BuildConfig::create_file_finder`]: the
    /// finder is a snapshot and would silently ignore the new patterns.
    pub fn set_excluded_paths<I, S>(&mut self, patterns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        assert!(
            self.file_finder.get().is_none(),
            "set_excluded_paths() cannot be called after create_file_finder() (the finder has been initialized)"
        );
        self.excluded_paths = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn disable_build_cache(&mut self) -> &mut Self {
        self.use_build_cache = false;
        self
    }

    pub fn disable_json_output(&mut self) -> &mut Self {
        self.json_output = false;
        self
    }

    /// Build a single in-memory string instead of a file tree.
    pub fn set_content_is_string(&mut self, is_string: bool) -> &mut Self {
        self.content_is_string = is_string;
        self
    }

    pub fn set_parallel_jobs(&mut self, jobs: usize) -> &mut Self {
        self.parallel_jobs = Some(jobs.max(1));
        self
    }

    pub fn set_api_url_template(&mut self, template: impl Into<String>) -> &mut Self {
        self.api_url_template = template.into();
        self
    }

    pub fn set_doc_url_template(&mut self, template: impl Into<String>) -> &mut Self {
        self.doc_url_template = template.into();
        self
    }

    pub fn set_php_doc_url(&mut self, url: impl Into<String>) -> &mut Self {
        self.php_doc_url = url.into();
        self
    }

    // --- getters -----------------------------------------------------------

    pub fn content_dir(&self) -> Result<&Path, BuildError> {
        self.content_dir.as_deref().ok_or_else(|| {
            BuildError::config("content directory is not defined; set it with set_content_dir()")
        })
    }

    pub fn has_content_dir(&self) -> bool {
        self.content_dir.is_some()
    }

    pub fn output_dir(&self) -> Result<PathBuf, BuildError> {
        match &self.output_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(self.content_dir()?.join("output")),
        }
    }

    pub fn cache_dir(&self) -> Result<PathBuf, BuildError> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(self.output_dir()?.join(".cache")),
        }
    }

    pub fn images_dir(&self) -> Result<PathBuf, BuildError> {
        match &self.images_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(self.output_dir()?.join("_images")),
        }
    }

    pub fn images_public_prefix(&self) -> &str {
        &self.images_public_prefix
    }

    pub fn theme(&self) -> &str {
        &self.theme
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn subdirectory_to_build(&self) -> Option<&str> {
        self.subdirectory_to_build.as_deref()
    }

    pub fn excluded_paths(&self) -> &[String] {
        &self.excluded_paths
    }

    pub fn is_build_cache_enabled(&self) -> bool {
        self.use_build_cache
    }

    pub fn generate_json_files(&self) -> bool {
        self.json_output
    }

    pub fn is_content_a_string(&self) -> bool {
        self.content_is_string
    }

    pub fn parallel_jobs(&self) -> usize {
        self.parallel_jobs.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }

    pub fn php_doc_url(&self) -> &str {
        &self.php_doc_url
    }

    pub fn api_url(&self) -> String {
        self.substitute_version(&self.api_url_template)
    }

    pub fn doc_url(&self) -> String {
        self.substitute_version(&self.doc_url_template)
    }

    /// Replaces every version placeholder in `template`.
    pub fn substitute_version(&self, template: &str) -> String {
        template.replace(VERSION_PLACEHOLDER, &self.version)
    }

    /// Hash of every setting that changes rendered output. A cache written
    /// under a different fingerprint is discarded.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of_parts([
            env!("CARGO_PKG_VERSION"),
            self.theme.as_str(),
            self.version.as_str(),
            self.images_public_prefix.as_str(),
            if self.json_output { "json" } else { "no-json" },
            self.api_url_template.as_str(),
            self.doc_url_template.as_str(),
            self.php_doc_url.as_str(),
        ])
    }

    /// Returns the discovery finder, snapshotting the excluded paths on the
    /// first call. Every call returns an independent copy.
    pub fn create_file_finder(&self) -> Result<SourceFinder, BuildError> {
        if let Some(finder) = self.file_finder.get() {
            return Ok(finder.clone());
        }

        let content_dir = self.content_dir()?;
        let mut skip_dirs = vec![self.output_dir()?, self.cache_dir()?, self.images_dir()?];
        skip_dirs.retain(|dir| dir.starts_with(content_dir));

        let finder = SourceFinder::new(
            content_dir.to_path_buf(),
            self.subdirectory_to_build.clone(),
            &self.excluded_paths,
            skip_dirs,
        )?;
        let _ = self.file_finder.set(finder);

        self.file_finder
            .get()
            .cloned()
            .ok_or_else(|| BuildError::config("file finder could not be initialized"))
    }
}

fn canonical_dir(dir: &Path, what: &str) -> Result<PathBuf, BuildError> {
    dir.canonicalize().map_err(|e| {
        BuildError::config(format!(
            "{} directory \"{}\" could not be resolved: {}",
            what,
            dir.display(),
            e
        ))
    })
}

fn ensure_dir(dir: &Path, what: &str) -> Result<PathBuf, BuildError> {
    std::fs::create_dir_all(dir).map_err(|e| {
        BuildError::config(format!(
            "{} directory \"{}\" could not be created: {}",
            what,
            dir.display(),
            e
        ))
    })?;
    if !dir.is_dir() {
        return Err(BuildError::config(format!(
            "{} directory \"{}\" does not exist",
            what,
            dir.display()
        )));
    }
    canonical_dir(dir, what)
}

/// On-disk configuration. Every field is optional; unset fields keep the
/// [`BuildConfig`] defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub content_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub images_dir: Option<PathBuf>,
    pub images_public_prefix: Option<String>,
    pub theme: Option<String>,
    pub version: Option<String>,
    pub subdirectory: Option<String>,
    pub excluded_paths: Option<Vec<String>>,
    pub build_cache: Option<bool>,
    pub json_output: Option<bool>,
    pub parallel_jobs: Option<usize>,
    pub api_url: Option<String>,
    pub doc_url: Option<String>,
    pub php_doc_url: Option<String>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, BuildError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BuildError::config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        Self::parse(path, &content)
    }

    pub fn parse(path: &Path, content: &str) -> Result<Self, BuildError> {
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let invalid = |e: String| {
            BuildError::config(format!("invalid config file {}: {}", path.display(), e))
        };
        match extension {
            "yaml" | "yml" => serde_yaml::from_str(content).map_err(|e| invalid(e.to_string())),
            "toml" => toml::from_str(content).map_err(|e| invalid(e.to_string())),
            other => Err(BuildError::config(format!(
                "unsupported config file format '{}' for {}",
                other,
                path.display()
            ))),
        }
    }

    /// Applies the file on top of `config` through the validating setters.
    pub fn apply(self, config: &mut BuildConfig, base_dir: &Path) -> Result<(), BuildError> {
        let resolve = |p: PathBuf| if p.is_absolute() { p } else { base_dir.join(p) };

        if let Some(dir) = self.content_dir {
            config.set_content_dir(resolve(dir))?;
        }
        if let Some(dir) = self.output_dir {
            config.set_output_dir(resolve(dir))?;
        }
        if let Some(dir) = self.cache_dir {
            config.set_cache_dir(resolve(dir))?;
        }
        if let Some(dir) = self.images_dir {
            config.set_images_dir(resolve(dir))?;
        }
        if let Some(prefix) = self.images_public_prefix {
            config.set_images_public_prefix(prefix);
        }
        if let Some(theme) = self.theme {
            config.set_theme(theme);
        }
        if let Some(version) = self.version {
            config.set_version(version);
        }
        if let Some(subdirectory) = self.subdirectory {
            config.set_subdirectory_to_build(&subdirectory);
        }
        if let Some(excluded) = self.excluded_paths {
            config.set_excluded_paths(excluded);
        }
        if self.build_cache == Some(false) {
            config.disable_build_cache();
        }
        if self.json_output == Some(false) {
            config.disable_json_output();
        }
        if let Some(jobs) = self.parallel_jobs {
            config.set_parallel_jobs(jobs);
        }
        if let Some(url) = self.api_url {
            config.set_api_url_template(url);
        }
        if let Some(url) = self.doc_url {
            config.set_doc_url_template(url);
        }
        if let Some(url) = self.php_doc_url {
            config.set_php_doc_url(url);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_content_dir_is_a_configuration_error() {
        let temp = TempDir::new().unwrap();
        let mut config = BuildConfig::new();
        let err = config.set_content_dir(temp.path().join("nope")).unwrap_err();
        assert!(err.is_configuration());
        assert!(!temp.path().join("nope").exists(), "content dir must not be created");
    }

    #[test]
    fn test_unset_content_dir_is_reported() {
        let config = BuildConfig::new();
        assert!(config.content_dir().unwrap_err().is_configuration());
        assert!(config.output_dir().is_err());
    }

    #[test]
    fn test_output_dir_setter_creates_directory() {
        let temp = TempDir::new().unwrap();
        let mut config = BuildConfig::new();
        config.set_output_dir(temp.path().join("out/html")).unwrap();
        assert!(temp.path().join("out/html").is_dir());
        assert!(config.output_dir().unwrap().is_absolute());
    }

    #[test]
    fn test_derived_directories_are_lazy() {
        let temp = TempDir::new().unwrap();
        let content = temp.path().join("docs");
        std::fs::create_dir_all(&content).unwrap();
        let content = content.canonicalize().unwrap();

        let mut config = BuildConfig::new();
        config.set_content_dir(&content).unwrap();
        assert_eq!(config.output_dir().unwrap(), content.join("output"));
        assert_eq!(config.cache_dir().unwrap(), content.join("output/.cache"));

        let out = temp.path().join("out");
        config.set_output_dir(&out).unwrap();
        let out = out.canonicalize().unwrap();
        assert_eq!(config.cache_dir().unwrap(), out.join(".cache"));
        assert_eq!(config.images_dir().unwrap(), out.join("_images"));
    }

    #[test]
    fn test_versioned_urls() {
        let mut config = BuildConfig::new();
        config.set_version("6.4");
        assert_eq!(config.api_url(), "https://api.symfony.com/6.4");
        assert_eq!(config.doc_url(), "https://symfony.com/doc/6.4");
        assert_eq!(config.php_doc_url(), "https://secure.php.net/manual/en");
    }

    #[test]
    fn test_subdirectory_is_trimmed() {
        let mut config = BuildConfig::new();
        config.set_subdirectory_to_build("/components/");
        assert_eq!(config.subdirectory_to_build(), Some("components"));
    }

    #[test]
    #[should_panic(expected = "set_excluded_paths() cannot be called after create_file_finder()")]
    fn test_excluded_paths_are_frozen_after_discovery_starts() {
        let temp = TempDir::new().unwrap();
        let mut config = BuildConfig::new();
        config.set_content_dir(temp.path()).unwrap();
        config.create_file_finder().unwrap();
        config.set_excluded_paths(["internal/*"]);
    }

    #[test]
    fn test_fingerprint_tracks_output_affecting_settings() {
        let mut config = BuildConfig::new();
        let before = config.fingerprint();
        config.set_images_public_prefix("/static");
        assert_ne!(before, config.fingerprint());
    }

    #[test]
    fn test_yaml_config_file() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("docs")).unwrap();
        let path = temp.path().join("docs-builder.yaml");
        std::fs::write(
            &path,
            "content_dir: docs\nversion: \"5.4\"\nexcluded_paths: [\"internal/*\"]\njson_output: false\n",
        )
        .unwrap();

        let config = BuildConfig::from_file(&path).unwrap();
        assert_eq!(config.version(), "5.4");
        assert_eq!(config.excluded_paths(), ["internal/*".to_string()]);
        assert!(!config.generate_json_files());
        assert!(config.content_dir().unwrap().ends_with("docs"));
    }

    #[test]
    fn test_toml_config_file_rejects_unknown_keys() {
        let err = ConfigFile::parse(Path::new("docs-builder.toml"), "colour = \"blue\"\n")
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
