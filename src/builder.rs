use anyhow::{Context, Result};
use log::{debug, info, warn};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::{BuildCache, CacheEntry};
use crate::config::BuildConfig;
use crate::document::{Diagnostic, RenderedPage, SourceDocument};
use crate::error::{BuildError, BuildErrorReport, BuildWarning};
use crate::extensions::ExtensionRegistry;
use crate::parser::{MarkupEngine, RstEngine};
use crate::pipeline::{ParsedDocument, RenderPipeline};
use crate::resolver::SiteIndex;
use crate::theme::{PageTemplate, ThemeRegistry, THEMES_DIR};

/// Docname used for in-memory content.
pub const STRING_DOCNAME: &str = "index";

#[derive(Debug, Clone)]
pub struct BuildStats {
    pub files_processed: usize,
    pub files_skipped: usize,
    /// Documents whose outputs were deleted because their source is gone.
    pub files_removed: usize,
    pub build_time: Duration,
    pub cache_hits: usize,
    pub images_published: usize,
    pub errors: usize,
    pub warnings: usize,
    pub warning_details: Vec<BuildWarning>,
    pub error_details: Vec<BuildErrorReport>,
}

impl BuildStats {
    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }
}

pub struct DocsBuilder {
    pipeline: RenderPipeline,
    parallel_jobs: usize,
    warnings: Arc<Mutex<Vec<BuildWarning>>>,
    errors: Arc<Mutex<Vec<BuildErrorReport>>>,
}

impl DocsBuilder {
    pub fn new(config: BuildConfig) -> Result<Self> {
        Self::with_registry(config, ExtensionRegistry::default())
    }

    /// Builds with a custom set of directives and references.
    pub fn with_registry(config: BuildConfig, registry: ExtensionRegistry) -> Result<Self> {
        Self::with_engine(config, Arc::new(registry), Arc::new(RstEngine::new()))
    }

    pub fn with_engine(
        config: BuildConfig,
        registry: Arc<ExtensionRegistry>,
        engine: Arc<dyn MarkupEngine>,
    ) -> Result<Self> {
        let template = Self::init_themes(&config)?;
        let parallel_jobs = config.parallel_jobs();
        let pipeline = RenderPipeline::new(config, registry, engine, template)?;

        Ok(Self {
            pipeline,
            parallel_jobs,
            warnings: Arc::new(Mutex::new(Vec::new())),
            errors: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Discovers project themes and loads the configured one. An unknown or
    /// broken theme is a configuration error.
    fn init_themes(config: &BuildConfig) -> Result<PageTemplate, BuildError> {
        let mut registry = ThemeRegistry::new();

        if config.has_content_dir() && !config.is_content_a_string() {
            registry
                .discover(&config.content_dir()?.join(THEMES_DIR))
                .map_err(|e| BuildError::config(format!("{:#}", e)))?;
        }

        let template = registry
            .load(config.theme())
            .map_err(|e| BuildError::config(format!("{:#}", e)))?;
        info!("Using theme '{}'", template.theme());
        Ok(template)
    }

    pub fn config(&self) -> &BuildConfig {
        self.pipeline.config()
    }

    pub fn set_parallel_jobs(&mut self, jobs: usize) {
        self.parallel_jobs = jobs.max(1);
    }

    /// Add a warning to the collection
    pub fn add_warning(&self, warning: BuildWarning) {
        warn!("{}", warning);
        self.warnings.lock().push(warning);
    }

    /// Add an error to the collection
    pub fn add_error(&self, error: BuildErrorReport) {
        warn!("{}", error);
        self.errors.lock().push(error);
    }

    fn report_diagnostics(&self, file: &Path, diagnostics: Vec<Diagnostic>) {
        for diagnostic in diagnostics {
            self.add_warning(BuildWarning::new(
                file.to_path_buf(),
                Some(diagnostic.line),
                diagnostic.kind,
                diagnostic.message,
            ));
        }
    }

    /// Records a failed document: its outputs are deleted so no stale page
    /// survives, and its cache entry is dropped.
    fn fail_document(
        &self,
        cache: &BuildCache,
        output_dir: &Path,
        docname: &str,
        file: &Path,
        error: &BuildError,
    ) {
        self.add_error(BuildErrorReport::from_error(file.to_path_buf(), error));
        remove_outputs(output_dir, docname);
        cache.forget(docname);
    }

    pub async fn clean(&self) -> Result<()> {
        let config = self.config();
        let output_dir = config.output_dir()?;
        if output_dir.exists() {
            tokio::fs::remove_dir_all(&output_dir)
                .await
                .with_context(|| format!("Failed to remove {}", output_dir.display()))?;
            info!("Removed {}", output_dir.display());
        }

        let cache_file = config.cache_dir()?.join(crate::cache::CACHE_FILE_NAME);
        if cache_file.exists() {
            tokio::fs::remove_file(&cache_file)
                .await
                .with_context(|| format!("Failed to remove {}", cache_file.display()))?;
        }
        Ok(())
    }

    /// Renders in-memory content as a single document. Nothing is written
    /// and no image is published.
    pub fn build_string(&self, content: &str) -> Result<RenderedPage> {
        let source = SourceDocument::from_string(STRING_DOCNAME, content);
        let file = source.relative_path.clone();

        let parsed = self.pipeline.parse(source)?;
        let index = SiteIndex::build([(STRING_DOCNAME.to_string(), parsed.meta.clone())]);
        let outcome = self.pipeline.render(parsed, &index)?;
        self.report_diagnostics(&file, outcome.diagnostics);
        Ok(outcome.page)
    }

    pub async fn build(&self) -> Result<BuildStats> {
        let start_time = Instant::now();
        info!("Starting build process...");
        self.warnings.lock().clear();
        self.errors.lock().clear();

        let config = self.config();
        if config.is_content_a_string() {
            return Err(BuildError::config(
                "content is configured as a string, use build_string instead",
            )
            .into());
        }

        let output_dir = config.output_dir()?;
        tokio::fs::create_dir_all(&output_dir)
            .await
            .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

        let finder = config.create_file_finder()?;
        let source_files = finder.find()?;
        info!("Discovered {} source files", source_files.len());

        let cache = BuildCache::load(config)?;
        if !cache.is_enabled() {
            info!("Build cache disabled, rebuilding all documents");
        }
        if let Some(reason) = cache.corruption() {
            self.add_warning(BuildWarning::cache_corruption(cache.path().to_path_buf(), reason));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.parallel_jobs)
            .build()?;

        let loaded: Vec<_> = pool.install(|| {
            source_files
                .par_iter()
                .map(|file| (file, SourceDocument::load(file)))
                .collect()
        });

        let mut documents = Vec::with_capacity(loaded.len());
        let mut unreadable = HashSet::new();
        for (file, result) in loaded {
            match result {
                Ok(document) => documents.push(document),
                Err(e) => {
                    self.fail_document(&cache, &output_dir, &file.docname, &file.relative_path, &e);
                    unreadable.insert(file.docname.as_str());
                }
            }
        }

        let plan = cache.plan(&documents, &finder);
        let removed: Vec<&String> = plan
            .removed
            .iter()
            .filter(|docname| !unreadable.contains(docname.as_str()))
            .collect();
        for docname in &removed {
            debug!("Removing outputs of deleted document {}", docname);
            remove_outputs(&output_dir, docname);
            cache.forget(docname);
        }

        let (to_build, mut skipped): (Vec<_>, Vec<_>) = documents
            .into_iter()
            .partition(|document| plan.needs_rebuild(&document.docname));
        info!(
            "Processing {} files with {} parallel jobs",
            to_build.len(),
            self.parallel_jobs
        );

        // Phase 1: parse. Collecting the results is the barrier before any
        // document is resolved against the rest of the site.
        let mut parsed = self.parse_all(&pool, &cache, &output_dir, to_build);
        let mut index = self.build_index(&cache, &parsed);

        // A term or label that moved to another document invalidates the
        // cached pages linking to its old owner.
        let displaced = cache.displaced_referrers(&index, &skipped);
        if !displaced.is_empty() {
            let (relink, kept): (Vec<_>, Vec<_>) = skipped
                .into_iter()
                .partition(|document| displaced.contains(&document.docname));
            skipped = kept;
            info!("Relinking {} documents to moved definitions", relink.len());
            parsed.extend(self.parse_all(&pool, &cache, &output_dir, relink));
            index = self.build_index(&cache, &parsed);
        }
        let index = Arc::new(index);
        debug!("Site index holds {} documents", index.len());

        // Phase 2: resolve, render and write against the frozen index.
        let processed: usize = pool.install(|| {
            parsed
                .into_par_iter()
                .map(|document| self.render_document(&cache, &output_dir, &index, document))
                .filter(|written| *written)
                .count()
        });

        cache
            .persist()
            .with_context(|| format!("Failed to write build cache {}", cache.path().display()))?;

        let build_time = start_time.elapsed();
        let warnings = self.warnings.lock();
        let errors = self.errors.lock();

        let stats = BuildStats {
            files_processed: processed,
            files_skipped: skipped.len(),
            files_removed: removed.len(),
            build_time,
            cache_hits: cache.hit_count(),
            images_published: self
                .pipeline
                .publisher()
                .map_or(0, |publisher| publisher.copied_count()),
            errors: errors.len(),
            warnings: warnings.len(),
            warning_details: warnings.clone(),
            error_details: errors.clone(),
        };

        info!("Build completed in {:?}", build_time);
        Ok(stats)
    }

    fn parse_all(
        &self,
        pool: &rayon::ThreadPool,
        cache: &BuildCache,
        output_dir: &Path,
        sources: Vec<SourceDocument>,
    ) -> Vec<ParsedDocument> {
        let results: Vec<_> = pool.install(|| {
            sources
                .into_par_iter()
                .map(|source| {
                    let docname = source.docname.clone();
                    let file = source.relative_path.clone();
                    (docname, file, self.pipeline.parse(source))
                })
                .collect()
        });

        let mut parsed = Vec::with_capacity(results.len());
        for (docname, file, result) in results {
            match result {
                Ok(document) => parsed.push(document),
                Err(e) => self.fail_document(cache, output_dir, &docname, &file, &e),
            }
        }
        parsed
    }

    /// Fresh metadata of the parsed documents plus the cached metadata of
    /// every document that is not being rebuilt (including documents outside
    /// the subdirectory being built).
    fn build_index(&self, cache: &BuildCache, parsed: &[ParsedDocument]) -> SiteIndex {
        let mut metas: BTreeMap<_, _> = cache
            .entries()
            .into_iter()
            .map(|(docname, entry)| (docname, entry.meta))
            .collect();
        for document in parsed {
            metas.insert(document.source.docname.clone(), document.meta.clone());
        }
        SiteIndex::build(metas)
    }

    /// Renders one document and writes its outputs. Returns whether the
    /// document was written.
    fn render_document(
        &self,
        cache: &BuildCache,
        output_dir: &Path,
        index: &SiteIndex,
        document: ParsedDocument,
    ) -> bool {
        let docname = document.source.docname.clone();
        let file = document.source.relative_path.clone();

        let outcome = match self.pipeline.render(document, index) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.fail_document(cache, output_dir, &docname, &file, &e);
                return false;
            }
        };
        self.report_diagnostics(&file, outcome.diagnostics);

        if let Err(e) = outcome.page.write(output_dir) {
            self.fail_document(cache, output_dir, &docname, &file, &BuildError::Io(e));
            return false;
        }
        if outcome.page.json.is_none() {
            remove_file_if_exists(&output_dir.join(outcome.source.json_path()));
        }

        cache.record_success(
            &docname,
            CacheEntry::new(
                outcome.source.fingerprint.clone(),
                outcome.page.output_fingerprint(),
                outcome.meta,
            ),
        );
        debug!("Wrote {}", outcome.page.output_path.display());
        true
    }
}

fn output_paths(output_dir: &Path, docname: &str) -> [PathBuf; 2] {
    [
        output_dir.join(format!("{}.html", docname)),
        output_dir.join(format!("{}.json", docname)),
    ]
}

fn remove_outputs(output_dir: &Path, docname: &str) {
    for path in output_paths(output_dir, docname) {
        remove_file_if_exists(&path);
    }
}

fn remove_file_if_exists(path: &Path) {
    if !path.exists() {
        return;
    }
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn builder_for(content: &TempDir) -> DocsBuilder {
        let mut config = BuildConfig::new();
        config.set_content_dir(content.path()).unwrap();
        config.set_parallel_jobs(2);
        DocsBuilder::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_build_writes_html_json_and_cache() {
        let content = TempDir::new().unwrap();
        write(content.path(), "index.rst", "Home\n====\n\nSee :doc:`guide/setup`.\n");
        write(content.path(), "guide/setup.rst", "Setup\n=====\n");

        let builder = builder_for(&content);
        let stats = builder.build().await.unwrap();

        assert_eq!(stats.files_processed, 2);
        assert_eq!(stats.errors, 0);
        let output = content.path().join("output");
        let index = fs::read_to_string(output.join("index.html")).unwrap();
        assert!(index.contains("href=\"guide/setup.html\""));
        assert!(index.contains(">Setup</a>"));
        assert!(output.join("guide/setup.json").is_file());
        assert!(output.join(".cache").join(crate::cache::CACHE_FILE_NAME).is_file());
    }

    #[tokio::test]
    async fn test_failed_document_has_no_output() {
        let content = TempDir::new().unwrap();
        write(content.path(), "good.rst", "Good\n====\n");
        write(content.path(), "bad.rst", "AA\n==\n\nBB\n--\n\nCC\n==\n\nDD\n~~\n");

        let builder = builder_for(&content);
        let stats = builder.build().await.unwrap();

        assert_eq!(stats.files_processed, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.error_details[0].line, Some(10));
        assert!(!content.path().join("output/bad.html").exists());
        assert!(content.path().join("output/good.html").exists());
    }

    #[tokio::test]
    async fn test_unknown_theme_is_a_configuration_error() {
        let content = TempDir::new().unwrap();
        let mut config = BuildConfig::new();
        config.set_content_dir(content.path()).unwrap();
        config.set_theme("does-not-exist");

        let error = DocsBuilder::new(config).err().unwrap();
        assert!(error
            .downcast_ref::<BuildError>()
            .is_some_and(BuildError::is_configuration));
    }

    #[test]
    fn test_build_string_renders_without_writing() {
        let mut config = BuildConfig::new();
        config.set_content_is_string(true);
        let builder = DocsBuilder::new(config).unwrap();

        let page = builder
            .build_string("Title\n=====\n\n.. note::\n\n   Careful.\n")
            .unwrap();
        assert_eq!(page.title, "Title");
        assert!(page.body.contains("admonition-note"));
    }

    #[tokio::test]
    async fn test_clean_removes_output() {
        let content = TempDir::new().unwrap();
        write(content.path(), "index.rst", "Home\n====\n");
        let builder = builder_for(&content);
        builder.build().await.unwrap();

        builder.clean().await.unwrap();
        assert!(!content.path().join("output").exists());
    }
}
