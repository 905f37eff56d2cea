//! Persistent build cache.
//!
//! One JSON file (`build-cache.json`) in the cache directory maps every
//! successfully built docname to the fingerprints it was built from and the
//! metadata the rest of the site needs from it. The file is stamped with a
//! format version and the configuration fingerprint; a stamp that does not
//! match, or a file that cannot be read, starts the build from a cold cache.
//! Without trusted entries, removed documents are found by sweeping the
//! output directory for pages that no longer have a source.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use walkdir::WalkDir;

use crate::config::BuildConfig;
use crate::discovery::SourceFinder;
use crate::document::SourceDocument;
use crate::error::BuildError;
use crate::resolver::{DocumentMeta, SiteIndex};
use crate::utils::{self, Fingerprint};

pub const CACHE_FILE_NAME: &str = "build-cache.json";

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    format: u32,
    config_fingerprint: Fingerprint,
    entries: BTreeMap<String, CacheEntry>,
}

/// State of one document at its last successful build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub content_fingerprint: Fingerprint,
    /// Fingerprint of the HTML file written for the document.
    pub output_fingerprint: Fingerprint,
    pub rendered_at: DateTime<Utc>,
    pub meta: DocumentMeta,
}

impl CacheEntry {
    pub fn new(
        content_fingerprint: Fingerprint,
        output_fingerprint: Fingerprint,
        meta: DocumentMeta,
    ) -> Self {
        Self {
            content_fingerprint,
            output_fingerprint,
            rendered_at: Utc::now(),
            meta,
        }
    }
}

/// Which documents a build pass has to process.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RebuildPlan {
    pub rebuild: BTreeSet<String>,
    /// Cached documents whose source is gone (or now excluded).
    pub removed: Vec<String>,
}

impl RebuildPlan {
    pub fn needs_rebuild(&self, docname: &str) -> bool {
        self.rebuild.contains(docname)
    }
}

pub struct BuildCache {
    path: PathBuf,
    enabled: bool,
    config_fingerprint: Fingerprint,
    content_root: PathBuf,
    output_dir: PathBuf,
    images_dir: PathBuf,
    json_output: bool,
    /// Entries as loaded; never modified during a build.
    previous: BTreeMap<String, CacheEntry>,
    /// `previous` came from a cache file written under this configuration.
    warm: bool,
    /// Entries that will be persisted.
    current: Mutex<BTreeMap<String, CacheEntry>>,
    hits: AtomicUsize,
    corruption: Option<String>,
}

impl BuildCache {
    /// Loads the cache for `config`. With caching disabled nothing is read,
    /// but entries recorded during the build are still persisted.
    pub fn load(config: &BuildConfig) -> Result<Self, BuildError> {
        let path = config.cache_dir()?.join(CACHE_FILE_NAME);
        let config_fingerprint = config.fingerprint();
        let enabled = config.is_build_cache_enabled();

        let mut corruption = None;
        let mut warm = false;
        let previous = if !enabled {
            debug!("Build cache disabled, every document will be rebuilt");
            BTreeMap::new()
        } else {
            match read_cache_file(&path) {
                Ok(None) => BTreeMap::new(),
                Ok(Some(file)) if file.format != FORMAT_VERSION => {
                    warn!(
                        "Build cache format {} is not supported (expected {}), rebuilding everything",
                        file.format, FORMAT_VERSION
                    );
                    BTreeMap::new()
                }
                Ok(Some(file)) if file.config_fingerprint != config_fingerprint => {
                    warn!("Configuration changed since the last build, rebuilding everything");
                    BTreeMap::new()
                }
                Ok(Some(file)) => {
                    debug!("Loaded {} cache entries from {}", file.entries.len(), path.display());
                    warm = true;
                    file.entries
                }
                Err(reason) => {
                    warn!("Ignoring unreadable build cache {}: {}", path.display(), reason);
                    corruption = Some(reason);
                    BTreeMap::new()
                }
            }
        };

        Ok(Self {
            path,
            enabled,
            config_fingerprint,
            content_root: config.content_dir()?.to_path_buf(),
            output_dir: config.output_dir()?,
            images_dir: config.images_dir()?,
            json_output: config.generate_json_files(),
            current: Mutex::new(previous.clone()),
            previous,
            warm,
            hits: AtomicUsize::new(0),
            corruption,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Why the cache file was discarded, if it was unreadable.
    pub fn corruption(&self) -> Option<&str> {
        self.corruption.as_deref()
    }

    /// The entry loaded for `docname` at the start of the build.
    pub fn entry(&self, docname: &str) -> Option<&CacheEntry> {
        self.previous.get(docname)
    }

    /// Snapshot of the entries that would be persisted now.
    pub fn entries(&self) -> BTreeMap<String, CacheEntry> {
        self.current.lock().clone()
    }

    /// Checks `document` on its own, ignoring what happens to the documents
    /// it depends on.
    pub fn should_rebuild(&self, document: &SourceDocument) -> bool {
        if !self.enabled {
            return true;
        }
        let Some(entry) = self.previous.get(&document.docname) else {
            return true;
        };
        if entry.content_fingerprint != document.fingerprint {
            debug!("{} changed", document.docname);
            return true;
        }

        for (include, fingerprint) in &entry.meta.includes {
            let current = Fingerprint::of_file(&self.content_root.join(include)).ok();
            if current.as_ref() != Some(fingerprint) {
                debug!("{} includes changed partial {}", document.docname, include);
                return true;
            }
        }

        let html = self.output_dir.join(document.html_path());
        if Fingerprint::of_file(&html).ok().as_ref() != Some(&entry.output_fingerprint) {
            debug!("Output of {} is missing or was modified", document.docname);
            return true;
        }
        if self.json_output && !self.output_dir.join(document.json_path()).is_file() {
            debug!("JSON output of {} is missing", document.docname);
            return true;
        }
        false
    }

    /// Works out which of `documents` have to be rebuilt.
    ///
    /// Starting from the documents that changed themselves (and the ones that
    /// were removed), every document that links to one of them is added,
    /// transitively. Documents that had unresolved references are rebuilt
    /// whenever anything changed, since the missing target may now exist.
    /// Without trusted entries, pages left in the output directory by
    /// sources that are gone are reported as removed too.
    pub fn plan(&self, documents: &[SourceDocument], finder: &SourceFinder) -> RebuildPlan {
        let present: BTreeSet<&str> = documents.iter().map(|d| d.docname.as_str()).collect();

        let mut removed: BTreeSet<String> = self
            .previous
            .keys()
            .filter(|docname| finder.in_scope(docname) && !present.contains(docname.as_str()))
            .cloned()
            .collect();
        if !self.warm {
            removed.extend(self.orphaned_outputs(&present, finder));
        }
        let removed: Vec<String> = removed.into_iter().collect();

        let mut seeds: Vec<String> = documents
            .iter()
            .filter(|document| self.should_rebuild(document))
            .map(|document| document.docname.clone())
            .collect();

        if !seeds.is_empty() || !removed.is_empty() {
            for (docname, entry) in &self.previous {
                if entry.meta.unresolved_references && present.contains(docname.as_str()) {
                    seeds.push(docname.clone());
                }
            }
        }

        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for (docname, entry) in &self.previous {
            for dependency in &entry.meta.dependencies {
                dependents
                    .entry(dependency.as_str())
                    .or_default()
                    .push(docname.as_str());
            }
        }

        let mut rebuild = BTreeSet::new();
        let mut queue: VecDeque<String> = seeds.into_iter().chain(removed.iter().cloned()).collect();
        let mut visited = BTreeSet::new();
        while let Some(docname) = queue.pop_front() {
            if !visited.insert(docname.clone()) {
                continue;
            }
            if present.contains(docname.as_str()) {
                rebuild.insert(docname.clone());
            }
            if let Some(referrers) = dependents.get(docname.as_str()) {
                queue.extend(referrers.iter().map(|r| r.to_string()));
            }
        }

        let hits = documents.len() - rebuild.len();
        self.hits.store(hits, Ordering::Relaxed);
        info!(
            "{} of {} documents need rebuilding, {} removed",
            rebuild.len(),
            documents.len(),
            removed.len()
        );

        RebuildPlan { rebuild, removed }
    }

    /// Docnames among `skipped` that linked to a term or label which now
    /// belongs to a different document. Their cached pages still point at
    /// the previous owner, so they are no longer cache hits.
    pub fn displaced_referrers(
        &self,
        index: &SiteIndex,
        skipped: &[SourceDocument],
    ) -> BTreeSet<String> {
        let before = SiteIndex::build(
            self.previous
                .iter()
                .map(|(docname, entry)| (docname.clone(), entry.meta.clone())),
        );
        let owners = before.displaced_owners(index);
        if owners.is_empty() {
            return BTreeSet::new();
        }
        debug!("Definitions moved away from {:?}", owners);

        let displaced: BTreeSet<String> = skipped
            .iter()
            .filter(|document| {
                self.previous.get(&document.docname).is_some_and(|entry| {
                    entry
                        .meta
                        .dependencies
                        .iter()
                        .any(|dependency| owners.contains(dependency))
                })
            })
            .map(|document| document.docname.clone())
            .collect();
        self.hits.fetch_sub(displaced.len(), Ordering::Relaxed);
        displaced
    }

    /// Docnames with a page in the output directory but no source among
    /// `present`. The images and cache directories are not searched.
    fn orphaned_outputs(
        &self,
        present: &BTreeSet<&str>,
        finder: &SourceFinder,
    ) -> BTreeSet<String> {
        let cache_dir = self.path.parent();
        let walker = WalkDir::new(&self.output_dir)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !(entry.path() == self.images_dir || Some(entry.path()) == cache_dir)
            });

        let mut orphans = BTreeSet::new();
        for entry in walker.flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.output_dir) else {
                continue;
            };
            let relative = utils::normalize_separators(relative);
            let Some(docname) = relative
                .strip_suffix(".html")
                .or_else(|| relative.strip_suffix(".json"))
            else {
                continue;
            };
            if finder.in_scope(docname) && !present.contains(docname) {
                orphans.insert(docname.to_string());
            }
        }
        if !orphans.is_empty() {
            debug!("Found {} outputs without a source", orphans.len());
        }
        orphans
    }

    pub fn record_success(&self, docname: &str, entry: CacheEntry) {
        self.current.lock().insert(docname.to_string(), entry);
    }

    /// Drops the entry of a document that failed or no longer exists.
    pub fn forget(&self, docname: &str) {
        self.current.lock().remove(docname);
    }

    /// Number of documents served from the cache by the last [`plan`](Self::plan).
    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    /// Writes the cache file, replacing the previous one atomically.
    pub fn persist(&self) -> Result<(), BuildError> {
        let file = CacheFile {
            format: FORMAT_VERSION,
            config_fingerprint: self.config_fingerprint.clone(),
            entries: self.current.lock().clone(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(std::io::Error::other)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp = self.path.with_extension("json.tmp");
        std::fs::write(&temp, json)?;
        std::fs::rename(&temp, &self.path)?;
        debug!("Persisted {} cache entries to {}", file.entries.len(), self.path.display());
        Ok(())
    }
}

fn read_cache_file(path: &Path) -> Result<Option<CacheFile>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::SourceFile;
    use std::fs;
    use tempfile::TempDir;

    fn config_for(content: &TempDir) -> BuildConfig {
        let mut config = BuildConfig::new();
        config.set_content_dir(content.path()).unwrap();
        config
    }

    fn document(content: &TempDir, docname: &str, text: &str) -> SourceDocument {
        let relative = PathBuf::from(format!("{}.rst", docname));
        let absolute = content.path().join(&relative);
        fs::create_dir_all(absolute.parent().unwrap()).unwrap();
        fs::write(&absolute, text).unwrap();
        SourceDocument::load(&SourceFile {
            docname: docname.to_string(),
            relative_path: relative,
            absolute_path: absolute,
        })
        .unwrap()
    }

    /// Writes the HTML output and records a matching entry.
    fn record(cache: &BuildCache, config: &BuildConfig, doc: &SourceDocument, meta: DocumentMeta) {
        let output = config.output_dir().unwrap();
        let html = format!("<p>{}</p>", doc.docname);
        fs::create_dir_all(output.join(doc.html_path()).parent().unwrap()).unwrap();
        fs::write(output.join(doc.html_path()), &html).unwrap();
        fs::write(output.join(doc.json_path()), "{}").unwrap();
        cache.record_success(
            &doc.docname,
            CacheEntry::new(doc.fingerprint.clone(), Fingerprint::of(html.as_bytes()), meta),
        );
    }

    fn depends_on(dependencies: &[&str]) -> DocumentMeta {
        DocumentMeta {
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_cold_cache_rebuilds_everything() {
        let content = TempDir::new().unwrap();
        let config = config_for(&content);
        let cache = BuildCache::load(&config).unwrap();
        let doc = document(&content, "index", "Index\n=====\n");

        assert!(cache.should_rebuild(&doc));
        assert!(cache.corruption().is_none());
    }

    #[test]
    fn test_persisted_entries_survive_reload() {
        let content = TempDir::new().unwrap();
        let config = config_for(&content);
        let doc = document(&content, "index", "Index\n=====\n");

        let cache = BuildCache::load(&config).unwrap();
        record(&cache, &config, &doc, DocumentMeta::default());
        cache.persist().unwrap();

        let reloaded = BuildCache::load(&config).unwrap();
        assert!(reloaded.entry("index").is_some());
        assert!(!reloaded.should_rebuild(&doc));

        let finder = config.create_file_finder().unwrap();
        let plan = reloaded.plan(std::slice::from_ref(&doc), &finder);
        assert!(plan.rebuild.is_empty());
        assert_eq!(reloaded.hit_count(), 1);
    }

    #[test]
    fn test_changed_content_and_modified_output_trigger_rebuild() {
        let content = TempDir::new().unwrap();
        let config = config_for(&content);
        let doc = document(&content, "index", "Index\n=====\n");
        let cache = BuildCache::load(&config).unwrap();
        record(&cache, &config, &doc, DocumentMeta::default());
        cache.persist().unwrap();

        let edited = document(&content, "index", "Index\n=====\n\nMore.\n");
        assert!(BuildCache::load(&config).unwrap().should_rebuild(&edited));

        let doc = document(&content, "index", "Index\n=====\n");
        fs::write(config.output_dir().unwrap().join("index.html"), "tampered").unwrap();
        assert!(BuildCache::load(&config).unwrap().should_rebuild(&doc));
    }

    #[test]
    fn test_changed_partial_triggers_rebuild() {
        let content = TempDir::new().unwrap();
        let config = config_for(&content);
        fs::write(content.path().join("intro.rst.inc"), "Hello.\n").unwrap();
        let doc = document(&content, "index", ".. include:: intro.rst.inc\n");

        let cache = BuildCache::load(&config).unwrap();
        let mut meta = DocumentMeta::default();
        meta.includes.insert(
            "intro.rst.inc".to_string(),
            Fingerprint::of(b"Hello.\n"),
        );
        record(&cache, &config, &doc, meta);
        cache.persist().unwrap();
        assert!(!BuildCache::load(&config).unwrap().should_rebuild(&doc));

        fs::write(content.path().join("intro.rst.inc"), "Goodbye.\n").unwrap();
        assert!(BuildCache::load(&config).unwrap().should_rebuild(&doc));
    }

    #[test]
    fn test_plan_follows_referrers_transitively() {
        let content = TempDir::new().unwrap();
        let config = config_for(&content);
        let a = document(&content, "a", "A\n=\n");
        let b = document(&content, "b", "B\n=\n");
        let c = document(&content, "c", "C\n=\n");
        let d = document(&content, "d", "D\n=\n");

        let cache = BuildCache::load(&config).unwrap();
        record(&cache, &config, &a, depends_on(&["b"]));
        record(&cache, &config, &b, depends_on(&["c"]));
        record(&cache, &config, &c, DocumentMeta::default());
        record(&cache, &config, &d, DocumentMeta::default());
        cache.persist().unwrap();

        let c = document(&content, "c", "C changed\n=========\n");
        let cache = BuildCache::load(&config).unwrap();
        let finder = config.create_file_finder().unwrap();
        let plan = cache.plan(&[a, b, c, d], &finder);

        let rebuilt: Vec<&str> = plan.rebuild.iter().map(String::as_str).collect();
        assert_eq!(rebuilt, vec!["a", "b", "c"]);
        assert!(plan.removed.is_empty());
        assert_eq!(cache.hit_count(), 1);
    }

    #[test]
    fn test_removed_documents_invalidate_referrers() {
        let content = TempDir::new().unwrap();
        let config = config_for(&content);
        let a = document(&content, "a", "A\n=\n");
        let b = document(&content, "b", "B\n=\n");
        let unresolved = document(&content, "u", "U\n=\n");

        let cache = BuildCache::load(&config).unwrap();
        record(&cache, &config, &a, depends_on(&["b"]));
        record(&cache, &config, &b, DocumentMeta::default());
        record(
            &cache,
            &config,
            &unresolved,
            DocumentMeta {
                unresolved_references: true,
                ..Default::default()
            },
        );
        cache.persist().unwrap();

        let cache = BuildCache::load(&config).unwrap();
        let finder = config.create_file_finder().unwrap();
        let plan = cache.plan(&[a, unresolved], &finder);
        assert_eq!(plan.removed, vec!["b".to_string()]);
        assert!(plan.needs_rebuild("a"));
        assert!(plan.needs_rebuild("u"));
    }

    #[test]
    fn test_configuration_change_discards_entries() {
        let content = TempDir::new().unwrap();
        let mut config = config_for(&content);
        let doc = document(&content, "index", "Index\n=====\n");
        let cache = BuildCache::load(&config).unwrap();
        record(&cache, &config, &doc, DocumentMeta::default());
        cache.persist().unwrap();

        config.set_version("5.4");
        let cache = BuildCache::load(&config).unwrap();
        assert!(cache.entry("index").is_none());
        assert!(cache.corruption().is_none());
    }

    #[test]
    fn test_corrupt_cache_file_is_reported() {
        let content = TempDir::new().unwrap();
        let config = config_for(&content);
        let path = config.cache_dir().unwrap().join(CACHE_FILE_NAME);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        let cache = BuildCache::load(&config).unwrap();
        assert!(cache.corruption().is_some());
        assert!(cache.entries().is_empty());
    }

    #[test]
    fn test_disabled_cache_ignores_file_but_still_persists() {
        let content = TempDir::new().unwrap();
        let mut config = config_for(&content);
        let doc = document(&content, "index", "Index\n=====\n");
        let cache = BuildCache::load(&config).unwrap();
        record(&cache, &config, &doc, DocumentMeta::default());
        cache.persist().unwrap();

        config.disable_build_cache();
        let cache = BuildCache::load(&config).unwrap();
        assert!(cache.should_rebuild(&doc));
        record(&cache, &config, &doc, DocumentMeta::default());
        cache.persist().unwrap();
        assert!(cache.path().is_file());
    }

    #[test]
    fn test_cold_cache_finds_removed_documents_in_output() {
        let content = TempDir::new().unwrap();
        let config = config_for(&content);
        let doc = document(&content, "index", "Index\n=====\n");
        let output = config.output_dir().unwrap();
        fs::create_dir_all(output.join("old")).unwrap();
        fs::write(output.join("old/page.html"), "stale").unwrap();
        fs::write(output.join("old/page.json"), "{}").unwrap();
        fs::create_dir_all(output.join("_images")).unwrap();
        fs::write(output.join("_images/chart.html"), "embedded").unwrap();

        let cache = BuildCache::load(&config).unwrap();
        let finder = config.create_file_finder().unwrap();
        let plan = cache.plan(&[doc], &finder);
        assert_eq!(plan.removed, vec!["old/page".to_string()]);
        assert!(plan.needs_rebuild("index"));
    }

    #[test]
    fn test_moved_term_displaces_cached_referrers() {
        let content = TempDir::new().unwrap();
        let config = config_for(&content);
        let a = document(&content, "a", "A\n=\n");
        let c = document(&content, "c", "C\n=\n");
        let mut glossary = DocumentMeta::default();
        glossary.terms.insert(
            "kernel".to_string(),
            crate::resolver::TermTarget {
                term: "Kernel".to_string(),
                anchor: "term-kernel".to_string(),
            },
        );

        let cache = BuildCache::load(&config).unwrap();
        record(&cache, &config, &a, depends_on(&["c"]));
        record(&cache, &config, &c, glossary.clone());
        cache.persist().unwrap();

        let b = document(&content, "b", "B\n=\n");
        let cache = BuildCache::load(&config).unwrap();
        let finder = config.create_file_finder().unwrap();
        let plan = cache.plan(&[a.clone(), b, c.clone()], &finder);
        let rebuilt: Vec<&str> = plan.rebuild.iter().map(String::as_str).collect();
        assert_eq!(rebuilt, vec!["b"]);
        assert_eq!(cache.hit_count(), 2);

        let index = SiteIndex::build([
            ("a".to_string(), depends_on(&["c"])),
            ("b".to_string(), glossary.clone()),
            ("c".to_string(), glossary),
        ]);
        let displaced: Vec<String> = cache
            .displaced_referrers(&index, &[a, c])
            .into_iter()
            .collect();
        assert_eq!(displaced, vec!["a".to_string()]);
        assert_eq!(cache.hit_count(), 1);
    }
}
