//! Site-wide index and cross-reference resolution.
//!
//! After the parse phase every document contributes a [`DocumentMeta`]
//! (freshly parsed, or carried over from the build cache). The metadata is
//! frozen into a [`SiteIndex`] that render workers share read-only while
//! [`Resolver`] fills in link targets.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::BuildConfig;
use crate::document::{
    walk, walk_mut, Diagnostic, DocumentTree, Inline, Node, ResolvedLink, RoleReference,
    TocEntry, TocTreeEntry,
};
use crate::error::WarningKind;
use crate::extensions::ExtensionRegistry;
use crate::roles::{Destination, ResolveContext};
use crate::utils::{self, Fingerprint};

/// Lookup key of a glossary term: lowercase, whitespace collapsed.
pub fn normalize_term(term: &str) -> String {
    term.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermTarget {
    /// The term as written in the glossary.
    pub term: String,
    pub anchor: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelTarget {
    pub anchor: String,
    /// Title of the section the label precedes.
    pub title: Option<String>,
}

/// What the rest of the site needs to know about one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentMeta {
    pub title: String,
    pub headings: Vec<TocEntry>,
    pub labels: BTreeMap<String, LabelTarget>,
    pub terms: BTreeMap<String, TermTarget>,
    /// Documents whose terms, labels or titles this one links to.
    pub dependencies: BTreeSet<String>,
    pub includes: BTreeMap<String, Fingerprint>,
    /// Image URIs as written in the source.
    pub images: Vec<String>,
    pub unresolved_references: bool,
}

impl DocumentMeta {
    /// Collects the definitions of a freshly parsed tree. Dependencies are
    /// only known after resolution.
    pub fn from_tree(tree: &DocumentTree) -> Self {
        let mut meta = DocumentMeta {
            title: tree.title().unwrap_or_else(|| tree.docname.clone()),
            headings: tree.headings(),
            includes: tree.includes.clone(),
            images: tree.image_uris(),
            ..Default::default()
        };

        let mut pending: Vec<String> = Vec::new();
        walk(&tree.nodes, &mut |node| match node {
            Node::Target { name, .. } => pending.push(name.clone()),
            Node::Section(section) => {
                let title = crate::document::plain_text(&section.title);
                for label in pending.drain(..) {
                    meta.labels.insert(
                        label.clone(),
                        LabelTarget {
                            anchor: label,
                            title: Some(title.clone()),
                        },
                    );
                }
            }
            Node::Glossary { entries, .. } => {
                flush_labels(&mut pending, &mut meta.labels);
                for entry in entries {
                    meta.terms
                        .entry(normalize_term(&entry.term))
                        .or_insert_with(|| TermTarget {
                            term: entry.term.clone(),
                            anchor: entry.anchor.clone(),
                        });
                }
            }
            _ => flush_labels(&mut pending, &mut meta.labels),
        });
        flush_labels(&mut pending, &mut meta.labels);
        meta
    }
}

fn flush_labels(pending: &mut Vec<String>, labels: &mut BTreeMap<String, LabelTarget>) {
    for label in pending.drain(..) {
        labels.insert(
            label.clone(),
            LabelTarget {
                anchor: label,
                title: None,
            },
        );
    }
}

/// Frozen, read-only view of every document's metadata.
#[derive(Debug, Default, Clone)]
pub struct SiteIndex {
    documents: BTreeMap<String, DocumentMeta>,
    terms: HashMap<String, (String, TermTarget)>,
    labels: HashMap<String, (String, LabelTarget)>,
}

impl SiteIndex {
    /// Builds the index. When two documents define the same term or label,
    /// the first in docname order wins.
    pub fn build(documents: impl IntoIterator<Item = (String, DocumentMeta)>) -> Self {
        let documents: BTreeMap<String, DocumentMeta> = documents.into_iter().collect();
        let mut terms = HashMap::new();
        let mut labels = HashMap::new();

        for (docname, meta) in &documents {
            for (key, term) in &meta.terms {
                if terms.contains_key(key) {
                    debug!("Term \"{}\" in {} is already defined", term.term, docname);
                    continue;
                }
                terms.insert(key.clone(), (docname.clone(), term.clone()));
            }
            for (name, label) in &meta.labels {
                if labels.contains_key(name) {
                    debug!("Label \"{}\" in {} is already defined", name, docname);
                    continue;
                }
                labels.insert(name.clone(), (docname.clone(), label.clone()));
            }
        }

        Self {
            documents,
            terms,
            labels,
        }
    }

    pub fn document(&self, docname: &str) -> Option<&DocumentMeta> {
        self.documents.get(docname)
    }

    pub fn term(&self, key: &str) -> Option<(&str, &TermTarget)> {
        self.terms
            .get(key)
            .map(|(docname, term)| (docname.as_str(), term))
    }

    pub fn label(&self, name: &str) -> Option<(&str, &LabelTarget)> {
        self.labels
            .get(name)
            .map(|(docname, label)| (docname.as_str(), label))
    }

    /// Docnames that own a term or label here but not in `next`.
    pub fn displaced_owners(&self, next: &SiteIndex) -> BTreeSet<String> {
        let terms = self.terms.iter().filter_map(|(key, (owner, _))| {
            (next.term(key).map(|(docname, _)| docname) != Some(owner.as_str())).then_some(owner)
        });
        let labels = self.labels.iter().filter_map(|(name, (owner, _))| {
            (next.label(name).map(|(docname, _)| docname) != Some(owner.as_str())).then_some(owner)
        });
        terms.chain(labels).cloned().collect()
    }

    pub fn docnames(&self) -> impl Iterator<Item = &str> {
        self.documents.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Outcome of resolving one tree.
#[derive(Debug, Default)]
pub struct Resolution {
    pub dependencies: BTreeSet<String>,
    pub diagnostics: Vec<Diagnostic>,
    pub unresolved: usize,
}

pub struct Resolver<'a> {
    registry: &'a ExtensionRegistry,
    index: &'a SiteIndex,
    config: &'a BuildConfig,
}

impl<'a> Resolver<'a> {
    pub fn new(registry: &'a ExtensionRegistry, index: &'a SiteIndex, config: &'a BuildConfig) -> Self {
        Self {
            registry,
            index,
            config,
        }
    }

    /// Resolves every reference and toctree entry in place and substitutes
    /// the version placeholder in hyperlink URLs.
    pub fn resolve(&self, tree: &mut DocumentTree) -> Resolution {
        let docname = tree.docname.clone();
        let mut resolution = Resolution::default();

        walk_mut(&mut tree.nodes, &mut |node| {
            if let Node::TocTree(toctree) = node {
                for entry in toctree.entries.iter_mut() {
                    self.resolve_toctree_entry(&docname, entry, toctree.line, &mut resolution);
                }
            }
            for run in node.inline_runs_mut() {
                for inline in run.iter_mut() {
                    match inline {
                        Inline::Reference(reference) => {
                            self.resolve_reference(&docname, reference, &mut resolution)
                        }
                        Inline::Link { url, .. } => *url = self.config.substitute_version(url),
                        _ => {}
                    }
                }
            }
        });

        resolution
    }

    fn resolve_reference(
        &self,
        docname: &str,
        reference: &mut RoleReference,
        resolution: &mut Resolution,
    ) {
        let ctx = ResolveContext {
            docname,
            index: self.index,
            config: self.config,
        };
        let resolved = self
            .registry
            .reference(&reference.role)
            .and_then(|definition| definition.resolve(&ctx, &reference.target));

        let Some(resolved) = resolved else {
            resolution.unresolved += 1;
            resolution.diagnostics.push(Diagnostic::new(
                reference.line,
                WarningKind::UnresolvedReference,
                format!(
                    "unresolved {} reference '{}'",
                    reference.role, reference.target
                ),
            ));
            return;
        };

        let (href, external) = match resolved.destination {
            Destination::Document {
                docname: target,
                anchor,
            } => {
                if target != docname {
                    resolution.dependencies.insert(target.clone());
                }
                (page_href(docname, &target, anchor.as_deref()), false)
            }
            Destination::External(url) => (self.config.substitute_version(&url), true),
        };
        reference.resolved = Some(ResolvedLink {
            href,
            text: reference.label.clone().unwrap_or(resolved.text),
            external,
        });
    }

    fn resolve_toctree_entry(
        &self,
        docname: &str,
        entry: &mut TocTreeEntry,
        line: usize,
        resolution: &mut Resolution,
    ) {
        if entry.target.contains("://") {
            entry.resolved = Some(ResolvedLink {
                href: self.config.substitute_version(&entry.target),
                text: entry.title.clone().unwrap_or_else(|| entry.target.clone()),
                external: true,
            });
            return;
        }

        let target = utils::resolve_docname(docname, &entry.target);
        match target.as_deref().and_then(|t| self.index.document(t).map(|meta| (t, meta))) {
            Some((target, meta)) => {
                if target != docname {
                    resolution.dependencies.insert(target.to_string());
                }
                entry.resolved = Some(ResolvedLink {
                    href: utils::relative_page_url(docname, target),
                    text: entry.title.clone().unwrap_or_else(|| meta.title.clone()),
                    external: false,
                });
            }
            None => {
                resolution.unresolved += 1;
                resolution.diagnostics.push(Diagnostic::new(
                    line,
                    WarningKind::UnresolvedReference,
                    format!("toctree contains reference to nonexisting document '{}'", entry.target),
                ));
            }
        }
    }
}

fn page_href(from: &str, to: &str, anchor: Option<&str>) -> String {
    match anchor {
        Some(anchor) if from == to => format!("#{}", anchor),
        Some(anchor) => format!("{}#{}", utils::relative_page_url(from, to), anchor),
        None => utils::relative_page_url(from, to),
    }
}
