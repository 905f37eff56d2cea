//! Source documents, the parsed document tree, and rendered pages.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::discovery::SourceFile;
use crate::error::{BuildError, WarningKind};
use crate::utils::{self, Fingerprint};

/// A content file loaded for building.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub docname: String,
    pub relative_path: PathBuf,
    /// `None` for in-memory content.
    pub absolute_path: Option<PathBuf>,
    pub content: String,
    pub fingerprint: Fingerprint,
}

impl SourceDocument {
    /// Reads a discovered file. Content that is not valid UTF-8 is a parse
    /// error for this document only.
    pub fn load(file: &SourceFile) -> Result<Self, BuildError> {
        let bytes = std::fs::read(&file.absolute_path)?;
        let fingerprint = Fingerprint::of(&bytes);
        let content = String::from_utf8(bytes).map_err(|e| BuildError::Parse {
            path: file.relative_path.clone(),
            line: 1,
            message: format!("content is not valid UTF-8: {}", e),
        })?;
        Ok(Self {
            docname: file.docname.clone(),
            relative_path: file.relative_path.clone(),
            absolute_path: Some(file.absolute_path.clone()),
            content,
            fingerprint,
        })
    }

    pub fn from_string(docname: &str, content: &str) -> Self {
        Self {
            docname: docname.to_string(),
            relative_path: PathBuf::from(format!("{}.rst", docname)),
            absolute_path: None,
            content: content.to_string(),
            fingerprint: Fingerprint::of(content.as_bytes()),
        }
    }

    /// Directory of the document, relative to the content root.
    pub fn relative_dir(&self) -> &str {
        utils::docname_dir(&self.docname)
    }

    pub fn html_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.html", self.docname))
    }

    pub fn json_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.json", self.docname))
    }
}

/// Inline content of paragraphs, titles and captions.
#[derive(Debug, Clone, PartialEq)]
pub enum Inline {
    Text(String),
    Emphasis(String),
    Strong(String),
    Literal(String),
    /// An interpreted-text role such as `:term:` or `:doc:`.
    Reference(RoleReference),
    /// `` `text <https://...>`_ ``
    Link { text: String, url: String },
    /// `` `Target`_ `` pointing at an anchor on the same page.
    InternalLink { text: String, anchor: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoleReference {
    pub role: String,
    pub target: String,
    /// Explicit label from `label <target>` syntax.
    pub label: Option<String>,
    pub line: usize,
    /// Filled in during cross-reference resolution.
    pub resolved: Option<ResolvedLink>,
}

impl RoleReference {
    /// Text shown when the reference cannot be resolved.
    pub fn fallback_text(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.target)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLink {
    pub href: String,
    pub text: String,
    pub external: bool,
}

/// Plain text of an inline run, markup stripped.
pub fn plain_text(inlines: &[Inline]) -> String {
    let mut text = String::new();
    for inline in inlines {
        match inline {
            Inline::Text(t) | Inline::Emphasis(t) | Inline::Strong(t) | Inline::Literal(t) => {
                text.push_str(t)
            }
            Inline::Reference(reference) => match &reference.resolved {
                Some(link) => text.push_str(&link.text),
                None => text.push_str(reference.fallback_text()),
            },
            Inline::Link { text: t, .. } | Inline::InternalLink { text: t, .. } => {
                text.push_str(t)
            }
        }
    }
    text
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub title: Vec<Inline>,
    pub level: usize,
    pub anchor: String,
    pub line: usize,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub uri: String,
    pub alt: Option<String>,
    pub width: Option<String>,
    pub class: Option<String>,
    /// Present for figures.
    pub caption: Option<Vec<Inline>>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlossaryEntry {
    pub term: String,
    pub anchor: String,
    pub definition: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TocTree {
    pub caption: Option<String>,
    pub hidden: bool,
    pub entries: Vec<TocTreeEntry>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TocTreeEntry {
    pub title: Option<String>,
    pub target: String,
    pub resolved: Option<ResolvedLink>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListItem {
    pub children: Vec<Node>,
}

/// A block-level node of the document tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Section(Section),
    Paragraph {
        content: Vec<Inline>,
        line: usize,
    },
    LiteralBlock {
        language: Option<String>,
        code: String,
        line: usize,
    },
    List {
        ordered: bool,
        items: Vec<ListItem>,
        line: usize,
    },
    BlockQuote {
        children: Vec<Node>,
        line: usize,
    },
    Admonition {
        class: String,
        label: String,
        children: Vec<Node>,
        line: usize,
    },
    Image(Image),
    Glossary {
        entries: Vec<GlossaryEntry>,
        line: usize,
    },
    TocTree(TocTree),
    /// `.. _name:` hyperlink target.
    Target {
        name: String,
        line: usize,
    },
    /// Nodes spliced in from another file, e.g. by `include`.
    Group {
        children: Vec<Node>,
    },
}

impl Node {
    /// Child block nodes, in document order.
    pub fn children(&self) -> Vec<&Node> {
        match self {
            Node::Section(section) => section.children.iter().collect(),
            Node::List { items, .. } => items.iter().flat_map(|i| i.children.iter()).collect(),
            Node::BlockQuote { children, .. }
            | Node::Admonition { children, .. }
            | Node::Group { children } => children.iter().collect(),
            Node::Glossary { entries, .. } => {
                entries.iter().flat_map(|e| e.definition.iter()).collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut Node> {
        match self {
            Node::Section(section) => section.children.iter_mut().collect(),
            Node::List { items, .. } => items
                .iter_mut()
                .flat_map(|i| i.children.iter_mut())
                .collect(),
            Node::BlockQuote { children, .. }
            | Node::Admonition { children, .. }
            | Node::Group { children } => children.iter_mut().collect(),
            Node::Glossary { entries, .. } => entries
                .iter_mut()
                .flat_map(|e| e.definition.iter_mut())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Inline runs held directly by this node.
    pub fn inline_runs(&self) -> Vec<&Vec<Inline>> {
        match self {
            Node::Paragraph { content, .. } => vec![content],
            Node::Section(section) => vec![&section.title],
            Node::Image(image) => image.caption.iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn inline_runs_mut(&mut self) -> Vec<&mut Vec<Inline>> {
        match self {
            Node::Paragraph { content, .. } => vec![content],
            Node::Section(section) => vec![&mut section.title],
            Node::Image(image) => image.caption.iter_mut().collect(),
            _ => Vec::new(),
        }
    }
}

/// Visits every node depth-first, parents before children.
pub fn walk<'a>(nodes: &'a [Node], f: &mut impl FnMut(&'a Node)) {
    for node in nodes {
        f(node);
        for child in node.children() {
            walk(std::slice::from_ref(child), f);
        }
    }
}

pub fn walk_mut(nodes: &mut [Node], f: &mut impl FnMut(&mut Node)) {
    for node in nodes.iter_mut() {
        walk_node_mut(node, f);
    }
}

fn walk_node_mut(node: &mut Node, f: &mut impl FnMut(&mut Node)) {
    f(node);
    for child in node.children_mut() {
        walk_node_mut(child, f);
    }
}

/// A recoverable problem found while parsing or resolving a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub line: usize,
    pub kind: WarningKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(line: usize, kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            line,
            kind,
            message: message.into(),
        }
    }
}

/// A heading in the document outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    pub title: String,
    pub level: usize,
    pub anchor: String,
}

/// The parsed form of one document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentTree {
    pub docname: String,
    pub nodes: Vec<Node>,
    pub diagnostics: Vec<Diagnostic>,
    /// Included partials, keyed by their path relative to the content root.
    pub includes: BTreeMap<String, Fingerprint>,
}

impl DocumentTree {
    /// The first section title, if any.
    pub fn title(&self) -> Option<String> {
        let mut title = None;
        walk(&self.nodes, &mut |node| {
            if title.is_none() {
                if let Node::Section(section) = node {
                    title = Some(plain_text(&section.title));
                }
            }
        });
        title
    }

    /// All section headings in document order.
    pub fn headings(&self) -> Vec<TocEntry> {
        let mut headings = Vec::new();
        walk(&self.nodes, &mut |node| {
            if let Node::Section(section) = node {
                headings.push(TocEntry {
                    title: plain_text(&section.title),
                    level: section.level,
                    anchor: section.anchor.clone(),
                });
            }
        });
        headings
    }

    /// Image URIs in document order.
    pub fn image_uris(&self) -> Vec<String> {
        let mut uris = Vec::new();
        walk(&self.nodes, &mut |node| {
            if let Node::Image(image) = node {
                uris.push(image.uri.clone());
            }
        });
        uris
    }
}

/// The output of rendering one document.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub docname: String,
    /// HTML output path relative to the output root.
    pub output_path: PathBuf,
    /// JSON output path relative to the output root, when enabled.
    pub json_path: Option<PathBuf>,
    pub title: String,
    pub toc: Vec<TocEntry>,
    /// Rendered body, without the theme's page chrome.
    pub body: String,
    /// Complete themed page.
    pub html: String,
    pub json: Option<String>,
    /// Public URLs of the images this page references.
    pub images: Vec<String>,
}

impl RenderedPage {
    /// Writes the HTML (and JSON) files under `output_root`.
    pub fn write(&self, output_root: &Path) -> std::io::Result<()> {
        write_file(&output_root.join(&self.output_path), &self.html)?;
        if let (Some(path), Some(json)) = (&self.json_path, &self.json) {
            write_file(&output_root.join(path), json)?;
        }
        Ok(())
    }

    pub fn output_fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self.html.as_bytes())
    }
}

fn write_file(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)
}
