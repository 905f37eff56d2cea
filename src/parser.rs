//! reStructuredText parsing.
//!
//! [`RstEngine`] turns one source document into a [`DocumentTree`]. It is a
//! line-oriented block parser with a regex-driven inline pass. Directives
//! and roles are looked up in the [`ExtensionRegistry`]; unknown names are
//! reported as diagnostics and parsing continues. Only structural problems
//! that make the tree meaningless, such as inconsistent title levels, fail
//! the document with a [`ParseFailure`].

use lazy_static::lazy_static;
use log::debug;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::directives::DirectiveError;
use crate::document::{
    Diagnostic, DocumentTree, Inline, ListItem, Node, RoleReference, Section, SourceDocument,
};
use crate::error::WarningKind;
use crate::extensions::ExtensionRegistry;
use crate::renderer::slugify;
use crate::utils::{self, Fingerprint};

/// Characters allowed in section adornments.
const ADORNMENT_CHARS: &str = "=-`:'\"~^_*+#<>.";
const MAX_INCLUDE_DEPTH: usize = 10;

lazy_static! {
    static ref DIRECTIVE_RE: Regex =
        Regex::new(r"^\.\.\s+([A-Za-z0-9][\w:.+-]*)::(?:\s+(.*))?$").unwrap();
    static ref TARGET_RE: Regex = Regex::new(r"^\.\.\s+_([^:]+):(?:\s+(.*))?$").unwrap();
    static ref OPTION_RE: Regex = Regex::new(r"^:([\w-]+):(?:\s+(.*))?$").unwrap();
    static ref BULLET_RE: Regex = Regex::new(r"^([-*+])(\s+)(.*)$").unwrap();
    static ref ENUMERATED_RE: Regex = Regex::new(r"^(\d+|#)([.)])(\s+)(.*)$").unwrap();
    static ref INLINE_RE: Regex = Regex::new(
        r"(?x)
        :(?P<role>[A-Za-z][\w:+.-]*):`(?P<role_body>[^`]+)`
        | ``(?P<literal>.+?)``
        | `(?P<ref_body>[^`]+)`__?
        | `(?P<interp>[^`]+)`
        | \*\*(?P<strong>[^*]+)\*\*
        | \*(?P<em>[^*\s](?:[^*]*[^*\s])?)\*
        "
    )
    .unwrap();
}

/// A structural error that makes the whole document unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ParseFailure {
    pub line: usize,
    pub message: String,
}

impl ParseFailure {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// A markup language front end.
pub trait MarkupEngine: Send + Sync {
    /// Parses `document`. `content_root` is needed to resolve partial
    /// includes; in-memory content has none.
    fn parse(
        &self,
        document: &SourceDocument,
        registry: &ExtensionRegistry,
        content_root: Option<&Path>,
    ) -> Result<DocumentTree, ParseFailure>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RstEngine;

impl RstEngine {
    pub fn new() -> Self {
        Self
    }
}

impl MarkupEngine for RstEngine {
    fn parse(
        &self,
        document: &SourceDocument,
        registry: &ExtensionRegistry,
        content_root: Option<&Path>,
    ) -> Result<DocumentTree, ParseFailure> {
        let mut state = ParseState::new(registry, document, content_root);
        let lines: Vec<&str> = document.content.lines().collect();
        let flat = parse_blocks(&mut state, &lines, 1, true)?;
        let nodes = nest_sections(flatten_groups(flat));

        debug!(
            "Parsed {} ({} top-level nodes, {} diagnostics)",
            document.docname,
            nodes.len(),
            state.diagnostics.len()
        );

        Ok(DocumentTree {
            docname: document.docname.clone(),
            nodes,
            diagnostics: state.diagnostics,
            includes: state.includes,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TitleStyle {
    adornment: char,
    overline: bool,
}

/// Mutable state of one document parse.
pub(crate) struct ParseState<'r> {
    registry: &'r ExtensionRegistry,
    docname: String,
    content_root: Option<PathBuf>,
    /// Title styles in order of first appearance; index + 1 is the level.
    title_styles: Vec<TitleStyle>,
    current_level: usize,
    used_anchors: HashSet<String>,
    diagnostics: Vec<Diagnostic>,
    includes: BTreeMap<String, Fingerprint>,
    include_stack: Vec<String>,
}

impl<'r> ParseState<'r> {
    fn new(
        registry: &'r ExtensionRegistry,
        document: &SourceDocument,
        content_root: Option<&Path>,
    ) -> Self {
        Self {
            registry,
            docname: document.docname.clone(),
            content_root: content_root.map(Path::to_path_buf),
            title_styles: Vec::new(),
            current_level: 0,
            used_anchors: HashSet::new(),
            diagnostics: Vec::new(),
            includes: BTreeMap::new(),
            include_stack: Vec::new(),
        }
    }

    fn warn(&mut self, line: usize, kind: WarningKind, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::new(line, kind, message));
    }

    fn title_level(&mut self, style: TitleStyle, line: usize) -> Result<usize, ParseFailure> {
        let level = match self.title_styles.iter().position(|s| *s == style) {
            Some(index) => index + 1,
            None => {
                self.title_styles.push(style);
                self.title_styles.len()
            }
        };
        if level > self.current_level + 1 {
            return Err(ParseFailure::new(
                line,
                format!(
                    "title level inconsistent: level {} section follows level {}",
                    level, self.current_level
                ),
            ));
        }
        self.current_level = level;
        Ok(level)
    }

    fn unique_anchor(&mut self, title: &str) -> String {
        let mut base = slugify(title);
        if base.is_empty() {
            base = "section".to_string();
        }
        let mut anchor = base.clone();
        let mut n = 1;
        while !self.used_anchors.insert(anchor.clone()) {
            anchor = format!("{}-{}", base, n);
            n += 1;
        }
        anchor
    }

    pub(crate) fn parse_inline(&mut self, text: &str, line: usize) -> Vec<Inline> {
        let mut inlines = Vec::new();
        let mut last = 0;

        for caps in INLINE_RE.captures_iter(text) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            if whole.start() > last {
                inlines.push(Inline::Text(text[last..whole.start()].to_string()));
            }
            inlines.push(self.inline_from(&caps, line));
            last = whole.end();
        }
        if last < text.len() {
            inlines.push(Inline::Text(text[last..].to_string()));
        }
        inlines
    }

    fn inline_from(&mut self, caps: &Captures<'_>, line: usize) -> Inline {
        if let (Some(role), Some(body)) = (caps.name("role"), caps.name("role_body")) {
            let role = role.as_str();
            let (label, target) = split_label(body.as_str());
            if self.registry.reference(role).is_none() {
                self.warn(
                    line,
                    WarningKind::UnknownRole,
                    format!("Unknown interpreted text role \"{}\"", role),
                );
                return Inline::Text(label.unwrap_or(target).to_string());
            }
            return Inline::Reference(RoleReference {
                role: role.to_string(),
                target: target.to_string(),
                label: label.map(str::to_string),
                line,
                resolved: None,
            });
        }
        if let Some(literal) = caps.name("literal") {
            return Inline::Literal(literal.as_str().to_string());
        }
        if let Some(body) = caps.name("ref_body") {
            return hyperlink(body.as_str());
        }
        if let Some(interp) = caps.name("interp") {
            return Inline::Literal(interp.as_str().to_string());
        }
        if let Some(strong) = caps.name("strong") {
            return Inline::Strong(strong.as_str().to_string());
        }
        if let Some(em) = caps.name("em") {
            return Inline::Emphasis(em.as_str().to_string());
        }
        Inline::Text(caps[0].to_string())
    }

    fn resolve_include(&self, path: &str) -> Result<(String, PathBuf), DirectiveError> {
        let include_error = |reason: &str| DirectiveError::Include {
            path: path.to_string(),
            reason: reason.to_string(),
        };
        let root = self
            .content_root
            .as_ref()
            .ok_or_else(|| include_error("no content directory is configured"))?;

        let relative = match path.strip_prefix('/') {
            Some(absolute) => PathBuf::from(absolute),
            None => {
                let base = match self.include_stack.last() {
                    Some(including) => utils::docname_dir(including).to_string(),
                    None => utils::docname_dir(&self.docname).to_string(),
                };
                Path::new(&base).join(path)
            }
        };
        let relative = utils::normalize_lexically(&relative)
            .ok_or_else(|| include_error("path escapes the content directory"))?;
        Ok((utils::normalize_separators(&relative), root.join(relative)))
    }
}

/// Splits `label <target>` role bodies.
fn split_label(body: &str) -> (Option<&str>, &str) {
    let body = body.trim();
    if let Some(stripped) = body.strip_suffix('>') {
        if let Some(open) = stripped.rfind('<') {
            let label = stripped[..open].trim();
            let target = stripped[open + 1..].trim();
            if !label.is_empty() {
                return (Some(label), target);
            }
            return (None, target);
        }
    }
    (None, body)
}

fn hyperlink(body: &str) -> Inline {
    let (label, target) = split_label(body);
    match label {
        Some(text) if target.ends_with('_') => Inline::InternalLink {
            text: text.to_string(),
            anchor: slugify(target.trim_end_matches('_')),
        },
        Some(text) => Inline::Link {
            text: text.to_string(),
            url: target.to_string(),
        },
        None if body.trim().starts_with('<') => Inline::Link {
            text: target.to_string(),
            url: target.to_string(),
        },
        None => Inline::InternalLink {
            text: target.to_string(),
            anchor: slugify(target),
        },
    }
}

/// The view of the parser handed to a [`Directive`](crate::directives::Directive).
pub struct DirectiveContext<'s, 'r> {
    state: &'s mut ParseState<'r>,
    line: usize,
    body_line: usize,
    options: BTreeMap<String, String>,
    allow_sections: bool,
}

impl<'s, 'r> DirectiveContext<'s, 'r> {
    pub fn docname(&self) -> &str {
        &self.state.docname
    }

    /// Line of the directive marker.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Line where the directive body starts.
    pub fn body_line(&self) -> usize {
        self.body_line
    }

    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    pub fn has_option(&self, name: &str) -> bool {
        self.options.contains_key(name)
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    pub fn parse_nested(&mut self, body: &str) -> Result<Vec<Node>, DirectiveError> {
        let line = self.body_line;
        self.parse_nested_at(body, line)
    }

    /// Parses block content starting at source line `line`. Section titles
    /// are not recognized inside directives.
    pub fn parse_nested_at(&mut self, body: &str, line: usize) -> Result<Vec<Node>, DirectiveError> {
        let raw: Vec<&str> = body.lines().collect();
        let dedented = dedent(&raw);
        let lines: Vec<&str> = dedented.iter().map(String::as_str).collect();
        Ok(parse_blocks(self.state, &lines, line, false)?)
    }

    pub fn parse_inline(&mut self, text: &str) -> Vec<Inline> {
        self.state.parse_inline(text, self.line)
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.state
            .warn(self.line, WarningKind::DirectiveError, message);
    }

    /// Reads and parses a partial. The partial's fingerprint becomes part of
    /// the including document's cache key.
    pub fn include(&mut self, path: &str) -> Result<Vec<Node>, DirectiveError> {
        let (relative, absolute) = self.state.resolve_include(path)?;
        if self.state.include_stack.contains(&relative) {
            return Err(DirectiveError::Include {
                path: path.to_string(),
                reason: "recursive include".to_string(),
            });
        }
        if self.state.include_stack.len() >= MAX_INCLUDE_DEPTH {
            return Err(DirectiveError::Include {
                path: path.to_string(),
                reason: format!("includes nested deeper than {}", MAX_INCLUDE_DEPTH),
            });
        }

        let bytes = std::fs::read(&absolute).map_err(|e| DirectiveError::Include {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        self.state
            .includes
            .insert(relative.clone(), Fingerprint::of(&bytes));
        let content = String::from_utf8(bytes).map_err(|_| DirectiveError::Include {
            path: path.to_string(),
            reason: "content is not valid UTF-8".to_string(),
        })?;

        self.state.include_stack.push(relative);
        let lines: Vec<&str> = content.lines().collect();
        let result = parse_blocks(self.state, &lines, 1, self.allow_sections);
        self.state.include_stack.pop();
        Ok(result?)
    }
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn is_indented(line: &str) -> bool {
    line.starts_with(char::is_whitespace)
}

fn is_adornment(line: &str) -> bool {
    let trimmed = line.trim_end();
    let mut chars = trimmed.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    trimmed.chars().count() >= 2
        && ADORNMENT_CHARS.contains(first)
        && chars.all(|c| c == first)
        && !is_indented(line)
}

fn indent_width(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

/// Removes the common leading whitespace; blank lines become empty.
fn dedent(lines: &[&str]) -> Vec<String> {
    let width = lines
        .iter()
        .filter(|line| !is_blank(line))
        .map(|line| indent_width(line))
        .min()
        .unwrap_or(0);
    lines
        .iter()
        .map(|line| {
            if is_blank(line) {
                String::new()
            } else {
                line.chars().skip(width).collect()
            }
        })
        .collect()
}

/// End (exclusive) of the indented block starting at `start`, trailing blank
/// lines excluded.
fn indented_block_end(lines: &[&str], start: usize) -> usize {
    let mut end = start;
    let mut last_content = start;
    while end < lines.len() && (is_blank(lines[end]) || is_indented(lines[end])) {
        end += 1;
        if !is_blank(lines[end - 1]) {
            last_content = end;
        }
    }
    last_content
}

/// Parses a run of block-level lines. `first_line` is the source line of
/// `lines[0]`.
fn parse_blocks(
    state: &mut ParseState<'_>,
    lines: &[&str],
    first_line: usize,
    allow_sections: bool,
) -> Result<Vec<Node>, ParseFailure> {
    let mut nodes = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let line_no = first_line + i;

        if is_blank(line) {
            i += 1;
            continue;
        }

        if is_indented(line) {
            let end = indented_block_end(lines, i).max(i + 1);
            let dedented = dedent(&lines[i..end]);
            let inner: Vec<&str> = dedented.iter().map(String::as_str).collect();
            let children = parse_blocks(state, &inner, line_no, false)?;
            if !children.is_empty() {
                nodes.push(Node::BlockQuote {
                    children,
                    line: line_no,
                });
            }
            i = end;
            continue;
        }

        if let Some(caps) = DIRECTIVE_RE.captures(line) {
            let name = caps[1].to_string();
            let arguments = caps.get(2).map_or("", |m| m.as_str()).trim().to_string();
            let end = indented_block_end(lines, i + 1);
            if let Some(node) = parse_directive(
                state,
                &name,
                &arguments,
                &lines[i + 1..end],
                line_no,
                allow_sections,
            )? {
                nodes.push(node);
            }
            i = end.max(i + 1);
            continue;
        }

        if let Some(caps) = TARGET_RE.captures(line) {
            let name = caps[1].trim().to_lowercase();
            nodes.push(Node::Target {
                name,
                line: line_no,
            });
            i += 1;
            continue;
        }

        if line.starts_with("..") && (line.len() == 2 || line[2..].starts_with(char::is_whitespace)) {
            // Comment
            i = indented_block_end(lines, i + 1).max(i + 1);
            continue;
        }

        if allow_sections {
            if let Some((title, style, consumed)) = match_title(lines, i) {
                let level = state.title_level(style, line_no)?;
                let inline = state.parse_inline(title, line_no);
                let anchor = state.unique_anchor(&crate::document::plain_text(&inline));
                nodes.push(Node::Section(Section {
                    title: inline,
                    level,
                    anchor,
                    line: line_no,
                    children: Vec::new(),
                }));
                i += consumed;
                continue;
            }
        }

        if is_adornment(line) && line.trim().chars().count() >= 4 {
            // Transition
            i += 1;
            continue;
        }

        if BULLET_RE.is_match(line) || ENUMERATED_RE.is_match(line) {
            let (node, end) = parse_list(state, lines, i, first_line)?;
            nodes.push(node);
            i = end;
            continue;
        }

        i = parse_paragraph(state, lines, i, first_line, &mut nodes)?;
    }

    Ok(nodes)
}

/// Recognizes an underlined or over-and-underlined title at `i`.
fn match_title<'l>(lines: &[&'l str], i: usize) -> Option<(&'l str, TitleStyle, usize)> {
    let line = lines[i];

    if is_adornment(line) && i + 2 < lines.len() {
        let text = lines[i + 1];
        let under = lines[i + 2].trim_end();
        if !is_blank(text) && under == line.trim_end() {
            let adornment = line.chars().next()?;
            if line.trim_end().chars().count() >= text.trim().chars().count() {
                return Some((
                    text.trim(),
                    TitleStyle {
                        adornment,
                        overline: true,
                    },
                    3,
                ));
            }
        }
    }

    if is_adornment(line) || is_indented(line) || i + 1 >= lines.len() {
        return None;
    }
    let underline = lines[i + 1];
    if !is_adornment(underline) {
        return None;
    }
    if underline.trim_end().chars().count() < line.trim_end().chars().count() {
        return None;
    }
    let adornment = underline.chars().next()?;
    Some((
        line.trim(),
        TitleStyle {
            adornment,
            overline: false,
        },
        2,
    ))
}

fn parse_directive(
    state: &mut ParseState<'_>,
    name: &str,
    arguments: &str,
    block: &[&str],
    line: usize,
    allow_sections: bool,
) -> Result<Option<Node>, ParseFailure> {
    let registry = state.registry;
    let Some(directive) = registry.directive(name) else {
        state.warn(
            line,
            WarningKind::UnknownDirective,
            format!("Unknown directive type \"{}\"", name),
        );
        return Ok(None);
    };

    let dedented = dedent(block);
    let mut options = BTreeMap::new();
    let mut j = 0;
    while j < dedented.len() {
        let Some(caps) = OPTION_RE.captures(&dedented[j]) else {
            break;
        };
        options.insert(
            caps[1].to_string(),
            caps.get(2).map_or("", |m| m.as_str()).trim().to_string(),
        );
        j += 1;
    }
    while j < dedented.len() && dedented[j].is_empty() {
        j += 1;
    }
    let body = dedented[j..].join("\n");

    let mut ctx = DirectiveContext {
        state: &mut *state,
        line,
        body_line: line + 1 + j,
        options,
        allow_sections,
    };
    match directive.render(arguments, &body, &mut ctx) {
        Ok(node) => Ok(Some(node)),
        Err(DirectiveError::Parse(failure)) => Err(failure),
        Err(e) => {
            state.warn(
                line,
                WarningKind::DirectiveError,
                format!("{} directive: {}", name, e),
            );
            Ok(None)
        }
    }
}

fn list_marker<'l>(line: &'l str) -> Option<(bool, String, usize, &'l str)> {
    if let Some(caps) = BULLET_RE.captures(line) {
        let width = caps[1].len() + caps[2].chars().count();
        let text = caps.get(3).map_or("", |m| m.as_str());
        return Some((false, caps[1].to_string(), width, text));
    }
    if let Some(caps) = ENUMERATED_RE.captures(line) {
        let width = caps[1].len() + caps[2].len() + caps[3].chars().count();
        let text = caps.get(4).map_or("", |m| m.as_str());
        return Some((true, caps[2].to_string(), width, text));
    }
    None
}

fn parse_list(
    state: &mut ParseState<'_>,
    lines: &[&str],
    start: usize,
    first_line: usize,
) -> Result<(Node, usize), ParseFailure> {
    let (ordered, kind, _, _) = match list_marker(lines[start]) {
        Some(marker) => marker,
        None => return Err(ParseFailure::new(first_line + start, "expected a list item")),
    };
    let mut items = Vec::new();
    let mut i = start;

    while i < lines.len() {
        let Some((item_ordered, item_kind, _, text)) = list_marker(lines[i]) else {
            break;
        };
        if item_ordered != ordered || item_kind != kind {
            break;
        }
        let item_line = first_line + i;
        let end = indented_block_end(lines, i + 1);
        let mut item_lines = vec![text.to_string()];
        item_lines.extend(dedent(&lines[i + 1..end]));
        let inner: Vec<&str> = item_lines.iter().map(String::as_str).collect();
        let children = parse_blocks(state, &inner, item_line, false)?;
        items.push(ListItem { children });

        i = end.max(i + 1);
        while i < lines.len() && is_blank(lines[i]) {
            i += 1;
        }
    }

    // Trailing blank lines belong to whatever follows.
    while i > start && is_blank(lines[i - 1]) {
        i -= 1;
    }

    Ok((
        Node::List {
            ordered,
            items,
            line: first_line + start,
        },
        i,
    ))
}

/// Parses a paragraph and the literal block a trailing `::` introduces.
/// Returns the index of the first unconsumed line.
fn parse_paragraph(
    state: &mut ParseState<'_>,
    lines: &[&str],
    start: usize,
    first_line: usize,
    nodes: &mut Vec<Node>,
) -> Result<usize, ParseFailure> {
    let mut i = start;
    let mut text_lines = Vec::new();
    while i < lines.len() && !is_blank(lines[i]) {
        text_lines.push(lines[i].trim());
        i += 1;
    }
    let mut text = text_lines.join(" ");
    let line = first_line + start;

    let literal_follows = text.ends_with("::");
    if literal_follows {
        text = if text == "::" {
            String::new()
        } else if let Some(stripped) = text.strip_suffix(" ::") {
            stripped.to_string()
        } else {
            text[..text.len() - 1].to_string()
        };
    }

    if !text.is_empty() {
        let content = state.parse_inline(&text, line);
        nodes.push(Node::Paragraph { content, line });
    }

    if literal_follows {
        let mut j = i;
        while j < lines.len() && is_blank(lines[j]) {
            j += 1;
        }
        if j < lines.len() && is_indented(lines[j]) {
            let end = indented_block_end(lines, j);
            let code = dedent(&lines[j..end]).join("\n");
            nodes.push(Node::LiteralBlock {
                language: None,
                code,
                line: first_line + j,
            });
            return Ok(end);
        }
    }

    Ok(i)
}

/// Splices top-level `include` groups into the surrounding flow so their
/// sections nest with the including document's.
fn flatten_groups(nodes: Vec<Node>) -> Vec<Node> {
    let mut flat = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            Node::Group { children } => flat.extend(flatten_groups(children)),
            other => flat.push(other),
        }
    }
    flat
}

/// Turns a flat node list into nested sections by title level.
fn nest_sections(flat: Vec<Node>) -> Vec<Node> {
    let mut roots = Vec::new();
    let mut open: Vec<Section> = Vec::new();

    for node in flat {
        match node {
            Node::Section(section) => {
                while open.last().is_some_and(|top| top.level >= section.level) {
                    close_section(&mut open, &mut roots);
                }
                open.push(section);
            }
            other => match open.last_mut() {
                Some(top) => top.children.push(other),
                None => roots.push(other),
            },
        }
    }
    while !open.is_empty() {
        close_section(&mut open, &mut roots);
    }
    roots
}

fn close_section(open: &mut Vec<Section>, roots: &mut Vec<Node>) {
    if let Some(done) = open.pop() {
        match open.last_mut() {
            Some(parent) => parent.children.push(Node::Section(done)),
            None => roots.push(Node::Section(done)),
        }
    }
}
