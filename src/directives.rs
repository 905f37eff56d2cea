//! Block directives (`.. name:: arguments`).
//!
//! A directive receives its arguments, its dedented body and a
//! [`DirectiveContext`] through which it can parse nested content, read
//! option fields, pull in partial files and report warnings.

use thiserror::Error;

use crate::document::{GlossaryEntry, Image, Node, TocTree, TocTreeEntry};
use crate::extensions::RegistryBuilder;
use crate::parser::{DirectiveContext, ParseFailure};
use crate::renderer::slugify;

#[derive(Debug, Error)]
pub enum DirectiveError {
    #[error("the \"{0}\" directive requires an argument")]
    MissingArgument(&'static str),

    #[error("{0}")]
    Invalid(String),

    #[error("cannot include \"{path}\": {reason}")]
    Include { path: String, reason: String },

    /// Nested content is malformed; fails the whole document.
    #[error(transparent)]
    Parse(#[from] ParseFailure),
}

pub trait Directive: Send + Sync {
    fn render(
        &self,
        arguments: &str,
        body: &str,
        ctx: &mut DirectiveContext<'_, '_>,
    ) -> Result<Node, DirectiveError>;
}

/// Names and labels of the admonition family.
pub const ADMONITIONS: &[(&str, &str)] = &[
    ("note", "Note"),
    ("tip", "Tip"),
    ("hint", "Hint"),
    ("important", "Important"),
    ("attention", "Attention"),
    ("caution", "Caution"),
    ("warning", "Warning"),
    ("danger", "Danger"),
    ("error", "Error"),
    ("seealso", "See also"),
];

pub(crate) fn register_builtin_directives(builder: &mut RegistryBuilder) {
    for (name, label) in ADMONITIONS {
        builder.register_directive(*name, Admonition::new(name, label));
    }
    builder
        .register_directive("admonition", GenericAdmonition)
        .register_directive("code-block", CodeBlock)
        .register_directive("code", CodeBlock)
        .register_directive("image", ImageDirective)
        .register_directive("figure", FigureDirective)
        .register_directive("glossary", GlossaryDirective)
        .register_directive("include", IncludeDirective)
        .register_directive("toctree", TocTreeDirective);
}

/// A boxed callout such as `note` or `warning`.
#[derive(Debug, Clone)]
pub struct Admonition {
    class: String,
    label: String,
}

impl Admonition {
    pub fn new(name: &str, label: &str) -> Self {
        Self {
            class: format!("admonition admonition-{}", name),
            label: label.to_string(),
        }
    }
}

impl Directive for Admonition {
    fn render(
        &self,
        arguments: &str,
        body: &str,
        ctx: &mut DirectiveContext<'_, '_>,
    ) -> Result<Node, DirectiveError> {
        // Text on the directive line belongs to the body.
        let content = if arguments.trim().is_empty() {
            body.to_string()
        } else if body.trim().is_empty() {
            arguments.to_string()
        } else {
            format!("{}\n{}", arguments, body)
        };
        let children = ctx.parse_nested(&content)?;
        Ok(Node::Admonition {
            class: self.class.clone(),
            label: self.label.clone(),
            children,
            line: ctx.line(),
        })
    }
}

/// `.. admonition:: Title` with a caller-chosen label.
#[derive(Debug, Clone, Copy)]
pub struct GenericAdmonition;

impl Directive for GenericAdmonition {
    fn render(
        &self,
        arguments: &str,
        body: &str,
        ctx: &mut DirectiveContext<'_, '_>,
    ) -> Result<Node, DirectiveError> {
        let label = arguments.trim();
        if label.is_empty() {
            return Err(DirectiveError::MissingArgument("admonition"));
        }
        let mut class = "admonition".to_string();
        if let Some(extra) = ctx.option("class") {
            class.push(' ');
            class.push_str(extra);
        }
        let children = ctx.parse_nested(body)?;
        Ok(Node::Admonition {
            class,
            label: label.to_string(),
            children,
            line: ctx.line(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CodeBlock;

impl Directive for CodeBlock {
    fn render(
        &self,
        arguments: &str,
        body: &str,
        ctx: &mut DirectiveContext<'_, '_>,
    ) -> Result<Node, DirectiveError> {
        let language = arguments.split_whitespace().next().map(str::to_string);
        if body.trim().is_empty() {
            ctx.warn("code-block has no content");
        }
        Ok(Node::LiteralBlock {
            language,
            code: body.trim_end().to_string(),
            line: ctx.line(),
        })
    }
}

fn image_from(
    directive: &'static str,
    arguments: &str,
    ctx: &DirectiveContext<'_, '_>,
) -> Result<Image, DirectiveError> {
    let uri: String = arguments.split_whitespace().collect();
    if uri.is_empty() {
        return Err(DirectiveError::MissingArgument(directive));
    }
    Ok(Image {
        uri,
        alt: ctx.option("alt").map(str::to_string),
        width: ctx.option("width").map(str::to_string),
        class: ctx.option("class").map(str::to_string),
        caption: None,
        line: ctx.line(),
    })
}

#[derive(Debug, Clone, Copy)]
pub struct ImageDirective;

impl Directive for ImageDirective {
    fn render(
        &self,
        arguments: &str,
        _body: &str,
        ctx: &mut DirectiveContext<'_, '_>,
    ) -> Result<Node, DirectiveError> {
        Ok(Node::Image(image_from("image", arguments, ctx)?))
    }
}

/// An image with the first body paragraph as its caption.
#[derive(Debug, Clone, Copy)]
pub struct FigureDirective;

impl Directive for FigureDirective {
    fn render(
        &self,
        arguments: &str,
        body: &str,
        ctx: &mut DirectiveContext<'_, '_>,
    ) -> Result<Node, DirectiveError> {
        let mut image = image_from("figure", arguments, ctx)?;
        let caption: Vec<&str> = body
            .lines()
            .skip_while(|line| line.trim().is_empty())
            .take_while(|line| !line.trim().is_empty())
            .map(str::trim)
            .collect();
        if !caption.is_empty() {
            image.caption = Some(ctx.parse_inline(&caption.join(" ")));
        }
        Ok(Node::Image(image))
    }
}

/// Term definitions. Unindented lines are terms; the indented block
/// following one or more terms is their shared definition.
#[derive(Debug, Clone, Copy)]
pub struct GlossaryDirective;

impl Directive for GlossaryDirective {
    fn render(
        &self,
        _arguments: &str,
        body: &str,
        ctx: &mut DirectiveContext<'_, '_>,
    ) -> Result<Node, DirectiveError> {
        let lines: Vec<&str> = body.lines().collect();
        let mut entries = Vec::new();
        let mut i = 0;

        while i < lines.len() {
            if lines[i].trim().is_empty() {
                i += 1;
                continue;
            }
            if lines[i].starts_with(char::is_whitespace) {
                return Err(DirectiveError::Invalid(format!(
                    "glossary definition without a term: \"{}\"",
                    lines[i].trim()
                )));
            }

            let mut terms = Vec::new();
            while i < lines.len()
                && !lines[i].trim().is_empty()
                && !lines[i].starts_with(char::is_whitespace)
            {
                terms.push(lines[i].trim().to_string());
                i += 1;
            }

            let definition_start = i;
            while i < lines.len()
                && (lines[i].trim().is_empty() || lines[i].starts_with(char::is_whitespace))
            {
                i += 1;
            }
            let definition_text = lines[definition_start..i].join("\n");
            let definition =
                ctx.parse_nested_at(&definition_text, ctx.body_line() + definition_start)?;

            for term in terms {
                let anchor = format!("term-{}", slugify(&term));
                entries.push(GlossaryEntry {
                    term,
                    anchor,
                    definition: definition.clone(),
                });
            }
        }

        if ctx.has_option("sorted") {
            entries.sort_by_key(|entry| entry.term.to_lowercase());
        }

        Ok(Node::Glossary {
            entries,
            line: ctx.line(),
        })
    }
}

/// Splices a partial file into the document.
#[derive(Debug, Clone, Copy)]
pub struct IncludeDirective;

impl Directive for IncludeDirective {
    fn render(
        &self,
        arguments: &str,
        _body: &str,
        ctx: &mut DirectiveContext<'_, '_>,
    ) -> Result<Node, DirectiveError> {
        let path = arguments.trim();
        if path.is_empty() {
            return Err(DirectiveError::MissingArgument("include"));
        }
        let children = ctx.include(path)?;
        Ok(Node::Group { children })
    }
}

/// Table of contents. Entries are document paths, optionally written as
/// `Title <path>`.
#[derive(Debug, Clone, Copy)]
pub struct TocTreeDirective;

impl Directive for TocTreeDirective {
    fn render(
        &self,
        _arguments: &str,
        body: &str,
        ctx: &mut DirectiveContext<'_, '_>,
    ) -> Result<Node, DirectiveError> {
        let entries = body
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(parse_toctree_entry)
            .collect();
        Ok(Node::TocTree(TocTree {
            caption: ctx.option("caption").map(str::to_string),
            hidden: ctx.has_option("hidden"),
            entries,
            line: ctx.line(),
        }))
    }
}

fn parse_toctree_entry(line: &str) -> TocTreeEntry {
    if let Some(stripped) = line.strip_suffix('>') {
        if let Some(open) = stripped.rfind('<') {
            let title = stripped[..open].trim();
            if !title.is_empty() {
                return TocTreeEntry {
                    title: Some(title.to_string()),
                    target: stripped[open + 1..].trim().to_string(),
                    resolved: None,
                };
            }
        }
    }
    TocTreeEntry {
        title: None,
        target: line.to_string(),
        resolved: None,
    }
}
