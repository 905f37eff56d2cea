//! Document-tree-to-HTML renderer and the JSON page summary.

use serde::Serialize;
use syntect::highlighting::ThemeSet;
use syntect::html::highlighted_html_for_string;
use syntect::parsing::SyntaxSet;

use crate::document::{Image, Inline, Node, Section, TocEntry, TocTree};

/// HTML renderer for resolved document trees.
pub struct HtmlRenderer {
    /// Syntax definitions for code highlighting
    syntax_set: SyntaxSet,
    /// Theme for code highlighting
    theme_set: ThemeSet,
    /// Name of the theme to use for highlighting
    theme_name: String,
}

impl Default for HtmlRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl HtmlRenderer {
    pub fn new() -> Self {
        Self {
            syntax_set: SyntaxSet::load_defaults_newlines(),
            theme_set: ThemeSet::load_defaults(),
            theme_name: "InspiredGitHub".to_string(),
        }
    }

    /// Set the syntax highlighting theme.
    /// Available themes: "InspiredGitHub", "Solarized (dark)", "Solarized (light)",
    /// "base16-ocean.dark", "base16-eighties.dark", "base16-mocha.dark", "base16-ocean.light"
    pub fn set_highlight_theme(&mut self, theme_name: &str) {
        if self.theme_set.themes.contains_key(theme_name) {
            self.theme_name = theme_name.to_string();
        }
    }

    /// Highlight code with syntax highlighting, falling back to plain text if language is unknown.
    fn highlight_code(&self, code: &str, language: &str) -> String {
        let theme = &self.theme_set.themes[&self.theme_name];

        let syntax = self
            .syntax_set
            .find_syntax_by_token(language)
            .or_else(|| self.syntax_set.find_syntax_by_extension(language))
            .unwrap_or_else(|| self.syntax_set.find_syntax_plain_text());

        let highlighted = match highlighted_html_for_string(code, &self.syntax_set, syntax, theme) {
            Ok(html) => html,
            Err(_) => format!("<pre><code>{}</code></pre>", html_escape::encode_text(code)),
        };
        format!(
            "<div class=\"highlight-{}\">{}</div>\n",
            html_escape::encode_double_quoted_attribute(language),
            highlighted
        )
    }

    /// Renders block nodes to an HTML fragment.
    pub fn render_nodes(&self, nodes: &[Node]) -> String {
        nodes.iter().map(|node| self.render_node(node)).collect()
    }

    fn render_node(&self, node: &Node) -> String {
        match node {
            Node::Section(section) => self.render_section(section),

            Node::Paragraph { content, .. } => format!("<p>{}</p>\n", self.render_inline(content)),

            Node::LiteralBlock {
                language: Some(language),
                code,
                ..
            } => self.highlight_code(code, language),

            Node::LiteralBlock { code, .. } => format!(
                "<pre class=\"literal-block\">{}</pre>\n",
                html_escape::encode_text(code)
            ),

            Node::List { ordered, items, .. } => {
                let items_html: String = items
                    .iter()
                    .map(|item| match item.children.as_slice() {
                        [Node::Paragraph { content, .. }] => {
                            format!("<li>{}</li>\n", self.render_inline(content))
                        }
                        children => format!("<li>{}</li>\n", self.render_nodes(children)),
                    })
                    .collect();
                if *ordered {
                    format!("<ol>\n{}</ol>\n", items_html)
                } else {
                    // class="simple" like Sphinx
                    format!("<ul class=\"simple\">\n{}</ul>\n", items_html)
                }
            }

            Node::BlockQuote { children, .. } => {
                format!("<blockquote>\n{}</blockquote>\n", self.render_nodes(children))
            }

            Node::Admonition {
                class,
                label,
                children,
                ..
            } => format!(
                "<div class=\"{}\">\n<p class=\"admonition-title\">{}</p>\n{}</div>\n",
                html_escape::encode_double_quoted_attribute(class),
                html_escape::encode_text(label),
                self.render_nodes(children)
            ),

            Node::Image(image) => self.render_image(image),

            Node::Glossary { entries, .. } => {
                let mut html = String::from("<dl class=\"glossary\">\n");
                for entry in entries {
                    html.push_str(&format!(
                        "<dt id=\"{anchor}\">{term}<a class=\"headerlink\" href=\"#{anchor}\" title=\"Link to this term\">¶</a></dt>\n<dd>\n{definition}</dd>\n",
                        anchor = html_escape::encode_double_quoted_attribute(&entry.anchor),
                        term = html_escape::encode_text(&entry.term),
                        definition = self.render_nodes(&entry.definition)
                    ));
                }
                html.push_str("</dl>\n");
                html
            }

            Node::TocTree(toctree) => self.render_toctree(toctree),

            // Invisible anchor that can be linked to
            Node::Target { name, .. } => format!(
                "<span id=\"{}\"></span>\n",
                html_escape::encode_double_quoted_attribute(name)
            ),

            Node::Group { children } => self.render_nodes(children),
        }
    }

    /// The section id sits on the `<section>` tag; the heading carries a
    /// Sphinx-style headerlink.
    fn render_section(&self, section: &Section) -> String {
        let level = section.level.clamp(1, 6);
        let anchor = html_escape::encode_double_quoted_attribute(&section.anchor);
        format!(
            "<section id=\"{anchor}\">\n<h{level}>{title}<a class=\"headerlink\" href=\"#{anchor}\" title=\"Link to this heading\">¶</a></h{level}>\n{children}</section>\n",
            anchor = anchor,
            level = level,
            title = self.render_inline(&section.title),
            children = self.render_nodes(&section.children)
        )
    }

    fn render_image(&self, image: &Image) -> String {
        let mut img = format!(
            "<img src=\"{}\"",
            html_escape::encode_double_quoted_attribute(&image.uri)
        );
        if let Some(alt) = &image.alt {
            img.push_str(&format!(
                " alt=\"{}\"",
                html_escape::encode_double_quoted_attribute(alt)
            ));
        }
        if let Some(width) = &image.width {
            img.push_str(&format!(
                " width=\"{}\"",
                html_escape::encode_double_quoted_attribute(width)
            ));
        }
        if let Some(class) = &image.class {
            img.push_str(&format!(
                " class=\"{}\"",
                html_escape::encode_double_quoted_attribute(class)
            ));
        }
        img.push_str(" />");

        match &image.caption {
            Some(caption) => format!(
                "<figure class=\"figure\">\n{}\n<figcaption>\n<p>{}</p>\n</figcaption>\n</figure>\n",
                img,
                self.render_inline(caption)
            ),
            None => format!("{}\n", img),
        }
    }

    fn render_toctree(&self, toctree: &TocTree) -> String {
        if toctree.hidden {
            return String::new();
        }

        let mut html = String::from("<div class=\"toctree-wrapper compound\">\n");
        if let Some(caption) = &toctree.caption {
            html.push_str(&format!(
                "<p class=\"caption\"><span class=\"caption-text\">{}</span></p>\n",
                html_escape::encode_text(caption)
            ));
        }
        if !toctree.entries.is_empty() {
            html.push_str("<ul>\n");
            for entry in &toctree.entries {
                match &entry.resolved {
                    Some(link) => html.push_str(&format!(
                        "<li class=\"toctree-l1\"><a class=\"reference {}\" href=\"{}\">{}</a></li>\n",
                        if link.external { "external" } else { "internal" },
                        html_escape::encode_double_quoted_attribute(&link.href),
                        html_escape::encode_text(&link.text)
                    )),
                    None => html.push_str(&format!(
                        "<li class=\"toctree-l1\">{}</li>\n",
                        html_escape::encode_text(entry.title.as_deref().unwrap_or(&entry.target))
                    )),
                }
            }
            html.push_str("</ul>\n");
        }
        html.push_str("</div>\n");
        html
    }

    /// Renders inline content. Unresolved references render as plain text.
    pub fn render_inline(&self, inlines: &[Inline]) -> String {
        let mut html = String::new();
        for inline in inlines {
            match inline {
                Inline::Text(text) => html.push_str(&html_escape::encode_text(text)),
                Inline::Emphasis(text) => {
                    html.push_str(&format!("<em>{}</em>", html_escape::encode_text(text)))
                }
                Inline::Strong(text) => html.push_str(&format!(
                    "<strong>{}</strong>",
                    html_escape::encode_text(text)
                )),
                Inline::Literal(text) => html.push_str(&format!(
                    "<code class=\"docutils literal notranslate\"><span class=\"pre\">{}</span></code>",
                    html_escape::encode_text(text)
                )),
                Inline::Reference(reference) => match &reference.resolved {
                    Some(link) => html.push_str(&format!(
                        "<a class=\"reference {} {}\" href=\"{}\">{}</a>",
                        if link.external { "external" } else { "internal" },
                        html_escape::encode_double_quoted_attribute(&reference.role),
                        html_escape::encode_double_quoted_attribute(&link.href),
                        html_escape::encode_text(&link.text)
                    )),
                    None => html.push_str(&html_escape::encode_text(reference.fallback_text())),
                },
                Inline::Link { text, url } => html.push_str(&format!(
                    "<a class=\"reference external\" href=\"{}\">{}</a>",
                    html_escape::encode_double_quoted_attribute(url),
                    html_escape::encode_text(text)
                )),
                Inline::InternalLink { text, anchor } => html.push_str(&format!(
                    "<a class=\"reference internal\" href=\"#{}\">{}</a>",
                    html_escape::encode_double_quoted_attribute(anchor),
                    html_escape::encode_text(text)
                )),
            }
        }
        html
    }
}

/// Machine-readable sibling of a rendered page.
#[derive(Debug, Serialize)]
pub struct PageSummary<'a> {
    pub title: &'a str,
    pub current_page_name: &'a str,
    pub toc: &'a [TocEntry],
    pub body: &'a str,
    pub images: &'a [String],
}

impl PageSummary<'_> {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Convert text to a URL-safe slug for anchor IDs.
pub fn slugify(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c
            } else if c.is_whitespace() || c == '-' || c == '_' || c == '.' {
                // Treat periods as word separators (e.g., "Action.button" -> "action-button")
                '-'
            } else {
                '\0'
            }
        })
        .filter(|c| *c != '\0')
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{GlossaryEntry, ListItem, ResolvedLink, RoleReference, TocTreeEntry};

    fn text(s: &str) -> Inline {
        Inline::Text(s.to_string())
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("API Reference"), "api-reference");
        assert_eq!(slugify("foo_bar-baz"), "foo-bar-baz");
        assert_eq!(slugify("Action.button"), "action-button");
        assert_eq!(slugify("What's new?"), "whats-new");
    }

    #[test]
    fn test_section_markup() {
        let renderer = HtmlRenderer::new();
        let html = renderer.render_nodes(&[Node::Section(Section {
            title: vec![text("Install")],
            level: 1,
            anchor: "install".to_string(),
            line: 1,
            children: vec![Node::Paragraph {
                content: vec![text("a < b")],
                line: 3,
            }],
        })]);
        assert_eq!(
            html,
            "<section id=\"install\">\n<h1>Install<a class=\"headerlink\" href=\"#install\" title=\"Link to this heading\">¶</a></h1>\n<p>a &lt; b</p>\n</section>\n"
        );
    }

    #[test]
    fn test_references_render_as_links_or_text() {
        let renderer = HtmlRenderer::new();
        let resolved = Inline::Reference(RoleReference {
            role: "term".to_string(),
            target: "bundle".to_string(),
            label: None,
            line: 1,
            resolved: Some(ResolvedLink {
                href: "glossary.html#term-bundle".to_string(),
                text: "Bundle".to_string(),
                external: false,
            }),
        });
        let unresolved = Inline::Reference(RoleReference {
            role: "doc".to_string(),
            target: "missing".to_string(),
            label: Some("Missing page".to_string()),
            line: 1,
            resolved: None,
        });
        assert_eq!(
            renderer.render_inline(&[resolved, text(" / "), unresolved]),
            "<a class=\"reference internal term\" href=\"glossary.html#term-bundle\">Bundle</a> / Missing page"
        );
    }

    #[test]
    fn test_glossary_terms_carry_anchors() {
        let renderer = HtmlRenderer::new();
        let html = renderer.render_nodes(&[Node::Glossary {
            entries: vec![GlossaryEntry {
                term: "Bundle".to_string(),
                anchor: "term-bundle".to_string(),
                definition: vec![Node::Paragraph {
                    content: vec![text("A plugin.")],
                    line: 2,
                }],
            }],
            line: 1,
        }]);
        assert!(html.contains("<dt id=\"term-bundle\">Bundle"));
        assert!(html.contains("<p>A plugin.</p>"));
    }

    #[test]
    fn test_hidden_toctree_renders_nothing() {
        let renderer = HtmlRenderer::new();
        let toctree = TocTree {
            caption: None,
            hidden: true,
            entries: vec![TocTreeEntry {
                title: None,
                target: "setup".to_string(),
                resolved: None,
            }],
            line: 1,
        };
        assert_eq!(renderer.render_nodes(&[Node::TocTree(toctree)]), "");
    }

    #[test]
    fn test_simple_list_items_are_inline() {
        let renderer = HtmlRenderer::new();
        let html = renderer.render_nodes(&[Node::List {
            ordered: false,
            items: vec![ListItem {
                children: vec![Node::Paragraph {
                    content: vec![text("one")],
                    line: 1,
                }],
            }],
            line: 1,
        }]);
        assert_eq!(html, "<ul class=\"simple\">\n<li>one</li>\n</ul>\n");
    }

    #[test]
    fn test_code_is_highlighted() {
        let renderer = HtmlRenderer::new();
        let html = renderer.render_nodes(&[Node::LiteralBlock {
            language: Some("php".to_string()),
            code: "<?php echo 1;".to_string(),
            line: 1,
        }]);
        assert!(html.starts_with("<div class=\"highlight-php\"><pre"));
        assert!(!html.contains("<?php"));
    }
}
