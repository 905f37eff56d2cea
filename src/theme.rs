//! Page themes.
//!
//! A theme wraps a rendered page body in its page chrome. Two themes are
//! built in (`default` and `minimal`). A project theme is a directory
//! `<source>/_themes/<name>/` holding a `layout.html` template; it shadows
//! a built-in theme of the same name.

use anyhow::{anyhow, Context, Result};
use minijinja::{AutoEscape, Environment};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::document::TocEntry;

pub const LAYOUT_FILE: &str = "layout.html";
pub const THEMES_DIR: &str = "_themes";

const DEFAULT_LAYOUT: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>{{ title }}</title>
</head>
<body>
    <div class="document" data-version="{{ version }}">
        <div class="body" role="main">
{{ body|safe }}
        </div>
    </div>
</body>
</html>
"#;

const MINIMAL_LAYOUT: &str = "{{ body|safe }}";

#[derive(Debug, Clone)]
enum LayoutSource {
    Builtin(&'static str),
    /// `layout.html` of a project theme, read when the theme is loaded.
    File(PathBuf),
}

/// Known theme names and where their layout comes from.
#[derive(Debug)]
pub struct ThemeRegistry {
    themes: BTreeMap<String, LayoutSource>,
}

impl Default for ThemeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ThemeRegistry {
    /// A registry holding the built-in themes.
    pub fn new() -> Self {
        let mut themes = BTreeMap::new();
        themes.insert("default".to_string(), LayoutSource::Builtin(DEFAULT_LAYOUT));
        themes.insert("minimal".to_string(), LayoutSource::Builtin(MINIMAL_LAYOUT));
        Self { themes }
    }

    /// Registers every `<dir>/<name>/layout.html`. Directories without a
    /// layout are skipped.
    pub fn discover(&mut self, dir: &Path) -> Result<()> {
        if !dir.is_dir() {
            return Ok(());
        }
        let entries =
            std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;
        for entry in entries.flatten() {
            let layout = entry.path().join(LAYOUT_FILE);
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if layout.is_file() {
                log::debug!("Discovered theme: {} at {}", name, layout.display());
                self.themes.insert(name, LayoutSource::File(layout));
            } else if entry.path().is_dir() {
                log::warn!(
                    "Ignoring theme directory {} without {}",
                    entry.path().display(),
                    LAYOUT_FILE
                );
            }
        }
        Ok(())
    }

    pub fn has_theme(&self, name: &str) -> bool {
        self.themes.contains_key(name)
    }

    /// All registered theme names, sorted.
    pub fn theme_names(&self) -> Vec<&str> {
        self.themes.keys().map(String::as_str).collect()
    }

    /// Resolves `name` to a checked page template.
    pub fn load(&self, name: &str) -> Result<PageTemplate> {
        let source = match self.themes.get(name) {
            Some(LayoutSource::Builtin(layout)) => layout.to_string(),
            Some(LayoutSource::File(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
            None => {
                return Err(anyhow!(
                    "Theme '{}' not found (available: {})",
                    name,
                    self.theme_names().join(", ")
                ))
            }
        };

        let template = PageTemplate {
            theme: name.to_string(),
            source,
        };
        template
            .environment()
            .template_from_str(&template.source)
            .with_context(|| format!("Invalid {} in theme '{}'", LAYOUT_FILE, name))?;
        Ok(template)
    }
}

/// Variables available to a layout.
#[derive(Debug, Serialize)]
pub struct PageContext<'a> {
    pub title: &'a str,
    /// Rendered page body; inserted with `{{ body|safe }}`.
    pub body: &'a str,
    pub docname: &'a str,
    pub version: &'a str,
    pub toc: &'a [TocEntry],
    /// Relative path from the page to the output root, e.g. `../`.
    pub root: String,
}

impl<'a> PageContext<'a> {
    pub fn new(
        title: &'a str,
        body: &'a str,
        docname: &'a str,
        version: &'a str,
        toc: &'a [TocEntry],
    ) -> Self {
        Self {
            title,
            body,
            docname,
            version,
            toc,
            root: "../".repeat(docname.matches('/').count()),
        }
    }
}

/// The layout of a resolved theme.
#[derive(Debug, Clone)]
pub struct PageTemplate {
    theme: String,
    source: String,
}

impl PageTemplate {
    pub fn theme(&self) -> &str {
        &self.theme
    }

    fn environment(&self) -> Environment<'static> {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::Html);
        env
    }

    pub fn render(&self, page: &PageContext<'_>) -> Result<String, minijinja::Error> {
        self.environment().render_str(&self.source, page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_theme(dir: &Path, name: &str, layout: Option<&str>) {
        let theme_dir = dir.join(name);
        std::fs::create_dir_all(&theme_dir).unwrap();
        if let Some(layout) = layout {
            std::fs::write(theme_dir.join(LAYOUT_FILE), layout).unwrap();
        }
    }

    #[test]
    fn test_builtin_themes() {
        let registry = ThemeRegistry::new();
        assert_eq!(registry.theme_names(), vec!["default", "minimal"]);

        let template = registry.load("minimal").unwrap();
        let page = PageContext::new("Title", "<p>Body</p>", "index", "4.4", &[]);
        assert_eq!(template.render(&page).unwrap(), "<p>Body</p>");
    }

    #[test]
    fn test_title_is_escaped_and_body_is_not() {
        let registry = ThemeRegistry::new();
        let template = registry.load("default").unwrap();
        let page = PageContext::new("A & B", "<p>x</p>", "guides/setup", "6.4", &[]);
        let html = template.render(&page).unwrap();
        assert!(html.contains("<title>A &amp; B</title>"));
        assert!(html.contains("<p>x</p>"));
        assert!(html.contains("data-version=\"6.4\""));
    }

    #[test]
    fn test_project_theme_layout() {
        let temp_dir = TempDir::new().unwrap();
        create_theme(
            temp_dir.path(),
            "brand",
            Some("<main data-root=\"{{ root }}\">{{ body|safe }}</main>"),
        );
        create_theme(temp_dir.path(), "empty", None);

        let mut registry = ThemeRegistry::new();
        registry.discover(temp_dir.path()).unwrap();
        assert!(registry.has_theme("brand"));
        assert!(!registry.has_theme("empty"));

        let template = registry.load("brand").unwrap();
        let page = PageContext::new("T", "body", "a/b/c", "4.4", &[]);
        assert_eq!(
            template.render(&page).unwrap(),
            "<main data-root=\"../../\">body</main>"
        );
    }

    #[test]
    fn test_project_theme_shadows_builtin() {
        let temp_dir = TempDir::new().unwrap();
        create_theme(temp_dir.path(), "minimal", Some("<div>{{ body|safe }}</div>"));

        let mut registry = ThemeRegistry::new();
        registry.discover(temp_dir.path()).unwrap();
        let page = PageContext::new("T", "x", "index", "4.4", &[]);
        assert_eq!(registry.load("minimal").unwrap().render(&page).unwrap(), "<div>x</div>");
    }

    #[test]
    fn test_unknown_theme_is_an_error() {
        let registry = ThemeRegistry::new();
        let err = registry.load("fancy").unwrap_err();
        assert!(err.to_string().contains("Theme 'fancy' not found"));
    }

    #[test]
    fn test_broken_layout_is_rejected_at_load() {
        let temp_dir = TempDir::new().unwrap();
        create_theme(temp_dir.path(), "broken", Some("{% if %}"));

        let mut registry = ThemeRegistry::new();
        registry.discover(temp_dir.path()).unwrap();
        assert!(registry.load("broken").is_err());
    }
}
