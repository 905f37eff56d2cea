//! Per-document render pipeline.
//!
//! [`RenderPipeline::parse`] is the first build phase and only looks at the
//! document itself. [`RenderPipeline::render`] is the second phase: it reads
//! the frozen [`SiteIndex`] to resolve references, publishes images and
//! produces the HTML page and its JSON summary from the same resolved tree.

use log::debug;
use std::sync::Arc;

use crate::assets::{self, AssetError, AssetPublisher};
use crate::config::BuildConfig;
use crate::document::{walk_mut, Diagnostic, DocumentTree, Node, RenderedPage, SourceDocument};
use crate::error::{BuildError, WarningKind};
use crate::extensions::ExtensionRegistry;
use crate::parser::MarkupEngine;
use crate::renderer::{HtmlRenderer, PageSummary};
use crate::resolver::{DocumentMeta, Resolver, SiteIndex};
use crate::theme::{PageContext, PageTemplate};

/// Result of the parse phase for one document.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub source: SourceDocument,
    pub tree: DocumentTree,
    /// Definitions the document contributes to the site index.
    pub meta: DocumentMeta,
}

/// Result of the render phase for one document.
#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub source: SourceDocument,
    pub page: RenderedPage,
    /// Metadata including the dependencies found while resolving.
    pub meta: DocumentMeta,
    /// Parse and resolve diagnostics, in that order.
    pub diagnostics: Vec<Diagnostic>,
}

pub struct RenderPipeline {
    config: BuildConfig,
    registry: Arc<ExtensionRegistry>,
    engine: Arc<dyn MarkupEngine>,
    renderer: HtmlRenderer,
    template: PageTemplate,
    publisher: Option<AssetPublisher>,
}

impl RenderPipeline {
    /// Images are only published when building a content directory; in-memory
    /// content keeps its image URIs as written.
    pub fn new(
        config: BuildConfig,
        registry: Arc<ExtensionRegistry>,
        engine: Arc<dyn MarkupEngine>,
        template: PageTemplate,
    ) -> Result<Self, BuildError> {
        let publisher = if config.is_content_a_string() || !config.has_content_dir() {
            None
        } else {
            Some(AssetPublisher::from_config(&config)?)
        };
        Ok(Self {
            config,
            registry,
            engine,
            renderer: HtmlRenderer::new(),
            template,
            publisher,
        })
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    pub fn publisher(&self) -> Option<&AssetPublisher> {
        self.publisher.as_ref()
    }

    pub fn parse(&self, source: SourceDocument) -> Result<ParsedDocument, BuildError> {
        let content_root = if self.config.is_content_a_string() {
            None
        } else {
            self.config.content_dir().ok()
        };

        let tree = self
            .engine
            .parse(&source, &self.registry, content_root)
            .map_err(|failure| BuildError::Parse {
                path: source.relative_path.clone(),
                line: failure.line,
                message: failure.message,
            })?;
        let meta = DocumentMeta::from_tree(&tree);

        Ok(ParsedDocument { source, tree, meta })
    }

    pub fn render(
        &self,
        parsed: ParsedDocument,
        index: &SiteIndex,
    ) -> Result<RenderOutcome, BuildError> {
        let ParsedDocument {
            source,
            mut tree,
            mut meta,
        } = parsed;

        let resolution = Resolver::new(&self.registry, index, &self.config).resolve(&mut tree);
        let mut diagnostics = std::mem::take(&mut tree.diagnostics);
        diagnostics.extend(resolution.diagnostics);

        let images = self.publish_images(&source, &mut tree, &mut diagnostics)?;

        let title = tree.title().unwrap_or_else(|| source.docname.clone());
        let toc = tree.headings();
        let body = self.renderer.render_nodes(&tree.nodes);

        let render_error = |message: String| BuildError::Render {
            path: source.relative_path.clone(),
            message,
        };

        let page_context =
            PageContext::new(&title, &body, &source.docname, self.config.version(), &toc);
        let html = self
            .template
            .render(&page_context)
            .map_err(|e| render_error(format!("theme \"{}\": {}", self.template.theme(), e)))?;

        let json = if self.config.generate_json_files() {
            let summary = PageSummary {
                title: &title,
                current_page_name: &source.docname,
                toc: &toc,
                body: &body,
                images: &images,
            };
            Some(summary.to_json().map_err(|e| render_error(e.to_string()))?)
        } else {
            None
        };

        meta.dependencies = resolution.dependencies;
        meta.unresolved_references = resolution.unresolved > 0;

        debug!("Rendered {} ({} images)", source.docname, images.len());

        let page = RenderedPage {
            docname: source.docname.clone(),
            output_path: source.html_path(),
            json_path: json.as_ref().map(|_| source.json_path()),
            title,
            toc,
            body,
            html,
            json,
            images,
        };

        Ok(RenderOutcome {
            source,
            page,
            meta,
            diagnostics,
        })
    }

    /// Publishes every local image and rewrites its URI to the public URL.
    /// A missing image is a warning; failing to copy one fails the document.
    fn publish_images(
        &self,
        source: &SourceDocument,
        tree: &mut DocumentTree,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Vec<String>, BuildError> {
        let mut images = Vec::new();
        let mut failure = None;

        walk_mut(&mut tree.nodes, &mut |node| {
            let Node::Image(image) = node else {
                return;
            };
            let Some(publisher) = self.publisher.as_ref() else {
                images.push(image.uri.clone());
                return;
            };
            if assets::is_external(&image.uri) || failure.is_some() {
                images.push(image.uri.clone());
                return;
            }

            match publisher.publish(source.relative_dir(), &image.uri) {
                Ok(url) => {
                    image.uri = url.clone();
                    images.push(url);
                }
                Err(e @ (AssetError::NotFound(_) | AssetError::OutsideContentRoot)) => {
                    diagnostics.push(Diagnostic::new(
                        image.line,
                        WarningKind::MissingImage,
                        format!("image \"{}\": {}", image.uri, e),
                    ));
                    images.push(image.uri.clone());
                }
                Err(e) => {
                    failure = Some(BuildError::Asset {
                        path: source.relative_path.clone(),
                        image: image.uri.clone(),
                        message: e.to_string(),
                    });
                }
            }
        });

        match failure {
            Some(error) => Err(error),
            None => Ok(images),
        }
    }
}
