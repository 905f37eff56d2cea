//! Docs Builder
//!
//! An incremental reStructuredText documentation site builder with pluggable
//! directives and cross-document references.

pub mod assets;
pub mod builder;
pub mod cache;
pub mod config;
pub mod directives;
pub mod discovery;
pub mod document;
pub mod error;
pub mod extensions;
pub mod matching;
pub mod parser;
pub mod pipeline;
pub mod release;
pub mod renderer;
pub mod resolver;
pub mod roles;
pub mod theme;
pub mod utils;

pub use assets::AssetPublisher;
pub use builder::{BuildStats, DocsBuilder};
pub use cache::{BuildCache, CacheEntry, RebuildPlan};
pub use config::{BuildConfig, ConfigFile};
pub use directives::{Directive, DirectiveError};
pub use discovery::{SourceFile, SourceFinder};
pub use document::{DocumentTree, Node, RenderedPage, SourceDocument};
pub use error::{BuildError, BuildErrorReport, BuildWarning, WarningKind};
pub use extensions::{Definition, ExtensionRegistry, Kind, RegistryBuilder};
pub use parser::{MarkupEngine, ParseFailure, RstEngine};
pub use pipeline::RenderPipeline;
pub use release::{ReleaseApi, ReleaseError, ReleaseTag, ReleaseToken, Releaser};
pub use renderer::HtmlRenderer;
pub use resolver::{DocumentMeta, SiteIndex};
pub use roles::{Destination, Reference, ResolveContext, ResolvedReference};
pub use theme::{ThemeRegistry, PageTemplate};
