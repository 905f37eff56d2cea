//! Inline reference roles (`:name:`target``).
//!
//! A [`Reference`] turns a role target into a destination and display text.
//! Resolution runs after every document has been parsed, so references see
//! the whole site through the frozen [`SiteIndex`].

use crate::config::BuildConfig;
use crate::extensions::RegistryBuilder;
use crate::resolver::{normalize_term, SiteIndex};
use crate::utils;

/// Everything a reference may consult while resolving.
pub struct ResolveContext<'a> {
    /// The document containing the reference.
    pub docname: &'a str,
    pub index: &'a SiteIndex,
    pub config: &'a BuildConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// A page of this site, optionally an anchor on it.
    Document {
        docname: String,
        anchor: Option<String>,
    },
    External(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReference {
    pub destination: Destination,
    pub text: String,
}

pub trait Reference: Send + Sync {
    /// Returns `None` when the target does not exist.
    fn resolve(&self, ctx: &ResolveContext<'_>, target: &str) -> Option<ResolvedReference>;
}

pub(crate) fn register_builtin_references(builder: &mut RegistryBuilder) {
    builder
        .register_reference("term", TermReference)
        .register_reference("doc", DocReference)
        .register_reference("ref", RefReference)
        .register_reference("class", ClassReference)
        .register_reference("method", MethodReference)
        .register_reference("namespace", NamespaceReference)
        .register_reference("phpclass", PhpClassReference)
        .register_reference("phpfunction", PhpFunctionReference)
        .register_reference("phpmethod", PhpMethodReference);
}

/// A glossary term defined anywhere on the site.
#[derive(Debug, Clone, Copy)]
pub struct TermReference;

impl Reference for TermReference {
    fn resolve(&self, ctx: &ResolveContext<'_>, target: &str) -> Option<ResolvedReference> {
        let (docname, term) = ctx.index.term(&normalize_term(target))?;
        Some(ResolvedReference {
            destination: Destination::Document {
                docname: docname.to_string(),
                anchor: Some(term.anchor.clone()),
            },
            text: term.term.clone(),
        })
    }
}

/// Another page, by path relative to the current document.
#[derive(Debug, Clone, Copy)]
pub struct DocReference;

impl Reference for DocReference {
    fn resolve(&self, ctx: &ResolveContext<'_>, target: &str) -> Option<ResolvedReference> {
        let docname = utils::resolve_docname(ctx.docname, target)?;
        let meta = ctx.index.document(&docname)?;
        Some(ResolvedReference {
            destination: Destination::Document {
                docname: docname.clone(),
                anchor: None,
            },
            text: meta.title.clone(),
        })
    }
}

/// A `.. _label:` target defined anywhere on the site.
#[derive(Debug, Clone, Copy)]
pub struct RefReference;

impl Reference for RefReference {
    fn resolve(&self, ctx: &ResolveContext<'_>, target: &str) -> Option<ResolvedReference> {
        let (docname, label) = ctx.index.label(&target.trim().to_lowercase())?;
        Some(ResolvedReference {
            destination: Destination::Document {
                docname: docname.to_string(),
                anchor: Some(label.anchor.clone()),
            },
            text: label.title.clone().unwrap_or_else(|| target.trim().to_string()),
        })
    }
}

fn short_name(fqcn: &str) -> &str {
    fqcn.rsplit('\\').next().unwrap_or(fqcn)
}

fn api_path(fqcn: &str) -> String {
    fqcn.trim_start_matches('\\').replace('\\', "/")
}

/// A class of the framework API reference.
#[derive(Debug, Clone, Copy)]
pub struct ClassReference;

impl Reference for ClassReference {
    fn resolve(&self, ctx: &ResolveContext<'_>, target: &str) -> Option<ResolvedReference> {
        let class = target.trim().trim_start_matches('\\');
        if class.is_empty() {
            return None;
        }
        Some(ResolvedReference {
            destination: Destination::External(format!(
                "{}/{}.html",
                ctx.config.api_url(),
                api_path(class)
            )),
            text: short_name(class).to_string(),
        })
    }
}

/// `Class::method` of the framework API reference.
#[derive(Debug, Clone, Copy)]
pub struct MethodReference;

impl Reference for MethodReference {
    fn resolve(&self, ctx: &ResolveContext<'_>, target: &str) -> Option<ResolvedReference> {
        let (class, method) = target.trim().trim_start_matches('\\').split_once("::")?;
        if class.is_empty() || method.is_empty() {
            return None;
        }
        Some(ResolvedReference {
            destination: Destination::External(format!(
                "{}/{}.html#method_{}",
                ctx.config.api_url(),
                api_path(class),
                method
            )),
            text: format!("{}::{}()", short_name(class), method),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NamespaceReference;

impl Reference for NamespaceReference {
    fn resolve(&self, ctx: &ResolveContext<'_>, target: &str) -> Option<ResolvedReference> {
        let namespace = target.trim().trim_matches('\\');
        if namespace.is_empty() {
            return None;
        }
        Some(ResolvedReference {
            destination: Destination::External(format!(
                "{}/{}.html",
                ctx.config.api_url(),
                api_path(namespace)
            )),
            text: namespace.to_string(),
        })
    }
}

/// A class of the PHP manual.
#[derive(Debug, Clone, Copy)]
pub struct PhpClassReference;

impl Reference for PhpClassReference {
    fn resolve(&self, ctx: &ResolveContext<'_>, target: &str) -> Option<ResolvedReference> {
        let class = target.trim().trim_start_matches('\\');
        if class.is_empty() {
            return None;
        }
        Some(ResolvedReference {
            destination: Destination::External(format!(
                "{}/class.{}.php",
                ctx.config.php_doc_url(),
                class.to_lowercase()
            )),
            text: class.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PhpFunctionReference;

impl Reference for PhpFunctionReference {
    fn resolve(&self, ctx: &ResolveContext<'_>, target: &str) -> Option<ResolvedReference> {
        let function = target.trim();
        if function.is_empty() {
            return None;
        }
        Some(ResolvedReference {
            destination: Destination::External(format!(
                "{}/function.{}.php",
                ctx.config.php_doc_url(),
                function.to_lowercase().replace('_', "-")
            )),
            text: format!("{}()", function),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PhpMethodReference;

impl Reference for PhpMethodReference {
    fn resolve(&self, ctx: &ResolveContext<'_>, target: &str) -> Option<ResolvedReference> {
        let (class, method) = target.trim().trim_start_matches('\\').split_once("::")?;
        if class.is_empty() || method.is_empty() {
            return None;
        }
        Some(ResolvedReference {
            destination: Destination::External(format!(
                "{}/{}.{}.php",
                ctx.config.php_doc_url(),
                class.to_lowercase(),
                method.to_lowercase()
            )),
            text: format!("{}::{}()", class, method),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::TocEntry;
    use crate::resolver::{DocumentMeta, LabelTarget, TermTarget};

    fn index() -> SiteIndex {
        let mut glossary = DocumentMeta {
            title: "Glossary".to_string(),
            ..Default::default()
        };
        glossary.terms.insert(
            "service container".to_string(),
            TermTarget {
                term: "Service Container".to_string(),
                anchor: "term-service-container".to_string(),
            },
        );
        let mut setup = DocumentMeta {
            title: "Installing".to_string(),
            headings: vec![TocEntry {
                title: "Installing".to_string(),
                level: 1,
                anchor: "installing".to_string(),
            }],
            ..Default::default()
        };
        setup.labels.insert(
            "install".to_string(),
            LabelTarget {
                anchor: "install".to_string(),
                title: Some("Installing".to_string()),
            },
        );
        SiteIndex::build([
            ("reference/glossary".to_string(), glossary),
            ("setup".to_string(), setup),
        ])
    }

    fn resolve(reference: &dyn Reference, docname: &str, target: &str) -> Option<ResolvedReference> {
        let mut config = BuildConfig::new();
        config.set_version("6.4");
        let index = index();
        let ctx = ResolveContext {
            docname,
            index: &index,
            config: &config,
        };
        reference.resolve(&ctx, target)
    }

    #[test]
    fn test_term_lookup_is_case_and_space_insensitive() {
        let resolved = resolve(&TermReference, "index", "service   CONTAINER").unwrap();
        assert_eq!(resolved.text, "Service Container");
        assert_eq!(
            resolved.destination,
            Destination::Document {
                docname: "reference/glossary".to_string(),
                anchor: Some("term-service-container".to_string()),
            }
        );
        assert!(resolve(&TermReference, "index", "bundle").is_none());
    }

    #[test]
    fn test_doc_reference_is_relative_to_current_document() {
        let resolved = resolve(&DocReference, "reference/glossary", "../setup").unwrap();
        assert_eq!(resolved.text, "Installing");
        let absolute = resolve(&DocReference, "reference/glossary", "/setup").unwrap();
        assert_eq!(absolute, resolved);
        assert!(resolve(&DocReference, "index", "missing").is_none());
    }

    #[test]
    fn test_ref_uses_section_title() {
        let resolved = resolve(&RefReference, "index", "install").unwrap();
        assert_eq!(resolved.text, "Installing");
        assert!(resolve(&RefReference, "index", "nope").is_none());
    }

    #[test]
    fn test_api_links_use_configured_version() {
        let class = resolve(&ClassReference, "index", "Symfony\\Component\\HttpKernel\\Kernel").unwrap();
        assert_eq!(
            class.destination,
            Destination::External(
                "https://api.symfony.com/6.4/Symfony/Component/HttpKernel/Kernel.html".to_string()
            )
        );
        assert_eq!(class.text, "Kernel");

        let method = resolve(&MethodReference, "index", "Symfony\\Component\\HttpKernel\\Kernel::boot").unwrap();
        assert_eq!(
            method.destination,
            Destination::External(
                "https://api.symfony.com/6.4/Symfony/Component/HttpKernel/Kernel.html#method_boot"
                    .to_string()
            )
        );
        assert_eq!(method.text, "Kernel::boot()");
        assert!(resolve(&MethodReference, "index", "Kernel").is_none());
    }

    #[test]
    fn test_php_manual_links() {
        let function = resolve(&PhpFunctionReference, "index", "array_map").unwrap();
        assert_eq!(
            function.destination,
            Destination::External("https://secure.php.net/manual/en/function.array-map.php".to_string())
        );
        assert_eq!(function.text, "array_map()");

        let class = resolve(&PhpClassReference, "index", "ArrayAccess").unwrap();
        assert_eq!(
            class.destination,
            Destination::External("https://secure.php.net/manual/en/class.arrayaccess.php".to_string())
        );

        let method = resolve(&PhpMethodReference, "index", "DateTime::format").unwrap();
        assert_eq!(
            method.destination,
            Destination::External("https://secure.php.net/manual/en/datetime.format.php".to_string())
        );
    }
}
