//! Directive and reference registry.
//!
//! Registrations go through a [`RegistryBuilder`]. Calling
//! [`RegistryBuilder::build`] seals it into an immutable
//! [`ExtensionRegistry`], which is shared by reference with every parse and
//! render worker and therefore needs no locking.

use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

use crate::directives::{self, Directive};
use crate::roles::{self, Reference};

/// The two extension points of the markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Block-level `.. name::` directives.
    Directive,
    /// Inline `:name:` roles.
    Reference,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Directive => f.write_str("directive"),
            Kind::Reference => f.write_str("reference"),
        }
    }
}

/// A registered behavior. The variant determines its [`Kind`].
#[derive(Clone)]
pub enum Definition {
    Directive(Arc<dyn Directive>),
    Reference(Arc<dyn Reference>),
}

impl Definition {
    pub fn directive(directive: impl Directive + 'static) -> Self {
        Definition::Directive(Arc::new(directive))
    }

    pub fn reference(reference: impl Reference + 'static) -> Self {
        Definition::Reference(Arc::new(reference))
    }

    pub fn kind(&self) -> Kind {
        match self {
            Definition::Directive(_) => Kind::Directive,
            Definition::Reference(_) => Kind::Reference,
        }
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Definition::{:?}", self.kind())
    }
}

#[derive(Default, Clone)]
struct Tables {
    directives: IndexMap<String, Arc<dyn Directive>>,
    references: IndexMap<String, Arc<dyn Reference>>,
}

impl Tables {
    fn resolve(&self, kind: Kind, name: &str) -> Option<Definition> {
        match kind {
            Kind::Directive => self.directives.get(name).cloned().map(Definition::Directive),
            Kind::Reference => self.references.get(name).cloned().map(Definition::Reference),
        }
    }
}

/// Open registry, accepting registrations until [`RegistryBuilder::build`].
#[derive(Default)]
pub struct RegistryBuilder {
    tables: Tables,
}

impl RegistryBuilder {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in directive and reference.
    pub fn with_builtins() -> Self {
        let mut builder = Self::new();
        directives::register_builtin_directives(&mut builder);
        roles::register_builtin_references(&mut builder);
        builder
    }

    /// Registers `definition` under `name` within its kind. An existing
    /// definition of the same kind and name is replaced and returned.
    pub fn register(&mut self, name: impl Into<String>, definition: Definition) -> Option<Definition> {
        let name = name.into();
        match definition {
            Definition::Directive(directive) => self
                .tables
                .directives
                .insert(name, directive)
                .map(Definition::Directive),
            Definition::Reference(reference) => self
                .tables
                .references
                .insert(name, reference)
                .map(Definition::Reference),
        }
    }

    pub fn register_directive(
        &mut self,
        name: impl Into<String>,
        directive: impl Directive + 'static,
    ) -> &mut Self {
        self.register(name, Definition::directive(directive));
        self
    }

    pub fn register_reference(
        &mut self,
        name: impl Into<String>,
        reference: impl Reference + 'static,
    ) -> &mut Self {
        self.register(name, Definition::reference(reference));
        self
    }

    pub fn resolve(&self, kind: Kind, name: &str) -> Option<Definition> {
        self.tables.resolve(kind, name)
    }

    /// Closes the registry for registration.
    pub fn build(self) -> ExtensionRegistry {
        ExtensionRegistry {
            tables: self.tables,
        }
    }
}

/// Sealed, read-only registry.
#[derive(Clone)]
pub struct ExtensionRegistry {
    tables: Tables,
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        RegistryBuilder::with_builtins().build()
    }
}

impl ExtensionRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::with_builtins()
    }

    pub fn resolve(&self, kind: Kind, name: &str) -> Option<Definition> {
        self.tables.resolve(kind, name)
    }

    pub fn directive(&self, name: &str) -> Option<&Arc<dyn Directive>> {
        self.tables.directives.get(name)
    }

    pub fn reference(&self, name: &str) -> Option<&Arc<dyn Reference>> {
        self.tables.references.get(name)
    }

    /// Registered names of `kind`, in registration order.
    pub fn names(&self, kind: Kind) -> Vec<&str> {
        match kind {
            Kind::Directive => self.tables.directives.keys().map(String::as_str).collect(),
            Kind::Reference => self.tables.references.keys().map(String::as_str).collect(),
        }
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("directives", &self.names(Kind::Directive))
            .field("references", &self.names(Kind::Reference))
            .finish()
    }
}
