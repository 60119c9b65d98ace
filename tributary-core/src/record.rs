//! Destination records and the walk that registers their fields.
//!
//! A destination implements [`Record`] by declaring each field once: its Rust
//! identifier, its tags and a projection from the record to the field. Tags
//! are `(name, value)` pairs; the value of the configured tag (by default
//! `fido`) names the field's path segment, e.g. `("fido", "port,required")`
//! maps to the segment `port`. Nested records recurse; everything else is a
//! leaf [`Slot`].
//!
//! ```
//! use tributary_core::record::{Record, Walker};
//! use tributary_core::Result;
//!
//! #[derive(Default)]
//! struct Tls {
//!     cert: String,
//! }
//!
//! impl Record for Tls {
//!     fn fields<D: 'static>(walker: &mut Walker<'_, D, Self>) -> Result<()> {
//!         walker.leaf("cert", &[("fido", "cert")], |tls| &mut tls.cert)
//!     }
//! }
//!
//! #[derive(Default)]
//! struct Server {
//!     port: u16,
//!     tls: Tls,
//! }
//!
//! impl Record for Server {
//!     fn fields<D: 'static>(walker: &mut Walker<'_, D, Self>) -> Result<()> {
//!         walker.leaf("port", &[("fido", "port")], |server| &mut server.port)?;
//!         walker.record("tls", &[("fido", "tls")], |server| &mut server.tls)
//!     }
//! }
//! ```

use std::fmt;

use crate::error::{Error, Result};
use crate::options::Options;
use crate::path::{Path, SEPARATOR};
use crate::registry::{self, Field, FieldRegistry, FieldSlot, Projection};
use crate::slot::Slot;

pub trait Record: Sized + Send + Sync + 'static {
    fn fields<D: 'static>(walker: &mut Walker<'_, D, Self>) -> Result<()>;
}

/// Tag attached to a field, split into its segment name and options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub field: String,
    pub raw: String,
    pub name: String,
    pub options: Vec<String>,
}

impl Tag {
    pub fn lookup(tag: &str, field: &str, tags: &[(&str, &str)]) -> Option<Self> {
        let (_, raw) = tags.iter().find(|(name, _)| *name == tag)?;
        let mut parts = raw.split(',').map(str::trim);
        let name = parts.next().unwrap_or_default().to_owned();
        let options = parts
            .filter(|part| !part.is_empty())
            .map(ToOwned::to_owned)
            .collect();

        Some(Self {
            field: field.to_owned(),
            raw: (*raw).to_owned(),
            name,
            options,
        })
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.raw)
    }
}

/// Registers the fields of `P`, a record nested somewhere inside `D`.
pub struct Walker<'w, D, P> {
    registry: &'w mut FieldRegistry<D>,
    options: &'w Options,
    prefix: Path,
    project: Projection<D, P>,
}

impl<'w, D: 'static, P: 'static> Walker<'w, D, P> {
    pub fn path(&self) -> &Path {
        &self.prefix
    }

    /// Registers a leaf field.
    pub fn leaf<T: Slot>(
        &mut self,
        ident: &'static str,
        tags: &[(&str, &str)],
        project: fn(&mut P) -> &mut T,
    ) -> Result<()> {
        let Some(path) = self.field_path(ident, tags)? else {
            return Ok(());
        };
        if self.registry.contains(&path) {
            return Err(Error::DestinationInvalid(format!(
                "field '{ident}' resolves to '{path}', which is already registered"
            )));
        }

        let access = registry::leaf(self.project.clone(), project);
        self.registry.set(Field::new(path, FieldSlot::Leaf(access)));
        Ok(())
    }

    /// Recurses into a nested record; the record itself is not registered.
    pub fn record<R: Record>(
        &mut self,
        ident: &'static str,
        tags: &[(&str, &str)],
        project: fn(&mut P) -> &mut R,
    ) -> Result<()> {
        let Some(path) = self.field_path(ident, tags)? else {
            return Ok(());
        };

        let mut nested = Walker {
            registry: &mut *self.registry,
            options: self.options,
            prefix: path,
            project: registry::compose(self.project.clone(), project),
        };
        R::fields(&mut nested)
    }

    fn field_path(&self, ident: &str, tags: &[(&str, &str)]) -> Result<Option<Path>> {
        let tag_name = self.options.tag.as_str();
        let Some(tag) = Tag::lookup(tag_name, ident, tags) else {
            if self.options.error_on_missing_tag {
                return Err(Error::TagNotFound {
                    field: qualified(&self.prefix, ident),
                    tag: tag_name.to_owned(),
                });
            }
            tracing::debug!(field = ident, tag = tag_name, "skipping untagged field");
            return Ok(None);
        };

        if tag.name.is_empty() {
            return Err(Error::DestinationInvalid(format!(
                "field '{}' has an empty '{tag_name}' tag",
                qualified(&self.prefix, ident)
            )));
        }
        if tag.name.contains(SEPARATOR) {
            return Err(Error::DestinationInvalid(format!(
                "field '{}' tag '{}' contains '{SEPARATOR}'",
                qualified(&self.prefix, ident),
                tag.name
            )));
        }

        Ok(Some(self.prefix.child(tag.name)))
    }
}

fn qualified(prefix: &Path, ident: &str) -> String {
    if prefix.is_empty() {
        ident.to_owned()
    } else {
        format!("{prefix}{SEPARATOR}{ident}")
    }
}

/// Walks `D` once, building its field registry. Any error discards the
/// partially built registry.
pub fn hydrate<D: Record>(options: &Options) -> Result<FieldRegistry<D>> {
    let mut registry = FieldRegistry::default();
    let mut walker = Walker {
        registry: &mut registry,
        options,
        prefix: Path::root(),
        project: registry::identity(),
    };
    D::fields(&mut walker)?;

    tracing::debug!(fields = registry.len(), tag = %options.tag, "hydrated destination");
    Ok(registry)
}
