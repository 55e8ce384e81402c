//! Identifier resolution through OASIS XML catalogs with a remote-access policy.
//!
//! Catalog matching itself (system, rewriteSystem, public entries) belongs to the
//! catalog engine behind [`CatalogLookup`]. This module only decides whether the
//! location it yields may be used.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Resolution settings for one run. Built once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogPolicy {
    catalogs: Vec<PathBuf>,
    prefer_public: bool,
    allow_remote_resources: bool,
}

impl CatalogPolicy {
    pub fn new(catalogs: Vec<PathBuf>, prefer_public: bool, allow_remote_resources: bool) -> Self {
        Self {
            catalogs,
            prefer_public,
            allow_remote_resources,
        }
    }

    pub fn catalogs(&self) -> &[PathBuf] {
        &self.catalogs
    }

    pub fn prefer_public(&self) -> bool {
        self.prefer_public
    }

    pub fn allow_remote_resources(&self) -> bool {
        self.allow_remote_resources
    }
}

impl Default for CatalogPolicy {
    /// No catalogs, public identifiers preferred, remote resources denied.
    fn default() -> Self {
        Self::new(Vec::new(), true, false)
    }
}

/// Catalog table lookup provided by the catalog engine
#[cfg_attr(test, mockall::automock)]
pub trait CatalogLookup: Send + Sync {
    /// Resolve an external identifier (public and/or system id).
    fn resolve<'a>(
        &self,
        public_id: Option<&'a str>,
        system_id: Option<&'a str>,
    ) -> Option<String>;

    /// Resolve a URI reference, such as a namespace name.
    fn resolve_uri(&self, uri: &str) -> Option<String>;
}

/// Lookup for runs without catalog files
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyCatalog;

impl CatalogLookup for EmptyCatalog {
    fn resolve<'a>(
        &self,
        _public_id: Option<&'a str>,
        _system_id: Option<&'a str>,
    ) -> Option<String> {
        None
    }

    fn resolve_uri(&self, _uri: &str) -> Option<String> {
        None
    }
}

/// What the engine is trying to load
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceIdentifier {
    /// Target namespace of a schema load; `None` for anything else
    pub namespace: Option<String>,
    pub public_id: Option<String>,
    /// System id as written in the referencing document
    pub literal_system_id: Option<String>,
    /// System id made absolute against the referencing document
    pub expanded_system_id: Option<String>,
}

impl ResourceIdentifier {
    pub fn schema(namespace: impl Into<String>, system_id: impl Into<String>) -> Self {
        let system_id = system_id.into();
        Self {
            namespace: Some(namespace.into()),
            public_id: None,
            literal_system_id: Some(system_id.clone()),
            expanded_system_id: Some(system_id),
        }
    }
}

/// Outcome of a permitted resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Not schema-related; the engine's default loading applies, using the catalog
    /// result when there is one
    PassThrough(Option<String>),
    Local(String),
    RemoteAllowed(String),
}

impl Resolution {
    /// Location the engine should load, if resolution changed or fixed it
    pub fn location(&self) -> Option<&str> {
        match self {
            Resolution::PassThrough(location) => location.as_deref(),
            Resolution::Local(location) | Resolution::RemoteAllowed(location) => Some(location),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKind {
    Local,
    Remote,
}

impl LocationKind {
    /// Classify a resolved location.
    ///
    /// `file:` URIs and plain paths are local. Every other scheme, and anything that
    /// cannot be classified, is remote.
    pub fn classify(location: &str) -> Self {
        let location = location.trim();
        if location.is_empty() {
            return LocationKind::Remote;
        }
        if location.starts_with("file:") {
            return LocationKind::Local;
        }
        match scheme(location) {
            None => LocationKind::Local,
            // Windows drive letter, not a scheme
            Some(s) if s.len() == 1 => LocationKind::Local,
            Some(_) => LocationKind::Remote,
        }
    }
}

fn scheme(location: &str) -> Option<&str> {
    let (candidate, _) = location.split_once(':')?;
    let mut chars = candidate.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some(candidate)
}

/// Applies a [`CatalogPolicy`] on top of a catalog lookup
#[derive(Clone)]
pub struct CatalogResolver {
    policy: CatalogPolicy,
    lookup: Arc<dyn CatalogLookup>,
}

impl CatalogResolver {
    pub fn new(policy: CatalogPolicy, lookup: Arc<dyn CatalogLookup>) -> Self {
        Self { policy, lookup }
    }

    pub fn policy(&self) -> &CatalogPolicy {
        &self.policy
    }

    /// Resolve `identifier` and enforce the remote-access policy.
    ///
    /// Identifiers without a namespace pass through untouched. Schema identifiers go
    /// to the catalog first and fall back to their expanded system id. A location
    /// that is not local fails with [`Error::ResolutionDenied`] unless remote
    /// resources are allowed.
    pub fn resolve_identifier(&self, identifier: &ResourceIdentifier) -> Result<Resolution> {
        let public_id = identifier.public_id.as_deref();
        let literal = identifier.literal_system_id.as_deref();

        let Some(namespace) = identifier.namespace.as_deref() else {
            return Ok(Resolution::PassThrough(self.lookup.resolve(public_id, literal)));
        };

        let resolved = self
            .lookup
            .resolve(public_id, literal)
            .or_else(|| {
                identifier
                    .expanded_system_id
                    .as_deref()
                    .filter(|expanded| Some(*expanded) != literal)
                    .and_then(|expanded| self.lookup.resolve(None, Some(expanded)))
            })
            .or_else(|| self.lookup.resolve_uri(namespace));

        let location = resolved
            .or_else(|| identifier.expanded_system_id.clone())
            .ok_or_else(|| Error::IdentifierUnresolved {
                namespace: namespace.to_string(),
            })?;

        let resolution = match LocationKind::classify(&location) {
            LocationKind::Local => Resolution::Local(location),
            LocationKind::Remote if self.policy.allow_remote_resources => {
                Resolution::RemoteAllowed(location)
            }
            LocationKind::Remote => {
                warn!(
                    namespace,
                    location = %location,
                    "remote resources are disabled and identifier does not resolve to a local path"
                );
                return Err(Error::ResolutionDenied {
                    namespace: namespace.to_string(),
                    location,
                });
            }
        };

        debug!(
            namespace,
            public_id = public_id.unwrap_or("-"),
            system_id = literal.unwrap_or("-"),
            resolved = resolution.location().unwrap_or("-"),
            "resolved identifier"
        );
        Ok(resolution)
    }
}

impl std::fmt::Debug for CatalogResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogResolver")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
