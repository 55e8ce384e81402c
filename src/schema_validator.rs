//! XML Schema validation stage.
//!
//! [`SchemaEngine`] is the seam the orchestrator drives. [`LibXml2SchemaEngine`]
//! implements it: it finds the `schemaLocation` / `noNamespaceSchemaLocation` hints
//! of a document, under whichever prefix binds the schema-instance namespace. It
//! builds one schema set from them with every load routed through the
//! [`CatalogResolver`], and validates the document against it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use libc::c_int;
use moka::sync::Cache;
use regex::Regex;
use tracing::debug;

use crate::catalog::{CatalogPolicy, CatalogResolver, EmptyCatalog, LocationKind};
use crate::diagnostics::{DiagnosticListener, DiagnosticLocation};
use crate::error::{Error, Result};
use crate::file_discovery::input_path;
use crate::http_client::{HttpClientConfig, RemoteFetcher};
use crate::libxml2::{LibXml2Wrapper, XML_PARSE_NONET, XmlCatalog, XmlSchemaPtr, with_resolution_scope};

/// Validates one input (local path or `http(s)://` URL) against its schemas.
///
/// Diagnostics about the document go to `listener`. `Err` is reserved for failures
/// that are not about the document's content.
pub trait SchemaEngine: Send + Sync {
    fn validate(&self, source: &str, listener: &mut dyn DiagnosticListener) -> Result<()>;
}

const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// Cached regex for namespace prefix declarations
static PREFIX_DECLARATION_REGEX: OnceLock<Regex> = OnceLock::new();

/// Cached regex for prefixed schemaLocation / noNamespaceSchemaLocation attributes
static SCHEMA_HINT_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_prefix_declaration_regex() -> &'static Regex {
    PREFIX_DECLARATION_REGEX.get_or_init(|| {
        Regex::new(r#"xmlns:([A-Za-z_][\w.\-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .expect("Failed to compile xmlns regex")
    })
}

fn get_schema_hint_regex() -> &'static Regex {
    SCHEMA_HINT_REGEX.get_or_init(|| {
        Regex::new(
            r#"([A-Za-z_][\w.\-]*):(schemaLocation|noNamespaceSchemaLocation)\s*=\s*(?:"([^"]*)"|'([^']*)')"#,
        )
        .expect("Failed to compile schema hint regex")
    })
}

/// Prefixes bound to the XML Schema instance namespace, `xsi` when none is declared
fn xsi_prefixes(content: &str) -> Vec<&str> {
    let prefixes: Vec<&str> = get_prefix_declaration_regex()
        .captures_iter(content)
        .filter(|caps| {
            caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str().trim()) == Some(XSI_NAMESPACE)
        })
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    if prefixes.is_empty() {
        vec!["xsi"]
    } else {
        prefixes
    }
}

/// One schema a document asks to be validated against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaReference {
    /// `None` for `xsi:noNamespaceSchemaLocation`
    pub namespace: Option<String>,
    /// Location made absolute against the document
    pub location: String,
}

/// Collect the schema hints of `content`, first hint per namespace wins.
pub fn extract_schema_references(content: &str, base: &str) -> Vec<SchemaReference> {
    let mut references: Vec<SchemaReference> = Vec::new();
    let mut push = |namespace: Option<String>, location: &str| {
        if references.iter().any(|r| r.namespace == namespace) {
            return;
        }
        references.push(SchemaReference {
            namespace,
            location: expand_location(location, base),
        });
    };

    let prefixes = xsi_prefixes(content);
    for caps in get_schema_hint_regex().captures_iter(content) {
        if !prefixes.contains(&&caps[1]) {
            continue;
        }
        let value = caps.get(3).or_else(|| caps.get(4)).map_or("", |m| m.as_str());
        if &caps[2] == "schemaLocation" {
            let tokens: Vec<&str> = value.split_whitespace().collect();
            for pair in tokens.chunks_exact(2) {
                push(Some(pair[0].to_string()), pair[1]);
            }
        } else if !value.trim().is_empty() {
            push(None, value.trim());
        }
    }

    references
}

/// Resolve `location` against the document it appears in
fn expand_location(location: &str, base: &str) -> String {
    if location.starts_with("file:") || LocationKind::classify(location) == LocationKind::Remote {
        return location.to_string();
    }
    if is_remote_input(base) {
        return reqwest::Url::parse(base)
            .and_then(|url| url.join(location))
            .map(|url| url.to_string())
            .unwrap_or_else(|_| location.to_string());
    }
    let path = Path::new(location);
    if path.is_absolute() {
        return location.to_string();
    }
    Path::new(base)
        .parent()
        .map(|dir| dir.join(path).to_string_lossy().into_owned())
        .unwrap_or_else(|| location.to_string())
}

pub fn is_remote_input(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// In-memory schema that imports (or includes) every referenced schema
fn schema_set_document(references: &[SchemaReference]) -> String {
    let mut document = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<xs:schema xmlns:xs=\"http://www.w3.org/2001/XMLSchema\">\n",
    );
    for reference in references {
        match &reference.namespace {
            Some(namespace) => document.push_str(&format!(
                "  <xs:import namespace=\"{}\" schemaLocation=\"{}\"/>\n",
                escape_attribute(namespace),
                escape_attribute(&reference.location)
            )),
            None => document.push_str(&format!(
                "  <xs:include schemaLocation=\"{}\"/>\n",
                escape_attribute(&reference.location)
            )),
        }
    }
    document.push_str("</xs:schema>\n");
    document
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('"', "&quot;")
}

/// Forwards schema-parser diagnostics, optionally demoting warnings to log lines
struct SchemaParseListener<'a> {
    inner: &'a mut dyn DiagnosticListener,
    keep_warnings: bool,
    reported: usize,
}

impl DiagnosticListener for SchemaParseListener<'_> {
    fn warning(&mut self, message: &str, location: &DiagnosticLocation) {
        if self.keep_warnings {
            self.reported += 1;
            self.inner.warning(message, location);
        } else {
            debug!(message, "schema parser warning");
        }
    }

    fn error(&mut self, message: &str, location: &DiagnosticLocation) {
        self.reported += 1;
        self.inner.error(message, location);
    }

    fn fatal_error(&mut self, message: &str, location: &DiagnosticLocation) {
        self.reported += 1;
        self.inner.fatal_error(message, location);
    }

    fn message(&mut self, message: &str, location: &DiagnosticLocation) {
        self.reported += 1;
        self.inner.message(message, location);
    }
}

/// libxml2-backed schema engine
pub struct LibXml2SchemaEngine {
    wrapper: LibXml2Wrapper,
    resolver: CatalogResolver,
    fetcher: RemoteFetcher,
    schemas: Cache<String, XmlSchemaPtr>,
}

impl LibXml2SchemaEngine {
    pub fn new(resolver: CatalogResolver, fetcher: RemoteFetcher) -> Self {
        Self {
            wrapper: LibXml2Wrapper::new(),
            resolver,
            fetcher,
            schemas: Cache::builder().max_capacity(256).build(),
        }
    }

    /// Load the policy's catalogs and build the engine around them.
    pub fn from_policy(policy: CatalogPolicy, http: HttpClientConfig) -> Result<Self> {
        let resolver = if policy.catalogs().is_empty() {
            CatalogResolver::new(policy, Arc::new(EmptyCatalog))
        } else {
            let catalog = XmlCatalog::load(policy.catalogs(), policy.prefer_public())?;
            CatalogResolver::new(policy, Arc::new(catalog))
        };
        Ok(Self::new(resolver, RemoteFetcher::new(http)?))
    }

    pub fn resolver(&self) -> &CatalogResolver {
        &self.resolver
    }

    fn parse_options(&self) -> c_int {
        if self.resolver.policy().allow_remote_resources() {
            0
        } else {
            XML_PARSE_NONET
        }
    }

    fn load(&self, source: &str) -> Result<Vec<u8>> {
        if is_remote_input(source) {
            return self.fetcher.fetch(source);
        }
        let path = Path::new(source);
        if !path.is_file() {
            return Err(Error::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        std::fs::read(path).map_err(|e| Error::resource_io(path, e))
    }

    /// Parse `content` as a schema inside a resolution scope.
    fn parse_schema_in_scope(
        &self,
        content: &[u8],
        base: &str,
        namespaces: HashMap<String, Option<String>>,
        listener: &mut SchemaParseListener<'_>,
    ) -> Result<Option<XmlSchemaPtr>> {
        let (parsed, failure) = with_resolution_scope(&self.resolver, namespaces, || {
            self.wrapper.parse_schema(content, base, &mut *listener)
        });
        if let Some(failure) = failure {
            return Err(failure);
        }
        Ok(parsed?)
    }

    fn schema_for(
        &self,
        references: &[SchemaReference],
        base: &str,
        listener: &mut dyn DiagnosticListener,
    ) -> Result<Option<XmlSchemaPtr>> {
        let key = references
            .iter()
            .map(|r| format!("{}|{}", r.namespace.as_deref().unwrap_or(""), r.location))
            .collect::<Vec<_>>()
            .join("\n");
        if let Some(schema) = self.schemas.get(&key) {
            return Ok(Some(schema));
        }

        let namespaces = references
            .iter()
            .map(|r| (r.location.clone(), r.namespace.clone()))
            .collect();
        let document = schema_set_document(references);
        let mut parse_listener = SchemaParseListener {
            inner: listener,
            keep_warnings: false,
            reported: 0,
        };

        let schema =
            self.parse_schema_in_scope(document.as_bytes(), base, namespaces, &mut parse_listener)?;
        if let Some(schema) = &schema {
            debug!(schemas = references.len(), "schema set parsed");
            self.schemas.insert(key, schema.clone());
        } else if parse_listener.reported == 0 {
            parse_listener.error("schema set could not be parsed", &DiagnosticLocation::none());
        }
        Ok(schema)
    }

    /// `.xsd` inputs are checked by parsing them as schemas.
    fn validate_schema_document(
        &self,
        content: &[u8],
        source: &str,
        listener: &mut dyn DiagnosticListener,
    ) -> Result<()> {
        let mut parse_listener = SchemaParseListener {
            inner: listener,
            keep_warnings: true,
            reported: 0,
        };
        let schema =
            self.parse_schema_in_scope(content, source, HashMap::new(), &mut parse_listener)?;
        if schema.is_none() && parse_listener.reported == 0 {
            parse_listener.error("schema could not be parsed", &DiagnosticLocation::none());
        }
        Ok(())
    }
}

impl SchemaEngine for LibXml2SchemaEngine {
    fn validate(&self, source: &str, listener: &mut dyn DiagnosticListener) -> Result<()> {
        // `file:` URLs are read and reported as plain paths.
        let source = input_path(source)?.to_string_lossy().into_owned();
        let source = source.as_str();
        let content = self.load(source)?;

        if source.ends_with(".xsd") {
            return self.validate_schema_document(&content, source, listener);
        }

        let Some(document) =
            self.wrapper
                .read_document(&content, source, self.parse_options(), &mut *listener)?
        else {
            return Ok(());
        };

        let references = extract_schema_references(&String::from_utf8_lossy(&content), source);
        if references.is_empty() {
            listener.error(
                "no schema location found (xsi:schemaLocation or xsi:noNamespaceSchemaLocation)",
                &DiagnosticLocation::none(),
            );
            return Ok(());
        }

        let Some(schema) = self.schema_for(&references, source, &mut *listener)? else {
            return Ok(());
        };
        self.wrapper
            .validate_document(&schema, &document, listener)?;
        Ok(())
    }
}
