//! # validate-schematron Library
//!
//! Validates XML documents against XML Schema (through libxml2, with catalog-based
//! import resolution) and then against Schematron rules compiled to XSLT and cached
//! on disk.

pub mod assets;
pub mod cache;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod dependency;
pub mod diagnostics;
pub mod error;
pub mod file_discovery;
pub mod http_client;
pub mod libxml2;
pub mod output;
pub mod schema_validator;
pub mod schematron;
pub mod transform;
pub mod validator;

pub use assets::ResourceMaterializer;
pub use cache::{CacheEntry, ContentCacheStore, unique_cache_path};
pub use catalog::{
    CatalogLookup, CatalogPolicy, CatalogResolver, EmptyCatalog, LocationKind, Resolution,
    ResourceIdentifier,
};
pub use cli::{Cli, OutputFormat, VerbosityLevel};
pub use config::{Config, ConfigError, ConfigManager};
pub use dependency::{DependencySet, DependencyTracker};
pub use diagnostics::{
    DiagnosticCollector, DiagnosticListener, DiagnosticLocation, Severity, ValidationError,
    ValidationFailure,
};
pub use error::{Error, Result};
pub use file_discovery::{PathExpander, input_path};
pub use http_client::{HttpClientConfig, RemoteFetcher};
pub use libxml2::{LibXml2Wrapper, XmlCatalog, XmlSchemaPtr};
pub use output::Output;
pub use schema_validator::{LibXml2SchemaEngine, SchemaEngine, SchemaReference};
pub use schematron::{CachedDependency, CompiledRules, SchematronCompiler};
pub use transform::{
    Destination, ProcessTransformEngine, TransformContext, TransformEngine, TransformRunner,
};
pub use validator::{BatchReport, FileOutcome, ValidationOrchestrator};
