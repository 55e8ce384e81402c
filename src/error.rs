use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::diagnostics::{ValidationError, ValidationFailure};

/// Main error type covering every failure a validation run can raise
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error on {path}: {source}")]
    ResourceIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No such file: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported path {path}: {reason}")]
    UnsupportedPath { path: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status error: {status} for {url} - {message}")]
    HttpStatus {
        url: String,
        status: u16,
        message: String,
    },

    #[error(
        "Identifier {namespace} is not resolved to local path (resolved to {location}). \
         Only resources identified by the local catalog are enabled."
    )]
    ResolutionDenied { namespace: String, location: String },

    #[error(
        "Identifier {namespace} is not resolved, check if xsi:schemaLocation and \
         xmlns:xsi attributes are correctly defined."
    )]
    IdentifierUnresolved { namespace: String },

    #[error("{0}")]
    Validation(#[from] ValidationFailure),

    #[error("Schematron compilation failed for {rules_file}: {failure}")]
    Compilation {
        rules_file: PathBuf,
        failure: ValidationFailure,
    },

    #[error("Transform engine error: {details}")]
    Engine { details: String },

    #[error("LibXML2 internal error: {details}")]
    LibXml2Internal { details: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Concurrent operation error: {details}")]
    Concurrency { details: String },
}

impl Error {
    pub fn resource_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::ResourceIo {
            path: path.into(),
            source,
        }
    }

    /// Whether the batch may continue after this error.
    ///
    /// Diagnostics against a document and refused remote lookups are reported per file;
    /// anything else stops the batch.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::ResolutionDenied { .. })
    }

    /// Flatten a recoverable error into the records accumulated for `file`.
    pub fn into_validation_errors(self, file: &str) -> Vec<ValidationError> {
        match self {
            Error::Validation(failure) => failure.errors,
            other => vec![ValidationError::new(other.to_string()).with_file(file)],
        }
    }
}

/// LibXML2-specific error types
#[derive(Error, Debug)]
pub enum LibXml2Error {
    #[error("Schema parsing failed: {location}")]
    SchemaParseFailed { location: String },

    #[error("Validation context creation failed")]
    ValidationContextCreationFailed,

    #[error("Document parsing failed: {file}")]
    DocumentParseFailed { file: String },

    #[error("Catalog could not be loaded: {path}")]
    CatalogLoadFailed { path: PathBuf },

    #[error("Path cannot be passed to libxml2: {path}")]
    InvalidPath { path: String },

    #[error("Memory allocation failed in libxml2")]
    MemoryAllocation,
}

impl From<LibXml2Error> for Error {
    fn from(err: LibXml2Error) -> Self {
        Error::LibXml2Internal {
            details: err.to_string(),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;

/// LibXML2 result type alias
pub type LibXml2Result<T> = std::result::Result<T, LibXml2Error>;
