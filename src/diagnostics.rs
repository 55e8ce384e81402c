//! Diagnostic records shared by the schema engine and the transform engine.
//!
//! Every engine reports through a [`DiagnosticListener`]. The usual listener is a
//! [`DiagnosticCollector`], which turns each callback into a [`ValidationError`]
//! tagged with the document under validation.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Kind of diagnostic raised by an engine callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Fatal,
    /// Engine-level message channel (`xsl:message` and similar)
    Message,
}

/// One diagnostic translated from an engine callback.
///
/// Location fields are optional because engines frequently report without one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub message: String,
    pub source_file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source_file: None,
            line: None,
            column: None,
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.source_file = Some(file.into());
        self
    }

    pub fn at(mut self, line: Option<u32>, column: Option<u32>) -> Self {
        self.line = line;
        self.column = column;
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(file) = &self.source_file {
            write!(f, "{} ", file)?;
        }
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(f, "line {}, col {}: ", line, column)?,
            (Some(line), None) => write!(f, "line {}: ", line)?,
            _ => {}
        }
        write!(f, "{}", self.message)
    }
}

/// Aggregate failure carrying every diagnostic collected for a unit of work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub errors: Vec<ValidationError>,
}

impl ValidationFailure {
    pub fn new(errors: Vec<ValidationError>) -> Self {
        Self { errors }
    }

    pub fn single(error: ValidationError) -> Self {
        Self {
            errors: vec![error],
        }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} validation error{}",
            self.errors.len(),
            if self.errors.len() == 1 { "" } else { "s" }
        )?;
        for error in &self.errors {
            write!(f, "\n  {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationFailure {}

/// Location an engine attaches to a diagnostic, when it has one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticLocation {
    pub system_id: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl DiagnosticLocation {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn line(line: u32) -> Self {
        Self {
            system_id: None,
            line: Some(line),
            column: None,
        }
    }
}

/// Callback interface engines report through while they run.
pub trait DiagnosticListener {
    fn warning(&mut self, message: &str, location: &DiagnosticLocation);
    fn error(&mut self, message: &str, location: &DiagnosticLocation);
    fn fatal_error(&mut self, message: &str, location: &DiagnosticLocation);
    fn message(&mut self, message: &str, location: &DiagnosticLocation);

    fn report(&mut self, severity: Severity, message: &str, location: &DiagnosticLocation) {
        match severity {
            Severity::Warning => self.warning(message, location),
            Severity::Error => self.error(message, location),
            Severity::Fatal => self.fatal_error(message, location),
            Severity::Message => self.message(message, location),
        }
    }
}

/// Listener that converts every callback into a [`ValidationError`].
///
/// Diagnostics without a system id are attributed to the document being processed.
#[derive(Debug)]
pub struct DiagnosticCollector {
    document: String,
    errors: Vec<ValidationError>,
}

impl DiagnosticCollector {
    pub fn new(document: &Path) -> Self {
        Self::for_document(document.display().to_string())
    }

    pub fn for_document(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            errors: Vec::new(),
        }
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn push(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<ValidationError> {
        self.errors
    }

    /// `Ok(())` when nothing was collected, otherwise the aggregate failure.
    pub fn into_result(self) -> Result<(), ValidationFailure> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationFailure::new(self.errors))
        }
    }

    fn record(&mut self, message: &str, location: &DiagnosticLocation) {
        let file = location
            .system_id
            .as_deref()
            .map(strip_file_scheme)
            .unwrap_or(&self.document)
            .to_string();
        self.errors.push(
            ValidationError::new(message.trim())
                .with_file(file)
                .at(location.line, location.column),
        );
    }
}

impl DiagnosticListener for DiagnosticCollector {
    fn warning(&mut self, message: &str, location: &DiagnosticLocation) {
        self.record(message, location);
    }

    fn error(&mut self, message: &str, location: &DiagnosticLocation) {
        self.record(message, location);
    }

    fn fatal_error(&mut self, message: &str, location: &DiagnosticLocation) {
        self.record(message, location);
    }

    fn message(&mut self, message: &str, location: &DiagnosticLocation) {
        self.record(message, location);
    }
}

fn strip_file_scheme(system_id: &str) -> &str {
    system_id
        .strip_prefix("file://")
        .or_else(|| system_id.strip_prefix("file:"))
        .unwrap_or(system_id)
}
