//! XSLT execution behind a pair of traits.
//!
//! A [`TransformEngine`] is a shareable factory. The [`TransformContext`] it creates is
//! not: each worker owns one through its [`TransformRunner`] and never hands it to
//! another thread. [`ProcessTransformEngine`] drives an external XSLT processor.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tempfile::TempDir;
use tracing::debug;

use crate::diagnostics::{DiagnosticCollector, DiagnosticListener, DiagnosticLocation, Severity};
use crate::error::{Error, Result};

/// Where a transform writes its result
#[derive(Debug, Clone, Copy)]
pub enum Destination<'a> {
    /// Return the result bytes to the caller
    Capture,
    /// Write the result to this file; the returned bytes are empty
    File(&'a Path),
}

/// Per-worker execution context. Not shared between threads.
pub trait TransformContext {
    /// Apply `stylesheet` to `input`, reporting every diagnostic to `listener`.
    ///
    /// Diagnostics are not errors at this level; `Err` means the engine itself could
    /// not run.
    fn transform(
        &mut self,
        stylesheet: &Path,
        input: &Path,
        destination: Destination<'_>,
        listener: &mut dyn DiagnosticListener,
    ) -> Result<Vec<u8>>;
}

/// Factory for transform contexts, shared by every worker
pub trait TransformEngine: Send + Sync {
    type Context: TransformContext;

    fn new_context(&self) -> Result<Self::Context>;
}

/// Runs compiled stylesheets with a lazily created, worker-owned context
pub struct TransformRunner<E: TransformEngine> {
    engine: Arc<E>,
    context: Option<E::Context>,
}

impl<E: TransformEngine> TransformRunner<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            engine,
            context: None,
        }
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    fn context(&mut self) -> Result<&mut E::Context> {
        if self.context.is_none() {
            self.context = Some(self.engine.new_context()?);
        }
        self.context.as_mut().ok_or_else(|| Error::Engine {
            details: "transform context unavailable".to_string(),
        })
    }

    /// Apply `artifact` to `input` and return the result.
    ///
    /// Any diagnostic, including warnings and `xsl:message` output, fails the call
    /// with an aggregate attributed to `input`.
    pub fn run(&mut self, artifact: &Path, input: &Path) -> Result<Vec<u8>> {
        let mut collector = DiagnosticCollector::new(input);
        let output =
            self.context()?
                .transform(artifact, input, Destination::Capture, &mut collector)?;
        collector.into_result()?;
        Ok(output)
    }

    /// Apply `stylesheet` to `input`, writing the result to `output`.
    pub fn run_to_file(&mut self, stylesheet: &Path, input: &Path, output: &Path) -> Result<()> {
        let mut collector = DiagnosticCollector::new(input);
        self.context()?
            .transform(stylesheet, input, Destination::File(output), &mut collector)?;
        collector.into_result()?;
        Ok(())
    }
}

/// Saxon command line (`saxon` launcher script)
pub const SAXON_ARGS: &[&str] = &["-s:{input}", "-xsl:{stylesheet}", "-o:{output}"];

/// libxslt command line
pub const XSLTPROC_ARGS: &[&str] = &["-o", "{output}", "{stylesheet}", "{input}"];

/// Transform engine that runs an external XSLT processor per call.
///
/// Arguments are a template; `{stylesheet}`, `{input}` and `{output}` are replaced
/// with paths. Diagnostics are recovered from the processor's stderr.
#[derive(Debug, Clone)]
pub struct ProcessTransformEngine {
    program: String,
    args: Vec<String>,
}

impl ProcessTransformEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn saxon() -> Self {
        Self::new("saxon", SAXON_ARGS.iter().map(|s| s.to_string()).collect())
    }

    pub fn xsltproc() -> Self {
        Self::new(
            "xsltproc",
            XSLTPROC_ARGS.iter().map(|s| s.to_string()).collect(),
        )
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Whether the program can be found on `PATH` (or exists, when given as a path).
    pub fn is_available(&self) -> bool {
        let program = Path::new(&self.program);
        if program.components().count() > 1 {
            return program.is_file();
        }
        std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
            .unwrap_or(false)
    }

    fn command_args(&self, stylesheet: &Path, input: &Path, output: &Path) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{stylesheet}", &stylesheet.to_string_lossy())
                    .replace("{input}", &input.to_string_lossy())
                    .replace("{output}", &output.to_string_lossy())
            })
            .collect()
    }
}

impl TransformEngine for ProcessTransformEngine {
    type Context = ProcessTransformContext;

    fn new_context(&self) -> Result<Self::Context> {
        let scratch = tempfile::Builder::new()
            .prefix("validate-schematron-")
            .tempdir()?;
        Ok(ProcessTransformContext {
            engine: self.clone(),
            scratch,
            runs: 0,
        })
    }
}

/// Worker-owned context: a scratch directory for captured results
pub struct ProcessTransformContext {
    engine: ProcessTransformEngine,
    scratch: TempDir,
    runs: u64,
}

impl ProcessTransformContext {
    fn capture_path(&mut self) -> PathBuf {
        self.runs += 1;
        self.scratch.path().join(format!("result-{}.out", self.runs))
    }
}

impl TransformContext for ProcessTransformContext {
    fn transform(
        &mut self,
        stylesheet: &Path,
        input: &Path,
        destination: Destination<'_>,
        listener: &mut dyn DiagnosticListener,
    ) -> Result<Vec<u8>> {
        let output_path = match destination {
            Destination::File(path) => path.to_path_buf(),
            Destination::Capture => self.capture_path(),
        };

        let args = self.engine.command_args(stylesheet, input, &output_path);
        debug!(program = %self.engine.program, ?args, "running transform");

        let output = Command::new(&self.engine.program)
            .args(&args)
            .output()
            .map_err(|e| Error::Engine {
                details: format!("cannot run {}: {}", self.engine.program, e),
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let diagnostics = parse_diagnostics(&stderr);
        let reported = !diagnostics.is_empty();
        for diagnostic in diagnostics {
            listener.report(diagnostic.severity, &diagnostic.message, &diagnostic.location);
        }

        if !output.status.success() && !reported {
            listener.fatal_error(
                &format!("{} exited with {}", self.engine.program, output.status),
                &DiagnosticLocation::none(),
            );
        }

        match destination {
            Destination::File(_) => Ok(Vec::new()),
            Destination::Capture => match std::fs::read(&output_path) {
                Ok(bytes) => {
                    let _ = std::fs::remove_file(&output_path);
                    Ok(bytes)
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
                Err(e) => Err(Error::resource_io(&output_path, e)),
            },
        }
    }
}

/// One diagnostic recovered from processor output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDiagnostic {
    pub severity: Severity,
    pub message: String,
    pub location: DiagnosticLocation,
}

/// Summary lines processors print after the real diagnostics
const SUMMARY_PREFIXES: &[&str] = &[
    "Errors were reported during",
    "Transformation failed:",
    "Processing terminated by xsl:message",
    "no result for",
];

static SAXON_LOCATION_REGEX: OnceLock<Regex> = OnceLock::new();
static PREFIX_LOCATION_REGEX: OnceLock<Regex> = OnceLock::new();
static LIBXSLT_LOCATION_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_saxon_location_regex() -> &'static Regex {
    SAXON_LOCATION_REGEX.get_or_init(|| {
        Regex::new(r"on line (\d+)(?: column (\d+))?(?: of ([^:\s]+))?")
            .expect("Failed to compile Saxon location regex")
    })
}

fn get_prefix_location_regex() -> &'static Regex {
    PREFIX_LOCATION_REGEX.get_or_init(|| {
        Regex::new(r"^(\S+?):(\d+): ").expect("Failed to compile file:line regex")
    })
}

fn get_libxslt_location_regex() -> &'static Regex {
    LIBXSLT_LOCATION_REGEX.get_or_init(|| {
        Regex::new(r"file (\S+) line (\d+)").expect("Failed to compile libxslt location regex")
    })
}

/// Split processor stderr into diagnostics.
///
/// Indented lines continue the previous entry. Entries that do not look like a
/// warning or an error are `xsl:message` output and come back as [`Severity::Message`].
pub fn parse_diagnostics(stderr: &str) -> Vec<ParsedDiagnostic> {
    let mut entries: Vec<String> = Vec::new();
    for line in stderr.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let continues = line.starts_with(' ') || line.starts_with('\t');
        match entries.last_mut() {
            Some(last) if continues => {
                last.push(' ');
                last.push_str(line.trim());
            }
            _ => entries.push(line.trim_end().to_string()),
        }
    }

    entries
        .into_iter()
        .filter(|entry| !SUMMARY_PREFIXES.iter().any(|p| entry.starts_with(p)))
        .map(|entry| {
            let severity = classify(&entry);
            let location = locate(&entry);
            let message = match severity {
                Severity::Message => unescape(&entry),
                _ => entry,
            };
            ParsedDiagnostic {
                severity,
                message,
                location,
            }
        })
        .collect()
}

fn classify(entry: &str) -> Severity {
    let lower = entry.to_ascii_lowercase();
    let body = get_prefix_location_regex()
        .find(&lower)
        .map(|m| &lower[m.end()..])
        .unwrap_or(&lower);

    if body.starts_with("warning") {
        Severity::Warning
    } else if body.starts_with("fatal") {
        Severity::Fatal
    } else if body.starts_with("error")
        || body.starts_with("static error")
        || body.starts_with("type error")
        || body.starts_with("dynamic error")
        || body.starts_with("syntax error")
        || body.starts_with("parser error")
        || body.starts_with("namespace error")
        || body.starts_with("runtime error")
        || body.starts_with("compilation error")
        || body.starts_with("xpath error")
    {
        Severity::Error
    } else {
        Severity::Message
    }
}

fn locate(entry: &str) -> DiagnosticLocation {
    if let Some(caps) = get_saxon_location_regex().captures(entry) {
        return DiagnosticLocation {
            system_id: caps.get(3).map(|m| m.as_str().to_string()),
            line: caps[1].parse().ok(),
            column: caps.get(2).and_then(|m| m.as_str().parse().ok()),
        };
    }
    if let Some(caps) = get_prefix_location_regex().captures(entry) {
        return DiagnosticLocation {
            system_id: Some(caps[1].to_string()),
            line: caps[2].parse().ok(),
            column: None,
        };
    }
    if let Some(caps) = get_libxslt_location_regex().captures(entry) {
        return DiagnosticLocation {
            system_id: Some(caps[1].to_string()),
            line: caps[2].parse().ok(),
            column: None,
        };
    }
    DiagnosticLocation::none()
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
