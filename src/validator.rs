//! Batch validation.
//!
//! Each input goes through XML Schema validation and, when it passes and a rules
//! file was given, through the compiled Schematron rules. Diagnostics accumulate
//! per file and the batch keeps going; anything else stops it.
//!
//! With more than one worker the batch runs on a dedicated rayon pool with one task
//! per worker. Every worker lazily builds its own [`TransformRunner`], reuses it for
//! each input it claims, and never shares it.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::diagnostics::{DiagnosticCollector, ValidationError, ValidationFailure};
use crate::error::{Error, Result};
use crate::file_discovery::input_path;
use crate::schema_validator::SchemaEngine;
use crate::schematron::SchematronCompiler;
use crate::transform::{TransformEngine, TransformRunner};

/// Outcome of one input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub file: String,
    pub errors: Vec<ValidationError>,
    pub duration_ms: u64,
}

impl FileOutcome {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Result of a whole batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Every accumulated error, in input order
    pub errors: Vec<ValidationError>,
    /// Files that produced no error
    pub files_validated: usize,
    pub outcomes: Vec<FileOutcome>,
    pub duration_ms: u64,
}

impl BatchReport {
    fn from_outcomes(outcomes: Vec<FileOutcome>, duration: Duration) -> Self {
        let files_validated = outcomes.iter().filter(|o| o.is_valid()).count();
        let errors = outcomes
            .iter()
            .flat_map(|o| o.errors.iter().cloned())
            .collect();
        Self {
            errors,
            files_validated,
            outcomes,
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn files_attempted(&self) -> usize {
        self.outcomes.len()
    }

    /// The validated-file count, or one aggregate failure listing every error.
    pub fn into_result(self) -> Result<usize> {
        if self.errors.is_empty() {
            Ok(self.files_validated)
        } else {
            Err(Error::Validation(ValidationFailure::new(self.errors)))
        }
    }
}

/// Drives the schema stage and the Schematron stage over a batch of inputs
pub struct ValidationOrchestrator<S: SchemaEngine, E: TransformEngine> {
    schema_engine: Arc<S>,
    compiler: Arc<SchematronCompiler<E>>,
    transform_engine: Arc<E>,
    workers: usize,
}

impl<S: SchemaEngine, E: TransformEngine> ValidationOrchestrator<S, E> {
    pub fn new(
        schema_engine: Arc<S>,
        compiler: Arc<SchematronCompiler<E>>,
        transform_engine: Arc<E>,
    ) -> Self {
        Self {
            schema_engine,
            compiler,
            transform_engine,
            workers: 1,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn compiler(&self) -> &Arc<SchematronCompiler<E>> {
        &self.compiler
    }

    /// Validate every input and report what was found.
    ///
    /// Diagnostics are accumulated and never stop the batch. Any other error
    /// (unreadable input, failed rules compilation, unresolvable identifier) aborts
    /// the batch and is returned as is.
    pub fn validate_batch(&self, files: &[String], rules_file: Option<&Path>) -> Result<BatchReport> {
        let start = Instant::now();
        info!(files = files.len(), workers = self.workers, "starting validation batch");

        let outcomes = if self.workers == 1 || files.len() < 2 {
            let mut runner = TransformRunner::new(Arc::clone(&self.transform_engine));
            files
                .iter()
                .map(|file| self.validate_file(file, rules_file, &mut runner))
                .collect::<Result<Vec<_>>>()?
        } else {
            self.validate_parallel(files, rules_file)?
        };

        let report = BatchReport::from_outcomes(outcomes, start.elapsed());
        info!(
            validated = report.files_validated,
            errors = report.errors.len(),
            took_ms = report.duration_ms,
            "validation batch finished"
        );
        Ok(report)
    }

    /// Fan the batch out over long-lived workers.
    ///
    /// Each worker owns one [`TransformRunner`] for the whole batch and claims the
    /// next unclaimed input until none is left or some worker hit a fatal error.
    fn validate_parallel(&self, files: &[String], rules_file: Option<&Path>) -> Result<Vec<FileOutcome>> {
        let workers = self.workers.min(files.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("validate-worker-{}", i))
            .build()
            .map_err(|e| Error::Concurrency {
                details: e.to_string(),
            })?;

        let next = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);
        let (sender, receiver) = mpsc::channel();

        pool.scope(|scope| {
            for _ in 0..workers {
                let sender = sender.clone();
                let (next, stop) = (&next, &stop);
                scope.spawn(move |_| {
                    let mut runner = TransformRunner::new(Arc::clone(&self.transform_engine));
                    while !stop.load(Ordering::Acquire) {
                        let index = next.fetch_add(1, Ordering::AcqRel);
                        let Some(file) = files.get(index) else {
                            break;
                        };
                        let outcome = self.validate_file(file, rules_file, &mut runner);
                        if outcome.is_err() {
                            stop.store(true, Ordering::Release);
                        }
                        if sender.send((index, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(sender);

        let mut outcomes: Vec<(usize, Result<FileOutcome>)> = receiver.into_iter().collect();
        outcomes.sort_by_key(|(index, _)| *index);
        // The earliest fatal error in input order wins.
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }

    fn validate_file(
        &self,
        file: &str,
        rules_file: Option<&Path>,
        runner: &mut TransformRunner<E>,
    ) -> Result<FileOutcome> {
        let start = Instant::now();
        debug!(file, "validating");

        let mut errors = self.schema_stage(file)?;

        if errors.is_empty() {
            if let Some(rules_file) = rules_file {
                let compiled = self.compiler.compile(rules_file)?;
                match runner.run(&compiled.artifact, &input_path(file)?) {
                    Ok(_) => {}
                    Err(error) if error.is_recoverable() => {
                        errors.extend(error.into_validation_errors(file))
                    }
                    Err(error) => return Err(error),
                }
            }
        }

        let duration = start.elapsed();
        if errors.is_empty() {
            info!(file, "Validation successful, took {} ms", duration.as_millis());
        } else {
            info!(file, errors = errors.len(), "validation failed");
        }

        Ok(FileOutcome {
            file: file.to_string(),
            errors,
            duration_ms: duration.as_millis() as u64,
        })
    }

    fn schema_stage(&self, file: &str) -> Result<Vec<ValidationError>> {
        let mut collector = DiagnosticCollector::for_document(file);
        match self.schema_engine.validate(file, &mut collector) {
            Ok(()) => Ok(collector.into_errors()),
            // The denial explains every load failure it caused.
            Err(error) if error.is_recoverable() => Ok(error.into_validation_errors(file)),
            Err(error) => Err(error),
        }
    }
}
