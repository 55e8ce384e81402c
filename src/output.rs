//! Output and reporting
//!
//! Human-readable and JSON renderings of a [`BatchReport`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cli::{OutputFormat, VerbosityLevel};
use crate::error::Error;
use crate::validator::{BatchReport, FileOutcome};

/// JSON document written for `--format json`
#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    generated_at: DateTime<Utc>,
    success: bool,
    files_attempted: usize,
    #[serde(flatten)]
    report: &'a BatchReport,
}

/// Output formatter for batch reports
pub struct Output {
    verbosity: VerbosityLevel,
    format: OutputFormat,
    show_colors: bool,
}

impl Output {
    pub fn new(verbosity: VerbosityLevel, format: OutputFormat) -> Self {
        Self {
            verbosity,
            format,
            show_colors: atty::is(atty::Stream::Stdout),
        }
    }

    pub fn with_colors(mut self, show_colors: bool) -> Self {
        self.show_colors = show_colors;
        self
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    pub fn format_report(&self, report: &BatchReport) -> Result<String, serde_json::Error> {
        match self.format {
            OutputFormat::Json => self.format_json(report),
            OutputFormat::Human => Ok(self.format_human(report)),
        }
    }

    fn format_json(&self, report: &BatchReport) -> Result<String, serde_json::Error> {
        let json = JsonReport {
            generated_at: Utc::now(),
            success: report.is_success(),
            files_attempted: report.files_attempted(),
            report,
        };
        serde_json::to_string_pretty(&json)
    }

    fn format_human(&self, report: &BatchReport) -> String {
        let mut output = String::new();

        if self.verbosity == VerbosityLevel::Quiet {
            if !report.is_success() {
                output.push_str(&format!("Errors: {}\n", report.errors.len()));
            }
            return output;
        }

        for outcome in &report.outcomes {
            if !outcome.is_valid() || self.verbosity >= VerbosityLevel::Verbose {
                output.push_str(&self.format_outcome(outcome));
            }
        }

        output.push_str(&self.format_summary(report));
        output
    }

    pub fn format_outcome(&self, outcome: &FileOutcome) -> String {
        if outcome.is_valid() {
            return format!(
                "{}  {} ({})\n",
                self.colorize("✓ VALID", "32"),
                outcome.file,
                format_duration(Duration::from_millis(outcome.duration_ms))
            );
        }

        let mut output = String::new();
        for error in &outcome.errors {
            output.push_str(&format!(
                "{} {}\n",
                self.colorize("Validation FAILED on", "31"),
                error
            ));
        }
        output
    }

    fn format_summary(&self, report: &BatchReport) -> String {
        let mut output = format!(
            "Validated {} of {} file{}",
            report.files_validated,
            report.files_attempted(),
            if report.files_attempted() == 1 { "" } else { "s" }
        );
        if !report.is_success() {
            output.push_str(&format!(
                ", {}",
                self.colorize(&format!("{} error(s)", report.errors.len()), "31")
            ));
        }
        output.push_str(&format!(
            " in {}\n",
            format_duration(Duration::from_millis(report.duration_ms))
        ));
        output
    }

    /// Rendering of an error that aborted the batch
    pub fn format_fatal(&self, error: &Error) -> String {
        match self.format {
            OutputFormat::Json => serde_json::json!({
                "generated_at": Utc::now(),
                "success": false,
                "fatal": error.to_string(),
            })
            .to_string(),
            OutputFormat::Human => format!("{} {}", self.colorize("Error:", "31"), error),
        }
    }
}

pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs_f64();
    if total_secs < 1.0 {
        format!("{}ms", duration.as_millis())
    } else if total_secs < 60.0 {
        format!("{:.2}s", total_secs)
    } else {
        let mins = (total_secs / 60.0) as u64;
        let secs = total_secs % 60.0;
        format!("{}m{:.1}s", mins, secs)
    }
}
