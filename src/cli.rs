use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only show the failure count
    Quiet,
    /// Show each error and a summary
    #[default]
    Normal,
    /// Also list valid files and timings
    Verbose,
}

/// Report format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

const AFTER_HELP: &str = r#"Catalog example (OASIS XML Catalogs):

  <catalog xmlns="urn:oasis:names:tc:entity:xmlns:xml:catalog" prefer="public">
    <public publicId="http://example.com/orders" uri="schemas/orders.xsd"/>
    <system systemId="http://example.com/orders.xsd" uri="schemas/orders.xsd"/>
    <uri name="http://example.com/common" uri="schemas/common.xsd"/>
  </catalog>

Schema imports are resolved through the catalogs. Unless --allow-remote is given,
an import that does not resolve to a local file is reported as an error."#;

/// Validate XML documents against XML Schema and Schematron rules
#[derive(Parser, Debug, Clone)]
#[command(name = "validate-schematron")]
#[command(about = "Validate XML documents against XML Schema and Schematron rules")]
#[command(version)]
#[command(after_help = AFTER_HELP)]
pub struct Cli {
    /// Files, glob patterns or http(s) URLs to validate
    #[arg(required = true, help = "Files, glob patterns or URLs to validate")]
    pub paths: Vec<String>,

    /// XML catalog files used to resolve schema imports
    #[arg(short = 'c', long = "catalog", action = clap::ArgAction::Append)]
    pub catalogs: Vec<PathBuf>,

    /// Schematron rules applied after XML Schema validation
    #[arg(short = 's', long = "schematron")]
    pub schematron: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,

    /// Allow schema imports that resolve to remote locations
    #[arg(long = "allow-remote")]
    pub allow_remote: bool,

    /// Prefer system identifiers over public identifiers in catalogs
    #[arg(long = "prefer-system")]
    pub prefer_system: bool,

    /// Number of parallel validation workers
    #[arg(short = 'w', long = "workers")]
    pub workers: Option<usize>,

    /// Directory for compiled Schematron rules
    #[arg(long = "cache-dir")]
    pub cache_dir: Option<PathBuf>,

    /// XSLT processor used to compile and run Schematron rules
    #[arg(long = "transform-program")]
    pub transform_program: Option<String>,

    /// Output format
    #[arg(long = "format", value_enum)]
    pub format: Option<OutputFormat>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Only print the failure count
    #[arg(short = 'q', long = "quiet", conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (TOML or JSON)
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(workers) = self.workers
            && workers == 0
        {
            return Err("Number of workers must be greater than 0".to_string());
        }
        if let Some(program) = &self.transform_program
            && program.trim().is_empty()
        {
            return Err("Transform program must not be empty".to_string());
        }
        Ok(())
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Quiet
        } else if self.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }
}
