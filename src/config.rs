use crate::catalog::CatalogPolicy;
use crate::cache::ContentCacheStore;
use crate::cli::{Cli, OutputFormat};
use crate::http_client::HttpClientConfig;
use crate::transform::{ProcessTransformEngine, SAXON_ARGS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

const ENV_PREFIX: &str = "VALIDATE_SCHEMATRON";

const CONFIG_NAMES: [&str; 4] = [
    "validate-schematron.toml",
    "validate-schematron.json",
    ".validate-schematron.toml",
    ".validate-schematron.json",
];

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub validation: ValidationConfig,
    pub catalog: CatalogConfig,
    pub schematron: SchematronConfig,
    pub network: NetworkConfig,
    pub output: OutputConfig,
}

/// Validation-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ValidationConfig {
    /// Number of parallel validation workers
    pub workers: Option<usize>,
    /// Debug logging
    pub debug: bool,
}

/// Schema import resolution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CatalogConfig {
    /// XML catalog files, consulted in order
    pub catalogs: Vec<PathBuf>,
    /// Prefer public identifiers over system identifiers
    pub prefer_public: bool,
    /// Permit imports that resolve to non-local locations
    pub allow_remote_resources: bool,
}

/// Schematron compilation and execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchematronConfig {
    /// Rules applied to every document that passes XML Schema validation
    pub rules: Option<PathBuf>,
    /// Root of the compiled rules cache
    pub cache_dir: PathBuf,
    /// XSLT processor executable
    pub transform_program: String,
    /// Argument template with `{stylesheet}`, `{input}` and `{output}` placeholders
    pub transform_args: Vec<String>,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// HTTP request timeout in seconds
    pub timeout_seconds: u64,
    /// Number of retry attempts for failed downloads
    pub retry_attempts: u32,
    /// Retry delay in milliseconds
    pub retry_delay_ms: u64,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format
    pub format: OutputFormatConfig,
    /// Verbose output
    pub verbose: bool,
    /// Quiet mode (failure count only)
    pub quiet: bool,
}

/// Output format configuration (serializable version of CLI OutputFormat)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormatConfig {
    Human,
    Json,
}

impl From<OutputFormat> for OutputFormatConfig {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Human => OutputFormatConfig::Human,
            OutputFormat::Json => OutputFormatConfig::Json,
        }
    }
}

impl From<OutputFormatConfig> for OutputFormat {
    fn from(format: OutputFormatConfig) -> Self {
        match format {
            OutputFormatConfig::Human => OutputFormat::Human,
            OutputFormatConfig::Json => OutputFormat::Json,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            catalogs: vec![],
            prefer_public: true,
            allow_remote_resources: false,
        }
    }
}

impl Default for SchematronConfig {
    fn default() -> Self {
        Self {
            rules: None,
            cache_dir: ContentCacheStore::default_root(),
            transform_program: "saxon".to_string(),
            transform_args: SAXON_ARGS.iter().map(|arg| arg.to_string()).collect(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            retry_attempts: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormatConfig::Human,
            verbose: false,
            quiet: false,
        }
    }
}

fn env_key(name: &str) -> String {
    format!("{}_{}", ENV_PREFIX, name)
}

fn parse_env<T: std::str::FromStr>(env: &impl EnvProvider, name: &str) -> Result<Option<T>> {
    let key = env_key(name);
    match env.get(&key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Environment(format!("Invalid {} value: {}", key, value))),
        None => Ok(None),
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        let mut config = Config::default();

        if let Some(config_path) = &cli.config {
            let file_config = Self::load_from_file(config_path).await?;
            config = Self::merge_configs(config, file_config);
        } else if let Some(found_config) = Self::find_config_file().await? {
            config = Self::merge_configs(config, found_config);
        }

        config = Self::apply_environment_overrides(config)?;
        config = Self::merge_with_cli(config, cli);

        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    Ok(serde_json::from_str(&content)?)
                }
            }
        }
    }

    /// Find a configuration file in the current directory, then the user config directory
    pub async fn find_config_file() -> Result<Option<Config>> {
        let mut search_dirs = vec![PathBuf::from(".")];
        if let Some(config_dir) = dirs::config_dir() {
            search_dirs.push(config_dir.join("validate-schematron"));
        }

        for dir in &search_dirs {
            if let Some(config) = Self::find_config_file_in(dir).await? {
                return Ok(Some(config));
            }
        }

        Ok(None)
    }

    /// Load the first known configuration file name present in `dir`
    pub async fn find_config_file_in(dir: &Path) -> Result<Option<Config>> {
        for name in &CONFIG_NAMES {
            let path = dir.join(name);
            if tokio::fs::try_exists(&path).await? {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }
        Ok(None)
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: Config) -> Result<Config> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        if let Some(workers) = parse_env(env, "WORKERS")? {
            config.validation.workers = Some(workers);
        }
        if let Some(debug) = parse_env(env, "DEBUG")? {
            config.validation.debug = debug;
        }

        // Catalog settings; the list is separated like PATH
        if let Some(catalogs) = env.get(&env_key("CATALOGS")) {
            config.catalog.catalogs = std::env::split_paths(&catalogs)
                .filter(|path| !path.as_os_str().is_empty())
                .collect();
        }
        if let Some(prefer_public) = parse_env(env, "PREFER_PUBLIC")? {
            config.catalog.prefer_public = prefer_public;
        }
        if let Some(allow_remote) = parse_env(env, "ALLOW_REMOTE")? {
            config.catalog.allow_remote_resources = allow_remote;
        }

        if let Some(rules) = env.get(&env_key("RULES")) {
            config.schematron.rules = Some(PathBuf::from(rules));
        }
        if let Some(cache_dir) = env.get(&env_key("CACHE_DIR")) {
            config.schematron.cache_dir = PathBuf::from(cache_dir);
        }
        if let Some(program) = env.get(&env_key("TRANSFORM_PROGRAM")) {
            config.schematron.transform_program = program;
        }

        if let Some(timeout) = parse_env(env, "TIMEOUT")? {
            config.network.timeout_seconds = timeout;
        }
        if let Some(retry_attempts) = parse_env(env, "RETRY_ATTEMPTS")? {
            config.network.retry_attempts = retry_attempts;
        }

        if let Some(verbose) = parse_env(env, "VERBOSE")? {
            config.output.verbose = verbose;
        }
        if let Some(quiet) = parse_env(env, "QUIET")? {
            config.output.quiet = quiet;
        }
        if let Some(format) = env.get(&env_key("FORMAT")) {
            config.output.format = match format.to_lowercase().as_str() {
                "human" => OutputFormatConfig::Human,
                "json" => OutputFormatConfig::Json,
                _ => {
                    return Err(ConfigError::Environment(format!(
                        "Invalid {} value: {}",
                        env_key("FORMAT"),
                        format
                    )));
                }
            };
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence when given)
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        if cli.workers.is_some() {
            config.validation.workers = cli.workers;
        }
        if cli.debug {
            config.validation.debug = true;
        }

        if !cli.catalogs.is_empty() {
            config.catalog.catalogs = cli.catalogs.clone();
        }
        if cli.prefer_system {
            config.catalog.prefer_public = false;
        }
        if cli.allow_remote {
            config.catalog.allow_remote_resources = true;
        }

        if let Some(rules) = &cli.schematron {
            config.schematron.rules = Some(rules.clone());
        }
        if let Some(cache_dir) = &cli.cache_dir {
            config.schematron.cache_dir = cache_dir.clone();
        }
        if let Some(program) = &cli.transform_program {
            config.schematron.transform_program = program.clone();
        }

        if let Some(format) = cli.format {
            config.output.format = format.into();
        }
        if cli.verbose {
            config.output.verbose = true;
            config.output.quiet = false;
        }
        if cli.quiet {
            config.output.quiet = true;
            config.output.verbose = false;
        }

        config
    }

    /// Merge two configurations (second takes precedence for non-None values)
    pub fn merge_configs(mut base: Config, override_config: Config) -> Config {
        if override_config.validation.workers.is_some() {
            base.validation.workers = override_config.validation.workers;
        }
        base.validation.debug = override_config.validation.debug;

        if !override_config.catalog.catalogs.is_empty() {
            base.catalog.catalogs = override_config.catalog.catalogs;
        }
        base.catalog.prefer_public = override_config.catalog.prefer_public;
        base.catalog.allow_remote_resources = override_config.catalog.allow_remote_resources;

        if override_config.schematron.rules.is_some() {
            base.schematron.rules = override_config.schematron.rules;
        }
        base.schematron.cache_dir = override_config.schematron.cache_dir;
        base.schematron.transform_program = override_config.schematron.transform_program;
        if !override_config.schematron.transform_args.is_empty() {
            base.schematron.transform_args = override_config.schematron.transform_args;
        }

        base.network = override_config.network;
        base.output = override_config.output;

        base
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if let Some(workers) = config.validation.workers {
            if workers == 0 {
                return Err(ConfigError::Validation(
                    "Number of workers must be greater than 0".to_string(),
                ));
            }
            if workers > 1000 {
                return Err(ConfigError::Validation(
                    "Number of workers cannot exceed 1000".to_string(),
                ));
            }
        }

        if config.schematron.transform_program.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Transform program must not be empty".to_string(),
            ));
        }

        for placeholder in ["{stylesheet}", "{input}", "{output}"] {
            if !config
                .schematron
                .transform_args
                .iter()
                .any(|arg| arg.contains(placeholder))
            {
                return Err(ConfigError::Validation(format!(
                    "Transform arguments must contain {}",
                    placeholder
                )));
            }
        }

        if config.network.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        if config.network.retry_attempts > 10 {
            return Err(ConfigError::Validation(
                "Retry attempts cannot exceed 10".to_string(),
            ));
        }

        if config.output.verbose && config.output.quiet {
            return Err(ConfigError::Validation(
                "Cannot enable both verbose and quiet modes".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the effective worker count
    pub fn get_worker_count(config: &Config) -> usize {
        config.validation.workers.unwrap_or_else(num_cpus::get)
    }

    pub fn catalog_policy(config: &Config) -> CatalogPolicy {
        CatalogPolicy::new(
            config.catalog.catalogs.clone(),
            config.catalog.prefer_public,
            config.catalog.allow_remote_resources,
        )
    }

    pub fn http_client_config(config: &Config) -> HttpClientConfig {
        HttpClientConfig {
            timeout_seconds: config.network.timeout_seconds,
            retry_attempts: config.network.retry_attempts,
            retry_delay_ms: config.network.retry_delay_ms,
            ..Default::default()
        }
    }

    pub fn transform_engine(config: &Config) -> ProcessTransformEngine {
        ProcessTransformEngine::new(
            config.schematron.transform_program.clone(),
            config.schematron.transform_args.clone(),
        )
    }

    pub fn cache_store(config: &Config) -> ContentCacheStore {
        ContentCacheStore::new(config.schematron.cache_dir.clone())
    }
}
