use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::graph::{LayoutKind, Metric};
use crate::normalize::ConceptPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub citegraph: CitegraphConfig,
    pub stores: BTreeMap<String, StoreConfig>,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub http_server: HttpServerConfig,
}

/// Top-level settings
#[derive(Debug, Clone, Deserialize)]
pub struct CitegraphConfig {
    /// Store profile used when no `--store` is given.
    pub default_store: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
    /// Folder scanned by `import` and watched by `watch`.
    #[serde(default = "default_batch_folder")]
    pub batch_folder: PathBuf,
}

/// One named database. Sessions are built from an explicit profile; there is
/// no process-wide "current database".
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl StoreConfig {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// Import / normalization settings
#[derive(Debug, Clone, Deserialize)]
pub struct ImportConfig {
    #[serde(default)]
    pub concept_policy: ConceptPolicy,
    #[serde(default = "default_entity_cache_capacity")]
    pub entity_cache_capacity: usize,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            concept_policy: ConceptPolicy::default(),
            entity_cache_capacity: default_entity_cache_capacity(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// Graph analytics settings
#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_metrics")]
    pub default_metrics: Vec<String>,
    #[serde(default = "default_layout")]
    pub layout: String,
    #[serde(default = "default_layout_iterations")]
    pub layout_iterations: usize,
    #[serde(default = "default_layout_seed")]
    pub layout_seed: u64,
    /// Upper bound on spring iterations a caller may request.
    #[serde(default = "default_max_layout_iterations")]
    pub max_layout_iterations: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            default_metrics: default_metrics(),
            layout: default_layout(),
            layout_iterations: default_layout_iterations(),
            layout_seed: default_layout_seed(),
            max_layout_iterations: default_max_layout_iterations(),
        }
    }
}

impl GraphConfig {
    /// Parsed `default_metrics`.
    pub fn metrics(&self) -> crate::Result<Vec<Metric>> {
        self.default_metrics.iter().map(|m| Metric::from_str(m)).collect()
    }

    /// Parsed `layout`, with iterations and seed applied.
    pub fn layout_kind(&self) -> crate::Result<LayoutKind> {
        LayoutKind::parse(&self.layout, self.layout_iterations, self.layout_seed)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
            allowed_origins: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_batch_folder() -> PathBuf {
    PathBuf::from("batches")
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_entity_cache_capacity() -> usize {
    4096
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_metrics() -> Vec<String> {
    vec!["in_degree".to_string(), "betweenness".to_string()]
}

fn default_layout() -> String {
    "spring".to_string()
}

fn default_layout_iterations() -> usize {
    50
}

fn default_layout_seed() -> u64 {
    42
}

fn default_max_layout_iterations() -> usize {
    500
}

fn default_http_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in CITEGRAPH_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        let _ = dotenv::dotenv();

        let config_path = std::env::var("CITEGRAPH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        Self::from_toml_str(&config_str)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).context("Failed to parse config.toml")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.stores.is_empty() {
            anyhow::bail!("at least one [stores.<name>] section is required");
        }

        if !self.stores.contains_key(&self.citegraph.default_store) {
            anyhow::bail!(
                "citegraph.default_store = {:?} does not name a configured store (known: {})",
                self.citegraph.default_store,
                self.store_names().join(", ")
            );
        }

        self.graph
            .metrics()
            .map_err(|e| anyhow::anyhow!("graph.default_metrics: {}", e))?;

        if self.graph.layout_iterations == 0 {
            anyhow::bail!("graph.layout_iterations must be greater than 0");
        }

        if self.graph.layout_iterations > self.graph.max_layout_iterations {
            anyhow::bail!(
                "graph.layout_iterations ({}) exceeds graph.max_layout_iterations ({})",
                self.graph.layout_iterations,
                self.graph.max_layout_iterations
            );
        }

        self.graph
            .layout_kind()
            .map_err(|e| anyhow::anyhow!("graph.layout: {}", e))?;

        Ok(())
    }

    /// Resolve a store profile by name, falling back to `default_store`.
    pub fn store(&self, name: Option<&str>) -> crate::Result<&StoreConfig> {
        let name = name.unwrap_or(&self.citegraph.default_store);
        self.stores.get(name).ok_or_else(|| {
            crate::CitegraphError::Config(format!(
                "unknown store {:?} (known: {})",
                name,
                self.store_names().join(", ")
            ))
        })
    }

    pub fn store_names(&self) -> Vec<&str> {
        self.stores.keys().map(String::as_str).collect()
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.citegraph.migrations_dir
    }

    pub fn batch_folder(&self) -> &Path {
        &self.citegraph.batch_folder
    }
}
