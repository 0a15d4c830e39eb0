//! Configuration management for Meridian.
//!
//! Configuration is merged from several sources, later ones winning:
//! - Built-in defaults
//! - Config file (`.meridian/config.yaml`)
//! - Environment variables
//! - Command-line flags
//!
//! Engine tuning (embedding provider, thresholds) lives in the same YAML file
//! but is parsed by `meridian-engine`; this module only reads the sections it
//! owns and ignores the rest.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

/// Name of the per-workspace state directory.
pub const STATE_DIR: &str = ".meridian";

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the workspace root (contains .meridian/)
    pub workspace: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Document corpus produced by the ingestion step (JSON array)
    pub documents: Option<PathBuf>,

    /// Log level override
    pub log_level: Option<String>,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,
}

/// Sections of the config file owned by this crate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    workspace: Option<WorkspaceSection>,
    logging: Option<LoggingSection>,
    data: Option<DataSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkspaceSection {
    path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingSection {
    level: Option<String>,
    color: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DataSection {
    documents: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            documents: None,
            log_level: None,
            verbose: false,
            no_color: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, the YAML config file and the environment.
    ///
    /// Environment variables:
    /// - `MERIDIAN_WORKSPACE`: Override workspace path
    /// - `MERIDIAN_CONFIG`: Path to config file
    /// - `MERIDIAN_DOCUMENTS`: Path to the document corpus
    /// - `RUST_LOG`: Log level
    /// - `NO_COLOR`: Disable colored output
    ///
    /// # Example
    /// ```no_run
    /// use meridian_core::config::AppConfig;
    ///
    /// let config = AppConfig::load().expect("Failed to load config");
    /// println!("Workspace: {:?}", config.workspace);
    /// ```
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();

        if let Ok(workspace) = std::env::var("MERIDIAN_WORKSPACE") {
            config.workspace = PathBuf::from(workspace);
        }

        if let Ok(config_file) = std::env::var("MERIDIAN_CONFIG") {
            config.config_file = Some(PathBuf::from(config_file));
        }

        if !config.workspace.exists() {
            return Err(AppError::Config(format!(
                "Workspace directory does not exist: {:?}",
                config.workspace
            )));
        }

        let config_path = config.config_path();
        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        }

        // Environment variables override YAML config
        if let Ok(documents) = std::env::var("MERIDIAN_DOCUMENTS") {
            config.documents = Some(PathBuf::from(documents));
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            config.log_level = Some(level);
        }

        if std::env::var("NO_COLOR").is_ok() {
            config.no_color = true;
        }

        Ok(config)
    }

    /// Merge a YAML configuration file into a copy of this config.
    fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config_file: ConfigFile = serde_yaml::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;

        let mut result = self.clone();

        if let Some(path) = config_file.workspace.and_then(|ws| ws.path) {
            result.workspace = PathBuf::from(path);
        }

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
        }

        if let Some(documents) = config_file.data.and_then(|d| d.documents) {
            let documents = PathBuf::from(documents);
            // Relative corpus paths are resolved against the workspace
            result.documents = Some(if documents.is_relative() {
                result.workspace.join(documents)
            } else {
                documents
            });
        }

        Ok(result)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// Command-line flags take precedence over environment variables and
    /// the config file.
    pub fn with_overrides(
        mut self,
        workspace: Option<PathBuf>,
        config_file: Option<PathBuf>,
        documents: Option<PathBuf>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(workspace) = workspace {
            self.workspace = workspace;
        }

        if let Some(config_file) = config_file {
            self.config_file = Some(config_file);
        }

        if let Some(documents) = documents {
            self.documents = Some(documents);
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Path of the YAML config file in effect.
    pub fn config_path(&self) -> PathBuf {
        match self.config_file {
            Some(ref cf) => cf.clone(),
            None => self.meridian_dir().join("config.yaml"),
        }
    }

    /// Get the path to the .meridian directory.
    pub fn meridian_dir(&self) -> PathBuf {
        self.workspace.join(STATE_DIR)
    }

    /// Directory holding persisted partition stores and the query cache.
    pub fn cache_dir(&self) -> PathBuf {
        self.meridian_dir().join("cache")
    }

    /// Ensure the .meridian directory exists.
    pub fn ensure_meridian_dir(&self) -> AppResult<()> {
        let dir = self.meridian_dir();
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| {
                AppError::Config(format!("Failed to create {} directory: {}", STATE_DIR, e))
            })?;
        }
        Ok(())
    }

    /// Resolve the document corpus path, failing when none is configured.
    pub fn documents_path(&self) -> AppResult<&Path> {
        let path = self.documents.as_deref().ok_or_else(|| {
            AppError::Config(
                "No document corpus configured. Pass --documents or set MERIDIAN_DOCUMENTS"
                    .to_string(),
            )
        })?;

        if !path.exists() {
            return Err(AppError::Config(format!(
                "Document corpus not found: {:?}",
                path
            )));
        }

        Ok(path)
    }
}
