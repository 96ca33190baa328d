//! `markql.toml`: record store, view documents, output and execution defaults.
//!
//! Every key is optional. Relative paths resolve against the directory of
//! the config file. Command-line flags override what is loaded here.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE: &str = "markql.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid view pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Output rendering for query results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// YAML or JSON snapshot of `{bookmarks, tags, edges}`.
    pub snapshot: Option<PathBuf>,
    /// SQLite database with the reference schema.
    pub sqlite: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ViewsConfig {
    /// Glob patterns of view documents.
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub format: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionConfig {
    pub pushdown: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self { pushdown: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub store: StoreConfig,
    pub views: ViewsConfig,
    pub output: OutputConfig,
    pub execution: ExecutionConfig,
    /// Directory relative paths resolve against.
    #[serde(skip)]
    pub root: PathBuf,
}

impl Config {
    /// Parse config text; relative paths resolve against `root`.
    pub fn parse(text: &str, root: &Path) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(text)?;
        config.root = root.to_path_buf();
        config.check()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let root = path.parent().unwrap_or(Path::new("."));
        let config = Self::parse(&text, root)?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Load `explicit`, else `markql.toml` in the working directory when it
    /// exists, else defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load(path),
            None if Path::new(CONFIG_FILE).is_file() => Self::load(Path::new(CONFIG_FILE)),
            None => Ok(Self {
                root: PathBuf::from("."),
                ..Self::default()
            }),
        }
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.store.snapshot.is_some() && self.store.sqlite.is_some() {
            return Err(ConfigError::Invalid(
                "[store] takes either snapshot or sqlite, not both".to_string(),
            ));
        }
        for pattern in &self.views.paths {
            glob::Pattern::new(pattern).map_err(|e| ConfigError::Pattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.store.snapshot.as_deref().map(|p| self.resolve(p))
    }

    pub fn sqlite_path(&self) -> Option<PathBuf> {
        self.store.sqlite.as_deref().map(|p| self.resolve(p))
    }

    /// Expand `[views] paths` into existing files, sorted, without repeats.
    pub fn view_files(&self) -> Result<Vec<PathBuf>, ConfigError> {
        let mut files = Vec::new();
        for pattern in &self.views.paths {
            let full = self.resolve(Path::new(pattern));
            let full = full.to_string_lossy();
            let matches = glob::glob(&full).map_err(|e| ConfigError::Pattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            let mut found: Vec<PathBuf> = matches.filter_map(Result::ok).filter(|p| p.is_file()).collect();
            found.sort();
            for path in found {
                if !files.contains(&path) {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }
}

/// Starter `markql.toml` written by `markql init`.
pub const STARTER_CONFIG: &str = r#"# markql configuration

[store]
snapshot = "records.yaml"
# sqlite = "bookmarks.db"

[views]
paths = ["views/*.yaml"]

[output]
format = "table"   # table | json | yaml

[execution]
pushdown = true
"#;
