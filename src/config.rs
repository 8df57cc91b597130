use crate::catalog::{COLLECTION, DATABASE};
use crate::errors::DbError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Pretty,
    Json,
}

/// Settings as they may appear in a TOML file. Every field is optional so files can be layered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub data_dir: Option<PathBuf>,
    pub db_name: Option<String>,
    pub collection: Option<String>,
    pub log_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub output: Option<OutputFormat>,
}

/// Resolved settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub db_name: String,
    pub collection: String,
    /// When set, logs go to `{log_dir}/{db_name}_logs/`; otherwise to stderr.
    pub log_dir: Option<PathBuf>,
    pub log_level: String,
    pub output: OutputFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            db_name: DATABASE.to_string(),
            collection: COLLECTION.to_string(),
            log_dir: None,
            log_level: "info".to_string(),
            output: OutputFormat::Pretty,
        }
    }
}

impl FileConfig {
    /// Fills unset fields from `lower`; fields already set keep their value.
    pub fn fill_from(&mut self, lower: Self) {
        if self.data_dir.is_none() { self.data_dir = lower.data_dir; }
        if self.db_name.is_none() { self.db_name = lower.db_name; }
        if self.collection.is_none() { self.collection = lower.collection; }
        if self.log_dir.is_none() { self.log_dir = lower.log_dir; }
        if self.log_level.is_none() { self.log_level = lower.log_level; }
        if self.output.is_none() { self.output = lower.output; }
    }
}

impl AppConfig {
    /// Reads `BOOKSTORE_*` variables into a layer.
    ///
    /// # Errors
    /// Returns `DbError::Config` when `BOOKSTORE_OUTPUT` is neither `pretty` nor `json`.
    pub fn env_layer<I: IntoIterator<Item = (String, String)>>(vars: I) -> Result<FileConfig, DbError> {
        let mut out = FileConfig::default();
        for (k, v) in vars {
            match k.as_str() {
                "BOOKSTORE_DATA_DIR" => out.data_dir = Some(PathBuf::from(v)),
                "BOOKSTORE_DB" => out.db_name = Some(v),
                "BOOKSTORE_COLLECTION" => out.collection = Some(v),
                "BOOKSTORE_LOG_DIR" => out.log_dir = Some(PathBuf::from(v)),
                "BOOKSTORE_LOG_LEVEL" => out.log_level = Some(v),
                "BOOKSTORE_OUTPUT" => {
                    let format = <OutputFormat as clap::ValueEnum>::from_str(&v, true)
                        .map_err(|_| DbError::Config(format!("BOOKSTORE_OUTPUT: expected pretty or json, got '{v}'")))?;
                    out.output = Some(format);
                }
                _ => {}
            }
        }
        Ok(out)
    }

    /// # Errors
    /// Returns `DbError::Config` when the file is not valid TOML for [`FileConfig`].
    pub fn parse_file(path: &Path) -> Result<FileConfig, DbError> {
        let s = std::fs::read_to_string(path).map_err(|e| DbError::Config(format!("read {}: {}", path.display(), e)))?;
        toml::from_str(&s).map_err(|e| DbError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Candidate config files, highest precedence first. Only an explicit path must exist.
    #[must_use]
    pub fn config_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(p) = explicit { paths.push(p.to_path_buf()); }
        if let Ok(p) = std::env::var("BOOKSTORE_CONFIG") { paths.push(PathBuf::from(p)); }
        if let Some(dir) = dirs_next::config_dir() { paths.push(dir.join("bookstore.toml")); }
        if let Ok(cur) = std::env::current_dir() { paths.push(cur.join("bookstore.toml")); }
        paths
    }

    /// Resolves settings. Precedence: `overrides` (CLI) > environment > config files > defaults.
    ///
    /// # Errors
    /// Returns `DbError::Config` if the explicit file is missing, any present file is invalid or
    /// a `BOOKSTORE_*` variable cannot be parsed.
    pub fn load(explicit: Option<&Path>, overrides: FileConfig) -> Result<Self, DbError> {
        if let Some(p) = explicit && !p.exists() {
            return Err(DbError::Config(format!("config file {} not found", p.display())));
        }
        let mut layer = overrides;
        layer.fill_from(Self::env_layer(std::env::vars())?);
        for p in Self::config_paths(explicit) {
            if p.exists() {
                layer.fill_from(Self::parse_file(&p)?);
            }
        }
        Ok(Self::resolve(layer))
    }

    #[must_use]
    pub fn resolve(layer: FileConfig) -> Self {
        let d = Self::default();
        Self {
            data_dir: layer.data_dir.unwrap_or(d.data_dir),
            db_name: layer.db_name.unwrap_or(d.db_name),
            collection: layer.collection.unwrap_or(d.collection),
            log_dir: layer.log_dir.or(d.log_dir),
            log_level: layer.log_level.unwrap_or(d.log_level),
            output: layer.output.unwrap_or(d.output),
        }
    }
}
