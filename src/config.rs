//! Configuration management for the property mapper
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (mapper.toml)
//! - Environment variables (MAPPER__*)
//!
//! ## Example config file (mapper.toml):
//! ```toml
//! [mapper]
//! similarity = 50
//! allow_unknown = false
//! strict_check = false
//!
//! [schemas]
//! paths = ["schemas"]
//!
//! [output]
//! format = "pretty"
//! include_unknown = false
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::schema::{KindOptions, DEFAULT_SIMILARITY};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapperConfig {
    /// Defaults for kinds that neither declare nor inherit an option
    #[serde(default)]
    pub mapper: KindDefaults,

    /// Where schema documents live
    #[serde(default)]
    pub schemas: SchemaPaths,

    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,
}

/// Kind option defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindDefaults {
    /// Percentage of declared fields a record must fill
    #[serde(default = "default_similarity")]
    pub similarity: u8,

    /// Keep undeclared keys as unknown params instead of failing
    #[serde(default)]
    pub allow_unknown: bool,

    /// Require every declared field to be present
    #[serde(default)]
    pub strict_check: bool,
}

/// Schema document locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaPaths {
    /// Files or directories holding .json/.toml schema documents
    #[serde(default = "default_schema_paths")]
    pub paths: Vec<PathBuf>,
}

/// Output configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output format (pretty or compact)
    #[serde(default)]
    pub format: OutputFormat,

    /// Fold unknown params back into printed records
    #[serde(default)]
    pub include_unknown: bool,
}

/// Output format for JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Pretty,
    Compact,
}

fn default_similarity() -> u8 {
    DEFAULT_SIMILARITY
}

fn default_schema_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("schemas")]
}

impl Default for KindDefaults {
    fn default() -> Self {
        Self {
            similarity: DEFAULT_SIMILARITY,
            allow_unknown: false,
            strict_check: false,
        }
    }
}

impl Default for SchemaPaths {
    fn default() -> Self {
        Self {
            paths: default_schema_paths(),
        }
    }
}

impl KindDefaults {
    pub fn kind_options(&self) -> KindOptions {
        KindOptions {
            similarity: self.similarity.min(100),
            allow_unknown: self.allow_unknown,
            strict_check: self.strict_check,
            ..KindOptions::default()
        }
    }
}

impl OutputFormat {
    /// Render a value in this format.
    pub fn render(&self, value: &serde_json::Value) -> serde_json::Result<String> {
        match self {
            OutputFormat::Pretty => serde_json::to_string_pretty(value),
            OutputFormat::Compact => serde_json::to_string(value),
        }
    }
}

impl MapperConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, adding a specific file on top of the defaults
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["mapper.toml", ".mapper.toml", "config/mapper.toml"];
        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "property-mapper") {
            let xdg_config = config_dir.config_dir().join("mapper.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // MAPPER__SECTION__KEY
        builder = builder.add_source(
            Environment::with_prefix("MAPPER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Schema paths, relative ones resolved against the working directory
    pub fn schema_paths(&self) -> Vec<PathBuf> {
        self.schemas
            .paths
            .iter()
            .map(|p| {
                if p.is_absolute() {
                    p.clone()
                } else {
                    std::env::current_dir().unwrap_or_default().join(p)
                }
            })
            .collect()
    }
}
