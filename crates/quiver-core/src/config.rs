//! Configuration management for Quiver.
//!
//! This module provides a centralized configuration system that supports:
//! - YAML configuration files
//! - Environment variable overrides
//! - Reasonable defaults
//! - Configuration validation

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure for Quiver.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct QuiverConfig {
    #[serde(default)]
    pub index: IndexSettings,

    #[serde(default)]
    pub query: QuerySettings,

    #[serde(default)]
    pub rebuild: RebuildSettings,

    #[serde(default)]
    pub validation: ValidationSettings,
}

impl QuiverConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest priority)
    /// 2. Config file specified by QUIVER_CONFIG env var
    /// 3. ./config/quiver.yaml
    /// 4. /etc/quiver/quiver.yaml
    /// 5. Hardcoded defaults (lowest priority)
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        builder = Self::set_defaults(builder)?;

        if let Ok(config_path) = std::env::var("QUIVER_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        builder = builder
            .add_source(File::with_name("./config/quiver").required(false))
            .add_source(File::with_name("/etc/quiver/quiver").required(false));

        // Example: QUIVER_INDEX__LSH_PLANES=32
        builder = builder.add_source(
            Environment::with_prefix("QUIVER")
                .separator("__")
                .try_parsing(true),
        );

        let config: QuiverConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Set default values for all configuration options.
    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            // Index: KD-tree
            .set_default("index.kd_leaf_capacity", 16)?
            .set_default("index.kd_rebuild_percent", 25)?
            // Index: LSH
            .set_default("index.lsh_planes", 16)?
            .set_default("index.lsh_tables", 4)?
            .set_default("index.lsh_seed", 42)?
            // Query
            .set_default("query.allow_stale", true)?
            .set_default("query.use_fallback_on_stale", true)?
            .set_default("query.top_k_max", 1000)?
            // Rebuild
            .set_default("rebuild.max_concurrent_builds", 2)?
            // Validation
            .set_default("validation.dimension_min", 1)?
            .set_default("validation.dimension_max", 4096)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.index.kd_leaf_capacity == 0 {
            return Err(ConfigError::Message(
                "index.kd_leaf_capacity must be > 0".to_string(),
            ));
        }

        if self.index.lsh_planes == 0 || self.index.lsh_planes > 64 {
            return Err(ConfigError::Message(
                "index.lsh_planes must be in [1, 64]".to_string(),
            ));
        }

        if self.index.lsh_tables == 0 {
            return Err(ConfigError::Message(
                "index.lsh_tables must be > 0".to_string(),
            ));
        }

        if self.query.top_k_max == 0 {
            return Err(ConfigError::Message(
                "query.top_k_max must be > 0".to_string(),
            ));
        }

        if self.rebuild.max_concurrent_builds == 0 {
            return Err(ConfigError::Message(
                "rebuild.max_concurrent_builds must be > 0".to_string(),
            ));
        }

        if self.validation.dimension_max < self.validation.dimension_min {
            return Err(ConfigError::Message(
                "validation.dimension_max must be >= dimension_min".to_string(),
            ));
        }

        if self.validation.dimension_min == 0 {
            return Err(ConfigError::Message(
                "validation.dimension_min must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from a specific file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: QuiverConfig = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }
}

/// Default construction parameters for the index family.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexSettings {
    /// KD-tree leaf bucket capacity (typical: 8-32).
    pub kd_leaf_capacity: usize,

    /// Tombstone + overflow churn, as a percent of tree size, that triggers
    /// in-place compaction of a KD-tree.
    pub kd_rebuild_percent: usize,

    /// Random hyperplanes per LSH table (R, max 64).
    pub lsh_planes: usize,

    /// Independent LSH tables (T). More tables, better recall.
    pub lsh_tables: usize,

    /// Seed for the LSH hyperplane generator. Builds are deterministic
    /// given the seed.
    pub lsh_seed: u64,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            kd_leaf_capacity: 16,
            kd_rebuild_percent: 25,
            lsh_planes: 16,
            lsh_tables: 4,
            lsh_seed: 42,
        }
    }
}

/// Query planner policy defaults, overridable per request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuerySettings {
    /// Serve results from a stale index (flagged in the response) rather
    /// than falling back to a scan.
    pub allow_stale: bool,

    /// When stale reads are disabled, fall back to an exact scan instead of
    /// failing with `IndexStale`.
    pub use_fallback_on_stale: bool,

    /// Maximum accepted `k` per query.
    pub top_k_max: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            allow_stale: true,
            use_fallback_on_stale: true,
            top_k_max: 1000,
        }
    }
}

/// Background rebuild scheduling limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RebuildSettings {
    /// Maximum index builds running concurrently across all collections.
    pub max_concurrent_builds: usize,
}

impl Default for RebuildSettings {
    fn default() -> Self {
        Self {
            max_concurrent_builds: 2,
        }
    }
}

/// Intake validation limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValidationSettings {
    /// Minimum embedding dimension.
    pub dimension_min: u32,

    /// Maximum embedding dimension.
    pub dimension_max: u32,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            dimension_min: 1,
            dimension_max: 4096,
        }
    }
}
