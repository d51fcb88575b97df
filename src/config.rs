//! Configuration for point streaming and tile pyramid runs.

use crate::index::MAX_ZOOM;
use crate::transform::FeatureType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Point streaming configuration
    #[serde(default)]
    pub points: PointsConfig,

    /// Tile pyramid configuration
    #[serde(default)]
    pub tiles: TilesConfig,

    /// Number of Tokio worker threads (None = num CPUs)
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

/// Point streaming configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsConfig {
    /// Side of the square read window in pixels
    #[serde(default = "default_blocksize")]
    pub blocksize: usize,
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            blocksize: default_blocksize(),
        }
    }
}

/// Tile pyramid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TilesConfig {
    /// Output tile width and height in pixels
    #[serde(default = "default_tile_size")]
    pub tile_size: usize,

    /// Number of tile workers, each holding its own source handle
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Layer name, also used as the pyramid name in metadata.json
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub feature_type: FeatureType,

    /// Disable progress reporting
    #[serde(default)]
    pub quiet: bool,

    /// Progress reporting interval in seconds
    #[serde(default = "default_progress_interval")]
    pub progress_interval_secs: u64,

    /// Lowest zoom (None = derived from the raster)
    #[serde(default)]
    pub minzoom: Option<u8>,

    /// Highest zoom (None = derived from the native resolution)
    #[serde(default)]
    pub maxzoom: Option<u8>,

    /// Optional path to save metrics JSON after the run completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Default for TilesConfig {
    fn default() -> Self {
        Self {
            tile_size: default_tile_size(),
            workers: default_workers(),
            name: default_name(),
            feature_type: FeatureType::default(),
            quiet: false,
            progress_interval_secs: default_progress_interval(),
            minzoom: None,
            maxzoom: None,
            metrics_output_path: None,
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "json" => serde_json::from_str(&contents)?,
            // YAML is a superset of JSON
            _ => Self::from_yaml(&contents)?,
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        // An empty document deserializes as null, not as an empty mapping.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.points.blocksize == 0 {
            anyhow::bail!("Blocksize must be > 0");
        }
        if self.tiles.tile_size == 0 {
            anyhow::bail!("Tile size must be > 0");
        }
        if self.tiles.workers == 0 {
            anyhow::bail!("Workers must be > 0");
        }
        if self.tiles.name.is_empty() {
            anyhow::bail!("Layer name must not be empty");
        }
        if let (Some(min), Some(max)) = (self.tiles.minzoom, self.tiles.maxzoom) {
            if min > max {
                anyhow::bail!("minzoom ({min}) must be <= maxzoom ({max})");
            }
        }
        for zoom in [self.tiles.minzoom, self.tiles.maxzoom].into_iter().flatten() {
            if zoom > MAX_ZOOM {
                anyhow::bail!("Zoom {zoom} exceeds maximum of {MAX_ZOOM}");
            }
        }
        if self.worker_threads == Some(0) {
            anyhow::bail!("worker_threads must be > 0 when set");
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_blocksize() -> usize { 1024 }
fn default_tile_size() -> usize { 256 }
fn default_workers() -> usize { 10 }
fn default_name() -> String { "cog".to_string() }
fn default_progress_interval() -> u64 { 5 }
