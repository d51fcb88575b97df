//! Pixel Pyramid CLI
//!
//! Stream raster pixels as CSV points or build per-pixel vector tile pyramids.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pixel_pyramid::{build_runtime, run_points, run_tiles, Config, FeatureType};

#[derive(Parser)]
#[command(name = "pixel-pyramid")]
#[command(about = "Turn raster pixels into geographic points or vector tiles", long_about = None)]
struct Cli {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a raster into lon,lat,band1..bandN records
    Points {
        /// Input GeoTIFF
        input: PathBuf,

        /// Read window size in pixels
        #[arg(long)]
        blocksize: Option<usize>,

        /// Output file name (stdout, without header, when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Build a web-mercator vector tile pyramid with one feature per pixel
    Tiles {
        /// Input GeoTIFF
        input: PathBuf,

        /// Output root: a local directory or s3://bucket/prefix
        #[arg(short, long)]
        output: String,

        /// Tile size in pixels
        #[arg(long)]
        tilesize: Option<usize>,

        /// Layer and pyramid name
        #[arg(long)]
        name: Option<String>,

        /// Number of tile workers
        #[arg(long)]
        workers: Option<usize>,

        #[arg(long)]
        minzoom: Option<u8>,

        #[arg(long)]
        maxzoom: Option<u8>,

        #[arg(long, value_enum)]
        feature_type: Option<FeatureType>,

        /// Disable progress reporting
        #[arg(short, long)]
        quiet: bool,
    },

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Points {
            input,
            blocksize,
            output,
        } => {
            if let Some(b) = blocksize {
                config.points.blocksize = b;
            }
            config.validate()?;
            run_points(&input, config.points.blocksize, output.as_deref())?;
        }

        Commands::Tiles {
            input,
            output,
            tilesize,
            name,
            workers,
            minzoom,
            maxzoom,
            feature_type,
            quiet,
        } => {
            let tiles = &mut config.tiles;
            if let Some(t) = tilesize {
                tiles.tile_size = t;
            }
            if let Some(n) = name {
                tiles.name = n;
            }
            if let Some(w) = workers {
                tiles.workers = w;
            }
            if minzoom.is_some() {
                tiles.minzoom = minzoom;
            }
            if maxzoom.is_some() {
                tiles.maxzoom = maxzoom;
            }
            if let Some(f) = feature_type {
                tiles.feature_type = f;
            }
            tiles.quiet |= quiet;
            config.validate()?;

            let runtime = build_runtime(config.worker_threads)?;
            runtime.block_on(run_tiles(&input, &output, &config.tiles))?;
        }

        Commands::Validate => {
            config.validate()?;
            println!("Configuration is valid");
        }

        Commands::GenerateConfig { output } => {
            generate_config_command(output)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Ok(Config::default()),
    }
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    let yaml = r#"# Pixel Pyramid Configuration
# Every value below is the default; CLI flags override them.

# === POINTS: raster -> lon,lat,band1..bandN ===
points:
  # Side of the square read window in pixels
  blocksize: 1024

# === TILES: raster -> z/x/y.pbf vector tile pyramid ===
tiles:
  # Tile width and height in pixels
  tile_size: 256

  # Number of tile workers; each opens its own raster handle
  workers: 10

  # Layer name inside every tile, also the pyramid name in metadata.json
  name: "cog"

  # Geometry per pixel: polygon (pixel footprint) or point (pixel centre)
  feature_type: polygon

  # Disable progress reporting and the final summary
  quiet: false

  # Progress reporting interval in seconds
  progress_interval_secs: 5

  # Zoom range (omit to derive from the raster resolution)
  # minzoom: 0
  # maxzoom: 12

  # Optional path to save metrics JSON after the run
  # metrics_output_path: "metrics.json"

# Tokio worker threads (omit = num CPUs)
# worker_threads: 8
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_points() {
        let cli = Cli::try_parse_from(["pixel-pyramid", "points", "in.tif", "--blocksize", "256"]).unwrap();
        match cli.command {
            Commands::Points {
                input,
                blocksize,
                output,
            } => {
                assert_eq!(input, PathBuf::from("in.tif"));
                assert_eq!(blocksize, Some(256));
                assert!(output.is_none());
            }
            _ => panic!("expected points"),
        }
    }

    #[test]
    fn test_cli_parse_tiles() {
        let cli = Cli::try_parse_from([
            "pixel-pyramid",
            "tiles",
            "in.tif",
            "-o",
            "s3://bucket/tiles",
            "--feature-type",
            "point",
            "--maxzoom",
            "9",
            "-q",
        ])
        .unwrap();
        match cli.command {
            Commands::Tiles {
                output,
                feature_type,
                maxzoom,
                quiet,
                ..
            } => {
                assert_eq!(output, "s3://bucket/tiles");
                assert_eq!(feature_type, Some(FeatureType::Point));
                assert_eq!(maxzoom, Some(9));
                assert!(quiet);
            }
            _ => panic!("expected tiles"),
        }
    }

    #[test]
    fn test_cli_tiles_requires_output() {
        assert!(Cli::try_parse_from(["pixel-pyramid", "tiles", "in.tif"]).is_err());
    }

    #[test]
    fn test_cli_parse_validate_with_config() {
        let cli = Cli::try_parse_from(["pixel-pyramid", "validate", "-c", "test.json"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("test.json")));
    }

    #[test]
    fn test_generated_config_parses_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        generate_config_command(path.clone()).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.tiles.workers, 10);
        assert_eq!(config.points.blocksize, 1024);
    }
}
