//! Pixel Pyramid
//!
//! Turns a georeferenced raster into per-pixel geographic data, in two ways:
//!
//! - **Points**: every valid pixel as a `lon,lat,band1..bandN` CSV record,
//!   streamed one bounded window at a time.
//! - **Tiles**: a web-mercator pyramid of Mapbox Vector Tiles in which each
//!   pixel becomes a polygon or point feature, built by a pool of workers.
//!
//! # Architecture
//!
//! - **Index**: window grids over a raster and the tile pyramid enumerator
//! - **I/O**: raster sources (GeoTIFF, in-memory), the CSV sink and the tile store
//! - **Transform**: mask reduction and the vector tile encoder
//! - **Pipeline**: the point stream, the tile encoder pool, metadata and metrics
//!
//! # Usage
//!
//! ```no_run
//! use pixel_pyramid::{build_runtime, run_tiles, Config};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     let runtime = build_runtime(config.worker_threads)?;
//!     runtime.block_on(run_tiles("dem.tif".as_ref(), "tiles/", &config.tiles))?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crs;
pub mod error;
pub mod index;
pub mod io;
pub mod pipeline;
pub mod transform;

pub use config::{Config, PointsConfig, TilesConfig};
pub use error::Error;
pub use index::{TileCoordinate, TilePyramid};
pub use io::{GeoTiffOpener, GeoTiffSource, PointWriter, RasterSource, SourceOpener, TileStore};
pub use pipeline::{EncodeReport, Metrics, PointStream, TileEncoderConfig, TileEncoderPool};
pub use transform::{FeatureType, PixelEncoder, TileEncoder};

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Stream every valid pixel of `source` into `writer`.
///
/// Returns the number of records written. Stops at the first error.
pub fn write_points<S, W>(
    source: &S,
    blocksize: usize,
    writer: &mut PointWriter<W>,
    metrics: &Metrics,
) -> error::Result<u64>
where
    S: RasterSource + ?Sized,
    W: std::io::Write,
{
    let mut stream = PointStream::new(source, blocksize)?;
    let mut windows_seen = 0;
    let mut sync_windows = |read: usize| {
        while windows_seen < read {
            metrics.add_window_read();
            windows_seen += 1;
        }
    };

    while let Some(record) = stream.next() {
        let record = record?;
        writer.write_record(&record)?;
        metrics.add_points_written(1);
        sync_windows(stream.windows_read());
    }
    // Trailing windows without valid pixels yield no record.
    sync_windows(stream.windows_read());

    Ok(writer.records())
}

/// Run the point stream for a GeoTIFF to a file (with header) or stdout.
pub fn run_points(input: &Path, blocksize: usize, output: Option<&Path>) -> Result<u64> {
    let source = GeoTiffSource::open(input)
        .with_context(|| format!("Failed to open {}", input.display()))?;
    tracing::info!(
        "Streaming points from {} ({}x{}, {} bands, {})",
        input.display(),
        source.width(),
        source.height(),
        source.band_count(),
        source.crs()
    );

    let metrics = Metrics::new();
    let written = match output {
        Some(path) => {
            let mut writer = PointWriter::create(path, source.band_count())
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let written = write_points(&source, blocksize, &mut writer, &metrics)?;
            writer.finish()?;
            written
        }
        None => {
            let mut writer = PointWriter::stdout();
            match write_points(&source, blocksize, &mut writer, &metrics)
                .and_then(|n| writer.finish().map(|_| n))
            {
                Ok(n) => n,
                // Downstream closed the pipe (e.g. `| head`).
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    let written = metrics.snapshot().points_written;
                    tracing::debug!("Stdout closed after {} points", written);
                    return Ok(written);
                }
                Err(e) => return Err(e.into()),
            }
        }
    };

    tracing::info!(
        "Wrote {} points from {} windows",
        written,
        metrics.snapshot().windows_read
    );
    Ok(written)
}

/// Build the tile pyramid for a GeoTIFF under `output_root`.
pub async fn run_tiles(input: &Path, output_root: &str, tiles: &TilesConfig) -> Result<EncodeReport> {
    let opener: Arc<dyn SourceOpener> = Arc::new(GeoTiffOpener::new(input));
    let store = TileStore::open(output_root)
        .with_context(|| format!("Failed to open output root {output_root}"))?;

    tracing::info!("Writing tile pyramid for {} to {}", input.display(), store.root());

    let metrics = Metrics::new();
    let config = TileEncoderConfig {
        workers: tiles.workers,
        tile_size: tiles.tile_size,
        layer_name: tiles.name.clone(),
        band_names: Vec::new(),
        feature_type: tiles.feature_type,
        ..TileEncoderConfig::default()
    };
    let pool = TileEncoderPool::new(
        opener,
        Arc::new(PixelEncoder::default()),
        store,
        metrics.clone(),
        config,
    );

    let progress = (!tiles.quiet).then(|| Duration::from_secs(tiles.progress_interval_secs.max(1)));
    let result = pool.run_pyramid(tiles.minzoom, tiles.maxzoom, progress).await;

    if !tiles.quiet {
        pipeline::print_summary(&metrics);
    }
    if let Some(path) = &tiles.metrics_output_path {
        metrics.snapshot().save_to_file(path)?;
        tracing::info!("Metrics saved to {}", path);
    }

    let report = result.context("Tile pyramid failed")?;
    tracing::info!("Pyramid complete: {}", report);
    Ok(report)
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}
