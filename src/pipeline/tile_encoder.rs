//! Bounded worker pool that renders, encodes and writes pyramid tiles.
//!
//! Tiles are fed from a lazy iterator into a shared bounded queue. Each worker
//! is a blocking thread that opens its own raster handle once, drains the
//! queue, and reports every tile's outcome to a collector. A failing tile
//! never stops its siblings; failures are collected and surfaced after every
//! tile has settled.

use super::metadata::PyramidMetadata;
use super::metrics::{Metrics, MetricsReporter, ProgressUnit};
use crate::error::{Error, Result};
use crate::index::{zoom_range_for, TileCoordinate, TilePyramid};
use crate::io::{RasterSource, SourceOpener, TileStore};
use crate::transform::{FeatureType, TileEncoder};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// Configuration for the tile encoder pool.
#[derive(Debug, Clone)]
pub struct TileEncoderConfig {
    /// Number of worker threads, each with its own source handle
    pub workers: usize,
    /// Output tile width and height in pixels
    pub tile_size: usize,
    /// Vector layer name
    pub layer_name: String,
    /// Property names, one per band. Empty means each handle's own band names.
    pub band_names: Vec<String>,
    pub feature_type: FeatureType,
    /// Capacity of the work queue between the feeder and the workers
    pub queue_depth: usize,
}

impl Default for TileEncoderConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            tile_size: 256,
            layer_name: "cog".to_string(),
            band_names: Vec::new(),
            feature_type: FeatureType::Polygon,
            queue_depth: 64,
        }
    }
}

impl TileEncoderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidArgument("workers must be > 0".to_string()));
        }
        if self.tile_size == 0 {
            return Err(Error::InvalidArgument("tile size must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Settled outcome of a pool run.
#[derive(Debug, Default)]
pub struct EncodeReport {
    pub succeeded: u64,
    pub failed: u64,
    /// Failure of the earliest failed tile in enumeration order, whatever
    /// order the workers finished in.
    pub first_failure: Option<(TileCoordinate, Error)>,
}

impl EncodeReport {
    pub fn total(&self) -> u64 {
        self.succeeded + self.failed
    }

    /// Turn a report with failures into [`Error::TileEncode`].
    pub fn into_result(mut self) -> Result<Self> {
        match self.first_failure.take() {
            Some((tile, source)) => Err(Error::tile_encode(tile, source)),
            None => Ok(self),
        }
    }
}

impl std::fmt::Display for EncodeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Succeeded: {}, Failed: {}, Total: {}",
            self.succeeded,
            self.failed,
            self.total()
        )
    }
}

/// Everything fixed before tile work starts.
#[derive(Debug, Clone)]
pub struct PyramidPlan {
    pub pyramid: TilePyramid,
    pub metadata: PyramidMetadata,
    pub band_names: Vec<String>,
}

impl PyramidPlan {
    /// Derive bounds, zoom range and band names from an open source.
    ///
    /// Unset zooms follow the native resolution: the max zoom matches the
    /// pixel size and the min zoom fits the whole raster in one tile.
    pub fn from_source(
        source: &dyn RasterSource,
        name: &str,
        minzoom: Option<u8>,
        maxzoom: Option<u8>,
    ) -> Result<Self> {
        let bounds = source.geographic_bounds()?;
        let (auto_min, auto_max) =
            zoom_range_for(source.mercator_resolution()?, source.width(), source.height());
        let minzoom = minzoom.unwrap_or(auto_min);
        let maxzoom = maxzoom.unwrap_or(auto_max);

        let band_names = source.band_names();
        Ok(Self {
            pyramid: TilePyramid::new(bounds, minzoom, maxzoom)?,
            metadata: PyramidMetadata::new(name, bounds, minzoom, maxzoom, &band_names)?,
            band_names,
        })
    }
}

/// A tile with its position in the enumeration.
type Work = (u64, TileCoordinate);

type Outcome = (u64, TileCoordinate, Result<u64>);

/// Parallel tile encoder.
pub struct TileEncoderPool {
    opener: Arc<dyn SourceOpener>,
    encoder: Arc<dyn TileEncoder>,
    store: TileStore,
    metrics: Arc<Metrics>,
    config: TileEncoderConfig,
}

impl TileEncoderPool {
    pub fn new(
        opener: Arc<dyn SourceOpener>,
        encoder: Arc<dyn TileEncoder>,
        store: TileStore,
        metrics: Arc<Metrics>,
        config: TileEncoderConfig,
    ) -> Self {
        Self {
            opener,
            encoder,
            store,
            metrics,
            config,
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Encode every tile of `tiles` and report the settled outcome.
    ///
    /// Per-tile failures are counted in the report, not returned as `Err`.
    pub async fn run<I>(&self, tiles: I) -> Result<EncodeReport>
    where
        I: Iterator<Item = TileCoordinate> + Send + 'static,
    {
        let band_names = Arc::new(self.config.band_names.clone());
        self.execute(tiles, band_names).await
    }

    /// Full pyramid job: plan from one handle, write metadata, then tiles.
    ///
    /// A metadata failure aborts before any tile work. Tile failures end in
    /// [`Error::TileEncode`] after all tiles settle; written tiles are kept.
    pub async fn run_pyramid(
        &self,
        minzoom: Option<u8>,
        maxzoom: Option<u8>,
        progress_interval: Option<Duration>,
    ) -> Result<EncodeReport> {
        self.config.validate()?;

        let opener = Arc::clone(&self.opener);
        let name = self.config.layer_name.clone();
        let plan = tokio::task::spawn_blocking(move || {
            let source = opener.open()?;
            PyramidPlan::from_source(source.as_ref(), &name, minzoom, maxzoom)
        })
        .await
        .map_err(|e| Error::SourceRead(format!("Planning task failed: {e}")))??;

        self.store.write_metadata(plan.metadata.to_json_bytes()?).await?;

        let total = plan.pyramid.count();
        tracing::info!(
            "Pyramid '{}' over {:?}: zooms {}-{}, {} tiles, {} workers",
            plan.metadata.name,
            plan.pyramid.bounds(),
            plan.pyramid.minzoom(),
            plan.pyramid.maxzoom(),
            total,
            self.config.workers
        );

        let reporter = progress_interval.map(|every| {
            let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
            let reporter = MetricsReporter::new(
                Arc::clone(&self.metrics),
                every.as_secs(),
                total,
                ProgressUnit::Tiles,
            );
            (shutdown_tx, tokio::spawn(reporter.run(shutdown_rx)))
        });

        let band_names = if self.config.band_names.is_empty() {
            plan.band_names
        } else {
            self.config.band_names.clone()
        };
        let report = self.execute(plan.pyramid.tiles(), Arc::new(band_names)).await;

        if let Some((shutdown_tx, handle)) = reporter {
            let _ = shutdown_tx.send(()).await;
            let _ = handle.await;
        }

        let report = report?;
        if let Some((tile, e)) = &report.first_failure {
            tracing::error!(
                "{} of {} tiles failed; first collected failure at {}: {}",
                report.failed,
                report.total(),
                tile,
                e
            );
        }
        report.into_result()
    }

    async fn execute<I>(&self, tiles: I, band_names: Arc<Vec<String>>) -> Result<EncodeReport>
    where
        I: Iterator<Item = TileCoordinate> + Send + 'static,
    {
        self.config.validate()?;

        let (work_tx, work_rx) = async_channel::bounded::<Work>(self.config.queue_depth.max(1));
        let (outcome_tx, outcome_rx) = mpsc::channel::<Outcome>(self.config.queue_depth.max(1));

        let collector = tokio::spawn(collect_outcomes(outcome_rx, Arc::clone(&self.metrics)));

        let feeder = tokio::spawn(async move {
            let mut fed = 0u64;
            for (seq, tile) in (0u64..).zip(tiles) {
                if work_tx.send((seq, tile)).await.is_err() {
                    tracing::debug!("Work queue closed, stopping feeder");
                    break;
                }
                fed += 1;
            }
            fed
        });

        let handle = Handle::current();
        let mut workers = Vec::with_capacity(self.config.workers);
        for id in 0..self.config.workers {
            let ctx = WorkerContext {
                id,
                opener: Arc::clone(&self.opener),
                encoder: Arc::clone(&self.encoder),
                store: self.store.clone(),
                metrics: Arc::clone(&self.metrics),
                config: self.config.clone(),
                band_names: Arc::clone(&band_names),
                handle: handle.clone(),
            };
            let work_rx = work_rx.clone();
            let outcome_tx = outcome_tx.clone();

            workers.push(tokio::task::spawn_blocking(move || {
                ctx.run(work_rx, outcome_tx)
            }));
        }
        drop(work_rx);
        drop(outcome_tx);

        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                tracing::error!("Tile worker panicked: {}", e);
            }
        }
        let fed = feeder
            .await
            .map_err(|e| Error::Encode(format!("Tile feeder failed: {e}")))?;

        let report = collector
            .await
            .map_err(|e| Error::Write(format!("Outcome collector failed: {e}")))?;

        // Every queued tile must have settled.
        if report.total() < fed {
            return Err(Error::Encode(format!(
                "{} of {} tiles produced no outcome",
                fed - report.total(),
                fed
            )));
        }
        Ok(report)
    }
}

async fn collect_outcomes(mut outcome_rx: mpsc::Receiver<Outcome>, metrics: Arc<Metrics>) -> EncodeReport {
    let mut report = EncodeReport::default();
    let mut first_failed_seq = u64::MAX;

    while let Some((seq, tile, result)) = outcome_rx.recv().await {
        match result {
            Ok(bytes) => {
                report.succeeded += 1;
                metrics.add_tile_succeeded(bytes);
            }
            Err(e) => {
                tracing::warn!("Tile {} failed: {}", tile, e);
                report.failed += 1;
                metrics.add_tile_failed();
                if seq < first_failed_seq {
                    first_failed_seq = seq;
                    report.first_failure = Some((tile, e));
                }
            }
        }
    }

    report
}

/// State owned by one blocking worker thread.
struct WorkerContext {
    id: usize,
    opener: Arc<dyn SourceOpener>,
    encoder: Arc<dyn TileEncoder>,
    store: TileStore,
    metrics: Arc<Metrics>,
    config: TileEncoderConfig,
    band_names: Arc<Vec<String>>,
    handle: Handle,
}

impl WorkerContext {
    fn run(self, work_rx: async_channel::Receiver<Work>, outcome_tx: mpsc::Sender<Outcome>) {
        // The handle lives exactly as long as this worker.
        let source = match self.opener.open() {
            Ok(source) => Ok(source),
            Err(e) => {
                tracing::warn!("Worker {} failed to open {}: {}", self.id, self.opener.describe(), e);
                Err(e.to_string())
            }
        };

        while let Ok((seq, tile)) = work_rx.recv_blocking() {
            let result = match &source {
                Ok(source) => self.process_guarded(source.as_ref(), &tile),
                Err(msg) => Err(Error::SourceRead(format!(
                    "worker {} has no source handle: {msg}",
                    self.id
                ))),
            };

            if outcome_tx.blocking_send((seq, tile, result)).is_err() {
                tracing::debug!("Outcome receiver dropped, stopping worker {}", self.id);
                break;
            }
        }

        tracing::debug!("Worker {} done", self.id);
    }

    /// [`Self::process`] with a panic turned into a failure of that tile.
    fn process_guarded(&self, source: &dyn RasterSource, tile: &TileCoordinate) -> Result<u64> {
        panic::catch_unwind(AssertUnwindSafe(|| self.process(source, tile))).unwrap_or_else(|payload| {
            let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic payload".to_string()
            };
            Err(Error::Encode(format!("worker {} panicked on tile {tile}: {msg}", self.id)))
        })
    }

    fn process(&self, source: &dyn RasterSource, tile: &TileCoordinate) -> Result<u64> {
        let start = Instant::now();
        let block = source.read_tile_window(tile, self.config.tile_size)?;
        self.metrics.add_read_time(start.elapsed());

        let own_names;
        let band_names: &[String] = if self.band_names.is_empty() {
            own_names = source.band_names();
            &own_names
        } else {
            &self.band_names
        };

        let start = Instant::now();
        let bytes = self.encoder.encode(
            &block,
            band_names,
            &self.config.layer_name,
            self.config.feature_type,
        )?;
        self.metrics.add_encode_time(start.elapsed());

        let len = bytes.len() as u64;
        let start = Instant::now();
        self.handle.block_on(self.store.write_tile(tile, bytes))?;
        self.metrics.add_write_time(start.elapsed());

        tracing::debug!("Tile {} written ({} bytes)", tile, len);
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::codes;
    use crate::index::Window;
    use crate::io::{ArrayRaster, ArrayRasterOpener, GeoTransform, MaskedBlock};
    use crate::transform::PixelEncoder;
    use ndarray::Array3;
    use std::collections::BTreeMap;
    use std::path::Path;
    use tempfile::TempDir;

    const TILE_SIZE: usize = 16;

    /// 40x40 single-band raster over lon/lat [-10, 10] with a masked corner.
    fn opener() -> ArrayRasterOpener {
        let data = Array3::from_shape_fn((1, 40, 40), |(_, r, c)| (r * 40 + c) as f64);
        let mut mask = Array3::from_elem((1, 40, 40), false);
        mask[[0, 0, 0]] = true;
        ArrayRaster::new(
            MaskedBlock::new(data, mask).unwrap(),
            GeoTransform::north_up(-10.0, 10.0, 0.5, 0.5),
            codes::WGS84,
        )
        .into_opener()
    }

    fn tiles() -> Vec<TileCoordinate> {
        TilePyramid::new([-10.0, -10.0, 10.0, 10.0], 0, 4)
            .unwrap()
            .tiles()
            .collect()
    }

    fn config(workers: usize) -> TileEncoderConfig {
        TileEncoderConfig {
            workers,
            tile_size: TILE_SIZE,
            layer_name: "test".to_string(),
            band_names: vec!["1".to_string()],
            feature_type: FeatureType::Polygon,
            queue_depth: 4,
        }
    }

    fn pool(opener: Arc<dyn SourceOpener>, root: &Path, workers: usize) -> TileEncoderPool {
        TileEncoderPool::new(
            opener,
            Arc::new(PixelEncoder::default()),
            TileStore::open(root.to_str().unwrap()).unwrap(),
            Metrics::new(),
            config(workers),
        )
    }

    /// Relative path -> bytes for every file under `root`.
    fn files(root: &Path) -> BTreeMap<String, Vec<u8>> {
        fn walk(dir: &Path, root: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
            for entry in std::fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    walk(&path, root, out);
                } else {
                    let rel = path.strip_prefix(root).unwrap().to_string_lossy().to_string();
                    out.insert(rel, std::fs::read(&path).unwrap());
                }
            }
        }
        let mut out = BTreeMap::new();
        walk(root, root, &mut out);
        out
    }

    fn expected_tile(tile: &TileCoordinate) -> Vec<u8> {
        let source = opener().open_array().unwrap();
        let block = source.read_tile_window(tile, TILE_SIZE).unwrap();
        PixelEncoder::default()
            .encode(&block, &["1".to_string()], "test", FeatureType::Polygon)
            .unwrap()
    }

    /// Delegates to an in-memory source but fails the listed tiles.
    #[derive(Clone)]
    struct FailingOpener {
        inner: ArrayRasterOpener,
        fail: Vec<TileCoordinate>,
        /// Panic instead of returning an error
        panic: bool,
        /// Tile whose read stalls before doing anything
        slow: Option<TileCoordinate>,
    }

    fn failing(fail: &[TileCoordinate]) -> FailingOpener {
        FailingOpener {
            inner: opener(),
            fail: fail.to_vec(),
            panic: false,
            slow: None,
        }
    }

    struct FailingSource {
        inner: Box<dyn RasterSource>,
        opener: FailingOpener,
    }

    impl SourceOpener for FailingOpener {
        fn open(&self) -> Result<Box<dyn RasterSource>> {
            Ok(Box::new(FailingSource {
                inner: self.inner.open()?,
                opener: self.clone(),
            }))
        }

        fn describe(&self) -> String {
            "failing".to_string()
        }
    }

    impl RasterSource for FailingSource {
        fn width(&self) -> usize {
            self.inner.width()
        }
        fn height(&self) -> usize {
            self.inner.height()
        }
        fn band_count(&self) -> usize {
            self.inner.band_count()
        }
        fn band_names(&self) -> Vec<String> {
            self.inner.band_names()
        }
        fn crs(&self) -> &str {
            self.inner.crs()
        }
        fn transform(&self) -> GeoTransform {
            self.inner.transform()
        }
        fn read_masked(&self, window: &Window) -> Result<MaskedBlock> {
            self.inner.read_masked(window)
        }
        fn read_tile_window(&self, tile: &TileCoordinate, size: usize) -> Result<MaskedBlock> {
            if self.opener.slow == Some(*tile) {
                std::thread::sleep(Duration::from_millis(300));
            }
            if self.opener.fail.contains(tile) {
                if self.opener.panic {
                    panic!("reader blew up at {tile}");
                }
                return Err(Error::SourceRead(format!("injected failure at {tile}")));
            }
            self.inner.read_tile_window(tile, size)
        }
        fn reproject_to_wgs84(&self, coords: &mut [(f64, f64)]) -> Result<()> {
            self.inner.reproject_to_wgs84(coords)
        }
    }

    struct BrokenOpener;

    impl SourceOpener for BrokenOpener {
        fn open(&self) -> Result<Box<dyn RasterSource>> {
            Err(Error::SourceRead("cannot open".to_string()))
        }

        fn describe(&self) -> String {
            "broken".to_string()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_all_tiles_written() {
        let dir = TempDir::new().unwrap();
        let tiles = tiles();
        let pool = pool(Arc::new(opener()), dir.path(), 4);

        let report = pool.run(tiles.clone().into_iter()).await.unwrap();
        assert_eq!(report.succeeded, tiles.len() as u64);
        assert_eq!(report.failed, 0);
        assert!(report.first_failure.is_none());

        let written = files(dir.path());
        assert_eq!(written.len(), tiles.len());
        for tile in &tiles {
            assert_eq!(written[&tile.key()], expected_tile(tile), "tile {tile}");
        }

        let snapshot = pool.metrics().snapshot();
        assert_eq!(snapshot.tiles_completed, tiles.len() as u64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_single_failure_is_isolated() {
        let dir = TempDir::new().unwrap();
        let tiles = tiles();
        let fail = tiles[tiles.len() / 2];
        let opener = failing(&[fail]);
        let pool = pool(Arc::new(opener), dir.path(), 3);

        let report = pool.run(tiles.clone().into_iter()).await.unwrap();
        let n = tiles.len() as u64;
        assert_eq!(report.succeeded, n - 1);
        assert_eq!(report.failed, 1);

        let (failed_tile, err) = report.first_failure.as_ref().unwrap();
        assert_eq!(*failed_tile, fail);
        assert!(matches!(err, Error::SourceRead(_)));

        let written = files(dir.path());
        assert_eq!(written.len() as u64, n - 1);
        assert!(!written.contains_key(&fail.key()));
        for tile in tiles.iter().filter(|t| **t != fail) {
            assert_eq!(written[&tile.key()], expected_tile(tile));
        }

        match report.into_result() {
            Err(Error::TileEncode { tile, .. }) => assert_eq!(tile, fail),
            other => panic!("expected TileEncode, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_count_does_not_change_output() {
        let one = TempDir::new().unwrap();
        let many = TempDir::new().unwrap();

        pool(Arc::new(opener()), one.path(), 1)
            .run(tiles().into_iter())
            .await
            .unwrap();
        pool(Arc::new(opener()), many.path(), 8)
            .run(tiles().into_iter())
            .await
            .unwrap();

        assert_eq!(files(one.path()), files(many.path()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_open_failure_fails_every_tile() {
        let dir = TempDir::new().unwrap();
        let tiles = tiles();
        let report = pool(Arc::new(BrokenOpener), dir.path(), 2)
            .run(tiles.clone().into_iter())
            .await
            .unwrap();

        assert_eq!(report.succeeded, 0);
        assert_eq!(report.failed, tiles.len() as u64);
        assert!(files(dir.path()).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_tile_is_reported_and_worker_continues() {
        let dir = TempDir::new().unwrap();
        let tiles = tiles();
        let fail = tiles[0];
        let opener = FailingOpener {
            panic: true,
            ..failing(&[fail])
        };
        // A single worker must survive the panic to drain the rest.
        let pool = pool(Arc::new(opener), dir.path(), 1);

        let report = pool.run(tiles.clone().into_iter()).await.unwrap();
        let n = tiles.len() as u64;
        assert_eq!(report.succeeded, n - 1);
        assert_eq!(report.failed, 1);
        assert_eq!(files(dir.path()).len() as u64, n - 1);

        let (failed_tile, err) = report.first_failure.as_ref().unwrap();
        assert_eq!(*failed_tile, fail);
        assert!(err.to_string().contains("reader blew up"));
        assert!(report.into_result().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_first_failure_follows_enumeration_order() {
        let dir = TempDir::new().unwrap();
        let tiles = tiles();
        let first = tiles[0];
        let last = tiles[tiles.len() - 1];
        let opener = FailingOpener {
            slow: Some(first),
            ..failing(&[first, last])
        };
        let pool = pool(Arc::new(opener), dir.path(), 2);

        let report = pool.run(tiles.clone().into_iter()).await.unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(report.first_failure.as_ref().unwrap().0, first);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_zero_workers_rejected() {
        let dir = TempDir::new().unwrap();
        let result = pool(Arc::new(opener()), dir.path(), 0)
            .run(tiles().into_iter())
            .await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_pyramid_writes_metadata_and_tiles() {
        let dir = TempDir::new().unwrap();
        let pool = pool(Arc::new(opener()), dir.path(), 4);

        let report = pool.run_pyramid(Some(0), Some(3), None).await.unwrap();
        let expected = TilePyramid::new([-10.0, -10.0, 10.0, 10.0], 0, 3).unwrap().count();
        assert_eq!(report.succeeded, expected);

        let written = files(dir.path());
        assert_eq!(written.len() as u64, expected + 1);

        let metadata: serde_json::Value = serde_json::from_slice(&written["metadata.json"]).unwrap();
        assert_eq!(metadata["name"], "test");
        assert_eq!(metadata["minzoom"], 0);
        assert_eq!(metadata["maxzoom"], 3);
        assert_eq!(metadata["bounds"], "-10.0,-10.0,10.0,10.0");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_pyramid_reports_tile_failure() {
        let dir = TempDir::new().unwrap();
        let fail = TileCoordinate::new(1, 0, 0);
        let opener = failing(&[fail]);
        let pool = pool(Arc::new(opener), dir.path(), 2);

        let err = pool.run_pyramid(Some(0), Some(2), None).await.unwrap_err();
        assert!(matches!(err, Error::TileEncode { tile, .. } if tile == fail));
        assert!(dir.path().join("metadata.json").exists());
        assert!(dir.path().join("0/0/0.pbf").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_metadata_failure_prevents_tile_work() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        std::fs::write(&root, b"not a directory").unwrap();

        let store = TileStore::new(
            Arc::new(object_store::local::LocalFileSystem::new_with_prefix(&root).unwrap()),
            "",
        );
        let pool = TileEncoderPool::new(
            Arc::new(opener()),
            Arc::new(PixelEncoder::default()),
            store,
            Metrics::new(),
            config(2),
        );

        let err = pool.run_pyramid(Some(0), Some(2), None).await.unwrap_err();
        assert!(matches!(err, Error::Write(_)));
        assert_eq!(pool.metrics().snapshot().tiles_completed, 0);
        assert_eq!(files(dir.path()).len(), 1);
        assert_eq!(std::fs::read(&root).unwrap(), b"not a directory");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_auto_zoom_range_from_resolution() {
        let source = opener().open_array().unwrap();
        let plan = PyramidPlan::from_source(&source, "auto", None, None).unwrap();

        assert!(plan.pyramid.minzoom() <= plan.pyramid.maxzoom());
        assert_eq!(plan.metadata.minzoom, plan.pyramid.minzoom());
        assert_eq!(plan.band_names, vec!["1".to_string()]);
    }

    #[test]
    fn test_report_display() {
        let report = EncodeReport {
            succeeded: 9,
            failed: 1,
            first_failure: None,
        };
        assert_eq!(report.to_string(), "Succeeded: 9, Failed: 1, Total: 10");
    }
}
