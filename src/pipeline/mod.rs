//! Point streaming and tile pyramid orchestration.

mod extractor;
mod metadata;
mod metrics;
mod tile_encoder;

pub use extractor::{PointRecord, PointStream};
pub use metadata::PyramidMetadata;
pub use metrics::{print_summary, Metrics, MetricsReporter, MetricsSnapshot, ProgressUnit};
pub use tile_encoder::{EncodeReport, PyramidPlan, TileEncoderConfig, TileEncoderPool};
