//! One-directional synchronization from the time-series source into the
//! record sink: company metadata, persisted watermarks, and the batch
//! pipeline.

pub mod metadata;
pub mod pipeline;
pub mod watermark;

pub use metadata::CompanyDirectory;
pub use pipeline::{BatchSyncPipeline, SyncMode};
pub use watermark::WatermarkStore;
