pub mod capture;
pub mod error;
pub mod pipeline;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use capture::frame::{BufferHandle, CaptureMetadata, StreamId, ZslBuffer};
pub use capture::source::BufferSource;
pub use error::{Error, SourceError, SubmitError};
pub use pipeline::processor::{ZslProcessor, ZslStats};
pub use pipeline::reprocess::{
    BufferReleaseListener, CapturePipeline, ReprocessRequest, ReprocessSink, StreamProvider,
};
pub use pipeline::ring::MATCH_TOLERANCE_NS;

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub zsl: ZslConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZslConfig {
    /// Pair-queue depth: bound on buffers resident in the engine at once.
    pub queue_depth: usize,

    /// Metadata backlog depth. Larger than the queue because metadata
    /// routinely arrives ahead of its buffer.
    pub frame_history_depth: usize,

    /// Bounded wait of the drain task between liveness checks.
    pub wait_duration_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            zsl: ZslConfig::default(),
        }
    }
}

impl Default for ZslConfig {
    fn default() -> Self {
        Self {
            queue_depth: 4,
            frame_history_depth: 10,
            wait_duration_ms: 10,
        }
    }
}
