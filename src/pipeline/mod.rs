pub mod processor;
pub mod reprocess;
pub mod ring;

pub use processor::{ZslProcessor, ZslStats};
pub use reprocess::{
    BufferReleaseListener, CapturePipeline, ReprocessRequest, ReprocessSink, StreamProvider,
};
