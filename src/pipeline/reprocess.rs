//! Interfaces to the downstream reprocessing collaborators
//!
//! The engine never assumes a collaborator outlives it; every handle is held
//! weakly and resolved at call time.

use std::sync::Weak;

use crate::capture::frame::{BufferHandle, CaptureMetadata, StreamId};
use crate::error::SubmitError;

/// Notified when the externally held reprocess buffer is free again.
pub trait BufferReleaseListener: Send + Sync {
    fn on_buffer_released(&self, handle: BufferHandle);
}

/// Input path that feeds a previously captured buffer back into the device.
pub trait ReprocessSink: Send + Sync {
    /// Queue `handle` on the reprocess input stream. The listener fires once
    /// the device is done with the buffer.
    fn submit(
        &self,
        stream: StreamId,
        handle: BufferHandle,
        listener: Weak<dyn BufferReleaseListener>,
    ) -> Result<(), SubmitError>;
}

/// Request-submission side of the capture pipeline.
pub trait CapturePipeline: Send + Sync {
    fn submit(&self, request: ReprocessRequest) -> Result<(), SubmitError>;

    /// Stream the client designated for reprocessed output.
    fn output_stream_id(&self) -> StreamId;
}

/// Supplies the reprocess input stream used when building a dispatch request.
pub trait StreamProvider: Send + Sync {
    fn reprocess_stream(&self) -> StreamId;
}

/// Capture request resubmitting an already captured buffer.
#[derive(Debug, Clone)]
pub struct ReprocessRequest {
    pub id: i32,
    pub input_stream: StreamId,
    pub output_stream: StreamId,
    pub metadata: CaptureMetadata,
}
