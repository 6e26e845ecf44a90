//! Producer-side interface the drain loop pulls buffers from

use crate::capture::frame::ZslBuffer;
use crate::error::SourceError;

/// Hardware buffer producer, e.g. a camera HAL buffer queue endpoint.
///
/// The engine owns every buffer it acquires until the buffer is either handed
/// to the reprocess sink or given back through [`release`](Self::release).
pub trait BufferSource: Send + Sync {
    /// Dequeue the next buffer without blocking.
    ///
    /// [`SourceError::Empty`] means the producer has nothing queued and ends
    /// the current drain cycle.
    fn try_acquire(&self) -> Result<ZslBuffer, SourceError>;

    /// Return ownership of a buffer to the producer.
    fn release(&self, buffer: ZslBuffer);
}
