use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Identifier of a configured camera stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub i32);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream:{}", self.0)
    }
}

/// Opaque handle to a hardware image buffer.
///
/// The engine never dereferences a handle; it only moves it and compares it
/// for identity when the reprocess path reports the buffer released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf:{:#x}", self.0)
    }
}

/// Image buffer as delivered by the hardware producer.
pub struct ZslBuffer {
    pub handle: BufferHandle,

    /// Immutable pixel payload - can be shared across threads without copying
    pub data: Bytes,

    /// Capture timestamp in nanoseconds, monotonic sensor clock.
    /// Zero marks "no real capture behind this record".
    pub timestamp: i64,
}

impl fmt::Debug for ZslBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZslBuffer")
            .field("handle", &self.handle)
            .field("timestamp", &self.timestamp)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Per-capture metadata produced by the request pipeline.
#[derive(Debug, Clone)]
pub struct CaptureMetadata {
    pub sequence: u64,

    /// Start-of-exposure timestamp, nanoseconds, same clock domain as
    /// [`ZslBuffer::timestamp`]. `None` when the pipeline failed to fill the
    /// field; such records never match a buffer.
    pub sensor_timestamp: Option<i64>,

    pub exposure_ns: Option<i64>,
    pub sensitivity_iso: Option<u32>,
}

impl CaptureMetadata {
    pub fn new(sequence: u64, sensor_timestamp: i64) -> Self {
        Self {
            sequence,
            sensor_timestamp: Some(sensor_timestamp),
            exposure_ns: None,
            sensitivity_iso: None,
        }
    }
}
