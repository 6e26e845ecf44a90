pub mod frame;
pub mod source;

pub use frame::{BufferHandle, CaptureMetadata, StreamId, ZslBuffer};
pub use source::BufferSource;
