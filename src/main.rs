//! Artemis ZSL correlation demo with a synthetic buffer producer

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use artemis::{
    BufferHandle, BufferReleaseListener, BufferSource, CaptureMetadata, CapturePipeline, Config,
    ReprocessRequest, ReprocessSink, SourceError, StreamId, StreamProvider, SubmitError,
    ZslBuffer, ZslProcessor,
};
use bytes::Bytes;
use color_eyre::Result;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// In-memory producer standing in for a hardware buffer queue.
struct SyntheticSource {
    queued: Mutex<VecDeque<ZslBuffer>>,
    released: AtomicU64,
}

impl SyntheticSource {
    fn new() -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            released: AtomicU64::new(0),
        }
    }

    fn produce(&self, id: u64, timestamp: i64) {
        self.queued.lock().push_back(ZslBuffer {
            handle: BufferHandle(id),
            data: Bytes::from_static(b"synthetic frame payload"),
            timestamp,
        });
    }
}

impl BufferSource for SyntheticSource {
    fn try_acquire(&self) -> Result<ZslBuffer, SourceError> {
        self.queued.lock().pop_front().ok_or(SourceError::Empty)
    }

    fn release(&self, buffer: ZslBuffer) {
        self.released.fetch_add(1, Ordering::Relaxed);
        debug!(handle = %buffer.handle, "buffer returned to producer");
    }
}

/// Reprocess input path that just logs the hand-off.
struct LoggingSink {
    last: Mutex<Option<BufferHandle>>,
}

impl ReprocessSink for LoggingSink {
    fn submit(
        &self,
        stream: StreamId,
        handle: BufferHandle,
        _listener: Weak<dyn BufferReleaseListener>,
    ) -> Result<(), SubmitError> {
        info!(%stream, %handle, "buffer queued on reprocess input");
        *self.last.lock() = Some(handle);
        Ok(())
    }
}

struct LoggingPipeline;

impl CapturePipeline for LoggingPipeline {
    fn submit(&self, request: ReprocessRequest) -> Result<(), SubmitError> {
        info!(
            id = request.id,
            input = %request.input_stream,
            output = %request.output_stream,
            metadata_seq = request.metadata.sequence,
            "reprocess request submitted"
        );
        Ok(())
    }

    fn output_stream_id(&self) -> StreamId {
        StreamId(2)
    }
}

struct FixedStreams;

impl StreamProvider for FixedStreams {
    fn reprocess_stream(&self) -> StreamId {
        StreamId(1)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("artemis=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Artemis launching...");

    // Load configuration, layering an optional artemis.toml over defaults
    let config: Config = config::Config::builder()
        .add_source(config::File::with_name("artemis").required(false))
        .build()?
        .try_deserialize()?;
    artemis::CONFIG.store(Arc::new(config.clone()));

    let source = Arc::new(SyntheticSource::new());
    let sink = Arc::new(LoggingSink {
        last: Mutex::new(None),
    });
    let pipeline = Arc::new(LoggingPipeline);
    let streams = Arc::new(FixedStreams);

    let processor = ZslProcessor::spawn(
        &config.zsl,
        source.clone(),
        sink.clone(),
        pipeline.clone(),
        streams.clone(),
    );

    // 30 fps producer; per-capture metadata follows each buffer
    let frame_interval = Duration::from_millis(33);
    for i in 1..=12u64 {
        let timestamp = i as i64 * 33_000_000;
        source.produce(i, timestamp);
        processor.on_buffer_available();
        processor.record(CaptureMetadata::new(i, timestamp));
        tokio::time::sleep(frame_interval).await;
    }

    // Shutter press: hand the oldest matched capture to the reprocess path
    match processor.select_and_dispatch(1) {
        Ok(()) => info!("reprocess request accepted"),
        Err(err) => warn!(error = %err, "nothing dispatched"),
    }

    // The device reports the reprocess buffer free again
    let dispatched = *sink.last.lock();
    if let Some(handle) = dispatched {
        processor.on_buffer_released(handle);
    }

    let stats = processor.stats();
    info!(?stats, "session complete");

    processor.shutdown().await;
    info!(
        returned = source.released.load(Ordering::Relaxed),
        "producer reclaimed its buffers"
    );
    info!("Artemis shutting down");
    Ok(())
}
