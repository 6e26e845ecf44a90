//! End-to-end tests for the ZSL correlation engine with mock collaborators

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use artemis::{
    BufferHandle, BufferReleaseListener, BufferSource, CaptureMetadata, CapturePipeline, Error,
    ReprocessRequest, ReprocessSink, SourceError, StreamId, StreamProvider, SubmitError,
    ZslBuffer, ZslConfig, ZslProcessor,
};
use bytes::Bytes;
use parking_lot::Mutex;

const REPROCESS_STREAM: StreamId = StreamId(3);
const OUTPUT_STREAM: StreamId = StreamId(7);

struct MockSource {
    queued: Mutex<VecDeque<ZslBuffer>>,
    released: Mutex<Vec<BufferHandle>>,
}

impl MockSource {
    fn new() -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            released: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, id: u64, timestamp: i64) -> BufferHandle {
        let handle = BufferHandle(id);
        self.queued.lock().push_back(ZslBuffer {
            handle,
            data: Bytes::from_static(b"frame"),
            timestamp,
        });
        handle
    }

    fn released(&self) -> Vec<BufferHandle> {
        self.released.lock().clone()
    }
}

impl BufferSource for MockSource {
    fn try_acquire(&self) -> Result<ZslBuffer, SourceError> {
        self.queued.lock().pop_front().ok_or(SourceError::Empty)
    }

    fn release(&self, buffer: ZslBuffer) {
        self.released.lock().push(buffer.handle);
    }
}

struct MockSink {
    submissions: Mutex<Vec<(StreamId, BufferHandle)>>,
    fail: AtomicBool,
}

impl MockSink {
    fn new() -> Self {
        Self {
            submissions: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }
}

impl ReprocessSink for MockSink {
    fn submit(
        &self,
        stream: StreamId,
        handle: BufferHandle,
        _listener: Weak<dyn BufferReleaseListener>,
    ) -> Result<(), SubmitError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(SubmitError::new(-22, "sink rejected buffer"));
        }
        self.submissions.lock().push((stream, handle));
        Ok(())
    }
}

struct MockPipeline {
    requests: Mutex<Vec<ReprocessRequest>>,
    fail: AtomicBool,
}

impl MockPipeline {
    fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }
}

impl CapturePipeline for MockPipeline {
    fn submit(&self, request: ReprocessRequest) -> Result<(), SubmitError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(SubmitError::new(-5, "capture pipeline busy"));
        }
        self.requests.lock().push(request);
        Ok(())
    }

    fn output_stream_id(&self) -> StreamId {
        OUTPUT_STREAM
    }
}

struct MockStreams;

impl StreamProvider for MockStreams {
    fn reprocess_stream(&self) -> StreamId {
        REPROCESS_STREAM
    }
}

struct Bench {
    source: Arc<MockSource>,
    sink: Arc<MockSink>,
    pipeline: Arc<MockPipeline>,
    _streams: Arc<MockStreams>,
    processor: Arc<ZslProcessor>,
}

fn bench() -> Bench {
    let config = ZslConfig {
        queue_depth: 4,
        frame_history_depth: 10,
        wait_duration_ms: 5,
    };
    let source = Arc::new(MockSource::new());
    let sink = Arc::new(MockSink::new());
    let pipeline = Arc::new(MockPipeline::new());
    let streams = Arc::new(MockStreams);
    let processor = ZslProcessor::spawn(
        &config,
        source.clone(),
        sink.clone(),
        pipeline.clone(),
        streams.clone(),
    );
    Bench {
        source,
        sink,
        pipeline,
        _streams: streams,
        processor,
    }
}

/// Give the drain task time to service pending signals.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn metadata_then_buffer_pairs_and_dispatches() {
    let bench = bench();

    bench.processor.record(CaptureMetadata::new(1, 100));
    let handle = bench.source.push(1, 100);
    bench.processor.on_buffer_available();
    settle().await;

    bench.processor.select_and_dispatch(7).unwrap();

    assert_eq!(
        bench.sink.submissions.lock().as_slice(),
        &[(REPROCESS_STREAM, handle)]
    );
    let requests = bench.pipeline.requests.lock();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].id, 7);
    assert_eq!(requests[0].input_stream, REPROCESS_STREAM);
    assert_eq!(requests[0].output_stream, OUTPUT_STREAM);
    assert_eq!(requests[0].metadata.sequence, 1);
    drop(requests);

    // release unlocks the engine again
    bench.processor.on_buffer_released(handle);
    bench.source.push(2, 200);
    bench.processor.on_buffer_available();
    settle().await;
    assert_eq!(bench.processor.stats().admitted, 2);
}

#[tokio::test]
async fn buffer_first_metadata_later_completes_pair() {
    let bench = bench();

    bench.source.push(1, 500);
    bench.processor.on_buffer_available();
    settle().await;

    // buffer-only slot, nothing selectable yet
    assert!(matches!(
        bench.processor.select_and_dispatch(1),
        Err(Error::NothingToReprocess)
    ));

    // the metadata arrival itself completes the pair, no new buffer event
    bench.processor.record(CaptureMetadata::new(9, 500));
    bench.processor.select_and_dispatch(2).unwrap();
    assert_eq!(bench.pipeline.requests.lock()[0].metadata.sequence, 9);
}

#[tokio::test]
async fn select_with_empty_ring_fails_and_engine_keeps_running() {
    let bench = bench();

    assert!(matches!(
        bench.processor.select_and_dispatch(1),
        Err(Error::NothingToReprocess)
    ));

    // still RUNNING: the next admitted pair dispatches fine
    bench.processor.record(CaptureMetadata::new(1, 1_000));
    bench.source.push(1, 1_000);
    bench.processor.on_buffer_available();
    settle().await;
    bench.processor.select_and_dispatch(2).unwrap();
}

#[tokio::test]
async fn locked_engine_drains_buffers_without_admitting() {
    let bench = bench();

    bench.processor.record(CaptureMetadata::new(1, 100));
    let dispatched = bench.source.push(1, 100);
    bench.processor.on_buffer_available();
    settle().await;
    bench.processor.select_and_dispatch(1).unwrap();

    // buffers delivered while locked go straight back to the producer
    let a = bench.source.push(2, 200);
    let b = bench.source.push(3, 300);
    bench.processor.on_buffer_available();
    settle().await;

    assert_eq!(bench.source.released(), vec![a, b]);
    let stats = bench.processor.stats();
    assert_eq!(stats.admitted, 1);
    assert_eq!(stats.discarded_while_locked, 2);

    // after release, admission resumes
    bench.processor.on_buffer_released(dispatched);
    bench.source.push(4, 400);
    bench.processor.on_buffer_available();
    settle().await;
    assert_eq!(bench.processor.stats().admitted, 2);
}

#[tokio::test]
async fn mismatched_release_is_tolerated() {
    let bench = bench();

    bench.processor.record(CaptureMetadata::new(1, 100));
    bench.source.push(1, 100);
    bench.processor.on_buffer_available();
    settle().await;
    bench.processor.select_and_dispatch(1).unwrap();

    // wrong handle: logged, but the engine still resumes
    bench.processor.on_buffer_released(BufferHandle(999));
    bench.source.push(2, 200);
    bench.processor.on_buffer_available();
    settle().await;
    assert_eq!(bench.processor.stats().admitted, 2);
}

#[tokio::test]
async fn sink_failure_leaves_pair_selectable() {
    let bench = bench();

    bench.processor.record(CaptureMetadata::new(1, 100));
    bench.source.push(1, 100);
    bench.processor.on_buffer_available();
    settle().await;

    bench.sink.fail.store(true, Ordering::Relaxed);
    assert!(matches!(
        bench.processor.select_and_dispatch(1),
        Err(Error::SinkSubmission(_))
    ));

    // nothing was committed: the same pair dispatches once the sink recovers
    bench.sink.fail.store(false, Ordering::Relaxed);
    bench.processor.select_and_dispatch(2).unwrap();
}

#[tokio::test]
async fn capture_failure_commits_nothing() {
    let bench = bench();

    bench.processor.record(CaptureMetadata::new(1, 100));
    let handle = bench.source.push(1, 100);
    bench.processor.on_buffer_available();
    settle().await;

    bench.pipeline.fail.store(true, Ordering::Relaxed);
    assert!(matches!(
        bench.processor.select_and_dispatch(1),
        Err(Error::CaptureSubmission(_))
    ));

    bench.pipeline.fail.store(false, Ordering::Relaxed);
    bench.processor.select_and_dispatch(2).unwrap();

    // the sink saw both attempts, for the same buffer
    assert_eq!(
        bench.sink.submissions.lock().as_slice(),
        &[(REPROCESS_STREAM, handle), (REPROCESS_STREAM, handle)]
    );
}

#[tokio::test]
async fn dispatch_while_locked_is_rejected() {
    let bench = bench();

    bench.processor.record(CaptureMetadata::new(1, 100));
    bench.source.push(1, 100);
    bench.processor.record(CaptureMetadata::new(2, 200));
    bench.source.push(2, 200);
    bench.processor.on_buffer_available();
    settle().await;

    bench.processor.select_and_dispatch(1).unwrap();
    assert!(matches!(
        bench.processor.select_and_dispatch(2),
        Err(Error::ReprocessInFlight)
    ));
}

#[tokio::test]
async fn backpressure_evicts_oldest_buffer_once() {
    let bench = bench();

    let oldest = bench.source.push(1, 1_000_000_000);
    for i in 2..=5u64 {
        bench.source.push(i, i as i64 * 1_000_000_000);
    }
    bench.processor.on_buffer_available();
    settle().await;

    assert_eq!(bench.source.released(), vec![oldest]);
    let stats = bench.processor.stats();
    assert_eq!(stats.admitted, 5);
    assert_eq!(stats.evicted, 1);
}

#[tokio::test]
async fn shutdown_returns_held_buffers_to_source() {
    let bench = bench();

    for i in 1..=3u64 {
        bench.source.push(i, i as i64 * 1_000_000_000);
    }
    bench.processor.on_buffer_available();
    settle().await;
    assert!(bench.source.released().is_empty());

    bench.processor.shutdown().await;
    let mut released = bench.source.released();
    released.sort_by_key(|handle| handle.0);
    assert_eq!(
        released,
        vec![BufferHandle(1), BufferHandle(2), BufferHandle(3)]
    );
}

#[tokio::test]
async fn reports_configured_reprocess_stream() {
    let bench = bench();
    assert_eq!(
        bench.processor.reprocess_stream_id(),
        Some(REPROCESS_STREAM)
    );
}
