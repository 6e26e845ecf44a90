//! ZSL correlation engine
//!
//! Admits producer buffers into the pair queue, correlates them with capture
//! metadata by timestamp, and on demand hands the oldest complete pair to the
//! reprocess path. While a reprocess request is in flight the engine is
//! locked and new buffers go straight back to the producer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam::utils::CachePadded;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::capture::frame::{BufferHandle, CaptureMetadata, StreamId, ZslBuffer};
use crate::capture::source::BufferSource;
use crate::error::{Error, SourceError};
use crate::pipeline::reprocess::{
    BufferReleaseListener, CapturePipeline, ReprocessRequest, ReprocessSink, StreamProvider,
};
use crate::pipeline::ring::{FrameHistory, PairQueue};
use crate::ZslConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    Locked,
}

/// Everything the correlation logic touches, behind one lock so matching
/// always observes a consistent snapshot of both rings.
struct Shared {
    queue: PairQueue,
    history: FrameHistory,
    state: State,
    /// Handle handed to the reprocess sink, kept to sanity-check the
    /// release notification.
    pending_release: Option<BufferHandle>,
}

#[derive(Default)]
struct Stats {
    admitted: AtomicU64,
    evicted: AtomicU64,
    matched: AtomicU64,
    discarded_while_locked: AtomicU64,
}

/// Snapshot of the engine's counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZslStats {
    pub admitted: u64,
    pub evicted: u64,
    pub matched: u64,
    pub discarded_while_locked: u64,
}

/// Zero-shutter-lag buffer/metadata correlator.
///
/// Construct with [`spawn`](Self::spawn) inside a tokio runtime; a dedicated
/// drain task services the buffer source. All collaborators are held weakly
/// and looked up per call.
pub struct ZslProcessor {
    shared: Mutex<Shared>,
    stats: CachePadded<Stats>,

    /// Coalesced "buffer may be available" wake. A full channel means a
    /// signal is already pending.
    wake_tx: flume::Sender<()>,
    stopping: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,

    weak_self: Weak<ZslProcessor>,
    source: Weak<dyn BufferSource>,
    sink: Weak<dyn ReprocessSink>,
    pipeline: Weak<dyn CapturePipeline>,
    streams: Weak<dyn StreamProvider>,
}

impl ZslProcessor {
    /// Create the engine and start its drain task.
    pub fn spawn(
        config: &ZslConfig,
        source: Arc<dyn BufferSource>,
        sink: Arc<dyn ReprocessSink>,
        pipeline: Arc<dyn CapturePipeline>,
        streams: Arc<dyn StreamProvider>,
    ) -> Arc<Self> {
        let (wake_tx, wake_rx) = flume::bounded(1);

        let processor = Arc::new_cyclic(|weak_self: &Weak<ZslProcessor>| Self {
            shared: Mutex::new(Shared {
                queue: PairQueue::new(config.queue_depth),
                history: FrameHistory::new(config.frame_history_depth),
                state: State::Running,
                pending_release: None,
            }),
            stats: CachePadded::new(Stats::default()),
            wake_tx,
            stopping: AtomicBool::new(false),
            worker: Mutex::new(None),
            weak_self: weak_self.clone(),
            source: Arc::downgrade(&source),
            sink: Arc::downgrade(&sink),
            pipeline: Arc::downgrade(&pipeline),
            streams: Arc::downgrade(&streams),
        });

        let handle = tokio::spawn(Self::drain_loop(
            Arc::downgrade(&processor),
            wake_rx,
            Duration::from_millis(config.wait_duration_ms),
        ));
        *processor.worker.lock() = Some(handle);

        info!(
            queue_depth = config.queue_depth,
            frame_history_depth = config.frame_history_depth,
            "zsl processor started"
        );
        processor
    }

    /// Park per-capture metadata and try to complete pending pairs.
    ///
    /// Dropped silently while a reprocess request is in flight.
    pub fn record(&self, metadata: CaptureMetadata) {
        let mut shared = self.shared.lock();
        if shared.state != State::Running {
            return;
        }
        if metadata.sensor_timestamp.is_none() {
            warn!(
                sequence = metadata.sequence,
                "metadata has no sensor timestamp, unusable for matching"
            );
        }

        let Shared { queue, history, .. } = &mut *shared;
        history.record(metadata);
        let formed = queue.find_matches(history);
        self.note_matches(formed);
    }

    /// Fire-and-forget signal that the producer may have buffers queued.
    /// Multiple signals before the drain task wakes collapse into one.
    pub fn on_buffer_available(&self) {
        let _ = self.wake_tx.try_send(());
    }

    /// Release notification from the reprocess path; resumes admission.
    ///
    /// A mismatched handle is logged but still unlocks the engine.
    pub fn on_buffer_released(&self, handle: BufferHandle) {
        let mut shared = self.shared.lock();
        match shared.pending_release.take() {
            Some(expected) if expected == handle => {
                debug!(%handle, "reprocess buffer released");
            }
            Some(expected) => {
                error!(%expected, got = %handle, "released buffer does not match dispatched buffer");
            }
            None => {
                warn!(%handle, "release notification with no reprocess in flight");
            }
        }
        shared.state = State::Running;
    }

    /// Pick the oldest complete pair and dispatch it for reprocessing.
    ///
    /// On success the engine transitions to the locked state until
    /// [`on_buffer_released`](Self::on_buffer_released) fires. On any failure
    /// nothing is mutated and the pair stays selectable.
    #[instrument(skip(self))]
    pub fn select_and_dispatch(&self, request_id: i32) -> Result<(), Error> {
        let mut shared = self.shared.lock();
        if shared.state == State::Locked {
            return Err(Error::ReprocessInFlight);
        }

        let (index, handle, metadata) = shared
            .queue
            .oldest_ready()
            .ok_or(Error::NothingToReprocess)?;

        let sink = self
            .sink
            .upgrade()
            .ok_or(Error::CollaboratorGone("reprocess sink"))?;
        let pipeline = self
            .pipeline
            .upgrade()
            .ok_or(Error::CollaboratorGone("capture pipeline"))?;
        let streams = self
            .streams
            .upgrade()
            .ok_or(Error::CollaboratorGone("stream provider"))?;

        let input_stream = streams.reprocess_stream();
        let listener: Weak<dyn BufferReleaseListener> = self.weak_self.clone();

        sink.submit(input_stream, handle, listener)
            .map_err(Error::SinkSubmission)?;
        pipeline
            .submit(ReprocessRequest {
                id: request_id,
                input_stream,
                output_stream: pipeline.output_stream_id(),
                metadata,
            })
            .map_err(Error::CaptureSubmission)?;

        // Both collaborators accepted: commit the hand-off.
        shared.queue.take(index);
        shared.state = State::Locked;
        shared.pending_release = Some(handle);
        metrics::counter!("zsl_dispatched").increment(1);
        info!(request_id, %handle, "pair dispatched for reprocessing");
        Ok(())
    }

    /// Reprocess input stream currently configured, if the provider is alive.
    pub fn reprocess_stream_id(&self) -> Option<StreamId> {
        self.streams.upgrade().map(|s| s.reprocess_stream())
    }

    pub fn stats(&self) -> ZslStats {
        ZslStats {
            admitted: self.stats.admitted.load(Ordering::Relaxed),
            evicted: self.stats.evicted.load(Ordering::Relaxed),
            matched: self.stats.matched.load(Ordering::Relaxed),
            discarded_while_locked: self.stats.discarded_while_locked.load(Ordering::Relaxed),
        }
    }

    /// Stop the drain task, join it, then return every buffer still held to
    /// the producer.
    pub async fn shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
        let _ = self.wake_tx.try_send(());

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(error = %err, "zsl drain task terminated abnormally");
            }
        }

        let buffers = self.shared.lock().queue.drain_buffers();
        if let Some(source) = self.source.upgrade() {
            for buffer in buffers {
                source.release(buffer);
            }
        }
        info!("zsl processor shut down");
    }

    /// Drain task: wait for a wake signal with a bounded timeout, then pull
    /// buffers until the source runs dry. A timeout only re-checks liveness.
    async fn drain_loop(this: Weak<ZslProcessor>, wake_rx: flume::Receiver<()>, wait: Duration) {
        debug!("zsl drain task started");
        loop {
            let signaled = match tokio::time::timeout(wait, wake_rx.recv_async()).await {
                // a timeout is not an error, it only re-checks liveness
                Err(_elapsed) => false,
                Ok(Ok(())) => true,
                // engine dropped, sender gone
                Ok(Err(_)) => break,
            };

            let Some(processor) = this.upgrade() else {
                break;
            };
            if processor.stopping.load(Ordering::Acquire) {
                break;
            }
            if signaled && !processor.drain_available() {
                break;
            }
        }
        debug!("zsl drain task exited");
    }

    /// Pull buffers one at a time until the source reports empty.
    ///
    /// Returns `false` when the source is gone and the loop should terminate
    /// for good.
    fn drain_available(&self) -> bool {
        loop {
            let Some(source) = self.source.upgrade() else {
                info!("buffer source gone, stopping drain task");
                return false;
            };
            let buffer = match source.try_acquire() {
                Ok(buffer) => buffer,
                Err(SourceError::Empty) => return true,
                Err(err) => {
                    // ends this drain cycle only
                    error!(error = %err, "error receiving zsl buffer");
                    return true;
                }
            };
            self.admit(buffer, source.as_ref());
        }
    }

    /// Insert one drained buffer, evicting and matching atomically under the
    /// shared lock. While locked the buffer is bounced back to the producer.
    fn admit(&self, buffer: ZslBuffer, source: &dyn BufferSource) {
        let mut shared = self.shared.lock();
        if shared.state == State::Locked {
            debug!(handle = %buffer.handle, "mid reprocess, discarding new buffer");
            self.stats
                .discarded_while_locked
                .fetch_add(1, Ordering::Relaxed);
            source.release(buffer);
            return;
        }

        let Shared { queue, history, .. } = &mut *shared;
        if let Some(evicted) = queue.admit(buffer) {
            self.stats.evicted.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("zsl_evicted").increment(1);
            source.release(evicted);
        }
        self.stats.admitted.fetch_add(1, Ordering::Relaxed);

        let formed = queue.find_matches(history);
        self.note_matches(formed);
    }

    fn note_matches(&self, formed: usize) {
        if formed > 0 {
            self.stats
                .matched
                .fetch_add(formed as u64, Ordering::Relaxed);
            metrics::counter!("zsl_pairs_formed").increment(formed as u64);
        }
    }
}

impl BufferReleaseListener for ZslProcessor {
    fn on_buffer_released(&self, handle: BufferHandle) {
        ZslProcessor::on_buffer_released(self, handle);
    }
}

impl Drop for ZslProcessor {
    fn drop(&mut self) {
        // The drain task only holds a weak reference, so by the time this
        // runs it can no longer touch the rings.
        let buffers = self.shared.get_mut().queue.drain_buffers();
        if let Some(source) = self.source.upgrade() {
            for buffer in buffers {
                source.release(buffer);
            }
        }
    }
}
