//! Pair-slot ring and metadata history for timestamp correlation
//!
//! Both structures are plain fixed-capacity arrays driven by integer
//! cursors. Ownership moves between them (history slot -> pair slot) as a
//! value move under the processor's lock, never via references between
//! entries.

use tracing::warn;

use crate::capture::frame::{BufferHandle, CaptureMetadata, ZslBuffer};

/// Two capture timestamps closer than this refer to the same exposure (ns).
pub const MATCH_TOLERANCE_NS: i64 = 1_000_000;

/// One ring cell: a buffer and, once correlated, its metadata.
#[derive(Default)]
pub struct PairSlot {
    pub buffer: Option<ZslBuffer>,
    pub metadata: Option<CaptureMetadata>,
}

impl PairSlot {
    pub fn is_complete(&self) -> bool {
        self.buffer.is_some() && self.metadata.is_some()
    }
}

/// Bounded backlog of metadata records awaiting a matching buffer.
///
/// Metadata usually arrives before its buffer, so records are parked here
/// until the correlation pass consumes them. A single rotating write index
/// overwrites the oldest record when the ring wraps; losing unmatched
/// metadata that old is accepted.
pub struct FrameHistory {
    records: Vec<Option<CaptureMetadata>>,
    write_index: usize,
}

impl FrameHistory {
    pub fn new(depth: usize) -> Self {
        assert!(depth > 0, "frame history depth must be greater than 0");
        Self {
            records: (0..depth).map(|_| None).collect(),
            write_index: 0,
        }
    }

    /// Insert a record at the write cursor, overwriting whatever occupied it.
    pub fn record(&mut self, metadata: CaptureMetadata) {
        self.records[self.write_index] = Some(metadata);
        self.write_index = (self.write_index + 1) % self.records.len();
    }

    /// Move out the first record within tolerance of `buffer_timestamp`.
    ///
    /// Scan order is storage order; the first hit wins even if a later
    /// record is closer. Records without a timestamp never match.
    fn take_match(&mut self, buffer_timestamp: i64) -> Option<CaptureMetadata> {
        for slot in &mut self.records {
            let Some(metadata) = slot.as_ref() else {
                continue;
            };
            let Some(timestamp) = metadata.sensor_timestamp else {
                warn!(
                    sequence = metadata.sequence,
                    "metadata record has no sensor timestamp, skipping"
                );
                continue;
            };
            if timestamp == buffer_timestamp
                || (buffer_timestamp - timestamp).abs() < MATCH_TOLERANCE_NS
            {
                return slot.take();
            }
        }
        None
    }

    #[cfg(test)]
    fn occupied(&self) -> usize {
        self.records.iter().filter(|r| r.is_some()).count()
    }
}

/// Fixed-capacity circular queue of pair slots.
///
/// `head` is the next write position, `tail` the oldest unconsumed entry.
/// head == tail means empty, so the backing array carries one spare slot and
/// `depth` entries fit before eviction starts.
pub struct PairQueue {
    slots: Vec<PairSlot>,
    head: usize,
    tail: usize,
}

impl PairQueue {
    pub fn new(depth: usize) -> Self {
        assert!(depth > 0, "pair queue depth must be greater than 0");
        Self {
            slots: (0..depth + 1).map(|_| PairSlot::default()).collect(),
            head: 0,
            tail: 0,
        }
    }

    fn is_full(&self) -> bool {
        (self.head + 1) % self.slots.len() == self.tail
    }

    /// Insert a freshly produced buffer at `head`.
    ///
    /// When the queue is full the tail entry is evicted first, strictly
    /// oldest-first with no preference for matched pairs; the evicted buffer
    /// is returned so the caller can hand it back to the producer.
    pub fn admit(&mut self, buffer: ZslBuffer) -> Option<ZslBuffer> {
        let evicted = if self.is_full() {
            let slot = &mut self.slots[self.tail];
            let buffer = slot.buffer.take();
            slot.metadata = None;
            self.tail = (self.tail + 1) % self.slots.len();
            buffer
        } else {
            None
        };

        let slot = &mut self.slots[self.head];
        slot.buffer = Some(buffer);
        slot.metadata = None;
        self.head = (self.head + 1) % self.slots.len();

        evicted
    }

    /// Correlation pass: complete every buffer-only slot that has a history
    /// record within tolerance. Returns the number of pairs formed.
    ///
    /// Each history record can satisfy at most one buffer; `take_match`
    /// empties the record the moment it is consumed.
    pub fn find_matches(&mut self, history: &mut FrameHistory) -> usize {
        let mut formed = 0;
        for slot in &mut self.slots {
            if slot.metadata.is_some() {
                continue;
            }
            let Some(buffer) = slot.buffer.as_ref() else {
                continue;
            };
            if buffer.timestamp == 0 {
                continue;
            }
            if let Some(metadata) = history.take_match(buffer.timestamp) {
                slot.metadata = Some(metadata);
                formed += 1;
            }
        }
        formed
    }

    /// Oldest complete pair, scanning tail towards head.
    ///
    /// Returns the slot index, the buffer handle and a copy of the metadata;
    /// the slot itself stays untouched until [`take`](Self::take) commits
    /// the hand-off.
    pub fn oldest_ready(&self) -> Option<(usize, BufferHandle, CaptureMetadata)> {
        let mut index = self.tail;
        while index != self.head {
            let slot = &self.slots[index];
            if let (Some(buffer), Some(metadata)) = (slot.buffer.as_ref(), slot.metadata.as_ref())
            {
                return Some((index, buffer.handle, metadata.clone()));
            }
            index = (index + 1) % self.slots.len();
        }
        None
    }

    /// Move a pair out of its slot, leaving the slot empty.
    pub fn take(&mut self, index: usize) -> (Option<ZslBuffer>, Option<CaptureMetadata>) {
        let slot = &mut self.slots[index];
        (slot.buffer.take(), slot.metadata.take())
    }

    /// Empty the queue, returning every buffer still held.
    pub fn drain_buffers(&mut self) -> Vec<ZslBuffer> {
        let buffers = self
            .slots
            .iter_mut()
            .filter_map(|slot| {
                slot.metadata = None;
                slot.buffer.take()
            })
            .collect();
        self.head = 0;
        self.tail = 0;
        buffers
    }

    /// Number of occupied entries between tail and head.
    pub fn len(&self) -> usize {
        (self.head + self.slots.len() - self.tail) % self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }
}
