// THEORY:
// The `buffers` module owns the two frame-handoff structures that connect
// the real-time capture loop to the asynchronous writer threads: the
// pre-roll ring buffer and the per-session record queues. Their one shared
// law is that the capture loop must never block.
//
// Key architectural principles:
// 1.  **FIFO-with-Eviction Pre-Roll**: The ring buffer keeps the newest N
//     frames; pushing into a full buffer evicts the oldest. A recording
//     session seeds itself from `snapshot()`, an independent copy in
//     capture order.
// 2.  **Drop-Newest Backpressure**: The record queues have a soft cap. A
//     push beyond the cap silently drops the incoming frame: bounding
//     memory is worth more than one frame, and blocking the producer is
//     the one behavior this design must never introduce.
// 3.  **One Lock, Short Holds**: A single mutex guards the ring buffer and
//     both queues, so a reactive session start sees a consistent view of
//     all of them. Every operation holds the lock only for the duration of
//     its own mutation, never across a sink write.
// 4.  **Fan-Out per Session**: Each session kind owns its queue. The driver
//     pushes a copy per active session, so concurrent Auto and Manual
//     recordings each receive every frame instead of splitting one stream
//     arbitrarily between them.

use crate::core_modules::frame::Frame;
use crate::recording::SessionKind;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Default soft cap on each record queue, in frames.
pub const DEFAULT_RECORD_QUEUE_CAP: usize = 500;

/// Fixed-capacity buffer of the most recent frames, oldest evicted first.
pub struct FrameRingBuffer {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl FrameRingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Appends a frame, evicting the oldest when at capacity. O(1).
    pub fn push(&mut self, frame: Frame) {
        if self.frames.len() >= self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    /// Independent copy of the current contents, in capture order.
    pub fn snapshot(&self) -> Vec<Frame> {
        self.frames.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

/// Soft-capped FIFO of frames awaiting persistence.
pub struct RecordQueue {
    frames: VecDeque<Frame>,
    soft_cap: usize,
}

impl RecordQueue {
    pub fn new(soft_cap: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            soft_cap: soft_cap.max(1),
        }
    }

    /// Appends a frame unless the queue is at its soft cap, in which case
    /// the frame is dropped. Returns whether the frame was accepted.
    pub fn push(&mut self, frame: Frame) -> bool {
        if self.frames.len() >= self.soft_cap {
            log::debug!("record queue at soft cap ({}); dropping frame", self.soft_cap);
            return false;
        }
        self.frames.push_back(frame);
        true
    }

    /// Non-blocking pop of the oldest frame. Consumers poll with a short
    /// backoff rather than spinning.
    pub fn pop_oldest(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

struct BufferSet {
    ring: FrameRingBuffer,
    queues: [RecordQueue; 2],
}

/// Cloneable handle to the ring buffer and record queues, all guarded by a
/// single mutex. Shared between the capture thread (sole ring writer and
/// queue producer) and the session writer threads (queue consumers).
#[derive(Clone)]
pub struct SharedBuffers {
    inner: Arc<Mutex<BufferSet>>,
}

impl SharedBuffers {
    pub fn new(ring_capacity: usize, queue_soft_cap: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BufferSet {
                ring: FrameRingBuffer::new(ring_capacity),
                queues: [
                    RecordQueue::new(queue_soft_cap),
                    RecordQueue::new(queue_soft_cap),
                ],
            })),
        }
    }

    // A poisoned lock still holds structurally valid frame data, so
    // recover the guard instead of propagating the panic.
    fn locked(&self) -> MutexGuard<'_, BufferSet> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push_frame(&self, frame: Frame) {
        self.locked().ring.push(frame);
    }

    pub fn snapshot(&self) -> Vec<Frame> {
        self.locked().ring.snapshot()
    }

    pub fn ring_len(&self) -> usize {
        self.locked().ring.len()
    }

    pub fn push_record(&self, kind: SessionKind, frame: Frame) -> bool {
        self.locked().queues[kind.index()].push(frame)
    }

    pub fn pop_record(&self, kind: SessionKind) -> Option<Frame> {
        self.locked().queues[kind.index()].pop_oldest()
    }

    pub fn record_len(&self, kind: SessionKind) -> usize {
        self.locked().queues[kind.index()].len()
    }

    /// Discards everything queued for one session kind.
    pub fn clear_record(&self, kind: SessionKind) {
        self.locked().queues[kind.index()].clear();
    }

    /// Drains everything for shutdown.
    pub fn clear_all(&self) {
        let mut set = self.locked();
        set.ring.clear();
        for queue in &mut set.queues {
            queue.clear();
        }
    }
}
