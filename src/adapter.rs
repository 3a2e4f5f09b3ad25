//! Hop framing for arbitrary-length input.
//!
//! Hosts deliver audio in whatever block size they like; the engine wants
//! exactly one hop at a time. `FrameAdapter` sits in between on a lock-free
//! SPSC ring.

use ringbuf::{Consumer, Producer, RingBuffer};

/// Ring capacity in hops.
pub const ADAPTER_CAP_HOPS: usize = 8;

pub struct FrameAdapter {
    producer: Producer<f32>,
    consumer: Consumer<f32>,
    hop: usize,
}

impl FrameAdapter {
    pub fn new(hop: usize) -> Self {
        let hop = hop.max(1);
        let (producer, consumer) = RingBuffer::<f32>::new(hop * ADAPTER_CAP_HOPS).split();
        Self {
            producer,
            consumer,
            hop,
        }
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    /// Queues as many samples as fit and returns how many were taken.
    pub fn push(&mut self, samples: &[f32]) -> usize {
        self.producer.push_slice(samples)
    }

    /// Fills `out` (one hop long) when a full hop is queued.
    pub fn pop_hop(&mut self, out: &mut [f32]) -> bool {
        debug_assert_eq!(out.len(), self.hop);
        if self.consumer.len() < self.hop {
            return false;
        }
        self.consumer.pop_slice(out) == out.len()
    }

    /// Samples waiting for a full hop.
    pub fn available(&self) -> usize {
        self.consumer.len()
    }

    /// Drains what is left (less than a hop when called after `pop_hop`).
    pub fn drain_into(&mut self, out: &mut [f32]) -> usize {
        self.consumer.pop_slice(out)
    }

    pub fn clear(&mut self) {
        while self.consumer.pop().is_some() {}
    }
}
