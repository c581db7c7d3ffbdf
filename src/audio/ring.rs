//! Bounded staging queue for encoded packets
//!
//! The audio callback pushes, a polling consumer drains. Slots are allocated
//! once; a push copies the payload into the next free slot. When every slot
//! is taken the oldest packet is evicted and counted as skipped.
//!
//! Two arenas of slots exist. A drain swaps the empty spare arena in under the
//! push lock and copies the packets out after releasing it, so the producer
//! never waits on more than a pointer swap.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

/// An encoded packet handed to the consumer
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPacket {
    /// Compressed payload, exactly `len()` bytes
    pub data: Bytes,
    /// Peak level of the source PCM in `0.0..=1.0`
    pub loudness: f32,
}

impl EncodedPacket {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Preallocated storage for one packet
#[derive(Debug)]
struct Slot {
    data: Box<[u8]>,
    len: usize,
    loudness: f32,
}

#[derive(Debug)]
struct Slots {
    slots: Box<[Slot]>,
    /// Slots `[0, count)` hold packets, oldest first
    count: usize,
}

impl Slots {
    fn new(capacity: usize, slot_capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                data: vec![0u8; slot_capacity].into_boxed_slice(),
                len: 0,
                loudness: 0.0,
            })
            .collect();
        Self { slots, count: 0 }
    }
}

/// Fixed-capacity packet queue with drop-oldest overflow
#[derive(Debug)]
pub struct PacketRing {
    live: Mutex<Slots>,
    /// Empty arena swapped in by `drain_all`; only drainers lock it
    spare: Mutex<Slots>,
    slot_capacity: usize,
    skipped: AtomicU64,
}

impl PacketRing {
    /// `capacity` slots of `slot_capacity` bytes each
    pub fn new(capacity: usize, slot_capacity: usize) -> Self {
        let capacity = capacity.max(1);

        Self {
            live: Mutex::new(Slots::new(capacity, slot_capacity)),
            spare: Mutex::new(Slots::new(capacity, slot_capacity)),
            slot_capacity,
            skipped: AtomicU64::new(0),
        }
    }

    /// Stage a packet. Returns `true` if the oldest packet was evicted.
    ///
    /// Payloads longer than the slot capacity are truncated.
    pub fn push(&self, payload: &[u8], loudness: f32) -> bool {
        let len = payload.len().min(self.slot_capacity);
        if len < payload.len() {
            tracing::warn!(
                "Packet of {} bytes truncated to slot size {}",
                payload.len(),
                self.slot_capacity
            );
        }

        let mut inner = self.live.lock();
        let evicted = if inner.count == inner.slots.len() {
            // Oldest slot moves to the back and gets overwritten below
            inner.slots.rotate_left(1);
            true
        } else {
            inner.count += 1;
            false
        };

        let index = inner.count - 1;
        let slot = &mut inner.slots[index];
        slot.data[..len].copy_from_slice(&payload[..len]);
        slot.len = len;
        slot.loudness = loudness;
        drop(inner);

        if evicted {
            self.skipped.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }

    /// Copy out every staged packet, oldest first, and empty the queue
    pub fn drain_all(&self) -> Vec<EncodedPacket> {
        let mut drained = self.spare.lock();
        std::mem::swap(&mut *self.live.lock(), &mut *drained);

        let count = drained.count;
        let packets = drained.slots[..count]
            .iter()
            .map(|slot| EncodedPacket {
                data: Bytes::copy_from_slice(&slot.data[..slot.len]),
                loudness: slot.loudness,
            })
            .collect();
        // The spare arena is always empty between drains
        drained.count = 0;
        packets
    }

    /// Packets evicted by overflow since the last clear
    pub fn skipped_packets(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn clear_skipped_packets(&self) {
        self.skipped.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.live.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.live.lock().slots.len()
    }

    /// Bytes per slot
    pub fn slot_capacity(&self) -> usize {
        self.slot_capacity
    }
}
