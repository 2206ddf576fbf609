//! Per-channel sample ring
//!
//! Single-producer/single-consumer bounded ring of 16-bit PCM samples,
//! one per microphone. The capture callback owns the producer half, the
//! worker thread owns the consumer half; neither side ever takes a lock
//! or allocates.
//!
//! Indices grow monotonically and are reduced modulo capacity on access,
//! so a full ring (`write - read == capacity`) is unambiguous. The
//! producer publishes data with a release store of the write index; the
//! consumer acquires it before reading slots, and vice versa for the
//! read index. Samples that do not fit are dropped and counted as
//! overruns rather than overwriting unread data.

use std::sync::atomic::{AtomicI16, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

struct RingShared {
    slots: Box<[AtomicI16]>,
    capacity: usize,
    /// Total samples ever written (monotonic)
    write: AtomicUsize,
    /// Total samples ever read (monotonic)
    read: AtomicUsize,
    /// Samples dropped because the ring was full
    overruns: AtomicU64,
}

/// Create one channel ring with the given capacity.
///
/// Capacity should be at least 4x the expected block size so scheduling
/// jitter on the worker thread does not immediately cost samples.
pub fn channel_ring(capacity: usize) -> (RingProducer, RingConsumer) {
    assert!(capacity > 0, "ring capacity must be non-zero");
    let slots = (0..capacity).map(|_| AtomicI16::new(0)).collect();
    let shared = Arc::new(RingShared {
        slots,
        capacity,
        write: AtomicUsize::new(0),
        read: AtomicUsize::new(0),
        overruns: AtomicU64::new(0),
    });
    (
        RingProducer { shared: Arc::clone(&shared) },
        RingConsumer { shared },
    )
}

/// Write half of a channel ring; owned by the capture callback
pub struct RingProducer {
    shared: Arc<RingShared>,
}

/// Read half of a channel ring; owned by the worker thread
pub struct RingConsumer {
    shared: Arc<RingShared>,
}

impl RingProducer {
    /// Append as many samples as fit; returns the count accepted.
    /// Samples beyond the free space are dropped and counted as overruns.
    pub fn push(&mut self, samples: &[i16]) -> usize {
        let write = self.shared.write.load(Ordering::Relaxed);
        let read = self.shared.read.load(Ordering::Acquire);
        let free = self.shared.capacity - (write - read);

        let accepted = samples.len().min(free);
        for (i, &s) in samples[..accepted].iter().enumerate() {
            let slot = (write + i) % self.shared.capacity;
            self.shared.slots[slot].store(s, Ordering::Relaxed);
        }
        self.shared.write.store(write + accepted, Ordering::Release);

        let dropped = samples.len() - accepted;
        if dropped > 0 {
            self.shared.overruns.fetch_add(dropped as u64, Ordering::Relaxed);
        }
        accepted
    }

    /// Free space from the producer's point of view
    pub fn free(&self) -> usize {
        let write = self.shared.write.load(Ordering::Relaxed);
        let read = self.shared.read.load(Ordering::Acquire);
        self.shared.capacity - (write - read)
    }

    /// Count dropped samples that never reached `push` (all-or-nothing
    /// demux drops whole slices before touching the ring)
    pub fn record_overrun(&self, samples: usize) {
        self.shared
            .overruns
            .fetch_add(samples as u64, Ordering::Relaxed);
    }

    /// Total samples dropped on this channel so far
    pub fn overruns(&self) -> u64 {
        self.shared.overruns.load(Ordering::Relaxed)
    }
}

impl RingConsumer {
    /// Copy up to `dest.len()` samples out of the ring; returns the count
    /// actually copied.
    pub fn pop(&mut self, dest: &mut [i16]) -> usize {
        let read = self.shared.read.load(Ordering::Relaxed);
        let write = self.shared.write.load(Ordering::Acquire);
        let available = write - read;

        let count = dest.len().min(available);
        for (i, d) in dest[..count].iter_mut().enumerate() {
            let slot = (read + i) % self.shared.capacity;
            *d = self.shared.slots[slot].load(Ordering::Relaxed);
        }
        self.shared.read.store(read + count, Ordering::Release);
        count
    }

    /// Current fill level
    pub fn level(&self) -> usize {
        let read = self.shared.read.load(Ordering::Relaxed);
        let write = self.shared.write.load(Ordering::Acquire);
        write - read
    }

    /// Total samples dropped on this channel so far
    pub fn overruns(&self) -> u64 {
        self.shared.overruns.load(Ordering::Relaxed)
    }

    /// Ring capacity in samples
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_preserves_order() {
        let (mut tx, mut rx) = channel_ring(64);
        let input: Vec<i16> = (0..48).collect();
        assert_eq!(tx.push(&input), 48);
        assert_eq!(rx.level(), 48);

        let mut out = [0i16; 48];
        assert_eq!(rx.pop(&mut out), 48);
        assert_eq!(&out[..], &input[..]);
        assert_eq!(rx.level(), 0);
        assert_eq!(rx.overruns(), 0);
    }

    #[test]
    fn test_interleaved_schedule() {
        let (mut tx, mut rx) = channel_ring(8);
        let mut written: Vec<i16> = Vec::new();
        let mut read_back: Vec<i16> = Vec::new();
        let mut next = 0i16;

        // Alternate pushes and pops, never exceeding capacity in flight
        for round in 0..50 {
            let n = 1 + (round % 5);
            let chunk: Vec<i16> = (0..n).map(|_| {
                let v = next;
                next += 1;
                v
            }).collect();
            let accepted = tx.push(&chunk);
            written.extend_from_slice(&chunk[..accepted]);

            let mut out = [0i16; 4];
            let got = rx.pop(&mut out);
            read_back.extend_from_slice(&out[..got]);
        }
        // Drain the remainder
        let mut out = [0i16; 8];
        loop {
            let got = rx.pop(&mut out);
            if got == 0 {
                break;
            }
            read_back.extend_from_slice(&out[..got]);
        }

        assert_eq!(read_back, written);
        // Conservation: everything pushed was either read or dropped
        assert_eq!(
            written.len() as u64 + rx.overruns(),
            next as u64
        );
    }

    #[test]
    fn test_overrun_drops_and_counts() {
        // E5: capacity 1024, push 2048, pop everything
        let (mut tx, mut rx) = channel_ring(1024);
        let input: Vec<i16> = (0..2048).map(|i| (i % 1000) as i16).collect();
        assert_eq!(tx.push(&input), 1024);
        assert_eq!(tx.overruns(), 1024);

        let mut out = vec![0i16; 4096];
        assert_eq!(rx.pop(&mut out), 1024);
        assert_eq!(&out[..1024], &input[..1024]);
        assert_eq!(rx.pop(&mut out), 0);
    }

    #[test]
    fn test_wraparound() {
        let (mut tx, mut rx) = channel_ring(16);
        let mut out = [0i16; 16];
        for base in (0..160).step_by(10) {
            let chunk: Vec<i16> = (base..base + 10).map(|v| v as i16).collect();
            assert_eq!(tx.push(&chunk), 10);
            assert_eq!(rx.pop(&mut out[..10]), 10);
            assert_eq!(&out[..10], &chunk[..]);
        }
        assert_eq!(rx.overruns(), 0);
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        let (mut tx, mut rx) = channel_ring(256);
        const TOTAL: i64 = 100_000;

        let producer = std::thread::spawn(move || {
            let mut sent: i64 = 0;
            let mut value = 0i16;
            while sent < TOTAL {
                let chunk: Vec<i16> = (0..32)
                    .map(|_| {
                        let v = value;
                        value = value.wrapping_add(1);
                        v
                    })
                    .collect();
                // Spin until the whole chunk fits so nothing is dropped and
                // the consumer can verify the exact sequence
                loop {
                    if tx.free() >= chunk.len() {
                        assert_eq!(tx.push(&chunk), chunk.len());
                        break;
                    }
                    std::thread::yield_now();
                }
                sent += chunk.len() as i64;
            }
        });

        let mut expected = 0i16;
        let mut received: i64 = 0;
        let mut buf = [0i16; 64];
        while received < TOTAL {
            let got = rx.pop(&mut buf);
            for &s in &buf[..got] {
                assert_eq!(s, expected);
                expected = expected.wrapping_add(1);
            }
            received += got as i64;
            if got == 0 {
                std::thread::yield_now();
            }
        }
        producer.join().unwrap();
        assert_eq!(rx.overruns(), 0);
    }
}
