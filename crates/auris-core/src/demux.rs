//! Capture block de-interleaver
//!
//! Splits one interleaved capture block
//! `[ch0_s0, ch1_s0, …, chN-1_s0, ch0_s1, …]` into the per-channel sample
//! rings. Runs inside the capture callback: no allocation, no locks.
//!
//! Cross-channel alignment is the invariant that makes the downstream
//! delay estimation meaningful, so a slice is accepted or dropped as a
//! whole: if any ring lacks space for its sample, no ring receives one
//! and every channel counts one overrun. Sample `k` of channel `i` and
//! sample `k` of channel `j` therefore always come from the same capture
//! instant.

use crate::ring::RingProducer;

/// De-interleaves capture blocks into per-channel rings
pub struct FrameDemuxer {
    producers: Vec<RingProducer>,
    /// Whole N-sample slices dropped because some ring was full
    slices_dropped: u64,
}

impl FrameDemuxer {
    /// Takes ownership of the producer half of every channel ring.
    pub fn new(producers: Vec<RingProducer>) -> Self {
        assert!(!producers.is_empty(), "demuxer needs at least one channel");
        Self {
            producers,
            slices_dropped: 0,
        }
    }

    /// Number of channels this demuxer feeds
    pub fn channels(&self) -> usize {
        self.producers.len()
    }

    /// Push one interleaved block into the channel rings.
    ///
    /// Returns the number of whole slices accepted. A trailing partial
    /// slice (block length not a multiple of the channel count) is
    /// dropped and counted like a full-ring drop.
    pub fn demux(&mut self, interleaved: &[i16]) -> usize {
        let n = self.producers.len();
        let mut accepted = 0;

        for slice in interleaved.chunks(n) {
            if slice.len() < n || !self.slice_fits() {
                self.drop_slice();
                continue;
            }
            for (producer, &sample) in self.producers.iter_mut().zip(slice) {
                producer.push(std::slice::from_ref(&sample));
            }
            accepted += 1;
        }
        accepted
    }

    /// True when every ring can take one more sample
    fn slice_fits(&self) -> bool {
        self.producers.iter().all(|p| p.free() >= 1)
    }

    fn drop_slice(&mut self) {
        for producer in &self.producers {
            producer.record_overrun(1);
        }
        self.slices_dropped += 1;
    }

    /// Whole slices dropped so far
    pub fn slices_dropped(&self) -> u64 {
        self.slices_dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::{channel_ring, RingConsumer};

    fn make_channels(n: usize, capacity: usize) -> (FrameDemuxer, Vec<RingConsumer>) {
        let mut producers = Vec::new();
        let mut consumers = Vec::new();
        for _ in 0..n {
            let (tx, rx) = channel_ring(capacity);
            producers.push(tx);
            consumers.push(rx);
        }
        (FrameDemuxer::new(producers), consumers)
    }

    #[test]
    fn test_deinterleave_layout() {
        let (mut demux, mut consumers) = make_channels(3, 16);
        // Two slices of [ch0, ch1, ch2]
        let block = [10, 20, 30, 11, 21, 31];
        assert_eq!(demux.demux(&block), 2);

        let mut out = [0i16; 4];
        assert_eq!(consumers[0].pop(&mut out), 2);
        assert_eq!(&out[..2], &[10, 11]);
        assert_eq!(consumers[1].pop(&mut out), 2);
        assert_eq!(&out[..2], &[20, 21]);
        assert_eq!(consumers[2].pop(&mut out), 2);
        assert_eq!(&out[..2], &[30, 31]);
    }

    #[test]
    fn test_all_or_nothing_keeps_channels_aligned() {
        // Capacity 4 per ring, feed 6 slices: last two drop on every channel
        let (mut demux, mut consumers) = make_channels(2, 4);
        let block: Vec<i16> = (0..12).collect();
        assert_eq!(demux.demux(&block), 4);
        assert_eq!(demux.slices_dropped(), 2);

        let mut a = [0i16; 8];
        let mut b = [0i16; 8];
        let got_a = consumers[0].pop(&mut a);
        let got_b = consumers[1].pop(&mut b);
        // Equal accepted counts on every channel
        assert_eq!(got_a, got_b);
        assert_eq!(got_a, 4);
        // And the accepted samples stay pairwise aligned
        for i in 0..4 {
            assert_eq!(a[i] + 1, b[i]);
        }
        assert_eq!(consumers[0].overruns(), 2);
        assert_eq!(consumers[1].overruns(), 2);
    }

    #[test]
    fn test_alignment_across_many_callbacks() {
        let (mut demux, mut consumers) = make_channels(4, 64);
        let mut drained = vec![0usize; 4];
        let mut buf = [0i16; 64];

        // Varying block sizes, some overflowing, with interleaved drains
        for round in 0..40 {
            let slices = 5 + (round % 13);
            let block: Vec<i16> = (0..slices * 4).map(|v| v as i16).collect();
            demux.demux(&block);

            if round % 3 == 0 {
                for (ch, consumer) in consumers.iter_mut().enumerate() {
                    drained[ch] += consumer.pop(&mut buf);
                }
            }
        }
        for (ch, consumer) in consumers.iter_mut().enumerate() {
            drained[ch] += consumer.pop(&mut buf);
            while consumer.level() > 0 {
                drained[ch] += consumer.pop(&mut buf);
            }
        }

        // Every channel accepted exactly the same number of samples
        assert!(drained.iter().all(|&d| d == drained[0]));
        let overruns: Vec<u64> = consumers.iter().map(|c| c.overruns()).collect();
        assert!(overruns.iter().all(|&o| o == overruns[0]));
    }

    #[test]
    fn test_partial_trailing_slice_dropped() {
        let (mut demux, mut consumers) = make_channels(3, 16);
        // 7 samples = 2 whole slices + 1 trailing sample
        let block = [1, 2, 3, 4, 5, 6, 7];
        assert_eq!(demux.demux(&block), 2);
        assert_eq!(demux.slices_dropped(), 1);
        assert_eq!(consumers[0].level(), 2);
        assert_eq!(consumers[1].level(), 2);
        assert_eq!(consumers[2].level(), 2);
    }
}
