//! Fixed-capacity history of timestamped samples.
//!
//! Devices change state asynchronously to frame delivery (a lens is still
//! moving, a flash has already fired), so when a frame is tagged we need
//! to know what the device was doing at the frame's exposure time. The
//! ring keeps the most recent samples and reconstructs intermediate values
//! by linear interpolation.

use crate::clock::Timestamp;
use std::collections::VecDeque;

/// Values that can be linearly interpolated between two samples.
pub trait Interpolate: Clone {
    /// Returns `self` at `alpha = 0.0` and `other` at `alpha = 1.0`.
    fn lerp(&self, other: &Self, alpha: f64) -> Self;
}

impl Interpolate for f32 {
    fn lerp(&self, other: &Self, alpha: f64) -> Self {
        (*self as f64 + (*other as f64 - *self as f64) * alpha) as f32
    }
}

impl Interpolate for f64 {
    fn lerp(&self, other: &Self, alpha: f64) -> Self {
        self + (other - self) * alpha
    }
}

/// Ring of `(time, value)` samples ordered oldest to newest.
#[derive(Debug, Clone)]
pub struct TimestampedRingBuffer<T> {
    samples: VecDeque<(Timestamp, T)>,
    capacity: usize,
}

impl<T: Interpolate> TimestampedRingBuffer<T> {
    /// Creates an empty buffer holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a sample at the newest end, evicting the oldest when full.
    ///
    /// Times are expected to be non-decreasing. A sample older than the
    /// current newest is clamped to the newest time so the ring stays
    /// sorted.
    pub fn push(&mut self, time: Timestamp, value: T) {
        let time = match self.samples.back() {
            Some((newest, _)) if time < *newest => {
                tracing::trace!(%time, newest = %newest, "Out-of-order history sample clamped");
                *newest
            }
            _ => time,
        };
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((time, value));
    }

    /// Reconstructs the value at time `t`.
    ///
    /// Returns `None` only when the buffer is empty.
    pub fn value_at(&self, t: Timestamp) -> Option<T> {
        let (oldest_t, oldest_v) = self.samples.front()?;
        let (newest_t, newest_v) = self.samples.back()?;

        if t >= *newest_t {
            return Some(newest_v.clone());
        }
        if t <= *oldest_t {
            return Some(oldest_v.clone());
        }

        // First sample strictly after t; its predecessor is at or before t.
        let idx = self.samples.partition_point(|(time, _)| *time <= t);
        let (t1, v1) = &self.samples[idx];
        let (t0, v0) = &self.samples[idx - 1];

        let span = *t1 - *t0;
        if span == 0 {
            return Some(v1.clone());
        }
        let alpha = (t - *t0) as f64 / span as f64;
        Some(v0.lerp(v1, alpha))
    }

    /// Iterates over samples with `start <= time <= end`, oldest first.
    pub fn samples_between(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> impl Iterator<Item = &(Timestamp, T)> + '_ {
        self.samples
            .iter()
            .filter(move |(time, _)| *time >= start && *time <= end)
    }

    /// Most recent sample.
    pub fn newest(&self) -> Option<&(Timestamp, T)> {
        self.samples.back()
    }

    /// Oldest retained sample.
    pub fn oldest(&self) -> Option<&(Timestamp, T)> {
        self.samples.front()
    }

    /// Samples currently held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no sample is held.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Most samples the buffer keeps.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ts(us: i64) -> Timestamp {
        Timestamp::from_micros(us)
    }

    #[test]
    fn test_empty_buffer_has_no_value() {
        let ring: TimestampedRingBuffer<f32> = TimestampedRingBuffer::new(4);
        assert!(ring.value_at(ts(0)).is_none());
    }

    #[test]
    fn test_midpoint_and_clamping() {
        let mut ring = TimestampedRingBuffer::new(8);
        ring.push(ts(1_000), 2.0f64);
        ring.push(ts(3_000), 6.0f64);

        assert!((ring.value_at(ts(2_000)).unwrap() - 4.0).abs() < 1e-9);
        assert_eq!(ring.value_at(ts(0)), Some(2.0));
        assert_eq!(ring.value_at(ts(10_000)), Some(6.0));
    }

    #[test]
    fn test_oldest_evicted_on_overflow() {
        let mut ring = TimestampedRingBuffer::new(3);
        for i in 0..5 {
            ring.push(ts(i * 10), i as f32);
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.oldest().map(|(t, _)| *t), Some(ts(20)));
        // Older than anything retained clamps to the oldest kept value.
        assert_eq!(ring.value_at(ts(0)), Some(2.0));
    }

    #[test]
    fn test_repeated_timestamps_form_a_step() {
        let mut ring = TimestampedRingBuffer::new(8);
        ring.push(ts(100), 0.0f32);
        ring.push(ts(100), 5.0f32);
        ring.push(ts(200), 5.0f32);
        ring.push(ts(200), 0.0f32);

        assert_eq!(ring.value_at(ts(150)), Some(5.0));
        assert_eq!(ring.value_at(ts(250)), Some(0.0));
        assert_eq!(ring.samples_between(ts(100), ts(200)).count(), 4);
    }

    #[test]
    fn test_out_of_order_push_is_clamped() {
        let mut ring = TimestampedRingBuffer::new(4);
        ring.push(ts(500), 1.0f32);
        ring.push(ts(400), 3.0f32);
        assert_eq!(ring.newest().map(|(t, _)| *t), Some(ts(500)));
        assert_eq!(ring.value_at(ts(600)), Some(3.0));
    }

    proptest! {
        #[test]
        fn prop_midpoint_is_mean(
            t0 in 0i64..1_000_000,
            gap in 2i64..1_000_000,
            v0 in -1000.0f64..1000.0,
            v1 in -1000.0f64..1000.0,
        ) {
            let mut ring = TimestampedRingBuffer::new(2);
            ring.push(ts(t0), v0);
            ring.push(ts(t0 + gap), v1);

            let mid = ring.value_at(ts(t0 + gap / 2)).unwrap();
            let expected = v0 + (v1 - v0) * ((gap / 2) as f64 / gap as f64);
            prop_assert!((mid - expected).abs() < 1e-6);
            prop_assert_eq!(ring.value_at(ts(t0 - 1)), Some(v0));
            prop_assert_eq!(ring.value_at(ts(t0 + gap + 1)), Some(v1));
        }
    }
}
