//! Bounded inertial sample queue shared between the sensor thread and the
//! estimator.
//!
//! When the queue is full a push evicts the oldest sample, so memory stays
//! bounded under a sensor flood and producers never block.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use log::warn;

use crate::error::{Result, VioError};
use crate::types::InertialSample;

struct Inner {
    samples: VecDeque<InertialSample>,
    dropped: u64,
}

pub struct ImuBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl ImuBuffer {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(VioError::InvalidConfig(
                "IMU buffer capacity must be positive".to_string(),
            ));
        }
        Ok(Self {
            inner: Mutex::new(Inner {
                samples: VecDeque::with_capacity(capacity),
                dropped: 0,
            }),
            capacity,
        })
    }

    // The queue only holds Copy samples, so a poisoned lock still guards
    // consistent data.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a sample, evicting the oldest one if the queue is full
    pub fn push(&self, sample: InertialSample) {
        let mut inner = self.lock();
        if inner.samples.len() >= self.capacity {
            if let Some(evicted) = inner.samples.pop_front() {
                inner.dropped += 1;
                warn!(
                    "IMU buffer full ({}), dropped sample at t={:.6} ({} dropped total)",
                    self.capacity, evicted.timestamp, inner.dropped
                );
            }
        }
        inner.samples.push_back(sample);
    }

    /// Oldest retained sample, if any
    pub fn peek_front(&self) -> Option<InertialSample> {
        self.lock().samples.front().copied()
    }

    pub fn pop(&self) -> Option<InertialSample> {
        self.lock().samples.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().samples.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of samples evicted by pushes into a full queue
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    /// Pop every sample older than `t`. Returns how many were removed.
    pub fn discard_before(&self, t: f64) -> usize {
        let mut inner = self.lock();
        let mut removed = 0;
        while inner.samples.front().map_or(false, |s| s.timestamp < t) {
            inner.samples.pop_front();
            removed += 1;
        }
        removed
    }

    /// Pop samples until the front is later than `t`, returning the last one
    /// popped. The returned sample is the latest one at or before `t`, or the
    /// oldest sample when everything is later than `t`.
    pub fn pop_anchor(&self, t: f64) -> Option<InertialSample> {
        let mut inner = self.lock();
        let mut anchor = inner.samples.pop_front()?;
        while inner.samples.front().map_or(false, |s| s.timestamp <= t) {
            if let Some(next) = inner.samples.pop_front() {
                anchor = next;
            }
        }
        Some(anchor)
    }

    /// Pop and return every sample strictly earlier than `t`, oldest first
    pub fn drain_before(&self, t: f64) -> Vec<InertialSample> {
        let mut inner = self.lock();
        let count = inner
            .samples
            .iter()
            .take_while(|s| s.timestamp < t)
            .count();
        inner.samples.drain(..count).collect()
    }
}
