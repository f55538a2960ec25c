//! Windowed IMU preintegration over the shared sample buffer
//!
//! Each [`Preintegrator::preintegrate`] call drains the samples of one window
//! from the buffer, integrates them, and leaves the accumulator zeroed for
//! the next window whether or not the call succeeded.

use std::sync::Arc;

use log::{debug, warn};
use nalgebra::Vector3;

use crate::buffer::ImuBuffer;
use crate::config::ImuParams;
use crate::error::Result;
use crate::factors::{PreintegratedImuMeasurements, PreintegrationResult, PreintegrationStatus};
use crate::types::{ImuBias, InertialSample};

/// Window bound meaning "from the oldest buffered sample"
pub const UNBOUNDED_START: f64 = f64::NEG_INFINITY;
/// Window bound meaning "up to the newest buffered sample"
pub const UNBOUNDED_END: f64 = f64::INFINITY;

pub struct Preintegrator {
    params: ImuParams,
    gravity: Vector3<f64>,
    buffer: Arc<ImuBuffer>,
    accumulator: PreintegratedImuMeasurements,
}

impl Preintegrator {
    /// Create a preintegrator with its own buffer sized by `max_queue_size`
    pub fn new(params: ImuParams) -> Result<Self> {
        params.validate()?;
        let buffer = Arc::new(ImuBuffer::new(params.max_queue_size)?);
        Self::with_buffer(params, buffer)
    }

    /// Create a preintegrator reading from a buffer shared with a producer
    pub fn with_buffer(params: ImuParams, buffer: Arc<ImuBuffer>) -> Result<Self> {
        params.validate()?;
        let accumulator = PreintegratedImuMeasurements::new(params.noise_model(), ImuBias::zero());
        Ok(Self {
            gravity: params.gravity(),
            params,
            buffer,
            accumulator,
        })
    }

    pub fn params(&self) -> &ImuParams {
        &self.params
    }

    pub fn bias(&self) -> &ImuBias {
        self.accumulator.bias()
    }

    /// Handle to the sample buffer for producer threads
    pub fn buffer(&self) -> Arc<ImuBuffer> {
        Arc::clone(&self.buffer)
    }

    pub fn push(&self, sample: InertialSample) {
        self.buffer.push(sample);
    }

    /// Drop buffered samples older than `t`
    pub fn discard_before(&self, t: f64) -> usize {
        self.buffer.discard_before(t)
    }

    /// Zero the accumulator and integrate with `bias` from now on
    pub fn reset_and_update_bias(&mut self, bias: ImuBias) {
        debug!(
            "Preintegrator bias updated: accel=[{:.5}, {:.5}, {:.5}] gyro=[{:.6}, {:.6}, {:.6}]",
            bias.accel.x, bias.accel.y, bias.accel.z, bias.gyro.x, bias.gyro.y, bias.gyro.z
        );
        self.accumulator.reset_and_set_bias(bias);
    }

    /// Integrate the buffered samples covering `[from_time, to_time]`.
    ///
    /// [`UNBOUNDED_START`] and [`UNBOUNDED_END`] skip the corresponding
    /// alignment check. NaN bounds, `to_time < from_time` and infinities on
    /// the wrong side are rejected as [`PreintegrationStatus::InvalidWindow`]
    /// without touching the buffer.
    pub fn preintegrate(&mut self, from_time: f64, to_time: f64) -> PreintegrationResult {
        let result = self.integrate_window(from_time, to_time);
        self.accumulator.reset_integration();
        result
    }

    fn invalid(&self, status: PreintegrationStatus) -> PreintegrationResult {
        PreintegrationResult::invalid(status, *self.accumulator.bias(), self.gravity)
    }

    fn integrate_window(&mut self, from_time: f64, to_time: f64) -> PreintegrationResult {
        let tolerance = self.params.allowed_misalignment_sec;

        let bounds_ok = !from_time.is_nan()
            && !to_time.is_nan()
            && from_time != UNBOUNDED_END
            && to_time != UNBOUNDED_START
            && from_time <= to_time;
        if !bounds_ok {
            warn!("Rejecting preintegration window [{}, {}]", from_time, to_time);
            return self.invalid(PreintegrationStatus::InvalidWindow {
                from: from_time,
                to: to_time,
            });
        }
        let bounded_start = from_time != UNBOUNDED_START;
        let bounded_end = to_time != UNBOUNDED_END;

        let anchor = match self.buffer.pop_anchor(from_time) {
            Some(anchor) => anchor,
            None => {
                debug!("Preintegration [{}, {}]: buffer empty", from_time, to_time);
                return self.invalid(PreintegrationStatus::BufferEmpty);
            }
        };

        if bounded_start {
            let offset = anchor.timestamp - from_time;
            if offset.abs() > tolerance {
                debug!(
                    "Preintegration start misaligned: anchor t={:.6}, requested {:.6}",
                    anchor.timestamp, from_time
                );
                return self.invalid(PreintegrationStatus::StartMisaligned { offset });
            }
        }

        let mut last_time = anchor.timestamp;
        if bounded_start {
            if anchor.timestamp > from_time {
                // Unmeasured gap before the first usable sample
                self.accumulator.integrate_measurement(
                    anchor.accel,
                    anchor.gyro,
                    anchor.timestamp - from_time,
                );
            } else {
                last_time = from_time;
            }
        }

        let mut last_sample = anchor;
        let mut skipped = 0;
        for sample in self.buffer.drain_before(to_time) {
            let dt = sample.timestamp - last_time;
            if dt <= 0.0 {
                warn!(
                    "Skipping IMU sample at t={:.6}: non-positive dt {:.3e}",
                    sample.timestamp, dt
                );
                skipped += 1;
                continue;
            }
            self.accumulator
                .integrate_measurement(sample.accel, sample.gyro, dt);
            last_time = sample.timestamp;
            last_sample = sample;
        }
        let latest = last_sample.timestamp;

        if bounded_end {
            let offset = to_time - latest;
            if offset.abs() > tolerance {
                debug!(
                    "Preintegration end misaligned: last sample t={:.6}, requested {:.6}",
                    latest, to_time
                );
                return self.invalid(PreintegrationStatus::EndMisaligned { offset });
            }
            if to_time > last_time {
                // Bridge the last sample to the window end at constant rate
                self.accumulator.integrate_measurement(
                    last_sample.accel,
                    last_sample.gyro,
                    to_time - last_time,
                );
            }
        }

        let result = self
            .accumulator
            .to_result(anchor.timestamp, latest, skipped, self.gravity);
        debug!(
            "Preintegrated [{:.6}, {:.6}]: {} samples, {} skipped, dt={:.4}s",
            anchor.timestamp, latest, result.num_samples, skipped, result.delta_time
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    fn gyro() -> Vector3<f64> {
        Vector3::new(0.0, 0.2, 0.0)
    }

    fn accel() -> Vector3<f64> {
        Vector3::new(0.0, -9.81, 0.0)
    }

    fn make_preintegrator() -> Preintegrator {
        Preintegrator::new(ImuParams::default()).unwrap()
    }

    /// Samples at `first/100 ..= last/100` seconds
    fn push_range(pre: &Preintegrator, first: u32, last: u32) {
        for i in first..=last {
            pre.push(InertialSample::new(i as f64 / 100.0, gyro(), accel()));
        }
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = ImuParams {
            max_queue_size: 0,
            ..Default::default()
        };
        assert!(Preintegrator::new(params).is_err());

        let params = ImuParams {
            gyro_noise_sigma: f64::NAN,
            ..Default::default()
        };
        assert!(Preintegrator::new(params).is_err());
    }

    #[test]
    fn test_empty_buffer() {
        let mut pre = make_preintegrator();
        for (from, to) in [(0.0, 1.0), (UNBOUNDED_START, UNBOUNDED_END)] {
            let result = pre.preintegrate(from, to);
            assert!(!result.valid);
            assert_eq!(result.status, PreintegrationStatus::BufferEmpty);
            assert!(result.time_range.is_none());
        }
    }

    #[test]
    fn test_aligned_window() {
        let mut pre = make_preintegrator();
        push_range(&pre, 0, 100);

        let result = pre.preintegrate(0.0, 0.5);
        assert!(result.valid);
        assert_eq!(result.status, PreintegrationStatus::Ok);
        assert_eq!(result.time_range, Some((0.0, 0.49)));
        assert_relative_eq!(result.delta_time, 0.5, epsilon = 1e-12);
        assert_eq!(result.num_samples, 50); // 49 samples + the bridge to 0.5

        let expected = UnitQuaternion::from_scaled_axis(gyro() * 0.5);
        assert!(result.delta_rotation.angle_to(&expected) < 1e-9);
        assert!(pre.accumulator.is_zero());
        assert_eq!(pre.buffer().peek_front().map(|s| s.timestamp), Some(0.5));
    }

    #[test]
    fn test_repeated_window_is_not_idempotent() {
        let mut pre = make_preintegrator();
        push_range(&pre, 0, 100);

        assert!(pre.preintegrate(0.0, 0.5).valid);
        let second = pre.preintegrate(0.0, 0.5);
        assert!(!second.valid);
        assert!(second.time_range.is_none());
    }

    #[test]
    fn test_consecutive_windows() {
        let mut pre = make_preintegrator();
        push_range(&pre, 0, 100);

        let first = pre.preintegrate(0.0, 0.5);
        let second = pre.preintegrate(0.5, 1.0);
        assert!(first.valid && second.valid);
        assert_eq!(second.time_range, Some((0.5, 0.99)));
        assert_relative_eq!(second.delta_time, 0.5, epsilon = 1e-12);

        let expected = UnitQuaternion::from_scaled_axis(gyro() * 0.5);
        assert!(second.delta_rotation.angle_to(&expected) < 1e-9);
    }

    #[test]
    fn test_unbounded_window() {
        let mut pre = make_preintegrator();
        push_range(&pre, 0, 10);

        let result = pre.preintegrate(UNBOUNDED_START, UNBOUNDED_END);
        assert!(result.valid);
        assert_eq!(result.time_range, Some((0.0, 0.1)));
        assert_relative_eq!(result.delta_time, 0.1, epsilon = 1e-12);
        assert_eq!(result.num_samples, 10);
        assert!(pre.buffer().is_empty());
    }

    #[test]
    fn test_nan_bounds_rejected() {
        let mut pre = make_preintegrator();
        push_range(&pre, 0, 100);

        for (from, to) in [(f64::NAN, f64::NAN), (f64::NAN, 0.5), (0.0, f64::NAN)] {
            let result = pre.preintegrate(from, to);
            assert!(!result.valid);
            assert!(matches!(result.status, PreintegrationStatus::InvalidWindow { .. }));
            assert!(result.time_range.is_none());
            assert_eq!(result.delta_time, 0.0);
        }
        assert_eq!(pre.buffer().len(), 101);
    }

    #[test]
    fn test_reversed_window_rejected() {
        let mut pre = make_preintegrator();
        push_range(&pre, 0, 100);

        let result = pre.preintegrate(0.5, 0.49);
        assert!(!result.valid);
        assert_eq!(result.status, PreintegrationStatus::InvalidWindow { from: 0.5, to: 0.49 });
        assert!(result.time_range.is_none());

        // Infinities on the wrong side are not sentinels
        let result = pre.preintegrate(UNBOUNDED_END, UNBOUNDED_END);
        assert!(!result.valid);
        let result = pre.preintegrate(UNBOUNDED_START, UNBOUNDED_START);
        assert!(!result.valid);

        // Nothing was consumed: the well-formed window still integrates
        assert_eq!(pre.buffer().len(), 101);
        let result = pre.preintegrate(0.0, 0.5);
        assert!(result.valid);
        assert_relative_eq!(result.delta_time, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_start_misaligned() {
        let mut pre = make_preintegrator();
        push_range(&pre, 100, 120);

        let result = pre.preintegrate(0.5, 1.2);
        assert!(!result.valid);
        match result.status {
            PreintegrationStatus::StartMisaligned { offset } => {
                assert_relative_eq!(offset, 0.5, epsilon = 1e-12)
            }
            other => panic!("unexpected status {:?}", other),
        }
        assert!(result.time_range.is_none());
        // Only the anchor was consumed
        assert_eq!(pre.buffer().len(), 20);
        assert!(pre.accumulator.is_zero());
    }

    #[test]
    fn test_end_misaligned_resets_accumulator() {
        let mut pre = make_preintegrator();
        push_range(&pre, 0, 20);

        let result = pre.preintegrate(0.0, 1.0);
        assert!(!result.valid);
        assert!(matches!(
            result.status,
            PreintegrationStatus::EndMisaligned { .. }
        ));
        assert!(pre.accumulator.is_zero());

        // The next window starts clean
        push_range(&pre, 30, 40);
        let result = pre.preintegrate(0.3, 0.4);
        assert!(result.valid);
        assert_relative_eq!(result.delta_time, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_gap_before_first_sample() {
        let mut pre = make_preintegrator();
        push_range(&pre, 3, 20);

        let result = pre.preintegrate(0.0, 0.2);
        assert!(result.valid);
        assert_eq!(result.time_range, Some((0.03, 0.19)));
        // 0.03 s gap + 16 samples + 0.01 s bridge
        assert_relative_eq!(result.delta_time, 0.2, epsilon = 1e-12);
        assert_eq!(result.num_samples, 18);
    }

    #[test]
    fn test_anchor_before_start() {
        let mut pre = make_preintegrator();
        push_range(&pre, 0, 20);

        // Anchor 0.10 precedes the start; integration begins at 0.105
        let result = pre.preintegrate(0.105, 0.2);
        assert!(result.valid);
        assert_eq!(result.earliest(), Some(0.1));
        assert_relative_eq!(result.delta_time, 0.095, epsilon = 1e-12);
    }

    #[test]
    fn test_non_positive_dt_skipped() {
        let mut pre = make_preintegrator();
        for t in [0.0, 0.01, 0.01, 0.02, 0.015, 0.03] {
            pre.push(InertialSample::new(t, gyro(), accel()));
        }

        let result = pre.preintegrate(UNBOUNDED_START, UNBOUNDED_END);
        assert!(result.valid);
        assert_eq!(result.skipped_samples, 2);
        assert_eq!(result.num_samples, 3);
        assert_relative_eq!(result.delta_time, 0.03, epsilon = 1e-12);
    }

    #[test]
    fn test_reset_and_update_bias() {
        let mut pre = make_preintegrator();
        let bias = ImuBias::new(Vector3::zeros(), gyro());
        pre.reset_and_update_bias(bias);
        assert_eq!(*pre.bias(), bias);
        assert!(pre.accumulator.is_zero());

        push_range(&pre, 0, 50);
        let result = pre.preintegrate(0.0, 0.5);
        assert!(result.valid);
        assert_eq!(result.bias, bias);
        assert!(result.delta_rotation.angle() < 1e-12);

        // Bias survives the per-call reset
        assert_eq!(*pre.bias(), bias);
    }

    #[test]
    fn test_discard_before() {
        let pre = make_preintegrator();
        push_range(&pre, 0, 20);

        assert_eq!(pre.discard_before(0.1), 10);
        let front = pre.buffer().peek_front().map(|s| s.timestamp);
        assert!(front.map_or(false, |t| t >= 0.1));
    }

    #[test]
    fn test_shared_buffer_producer_thread() {
        let buffer = Arc::new(ImuBuffer::new(1000).unwrap());
        let mut pre =
            Preintegrator::with_buffer(ImuParams::default(), Arc::clone(&buffer)).unwrap();

        crossbeam::scope(|scope| {
            let producer = pre.buffer();
            scope.spawn(move |_| {
                for i in 0..=100 {
                    producer.push(InertialSample::new(i as f64 / 100.0, gyro(), accel()));
                }
            });
        })
        .unwrap();

        assert_eq!(buffer.len(), 101);
        let result = pre.preintegrate(0.0, 1.0);
        assert!(result.valid);
        assert_relative_eq!(result.delta_time, 1.0, epsilon = 1e-12);
    }
}
