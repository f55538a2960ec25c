pub mod linalg;

pub use linalg::*;

use nalgebra::{Isometry3, Matrix6, UnitQuaternion, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VioError};

/// A single inertial sample (gyroscope + accelerometer)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct InertialSample {
    /// Timestamp in seconds
    pub timestamp: f64,
    /// Angular velocity in body frame [rad/s]
    pub gyro: Vector3<f64>,
    /// Specific force in body frame [m/s²]; a stationary IMU measures -gravity
    pub accel: Vector3<f64>,
}

impl InertialSample {
    pub fn new(timestamp: f64, gyro: Vector3<f64>, accel: Vector3<f64>) -> Self {
        Self {
            timestamp,
            gyro,
            accel,
        }
    }

    /// Build a sample from a fixed-point nanosecond timestamp
    pub fn from_nanos(timestamp_ns: u64, gyro: Vector3<f64>, accel: Vector3<f64>) -> Self {
        Self::new(nanos_to_seconds(timestamp_ns), gyro, accel)
    }
}

/// Convert fixed-point nanosecond ticks to seconds
pub fn nanos_to_seconds(timestamp_ns: u64) -> f64 {
    timestamp_ns as f64 * 1e-9
}

/// Accelerometer and gyroscope bias estimate
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImuBias {
    /// Accelerometer bias [m/s²]
    pub accel: Vector3<f64>,
    /// Gyroscope bias [rad/s]
    pub gyro: Vector3<f64>,
}

impl ImuBias {
    pub fn new(accel: Vector3<f64>, gyro: Vector3<f64>) -> Self {
        Self { accel, gyro }
    }

    pub fn zero() -> Self {
        Self::new(Vector3::zeros(), Vector3::zeros())
    }
}

impl Default for ImuBias {
    fn default() -> Self {
        Self::zero()
    }
}

/// Navigation state of the body in the world frame
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NavState {
    pub rotation: UnitQuaternion<f64>,
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
}

impl NavState {
    pub fn new(
        rotation: UnitQuaternion<f64>,
        position: Vector3<f64>,
        velocity: Vector3<f64>,
    ) -> Self {
        Self {
            rotation,
            position,
            velocity,
        }
    }

    pub fn identity() -> Self {
        Self::new(UnitQuaternion::identity(), Vector3::zeros(), Vector3::zeros())
    }
}

/// A 3D point in the reference camera paired with its pixel observation in
/// the target camera.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    /// Point expressed in the reference camera frame [m]
    pub point: Vector3<f64>,
    /// Observed pixel location in the target camera [px]
    pub observed: Vector2<f64>,
    /// Per-axis pixel noise standard deviation [px]
    pub sigma: Vector2<f64>,
}

impl Correspondence {
    /// Correspondence with an isotropic pixel sigma
    pub fn new(point: Vector3<f64>, observed: Vector2<f64>, sigma: f64) -> Self {
        Self::with_axis_sigma(point, observed, Vector2::new(sigma, sigma))
    }

    pub fn with_axis_sigma(
        point: Vector3<f64>,
        observed: Vector2<f64>,
        sigma: Vector2<f64>,
    ) -> Self {
        Self {
            point,
            observed,
            sigma,
        }
    }

    fn validate(&self, index: usize) -> Result<()> {
        let finite = self.point.iter().all(|v| v.is_finite())
            && self.observed.iter().all(|v| v.is_finite());
        if !finite {
            return Err(VioError::InvalidInput(format!(
                "correspondence {} has non-finite coordinates",
                index
            )));
        }
        if !(self.sigma.x > 0.0 && self.sigma.y > 0.0) {
            return Err(VioError::InvalidInput(format!(
                "correspondence {} has non-positive sigma",
                index
            )));
        }
        Ok(())
    }
}

/// Zip parallel point/observation/sigma lists into correspondences.
///
/// All three lists must have the same length; every entry must be finite and
/// every sigma positive.
pub fn correspondences_from_slices(
    points: &[Vector3<f64>],
    observations: &[Vector2<f64>],
    sigmas: &[f64],
) -> Result<Vec<Correspondence>> {
    if points.len() != observations.len() || points.len() != sigmas.len() {
        return Err(VioError::InvalidInput(format!(
            "length mismatch: {} points, {} observations, {} sigmas",
            points.len(),
            observations.len(),
            sigmas.len()
        )));
    }

    points
        .iter()
        .zip(observations)
        .zip(sigmas)
        .enumerate()
        .map(|(index, ((point, observed), sigma))| {
            let c = Correspondence::new(*point, *observed, *sigma);
            c.validate(index).map(|_| c)
        })
        .collect()
}

/// Validate a correspondence list before optimization
pub(crate) fn validate_correspondences(correspondences: &[Correspondence]) -> Result<()> {
    correspondences
        .iter()
        .enumerate()
        .try_for_each(|(index, c)| c.validate(index))
}

/// Refined relative pose with its uncertainty and solver diagnostics
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoseEstimate {
    /// Transform taking reference-camera points into the target camera
    pub pose: Isometry3<f64>,
    /// Covariance over the tangent `[δt, δω]` (left perturbation)
    pub covariance: Matrix6<f64>,
    /// Iterations performed
    pub iterations: usize,
    /// Final total weighted squared error
    pub error: f64,
    /// Error at the initial guess
    pub initial_error: f64,
    /// Whether an error threshold was met before exhausting iterations
    pub converged: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_nanos() {
        let sample = InertialSample::from_nanos(1_500_000_000, Vector3::zeros(), Vector3::zeros());
        assert!((sample.timestamp - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_correspondences_length_mismatch() {
        let points = vec![Vector3::new(0.0, 0.0, 2.0); 3];
        let observations = vec![Vector2::new(10.0, 10.0); 2];
        let sigmas = vec![1.0; 3];

        let result = correspondences_from_slices(&points, &observations, &sigmas);
        assert!(matches!(result, Err(VioError::InvalidInput(_))));
    }

    #[test]
    fn test_correspondences_reject_bad_sigma() {
        let points = vec![Vector3::new(0.0, 0.0, 2.0)];
        let observations = vec![Vector2::new(10.0, 10.0)];

        assert!(correspondences_from_slices(&points, &observations, &[0.0]).is_err());
        assert!(correspondences_from_slices(&points, &observations, &[-1.0]).is_err());
    }

    #[test]
    fn test_correspondences_from_slices() {
        let points = vec![Vector3::new(0.0, 0.0, 2.0), Vector3::new(1.0, 0.0, 3.0)];
        let observations = vec![Vector2::new(10.0, 10.0), Vector2::new(20.0, 5.0)];
        let sigmas = vec![1.0, 2.0];

        let list = correspondences_from_slices(&points, &observations, &sigmas).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].sigma, Vector2::new(2.0, 2.0));
        assert_eq!(list[1].point, Vector3::new(1.0, 0.0, 3.0));
    }
}
