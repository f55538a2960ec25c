//! Synthetic measurements for tests and the demo binary
//!
//! Generates stereo correspondences from known camera poses and constant
//! motion IMU streams, with seeded Gaussian noise.

use nalgebra::{Isometry3, Point3, Vector2, Vector3};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use crate::camera::PinholeCamera;
use crate::error::{Result, VioError};
use crate::types::{Correspondence, InertialSample};

/// Transform taking camera-0 points into camera 1, given both camera poses
/// in the world (`T_x_w` maps camera-x points into the world).
pub fn relative_pose(t_0_w: &Isometry3<f64>, t_1_w: &Isometry3<f64>) -> Isometry3<f64> {
    t_1_w.inverse() * t_0_w
}

fn normal(std_dev: f64) -> Result<Normal<f64>> {
    Normal::new(0.0, std_dev)
        .map_err(|e| VioError::InvalidInput(format!("invalid noise sigma {}: {}", std_dev, e)))
}

/// Observe world points from two cameras.
///
/// Each correspondence holds the point in camera 0 and its projection in
/// camera 1 perturbed by `noise_sigma` pixels of Gaussian noise; `sigma` is
/// the measurement sigma stored for weighting.
pub fn simulate_correspondences<R: Rng + ?Sized>(
    t_0_w: &Isometry3<f64>,
    t_1_w: &Isometry3<f64>,
    points_w: &[Vector3<f64>],
    camera: &PinholeCamera,
    sigma: f64,
    noise_sigma: f64,
    rng: &mut R,
) -> Result<Vec<Correspondence>> {
    if !(sigma > 0.0) {
        return Err(VioError::InvalidInput(format!(
            "measurement sigma must be positive (got {})",
            sigma
        )));
    }
    let noise = normal(noise_sigma)?;
    let world_to_0 = t_0_w.inverse();
    let world_to_1 = t_1_w.inverse();

    points_w
        .iter()
        .enumerate()
        .map(|(index, p_w)| {
            let p_w = Point3::from(*p_w);
            let p_0 = world_to_0.transform_point(&p_w).coords;
            let p_1 = world_to_1.transform_point(&p_w).coords;
            if p_1.z <= 0.0 {
                return Err(VioError::PointBehindCamera { index });
            }

            let mut observed = camera.project(&p_1);
            if noise_sigma > 0.0 {
                observed += Vector2::new(noise.sample(&mut *rng), noise.sample(&mut *rng));
            }
            Ok(Correspondence::new(p_0, observed, sigma))
        })
        .collect()
}

/// IMU held at constant body rate and specific force, sampled at a fixed rate
#[derive(Debug, Clone)]
pub struct ConstantMotionImu {
    gyro: Vector3<f64>,
    accel: Vector3<f64>,
    start_time: f64,
    rate_hz: f64,
    gyro_noise: Normal<f64>,
    accel_noise: Normal<f64>,
    rng: ChaCha8Rng,
    index: u64,
}

impl ConstantMotionImu {
    /// Noise-free stream starting at `start_time`
    pub fn new(
        gyro: Vector3<f64>,
        accel: Vector3<f64>,
        start_time: f64,
        rate_hz: f64,
    ) -> Result<Self> {
        if !(rate_hz > 0.0) || !rate_hz.is_finite() {
            return Err(VioError::InvalidInput(format!(
                "IMU rate must be positive (got {})",
                rate_hz
            )));
        }
        Ok(Self {
            gyro,
            accel,
            start_time,
            rate_hz,
            gyro_noise: normal(0.0)?,
            accel_noise: normal(0.0)?,
            rng: ChaCha8Rng::seed_from_u64(0),
            index: 0,
        })
    }

    /// Add white noise with the given per-sample sigmas
    pub fn with_noise(mut self, gyro_sigma: f64, accel_sigma: f64, seed: u64) -> Result<Self> {
        self.gyro_noise = normal(gyro_sigma)?;
        self.accel_noise = normal(accel_sigma)?;
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        Ok(self)
    }

    pub fn period(&self) -> f64 {
        1.0 / self.rate_hz
    }

    fn sample_vector(noise: &Normal<f64>, rng: &mut ChaCha8Rng) -> Vector3<f64> {
        Vector3::new(noise.sample(rng), noise.sample(rng), noise.sample(rng))
    }

    pub fn next_sample(&mut self) -> InertialSample {
        let timestamp = self.start_time + self.index as f64 / self.rate_hz;
        self.index += 1;

        let gyro = self.gyro + Self::sample_vector(&self.gyro_noise, &mut self.rng);
        let accel = self.accel + Self::sample_vector(&self.accel_noise, &mut self.rng);
        InertialSample::new(timestamp, gyro, accel)
    }
}

impl Iterator for ConstantMotionImu {
    type Item = InertialSample;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_sample())
    }
}
