//! Tunable parameters for the estimation kernel
//!
//! Every struct deserializes from JSON with per-field defaults, so a config
//! file only needs to name the values it overrides.

use std::path::Path;

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::camera::{PinholeCamera, StereoCamera};
use crate::error::{Result, VioError};

/// Inertial sensor noise densities and windowing limits
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImuParams {
    pub accel_noise_sigma: f64,      // m/s² per sample
    pub gyro_noise_sigma: f64,       // rad/s per sample
    pub accel_bias_rw_sigma: f64,    // m/s² random walk
    pub gyro_bias_rw_sigma: f64,     // rad/s random walk
    pub integration_error_sigma: f64,
    /// Gravity in the navigation frame (y points down)
    pub gravity: [f64; 3],
    pub max_queue_size: usize,
    /// Allowed gap between a requested window bound and the nearest sample [s]
    pub allowed_misalignment_sec: f64,
}

impl Default for ImuParams {
    fn default() -> Self {
        Self {
            accel_noise_sigma: 0.0003924,
            gyro_noise_sigma: 0.000205689024915,
            accel_bias_rw_sigma: 0.004905,
            gyro_bias_rw_sigma: 0.000001454441043,
            integration_error_sigma: 1e-4,
            gravity: [0.0, 9.81, 0.0],
            max_queue_size: 1000,
            allowed_misalignment_sec: 0.05,
        }
    }
}

/// Continuous-time noise covariances used by the preintegration accumulator
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoiseModel {
    pub accel_cov: Matrix3<f64>,
    pub gyro_cov: Matrix3<f64>,
    pub integration_cov: Matrix3<f64>,
    pub accel_bias_cov: Matrix3<f64>,
    pub gyro_bias_cov: Matrix3<f64>,
}

fn isotropic(sigma: f64) -> Matrix3<f64> {
    Matrix3::identity() * (sigma * sigma)
}

fn check_sigma(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(VioError::InvalidConfig(format!(
            "{} must be finite and non-negative (got {})",
            name, value
        )));
    }
    Ok(())
}

impl ImuParams {
    pub fn validate(&self) -> Result<()> {
        check_sigma("accel_noise_sigma", self.accel_noise_sigma)?;
        check_sigma("gyro_noise_sigma", self.gyro_noise_sigma)?;
        check_sigma("accel_bias_rw_sigma", self.accel_bias_rw_sigma)?;
        check_sigma("gyro_bias_rw_sigma", self.gyro_bias_rw_sigma)?;
        check_sigma("integration_error_sigma", self.integration_error_sigma)?;

        if self.gravity.iter().any(|g| !g.is_finite()) {
            return Err(VioError::InvalidConfig("gravity must be finite".to_string()));
        }
        if self.max_queue_size == 0 {
            return Err(VioError::InvalidConfig(
                "max_queue_size must be positive".to_string(),
            ));
        }
        if !self.allowed_misalignment_sec.is_finite() || self.allowed_misalignment_sec < 0.0 {
            return Err(VioError::InvalidConfig(format!(
                "allowed_misalignment_sec must be finite and non-negative (got {})",
                self.allowed_misalignment_sec
            )));
        }
        Ok(())
    }

    pub fn gravity(&self) -> Vector3<f64> {
        Vector3::from(self.gravity)
    }

    pub fn noise_model(&self) -> NoiseModel {
        NoiseModel {
            accel_cov: isotropic(self.accel_noise_sigma),
            gyro_cov: isotropic(self.gyro_noise_sigma),
            integration_cov: isotropic(self.integration_error_sigma),
            accel_bias_cov: isotropic(self.accel_bias_rw_sigma),
            gyro_bias_cov: isotropic(self.gyro_bias_rw_sigma),
        }
    }
}

/// Stopping rules and damping schedule shared by the pose solvers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerParams {
    pub max_iters: usize,
    /// Stop once the total weighted squared error drops below this
    pub min_error: f64,
    /// Stop once consecutive errors differ by less than this
    pub min_error_delta: f64,
    pub initial_lambda: f64,
    pub lambda_factor: f64,
    pub min_lambda: f64,
    pub max_lambda: f64,
    /// Smallest depth [m] a transformed point may have
    pub min_depth: f64,
}

impl Default for OptimizerParams {
    fn default() -> Self {
        Self {
            max_iters: 20,
            min_error: 1e-7,
            min_error_delta: 1e-9,
            initial_lambda: 1e-3,
            lambda_factor: 10.0,
            min_lambda: 1e-9,
            max_lambda: 1e9,
            min_depth: 1e-3,
        }
    }
}

impl OptimizerParams {
    pub fn validate(&self) -> Result<()> {
        if self.max_iters == 0 {
            return Err(VioError::InvalidConfig("max_iters must be positive".to_string()));
        }
        check_sigma("min_error", self.min_error)?;
        check_sigma("min_error_delta", self.min_error_delta)?;
        check_sigma("min_depth", self.min_depth)?;

        if !(self.lambda_factor > 1.0) || !self.lambda_factor.is_finite() {
            return Err(VioError::InvalidConfig(format!(
                "lambda_factor must be greater than 1 (got {})",
                self.lambda_factor
            )));
        }
        let ordered = self.min_lambda > 0.0
            && self.min_lambda <= self.initial_lambda
            && self.initial_lambda <= self.max_lambda
            && self.max_lambda.is_finite();
        if !ordered {
            return Err(VioError::InvalidConfig(format!(
                "damping bounds must satisfy 0 < min_lambda <= initial_lambda <= max_lambda \
                 (got {}, {}, {})",
                self.min_lambda, self.initial_lambda, self.max_lambda
            )));
        }
        Ok(())
    }
}

/// Rectified stereo rig intrinsics (both cameras share them)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: u32,
    pub height: u32,
    pub baseline: f64, // m
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fx: 415.876509,
            fy: 415.876509,
            cx: 376.0,
            cy: 240.0,
            width: 752,
            height: 480,
            baseline: 0.2,
        }
    }
}

impl CameraConfig {
    pub fn build(&self) -> Result<StereoCamera> {
        let camera = PinholeCamera::new(
            self.fx,
            self.fy,
            self.cx,
            self.cy,
            self.height,
            self.width,
        )?;
        StereoCamera::new(camera, camera, self.baseline)
    }
}

/// Top-level configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VioConfig {
    pub imu: ImuParams,
    pub optimizer: OptimizerParams,
    pub camera: CameraConfig,
}

impl VioConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: VioConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        self.imu.validate()?;
        self.optimizer.validate()?;
        self.camera.build().map(|_| ())
    }
}
