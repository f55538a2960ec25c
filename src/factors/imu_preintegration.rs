/// IMU preintegration on the SO(3) manifold
///
/// Accumulates gyro/accel samples between two instants into a single relative
/// rotation/velocity/position increment, its 15×15 covariance over
/// `[δθ, δv, δp, δba, δbg]`, and the Jacobians needed to correct the
/// increment for a small bias change without re-integrating.
///
/// References:
/// - Forster et al., "On-Manifold Preintegration for Real-Time Visual-Inertial Odometry"
/// - Qin et al., "VINS-Mono: A Robust and Versatile Monocular Visual-Inertial State Estimator"
use nalgebra::{Matrix3, UnitQuaternion, Vector3};
use serde::Serialize;

use crate::config::NoiseModel;
use crate::math::{right_jacobian, skew_symmetric};
use crate::types::{
    ImuBias, Matrix15, Matrix9, NavState, BIAS_ACC, BIAS_GYRO, MOTION_DIM, POS, ROT, VEL,
};

/// Outcome of a preintegration request
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub enum PreintegrationStatus {
    Ok,
    /// No samples were available
    BufferEmpty,
    /// NaN bound, or an end before the start; nothing was consumed
    InvalidWindow { from: f64, to: f64 },
    /// The first usable sample is too far from the requested start [s]
    StartMisaligned { offset: f64 },
    /// The last sample before the requested end is too far from it [s]
    EndMisaligned { offset: f64 },
}

/// Bias-corrected increments
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CorrectedDeltas {
    pub rotation: UnitQuaternion<f64>,
    pub velocity: Vector3<f64>,
    pub position: Vector3<f64>,
}

/// Inertial motion constraint between two timestamps
#[derive(Clone, Debug)]
pub struct PreintegrationResult {
    pub valid: bool,
    pub status: PreintegrationStatus,
    /// Timestamps of the anchor and last integrated sample
    pub time_range: Option<(f64, f64)>,

    pub delta_rotation: UnitQuaternion<f64>,
    pub delta_velocity: Vector3<f64>,
    pub delta_position: Vector3<f64>,
    /// Integrated duration [s]
    pub delta_time: f64,
    /// Covariance over `[δθ, δv, δp, δba, δbg]`
    pub covariance: Matrix15,

    pub d_rot_d_bg: Matrix3<f64>,
    pub d_vel_d_ba: Matrix3<f64>,
    pub d_vel_d_bg: Matrix3<f64>,
    pub d_pos_d_ba: Matrix3<f64>,
    pub d_pos_d_bg: Matrix3<f64>,

    /// Bias the increments were integrated with
    pub bias: ImuBias,
    pub gravity: Vector3<f64>,

    pub num_samples: usize,
    /// Samples skipped for a non-positive time delta
    pub skipped_samples: usize,
}

impl PreintegrationResult {
    /// An invalid result claiming no time range
    pub fn invalid(status: PreintegrationStatus, bias: ImuBias, gravity: Vector3<f64>) -> Self {
        Self {
            valid: false,
            status,
            time_range: None,
            delta_rotation: UnitQuaternion::identity(),
            delta_velocity: Vector3::zeros(),
            delta_position: Vector3::zeros(),
            delta_time: 0.0,
            covariance: Matrix15::zeros(),
            d_rot_d_bg: Matrix3::zeros(),
            d_vel_d_ba: Matrix3::zeros(),
            d_vel_d_bg: Matrix3::zeros(),
            d_pos_d_ba: Matrix3::zeros(),
            d_pos_d_bg: Matrix3::zeros(),
            bias,
            gravity,
            num_samples: 0,
            skipped_samples: 0,
        }
    }

    pub fn earliest(&self) -> Option<f64> {
        self.time_range.map(|(earliest, _)| earliest)
    }

    pub fn latest(&self) -> Option<f64> {
        self.time_range.map(|(_, latest)| latest)
    }

    /// Rotation/velocity/position block of the covariance
    pub fn motion_covariance(&self) -> Matrix9 {
        self.covariance
            .fixed_view::<MOTION_DIM, MOTION_DIM>(ROT, ROT)
            .into_owned()
    }

    /// First-order correction of the increments for a new bias estimate
    pub fn bias_corrected(&self, bias: &ImuBias) -> CorrectedDeltas {
        let dba = bias.accel - self.bias.accel;
        let dbg = bias.gyro - self.bias.gyro;

        CorrectedDeltas {
            rotation: self.delta_rotation * UnitQuaternion::from_scaled_axis(self.d_rot_d_bg * dbg),
            velocity: self.delta_velocity + self.d_vel_d_ba * dba + self.d_vel_d_bg * dbg,
            position: self.delta_position + self.d_pos_d_ba * dba + self.d_pos_d_bg * dbg,
        }
    }

    /// Propagate a navigation state through the increments and gravity
    pub fn predict(&self, state: &NavState) -> NavState {
        let dt = self.delta_time;
        let g = self.gravity;

        NavState {
            rotation: state.rotation * self.delta_rotation,
            velocity: state.velocity + g * dt + state.rotation * self.delta_velocity,
            position: state.position
                + state.velocity * dt
                + 0.5 * g * dt * dt
                + state.rotation * self.delta_position,
        }
    }
}

/// Running preintegration accumulator
#[derive(Clone, Debug)]
pub struct PreintegratedImuMeasurements {
    noise: NoiseModel,
    bias: ImuBias,

    delta_rotation: UnitQuaternion<f64>,
    delta_velocity: Vector3<f64>,
    delta_position: Vector3<f64>,
    delta_time: f64,
    covariance: Matrix15,

    d_rot_d_bg: Matrix3<f64>,
    d_vel_d_ba: Matrix3<f64>,
    d_vel_d_bg: Matrix3<f64>,
    d_pos_d_ba: Matrix3<f64>,
    d_pos_d_bg: Matrix3<f64>,

    num_samples: usize,
}

impl PreintegratedImuMeasurements {
    pub fn new(noise: NoiseModel, bias: ImuBias) -> Self {
        Self {
            noise,
            bias,
            delta_rotation: UnitQuaternion::identity(),
            delta_velocity: Vector3::zeros(),
            delta_position: Vector3::zeros(),
            delta_time: 0.0,
            covariance: Matrix15::zeros(),
            d_rot_d_bg: Matrix3::zeros(),
            d_vel_d_ba: Matrix3::zeros(),
            d_vel_d_bg: Matrix3::zeros(),
            d_pos_d_ba: Matrix3::zeros(),
            d_pos_d_bg: Matrix3::zeros(),
            num_samples: 0,
        }
    }

    pub fn bias(&self) -> &ImuBias {
        &self.bias
    }

    pub fn delta_rotation(&self) -> &UnitQuaternion<f64> {
        &self.delta_rotation
    }

    pub fn delta_velocity(&self) -> &Vector3<f64> {
        &self.delta_velocity
    }

    pub fn delta_position(&self) -> &Vector3<f64> {
        &self.delta_position
    }

    pub fn delta_time(&self) -> f64 {
        self.delta_time
    }

    pub fn covariance(&self) -> &Matrix15 {
        &self.covariance
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// True when nothing has been integrated since the last reset
    pub fn is_zero(&self) -> bool {
        self.num_samples == 0 && self.delta_time == 0.0
    }

    /// Zero the increments, keeping the current bias
    pub fn reset_integration(&mut self) {
        *self = Self::new(self.noise, self.bias);
    }

    /// Zero the increments and integrate with a new bias from now on
    pub fn reset_and_set_bias(&mut self, bias: ImuBias) {
        *self = Self::new(self.noise, bias);
    }

    /// Integrate one accel/gyro reading held constant over `dt` seconds
    pub fn integrate_measurement(&mut self, accel: Vector3<f64>, gyro: Vector3<f64>, dt: f64) {
        let accel_corrected = accel - self.bias.accel;
        let gyro_corrected = gyro - self.bias.gyro;

        let theta = gyro_corrected * dt;
        let step_rotation = UnitQuaternion::from_scaled_axis(theta);
        let step_matrix = step_rotation.to_rotation_matrix().into_inner();
        let jr = right_jacobian(&theta);

        let rot = self.delta_rotation.to_rotation_matrix().into_inner();
        let accel_skew = skew_symmetric(&accel_corrected);
        let dt2 = dt * dt;

        self.propagate_covariance(&rot, &accel_skew, &step_matrix, &jr, dt);

        // Bias Jacobians use the increments before this step
        self.d_pos_d_ba += self.d_vel_d_ba * dt - 0.5 * rot * dt2;
        self.d_pos_d_bg += self.d_vel_d_bg * dt - 0.5 * rot * accel_skew * self.d_rot_d_bg * dt2;
        self.d_vel_d_ba -= rot * dt;
        self.d_vel_d_bg -= rot * accel_skew * self.d_rot_d_bg * dt;
        self.d_rot_d_bg = step_matrix.transpose() * self.d_rot_d_bg - jr * dt;

        // Position before velocity: both use the rotation at the step start
        let accel_nav = self.delta_rotation * accel_corrected;
        self.delta_position += self.delta_velocity * dt + 0.5 * accel_nav * dt2;
        self.delta_velocity += accel_nav * dt;
        self.delta_rotation = UnitQuaternion::new_normalize(
            (self.delta_rotation * step_rotation).into_inner(),
        );

        self.delta_time += dt;
        self.num_samples += 1;
    }

    fn propagate_covariance(
        &mut self,
        rot: &Matrix3<f64>,
        accel_skew: &Matrix3<f64>,
        step_matrix: &Matrix3<f64>,
        jr: &Matrix3<f64>,
        dt: f64,
    ) {
        let dt2 = dt * dt;
        let identity = Matrix3::identity();

        let mut f = Matrix15::identity();
        f.fixed_view_mut::<3, 3>(ROT, ROT)
            .copy_from(&step_matrix.transpose());
        f.fixed_view_mut::<3, 3>(ROT, BIAS_GYRO).copy_from(&(-jr * dt));
        f.fixed_view_mut::<3, 3>(VEL, ROT)
            .copy_from(&(-rot * accel_skew * dt));
        f.fixed_view_mut::<3, 3>(VEL, BIAS_ACC).copy_from(&(-rot * dt));
        f.fixed_view_mut::<3, 3>(POS, ROT)
            .copy_from(&(-0.5 * rot * accel_skew * dt2));
        f.fixed_view_mut::<3, 3>(POS, VEL).copy_from(&(identity * dt));
        f.fixed_view_mut::<3, 3>(POS, BIAS_ACC)
            .copy_from(&(-0.5 * rot * dt2));

        // Discrete noise: white noise densities become Σ/dt per sample
        let accel_nav_cov = rot * self.noise.accel_cov * rot.transpose();
        let mut q = Matrix15::zeros();
        q.fixed_view_mut::<3, 3>(ROT, ROT)
            .copy_from(&(jr * self.noise.gyro_cov * jr.transpose() * dt));
        q.fixed_view_mut::<3, 3>(VEL, VEL)
            .copy_from(&(accel_nav_cov * dt));
        q.fixed_view_mut::<3, 3>(VEL, POS)
            .copy_from(&(0.5 * accel_nav_cov * dt2));
        q.fixed_view_mut::<3, 3>(POS, VEL)
            .copy_from(&(0.5 * accel_nav_cov * dt2));
        q.fixed_view_mut::<3, 3>(POS, POS)
            .copy_from(&(0.25 * accel_nav_cov * dt2 * dt + self.noise.integration_cov * dt));
        q.fixed_view_mut::<3, 3>(BIAS_ACC, BIAS_ACC)
            .copy_from(&(self.noise.accel_bias_cov * dt));
        q.fixed_view_mut::<3, 3>(BIAS_GYRO, BIAS_GYRO)
            .copy_from(&(self.noise.gyro_bias_cov * dt));

        let propagated = f * self.covariance * f.transpose() + q;
        self.covariance = 0.5 * (propagated + propagated.transpose());
    }

    /// Snapshot the accumulator as a valid result over `[earliest, latest]`
    pub fn to_result(
        &self,
        earliest: f64,
        latest: f64,
        skipped_samples: usize,
        gravity: Vector3<f64>,
    ) -> PreintegrationResult {
        PreintegrationResult {
            valid: true,
            status: PreintegrationStatus::Ok,
            time_range: Some((earliest, latest)),
            delta_rotation: self.delta_rotation,
            delta_velocity: self.delta_velocity,
            delta_position: self.delta_position,
            delta_time: self.delta_time,
            covariance: self.covariance,
            d_rot_d_bg: self.d_rot_d_bg,
            d_vel_d_ba: self.d_vel_d_ba,
            d_vel_d_bg: self.d_vel_d_bg,
            d_pos_d_ba: self.d_pos_d_ba,
            d_pos_d_bg: self.d_pos_d_bg,
            bias: self.bias,
            gravity,
            num_samples: self.num_samples,
            skipped_samples,
        }
    }
}
