/// Measurement factors for visual-inertial odometry
///
/// IMU preintegration between two instants and stereo reprojection of
/// tracked points under a relative pose.

pub mod imu_preintegration;
pub mod reprojection;

pub use imu_preintegration::{
    CorrectedDeltas, PreintegratedImuMeasurements, PreintegrationResult, PreintegrationStatus,
};
pub use reprojection::NormalEquations;
