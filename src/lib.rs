//! Stereo visual-inertial motion estimation kernel
//!
//! - [`ImuBuffer`]: bounded drop-oldest inertial sample queue shared between
//!   a sensor thread and the estimator
//! - [`Preintegrator`]: summarizes the samples between two timestamps into a
//!   relative rotation/velocity/position increment with covariance
//! - [`optimize_pose_gauss_newton`] / [`optimize_pose_levenberg_marquardt`]:
//!   refine a relative camera pose from 3D-2D stereo correspondences

pub mod buffer;
pub mod camera;
pub mod config;
pub mod error;
pub mod factors;
pub mod math;
pub mod optimization;
pub mod preintegrator;
pub mod simulation;
pub mod types;

pub use buffer::ImuBuffer;
pub use camera::{PinholeCamera, StereoCamera};
pub use config::{CameraConfig, ImuParams, NoiseModel, OptimizerParams, VioConfig};
pub use error::{Result, VioError};
pub use factors::{
    CorrectedDeltas, PreintegratedImuMeasurements, PreintegrationResult, PreintegrationStatus,
};
pub use optimization::{
    optimize_pose_gauss_newton, optimize_pose_levenberg_marquardt,
    optimize_pose_levenberg_marquardt_with, Damping, LmStep,
};
pub use preintegrator::{Preintegrator, UNBOUNDED_END, UNBOUNDED_START};
pub use types::{
    correspondences_from_slices, Correspondence, ImuBias, InertialSample, NavState, PoseEstimate,
};
