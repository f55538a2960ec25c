//! Linear algebra type system for the estimation kernel
//!
//! Fixed-size aliases keep the preintegration and pose blocks checked at
//! compile time.

use nalgebra::SMatrix;

// ===== Preintegration Dimensions =====
pub const MOTION_DIM: usize = 9; // (δθ, δv, δp)
pub const PREINT_DIM: usize = 15; // (δθ, δv, δp, δba, δbg)

// Block offsets inside the preintegration error state
pub const ROT: usize = 0;
pub const VEL: usize = 3;
pub const POS: usize = 6;
pub const BIAS_ACC: usize = 9;
pub const BIAS_GYRO: usize = 12;

// ===== Pose Dimensions =====
pub const POSE_DIM: usize = 6; // (δt, δω)
pub const PIXEL_DIM: usize = 2;

pub type Matrix9 = SMatrix<f64, MOTION_DIM, MOTION_DIM>;
pub type Matrix15 = SMatrix<f64, PREINT_DIM, PREINT_DIM>;

/// Jacobian of a pixel residual w.r.t. the pose tangent (2×6)
pub type PixelJacobian = SMatrix<f64, PIXEL_DIM, POSE_DIM>;
