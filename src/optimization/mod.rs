//! Relative pose refinement from stereo reprojection residuals
//!
//! Both solvers take 3D points in the reference camera, their pixel
//! observations in the target camera and an initial guess of the transform
//! taking reference-camera points into the target camera. They return the
//! refined transform together with the inverse of the final information
//! matrix as its covariance.

mod gauss_newton;
mod levenberg_marquardt;

pub use gauss_newton::optimize_pose_gauss_newton;
pub use levenberg_marquardt::{
    optimize_pose_levenberg_marquardt, optimize_pose_levenberg_marquardt_with, Damping, LmStep,
};

use nalgebra::{Matrix6, Vector6};

use crate::config::OptimizerParams;
use crate::error::{Result, VioError};
use crate::types::{validate_correspondences, Correspondence};

/// Fewest correspondences that constrain all six pose parameters
pub const MIN_CORRESPONDENCES: usize = 3;

/// Smallest accepted ratio of extreme information eigenvalues
const MIN_RECIPROCAL_CONDITION: f64 = 1e-10;

fn check_inputs(correspondences: &[Correspondence], params: &OptimizerParams) -> Result<()> {
    params.validate()?;
    validate_correspondences(correspondences)?;
    if correspondences.len() < MIN_CORRESPONDENCES {
        return Err(VioError::degenerate(format!(
            "{} correspondences, need at least {}",
            correspondences.len(),
            MIN_CORRESPONDENCES
        )));
    }
    Ok(())
}

/// Reject information matrices that are singular or too ill-conditioned to
/// invert meaningfully.
fn check_conditioning(information: &Matrix6<f64>) -> Result<()> {
    let eigenvalues = information.symmetric_eigen().eigenvalues;
    let largest = eigenvalues.max();
    let smallest = eigenvalues.min();

    if !largest.is_finite() || largest <= 0.0 {
        return Err(VioError::degenerate("information matrix is zero"));
    }
    let reciprocal_condition = smallest / largest;
    if reciprocal_condition < MIN_RECIPROCAL_CONDITION {
        return Err(VioError::degenerate(format!(
            "information matrix is ill-conditioned (rcond {:.3e})",
            reciprocal_condition
        )));
    }
    Ok(())
}

/// Solve `A δ = -g` for a symmetric positive definite `A`
fn solve_step(system: &Matrix6<f64>, gradient: &Vector6<f64>) -> Result<Vector6<f64>> {
    let cholesky = system
        .cholesky()
        .ok_or_else(|| VioError::degenerate("normal equations are not positive definite"))?;
    Ok(cholesky.solve(&(-gradient)))
}

/// Covariance of the estimate as the inverse information matrix
fn covariance_from_information(information: &Matrix6<f64>) -> Result<Matrix6<f64>> {
    check_conditioning(information)?;
    let covariance = information
        .cholesky()
        .ok_or_else(|| VioError::degenerate("information matrix is not positive definite"))?
        .inverse();
    Ok(0.5 * (covariance + covariance.transpose()))
}

/// Error thresholds shared by both solvers
fn reached_threshold(error: f64, previous: Option<f64>, params: &OptimizerParams) -> bool {
    if error < params.min_error {
        return true;
    }
    previous.map_or(false, |prev| (prev - error).abs() < params.min_error_delta)
}
