use log::{debug, warn};
use nalgebra::Isometry3;

use super::{
    check_conditioning, check_inputs, covariance_from_information, reached_threshold, solve_step,
};
use crate::camera::StereoCamera;
use crate::config::OptimizerParams;
use crate::error::{Result, VioError};
use crate::factors::reprojection::{linearize, retract};
use crate::types::{Correspondence, PoseEstimate};

/// Refine a relative pose with undamped Gauss-Newton steps.
///
/// Each iteration solves `JᵀJ δ = -Jᵀr` and applies `δ` on the left of the
/// current pose. Iteration stops once the error drops below
/// `params.min_error`, consecutive errors differ by less than
/// `params.min_error_delta`, or `params.max_iters` steps were taken. A step
/// that would move a point closer than `params.min_depth` is discarded and
/// ends the loop at the last good pose. Neither case is an error; check
/// [`PoseEstimate::converged`].
///
/// # Errors
/// - [`crate::VioError::DegenerateGeometry`] for fewer than three
///   correspondences or an ill-conditioned information matrix
/// - [`crate::VioError::PointBehindCamera`] if a point is behind the camera
///   at the initial guess
pub fn optimize_pose_gauss_newton(
    correspondences: &[Correspondence],
    camera: &StereoCamera,
    initial: &Isometry3<f64>,
    params: &OptimizerParams,
) -> Result<PoseEstimate> {
    check_inputs(correspondences, params)?;
    let intrinsics = camera.left();

    let mut pose = *initial;
    let mut system = linearize(intrinsics, &pose, correspondences, params.min_depth)?;
    check_conditioning(&system.hessian)?;

    let initial_error = system.error;
    let mut previous_error = None;
    let mut iterations = 0;
    let mut converged = false;

    loop {
        if reached_threshold(system.error, previous_error, params) {
            converged = true;
            break;
        }
        if iterations >= params.max_iters {
            break;
        }

        let delta = solve_step(&system.hessian, &system.gradient)?;
        let candidate = retract(&delta, &pose);
        iterations += 1;

        match linearize(intrinsics, &candidate, correspondences, params.min_depth) {
            Ok(next) => {
                pose = candidate;
                previous_error = Some(system.error);
                system = next;
            }
            Err(VioError::PointBehindCamera { index }) => {
                warn!(
                    "GN iter {}: step moves point {} behind the camera, keeping previous pose",
                    iterations, index
                );
                break;
            }
            Err(e) => return Err(e),
        }
        debug!(
            "GN iter {}: error={:.6e} |δ|={:.3e}",
            iterations,
            system.error,
            delta.norm()
        );
    }

    let covariance = covariance_from_information(&system.hessian)?;
    debug!(
        "GN finished after {} iterations: error {:.6e} -> {:.6e} (converged: {})",
        iterations, initial_error, system.error, converged
    );

    Ok(PoseEstimate {
        pose,
        covariance,
        iterations,
        error: system.error,
        initial_error,
        converged,
    })
}
