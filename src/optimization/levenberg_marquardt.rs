use log::{debug, trace};
use nalgebra::{Isometry3, Matrix6};

use super::{check_conditioning, check_inputs, covariance_from_information, solve_step};
use crate::camera::StereoCamera;
use crate::config::OptimizerParams;
use crate::error::Result;
use crate::factors::reprojection::{linearize, retract, total_error};
use crate::types::{Correspondence, PoseEstimate};

/// Multiplicative damping schedule
///
/// Accepted steps divide lambda by the factor (growing the trust region),
/// rejected steps multiply it; lambda stays within `[min, max]`.
#[derive(Clone, Debug)]
pub struct Damping {
    lambda: f64,
    factor: f64,
    min_lambda: f64,
    max_lambda: f64,
}

impl Damping {
    pub fn new(params: &OptimizerParams) -> Self {
        Self {
            lambda: params.initial_lambda,
            factor: params.lambda_factor,
            min_lambda: params.min_lambda,
            max_lambda: params.max_lambda,
        }
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    pub fn accept(&mut self) {
        self.lambda = (self.lambda / self.factor).max(self.min_lambda);
    }

    pub fn reject(&mut self) {
        self.lambda = (self.lambda * self.factor).min(self.max_lambda);
    }

    /// No larger damping is available
    pub fn is_saturated(&self) -> bool {
        self.lambda >= self.max_lambda
    }
}

/// One Levenberg-Marquardt attempt
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LmStep {
    /// Step taken; `error` is the new total error
    Accepted {
        iteration: usize,
        error: f64,
        lambda: f64,
    },
    /// Step discarded; the pose is unchanged
    Rejected {
        iteration: usize,
        candidate_error: f64,
        lambda: f64,
    },
}

/// Refine a relative pose with damped Gauss-Newton steps.
///
/// A step is applied only when it lowers the total error, so the error never
/// increases; a rejected step is retried with larger damping. Every attempt
/// counts toward `params.max_iters`. Errors are as for
/// [`super::optimize_pose_gauss_newton`].
pub fn optimize_pose_levenberg_marquardt(
    correspondences: &[Correspondence],
    camera: &StereoCamera,
    initial: &Isometry3<f64>,
    params: &OptimizerParams,
) -> Result<PoseEstimate> {
    optimize_pose_levenberg_marquardt_with(correspondences, camera, initial, params, |step| {
        trace!("LM {:?}", step)
    })
}

/// Same as [`optimize_pose_levenberg_marquardt`], reporting every attempt to
/// `on_step`.
pub fn optimize_pose_levenberg_marquardt_with<F>(
    correspondences: &[Correspondence],
    camera: &StereoCamera,
    initial: &Isometry3<f64>,
    params: &OptimizerParams,
    mut on_step: F,
) -> Result<PoseEstimate>
where
    F: FnMut(LmStep),
{
    check_inputs(correspondences, params)?;
    let intrinsics = camera.left();

    let mut pose = *initial;
    let mut system = linearize(intrinsics, &pose, correspondences, params.min_depth)?;
    check_conditioning(&system.hessian)?;

    let initial_error = system.error;
    let mut damping = Damping::new(params);
    let mut iterations = 0;
    let mut converged = false;

    loop {
        if system.error < params.min_error {
            converged = true;
            break;
        }
        if iterations >= params.max_iters {
            break;
        }

        let damped = system.hessian + Matrix6::identity() * damping.lambda();
        let delta = solve_step(&damped, &system.gradient)?;
        let candidate = retract(&delta, &pose);
        let candidate_error =
            total_error(intrinsics, &candidate, correspondences, params.min_depth);
        iterations += 1;

        if candidate_error < system.error {
            let decrease = system.error - candidate_error;
            pose = candidate;
            system = linearize(intrinsics, &pose, correspondences, params.min_depth)?;
            damping.accept();
            on_step(LmStep::Accepted {
                iteration: iterations,
                error: system.error,
                lambda: damping.lambda(),
            });

            if decrease < params.min_error_delta {
                converged = true;
                break;
            }
        } else {
            damping.reject();
            on_step(LmStep::Rejected {
                iteration: iterations,
                candidate_error,
                lambda: damping.lambda(),
            });

            if damping.is_saturated() {
                debug!("LM damping saturated at {:.3e}", damping.lambda());
                break;
            }
        }
    }

    let covariance = covariance_from_information(&system.hessian)?;
    debug!(
        "LM finished after {} iterations: error {:.6e} -> {:.6e} (converged: {})",
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::PinholeCamera;
    use crate::error::VioError;
    use crate::math::{rotation_error, translation_error};
    use crate::simulation::{relative_pose, simulate_correspondences};
    use nalgebra::{Translation3, UnitQuaternion, Vector2, Vector3};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn make_stereo_camera() -> StereoCamera {
        let cam = PinholeCamera::new(415.876509, 415.876509, 376.0, 240.0, 480, 752).unwrap();
        StereoCamera::new(cam, cam, 0.2).unwrap()
    }

    fn translation(x: f64, y: f64, z: f64) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::new(x, y, z), UnitQuaternion::identity())
    }

    fn scene_points() -> Vec<Vector3<f64>> {
        vec![
            Vector3::new(-1.0, 0.1, 3.0),
            Vector3::new(0.0, 0.2, 2.0),
            Vector3::new(1.0, 0.3, 6.0),
        ]
    }

    fn offset_scene(noise: f64, seed: u64) -> (Vec<Correspondence>, Isometry3<f64>) {
        let camera = make_stereo_camera();
        let t_0_w = translation(1.0, 2.0, -1.0);
        let t_1_w = Isometry3::identity();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let correspondences = simulate_correspondences(
            &t_0_w,
            &t_1_w,
            &scene_points(),
            camera.left(),
            1.0,
            noise,
            &mut rng,
        )
        .unwrap();
        (correspondences, relative_pose(&t_0_w, &t_1_w))
    }

    #[test]
    fn test_damping_schedule() {
        let params = OptimizerParams {
            initial_lambda: 1.0,
            lambda_factor: 10.0,
            min_lambda: 0.01,
            max_lambda: 100.0,
            ..Default::default()
        };
        let mut damping = Damping::new(&params);

        damping.accept();
        assert!((damping.lambda() - 0.1).abs() < 1e-15);
        damping.accept();
        damping.accept();
        assert_eq!(damping.lambda(), 0.01);

        damping.reject();
        damping.reject();
        damping.reject();
        damping.reject();
        assert_eq!(damping.lambda(), 100.0);
        assert!(damping.is_saturated());
    }

    #[test]
    fn test_rotated_reference_camera() {
        let camera = make_stereo_camera();
        let t_0_w = Isometry3::from_parts(
            Translation3::new(0.0, 0.1, 0.0),
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 5f64.to_radians()),
        );
        let t_1_w = Isometry3::identity();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let correspondences = simulate_correspondences(
            &t_0_w,
            &t_1_w,
            &scene_points(),
            camera.left(),
            1.0,
            0.1,
            &mut rng,
        )
        .unwrap();
        let truth = relative_pose(&t_0_w, &t_1_w);

        let estimate = optimize_pose_levenberg_marquardt(
            &correspondences,
            &camera,
            &Isometry3::identity(),
            &OptimizerParams::default(),
        )
        .unwrap();

        assert!(estimate.iterations <= 20);
        assert!(translation_error(&estimate.pose, &truth) <= 0.05);
        assert!(rotation_error(&estimate.pose, &truth) <= 1f64.to_radians());
    }

    #[test]
    fn test_offset_translation() {
        let camera = make_stereo_camera();
        let (correspondences, truth) = offset_scene(0.1, 9);

        let estimate = optimize_pose_levenberg_marquardt(
            &correspondences,
            &camera,
            &translation(0.5, 1.73, -1.05),
            &OptimizerParams::default(),
        )
        .unwrap();

        assert!(estimate.iterations <= 20);
        assert!(translation_error(&estimate.pose, &truth) <= 0.05);
        assert!(rotation_error(&estimate.pose, &truth) <= 1f64.to_radians());

        let cov = estimate.covariance;
        assert!((cov - cov.transpose()).norm() < 1e-12);
        assert!(cov.symmetric_eigen().eigenvalues.min() >= 0.0);
    }

    #[test]
    fn test_rejections_increase_damping_and_error_never_grows() {
        let camera = make_stereo_camera();
        let (correspondences, truth) = offset_scene(0.0, 0);
        let params = OptimizerParams::default();

        // Far enough off that the first lightly damped steps overshoot
        let initial = translation(0.0, 0.0, 0.5);
        let mut steps = Vec::new();
        let estimate = optimize_pose_levenberg_marquardt_with(
            &correspondences,
            &camera,
            &initial,
            &params,
            |step| steps.push(step),
        )
        .unwrap();

        assert_eq!(steps.len(), estimate.iterations);
        assert!(steps.iter().any(|s| matches!(s, LmStep::Rejected { .. })));
        assert!(estimate.converged);
        assert!(translation_error(&estimate.pose, &truth) < 1e-4);

        let mut lambda = params.initial_lambda;
        let mut error = estimate.initial_error;
        for step in &steps {
            match *step {
                LmStep::Accepted {
                    error: new_error,
                    lambda: new_lambda,
                    ..
                } => {
                    assert!(new_error < error);
                    let expected = (lambda / params.lambda_factor).max(params.min_lambda);
                    assert!((new_lambda - expected).abs() < 1e-12 * lambda);
                    error = new_error;
                    lambda = new_lambda;
                }
                LmStep::Rejected {
                    candidate_error,
                    lambda: new_lambda,
                    ..
                } => {
                    assert!(candidate_error >= error);
                    assert!((new_lambda - lambda * params.lambda_factor).abs() < 1e-9 * new_lambda);
                    lambda = new_lambda;
                }
            }
        }
        assert_eq!(error, estimate.error);
    }

    #[test]
    fn test_saturated_damping_stops() {
        let camera = make_stereo_camera();
        let (correspondences, _) = offset_scene(0.0, 0);
        let params = OptimizerParams {
            initial_lambda: 1e-3,
            max_lambda: 1e-2,
            ..Default::default()
        };

        let mut rejected = 0;
        let estimate = optimize_pose_levenberg_marquardt_with(
            &correspondences,
            &camera,
            &translation(0.0, 0.0, 0.5),
            &params,
            |step| {
                if matches!(step, LmStep::Rejected { .. }) {
                    rejected += 1;
                }
            },
        )
        .unwrap();

        // One rejection reaches max_lambda and ends the loop
        assert_eq!(rejected, 1);
        assert_eq!(estimate.iterations, 1);
        assert!(!estimate.converged);
        assert_eq!(estimate.error, estimate.initial_error);
    }

    #[test]
    fn test_too_few_correspondences() {
        let camera = make_stereo_camera();
        let correspondences = vec![Correspondence::new(
            Vector3::new(0.0, 0.0, 2.0),
            Vector2::new(376.0, 240.0),
            1.0,
        )];
        let result = optimize_pose_levenberg_marquardt(
            &correspondences,
            &camera,
            &Isometry3::identity(),
            &OptimizerParams::default(),
        );
        assert!(matches!(result, Err(VioError::DegenerateGeometry { .. })));
    }
}
