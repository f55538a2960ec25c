/// Stereo reprojection factor
///
/// Residual for a correspondence under pose `T` (reference → target camera):
/// ```text
/// r = (observed - π(T · P)) / σ
/// ```
/// The pose is perturbed on the left, `T' = Exp(δ) · T` with `δ = [δt; δω]`,
/// so the transformed point moves by `δt - [T·P]× δω`.
use nalgebra::{Isometry3, Matrix2, Matrix3, Matrix6, Point3, Vector2, Vector3, Vector6};

use crate::camera::PinholeCamera;
use crate::error::{Result, VioError};
use crate::math::skew_symmetric;
use crate::types::{Correspondence, PixelJacobian};

/// Gauss-Newton normal equations accumulated over all correspondences
#[derive(Clone, Debug)]
pub struct NormalEquations {
    /// JᵀJ (information matrix)
    pub hessian: Matrix6<f64>,
    /// Jᵀr
    pub gradient: Vector6<f64>,
    /// Σ‖r‖²
    pub error: f64,
}

/// Apply a tangent-space increment on the left of `pose`
pub fn retract(delta: &Vector6<f64>, pose: &Isometry3<f64>) -> Isometry3<f64> {
    let translation = delta.fixed_rows::<3>(0).into_owned();
    let rotation = delta.fixed_rows::<3>(3).into_owned();
    Isometry3::new(translation, rotation) * pose
}

pub fn transform_point(pose: &Isometry3<f64>, point: &Vector3<f64>) -> Vector3<f64> {
    pose.transform_point(&Point3::from(*point)).coords
}

/// Whitened residual of one correspondence at a camera-frame point
#[inline]
fn whitened_residual(
    camera: &PinholeCamera,
    correspondence: &Correspondence,
    p_cam: &Vector3<f64>,
) -> Vector2<f64> {
    (correspondence.observed - camera.project(p_cam)).component_div(&correspondence.sigma)
}

/// Residual and its Jacobian w.r.t. the left pose perturbation
pub fn residual_and_jacobian(
    camera: &PinholeCamera,
    pose: &Isometry3<f64>,
    correspondence: &Correspondence,
) -> (Vector2<f64>, PixelJacobian) {
    let p_cam = transform_point(pose, &correspondence.point);
    let residual = whitened_residual(camera, correspondence, &p_cam);

    let mut point_jacobian = nalgebra::SMatrix::<f64, 3, 6>::zeros();
    point_jacobian
        .fixed_view_mut::<3, 3>(0, 0)
        .copy_from(&Matrix3::identity());
    point_jacobian
        .fixed_view_mut::<3, 3>(0, 3)
        .copy_from(&(-skew_symmetric(&p_cam)));

    let weight = Matrix2::from_diagonal(&correspondence.sigma.map(|s| 1.0 / s));
    let jacobian = -(weight * camera.projection_jacobian(&p_cam) * point_jacobian);

    (residual, jacobian)
}

/// Build the normal equations at `pose`.
///
/// Fails with [`VioError::PointBehindCamera`] if any transformed point is
/// closer than `min_depth`.
pub fn linearize(
    camera: &PinholeCamera,
    pose: &Isometry3<f64>,
    correspondences: &[Correspondence],
    min_depth: f64,
) -> Result<NormalEquations> {
    let mut hessian = Matrix6::zeros();
    let mut gradient = Vector6::zeros();
    let mut error = 0.0;

    for (index, c) in correspondences.iter().enumerate() {
        if transform_point(pose, &c.point).z < min_depth {
            return Err(VioError::PointBehindCamera { index });
        }

        let (residual, jacobian) = residual_and_jacobian(camera, pose, c);
        hessian += jacobian.transpose() * jacobian;
        gradient += jacobian.transpose() * residual;
        error += residual.norm_squared();
    }

    Ok(NormalEquations {
        hessian,
        gradient,
        error,
    })
}

/// Total weighted squared error at `pose`; infinite if any point is closer
/// than `min_depth`.
pub fn total_error(
    camera: &PinholeCamera,
    pose: &Isometry3<f64>,
    correspondences: &[Correspondence],
    min_depth: f64,
) -> f64 {
    let mut error = 0.0;
    for c in correspondences {
        let p_cam = transform_point(pose, &c.point);
        if p_cam.z < min_depth {
            return f64::INFINITY;
        }
        error += whitened_residual(camera, c, &p_cam).norm_squared();
    }
    error
}
