//! SO(3) helpers and pose error metrics

use nalgebra::{Isometry3, Matrix3, Vector3};

/// Small-angle threshold below which series expansions are used
const SMALL_ANGLE: f64 = 1e-8;

/// Create a skew-symmetric matrix from a 3D vector
pub fn skew_symmetric(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Right Jacobian of SO(3)
///
/// Jr(φ) = I - (1 - cos θ)/θ² [φ]× + (θ - sin θ)/θ³ [φ]×²
pub fn right_jacobian(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    let phi_skew = skew_symmetric(phi);

    if theta < SMALL_ANGLE {
        return Matrix3::identity() - 0.5 * phi_skew;
    }

    let theta2 = theta * theta;
    let theta3 = theta2 * theta;
    Matrix3::identity() - ((1.0 - theta.cos()) / theta2) * phi_skew
        + ((theta - theta.sin()) / theta3) * (phi_skew * phi_skew)
}

/// Distance between the camera centers implied by two relative poses [m]
///
/// Both poses map reference-frame points into the target frame, so the
/// target camera center in the reference frame is the inverse translation.
pub fn translation_error(estimate: &Isometry3<f64>, truth: &Isometry3<f64>) -> f64 {
    let center_estimate = estimate.inverse().translation.vector;
    let center_truth = truth.inverse().translation.vector;
    (center_estimate - center_truth).norm()
}

/// Angle of the rotation separating two relative poses [rad]
pub fn rotation_error(estimate: &Isometry3<f64>, truth: &Isometry3<f64>) -> f64 {
    estimate.rotation.angle_to(&truth.rotation)
}
