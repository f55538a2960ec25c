//! Pinhole and rectified stereo camera models
//!
//! Cameras look down +Z; pixel coordinates are
//! ```text
//! u = fx * X / Z + cx
//! v = fy * Y / Z + cy
//! ```

use nalgebra::{Matrix2x3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VioError};

/// Ideal (undistorted) pinhole camera
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PinholeCamera {
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
    width: u32,
    height: u32,
}

impl PinholeCamera {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, height: u32, width: u32) -> Result<Self> {
        if !(fx > 0.0 && fy > 0.0) || !fx.is_finite() || !fy.is_finite() {
            return Err(VioError::InvalidConfig(format!(
                "focal lengths must be positive and finite (fx={}, fy={})",
                fx, fy
            )));
        }
        if !cx.is_finite() || !cy.is_finite() {
            return Err(VioError::InvalidConfig(
                "principal point must be finite".to_string(),
            ));
        }
        if width == 0 || height == 0 {
            return Err(VioError::InvalidConfig(format!(
                "image size must be non-zero ({}x{})",
                width, height
            )));
        }

        Ok(Self {
            fx,
            fy,
            cx,
            cy,
            width,
            height,
        })
    }

    pub fn fx(&self) -> f64 {
        self.fx
    }

    pub fn fy(&self) -> f64 {
        self.fy
    }

    pub fn cx(&self) -> f64 {
        self.cx
    }

    pub fn cy(&self) -> f64 {
        self.cy
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Project a point in the camera frame to pixels. The caller is
    /// responsible for rejecting points with non-positive depth.
    #[inline]
    pub fn project(&self, p: &Vector3<f64>) -> Vector2<f64> {
        let z_inv = 1.0 / p.z;
        Vector2::new(self.fx * p.x * z_inv + self.cx, self.fy * p.y * z_inv + self.cy)
    }

    /// Jacobian of [`Self::project`] w.r.t. the camera-frame point
    #[inline]
    pub fn projection_jacobian(&self, p: &Vector3<f64>) -> Matrix2x3<f64> {
        let z_inv = 1.0 / p.z;
        let z_inv_sq = z_inv * z_inv;
        Matrix2x3::new(
            self.fx * z_inv,
            0.0,
            -self.fx * p.x * z_inv_sq,
            0.0,
            self.fy * z_inv,
            -self.fy * p.y * z_inv_sq,
        )
    }

    /// Back-project a pixel at a known depth
    pub fn unproject(&self, pixel: &Vector2<f64>, depth: f64) -> Vector3<f64> {
        Vector3::new(
            (pixel.x - self.cx) / self.fx * depth,
            (pixel.y - self.cy) / self.fy * depth,
            depth,
        )
    }

    pub fn in_image(&self, pixel: &Vector2<f64>) -> bool {
        pixel.x >= 0.0
            && pixel.y >= 0.0
            && pixel.x < self.width as f64
            && pixel.y < self.height as f64
    }
}

/// Rectified stereo pair; the right camera sits `baseline` meters along +X
/// of the left camera.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StereoCamera {
    left: PinholeCamera,
    right: PinholeCamera,
    baseline: f64,
}

impl StereoCamera {
    pub fn new(left: PinholeCamera, right: PinholeCamera, baseline: f64) -> Result<Self> {
        if !(baseline > 0.0) || !baseline.is_finite() {
            return Err(VioError::InvalidConfig(format!(
                "stereo baseline must be positive (got {})",
                baseline
            )));
        }
        if left.width != right.width || left.height != right.height {
            return Err(VioError::InvalidConfig(
                "left and right images must have the same size".to_string(),
            ));
        }
        Ok(Self {
            left,
            right,
            baseline,
        })
    }

    pub fn left(&self) -> &PinholeCamera {
        &self.left
    }

    pub fn right(&self) -> &PinholeCamera {
        &self.right
    }

    pub fn baseline(&self) -> f64 {
        self.baseline
    }

    /// Horizontal disparity [px] of a left-camera point
    pub fn disparity(&self, p_left: &Vector3<f64>) -> f64 {
        self.left.fx * self.baseline / p_left.z
    }

    /// Project a left-camera point into the right image
    pub fn project_right(&self, p_left: &Vector3<f64>) -> Vector2<f64> {
        let p_right = Vector3::new(p_left.x - self.baseline, p_left.y, p_left.z);
        self.right.project(&p_right)
    }

    /// Recover a left-camera point from its left pixel and stereo disparity
    pub fn triangulate(&self, left_pixel: &Vector2<f64>, disparity: f64) -> Result<Vector3<f64>> {
        if !(disparity > 0.0) {
            return Err(VioError::InvalidInput(format!(
                "disparity must be positive (got {})",
                disparity
            )));
        }
        let depth = self.left.fx * self.baseline / disparity;
        Ok(self.left.unproject(left_pixel, depth))
    }
}
