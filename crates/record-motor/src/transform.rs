//! Two-circle goniometer relation between detector two-theta and carriage height.

use record_runtime::{Result, RuntimeError};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// ADSC detector arm constants, in millimetres.
pub const ADSC_D1_MM: f64 = 13.303 * 25.4;
pub const ADSC_D2_MM: f64 = 28.040 * 25.4;

const ACOS_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TwoThetaGeometry {
    pub d1: f64,
    pub d2: f64,
}

impl Default for TwoThetaGeometry {
    fn default() -> Self {
        Self {
            d1: ADSC_D1_MM,
            d2: ADSC_D2_MM,
        }
    }
}

impl TwoThetaGeometry {
    pub fn new(d1: f64, d2: f64) -> Self {
        Self { d1, d2 }
    }

    /// Carriage height for an arm angle in degrees.
    ///
    /// `h = d1 (1 - cos t - sin t tan t) + d2 tan t`
    pub fn height(&self, two_theta: f64) -> f64 {
        let angle = two_theta.to_radians();
        let (s, c) = angle.sin_cos();
        let t = angle.tan();
        self.d1 * (1.0 - c - s * t) + self.d2 * t
    }

    /// Arm angle in degrees for a carriage height.
    ///
    /// Solves `a b^2 + b' b + c = 0` for `b = cos t` and keeps the `+` root; the
    /// angle takes the sign of `height`. Heights that give no real root, or a root
    /// outside [-1, 1], are rejected.
    pub fn two_theta(&self, height: f64) -> Result<f64> {
        let (d1, d2) = (self.d1, self.d2);
        let a = (height - d1).powi(2) + d2 * d2;
        let b = 2.0 * d1 * (height - d1);
        let c = d1 * d1 - d2 * d2;
        let discriminant = b * b - 4.0 * a * c;
        if discriminant < 0.0 {
            warn!(height, discriminant, "two-theta height has no real solution");
            return Err(RuntimeError::IllegalArgument(format!(
                "height {height} has no two-theta solution (discriminant {discriminant})"
            )));
        }
        let beta = (-b + discriminant.sqrt()) / (2.0 * a);
        if beta.abs() > 1.0 + ACOS_TOLERANCE {
            warn!(height, beta, "two-theta cosine out of range");
            return Err(RuntimeError::IllegalArgument(format!(
                "height {height} gives cos(two-theta) = {beta}"
            )));
        }
        let angle = beta.clamp(-1.0, 1.0).acos().to_degrees();
        Ok(if height < 0.0 { -angle } else { angle })
    }
}
