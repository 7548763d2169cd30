use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::error::{require_positive, require_tolerance, ConfigError};

/// Geometric ellipse parameters in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EllipseParams {
    pub center: Point2<f64>,
    /// Semi-major axis length in pixels.
    pub semi_major: f64,
    /// Semi-minor axis length in pixels.
    pub semi_minor: f64,
    /// Rotation of the major axis from +x, radians, in (-pi/2, pi/2].
    pub angle: f64,
}

impl EllipseParams {
    /// Mean full diameter, `semi_major + semi_minor`.
    ///
    /// Used as the projectively stable size estimate of a near-circular
    /// marker: the ratio of mean diameters of two concentric circles is
    /// preserved to first order under projection.
    #[inline]
    pub fn mean_diameter(&self) -> f64 {
        self.semi_major + self.semi_minor
    }

    /// Axis ratio `semi_minor / semi_major`, in (0, 1].
    #[inline]
    pub fn aspect(&self) -> f64 {
        self.semi_minor / self.semi_major
    }
}

/// A concentric pair of fitted ellipses sharing a center.
///
/// Immutable once built by the extractor; filters discard candidates, they
/// never modify them.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnnulusCandidate {
    /// Shared center estimate (midpoint of the two ellipse centers).
    pub center: Point2<f64>,
    pub inner: EllipseParams,
    pub outer: EllipseParams,
    /// Index of the inner-boundary contour in the extraction's contour table.
    pub inner_contour: usize,
    /// Index of the outer-boundary contour in the extraction's contour table.
    pub outer_contour: usize,
}

/// Ellipse fitting quality mode.
///
/// `Fast` fits from boundary second moments; `High` runs a direct
/// least-squares conic fit and applies stricter concentricity checks.
/// Quality affects only extraction precision, never which filters run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum Quality {
    Fast,
    #[default]
    High,
}

/// Physical layout of the printed board (not image geometry).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct GridModel {
    /// Center-to-center distance between adjacent markers, physical units.
    pub marker_spacing: f64,
    /// Outer circle diameter of one marker, same units.
    pub outer_circle_diameter: f64,
}

impl GridModel {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("marker_spacing", self.marker_spacing)?;
        require_positive("outer_circle_diameter", self.outer_circle_diameter)?;
        Ok(())
    }
}

/// Shape plausibility bounds for a single candidate.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ShapeFilterParams {
    /// Minimum axis ratio of either ellipse; rejects near-degenerate blobs.
    pub min_aspect: f64,
    /// Maximum inner/outer center offset as a fraction of the outer
    /// semi-major axis.
    pub max_center_offset: f64,
    /// Maximum absolute difference between inner and outer axis ratios.
    pub max_aspect_mismatch: f64,
}

impl Default for ShapeFilterParams {
    fn default() -> Self {
        Self {
            min_aspect: 0.2,
            max_center_offset: 0.25,
            max_aspect_mismatch: 0.35,
        }
    }
}

impl ShapeFilterParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("min_aspect", self.min_aspect)?;
        require_positive("max_center_offset", self.max_center_offset)?;
        require_positive("max_aspect_mismatch", self.max_aspect_mismatch)?;
        Ok(())
    }
}

/// Tunables of the lattice indexing and homography fit.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RegistrationParams {
    /// Relative half-width of the accepted neighbor-distance band around one
    /// marker spacing.
    pub spacing_tolerance: f64,
    /// Maximum lattice-step rounding residual, as a fraction of the local
    /// step length, accepted while propagating integer offsets.
    pub step_residual_frac: f64,
    /// Reprojection error above which a correspondence is dropped and the
    /// homography refit.
    pub max_residual_px: f64,
    /// Refit iteration budget; exceeding it is a fit-divergence failure.
    pub max_refit_iterations: usize,
    /// Minimum marker count to attempt (and to keep during refits).
    pub min_markers: usize,
}

impl Default for RegistrationParams {
    fn default() -> Self {
        Self {
            spacing_tolerance: 0.25,
            step_residual_frac: 0.35,
            max_residual_px: 1.5,
            max_refit_iterations: 8,
            min_markers: 4,
        }
    }
}

impl RegistrationParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_tolerance("spacing_tolerance", self.spacing_tolerance)?;
        require_positive("step_residual_frac", self.step_residual_frac)?;
        require_positive("max_residual_px", self.max_residual_px)?;
        if self.min_markers < 4 {
            return Err(ConfigError::NonPositive {
                name: "min_markers (>= 4)",
                value: self.min_markers as f64,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_model_rejects_non_positive_values() {
        let bad = GridModel {
            marker_spacing: 0.0,
            outer_circle_diameter: 0.02,
        };
        assert!(bad.validate().is_err());

        let bad = GridModel {
            marker_spacing: 0.03,
            outer_circle_diameter: -1.0,
        };
        assert!(bad.validate().is_err());

        let ok = GridModel {
            marker_spacing: 0.03,
            outer_circle_diameter: 0.02,
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn registration_params_require_min_markers() {
        let mut p = RegistrationParams::default();
        p.min_markers = 3;
        assert!(p.validate().is_err());
    }

    #[test]
    fn params_round_trip_through_json() {
        let p = RegistrationParams::default();
        let json = serde_json::to_string(&p).expect("serialize");
        let back: RegistrationParams = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(p.spacing_tolerance, back.spacing_tolerance);
        assert_eq!(p.min_markers, back.min_markers);
    }
}
