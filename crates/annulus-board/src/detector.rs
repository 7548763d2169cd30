//! Per-frame detection pipeline.
//!
//! Ties extraction, the filter chain, registration and the numbering decode
//! into one call. Configuration problems fail fast at construction; per
//! frame every outcome is a `FrameDetection` value, nothing is ever thrown
//! for a bad frame.

use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use annulus_board_core::{BinaryImageView, GrayImageView, GridCoords, Homography};

use crate::error::{require_positive, require_tolerance, ConfigError};
use crate::filters::{cross_ratio_filter, neighbor_filter, AnnulusDetection, AnnulusFilter};
use crate::numbering::{find_numbering, transformed_homography, NumberingCode, NumberingLayout};
use crate::registration::{Grid, GridFit};
use crate::types::{AnnulusCandidate, GridModel, Quality, RegistrationParams, ShapeFilterParams};

/// Full pipeline configuration.
///
/// Defaults match a board with 10 mm inner circles, 20 mm outer circles and
/// 30 mm marker spacing.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DetectorParams {
    pub grid: GridModel,
    /// Inner circle diameter, same physical units as the grid model.
    pub inner_circle_diameter: f64,
    /// Relative tolerance of the diameter-ratio filter.
    pub cross_ratio_tolerance: f64,
    pub quality: Quality,
    pub shape: ShapeFilterParams,
    pub registration: RegistrationParams,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            grid: GridModel {
                marker_spacing: 0.03,
                outer_circle_diameter: 0.02,
            },
            inner_circle_diameter: 0.01,
            cross_ratio_tolerance: 0.2,
            quality: Quality::High,
            shape: ShapeFilterParams::default(),
            registration: RegistrationParams::default(),
        }
    }
}

impl DetectorParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.grid.validate()?;
        self.shape.validate()?;
        self.registration.validate()?;
        require_positive("inner_circle_diameter", self.inner_circle_diameter)?;
        require_tolerance("cross_ratio_tolerance", self.cross_ratio_tolerance)?;
        if self.inner_circle_diameter >= self.grid.outer_circle_diameter {
            return Err(ConfigError::InnerNotSmaller {
                inner: self.inner_circle_diameter,
                outer: self.grid.outer_circle_diameter,
            });
        }
        Ok(())
    }
}

/// A registered grid with the candidates that produced it.
#[derive(Clone, Debug)]
pub struct GridDetection {
    /// Filter-chain survivors the registration ran on.
    pub candidates: Vec<AnnulusCandidate>,
    pub fit: GridFit,
    /// Decoded numbering when the orientation was verified.
    pub numbering: Option<NumberingCode>,
}

impl GridDetection {
    /// Whether the grid coordinates are in the canonical board frame.
    pub fn verified(&self) -> bool {
        self.numbering.is_some()
    }
}

/// Outcome of one frame. Per-frame failures are values, never errors.
#[derive(Clone, Debug)]
pub enum FrameDetection {
    /// No grid found; carries the candidate count after filtering for
    /// diagnostics.
    NoDetection { candidates_seen: usize },
    /// Grid registered, orientation unverified (numbering did not decode).
    Grid(GridDetection),
    /// Grid registered and re-oriented into the canonical board frame.
    NumberedGrid(GridDetection),
}

impl FrameDetection {
    pub fn grid(&self) -> Option<&GridDetection> {
        match self {
            FrameDetection::NoDetection { .. } => None,
            FrameDetection::Grid(g) | FrameDetection::NumberedGrid(g) => Some(g),
        }
    }
}

/// Configured frame detector: extraction, shape + cross-ratio + neighbor
/// filters, registration, numbering.
#[derive(Clone, Debug)]
pub struct AnnulusGridDetector {
    session: AnnulusDetection,
    grid: Grid,
    layout: NumberingLayout,
    quality: Quality,
}

impl AnnulusGridDetector {
    pub fn new(params: DetectorParams) -> Result<Self, ConfigError> {
        Self::with_layout(params, NumberingLayout::default())
    }

    pub fn with_layout(
        params: DetectorParams,
        layout: NumberingLayout,
    ) -> Result<Self, ConfigError> {
        params.validate()?;

        let mut session = AnnulusDetection::new();
        session
            .add_filter(AnnulusFilter::Shape(params.shape))
            .add_filter(cross_ratio_filter(
                params.inner_circle_diameter,
                params.grid.outer_circle_diameter,
                params.cross_ratio_tolerance,
            )?)
            .add_filter(neighbor_filter(
                params.grid.outer_circle_diameter,
                params.grid.marker_spacing,
            )?);

        let grid = Grid::with_params(params.grid, params.registration)?;

        Ok(Self {
            session,
            grid,
            layout,
            quality: params.quality,
        })
    }

    /// Run the full pipeline on one frame.
    pub fn detect(&self, gray: &GrayImageView<'_>, binary: &BinaryImageView<'_>) -> FrameDetection {
        let candidates = self.session.detect(gray, binary, self.quality);
        let candidates_seen = candidates.len();

        let Some(mut fit) = self.grid.find_grid(&candidates) else {
            debug!("frame: no grid ({candidates_seen} candidates after filtering)");
            return FrameDetection::NoDetection { candidates_seen };
        };

        match find_numbering(binary, &fit.homography, &fit.grid_coords, &self.layout) {
            Some(code) => {
                let Some((h, coords)) =
                    transformed_homography(&code, &fit.pixel_coords, &fit.grid_coords)
                else {
                    // decoded but the refit degenerated; report the
                    // unverified grid instead of guessing
                    return FrameDetection::Grid(GridDetection {
                        candidates,
                        fit,
                        numbering: None,
                    });
                };
                fit.homography = h;
                fit.grid_coords = coords;
                FrameDetection::NumberedGrid(GridDetection {
                    candidates,
                    fit,
                    numbering: Some(code),
                })
            }
            None => FrameDetection::Grid(GridDetection {
                candidates,
                fit,
                numbering: None,
            }),
        }
    }
}

/// Pixel corners of the unit cell centered on grid point `g`, in the order
/// `(-,-) (+,-) (+,+) (-,+)` relative to the point.
pub fn cell_corners(h: &Homography, g: GridCoords) -> [Point2<f64>; 4] {
    let (i, j) = (g.i as f64, g.j as f64);
    [
        h.apply(Point2::new(i - 0.5, j - 0.5)),
        h.apply(Point2::new(i + 0.5, j - 0.5)),
        h.apply(Point2::new(i + 0.5, j + 0.5)),
        h.apply(Point2::new(i - 0.5, j + 0.5)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3;

    #[test]
    fn default_params_validate() {
        assert!(DetectorParams::default().validate().is_ok());
        assert!(AnnulusGridDetector::new(DetectorParams::default()).is_ok());
    }

    #[test]
    fn malformed_params_fail_at_construction() {
        let mut p = DetectorParams::default();
        p.inner_circle_diameter = 0.05; // larger than the outer circle
        assert!(AnnulusGridDetector::new(p).is_err());

        let mut p = DetectorParams::default();
        p.grid.marker_spacing = -0.03;
        assert!(AnnulusGridDetector::new(p).is_err());

        let mut p = DetectorParams::default();
        p.cross_ratio_tolerance = -0.1;
        assert!(AnnulusGridDetector::new(p).is_err());
    }

    #[test]
    fn empty_frame_reports_no_detection() {
        let detector = AnnulusGridDetector::new(DetectorParams::default()).expect("detector");
        let data = vec![0u8; 32 * 32];
        let gray = GrayImageView {
            width: 32,
            height: 32,
            data: &data,
        };
        let mask = BinaryImageView {
            width: 32,
            height: 32,
            data: &data,
        };
        match detector.detect(&gray, &mask) {
            FrameDetection::NoDetection { candidates_seen } => assert_eq!(candidates_seen, 0),
            other => panic!("expected NoDetection, got {other:?}"),
        }
    }

    #[test]
    fn cell_corners_map_the_unit_square() {
        let h = Homography::new(Matrix3::new(
            10.0, 0.0, 100.0, //
            0.0, 10.0, 50.0, //
            0.0, 0.0, 1.0,
        ));
        let corners = cell_corners(&h, GridCoords::new(2, 1));
        assert!((corners[0].x - 115.0).abs() < 1e-9);
        assert!((corners[0].y - 55.0).abs() < 1e-9);
        assert!((corners[2].x - 125.0).abs() < 1e-9);
        assert!((corners[2].y - 65.0).abs() < 1e-9);
    }
}
