//! Annulus calibration-board detector.
//!
//! The board is a square lattice of concentric-ring markers with an
//! asymmetric pattern of code dots between them. Detection runs in stages:
//!
//! - extract annulus candidates from a binarized frame,
//! - thin them with shape, diameter-ratio and neighbor-spacing filters,
//! - register the surviving markers on an integer lattice and fit a
//!   grid-to-pixel homography,
//! - decode the code dots to resolve the lattice orientation and refit.
//!
//! [`AnnulusGridDetector`] runs the whole pipeline per frame; the stage
//! APIs ([`extract_annuli`], [`AnnulusDetection`], [`Grid`],
//! [`find_numbering`]) are public for callers that need partial results.
//! Configuration errors fail fast at construction; a bad frame is never an
//! error, only a [`FrameDetection`] value.

pub mod detector;
pub mod error;
pub mod extract;
pub mod filters;
pub mod fit;
pub mod numbering;
pub mod registration;
pub mod types;

pub use annulus_board_core::{
    estimate_homography, init_with_level, rms_error, sample_bilinear, BinaryImageView, Dihedral,
    GrayImageView, GridAlignment, GridCoords, Homography, MaskCoverage, DIHEDRAL_ELEMENTS,
};

pub use detector::{
    cell_corners, AnnulusGridDetector, DetectorParams, FrameDetection, GridDetection,
};
pub use error::ConfigError;
pub use extract::{extract_annuli, Extraction};
pub use filters::{
    cross_ratio_filter, neighbor_filter, neighbor_filter_with_band, shape_filter,
    AnnulusDetection, AnnulusFilter,
};
pub use fit::{fit_ellipse_conic, fit_ellipse_moments};
pub use numbering::{
    find_numbering, transformed_homography, NumberingCode, NumberingLayout,
};
pub use registration::{Grid, GridFit};
pub use types::{
    AnnulusCandidate, EllipseParams, GridModel, Quality, RegistrationParams, ShapeFilterParams,
};
