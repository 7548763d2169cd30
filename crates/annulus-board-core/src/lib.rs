//! Core geometry for annulus-board detection.
//!
//! This crate is intentionally small and purely geometric. It does *not*
//! depend on any concrete blob extractor or image container: images are
//! borrowed row-major byte slices.

mod coords;
mod homography;
mod image;
mod logger;

pub use coords::{Dihedral, GridAlignment, GridCoords, DIHEDRAL_ELEMENTS};
pub use homography::{estimate_homography, reprojection_errors, rms_error, Homography};
pub use image::{sample_bilinear, BinaryImageView, GrayImageView, MaskCoverage};
pub use logger::init_with_level;
