//! Candidate filter chain.
//!
//! The filter set is small and fixed, so filters are a closed enum behind a
//! single `apply` entry point rather than a trait object. Per-candidate
//! filters are order-independent; the neighbor filter works on the whole
//! surviving set and is normally registered last.

use log::debug;

use annulus_board_core::{BinaryImageView, GrayImageView};

use crate::error::{require_positive, require_tolerance, ConfigError};
use crate::extract::extract_annuli;
use crate::types::{AnnulusCandidate, Quality, ShapeFilterParams};

/// One configured plausibility filter.
#[derive(Clone, Debug)]
pub enum AnnulusFilter {
    /// Per-candidate shape bounds (axis ratio, concentricity).
    Shape(ShapeFilterParams),
    /// Per-candidate diameter-ratio invariant check.
    CrossRatio {
        inner_circle_diameter: f64,
        outer_circle_diameter: f64,
        /// Relative deviation band around the expected ratio.
        tolerance: f64,
    },
    /// Set-level lattice-spacing consistency check.
    Neighbor {
        outer_circle_diameter: f64,
        marker_spacing: f64,
        /// Relative half-width of the accepted distance band.
        band_tolerance: f64,
    },
}

/// Shape filter with default bounds.
pub fn shape_filter() -> AnnulusFilter {
    AnnulusFilter::Shape(ShapeFilterParams::default())
}

/// Cross-ratio filter for the given physical marker diameters.
///
/// The outer/inner diameter ratio of concentric circles is preserved (to
/// first order) under any projective view of the board, so the observed
/// ellipse size ratio must match `outer / inner` within `tolerance`.
pub fn cross_ratio_filter(
    inner_circle_diameter: f64,
    outer_circle_diameter: f64,
    tolerance: f64,
) -> Result<AnnulusFilter, ConfigError> {
    require_positive("inner_circle_diameter", inner_circle_diameter)?;
    require_positive("outer_circle_diameter", outer_circle_diameter)?;
    require_tolerance("tolerance", tolerance)?;
    if inner_circle_diameter >= outer_circle_diameter {
        return Err(ConfigError::InnerNotSmaller {
            inner: inner_circle_diameter,
            outer: outer_circle_diameter,
        });
    }
    Ok(AnnulusFilter::CrossRatio {
        inner_circle_diameter,
        outer_circle_diameter,
        tolerance,
    })
}

/// Neighbor filter: drops candidates with no other candidate at a plausible
/// one-spacing distance. True grid markers form a lattice; isolated false
/// positives rarely have a correctly spaced neighbor.
pub fn neighbor_filter(
    outer_circle_diameter: f64,
    marker_spacing: f64,
) -> Result<AnnulusFilter, ConfigError> {
    neighbor_filter_with_band(outer_circle_diameter, marker_spacing, 0.3)
}

/// Neighbor filter with an explicit relative distance band.
pub fn neighbor_filter_with_band(
    outer_circle_diameter: f64,
    marker_spacing: f64,
    band_tolerance: f64,
) -> Result<AnnulusFilter, ConfigError> {
    require_positive("outer_circle_diameter", outer_circle_diameter)?;
    require_positive("marker_spacing", marker_spacing)?;
    require_tolerance("band_tolerance", band_tolerance)?;
    Ok(AnnulusFilter::Neighbor {
        outer_circle_diameter,
        marker_spacing,
        band_tolerance,
    })
}

/// Expected pixel distance to a lattice neighbor, from the candidate's own
/// outer-ellipse size as the local image-scale estimate.
pub(crate) fn expected_step_px(
    c: &AnnulusCandidate,
    outer_circle_diameter: f64,
    marker_spacing: f64,
) -> f64 {
    // mean_diameter is the full image diameter of the outer circle, so
    // mean_diameter / outer_circle_diameter is the local px-per-unit scale
    marker_spacing * c.outer.mean_diameter() / outer_circle_diameter
}

impl AnnulusFilter {
    /// Run the filter, returning the surviving subset in input order.
    pub fn apply(&self, candidates: Vec<AnnulusCandidate>) -> Vec<AnnulusCandidate> {
        match self {
            AnnulusFilter::Shape(params) => candidates
                .into_iter()
                .filter(|c| keeps_shape(c, params))
                .collect(),
            AnnulusFilter::CrossRatio {
                inner_circle_diameter,
                outer_circle_diameter,
                tolerance,
            } => {
                let expected = outer_circle_diameter / inner_circle_diameter;
                candidates
                    .into_iter()
                    .filter(|c| {
                        let observed = c.outer.mean_diameter() / c.inner.mean_diameter();
                        (observed / expected - 1.0).abs() <= *tolerance
                    })
                    .collect()
            }
            AnnulusFilter::Neighbor {
                outer_circle_diameter,
                marker_spacing,
                band_tolerance,
            } => {
                let steps: Vec<f64> = candidates
                    .iter()
                    .map(|c| expected_step_px(c, *outer_circle_diameter, *marker_spacing))
                    .collect();
                let keep: Vec<bool> = candidates
                    .iter()
                    .enumerate()
                    .map(|(k, c)| {
                        candidates.iter().enumerate().any(|(l, other)| {
                            if l == k {
                                return false;
                            }
                            let step = 0.5 * (steps[k] + steps[l]);
                            let d = ((c.center.x - other.center.x).powi(2)
                                + (c.center.y - other.center.y).powi(2))
                            .sqrt();
                            (d - step).abs() <= band_tolerance * step
                        })
                    })
                    .collect();
                candidates
                    .into_iter()
                    .zip(keep)
                    .filter_map(|(c, k)| k.then_some(c))
                    .collect()
            }
        }
    }
}

fn keeps_shape(c: &AnnulusCandidate, params: &ShapeFilterParams) -> bool {
    if c.inner.aspect() < params.min_aspect || c.outer.aspect() < params.min_aspect {
        return false;
    }
    if (c.inner.aspect() - c.outer.aspect()).abs() > params.max_aspect_mismatch {
        return false;
    }
    let offset = ((c.inner.center.x - c.outer.center.x).powi(2)
        + (c.inner.center.y - c.outer.center.y).powi(2))
    .sqrt();
    offset <= params.max_center_offset * c.outer.semi_major
}

/// A detection session: candidate extraction followed by an ordered chain
/// of filters. Filters run strictly in registration order; each sees only
/// the survivors of the previous one.
#[derive(Clone, Debug, Default)]
pub struct AnnulusDetection {
    filters: Vec<AnnulusFilter>,
}

impl AnnulusDetection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter to the chain.
    pub fn add_filter(&mut self, filter: AnnulusFilter) -> &mut Self {
        self.filters.push(filter);
        self
    }

    pub fn filters(&self) -> &[AnnulusFilter] {
        &self.filters
    }

    /// Extract candidates and run the filter chain.
    pub fn detect(
        &self,
        gray: &GrayImageView<'_>,
        mask: &BinaryImageView<'_>,
        quality: Quality,
    ) -> Vec<AnnulusCandidate> {
        let mut candidates = extract_annuli(gray, mask, quality).candidates;
        for (k, filter) in self.filters.iter().enumerate() {
            let before = candidates.len();
            candidates = filter.apply(candidates);
            debug!("filter {k}: {before} -> {} candidates", candidates.len());
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EllipseParams;
    use nalgebra::Point2;

    pub(crate) fn synthetic_candidate(x: f64, y: f64, r_outer: f64, ratio: f64) -> AnnulusCandidate {
        let outer = EllipseParams {
            center: Point2::new(x, y),
            semi_major: r_outer,
            semi_minor: r_outer,
            angle: 0.0,
        };
        let inner = EllipseParams {
            center: Point2::new(x, y),
            semi_major: r_outer / ratio,
            semi_minor: r_outer / ratio,
            angle: 0.0,
        };
        AnnulusCandidate {
            center: Point2::new(x, y),
            inner,
            outer,
            inner_contour: 0,
            outer_contour: 1,
        }
    }

    #[test]
    fn cross_ratio_exact_match_passes_at_zero_tolerance() {
        let f = cross_ratio_filter(0.01, 0.02, 0.0).expect("filter");
        let c = synthetic_candidate(10.0, 10.0, 20.0, 2.0);
        assert_eq!(f.apply(vec![c]).len(), 1);
    }

    #[test]
    fn cross_ratio_rejects_perturbed_ratio() {
        let f = cross_ratio_filter(0.01, 0.02, 0.1).expect("filter");
        let inside = synthetic_candidate(0.0, 0.0, 20.0, 2.0 * 1.05);
        let outside = synthetic_candidate(0.0, 0.0, 20.0, 2.0 * 1.2);
        let way_off = synthetic_candidate(0.0, 0.0, 20.0, 6.0);
        let kept = f.apply(vec![inside, outside, way_off]);
        assert_eq!(kept.len(), 1);
        assert!((kept[0].inner.semi_major - 20.0 / 2.1).abs() < 1e-9);
    }

    #[test]
    fn cross_ratio_rejects_malformed_config() {
        assert!(cross_ratio_filter(0.02, 0.01, 0.1).is_err());
        assert!(cross_ratio_filter(-0.01, 0.02, 0.1).is_err());
        assert!(cross_ratio_filter(0.01, 0.02, -0.5).is_err());
    }

    #[test]
    fn neighbor_filter_drops_isolated_candidates() {
        // outer diameter 0.02, spacing 0.03, outer full diameter 40 px
        // -> expected step = 0.03 * 40 / 0.02 = 60 px
        let f = neighbor_filter(0.02, 0.03).expect("filter");
        let step = 60.0;
        let a = synthetic_candidate(0.0, 0.0, 20.0, 2.0);
        let b = synthetic_candidate(step, 0.0, 20.0, 2.0);
        let lonely = synthetic_candidate(500.0, 500.0, 20.0, 2.0);
        let kept = f.apply(vec![a, b, lonely]);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|c| c.center.x < 400.0));
    }

    #[test]
    fn neighbor_filter_is_monotonic_in_neighbor_count() {
        let f = neighbor_filter(0.02, 0.03).expect("filter");
        let step = expected_step_px(&synthetic_candidate(0.0, 0.0, 20.0, 2.0), 0.02, 0.03);

        let base = vec![
            synthetic_candidate(0.0, 0.0, 20.0, 2.0),
            synthetic_candidate(step, 0.0, 20.0, 2.0),
        ];
        let kept_base = f.apply(base.clone());
        assert_eq!(kept_base.len(), 2);

        // adding more correctly spaced neighbors never causes rejection
        let mut more = base;
        more.push(synthetic_candidate(0.0, step, 20.0, 2.0));
        more.push(synthetic_candidate(step, step, 20.0, 2.0));
        let kept_more = f.apply(more);
        assert_eq!(kept_more.len(), 4);
    }

    #[test]
    fn shape_filter_rejects_offset_inner_center() {
        let f = shape_filter();
        let good = synthetic_candidate(0.0, 0.0, 20.0, 2.0);
        let mut bad = synthetic_candidate(100.0, 0.0, 20.0, 2.0);
        bad.inner.center = Point2::new(108.0, 0.0); // 40 % of outer semi-major
        let kept = f.apply(vec![good, bad]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].center.x, 0.0);
    }

    #[test]
    fn shape_filter_rejects_degenerate_aspect() {
        let f = shape_filter();
        let mut flat = synthetic_candidate(0.0, 0.0, 20.0, 2.0);
        flat.outer.semi_minor = 2.0; // aspect 0.1
        assert!(f.apply(vec![flat]).is_empty());
    }

    #[test]
    fn chain_runs_filters_in_order() {
        let mut session = AnnulusDetection::new();
        session
            .add_filter(shape_filter())
            .add_filter(cross_ratio_filter(0.01, 0.02, 0.2).expect("filter"))
            .add_filter(neighbor_filter(0.02, 0.03).expect("filter"));
        assert_eq!(session.filters().len(), 3);
    }
}
