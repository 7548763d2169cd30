//! Annulus candidate extraction from a binarized image.
//!
//! Foreground blobs are labeled, blobs enclosing exactly one hole are kept,
//! and an ellipse is fit to the outer and the hole boundary. A candidate is
//! formed only when the two fits nest concentrically.

use log::{debug, warn};
use nalgebra::Point2;

use annulus_board_core::{BinaryImageView, GrayImageView, MaskCoverage};

use crate::fit::{fit_ellipse_conic, fit_ellipse_moments};
use crate::types::{AnnulusCandidate, EllipseParams, Quality};

/// Extraction output: candidates plus the contour table their
/// `inner_contour` / `outer_contour` indices refer to.
#[derive(Clone, Debug, Default)]
pub struct Extraction {
    pub candidates: Vec<AnnulusCandidate>,
    pub contours: Vec<Vec<Point2<f64>>>,
}

const MIN_CONTOUR_POINTS: usize = 8;

// Relative inner/outer center agreement per quality mode
const CENTER_TOL_FAST: f64 = 0.25;
const CENTER_TOL_HIGH: f64 = 0.12;

/// Extract annulus candidates from a gray image and its binary mask.
///
/// Degenerate inputs (mismatched dimensions, all-foreground or
/// all-background mask) yield an empty extraction, never an error.
pub fn extract_annuli(
    gray: &GrayImageView<'_>,
    mask: &BinaryImageView<'_>,
    quality: Quality,
) -> Extraction {
    if gray.width != mask.width || gray.height != mask.height {
        warn!(
            "gray {}x{} and mask {}x{} dimensions differ; skipping frame",
            gray.width, gray.height, mask.width, mask.height
        );
        return Extraction::default();
    }
    if mask.width == 0 || mask.height == 0 || mask.coverage() != MaskCoverage::Mixed {
        return Extraction::default();
    }

    let labels = label_regions(mask);
    let holes = assign_holes(mask, &labels);

    let fit: fn(&[Point2<f64>]) -> Option<EllipseParams> = match quality {
        Quality::Fast => fit_ellipse_moments,
        Quality::High => fit_ellipse_conic,
    };
    let center_tol = match quality {
        Quality::Fast => CENTER_TOL_FAST,
        Quality::High => CENTER_TOL_HIGH,
    };

    let mut out = Extraction::default();

    for (fg, hole) in holes {
        let (outer_pts, inner_pts) = trace_boundaries(mask, &labels, fg, hole);
        if outer_pts.len() < MIN_CONTOUR_POINTS || inner_pts.len() < MIN_CONTOUR_POINTS {
            continue;
        }

        let Some(outer) = fit(&outer_pts) else {
            continue;
        };
        let Some(inner) = fit(&inner_pts) else {
            continue;
        };

        if inner.semi_major >= outer.semi_major {
            continue;
        }
        let offset = ((inner.center.x - outer.center.x).powi(2)
            + (inner.center.y - outer.center.y).powi(2))
        .sqrt();
        if offset > center_tol * outer.semi_major {
            continue;
        }

        let outer_contour = out.contours.len();
        out.contours.push(outer_pts);
        let inner_contour = out.contours.len();
        out.contours.push(inner_pts);

        out.candidates.push(AnnulusCandidate {
            center: Point2::new(
                0.5 * (inner.center.x + outer.center.x),
                0.5 * (inner.center.y + outer.center.y),
            ),
            inner,
            outer,
            inner_contour,
            outer_contour,
        });
    }

    debug!(
        "extracted {} annulus candidates ({:?})",
        out.candidates.len(),
        quality
    );
    out
}

struct RegionLabels {
    width: i32,
    height: i32,
    /// Foreground component id per pixel, -1 for background.
    fg: Vec<i32>,
    /// Background region id per pixel, -1 for foreground.
    bg: Vec<i32>,
    /// Background regions touching the image border ("outside" regions).
    bg_touches_border: Vec<bool>,
}

impl RegionLabels {
    #[inline]
    fn idx(&self, x: i32, y: i32) -> usize {
        (y * self.width + x) as usize
    }

    #[inline]
    fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.width && y < self.height
    }
}

const N4: [(i32, i32); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
const N8: [(i32, i32); 8] = [
    (1, 0),
    (-1, 0),
    (0, 1),
    (0, -1),
    (1, 1),
    (1, -1),
    (-1, 1),
    (-1, -1),
];

/// Label foreground components (8-connected) and background regions
/// (4-connected). The complementary connectivities keep a diagonal chain of
/// ink from leaking a hole to the outside.
fn label_regions(mask: &BinaryImageView<'_>) -> RegionLabels {
    let w = mask.width as i32;
    let h = mask.height as i32;
    let mut labels = RegionLabels {
        width: w,
        height: h,
        fg: vec![-1; (w * h) as usize],
        bg: vec![-1; (w * h) as usize],
        bg_touches_border: Vec::new(),
    };

    let mut stack: Vec<(i32, i32)> = Vec::new();
    let mut next_fg = 0;
    let mut next_bg = 0;

    for y in 0..h {
        for x in 0..w {
            let idx = labels.idx(x, y);
            if mask.is_set(x, y) {
                if labels.fg[idx] >= 0 {
                    continue;
                }
                let id = next_fg;
                next_fg += 1;
                stack.push((x, y));
                labels.fg[idx] = id;
                while let Some((cx, cy)) = stack.pop() {
                    for (dx, dy) in N8 {
                        let (nx, ny) = (cx + dx, cy + dy);
                        if !labels.in_bounds(nx, ny) || !mask.is_set(nx, ny) {
                            continue;
                        }
                        let nidx = labels.idx(nx, ny);
                        if labels.fg[nidx] < 0 {
                            labels.fg[nidx] = id;
                            stack.push((nx, ny));
                        }
                    }
                }
            } else {
                if labels.bg[idx] >= 0 {
                    continue;
                }
                let id = next_bg;
                next_bg += 1;
                labels.bg_touches_border.push(false);
                stack.push((x, y));
                labels.bg[idx] = id;
                while let Some((cx, cy)) = stack.pop() {
                    if cx == 0 || cy == 0 || cx == w - 1 || cy == h - 1 {
                        labels.bg_touches_border[id as usize] = true;
                    }
                    for (dx, dy) in N4 {
                        let (nx, ny) = (cx + dx, cy + dy);
                        if !labels.in_bounds(nx, ny) || mask.is_set(nx, ny) {
                            continue;
                        }
                        let nidx = labels.idx(nx, ny);
                        if labels.bg[nidx] < 0 {
                            labels.bg[nidx] = id;
                            stack.push((nx, ny));
                        }
                    }
                }
            }
        }
    }

    labels
}

/// Pair each foreground component with its hole, keeping only components
/// that enclose exactly one valid hole. Returns `(fg_id, bg_hole_id)` pairs.
fn assign_holes(mask: &BinaryImageView<'_>, labels: &RegionLabels) -> Vec<(i32, i32)> {
    // Owner of each enclosed background region: -1 unknown, -2 invalid
    // (bordered by more than one component, i.e. merged blobs).
    let mut owner = vec![-1i32; labels.bg_touches_border.len()];

    for y in 0..labels.height {
        for x in 0..labels.width {
            let idx = labels.idx(x, y);
            let bg = labels.bg[idx];
            if bg < 0 || labels.bg_touches_border[bg as usize] {
                continue;
            }
            for (dx, dy) in N4 {
                let (nx, ny) = (x + dx, y + dy);
                if !labels.in_bounds(nx, ny) || !mask.is_set(nx, ny) {
                    continue;
                }
                let fg = labels.fg[labels.idx(nx, ny)];
                let o = &mut owner[bg as usize];
                if *o == -1 {
                    *o = fg;
                } else if *o != fg {
                    *o = -2;
                }
            }
        }
    }

    // Count holes per component; exactly one makes an annulus shape
    let n_fg = labels.fg.iter().copied().max().unwrap_or(-1) + 1;
    let mut hole_count = vec![0usize; n_fg as usize];
    let mut hole_id = vec![-1i32; n_fg as usize];
    for (bg, &o) in owner.iter().enumerate() {
        if o >= 0 {
            hole_count[o as usize] += 1;
            hole_id[o as usize] = bg as i32;
        }
    }

    (0..n_fg)
        .filter(|&fg| hole_count[fg as usize] == 1)
        .map(|fg| (fg, hole_id[fg as usize]))
        .collect()
}

/// Collect outer-boundary and hole-boundary pixel centers of one component.
fn trace_boundaries(
    mask: &BinaryImageView<'_>,
    labels: &RegionLabels,
    fg: i32,
    hole: i32,
) -> (Vec<Point2<f64>>, Vec<Point2<f64>>) {
    let mut outer = Vec::new();
    let mut inner = Vec::new();

    for y in 0..labels.height {
        for x in 0..labels.width {
            if labels.fg[labels.idx(x, y)] != fg {
                continue;
            }
            let mut on_outer = false;
            let mut on_inner = false;
            for (dx, dy) in N4 {
                let (nx, ny) = (x + dx, y + dy);
                if !labels.in_bounds(nx, ny) {
                    on_outer = true;
                    continue;
                }
                if mask.is_set(nx, ny) {
                    continue;
                }
                let bg = labels.bg[labels.idx(nx, ny)];
                if bg == hole {
                    on_inner = true;
                } else if labels.bg_touches_border[bg as usize] {
                    on_outer = true;
                } else {
                    // boundary of some other enclosed region; not possible
                    // for single-hole components, but harmless to skip
                }
            }
            let p = Point2::new(x as f64 + 0.5, y as f64 + 0.5);
            if on_outer {
                outer.push(p);
            }
            if on_inner {
                inner.push(p);
            }
        }
    }

    (outer, inner)
}
