//! Board numbering decode and homography re-orientation.
//!
//! Registration yields lattice coordinates only up to a D4 symmetry and a
//! translation. The board resolves the ambiguity with an asymmetric pattern
//! of filled code dots printed at interstitial cell centers; decoding that
//! pattern produces the alignment into the canonical board frame, and the
//! homography is refit against the re-labeled coordinates.

use log::debug;
use nalgebra::Point2;

use annulus_board_core::{
    estimate_homography, BinaryImageView, Dihedral, GridAlignment, GridCoords, Homography,
    DIHEDRAL_ELEMENTS,
};

use crate::error::ConfigError;

/// Canonical code-dot layout, as interstitial cell coordinates.
///
/// Cell `(i, j)` is the square between markers `(i, j)` and `(i+1, j+1)`;
/// its center sits at grid position `(i + 0.5, j + 0.5)`. Cells are stored
/// normalized so the minimum `i` and `j` are 0.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NumberingLayout {
    cells: Vec<GridCoords>,
}

impl NumberingLayout {
    pub fn new(mut cells: Vec<GridCoords>) -> Result<Self, ConfigError> {
        if cells.is_empty() {
            return Err(ConfigError::EmptyNumberingLayout);
        }
        normalize_cells(&mut cells);
        Ok(Self { cells })
    }

    pub fn cells(&self) -> &[GridCoords] {
        &self.cells
    }
}

impl Default for NumberingLayout {
    /// An L-tetromino of code dots. It has no nontrivial D4 symmetry, so a
    /// decoded match pins the orientation uniquely.
    fn default() -> Self {
        Self {
            cells: vec![
                GridCoords::new(0, 0),
                GridCoords::new(1, 0),
                GridCoords::new(2, 0),
                GridCoords::new(0, 1),
            ],
        }
    }
}

/// Decoded numbering: the lit interstitial cells in the detected frame and
/// the alignment mapping detected lattice coordinates into the canonical
/// board frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NumberingCode {
    pub lit_cells: Vec<GridCoords>,
    pub alignment: GridAlignment,
}

/// Decode the code-dot pattern of a registered lattice.
///
/// Samples the binary mask through `h` at every interstitial site inside the
/// lattice's bounding box and matches the lit set against `layout` under the
/// eight D4 transforms. `None` when the lit count is wrong, no transform
/// matches, or more than one does.
pub fn find_numbering(
    binary: &BinaryImageView<'_>,
    h: &Homography,
    grid_coords: &[GridCoords],
    layout: &NumberingLayout,
) -> Option<NumberingCode> {
    let (min_i, max_i, min_j, max_j) = bounding_box(grid_coords)?;
    if max_i == min_i || max_j == min_j {
        return None; // a single row or column has no interstitial cells
    }

    let mut lit: Vec<GridCoords> = Vec::new();
    for i in min_i..max_i {
        for j in min_j..max_j {
            let p = h.apply(Point2::new(i as f64 + 0.5, j as f64 + 0.5));
            if binary.is_set(p.x.round() as i32, p.y.round() as i32) {
                lit.push(GridCoords::new(i, j));
            }
        }
    }

    if lit.len() != layout.cells.len() {
        debug!(
            "numbering: {} lit cells, layout has {}",
            lit.len(),
            layout.cells.len()
        );
        return None;
    }

    let mut matched: Option<GridAlignment> = None;
    for transform in DIHEDRAL_ELEMENTS {
        if let Some(alignment) = match_under_transform(&lit, &layout.cells, transform) {
            if matched.is_some() {
                debug!("numbering: ambiguous decode, layout is symmetric under {transform:?}");
                return None;
            }
            matched = Some(alignment);
        }
    }

    matched.map(|alignment| {
        debug!(
            "numbering: decoded, transform {:?}, translation {:?}",
            alignment.transform, alignment.translation
        );
        NumberingCode {
            lit_cells: lit,
            alignment,
        }
    })
}

/// Refit the homography after re-labeling every grid coordinate through the
/// decoded alignment. The pixel points are unchanged; the returned
/// coordinate list is index-aligned with them.
pub fn transformed_homography(
    code: &NumberingCode,
    pixel_coords: &[Point2<f64>],
    grid_coords: &[GridCoords],
) -> Option<(Homography, Vec<GridCoords>)> {
    if pixel_coords.len() != grid_coords.len() {
        return None;
    }
    let mapped: Vec<GridCoords> = grid_coords.iter().map(|&g| code.alignment.map(g)).collect();
    let grid_pts: Vec<Point2<f64>> = mapped
        .iter()
        .map(|g| Point2::new(g.i as f64, g.j as f64))
        .collect();
    let h = estimate_homography(&grid_pts, pixel_coords)?;
    Some((h, mapped))
}

/// Try one D4 transform: a marker-frame alignment `g -> T g + t` acts on
/// interstitial cells as `c -> T c + corr(T) + t`, where `corr` absorbs the
/// half-cell offset between a cell index and its center. The translation is
/// forced by aligning bounding-box minima, so the check is set equality.
fn match_under_transform(
    lit: &[GridCoords],
    canonical: &[GridCoords],
    transform: Dihedral,
) -> Option<GridAlignment> {
    let corr = cell_correction(transform);
    let mut mapped: Vec<GridCoords> = lit
        .iter()
        .map(|&c| {
            let t = transform.apply(c);
            GridCoords::new(t.i + corr[0], t.j + corr[1])
        })
        .collect();
    let shift = normalize_cells(&mut mapped);

    let mut canon = canonical.to_vec();
    canon.sort_unstable_by_key(|g| (g.i, g.j));
    if mapped != canon {
        return None;
    }

    // canonical = T(lit) + corr + t, so t is the normalization shift minus
    // the correction already applied
    Some(GridAlignment {
        transform,
        translation: [shift[0], shift[1]],
    })
}

/// Cell-index correction for a D4 transform.
///
/// `T (c + (0.5, 0.5))` has components `T c` plus half the row sums of `T`'s
/// matrix; the transformed cell index is that center minus `(0.5, 0.5)`,
/// which works out to `T c` per component when the row sum is `+1` and
/// `T c - 1` when it is `-1`.
fn cell_correction(transform: Dihedral) -> [i32; 2] {
    let [a, b, c, d] = transform.matrix();
    [(a + b - 1) / 2, (c + d - 1) / 2]
}

/// Sort and shift cells so the minimum `i` and `j` are 0; returns the
/// applied shift `(-min_i, -min_j)`.
fn normalize_cells(cells: &mut [GridCoords]) -> [i32; 2] {
    let min_i = cells.iter().map(|g| g.i).min().unwrap_or(0);
    let min_j = cells.iter().map(|g| g.j).min().unwrap_or(0);
    for g in cells.iter_mut() {
        g.i -= min_i;
        g.j -= min_j;
    }
    cells.sort_unstable_by_key(|g| (g.i, g.j));
    [-min_i, -min_j]
}

fn bounding_box(coords: &[GridCoords]) -> Option<(i32, i32, i32, i32)> {
    let min_i = coords.iter().map(|g| g.i).min()?;
    let max_i = coords.iter().map(|g| g.i).max()?;
    let min_j = coords.iter().map(|g| g.j).min()?;
    let max_j = coords.iter().map(|g| g.j).max()?;
    Some((min_i, max_i, min_j, max_j))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3;

    const W: usize = 400;
    const H: usize = 400;

    fn grid_coords(ni: i32, nj: i32) -> Vec<GridCoords> {
        (0..ni)
            .flat_map(|i| (0..nj).map(move |j| GridCoords::new(i, j)))
            .collect()
    }

    fn image_homography() -> Homography {
        Homography::new(Matrix3::new(
            50.0, 0.0, 200.0, //
            0.0, 50.0, 200.0, //
            0.0, 0.0, 1.0,
        ))
    }

    /// Mask with a code dot at the center of each given detected-frame cell.
    fn render_dots(h: &Homography, cells: &[GridCoords]) -> Vec<u8> {
        let mut data = vec![0u8; W * H];
        for c in cells {
            let p = h.apply(Point2::new(c.i as f64 + 0.5, c.j as f64 + 0.5));
            let (x, y) = (p.x.round() as i32, p.y.round() as i32);
            for dy in -2..=2 {
                for dx in -2..=2 {
                    let (px, py) = (x + dx, y + dy);
                    if px >= 0 && py >= 0 && (px as usize) < W && (py as usize) < H {
                        data[py as usize * W + px as usize] = 255;
                    }
                }
            }
        }
        data
    }

    /// Detected-frame cell whose image under `alignment` is the canonical
    /// cell `canon`.
    fn detected_cell(alignment: &GridAlignment, canon: GridCoords) -> GridCoords {
        let inv = alignment.inverse();
        let corr = cell_correction(inv.transform);
        let g = inv.map(canon);
        // the inverse alignment acts on cells with its own correction
        GridCoords::new(g.i + corr[0], g.j + corr[1])
    }

    fn decode_with_alignment(expected: GridAlignment) {
        let layout = NumberingLayout::default();
        let h = image_homography();

        let detected: Vec<GridCoords> = layout
            .cells()
            .iter()
            .map(|&c| detected_cell(&expected, c))
            .collect();
        let data = render_dots(&h, &detected);
        let mask = BinaryImageView {
            width: W,
            height: H,
            data: &data,
        };

        // markers -3..=3 scan cells -3..=2 in either axis, enough to cover
        // the detected cell positions under every alignment used here
        let coords: Vec<GridCoords> = grid_coords(7, 7)
            .into_iter()
            .map(|g| GridCoords::new(g.i - 3, g.j - 3))
            .collect();

        let code = find_numbering(&mask, &h, &coords, &layout).expect("decode");
        assert_eq!(code.alignment.transform, expected.transform);
        assert_eq!(code.alignment.translation, expected.translation);
    }

    #[test]
    fn decodes_identity_alignment() {
        decode_with_alignment(GridAlignment::IDENTITY);
    }

    #[test]
    fn decodes_quarter_turn_alignment() {
        decode_with_alignment(GridAlignment {
            transform: Dihedral::R90,
            translation: [1, 0],
        });
    }

    #[test]
    fn decodes_transposed_alignment() {
        decode_with_alignment(GridAlignment {
            transform: Dihedral::Transpose,
            translation: [0, 1],
        });
    }

    #[test]
    fn wrong_dot_count_fails() {
        let layout = NumberingLayout::default();
        let h = image_homography();

        let mut cells = layout.cells().to_vec();
        cells.push(GridCoords::new(2, 2)); // stray blob reads as a fifth dot
        let data = render_dots(&h, &cells);
        let mask = BinaryImageView {
            width: W,
            height: H,
            data: &data,
        };

        assert!(find_numbering(&mask, &h, &grid_coords(5, 5), &layout).is_none());
    }

    #[test]
    fn symmetric_layout_is_ambiguous() {
        // a single dot matches under every transform
        let layout = NumberingLayout::new(vec![GridCoords::new(0, 0)]).expect("layout");
        let h = image_homography();
        let data = render_dots(&h, &[GridCoords::new(1, 1)]);
        let mask = BinaryImageView {
            width: W,
            height: H,
            data: &data,
        };

        assert!(find_numbering(&mask, &h, &grid_coords(4, 4), &layout).is_none());
    }

    #[test]
    fn single_row_has_no_cells() {
        let layout = NumberingLayout::default();
        let h = image_homography();
        let data = vec![0u8; W * H];
        let mask = BinaryImageView {
            width: W,
            height: H,
            data: &data,
        };
        let row: Vec<GridCoords> = (0..5).map(|i| GridCoords::new(i, 0)).collect();
        assert!(find_numbering(&mask, &h, &row, &layout).is_none());
    }

    #[test]
    fn empty_layout_is_a_config_error() {
        assert!(NumberingLayout::new(Vec::new()).is_err());
    }

    #[test]
    fn transformed_homography_relabels_and_refits() {
        let code = NumberingCode {
            lit_cells: Vec::new(),
            alignment: GridAlignment {
                transform: Dihedral::R90,
                translation: [2, 0],
            },
        };

        let h0 = image_homography();
        let coords = grid_coords(3, 3);
        let pixels: Vec<Point2<f64>> = coords
            .iter()
            .map(|g| h0.apply(Point2::new(g.i as f64, g.j as f64)))
            .collect();

        let (h1, mapped) = transformed_homography(&code, &pixels, &coords).expect("refit");
        assert_eq!(mapped.len(), coords.len());
        for (g, p) in mapped.iter().zip(&pixels) {
            let q = h1.apply(Point2::new(g.i as f64, g.j as f64));
            assert!((q.x - p.x).abs() < 1e-6 && (q.y - p.y).abs() < 1e-6);
        }
        assert_eq!(mapped[0], code.alignment.map(coords[0]));

        // deterministic: a second refit from the same inputs is identical
        let (h2, mapped2) = transformed_homography(&code, &pixels, &coords).expect("refit");
        assert_eq!(mapped, mapped2);
        assert_eq!(h1.to_array(), h2.to_array());
    }

    #[test]
    fn transformed_homography_rejects_length_mismatch() {
        let code = NumberingCode {
            lit_cells: Vec::new(),
            alignment: GridAlignment::IDENTITY,
        };
        let coords = grid_coords(2, 2);
        let pixels = vec![Point2::new(0.0, 0.0)];
        assert!(transformed_homography(&code, &pixels, &coords).is_none());
    }
}
