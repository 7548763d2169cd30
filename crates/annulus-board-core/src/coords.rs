use serde::{Deserialize, Serialize};

/// Integer lattice coordinates of one board marker.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct GridCoords {
    pub i: i32,
    pub j: i32,
}

impl GridCoords {
    pub const fn new(i: i32, j: i32) -> Self {
        Self { i, j }
    }
}

/// The eight symmetries of the square lattice (the dihedral group D4).
///
/// A square or rectangular lattice looks identical under these transforms,
/// so pure lattice topology leaves the board numbering ambiguous up to one
/// of them. The numbering decode picks the element that maps the detected
/// frame onto the canonical board frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Dihedral {
    /// Identity.
    R0,
    /// Rotation by 90°: `(i, j) -> (-j, i)`.
    R90,
    /// Rotation by 180°: `(i, j) -> (-i, -j)`.
    R180,
    /// Rotation by 270°: `(i, j) -> (j, -i)`.
    R270,
    /// Reflection negating `i`.
    FlipI,
    /// Reflection negating `j`.
    FlipJ,
    /// Axis swap: `(i, j) -> (j, i)`.
    Transpose,
    /// Axis swap with both signs flipped.
    AntiTranspose,
}

/// All D4 elements in a fixed, documented order (identity first).
pub const DIHEDRAL_ELEMENTS: [Dihedral; 8] = [
    Dihedral::R0,
    Dihedral::R90,
    Dihedral::R180,
    Dihedral::R270,
    Dihedral::FlipI,
    Dihedral::FlipJ,
    Dihedral::Transpose,
    Dihedral::AntiTranspose,
];

impl Dihedral {
    /// Row-major 2x2 integer matrix `[[a, b], [c, d]]` of the transform.
    #[inline]
    pub const fn matrix(self) -> [i32; 4] {
        match self {
            Dihedral::R0 => [1, 0, 0, 1],
            Dihedral::R90 => [0, -1, 1, 0],
            Dihedral::R180 => [-1, 0, 0, -1],
            Dihedral::R270 => [0, 1, -1, 0],
            Dihedral::FlipI => [-1, 0, 0, 1],
            Dihedral::FlipJ => [1, 0, 0, -1],
            Dihedral::Transpose => [0, 1, 1, 0],
            Dihedral::AntiTranspose => [0, -1, -1, 0],
        }
    }

    /// Apply the transform to lattice coordinates.
    #[inline]
    pub fn apply(self, g: GridCoords) -> GridCoords {
        let [a, b, c, d] = self.matrix();
        GridCoords::new(a * g.i + b * g.j, c * g.i + d * g.j)
    }

    /// Group inverse. Every element is self-inverse except the quarter turns.
    #[inline]
    pub const fn inverse(self) -> Dihedral {
        match self {
            Dihedral::R90 => Dihedral::R270,
            Dihedral::R270 => Dihedral::R90,
            other => other,
        }
    }
}

/// A lattice alignment `dst = transform(src) + translation`.
///
/// Maps coordinates of a detected (topology-only) lattice frame into the
/// canonical board frame once the numbering has been decoded.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct GridAlignment {
    pub transform: Dihedral,
    pub translation: [i32; 2],
}

impl GridAlignment {
    pub const IDENTITY: GridAlignment = GridAlignment {
        transform: Dihedral::R0,
        translation: [0, 0],
    };

    /// Map lattice coordinates through this alignment.
    #[inline]
    pub fn map(&self, g: GridCoords) -> GridCoords {
        let t = self.transform.apply(g);
        GridCoords::new(t.i + self.translation[0], t.j + self.translation[1])
    }

    pub fn inverse(&self) -> GridAlignment {
        let inv = self.transform.inverse();
        let t = inv.apply(GridCoords::new(-self.translation[0], -self.translation[1]));
        GridAlignment {
            transform: inv,
            translation: [t.i, t.j],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarter_turn_composes_to_identity() {
        for g in [
            GridCoords::new(0, 0),
            GridCoords::new(3, -2),
            GridCoords::new(-1, 5),
        ] {
            let once = Dihedral::R90.apply(g);
            let back = Dihedral::R270.apply(once);
            assert_eq!(back, g);
        }
    }

    #[test]
    fn every_element_inverts() {
        for t in DIHEDRAL_ELEMENTS {
            let inv = t.inverse();
            for g in [GridCoords::new(2, 7), GridCoords::new(-4, 1)] {
                assert_eq!(inv.apply(t.apply(g)), g);
            }
        }
    }

    #[test]
    fn alignment_round_trips() {
        let a = GridAlignment {
            transform: Dihedral::Transpose,
            translation: [4, -3],
        };
        let inv = a.inverse();
        for g in [
            GridCoords::new(0, 0),
            GridCoords::new(5, 2),
            GridCoords::new(-3, 8),
        ] {
            assert_eq!(inv.map(a.map(g)), g);
        }
    }

    #[test]
    fn alignment_round_trips_through_json() {
        let a = GridAlignment {
            transform: Dihedral::AntiTranspose,
            translation: [2, -1],
        };
        let json = serde_json::to_string(&a).expect("serialize");
        let back: GridAlignment = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(a, back);
    }

    #[test]
    fn dihedral_elements_are_distinct() {
        let probe = GridCoords::new(2, 1);
        let images: Vec<GridCoords> = DIHEDRAL_ELEMENTS.iter().map(|t| t.apply(probe)).collect();
        for (k, a) in images.iter().enumerate() {
            for b in &images[k + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
