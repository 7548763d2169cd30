//! Ellipse fitting over boundary pixel sets.
//!
//! Two fit paths back the extractor's quality modes: a second-moments fit
//! (fast, tolerant) and a direct least-squares conic fit solved through an
//! SVD null vector (high quality, stricter).

use nalgebra::{DMatrix, Matrix2, Point2, SymmetricEigen};

use crate::types::EllipseParams;

fn wrap_angle(a: f64) -> f64 {
    let mut a = a;
    while a <= -std::f64::consts::FRAC_PI_2 {
        a += std::f64::consts::PI;
    }
    while a > std::f64::consts::FRAC_PI_2 {
        a -= std::f64::consts::PI;
    }
    a
}

/// Fit an ellipse from the second moments of boundary points.
///
/// For points spread along an ellipse outline the variance along each
/// principal axis is half the squared semi-axis, so the semi-axes are
/// `sqrt(2 * eigenvalue)` of the covariance matrix.
pub fn fit_ellipse_moments(points: &[Point2<f64>]) -> Option<EllipseParams> {
    if points.len() < 5 {
        return None;
    }

    let n = points.len() as f64;
    let mut cx = 0.0;
    let mut cy = 0.0;
    for p in points {
        cx += p.x;
        cy += p.y;
    }
    cx /= n;
    cy /= n;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syy = 0.0;
    for p in points {
        let dx = p.x - cx;
        let dy = p.y - cy;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    sxx /= n;
    sxy /= n;
    syy /= n;

    let eig = SymmetricEigen::new(Matrix2::new(sxx, sxy, sxy, syy));
    let (l0, l1) = (eig.eigenvalues[0], eig.eigenvalues[1]);
    if l0 <= 1e-9 || l1 <= 1e-9 {
        return None;
    }

    let (major_idx, minor_idx) = if l0 >= l1 { (0, 1) } else { (1, 0) };
    let semi_major = (2.0 * eig.eigenvalues[major_idx]).sqrt();
    let semi_minor = (2.0 * eig.eigenvalues[minor_idx]).sqrt();
    let v = eig.eigenvectors.column(major_idx);
    let angle = wrap_angle(v[1].atan2(v[0]));

    Some(EllipseParams {
        center: Point2::new(cx, cy),
        semi_major,
        semi_minor,
        angle,
    })
}

/// Direct least-squares conic fit (in the spirit of Fitzgibbon et al.).
///
/// Solves `D a = 0` for the conic coefficients `[A B C D E F]` via the SVD
/// null vector on centroid-normalized coordinates, then converts to
/// geometric parameters. Returns `None` when the best-fit conic is not an
/// ellipse or the system is degenerate.
pub fn fit_ellipse_conic(points: &[Point2<f64>]) -> Option<EllipseParams> {
    let n = points.len();
    if n < 6 {
        return None;
    }

    // Normalize for conditioning: shift to centroid, scale mean distance to sqrt(2)
    let nf = n as f64;
    let mx = points.iter().map(|p| p.x).sum::<f64>() / nf;
    let my = points.iter().map(|p| p.y).sum::<f64>() / nf;
    let mean_dist = points
        .iter()
        .map(|p| ((p.x - mx).powi(2) + (p.y - my).powi(2)).sqrt())
        .sum::<f64>()
        / nf;
    let s = if mean_dist > 1e-12 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let mut d = DMatrix::<f64>::zeros(n, 6);
    for (k, p) in points.iter().enumerate() {
        let x = (p.x - mx) * s;
        let y = (p.y - my) * s;
        d[(k, 0)] = x * x;
        d[(k, 1)] = x * y;
        d[(k, 2)] = y * y;
        d[(k, 3)] = x;
        d[(k, 4)] = y;
        d[(k, 5)] = 1.0;
    }

    let svd = d.svd(false, true);
    let vt = svd.v_t?;
    let last = vt.nrows().checked_sub(1)?;
    let c = vt.row(last);
    let (a, b, cc, dd, e, f) = (c[0], c[1], c[2], c[3], c[4], c[5]);

    let ellipse = conic_to_ellipse(a, b, cc, dd, e, f)?;

    // Geometric denormalization: positions shift/scale, lengths scale, angle unchanged
    Some(EllipseParams {
        center: Point2::new(ellipse.center.x / s + mx, ellipse.center.y / s + my),
        semi_major: ellipse.semi_major / s,
        semi_minor: ellipse.semi_minor / s,
        angle: ellipse.angle,
    })
}

/// Convert conic coefficients `A x^2 + B xy + C y^2 + D x + E y + F = 0`
/// to geometric parameters. `None` for non-ellipse conics.
fn conic_to_ellipse(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Option<EllipseParams> {
    let den = 4.0 * a * c - b * b;
    if den <= 1e-12 {
        return None;
    }

    let cx = (b * e - 2.0 * c * d) / den;
    let cy = (b * d - 2.0 * a * e) / den;

    let f0 = a * cx * cx + b * cx * cy + c * cy * cy + d * cx + e * cy + f;

    let m = Matrix2::new(a, b / 2.0, b / 2.0, c);
    let eig = SymmetricEigen::new(m);
    let (l0, l1) = (eig.eigenvalues[0], eig.eigenvalues[1]);

    let r0_sq = -f0 / l0;
    let r1_sq = -f0 / l1;
    if r0_sq <= 0.0 || r1_sq <= 0.0 {
        return None;
    }

    // The major axis belongs to the eigenvalue of smaller magnitude
    let (major_idx, major_sq, minor_sq) = if r0_sq >= r1_sq {
        (0, r0_sq, r1_sq)
    } else {
        (1, r1_sq, r0_sq)
    };
    let v = eig.eigenvectors.column(major_idx);
    let angle = wrap_angle(v[1].atan2(v[0]));

    let ellipse = EllipseParams {
        center: Point2::new(cx, cy),
        semi_major: major_sq.sqrt(),
        semi_minor: minor_sq.sqrt(),
        angle,
    };
    if !ellipse.semi_major.is_finite() || !ellipse.semi_minor.is_finite() {
        return None;
    }
    Some(ellipse)
}
