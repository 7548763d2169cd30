//! Lattice indexing and homography estimation.
//!
//! Registration assigns relative integer grid coordinates to the filtered
//! annuli by propagating unit steps over a spacing-consistent neighbor
//! graph, then fits a grid-to-pixel homography and prunes residual
//! outliers. The absolute numbering (origin and axis identity) is left to
//! the numbering decode.

use std::collections::{HashMap, VecDeque};

use log::debug;
use nalgebra::Point2;

use annulus_board_core::{estimate_homography, reprojection_errors, GridCoords, Homography};

use crate::error::ConfigError;
use crate::filters::expected_step_px;
use crate::types::{AnnulusCandidate, GridModel, RegistrationParams};

/// A registered lattice: homography plus index-aligned correspondence
/// arrays (`grid_coords[k]` maps to `pixel_coords[k]`, which is the center
/// of candidate `index_map[k]`).
#[derive(Clone, Debug)]
pub struct GridFit {
    pub homography: Homography,
    pub index_map: Vec<usize>,
    pub grid_coords: Vec<GridCoords>,
    pub pixel_coords: Vec<Point2<f64>>,
}

/// Grid registration session, configured once per board model.
#[derive(Clone, Debug)]
pub struct Grid {
    model: GridModel,
    params: RegistrationParams,
}

impl Grid {
    pub fn new(model: GridModel) -> Result<Self, ConfigError> {
        Self::with_params(model, RegistrationParams::default())
    }

    pub fn with_params(model: GridModel, params: RegistrationParams) -> Result<Self, ConfigError> {
        model.validate()?;
        params.validate()?;
        Ok(Self { model, params })
    }

    pub fn model(&self) -> &GridModel {
        &self.model
    }

    /// Find the best-fit lattice over the candidate set.
    ///
    /// `None` is the normal no-target outcome: insufficient markers, a
    /// too-small connected component, or a fit that does not converge
    /// within the refit budget.
    pub fn find_grid(&self, annuli: &[AnnulusCandidate]) -> Option<GridFit> {
        if annuli.len() < self.params.min_markers {
            debug!(
                "registration: {} candidates < minimum {}",
                annuli.len(),
                self.params.min_markers
            );
            return None;
        }

        let adjacency = self.build_neighbor_graph(annuli);
        let component = largest_component(&adjacency);
        if component.len() < self.params.min_markers {
            debug!(
                "registration: largest component {} < minimum {}",
                component.len(),
                self.params.min_markers
            );
            return None;
        }

        let coords = self.index_lattice(annuli, &adjacency, &component)?;
        if coords.len() < self.params.min_markers {
            return None;
        }

        // Canonical correspondence order: lexicographic grid coordinates.
        // Makes the fit independent of the input candidate permutation.
        let mut entries: Vec<(GridCoords, usize)> =
            coords.iter().map(|(&idx, &g)| (g, idx)).collect();
        let min_i = entries.iter().map(|(g, _)| g.i).min()?;
        let min_j = entries.iter().map(|(g, _)| g.j).min()?;
        for (g, _) in entries.iter_mut() {
            g.i -= min_i;
            g.j -= min_j;
        }
        entries.sort_by_key(|(g, idx)| (g.i, g.j, *idx));

        let mut grid_coords: Vec<GridCoords> = entries.iter().map(|(g, _)| *g).collect();
        let mut index_map: Vec<usize> = entries.iter().map(|(_, idx)| *idx).collect();
        let mut pixel_coords: Vec<Point2<f64>> =
            index_map.iter().map(|&idx| annuli[idx].center).collect();

        let homography =
            self.fit_with_pruning(&mut grid_coords, &mut index_map, &mut pixel_coords)?;

        debug!(
            "registration: {} markers indexed, homography fit ok",
            grid_coords.len()
        );
        Some(GridFit {
            homography,
            index_map,
            grid_coords,
            pixel_coords,
        })
    }

    /// Undirected adjacency between candidates whose distance matches one
    /// marker spacing at the local image scale.
    fn build_neighbor_graph(&self, annuli: &[AnnulusCandidate]) -> Vec<Vec<usize>> {
        let steps: Vec<f64> = annuli
            .iter()
            .map(|c| {
                expected_step_px(
                    c,
                    self.model.outer_circle_diameter,
                    self.model.marker_spacing,
                )
            })
            .collect();

        let tol = self.params.spacing_tolerance;
        let mut adjacency = vec![Vec::new(); annuli.len()];
        for k in 0..annuli.len() {
            for l in k + 1..annuli.len() {
                let step = 0.5 * (steps[k] + steps[l]);
                let d = dist(annuli[k].center, annuli[l].center);
                if (d - step).abs() <= tol * step {
                    adjacency[k].push(l);
                    adjacency[l].push(k);
                }
            }
        }
        adjacency
    }

    /// Propagate integer lattice coordinates over the component by BFS.
    ///
    /// Seed: the member with the smallest sum of pixel distances to the
    /// rest of the component (ties broken by lowest candidate index). The
    /// seed's nearest neighbor fixes the +i axis; its most orthogonal
    /// comparable-length neighbor fixes the +j axis, sign-corrected to a
    /// right-handed basis.
    fn index_lattice(
        &self,
        annuli: &[AnnulusCandidate],
        adjacency: &[Vec<usize>],
        component: &[usize],
    ) -> Option<HashMap<usize, GridCoords>> {
        let seed = *component.iter().min_by(|&&a, &&b| {
            let sum = |k: usize| -> f64 {
                component
                    .iter()
                    .map(|&l| dist(annuli[k].center, annuli[l].center))
                    .sum()
            };
            sum(a)
                .partial_cmp(&sum(b))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        })?;

        let seed_pos = annuli[seed].center;
        let nearest = *adjacency[seed].iter().min_by(|&&a, &&b| {
            dist(annuli[a].center, seed_pos)
                .partial_cmp(&dist(annuli[b].center, seed_pos))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        })?;

        let u = (
            annuli[nearest].center.x - seed_pos.x,
            annuli[nearest].center.y - seed_pos.y,
        );
        let u_len = (u.0 * u.0 + u.1 * u.1).sqrt();

        // +j axis: most orthogonal neighbor with a comparable step length
        let mut v: Option<(f64, f64)> = None;
        let mut best_cos = 0.7; // reject near-collinear axes outright
        for &nb in &adjacency[seed] {
            if nb == nearest {
                continue;
            }
            let w = (
                annuli[nb].center.x - seed_pos.x,
                annuli[nb].center.y - seed_pos.y,
            );
            let w_len = (w.0 * w.0 + w.1 * w.1).sqrt();
            if w_len < 0.6 * u_len || w_len > 1.6 * u_len {
                continue;
            }
            let cos = ((u.0 * w.0 + u.1 * w.1) / (u_len * w_len)).abs();
            if cos < best_cos {
                best_cos = cos;
                v = Some(w);
            }
        }
        let mut v = v?;

        // right-handed basis keeps the step-rounding below deterministic
        if u.0 * v.1 - u.1 * v.0 < 0.0 {
            v = (-v.0, -v.1);
        }

        let det = u.0 * v.1 - u.1 * v.0;
        if det.abs() < 1e-9 {
            return None;
        }

        let max_step_residual = self.params.step_residual_frac * u_len;

        let mut coords: HashMap<usize, GridCoords> = HashMap::new();
        coords.insert(seed, GridCoords::new(0, 0));
        let mut queue = VecDeque::from([seed]);

        while let Some(cur) = queue.pop_front() {
            let g = coords[&cur];
            let p = annuli[cur].center;
            for &nb in &adjacency[cur] {
                if coords.contains_key(&nb) {
                    continue;
                }
                let d = (annuli[nb].center.x - p.x, annuli[nb].center.y - p.y);
                // solve [u v] * (di, dj) = d
                let di_f = (d.0 * v.1 - d.1 * v.0) / det;
                let dj_f = (u.0 * d.1 - u.1 * d.0) / det;
                let di = di_f.round() as i32;
                let dj = dj_f.round() as i32;
                if di.abs() + dj.abs() != 1 {
                    continue; // graph-adjacent markers must be one lattice step apart
                }
                let rx = u.0 * di as f64 + v.0 * dj as f64 - d.0;
                let ry = u.1 * di as f64 + v.1 * dj as f64 - d.1;
                if (rx * rx + ry * ry).sqrt() > max_step_residual {
                    continue;
                }
                coords.insert(nb, GridCoords::new(g.i + di, g.j + dj));
                queue.push_back(nb);
            }
        }

        Some(coords)
    }

    /// DLT fit with residual-driven pruning: drop the single worst
    /// correspondence above `max_residual_px` and refit, within the
    /// iteration budget and never below `min_markers` correspondences.
    fn fit_with_pruning(
        &self,
        grid_coords: &mut Vec<GridCoords>,
        index_map: &mut Vec<usize>,
        pixel_coords: &mut Vec<Point2<f64>>,
    ) -> Option<Homography> {
        let mut h = estimate(grid_coords, pixel_coords)?;

        for iteration in 0..=self.params.max_refit_iterations {
            let grid_pts = to_points(grid_coords);
            let errs = reprojection_errors(&h, &grid_pts, pixel_coords);
            let (worst, worst_err) = errs
                .iter()
                .enumerate()
                .max_by(|(ka, a), (kb, b)| {
                    a.partial_cmp(b)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(kb.cmp(ka)) // tie: drop the lowest position first
                })
                .map(|(k, &e)| (k, e))?;

            if worst_err <= self.params.max_residual_px {
                return Some(h);
            }
            if iteration == self.params.max_refit_iterations
                || grid_coords.len() - 1 < self.params.min_markers
            {
                debug!("registration: fit divergence (worst residual {worst_err:.2} px)");
                return None;
            }

            grid_coords.remove(worst);
            index_map.remove(worst);
            pixel_coords.remove(worst);
            h = estimate(grid_coords, pixel_coords)?;
        }

        None
    }
}

fn estimate(grid_coords: &[GridCoords], pixel_coords: &[Point2<f64>]) -> Option<Homography> {
    estimate_homography(&to_points(grid_coords), pixel_coords)
}

fn to_points(grid_coords: &[GridCoords]) -> Vec<Point2<f64>> {
    grid_coords
        .iter()
        .map(|g| Point2::new(g.i as f64, g.j as f64))
        .collect()
}

#[inline]
fn dist(a: Point2<f64>, b: Point2<f64>) -> f64 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

/// Connected components of the neighbor graph; returns the largest, ties
/// broken by the smallest member index. Components are never merged.
fn largest_component(adjacency: &[Vec<usize>]) -> Vec<usize> {
    let n = adjacency.len();
    let mut visited = vec![false; n];
    let mut best: Vec<usize> = Vec::new();

    for start in 0..n {
        if visited[start] {
            continue;
        }
        let mut comp = vec![start];
        visited[start] = true;
        let mut head = 0;
        while head < comp.len() {
            let cur = comp[head];
            head += 1;
            for &nb in &adjacency[cur] {
                if !visited[nb] {
                    visited[nb] = true;
                    comp.push(nb);
                }
            }
        }
        comp.sort_unstable();
        if comp.len() > best.len() {
            best = comp;
        }
    }

    best
}
