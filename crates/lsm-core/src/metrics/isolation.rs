//! Euclidean nearest-neighbour distance (ENN).
//!
//! ENN of a patch is the shortest centre-to-centre distance between any of its
//! cells and any cell of another patch of the same class. Only boundary cells
//! (those with a rook neighbour outside the patch) can realise the minimum, so
//! the search runs over boundary cells and skips patch pairs whose bounding
//! boxes are already farther apart than the best distance found.
use super::stats::{coefficient_of_variation, mean};
use crate::patches::{Patch, PatchSet};

struct Outline {
    class: crate::raster::CellClass,
    /// Boundary cells as (row, col).
    cells: Vec<(i64, i64)>,
    min: (i64, i64),
    max: (i64, i64),
}

fn outline(set: &PatchSet, patch: &Patch) -> Outline {
    let (w, h) = (set.width as i64, set.height as i64);
    let mut cells = Vec::new();
    let mut min = (i64::MAX, i64::MAX);
    let mut max = (i64::MIN, i64::MIN);
    for &idx in &patch.cells {
        let (r, c) = ((idx / set.width) as i64, (idx % set.width) as i64);
        min = (min.0.min(r), min.1.min(c));
        max = (max.0.max(r), max.1.max(c));
        let on_boundary = [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)].iter().any(|&(dr, dc)| {
            let (nr, nc) = (r + dr, c + dc);
            nr < 0 || nc < 0 || nr >= h || nc >= w || set.labels[(nr * w + nc) as usize] != Some(patch.id)
        });
        if on_boundary {
            cells.push((r, c));
        }
    }
    Outline { class: patch.class, cells, min, max }
}

/// Squared gap (in cells) between two bounding boxes; zero when they overlap.
fn bbox_gap_sq(a: &Outline, b: &Outline) -> i64 {
    let gap = |lo_a: i64, hi_a: i64, lo_b: i64, hi_b: i64| (lo_b - hi_a).max(lo_a - hi_b).max(0);
    let dr = gap(a.min.0, a.max.0, b.min.0, b.max.0);
    let dc = gap(a.min.1, a.max.1, b.min.1, b.max.1);
    dr * dr + dc * dc
}

/// ENN in metres for each of `patches`; `None` where no other patch of the
/// same class exists in the window.
pub fn nearest_neighbour_distances(set: &PatchSet, patches: &[&Patch]) -> Vec<Option<f64>> {
    let outlines: Vec<Outline> = set.patches.iter().map(|p| outline(set, p)).collect();

    patches
        .iter()
        .map(|p| {
            let own = &outlines[p.id];
            let mut best: Option<i64> = None;
            for (j, other) in outlines.iter().enumerate() {
                if j == p.id || other.class != own.class {
                    continue;
                }
                if let Some(b) = best {
                    if bbox_gap_sq(own, other) >= b {
                        continue;
                    }
                }
                for &(r1, c1) in &own.cells {
                    for &(r2, c2) in &other.cells {
                        let d = (r1 - r2).pow(2) + (c1 - c2).pow(2);
                        if best.map_or(true, |b| d < b) {
                            best = Some(d);
                        }
                    }
                }
            }
            best.map(|d| (d as f64).sqrt() * set.cell_size)
        })
        .collect()
}

/// `(ENN_MN, ENN_CV)` over the patches that have a same-class neighbour.
pub fn enn_mn_cv(set: &PatchSet, patches: &[&Patch]) -> (Option<f64>, Option<f64>) {
    let d: Vec<f64> = nearest_neighbour_distances(set, patches).into_iter().flatten().collect();
    (mean(&d), coefficient_of_variation(&d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Connectivity;
    use crate::patches::delineate;
    use crate::raster::CellClass;
    use crate::test_support::{grid, grid_with_cell_size};
    use approx::assert_relative_eq;

    #[test]
    fn lone_patch_has_no_neighbour() {
        let set = delineate(&grid(&["CCC"; 3]), Connectivity::Four);
        let ps: Vec<&Patch> = set.patches.iter().collect();
        assert_eq!(nearest_neighbour_distances(&set, &ps), vec![None]);
        assert_eq!(enn_mn_cv(&set, &ps), (None, None));
    }

    #[test]
    fn distance_is_edge_to_edge_not_centroid() {
        // Two 3-cell canopy bars separated by one Other column: nearest cell
        // centres are 2 cells apart while centroids are 4 apart.
        let set = delineate(&grid_with_cell_size(&["CCCOCCC"], 0.5), Connectivity::Four);
        let canopy: Vec<&Patch> = set.of_class(CellClass::Canopy).collect();
        let d = nearest_neighbour_distances(&set, &canopy);
        assert_eq!(d, vec![Some(1.0), Some(1.0)]);
    }

    #[test]
    fn diagonal_neighbours_use_euclidean_distance() {
        let set = delineate(&grid(&["COO", "OOO", "OOC"]), Connectivity::Four);
        let canopy: Vec<&Patch> = set.of_class(CellClass::Canopy).collect();
        let (mn, cv) = enn_mn_cv(&set, &canopy);
        assert_relative_eq!(mn.unwrap(), 8f64.sqrt(), epsilon = 1e-12);
        // Both distances equal → CV zero.
        assert_eq!(cv, Some(0.0));
    }

    #[test]
    fn nearest_of_several_neighbours_is_chosen() {
        let set = delineate(&grid(&["COCOOOC"]), Connectivity::Four);
        let canopy: Vec<&Patch> = set.of_class(CellClass::Canopy).collect();
        let d: Vec<f64> = nearest_neighbour_distances(&set, &canopy).into_iter().flatten().collect();
        assert_eq!(d, vec![2.0, 2.0, 4.0]);
    }
}
