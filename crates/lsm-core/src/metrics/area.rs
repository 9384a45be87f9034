//! Area, core-area and gyration metrics.
//!
//!   AREA_MN   = mean(aᵢ)
//!   AREA_AM   = Σ aᵢ · (aᵢ / Σ aⱼ)
//!   LPI       = max(aᵢ) / A        (A = valid window area; fraction, not percent)
//!   CORE_AM   = Σ coreᵢ · (aᵢ / Σ aⱼ)
//!   GYRATE_AM = Σ gᵢ · (aᵢ / Σ aⱼ), gᵢ = mean distance of cell centres to the centroid
use super::stats::{mean, weighted_mean};
use crate::patches::{Patch, PatchSet};

pub fn area_mn(patches: &[&Patch]) -> Option<f64> {
    let areas: Vec<f64> = patches.iter().map(|p| p.area).collect();
    mean(&areas)
}

pub fn area_am(patches: &[&Patch]) -> Option<f64> {
    weighted_mean(patches.iter().map(|p| (p.area, p.area)))
}

pub fn largest_patch_index(patches: &[&Patch], landscape_area: f64) -> Option<f64> {
    if landscape_area <= 0.0 {
        return None;
    }
    patches
        .iter()
        .map(|p| p.area)
        .fold(None, |acc: Option<f64>, a| Some(acc.map_or(a, |m| m.max(a))))
        .map(|max| max / landscape_area)
}

/// Radius of gyration of one patch in metres.
pub fn radius_of_gyration(patch: &Patch, width: usize, cell_size: f64) -> f64 {
    let (cr, cc) = patch.centroid;
    let total: f64 = patch
        .cells
        .iter()
        .map(|&idx| {
            let r = (idx / width) as f64 + 0.5;
            let c = (idx % width) as f64 + 0.5;
            ((r - cr).powi(2) + (c - cc).powi(2)).sqrt()
        })
        .sum();
    total / patch.n_cells() as f64 * cell_size
}

pub fn gyrate_am(set: &PatchSet, patches: &[&Patch]) -> Option<f64> {
    weighted_mean(
        patches
            .iter()
            .map(|p| (radius_of_gyration(p, set.width, set.cell_size), p.area)),
    )
}

/// Core cell count per patch id after `edge_depth` rounds of 4-neighbour
/// erosion. A cell is eroded when a 4-neighbour inside the window carries a
/// different label (another patch or no-data); the window edge itself is not
/// treated as patch edge.
pub fn core_cell_counts(set: &PatchSet, edge_depth: usize) -> Vec<usize> {
    let (w, h) = (set.width, set.height);
    let mut core: Vec<bool> = set.labels.iter().map(|l| l.is_some()).collect();

    for _ in 0..edge_depth {
        let prev = core.clone();
        for r in 0..h {
            for c in 0..w {
                let idx = r * w + c;
                if !prev[idx] {
                    continue;
                }
                let label = set.labels[idx];
                let exposed = [(-1isize, 0isize), (1, 0), (0, -1), (0, 1)].iter().any(|&(dr, dc)| {
                    let (nr, nc) = (r as isize + dr, c as isize + dc);
                    if nr < 0 || nc < 0 || nr as usize >= h || nc as usize >= w {
                        return false;
                    }
                    let nidx = nr as usize * w + nc as usize;
                    set.labels[nidx] != label || !prev[nidx]
                });
                if exposed {
                    core[idx] = false;
                }
            }
        }
    }

    let mut counts = vec![0usize; set.patches.len()];
    for (idx, &is_core) in core.iter().enumerate() {
        if let (true, Some(id)) = (is_core, set.labels[idx]) {
            counts[id] += 1;
        }
    }
    counts
}

pub fn core_am(set: &PatchSet, patches: &[&Patch], edge_depth: usize) -> Option<f64> {
    let counts = core_cell_counts(set, edge_depth);
    let cell_area = set.cell_size * set.cell_size;
    weighted_mean(patches.iter().map(|p| (counts[p.id] as f64 * cell_area, p.area)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Connectivity;
    use crate::patches::delineate;
    use crate::test_support::grid;
    use approx::assert_relative_eq;

    #[test]
    fn full_window_patch_area_and_lpi() {
        let g = grid(&["CCCC"; 4]);
        let set = delineate(&g, Connectivity::Four);
        let ps: Vec<&Patch> = set.patches.iter().collect();
        assert_eq!(area_mn(&ps), Some(16.0));
        assert_eq!(area_am(&ps), Some(16.0));
        assert_eq!(largest_patch_index(&ps, 16.0), Some(1.0));
    }

    #[test]
    fn area_am_weights_large_patches() {
        // Patches of 3 and 1 cells: AM = (9 + 1) / 4 = 2.5, MN = 2.
        let set = delineate(&grid(&["CCCO", "OOOC"]), Connectivity::Four);
        let canopy: Vec<&Patch> = set.of_class(crate::raster::CellClass::Canopy).collect();
        assert_eq!(area_mn(&canopy), Some(2.0));
        assert_eq!(area_am(&canopy), Some(2.5));
        assert_eq!(largest_patch_index(&canopy, 8.0), Some(3.0 / 8.0));
        assert!(largest_patch_index(&[], 8.0).is_none());
    }

    #[test]
    fn core_excludes_edge_depth_but_not_window_edge() {
        let g = grid(&["CCCCC", "CCCCC", "CCOCC", "CCCCC", "CCCCC"]);
        let set = delineate(&g, Connectivity::Four);
        let counts = core_cell_counts(&set, 1);
        // Canopy ring loses the 4 rook neighbours of the hole.
        assert_eq!(counts[0], 24 - 4);
        // The single Other cell is all edge.
        assert_eq!(counts[1], 0);

        let deeper = core_cell_counts(&set, 2);
        // Depth 2 also removes the diagonal ring around the hole (4) and the
        // 4 cells two steps away along the axes.
        assert_eq!(deeper[0], 24 - 12);
    }

    #[test]
    fn gyration_of_single_cell_is_zero() {
        let set = delineate(&grid(&["C"]), Connectivity::Four);
        assert_eq!(radius_of_gyration(&set.patches[0], 1, 1.0), 0.0);
    }

    #[test]
    fn gyration_of_pair_is_half_cell() {
        let g = crate::test_support::grid_with_cell_size(&["CC"], 2.0);
        let set = delineate(&g, Connectivity::Four);
        assert_relative_eq!(radius_of_gyration(&set.patches[0], 2, 2.0), 1.0, epsilon = 1e-12);
    }
}
