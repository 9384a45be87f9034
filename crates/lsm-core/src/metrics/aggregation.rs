//! Cell-adjacency metrics: aggregation index and edge contrast.
//!
//! Adjacencies are counted once per rook-adjacent cell pair (right and down
//! neighbours only), so gᵢᵢ is the single-count like-adjacency total.
//!
//! AI = 100 · Σᵢ Pᵢ · gᵢᵢ / max_gᵢᵢ, with the largest possible like-adjacency
//! count for Aᵢ cells
//! ```text
//!   n = ⌊√Aᵢ⌋, m = Aᵢ − n²
//!   max_gᵢᵢ = 2n(n − 1)            if m = 0
//!           = 2n(n − 1) + 2m − 1   if m ≤ n
//!           = 2n(n − 1) + 2m − 2   otherwise
//! ```
//! Classes with a single cell (max_gᵢᵢ = 0) contribute zero.
use crate::config::{ContrastMatrix, MetricScope};
use crate::raster::{CellClass, ClassifiedRaster};

struct Adjacency {
    like: [usize; 3],
    cells: [usize; 3],
}

fn count_adjacency(window: &ClassifiedRaster) -> Adjacency {
    let mut like = [0usize; 3];
    let mut cells = [0usize; 3];
    for r in 0..window.height {
        for c in 0..window.width {
            let Some(class) = window.get(r, c) else { continue };
            cells[class.index()] += 1;
            if c + 1 < window.width && window.get(r, c + 1) == Some(class) {
                like[class.index()] += 1;
            }
            if r + 1 < window.height && window.get(r + 1, c) == Some(class) {
                like[class.index()] += 1;
            }
        }
    }
    Adjacency { like, cells }
}

pub(crate) fn max_like_adjacencies(cells: usize) -> usize {
    let n = (cells as f64).sqrt().floor() as usize;
    let m = cells - n * n;
    let base = 2 * n * n.saturating_sub(1);
    if m == 0 {
        base
    } else if m <= n {
        base + 2 * m - 1
    } else {
        base + 2 * m - 2
    }
}

pub fn aggregation_index(window: &ClassifiedRaster, scope: MetricScope) -> Option<f64> {
    let adj = count_adjacency(window);
    let classes: Vec<CellClass> = match scope {
        MetricScope::Landscape => CellClass::ALL.to_vec(),
        MetricScope::Class(c) => vec![c],
    };
    let total: usize = classes.iter().map(|c| adj.cells[c.index()]).sum();
    if total == 0 {
        return None;
    }
    let ai = classes
        .iter()
        .filter(|c| adj.cells[c.index()] > 0)
        .map(|c| {
            let i = c.index();
            let max_g = max_like_adjacencies(adj.cells[i]);
            let p = adj.cells[i] as f64 / total as f64;
            if max_g == 0 {
                0.0
            } else {
                p * adj.like[i] as f64 / max_g as f64
            }
        })
        .sum::<f64>();
    Some(ai * 100.0)
}

/// Landscape edge contrast index: 100 · Σ eᵢₖ·dᵢₖ / E over unlike rook edges.
///
/// Undefined when the window has no unlike edge, or when an edge present in
/// the window joins a pairing with no defined contrast weight.
pub fn edge_contrast_index(window: &ClassifiedRaster, contrast: &ContrastMatrix) -> Option<f64> {
    let mut total = 0usize;
    let mut weighted = 0.0;
    for r in 0..window.height {
        for c in 0..window.width {
            let Some(a) = window.get(r, c) else { continue };
            let right = (c + 1 < window.width).then(|| window.get(r, c + 1)).flatten();
            let down = (r + 1 < window.height).then(|| window.get(r + 1, c)).flatten();
            for b in [right, down].into_iter().flatten() {
                if a == b {
                    continue;
                }
                weighted += contrast.get(a, b)?;
                total += 1;
            }
        }
    }
    if total == 0 {
        return None;
    }
    Some(weighted / total as f64 * 100.0)
}
