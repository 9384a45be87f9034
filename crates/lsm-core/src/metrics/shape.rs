//! Shape index and fractal dimension.
//!
//! SHAPE = p / p_min, with p in cell edges and p_min the smallest perimeter a
//! raster patch of n cells can have:
//! ```text
//!   k = ⌊√n⌋, m = n − k²
//!   p_min = 4k        if m = 0
//!         = 4k + 2    if m ≤ k
//!         = 4k + 4    otherwise
//! ```
//! FRAC = 2 · ln(0.25 · p) / ln(a), p in metres and a in m²; a patch whose
//! area is exactly 1 m² is assigned FRAC = 1.
use super::stats::{coefficient_of_variation, mean, weighted_mean};
use crate::patches::Patch;

pub(crate) fn min_perimeter_cells(n: usize) -> f64 {
    let k = (n as f64).sqrt().floor() as usize;
    let m = n - k * k;
    let p = if m == 0 {
        4 * k
    } else if m <= k {
        4 * k + 2
    } else {
        4 * k + 4
    };
    p as f64
}

pub fn shape_index(patch: &Patch, cell_size: f64) -> f64 {
    let edges = patch.perimeter / cell_size;
    edges / min_perimeter_cells(patch.n_cells())
}

pub fn fractal_dimension(patch: &Patch) -> f64 {
    let ln_a = patch.area.ln();
    if ln_a.abs() < 1e-12 {
        return 1.0;
    }
    2.0 * (0.25 * patch.perimeter).ln() / ln_a
}

pub fn shape_mn(patches: &[&Patch], cell_size: f64) -> Option<f64> {
    let v: Vec<f64> = patches.iter().map(|p| shape_index(p, cell_size)).collect();
    mean(&v)
}

pub fn shape_am(patches: &[&Patch], cell_size: f64) -> Option<f64> {
    weighted_mean(patches.iter().map(|p| (shape_index(p, cell_size), p.area)))
}

pub fn frac_mn(patches: &[&Patch]) -> Option<f64> {
    let v: Vec<f64> = patches.iter().map(|p| fractal_dimension(p)).collect();
    mean(&v)
}

pub fn frac_am(patches: &[&Patch]) -> Option<f64> {
    weighted_mean(patches.iter().map(|p| (fractal_dimension(p), p.area)))
}

pub fn frac_cv(patches: &[&Patch]) -> Option<f64> {
    let v: Vec<f64> = patches.iter().map(|p| fractal_dimension(p)).collect();
    coefficient_of_variation(&v)
}
