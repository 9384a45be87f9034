//! Window-level metric computation.
//!
//! One consistent path for all thirteen metrics: delineate the window once per
//! connectivity rule in use, restrict to the configured scope, then evaluate
//! each family. Pure function of the window and the engine settings, so
//! repeated runs are bit-identical.
use super::{aggregation, area, isolation, shape, Metric, MetricVector};
use crate::config::{Connectivity, ConnectivityRules, ContrastMatrix, LsmConfig, MetricScope};
use crate::patches::{delineate, Patch, PatchSet};
use crate::raster::ClassifiedRaster;

#[derive(Debug, Clone)]
pub struct MetricEngine {
    connectivity: ConnectivityRules,
    edge_depth: usize,
    scope: MetricScope,
    contrast: Option<ContrastMatrix>,
}

impl MetricEngine {
    pub fn new(config: &LsmConfig) -> Self {
        Self {
            connectivity: config.connectivity,
            edge_depth: config.edge_depth,
            scope: config.scope,
            contrast: config.contrast,
        }
    }

    pub fn scope(&self) -> MetricScope {
        self.scope
    }

    fn uses(&self, rule: Connectivity) -> bool {
        let r = &self.connectivity;
        [r.area, r.shape, r.core, r.isolation].contains(&rule)
    }

    fn scoped<'a>(&self, set: &'a PatchSet) -> Vec<&'a Patch> {
        match self.scope {
            MetricScope::Landscape => set.patches.iter().collect(),
            MetricScope::Class(class) => set.of_class(class).collect(),
        }
    }

    /// Compute the metric vector of one window. A window with no valid cell
    /// yields an all-undefined vector.
    pub fn compute(&self, window: &ClassifiedRaster) -> MetricVector {
        let mut out = MetricVector::undefined();
        let valid = window.valid_count();
        if valid == 0 {
            return out;
        }
        let landscape_area = valid as f64 * window.cell_area();
        let cell_size = window.cell_size();

        let four = self.uses(Connectivity::Four).then(|| delineate(window, Connectivity::Four));
        let eight = self.uses(Connectivity::Eight).then(|| delineate(window, Connectivity::Eight));
        let labelled = |rule: Connectivity| match rule {
            Connectivity::Four => four.as_ref(),
            Connectivity::Eight => eight.as_ref(),
        };

        // ── Area family ─────────────────────────────────────────────────────
        if let Some(set) = labelled(self.connectivity.area) {
            let ps = self.scoped(set);
            out.set(Metric::AreaMn, area::area_mn(&ps));
            out.set(Metric::AreaAm, area::area_am(&ps));
            out.set(Metric::Lpi, area::largest_patch_index(&ps, landscape_area));
            out.set(Metric::GyrateAm, area::gyrate_am(set, &ps));
        }

        // ── Shape family ────────────────────────────────────────────────────
        if let Some(set) = labelled(self.connectivity.shape) {
            let ps = self.scoped(set);
            out.set(Metric::ShapeMn, shape::shape_mn(&ps, cell_size));
            out.set(Metric::ShapeAm, shape::shape_am(&ps, cell_size));
            out.set(Metric::FracMn, shape::frac_mn(&ps));
            out.set(Metric::FracAm, shape::frac_am(&ps));
            out.set(Metric::FracCv, shape::frac_cv(&ps));
        }

        // ── Core area ───────────────────────────────────────────────────────
        if let Some(set) = labelled(self.connectivity.core) {
            let ps = self.scoped(set);
            out.set(Metric::CoreAm, area::core_am(set, &ps, self.edge_depth));
        }

        // ── Isolation ───────────────────────────────────────────────────────
        if let Some(set) = labelled(self.connectivity.isolation) {
            let ps = self.scoped(set);
            let (mn, cv) = isolation::enn_mn_cv(set, &ps);
            out.set(Metric::EnnMn, mn);
            out.set(Metric::EnnCv, cv);
        }

        // ── Aggregation (cell adjacency, independent of labelling) ──────────
        out.set(Metric::Ai, aggregation::aggregation_index(window, self.scope));

        out
    }

    /// Landscape edge contrast index of the window; `None` without a contrast
    /// matrix or when undefined for this window.
    pub fn edge_contrast(&self, window: &ClassifiedRaster) -> Option<f64> {
        let matrix = self.contrast.as_ref()?;
        aggregation::edge_contrast_index(window, matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{CellClass, GeoTransform};
    use crate::test_support::grid;
    use approx::assert_relative_eq;

    fn engine() -> MetricEngine {
        MetricEngine::new(&LsmConfig::default())
    }

    #[test]
    fn all_canopy_ten_by_ten_window() {
        let w = ClassifiedRaster::new(10, 10, GeoTransform::new(0.0, 10.0, 1.0), Some(CellClass::Canopy));
        let m = engine().compute(&w);
        assert_eq!(m.get(Metric::AreaMn), Some(100.0));
        assert_eq!(m.get(Metric::AreaAm), Some(100.0));
        assert_eq!(m.get(Metric::Lpi), Some(1.0));
        assert_eq!(m.get(Metric::EnnMn), None);
        assert_eq!(m.get(Metric::EnnCv), None);
        assert_eq!(m.get(Metric::ShapeMn), Some(1.0));
        assert_relative_eq!(m.get(Metric::FracMn).unwrap(), 1.0, epsilon = 1e-12);
        assert_eq!(m.get(Metric::FracCv), None);
        assert_relative_eq!(m.get(Metric::Ai).unwrap(), 100.0, epsilon = 1e-12);
        // No edge inside the window, and the window edge is not patch edge.
        assert_eq!(m.get(Metric::CoreAm), Some(100.0));
    }

    #[test]
    fn single_patch_window_properties_hold_at_any_cell_size() {
        for &cs in &[0.3, 0.6, 1.0, 2.5] {
            let w = ClassifiedRaster::new(7, 7, GeoTransform::new(0.0, 0.0, cs), Some(CellClass::Other));
            let m = engine().compute(&w);
            let area = 49.0 * cs * cs;
            assert_relative_eq!(m.get(Metric::AreaMn).unwrap(), area, epsilon = 1e-9);
            assert_eq!(m.get(Metric::Lpi), Some(1.0));
            assert!(m.get(Metric::EnnMn).is_none());
        }
    }

    #[test]
    fn block_checkerboard() {
        // 2×2 blocks: four blocks per class in an 8×4 window.
        let g = grid(&["CCOOCCOO", "CCOOCCOO", "OOCCOOCC", "OOCCOOCC"]);
        let m = engine().compute(&g);
        assert_eq!(m.get(Metric::AreaMn), Some(4.0));
        assert_eq!(m.get(Metric::Lpi), Some(4.0 / 32.0));
        let ai = m.get(Metric::Ai).unwrap();
        // Each class: 16 cells, g = 16, max_g = 24.
        assert_relative_eq!(ai, 100.0 * 16.0 / 24.0, epsilon = 1e-9);
        assert!(ai < 100.0);
        // Same-class blocks touch only at corners: nearest cells are diagonal
        // neighbours, √2 apart.
        assert_relative_eq!(m.get(Metric::EnnMn).unwrap(), 2f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn four_by_four_block_checkerboard_mean_area() {
        let g = grid(&["CCOO", "CCOO", "OOCC", "OOCC"]);
        let m = engine().compute(&g);
        assert_eq!(m.get(Metric::AreaMn), Some(4.0));
        assert!(m.get(Metric::Ai).unwrap() < 100.0);
    }

    #[test]
    fn eight_connectivity_merges_diagonal_blocks() {
        let g = grid(&["CCOO", "CCOO", "OOCC", "OOCC"]);
        let cfg = LsmConfig {
            connectivity: ConnectivityRules {
                area: Connectivity::Eight,
                ..ConnectivityRules::default()
            },
            ..LsmConfig::default()
        };
        let m = MetricEngine::new(&cfg).compute(&g);
        assert_eq!(m.get(Metric::AreaMn), Some(8.0));
        // Shape family still on 4-connectivity.
        assert_eq!(m.get(Metric::ShapeMn), Some(1.0));
    }

    #[test]
    fn empty_window_is_all_undefined() {
        let m = engine().compute(&grid(&["...", "..."]));
        assert!(m.is_all_undefined());
    }

    #[test]
    fn class_scope_restricts_patches() {
        let g = grid(&["CCO", "OOO"]);
        let cfg = LsmConfig { scope: MetricScope::Class(CellClass::Canopy), ..LsmConfig::default() };
        let m = MetricEngine::new(&cfg).compute(&g);
        assert_eq!(m.get(Metric::AreaMn), Some(2.0));
        assert_eq!(m.get(Metric::Lpi), Some(2.0 / 6.0));

        let absent = MetricEngine::new(&LsmConfig {
            scope: MetricScope::Class(CellClass::Shadow),
            ..LsmConfig::default()
        })
        .compute(&g);
        assert!(absent.is_all_undefined());
    }

    #[test]
    fn repeated_runs_are_bit_identical() {
        let g = grid(&["CSOCCO", "SSOOCO", "CCOSSC", "OCCOSC", "COOCCS"]);
        let e = engine();
        let a = e.compute(&g);
        let b = e.compute(&g);
        for ((_, x), (_, y)) in a.iter().zip(b.iter()) {
            assert_eq!(x.map(f64::to_bits), y.map(f64::to_bits));
        }
    }
}
