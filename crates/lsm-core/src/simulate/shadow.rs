//! Rasterisation of crowns and their cast shadows.
//!
//! Each crown is a vertical cylinder of diameter CW standing to the tree
//! height. Its shadow on flat ground is the disc of radius CW/2 swept along
//! the shadow direction for `H / tan(alt)`: a capsule around the segment from
//! the stem to the shadow tip. A cell is covered when its centre is.
use super::stand::{StandStems, Stem};
use super::sun::SunPosition;
use crate::raster::{CellClass, ClassifiedRaster, GeoTransform};

/// Paired renderings of one stand.
#[derive(Debug, Clone, PartialEq)]
pub struct StandRasters {
    /// Canopy/Other only, as seen without shadows.
    pub truth: ClassifiedRaster,
    /// Canopy over Shadow over Other, as seen by the sensor.
    pub observed: ClassifiedRaster,
}

fn segment_distance_sq(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let (abx, aby) = (b.0 - a.0, b.1 - a.1);
    let len_sq = abx * abx + aby * aby;
    let t = if len_sq > 0.0 {
        (((p.0 - a.0) * abx + (p.1 - a.1) * aby) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (dx, dy) = (p.0 - (a.0 + t * abx), p.1 - (a.1 + t * aby));
    dx * dx + dy * dy
}

/// Mark every cell whose centre lies within `radius` of segment `a → b`.
fn paint(mask: &mut [bool], side: usize, cell_size: f64, a: (f64, f64), b: (f64, f64), radius: f64) {
    let r_sq = radius * radius;
    // Cell index range covering the capsule's bounding box; y grows north
    // while rows grow south.
    let to_col = |x: f64| (x / cell_size).floor();
    let to_row = |y: f64| (side as f64 - y / cell_size).floor();
    let c0 = to_col(a.0.min(b.0) - radius).max(0.0) as usize;
    let c1 = to_col(a.0.max(b.0) + radius).min(side as f64 - 1.0);
    let r0 = to_row(a.1.max(b.1) + radius).max(0.0) as usize;
    let r1 = to_row(a.1.min(b.1) - radius).min(side as f64 - 1.0);
    if c1 < 0.0 || r1 < 0.0 {
        return;
    }
    let (c1, r1) = (c1 as usize, r1 as usize);
    for row in r0..=r1 {
        let y = (side as f64 - row as f64 - 0.5) * cell_size;
        for col in c0..=c1 {
            let x = (col as f64 + 0.5) * cell_size;
            if segment_distance_sq((x, y), a, b) <= r_sq {
                mask[row * side + col] = true;
            }
        }
    }
}

fn shadow_tip(stem: &Stem, sun: &SunPosition) -> (f64, f64) {
    let (dx, dy) = sun.shadow_direction();
    let len = sun.shadow_length(stem.height_m);
    (stem.x + dx * len, stem.y + dy * len)
}

/// Render a stand at `cell_size` for one sun position.
pub fn render(stand: &StandStems, sun: &SunPosition, cell_size: f64) -> StandRasters {
    let side = (stand.side_m / cell_size).round().max(1.0) as usize;
    let n = side * side;
    let mut crown = vec![false; n];
    let mut shade = vec![false; n];

    for stem in &stand.stems {
        let centre = (stem.x, stem.y);
        let radius = stem.crown_width_m / 2.0;
        paint(&mut crown, side, cell_size, centre, centre, radius);
        paint(&mut shade, side, cell_size, centre, shadow_tip(stem, sun), radius);
    }

    let transform = GeoTransform::new(0.0, side as f64 * cell_size, cell_size);
    let mut truth = ClassifiedRaster::new(side, side, transform, Some(CellClass::Other));
    let mut observed = truth.clone();
    for i in 0..n {
        if crown[i] {
            truth.cells[i] = Some(CellClass::Canopy);
            observed.cells[i] = Some(CellClass::Canopy);
        } else if shade[i] {
            observed.cells[i] = Some(CellClass::Shadow);
        }
    }
    StandRasters { truth, observed }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lone_tree(x: f64, y: f64) -> StandStems {
        StandStems {
            side_m: 20.0,
            stems: vec![Stem { x, y, dbh_cm: 30.0, crown_width_m: 4.0, height_m: 10.0 }],
            dropped: 0,
        }
    }

    #[test]
    fn overhead_sun_leaves_observed_equal_to_truth() {
        let r = render(&lone_tree(10.0, 10.0), &SunPosition::new(90.0, 180.0), 1.0);
        assert_eq!(r.truth, r.observed);
        assert!(r.truth.class_counts()[CellClass::Canopy.index()] > 0);
    }

    #[test]
    fn southern_sun_casts_shadow_north_of_crown() {
        let r = render(&lone_tree(10.0, 5.0), &SunPosition::new(45.0, 180.0), 1.0);
        let counts = r.observed.class_counts();
        assert!(counts[CellClass::Shadow.index()] > 0);
        assert_eq!(r.truth.class_counts()[CellClass::Shadow.index()], 0);
        // Shadow cells lie north (lower row index) of the stem row.
        let stem_row = 20 - 5 - 1;
        for row in 0..20 {
            for col in 0..20 {
                if r.observed.get(row, col) == Some(CellClass::Shadow) {
                    assert!(row <= stem_row, "shadow at row {row}");
                }
            }
        }
        // Canopy is identical in both renderings.
        assert_eq!(counts[CellClass::Canopy.index()], r.truth.class_counts()[CellClass::Canopy.index()]);
    }

    #[test]
    fn crowns_outside_the_stand_are_clipped() {
        let r = render(&lone_tree(0.0, 0.0), &SunPosition::new(30.0, 45.0), 1.0);
        assert_eq!(r.truth.width, 20);
        assert!(r.truth.class_counts()[CellClass::Canopy.index()] > 0);
    }

    #[test]
    fn empty_stand_is_all_other() {
        let stand = StandStems { side_m: 10.0, stems: vec![], dropped: 0 };
        let r = render(&stand, &SunPosition::new(50.0, 180.0), 0.5);
        assert_eq!(r.observed.class_counts(), [0, 0, 400]);
    }
}
