//! Raster builders for unit tests: `C` canopy, `S` shadow, `O` other, any
//! other character no-data.
use crate::raster::{ClassifiedRaster, GeoTransform};

pub(crate) fn grid_with_cell_size(rows: &[&str], cell_size: f64) -> ClassifiedRaster {
    let h = rows.len();
    let w = rows.first().map_or(0, |r| r.len());
    let codes: Vec<u8> = rows
        .iter()
        .flat_map(|r| {
            r.bytes().map(|b| match b {
                b'C' => 0u8,
                b'S' => 1,
                b'O' => 2,
                _ => 255,
            })
        })
        .collect();
    let transform = GeoTransform::new(0.0, h as f64 * cell_size, cell_size);
    ClassifiedRaster::from_codes(&codes, w, h, transform).expect("rows must have equal length")
}

pub(crate) fn grid(rows: &[&str]) -> ClassifiedRaster {
    grid_with_cell_size(rows, 1.0)
}
