//! Sublandscape partitioning.
//!
//! Windows of `side` cells start at every multiple of `step` along both axes
//! (`step = side` for disjoint sampling). The output grid has one cell per
//! window, of size `step` cells, shifted by `(side − step) / 2` cells so that
//! each output cell centre coincides with its window's centroid:
//! ```text
//!   centre(j) = origin + ((side − step)/2 + j·step + step/2) · cs
//!             = origin + (j·step + side/2) · cs
//! ```
use crate::config::{BoundaryPolicy, LsmConfig, Scale, WindowGeometry};
use crate::error::Result;
use crate::raster::GeoTransform;

/// One analysis window (sublandscape).
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisWindow {
    /// Position in the output grid.
    pub grid_row: usize,
    pub grid_col: usize,
    /// Upper-left cell in the source raster.
    pub row: usize,
    pub col: usize,
    /// Extent after clipping to the raster.
    pub rows: usize,
    pub cols: usize,
    /// Map coordinates of the nominal (unclipped) window centroid.
    pub centroid: (f64, f64),
    /// True when the window overhangs the raster edge.
    pub boundary: bool,
}

/// All windows of one raster at one scale, plus the output grid they map to.
#[derive(Debug, Clone)]
pub struct Partition {
    pub scale: Scale,
    pub geometry: WindowGeometry,
    pub grid_rows: usize,
    pub grid_cols: usize,
    pub output_transform: GeoTransform,
    pub windows: Vec<AnalysisWindow>,
}

fn windows_along(len: usize, geometry: WindowGeometry, boundary: BoundaryPolicy) -> usize {
    match boundary {
        BoundaryPolicy::Exclude if len >= geometry.side => (len - geometry.side) / geometry.step + 1,
        BoundaryPolicy::Exclude => 0,
        BoundaryPolicy::Mark => len.div_ceil(geometry.step),
    }
}

/// Partition a `width` × `height` raster placed by `transform`.
/// Fails only on an invalid configuration.
pub fn partition(width: usize, height: usize, transform: GeoTransform, config: &LsmConfig) -> Result<Partition> {
    let geometry = config.validate(transform.cell_size)?;
    let WindowGeometry { side, step } = geometry;
    let cs = transform.cell_size;

    let grid_rows = windows_along(height, geometry, config.boundary);
    let grid_cols = windows_along(width, geometry, config.boundary);

    let shift = (side - step) as f64 / 2.0 * cs;
    let output_transform = GeoTransform::new(
        transform.origin_x + shift,
        transform.origin_y - shift,
        step as f64 * cs,
    );

    let mut windows = Vec::with_capacity(grid_rows * grid_cols);
    for gr in 0..grid_rows {
        for gc in 0..grid_cols {
            let (row, col) = (gr * step, gc * step);
            let rows = side.min(height - row);
            let cols = side.min(width - col);
            windows.push(AnalysisWindow {
                grid_row: gr,
                grid_col: gc,
                row,
                col,
                rows,
                cols,
                centroid: (
                    transform.origin_x + (col as f64 + side as f64 / 2.0) * cs,
                    transform.origin_y - (row as f64 + side as f64 / 2.0) * cs,
                ),
                boundary: rows < side || cols < side,
            });
        }
    }

    Ok(Partition {
        scale: config.scale.clone(),
        geometry,
        grid_rows,
        grid_cols,
        output_transform,
        windows,
    })
}
