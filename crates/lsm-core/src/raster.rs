use serde::{Deserialize, Serialize};

use crate::error::{LsmError, Result};

/// Land-cover class of one raster cell, as produced by the upstream classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CellClass {
    Canopy,
    Shadow,
    Other,
}

impl CellClass {
    pub const ALL: [CellClass; 3] = [CellClass::Canopy, CellClass::Shadow, CellClass::Other];

    /// Decode the integer class code {0=Canopy, 1=Shadow, 2=Other}.
    /// Any other code is no-data.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(CellClass::Canopy),
            1 => Some(CellClass::Shadow),
            2 => Some(CellClass::Other),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// North-up affine placement of a raster with square cells.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// X coordinate of the upper-left corner.
    pub origin_x: f64,
    /// Y coordinate of the upper-left corner.
    pub origin_y: f64,
    /// Linear ground resolution in metres.
    pub cell_size: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, cell_size: f64) -> Self {
        Self { origin_x, origin_y, cell_size }
    }

    /// Map coordinates of the centre of cell `(row, col)`.
    pub fn cell_center(&self, row: f64, col: f64) -> (f64, f64) {
        (
            self.origin_x + (col + 0.5) * self.cell_size,
            self.origin_y - (row + 0.5) * self.cell_size,
        )
    }

    /// Transform of a sub-grid whose upper-left cell is `(row, col)` here.
    pub fn offset(&self, row: usize, col: usize) -> Self {
        Self {
            origin_x: self.origin_x + col as f64 * self.cell_size,
            origin_y: self.origin_y - row as f64 * self.cell_size,
            cell_size: self.cell_size,
        }
    }
}

// ── Spatial reference ───────────────────────────────────────────────────────

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

/// GeoTIFF key directory and its parameter tags, carried from the input to
/// every output raster unchanged.
///
/// Directory layout: `[version, revision, minor, n_keys]` followed by
/// `n_keys` entries of `[key_id, tag_location, count, value_or_index]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialRef {
    pub geo_keys: Vec<u16>,
    pub double_params: Vec<f64>,
    pub ascii_params: Option<String>,
}

impl Default for SpatialRef {
    /// Projected model, pixel-is-area, no CRS code.
    fn default() -> Self {
        Self {
            geo_keys: vec![1, 1, 0, 2, GT_MODEL_TYPE, 0, 1, 1, GT_RASTER_TYPE, 0, 1, 1],
            double_params: Vec::new(),
            ascii_params: None,
        }
    }
}

impl SpatialRef {
    /// Projected CRS with the given EPSG code.
    pub fn projected_epsg(code: u16) -> Self {
        Self {
            geo_keys: vec![
                1, 1, 0, 3,
                GT_MODEL_TYPE, 0, 1, 1,
                GT_RASTER_TYPE, 0, 1, 1,
                PROJECTED_CS_TYPE, 0, 1, code,
            ],
            ..Self::default()
        }
    }

    /// EPSG code from ProjectedCSTypeGeoKey or GeographicTypeGeoKey, if the
    /// directory holds one inline.
    pub fn epsg(&self) -> Option<u16> {
        let n = *self.geo_keys.get(3)? as usize;
        self.geo_keys
            .get(4..)?
            .chunks_exact(4)
            .take(n)
            .find(|k| (k[0] == PROJECTED_CS_TYPE || k[0] == GEOGRAPHIC_TYPE) && k[1] == 0 && k[3] > 0)
            .map(|k| k[3])
    }
}

// ── Classified raster ───────────────────────────────────────────────────────

/// A classified raster (or a window cut from one), row-major.
/// `None` marks a no-data cell.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedRaster {
    pub cells: Vec<Option<CellClass>>,
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub spatial_ref: SpatialRef,
}

impl ClassifiedRaster {
    /// Create a raster filled with the given value.
    pub fn new(width: usize, height: usize, transform: GeoTransform, fill: Option<CellClass>) -> Self {
        Self {
            cells: vec![fill; width * height],
            width,
            height,
            transform,
            spatial_ref: SpatialRef::default(),
        }
    }

    /// Build a raster from integer class codes; unknown codes become no-data.
    pub fn from_codes<T>(codes: &[T], width: usize, height: usize, transform: GeoTransform) -> Result<Self>
    where
        T: Copy + Into<i64>,
    {
        if codes.len() != width * height {
            return Err(LsmError::InputData(format!(
                "expected {} cells for a {width}x{height} raster, got {}",
                width * height,
                codes.len()
            )));
        }
        let cells = codes.iter().map(|&c| CellClass::from_code(c.into())).collect();
        Ok(Self { cells, width, height, transform, spatial_ref: SpatialRef::default() })
    }

    #[inline]
    pub fn cell_size(&self) -> f64 {
        self.transform.cell_size
    }

    /// Ground area of one cell in m².
    #[inline]
    pub fn cell_area(&self) -> f64 {
        self.transform.cell_size * self.transform.cell_size
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> Option<CellClass> {
        self.cells[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: Option<CellClass>) {
        self.cells[row * self.width + col] = val;
    }

    /// Owned copy of the sub-grid starting at `(row, col)`, clipped to the
    /// raster extent. The window may be empty when it lies fully outside.
    pub fn window(&self, row: usize, col: usize, rows: usize, cols: usize) -> ClassifiedRaster {
        let r_end = (row + rows).min(self.height);
        let c_end = (col + cols).min(self.width);
        let h = r_end.saturating_sub(row);
        let w = c_end.saturating_sub(col);
        let mut cells = Vec::with_capacity(w * h);
        for r in row..row + h {
            let start = r * self.width + col;
            cells.extend_from_slice(&self.cells[start..start + w]);
        }
        ClassifiedRaster {
            cells,
            width: w,
            height: h,
            transform: self.transform.offset(row, col),
            spatial_ref: self.spatial_ref.clone(),
        }
    }

    /// Cell counts per class, indexed by `CellClass::index`.
    pub fn class_counts(&self) -> [usize; 3] {
        let mut counts = [0usize; 3];
        for class in self.cells.iter().flatten() {
            counts[class.index()] += 1;
        }
        counts
    }

    /// Number of cells carrying a valid class.
    pub fn valid_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    /// Fraction of valid cells belonging to `class`; `None` when the raster
    /// holds no valid cell.
    pub fn proportion(&self, class: CellClass) -> Option<f64> {
        let valid = self.valid_count();
        if valid == 0 {
            return None;
        }
        Some(self.class_counts()[class.index()] as f64 / valid as f64)
    }
}
