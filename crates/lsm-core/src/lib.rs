//! Landscape structure metrics from classified canopy imagery, with
//! simulation-based correction of the bias introduced by cast shadows.
//!
//! Production path: [`io::read_classified`] → [`pipeline::process_raster`]
//! (partition → delineate → metrics → calibrate → mosaic) →
//! [`io::write_lsm_raster`]. Calibration path: [`simulate::simulate`] →
//! [`calibrate::build_samples`] → [`calibrate::CalibrationModel::fit`].

pub mod calibrate;
pub mod config;
pub mod error;
pub mod inventory;
pub mod io;
pub mod metrics;
pub mod mosaic;
pub mod partition;
pub mod patches;
pub mod pipeline;
pub mod raster;
pub mod simulate;

#[cfg(test)]
mod test_support;

pub use calibrate::{CalibrationModel, CalibrationSet};
pub use config::{LsmConfig, MetricSettings, Scale};
pub use error::{LsmError, Result};
pub use metrics::{Metric, MetricEngine, MetricVector};
pub use mosaic::{CalibrationStatus, OutputLsmRaster};
pub use pipeline::{process_raster, CancelToken};
pub use raster::{CellClass, ClassifiedRaster, GeoTransform, SpatialRef};
