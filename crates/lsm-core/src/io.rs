//! GeoTIFF input and output.
//!
//! Input is a single-band integer raster of class codes. Output writes one
//! Float32 page per band in band order, each carrying the GeoTIFF pixel-scale
//! (33550), tiepoint (33922) and key-directory (34735) tags and its band name
//! in `ImageDescription`. The key directory and its double/ASCII parameter
//! tags (34736, 34737) are copied from the input. A Mark-policy boundary mask
//! follows as a final 8-bit page named `BOUNDARY_MASK`.
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::{Gray32Float, Gray8};
use tiff::encoder::{ImageEncoder, TiffEncoder, TiffKind};
use tiff::tags::Tag;
use tracing::debug;

use crate::error::{LsmError, Result};
use crate::mosaic::{CalibrationStatus, OutputLsmRaster};
use crate::raster::{ClassifiedRaster, GeoTransform, SpatialRef};

pub const BOUNDARY_MASK_BAND: &str = "BOUNDARY_MASK";

// ── Reading ─────────────────────────────────────────────────────────────────

pub fn read_classified(path: &Path) -> Result<ClassifiedRaster> {
    let file = File::open(path)?;
    decode_classified(BufReader::new(file))
}

pub fn decode_classified<R: Read + Seek>(reader: R) -> Result<ClassifiedRaster> {
    let mut decoder = Decoder::new(reader)?;
    let (width, height) = decoder.dimensions()?;
    let (width, height) = (width as usize, height as usize);
    let transform = read_transform(&mut decoder)?;
    let spatial_ref = read_spatial_ref(&mut decoder);

    let mut raster = match decoder.read_image()? {
        DecodingResult::U8(buf) => ClassifiedRaster::from_codes(&buf, width, height, transform),
        DecodingResult::U16(buf) => ClassifiedRaster::from_codes(&buf, width, height, transform),
        DecodingResult::U32(buf) => ClassifiedRaster::from_codes(&buf, width, height, transform),
        DecodingResult::I8(buf) => ClassifiedRaster::from_codes(&buf, width, height, transform),
        DecodingResult::I16(buf) => ClassifiedRaster::from_codes(&buf, width, height, transform),
        DecodingResult::I32(buf) => ClassifiedRaster::from_codes(&buf, width, height, transform),
        _ => Err(LsmError::InputData("classified raster must hold integer class codes".into())),
    }?;
    debug!(
        width,
        height,
        cell_size = transform.cell_size,
        epsg = ?spatial_ref.epsg(),
        "Classified raster read"
    );
    raster.spatial_ref = spatial_ref;
    Ok(raster)
}

fn read_transform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<GeoTransform> {
    let missing = |what: &str| LsmError::InputData(format!("classified raster has no {what} tag"));
    let scale = decoder
        .get_tag_f64_vec(Tag::ModelPixelScaleTag)
        .map_err(|_| missing("ModelPixelScale"))?;
    let tiepoint = decoder
        .get_tag_f64_vec(Tag::ModelTiepointTag)
        .map_err(|_| missing("ModelTiepoint"))?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return Err(LsmError::InputData("malformed GeoTIFF georeferencing tags".into()));
    }
    if (scale[0] - scale[1]).abs() > 1e-9 * scale[0].abs().max(1.0) {
        return Err(LsmError::InputData(format!(
            "cells must be square, got {} x {}",
            scale[0], scale[1]
        )));
    }
    // tiepoint: [I, J, K, X, Y, Z]
    let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
    let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
    Ok(GeoTransform::new(origin_x, origin_y, scale[0]))
}

/// Key directory and parameters of the current image. A file without a key
/// directory gets the default projected directory.
fn read_spatial_ref<R: Read + Seek>(decoder: &mut Decoder<R>) -> SpatialRef {
    match decoder.get_tag_u16_vec(Tag::GeoKeyDirectoryTag) {
        Ok(geo_keys) if geo_keys.len() >= 4 => SpatialRef {
            geo_keys,
            double_params: decoder.get_tag_f64_vec(Tag::GeoDoubleParamsTag).unwrap_or_default(),
            ascii_params: decoder.get_tag_ascii_string(Tag::GeoAsciiParamsTag).ok(),
        },
        _ => SpatialRef::default(),
    }
}

/// Read back a raster written by [`write_lsm_raster`].
pub fn decode_lsm_raster<R: Read + Seek>(reader: R, scale: &str, status: CalibrationStatus) -> Result<OutputLsmRaster> {
    let mut decoder = Decoder::new(reader)?;
    let (width, height) = decoder.dimensions()?;
    let transform = read_transform(&mut decoder)?;
    let spatial_ref = read_spatial_ref(&mut decoder);
    let mut band_names = Vec::new();
    let mut bands = Vec::new();
    let mut boundary_mask = None;
    loop {
        let name = decoder.get_tag_ascii_string(Tag::ImageDescription).unwrap_or_default();
        match decoder.read_image()? {
            DecodingResult::F32(buf) => {
                band_names.push(name);
                bands.push(buf);
            }
            DecodingResult::U8(buf) if name == BOUNDARY_MASK_BAND => boundary_mask = Some(buf),
            _ => return Err(LsmError::InputData(format!("unexpected pixel type in band {name:?}"))),
        }
        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }
    Ok(OutputLsmRaster {
        scale: scale.to_string(),
        status,
        width: width as usize,
        height: height as usize,
        transform,
        spatial_ref,
        band_names,
        bands,
        boundary_mask,
    })
}

// ── Writing ─────────────────────────────────────────────────────────────────

fn write_geotags<W: Write + Seek, C: tiff::encoder::colortype::ColorType, K: TiffKind>(
    image: &mut ImageEncoder<'_, W, C, K>,
    transform: &GeoTransform,
    spatial_ref: &SpatialRef,
    name: &str,
) -> Result<()> {
    let scale = [transform.cell_size, transform.cell_size, 0.0];
    let tiepoint = [0.0, 0.0, 0.0, transform.origin_x, transform.origin_y, 0.0];
    let enc = image.encoder();
    enc.write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
    enc.write_tag(Tag::ModelTiepointTag, &tiepoint[..])?;
    enc.write_tag(Tag::GeoKeyDirectoryTag, &spatial_ref.geo_keys[..])?;
    if !spatial_ref.double_params.is_empty() {
        enc.write_tag(Tag::GeoDoubleParamsTag, &spatial_ref.double_params[..])?;
    }
    if let Some(ascii) = &spatial_ref.ascii_params {
        enc.write_tag(Tag::GeoAsciiParamsTag, ascii.as_str())?;
    }
    enc.write_tag(Tag::ImageDescription, name)?;
    Ok(())
}

pub fn write_lsm_raster(path: &Path, raster: &OutputLsmRaster) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    encode_lsm_raster(&mut writer, raster)?;
    writer.flush()?;
    Ok(())
}

pub fn encode_lsm_raster<W: Write + Seek>(writer: W, raster: &OutputLsmRaster) -> Result<()> {
    let mut encoder = TiffEncoder::new(writer)?;
    let (w, h) = (raster.width as u32, raster.height as u32);
    for (name, band) in raster.band_names.iter().zip(&raster.bands) {
        let mut image = encoder.new_image::<Gray32Float>(w, h)?;
        write_geotags(&mut image, &raster.transform, &raster.spatial_ref, name)?;
        image.write_data(band)?;
    }
    if let Some(mask) = &raster.boundary_mask {
        let mut image = encoder.new_image::<Gray8>(w, h)?;
        write_geotags(&mut image, &raster.transform, &raster.spatial_ref, BOUNDARY_MASK_BAND)?;
        image.write_data(mask)?;
    }
    Ok(())
}
