/// Still-image collaborator: converts a captured frame to RGB and writes it as
/// PPM or JPEG.
use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::pnm::{PnmEncoder, PnmSubtype, SampleEncoding};
use image::RgbImage;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::encoder::create_parent_dir;
use crate::event::FileType;
use crate::frame::{split_planes, ChromaPlanes, ImageGeometry, PixelFormat};

/// Encoding used for stills, chosen by `global.ppm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StillFormat {
    Ppm,
    Jpeg,
}

impl StillFormat {
    pub fn from_ppm_flag(ppm: bool) -> Self {
        if ppm {
            StillFormat::Ppm
        } else {
            StillFormat::Jpeg
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            StillFormat::Ppm => "ppm",
            StillFormat::Jpeg => "jpg",
        }
    }
}

pub trait PictureWriter: Send {
    fn write(&mut self, path: &Path, frame: &[u8], file_type: FileType) -> Result<()>;
}

/// Writes stills to disk with the `image` crate.
pub struct ImageFileWriter {
    format: StillFormat,
    quality: u8,
    geometry: ImageGeometry,
    grey_chroma: Option<ChromaPlanes>,
}

impl ImageFileWriter {
    pub fn new(format: StillFormat, quality: u8, geometry: ImageGeometry) -> Self {
        Self {
            format,
            quality: quality.clamp(1, 100),
            geometry,
            grey_chroma: ChromaPlanes::for_geometry(&geometry),
        }
    }
}

impl PictureWriter for ImageFileWriter {
    fn write(&mut self, path: &Path, frame: &[u8], file_type: FileType) -> Result<()> {
        let rgb = to_rgb(frame, &self.geometry, self.grey_chroma.as_ref())?;
        create_parent_dir(path)?;
        let file = File::create(path)
            .with_context(|| format!("Failed to create picture file {}", path.display()))?;
        let mut out = BufWriter::new(file);
        let encoded = match self.format {
            StillFormat::Jpeg => {
                rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, self.quality))
            }
            StillFormat::Ppm => rgb.write_with_encoder(
                PnmEncoder::new(&mut out).with_subtype(PnmSubtype::Pixmap(SampleEncoding::Binary)),
            ),
        };
        encoded.with_context(|| format!("Failed to encode picture {}", path.display()))?;
        out.flush()
            .with_context(|| format!("Failed to write picture {}", path.display()))?;
        log::debug!("[picture] Wrote type {file_type} picture {}", path.display());
        Ok(())
    }
}

/// Full-range BT.601 conversion in 16.16 fixed point.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = i32::from(y);
    let u = i32::from(u) - 128;
    let v = i32::from(v) - 128;
    let r = y + ((91_881 * v) >> 16);
    let g = y - ((22_554 * u + 46_802 * v) >> 16);
    let b = y + ((116_130 * u) >> 16);
    [clamp_sample(r), clamp_sample(g), clamp_sample(b)]
}

fn clamp_sample(x: i32) -> u8 {
    x.clamp(0, 255) as u8
}

fn to_rgb(
    frame: &[u8],
    geometry: &ImageGeometry,
    chroma: Option<&ChromaPlanes>,
) -> Result<RgbImage> {
    let (w, h) = (geometry.width as usize, geometry.height as usize);
    let planes = split_planes(frame, geometry, chroma)?;
    let mut rgb = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        for col in 0..w {
            let luma = planes.y[row * w + col];
            let px = match geometry.format {
                PixelFormat::Grey => [luma; 3],
                PixelFormat::Yuv420p => {
                    let c = (row / 2) * (w / 2) + col / 2;
                    yuv_to_rgb(luma, planes.u[c], planes.v[c])
                }
            };
            rgb.extend_from_slice(&px);
        }
    }
    RgbImage::from_raw(geometry.width, geometry.height, rgb)
        .context("RGB buffer does not match the frame size")
}
