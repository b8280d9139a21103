/// Raw frame layout shared by the encoder sessions and the still-image writer.
use anyhow::{bail, Result};
use serde::Deserialize;

/// Mid-point of the 8-bit sample range; neutral chroma.
pub const CHROMA_MID_GRAY: u8 = 128;

/// Pixel layout delivered by the capture stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Planar Y, U, V with quarter-resolution chroma.
    #[default]
    Yuv420p,
    /// Single luma plane.
    Grey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageGeometry {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl ImageGeometry {
    /// Both dimensions must be non-zero and even so the chroma planes line up.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("Frame dimensions must be non-zero (got {width}x{height})");
        }
        if width % 2 != 0 || height % 2 != 0 {
            bail!("Frame dimensions must be even (got {width}x{height})");
        }
        Ok(Self { width, height, format })
    }

    pub fn luma_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn chroma_len(&self) -> usize {
        self.luma_len() / 4
    }

    /// Bytes in one captured frame.
    pub fn frame_len(&self) -> usize {
        match self.format {
            PixelFormat::Yuv420p => self.luma_len() + 2 * self.chroma_len(),
            PixelFormat::Grey => self.luma_len(),
        }
    }
}

/// Borrowed Y/U/V planes ready for an encoder.
#[derive(Debug, Clone, Copy)]
pub struct YuvPlanes<'a> {
    pub y: &'a [u8],
    pub u: &'a [u8],
    pub v: &'a [u8],
}

/// Placeholder chroma for grayscale sources: `(width*height)/2` bytes holding
/// the U plane followed by the V plane, both filled with [`CHROMA_MID_GRAY`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromaPlanes {
    buf: Vec<u8>,
    plane_len: usize,
}

impl ChromaPlanes {
    pub fn mid_gray(geometry: &ImageGeometry) -> Self {
        Self {
            buf: vec![CHROMA_MID_GRAY; geometry.luma_len() / 2],
            plane_len: geometry.chroma_len(),
        }
    }

    /// Only grayscale sources need synthesized chroma.
    pub fn for_geometry(geometry: &ImageGeometry) -> Option<Self> {
        match geometry.format {
            PixelFormat::Grey => Some(Self::mid_gray(geometry)),
            PixelFormat::Yuv420p => None,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn u(&self) -> &[u8] {
        &self.buf[..self.plane_len]
    }

    pub fn v(&self) -> &[u8] {
        &self.buf[self.plane_len..2 * self.plane_len]
    }
}

/// Splits `frame` into encoder planes. Chroma comes from the frame itself for
/// planar sources and from `chroma` for grayscale ones.
pub fn split_planes<'a>(
    frame: &'a [u8],
    geometry: &ImageGeometry,
    chroma: Option<&'a ChromaPlanes>,
) -> Result<YuvPlanes<'a>> {
    if frame.len() < geometry.frame_len() {
        bail!(
            "Frame too short: {} bytes, expected {} for {}x{}",
            frame.len(),
            geometry.frame_len(),
            geometry.width,
            geometry.height
        );
    }
    let luma = geometry.luma_len();
    let quarter = geometry.chroma_len();
    match geometry.format {
        PixelFormat::Yuv420p => Ok(YuvPlanes {
            y: &frame[..luma],
            u: &frame[luma..luma + quarter],
            v: &frame[luma + quarter..luma + 2 * quarter],
        }),
        PixelFormat::Grey => {
            let Some(chroma) = chroma else {
                bail!("Grayscale frame fed without a conversion buffer");
            };
            Ok(YuvPlanes { y: &frame[..luma], u: chroma.u(), v: chroma.v() })
        }
    }
}
