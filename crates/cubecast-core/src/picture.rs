//! Decoded pictures
//!
//! A picture owns one contiguous pixel buffer laid out as the pixel format
//! dictates (packed formats row by row, planar formats plane by plane).
//! Buffers are allocated once by their pool and rewritten in place.

use serde::{Deserialize, Serialize};

use crate::{CubecastError, CubecastResult, PresentationTime};

/// Pixel formats understood by the pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8-bit packed R, G, B, A
    #[default]
    Rgba,
    /// 8-bit packed B, G, R, A
    Bgra,
    /// 8-bit packed R, G, B
    Rgb24,
    /// Planar Y, U, V with 2x2 chroma subsampling
    Yuv420p,
    /// Single 8-bit luma plane
    Gray8,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats, `None` for planar ones
    pub fn packed_bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Rgba | PixelFormat::Bgra => Some(4),
            PixelFormat::Rgb24 => Some(3),
            PixelFormat::Gray8 => Some(1),
            PixelFormat::Yuv420p => None,
        }
    }

    /// Total buffer size for a picture of this format
    pub fn buffer_size(self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            PixelFormat::Yuv420p => {
                let chroma = w.div_ceil(2) * h.div_ceil(2);
                w * h + 2 * chroma
            }
            packed => w * h * packed.packed_bytes_per_pixel().unwrap_or(1),
        }
    }

    /// Value a cold-start buffer is filled with, per byte position
    fn fill_byte(self, offset: usize, width: u32, height: u32) -> u8 {
        match self {
            // opaque black
            PixelFormat::Rgba | PixelFormat::Bgra => {
                if offset % 4 == 3 {
                    0xFF
                } else {
                    0
                }
            }
            PixelFormat::Rgb24 | PixelFormat::Gray8 => 0,
            // black luma, neutral chroma
            PixelFormat::Yuv420p => {
                if offset < width as usize * height as usize {
                    0x10
                } else {
                    0x80
                }
            }
        }
    }
}

/// Resolution and format of a picture
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PictureGeometry {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl PictureGeometry {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    /// Square face geometry
    pub fn square(resolution: u32, format: PixelFormat) -> Self {
        Self::new(resolution, resolution, format)
    }

    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.format.buffer_size(self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Picture - pixel buffer with geometry and presentation time
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Picture {
    geometry: PictureGeometry,
    data: Vec<u8>,
    /// Presentation time of the unit this picture was decoded from
    pub pts: PresentationTime,
}

impl Picture {
    /// Allocate a zeroed picture
    pub fn new(geometry: PictureGeometry) -> Self {
        Self {
            geometry,
            data: vec![0u8; geometry.buffer_size()],
            pts: PresentationTime::ZERO,
        }
    }

    /// Allocate a picture pre-filled with the format's black
    pub fn filled(geometry: PictureGeometry) -> Self {
        let mut picture = Self::new(geometry);
        picture.fill_default();
        picture
    }

    /// Wrap existing pixel data; the length must match the geometry
    pub fn from_data(geometry: PictureGeometry, data: Vec<u8>) -> CubecastResult<Self> {
        if data.len() != geometry.buffer_size() {
            return Err(CubecastError::InvalidGeometry {
                expected: geometry.buffer_size(),
                actual: data.len(),
            });
        }
        Ok(Self {
            geometry,
            data,
            pts: PresentationTime::ZERO,
        })
    }

    #[inline]
    pub fn geometry(&self) -> PictureGeometry {
        self.geometry
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.geometry.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.geometry.height
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.geometry.format
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Change geometry, reusing the allocation when it is large enough.
    /// Contents are unspecified afterwards.
    pub fn reshape(&mut self, geometry: PictureGeometry) {
        self.geometry = geometry;
        self.data.resize(geometry.buffer_size(), 0);
    }

    /// Overwrite with the format's default fill
    pub fn fill_default(&mut self) {
        let (format, w, h) = (self.geometry.format, self.geometry.width, self.geometry.height);
        for (i, b) in self.data.iter_mut().enumerate() {
            *b = format.fill_byte(i, w, h);
        }
    }

    /// Copy pixels and timestamp from another picture of the same geometry
    pub fn copy_from(&mut self, other: &Picture) -> CubecastResult<()> {
        if self.geometry != other.geometry {
            return Err(CubecastError::InvalidGeometry {
                expected: self.geometry.buffer_size(),
                actual: other.geometry.buffer_size(),
            });
        }
        self.data.copy_from_slice(&other.data);
        self.pts = other.pts;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_sizes() {
        assert_eq!(PixelFormat::Rgba.buffer_size(4, 4), 64);
        assert_eq!(PixelFormat::Rgb24.buffer_size(4, 4), 48);
        assert_eq!(PixelFormat::Yuv420p.buffer_size(4, 4), 24);
        // odd sizes round chroma up
        assert_eq!(PixelFormat::Yuv420p.buffer_size(3, 3), 9 + 2 * 4);
    }

    #[test]
    fn test_filled_rgba_is_opaque_black() {
        let pic = Picture::filled(PictureGeometry::square(2, PixelFormat::Rgba));
        assert_eq!(pic.data(), &[0, 0, 0, 255, 0, 0, 0, 255, 0, 0, 0, 255, 0, 0, 0, 255]);
    }

    #[test]
    fn test_filled_yuv_planes() {
        let pic = Picture::filled(PictureGeometry::square(2, PixelFormat::Yuv420p));
        assert_eq!(&pic.data()[..4], &[0x10; 4]);
        assert_eq!(&pic.data()[4..], &[0x80, 0x80]);
    }

    #[test]
    fn test_from_data_checks_length() {
        let geometry = PictureGeometry::square(2, PixelFormat::Gray8);
        assert!(Picture::from_data(geometry, vec![1, 2, 3, 4]).is_ok());
        assert!(Picture::from_data(geometry, vec![1, 2, 3]).is_err());
    }

    #[test]
    fn test_copy_from_requires_same_geometry() {
        let geometry = PictureGeometry::square(2, PixelFormat::Gray8);
        let mut src = Picture::from_data(geometry, vec![1, 2, 3, 4]).unwrap();
        src.pts = PresentationTime::from_millis(5);
        let mut dst = Picture::new(geometry);
        dst.copy_from(&src).unwrap();
        assert_eq!(dst, src);

        let mut other = Picture::new(PictureGeometry::square(3, PixelFormat::Gray8));
        assert!(other.copy_from(&src).is_err());
    }

    #[test]
    fn test_reshape_resizes_buffer() {
        let mut pic = Picture::new(PictureGeometry::square(2, PixelFormat::Rgba));
        pic.reshape(PictureGeometry::square(4, PixelFormat::Gray8));
        assert_eq!(pic.data().len(), 16);
        assert_eq!(pic.format(), PixelFormat::Gray8);
    }
}
