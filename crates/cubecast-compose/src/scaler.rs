//! Image scaler seam
//!
//! A scaler is built for one (source, target) geometry pair and reused for
//! every picture of that shape. `NearestScaler` is the built-in
//! implementation: nearest-neighbour resampling with BT.601 conversion from
//! planar YUV to the packed RGB formats.

use cubecast_core::{CubecastError, CubecastResult, Picture, PictureGeometry, PixelFormat};

/// ImageScaler - resample pictures of one source geometry to one target
pub trait ImageScaler: Send {
    fn source(&self) -> PictureGeometry;

    fn target(&self) -> PictureGeometry;

    /// Resample `src` into `dst`, reshaping `dst` to the target if needed
    fn scale(&mut self, src: &Picture, dst: &mut Picture) -> CubecastResult<()>;
}

/// Builds scalers for a geometry pair
pub trait ScalerFactory: Send + Sync {
    fn create(&self, source: PictureGeometry, target: PictureGeometry) -> CubecastResult<Box<dyn ImageScaler>>;
}

impl<F> ScalerFactory for F
where
    F: Fn(PictureGeometry, PictureGeometry) -> CubecastResult<Box<dyn ImageScaler>> + Send + Sync,
{
    fn create(&self, source: PictureGeometry, target: PictureGeometry) -> CubecastResult<Box<dyn ImageScaler>> {
        self(source, target)
    }
}

/// Factory for `NearestScaler`
#[derive(Clone, Copy, Debug, Default)]
pub struct NearestScalerFactory;

impl ScalerFactory for NearestScalerFactory {
    fn create(&self, source: PictureGeometry, target: PictureGeometry) -> CubecastResult<Box<dyn ImageScaler>> {
        Ok(Box::new(NearestScaler::new(source, target)?))
    }
}

/// One plane inside a picture buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Plane {
    offset: usize,
    width: usize,
    height: usize,
    bytes_per_pixel: usize,
}

fn planes(geometry: PictureGeometry) -> Vec<Plane> {
    let (w, h) = (geometry.width as usize, geometry.height as usize);
    match geometry.format.packed_bytes_per_pixel() {
        Some(bpp) => vec![Plane {
            offset: 0,
            width: w,
            height: h,
            bytes_per_pixel: bpp,
        }],
        None => {
            let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
            vec![
                Plane { offset: 0, width: w, height: h, bytes_per_pixel: 1 },
                Plane { offset: w * h, width: cw, height: ch, bytes_per_pixel: 1 },
                Plane { offset: w * h + cw * ch, width: cw, height: ch, bytes_per_pixel: 1 },
            ]
        }
    }
}

/// Nearest source index for every target index
fn index_map(source: usize, target: usize) -> Vec<usize> {
    (0..target).map(|t| t * source / target.max(1)).collect()
}

#[derive(Debug)]
struct PlaneMap {
    src: Plane,
    dst: Plane,
    cols: Vec<usize>,
    rows: Vec<usize>,
}

impl PlaneMap {
    fn new(src: Plane, dst: Plane) -> Self {
        Self {
            cols: index_map(src.width, dst.width),
            rows: index_map(src.height, dst.height),
            src,
            dst,
        }
    }
}

#[derive(Debug)]
enum Mode {
    /// Same format: resample plane by plane
    Planes(Vec<PlaneMap>),
    /// Format change into a packed format: resample on the luma grid
    Convert(PlaneMap),
}

/// NearestScaler - nearest-neighbour resampler with format conversion
#[derive(Debug)]
pub struct NearestScaler {
    source: PictureGeometry,
    target: PictureGeometry,
    mode: Mode,
}

impl NearestScaler {
    pub fn new(source: PictureGeometry, target: PictureGeometry) -> CubecastResult<Self> {
        if source.is_empty() || target.is_empty() {
            return Err(CubecastError::Allocation(format!(
                "cannot scale {}x{} to {}x{}",
                source.width, source.height, target.width, target.height
            )));
        }

        let mode = if source.format == target.format {
            Mode::Planes(
                planes(source)
                    .into_iter()
                    .zip(planes(target))
                    .map(|(s, d)| PlaneMap::new(s, d))
                    .collect(),
            )
        } else if target.format.packed_bytes_per_pixel().is_some() {
            let luma = |g: PictureGeometry| Plane {
                offset: 0,
                width: g.width as usize,
                height: g.height as usize,
                bytes_per_pixel: 1,
            };
            Mode::Convert(PlaneMap::new(luma(source), luma(target)))
        } else {
            return Err(CubecastError::Allocation(format!(
                "no conversion from {:?} to {:?}",
                source.format, target.format
            )));
        };

        Ok(Self { source, target, mode })
    }
}

impl ImageScaler for NearestScaler {
    fn source(&self) -> PictureGeometry {
        self.source
    }

    fn target(&self) -> PictureGeometry {
        self.target
    }

    fn scale(&mut self, src: &Picture, dst: &mut Picture) -> CubecastResult<()> {
        if src.geometry() != self.source {
            return Err(CubecastError::InvalidGeometry {
                expected: self.source.buffer_size(),
                actual: src.geometry().buffer_size(),
            });
        }
        if dst.geometry() != self.target {
            dst.reshape(self.target);
        }

        let input = src.data();
        let source = self.source;
        let target = self.target.format;
        let output = dst.data_mut();

        match &self.mode {
            Mode::Planes(maps) => {
                for map in maps {
                    let bpp = map.src.bytes_per_pixel;
                    for (dy, &sy) in map.rows.iter().enumerate() {
                        let src_row = map.src.offset + sy * map.src.width * bpp;
                        let dst_row = map.dst.offset + dy * map.dst.width * bpp;
                        for (dx, &sx) in map.cols.iter().enumerate() {
                            let s = src_row + sx * bpp;
                            let d = dst_row + dx * bpp;
                            output[d..d + bpp].copy_from_slice(&input[s..s + bpp]);
                        }
                    }
                }
            }
            Mode::Convert(map) => {
                let bpp = target.packed_bytes_per_pixel().unwrap_or(4);
                for (dy, &sy) in map.rows.iter().enumerate() {
                    for (dx, &sx) in map.cols.iter().enumerate() {
                        let rgba = read_rgba(input, source, sx, sy);
                        let d = (dy * map.dst.width + dx) * bpp;
                        write_rgba(&mut output[d..d + bpp], target, rgba);
                    }
                }
            }
        }
        dst.pts = src.pts;
        Ok(())
    }
}

fn read_rgba(data: &[u8], geometry: PictureGeometry, x: usize, y: usize) -> [u8; 4] {
    let w = geometry.width as usize;
    match geometry.format {
        PixelFormat::Rgba => {
            let i = (y * w + x) * 4;
            [data[i], data[i + 1], data[i + 2], data[i + 3]]
        }
        PixelFormat::Bgra => {
            let i = (y * w + x) * 4;
            [data[i + 2], data[i + 1], data[i], data[i + 3]]
        }
        PixelFormat::Rgb24 => {
            let i = (y * w + x) * 3;
            [data[i], data[i + 1], data[i + 2], 0xFF]
        }
        PixelFormat::Gray8 => {
            let v = data[y * w + x];
            [v, v, v, 0xFF]
        }
        PixelFormat::Yuv420p => {
            let h = geometry.height as usize;
            let cw = w.div_ceil(2);
            let ch = h.div_ceil(2);
            let c = (y / 2) * cw + x / 2;
            yuv_to_rgba(data[y * w + x], data[w * h + c], data[w * h + cw * ch + c])
        }
    }
}

fn write_rgba(out: &mut [u8], format: PixelFormat, [r, g, b, a]: [u8; 4]) {
    match format {
        PixelFormat::Rgba => out.copy_from_slice(&[r, g, b, a]),
        PixelFormat::Bgra => out.copy_from_slice(&[b, g, r, a]),
        PixelFormat::Rgb24 => out.copy_from_slice(&[r, g, b]),
        PixelFormat::Gray8 => {
            out[0] = ((77 * r as u32 + 150 * g as u32 + 29 * b as u32) >> 8) as u8;
        }
        // rejected at construction
        PixelFormat::Yuv420p => {}
    }
}

/// BT.601 limited range
fn yuv_to_rgba(y: u8, u: u8, v: u8) -> [u8; 4] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| (x >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e + 128),
        clamp(298 * c - 100 * d - 208 * e + 128),
        clamp(298 * c + 516 * d + 128),
        0xFF,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(w: u32, h: u32, data: Vec<u8>) -> Picture {
        Picture::from_data(PictureGeometry::new(w, h, PixelFormat::Gray8), data).unwrap()
    }

    #[test]
    fn test_upscale_gray_doubles_pixels() {
        let src = gray(2, 1, vec![10, 20]);
        let mut dst = Picture::new(PictureGeometry::new(0, 0, PixelFormat::Gray8));
        let mut scaler = NearestScaler::new(src.geometry(), PictureGeometry::new(4, 2, PixelFormat::Gray8)).unwrap();
        scaler.scale(&src, &mut dst).unwrap();
        assert_eq!(dst.data(), &[10, 10, 20, 20, 10, 10, 20, 20]);
    }

    #[test]
    fn test_downscale_rgba() {
        let geometry = PictureGeometry::new(2, 2, PixelFormat::Rgba);
        let data: Vec<u8> = (0..16).collect();
        let src = Picture::from_data(geometry, data).unwrap();
        let target = PictureGeometry::square(1, PixelFormat::Rgba);
        let mut dst = Picture::new(target);
        NearestScaler::new(geometry, target).unwrap().scale(&src, &mut dst).unwrap();
        assert_eq!(dst.data(), &[0, 1, 2, 3]);
    }

    #[test]
    fn test_yuv_planes_scaled_separately() {
        let geometry = PictureGeometry::square(2, PixelFormat::Yuv420p);
        let src = Picture::from_data(geometry, vec![1, 2, 3, 4, 50, 60]).unwrap();
        let target = PictureGeometry::square(4, PixelFormat::Yuv420p);
        let mut dst = Picture::new(target);
        NearestScaler::new(geometry, target).unwrap().scale(&src, &mut dst).unwrap();
        assert_eq!(&dst.data()[..4], &[1, 1, 2, 2]);
        assert_eq!(&dst.data()[16..20], &[50, 50, 50, 50]);
        assert_eq!(&dst.data()[20..24], &[60, 60, 60, 60]);
    }

    #[test]
    fn test_yuv_to_rgba_black_and_white() {
        assert_eq!(yuv_to_rgba(16, 128, 128), [0, 0, 0, 255]);
        assert_eq!(yuv_to_rgba(235, 128, 128), [255, 255, 255, 255]);
    }

    #[test]
    fn test_convert_yuv_to_bgra() {
        let geometry = PictureGeometry::square(2, PixelFormat::Yuv420p);
        let src = Picture::from_data(geometry, vec![235, 235, 235, 235, 128, 128]).unwrap();
        let target = PictureGeometry::square(2, PixelFormat::Bgra);
        let mut dst = Picture::new(target);
        NearestScaler::new(geometry, target).unwrap().scale(&src, &mut dst).unwrap();
        assert!(dst.data().iter().all(|&b| b == 255));
    }

    #[test]
    fn test_rejects_wrong_source_and_empty_geometry() {
        let target = PictureGeometry::square(2, PixelFormat::Gray8);
        assert!(NearestScaler::new(PictureGeometry::new(0, 2, PixelFormat::Gray8), target).is_err());
        assert!(NearestScaler::new(target, PictureGeometry::square(2, PixelFormat::Yuv420p)).is_err());

        let mut scaler = NearestScaler::new(target, target).unwrap();
        let mut dst = Picture::new(target);
        assert!(scaler.scale(&gray(1, 1, vec![0]), &mut dst).is_err());
    }

    #[test]
    fn test_pts_carried_over() {
        let mut src = gray(1, 1, vec![7]);
        src.pts = cubecast_core::PresentationTime::from_millis(33);
        let mut dst = Picture::new(src.geometry());
        NearestScalerFactory
            .create(src.geometry(), src.geometry())
            .unwrap()
            .scale(&src, &mut dst)
            .unwrap();
        assert_eq!(dst.pts, src.pts);
    }
}
