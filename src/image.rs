//! CPU-side images and pixel format conversion.
//!
//! Backs `acquire_cpu_image`: a pulled frame may carry a decoded CPU copy,
//! which is converted into the caller's buffer in the requested format.
//!
//! ## Formats
//!
//! - **RGBA32**: 4 bytes per pixel.
//! - **NV12**: 8-bit Y plane followed by an interleaved UV plane at half
//!   resolution in both directions.
//! - **P010**: NV12 layout with 16-bit little-endian samples whose 10
//!   significant bits sit in the high bits.
//!
//! YUV and RGB are related by BT.601 limited range.

use crate::{IsarError, Result, TextureFormat};

/// Bytes needed to hold a `width` x `height` image.
pub fn image_size(format: TextureFormat, width: u32, height: u32) -> usize {
    let (w, h) = (width as usize, height as usize);
    let chroma = w.div_ceil(2) * h.div_ceil(2);
    match format {
        TextureFormat::Rgba32 => w * h * 4,
        TextureFormat::Nv12 => w * h + chroma * 2,
        TextureFormat::P010 => (w * h + chroma * 2) * 2,
    }
}

/// A decoded image in system memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuImage {
    format: TextureFormat,
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl CpuImage {
    pub fn new(format: TextureFormat, width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = image_size(format, width, height);
        if width == 0 || height == 0 || data.len() != expected {
            return Err(IsarError::invalid_argument(
                "data",
                format!("{width}x{height} {format:?} needs {expected} bytes, got {}", data.len()),
            ));
        }
        Ok(Self { format, width, height, data })
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Converts into `out`, returning the number of bytes written.
    ///
    /// `out` must hold at least [`image_size`] bytes for `format`; only that
    /// prefix is written.
    pub fn convert_into(&self, format: TextureFormat, out: &mut [u8]) -> Result<usize> {
        let required = image_size(format, self.width, self.height);
        if out.len() < required {
            return Err(IsarError::invalid_argument(
                "data_size",
                format!("{format:?} image needs {required} bytes, buffer holds {}", out.len()),
            ));
        }
        let out = &mut out[..required];

        match (self.format, format) {
            (from, to) if from == to => out.copy_from_slice(&self.data),
            (TextureFormat::Rgba32, to) => self.rgba_to_yuv().write(to, out),
            (from, TextureFormat::Rgba32) => Yuv420::read(from, self.width, self.height, &self.data).write_rgba(out),
            (from, to) => Yuv420::read(from, self.width, self.height, &self.data).write(to, out),
        }
        Ok(required)
    }

    fn rgba_to_yuv(&self) -> Yuv420 {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut yuv = Yuv420::blank(w, h);
        let pixel = |x: usize, y: usize| {
            let offset = (y * w + x) * 4;
            let rgb = &self.data[offset..offset + 3];
            (rgb[0] as f32, rgb[1] as f32, rgb[2] as f32)
        };

        for y in 0..h {
            for x in 0..w {
                let (r, g, b) = pixel(x, y);
                yuv.y[y * w + x] = 16.0 + 0.257 * r + 0.504 * g + 0.098 * b;
            }
        }
        for cy in 0..yuv.chroma_height {
            for cx in 0..yuv.chroma_width {
                let (mut u, mut v, mut count) = (0.0, 0.0, 0.0);
                for y in (cy * 2)..(cy * 2 + 2).min(h) {
                    for x in (cx * 2)..(cx * 2 + 2).min(w) {
                        let (r, g, b) = pixel(x, y);
                        u += 128.0 - 0.148 * r - 0.291 * g + 0.439 * b;
                        v += 128.0 + 0.439 * r - 0.368 * g - 0.071 * b;
                        count += 1.0;
                    }
                }
                let index = cy * yuv.chroma_width + cx;
                yuv.u[index] = u / count;
                yuv.v[index] = v / count;
            }
        }
        yuv
    }
}

/// Planar 4:2:0 samples on an 8-bit scale.
struct Yuv420 {
    width: usize,
    height: usize,
    chroma_width: usize,
    chroma_height: usize,
    y: Vec<f32>,
    u: Vec<f32>,
    v: Vec<f32>,
}

impl Yuv420 {
    fn blank(width: usize, height: usize) -> Self {
        let (chroma_width, chroma_height) = (width.div_ceil(2), height.div_ceil(2));
        Self {
            width,
            height,
            chroma_width,
            chroma_height,
            y: vec![0.0; width * height],
            u: vec![0.0; chroma_width * chroma_height],
            v: vec![0.0; chroma_width * chroma_height],
        }
    }

    fn read(format: TextureFormat, width: u32, height: u32, data: &[u8]) -> Self {
        let mut yuv = Self::blank(width as usize, height as usize);
        let luma_len = yuv.y.len();
        let sample = |index: usize| -> f32 {
            match format {
                TextureFormat::P010 => {
                    let raw = u16::from_le_bytes([data[index * 2], data[index * 2 + 1]]);
                    (raw >> 6) as f32 / 4.0
                }
                _ => data[index] as f32,
            }
        };
        for (i, value) in yuv.y.iter_mut().enumerate() {
            *value = sample(i);
        }
        for i in 0..yuv.u.len() {
            yuv.u[i] = sample(luma_len + i * 2);
            yuv.v[i] = sample(luma_len + i * 2 + 1);
        }
        yuv
    }

    fn write(&self, format: TextureFormat, out: &mut [u8]) {
        let luma_len = self.y.len();
        let mut put = |index: usize, value: f32| match format {
            TextureFormat::P010 => {
                let raw = ((value * 4.0).round().clamp(0.0, 1023.0) as u16) << 6;
                out[index * 2..index * 2 + 2].copy_from_slice(&raw.to_le_bytes());
            }
            _ => out[index] = value.round().clamp(0.0, 255.0) as u8,
        };
        for (i, value) in self.y.iter().enumerate() {
            put(i, *value);
        }
        for i in 0..self.u.len() {
            put(luma_len + i * 2, self.u[i]);
            put(luma_len + i * 2 + 1, self.v[i]);
        }
    }

    fn write_rgba(&self, out: &mut [u8]) {
        for y in 0..self.height {
            for x in 0..self.width {
                let chroma = (y / 2) * self.chroma_width + x / 2;
                let c = self.y[y * self.width + x] - 16.0;
                let d = self.u[chroma] - 128.0;
                let e = self.v[chroma] - 128.0;
                let rgb = [
                    1.164 * c + 1.596 * e,
                    1.164 * c - 0.392 * d - 0.813 * e,
                    1.164 * c + 2.017 * d,
                ];
                let offset = (y * self.width + x) * 4;
                for (channel, value) in rgb.iter().enumerate() {
                    out[offset + channel] = value.round().clamp(0.0, 255.0) as u8;
                }
                out[offset + 3] = 255;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nv12_filled(width: u32, height: u32, luma: u8) -> CpuImage {
        let luma_len = (width * height) as usize;
        let mut data = vec![128u8; image_size(TextureFormat::Nv12, width, height)];
        data[..luma_len].fill(luma);
        CpuImage::new(TextureFormat::Nv12, width, height, data).unwrap()
    }

    #[test]
    fn sizes_round_chroma_up() {
        assert_eq!(image_size(TextureFormat::Rgba32, 4, 2), 32);
        assert_eq!(image_size(TextureFormat::Nv12, 4, 2), 8 + 4);
        assert_eq!(image_size(TextureFormat::Nv12, 3, 3), 9 + 8);
        assert_eq!(image_size(TextureFormat::P010, 4, 2), 24);
    }

    #[test]
    fn limited_range_extremes_map_to_black_and_white() {
        let mut out = vec![0u8; image_size(TextureFormat::Rgba32, 2, 2)];
        nv12_filled(2, 2, 235).convert_into(TextureFormat::Rgba32, &mut out).unwrap();
        assert!(out.chunks(4).all(|px| px == [255, 255, 255, 255]));

        nv12_filled(2, 2, 16).convert_into(TextureFormat::Rgba32, &mut out).unwrap();
        assert!(out.chunks(4).all(|px| px == [0, 0, 0, 255]));
    }

    #[test]
    fn nv12_to_p010_shifts_into_high_bits() {
        let source = nv12_filled(2, 2, 100);
        let mut out = vec![0u8; image_size(TextureFormat::P010, 2, 2)];
        source.convert_into(TextureFormat::P010, &mut out).unwrap();
        let first = u16::from_le_bytes([out[0], out[1]]);
        assert_eq!(first, 400 << 6);

        let p010 = CpuImage::new(TextureFormat::P010, 2, 2, out).unwrap();
        let mut back = vec![0u8; image_size(TextureFormat::Nv12, 2, 2)];
        p010.convert_into(TextureFormat::Nv12, &mut back).unwrap();
        assert_eq!(back, source.data());
    }

    #[test]
    fn rgba_survives_a_trip_through_nv12() {
        let red = [200u8, 30, 40, 255];
        let data: Vec<u8> = red.iter().copied().cycle().take(4 * 4 * 4).collect();
        let image = CpuImage::new(TextureFormat::Rgba32, 4, 4, data).unwrap();

        let mut nv12 = vec![0u8; image_size(TextureFormat::Nv12, 4, 4)];
        image.convert_into(TextureFormat::Nv12, &mut nv12).unwrap();
        let mut rgba = vec![0u8; image_size(TextureFormat::Rgba32, 4, 4)];
        CpuImage::new(TextureFormat::Nv12, 4, 4, nv12).unwrap().convert_into(TextureFormat::Rgba32, &mut rgba).unwrap();

        for (got, want) in rgba[..4].iter().zip(red) {
            assert!((*got as i32 - want as i32).abs() <= 3, "{got} vs {want}");
        }
    }

    #[test]
    fn small_buffers_are_an_error_and_large_ones_keep_their_tail() {
        let image = nv12_filled(2, 2, 50);
        let mut small = vec![0u8; image_size(TextureFormat::Rgba32, 2, 2) - 1];
        let err = image.convert_into(TextureFormat::Rgba32, &mut small).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::InvalidArgument);

        let mut large = vec![0xAAu8; image_size(TextureFormat::Nv12, 2, 2) + 4];
        let written = image.convert_into(TextureFormat::Nv12, &mut large).unwrap();
        assert_eq!(written, 6);
        assert_eq!(&large[written..], &[0xAA; 4]);
    }

    #[test]
    fn mismatched_data_length_is_rejected() {
        assert!(CpuImage::new(TextureFormat::Rgba32, 2, 2, vec![0; 15]).is_err());
        assert!(CpuImage::new(TextureFormat::Nv12, 0, 2, Vec::new()).is_err());
    }
}
