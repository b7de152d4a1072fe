use jxl::{api::JxlColorType, image::Image};
use rayon::prelude::*;
use smallvec::SmallVec;

use super::{DataType, Runner};

/// Convert f32 [0,1] to u8 [0,255], rounding to nearest
#[inline]
fn f32_to_u8(val: f32) -> u8 {
    (val * 255.0 + 0.5).clamp(0.0, 255.0) as u8
}

/// Convert f32 [0,1] to u16 [0,65535], rounding to nearest
#[inline]
fn f32_to_u16(val: f32) -> u16 {
    (val * 65535.0 + 0.5).clamp(0.0, 65535.0) as u16
}

/// One decoded frame as tightly packed f32 planes.
///
/// jxl-rs hands back the colour channels interleaved in one image and alpha
/// as an extra channel; this regroups them so rows can be written out
/// independently.
pub(crate) struct Planes {
    color: SmallVec<[Vec<f32>; 3]>,
    alpha: Option<Vec<f32>>,
    width: usize,
    height: usize,
}

impl Planes {
    /// Collect planes from the decoder's output images.
    ///
    /// `main` holds the colour samples (one per pixel for grey, three
    /// interleaved for RGB/BGR). The first extra channel, when present, is
    /// used as alpha.
    pub(crate) fn from_images(
        main: &Image<f32>,
        extras: &[Image<f32>],
        color_type: JxlColorType,
        width: usize,
        height: usize,
    ) -> Self {
        let mut color = SmallVec::new();
        let mut alpha = None;

        match color_type {
            JxlColorType::Grayscale => {
                color.push(copy_plane(main, width, height));
            }
            JxlColorType::GrayscaleAlpha => {
                color.push(copy_plane(main, width, height));
                alpha = extras.first().map(|a| copy_plane(a, width, height));
            }
            JxlColorType::Rgb | JxlColorType::Rgba => {
                let (r, g, b) = split_rgb_channels(main, width, height);
                color.extend([r, g, b]);
                alpha = extras.first().map(|a| copy_plane(a, width, height));
            }
            JxlColorType::Bgr | JxlColorType::Bgra => {
                // BGR -> RGB
                let (b, g, r) = split_rgb_channels(main, width, height);
                color.extend([r, g, b]);
                alpha = extras.first().map(|a| copy_plane(a, width, height));
            }
        }

        Self {
            color,
            alpha,
            width,
            height,
        }
    }

    /// Write interleaved RGBA into `out`, one row per worker task.
    ///
    /// 16-bit samples are stored in native byte order. `out` must be exactly
    /// `width * height * 4 * bytes_per_sample` bytes.
    pub(crate) fn write_rgba(&self, data_type: DataType, out: &mut [u8], runner: Option<&Runner>) {
        let stride = self.width * 4 * data_type.bytes_per_sample();
        if stride == 0 || self.height == 0 {
            return;
        }
        if out.len() != stride * self.height {
            log::warn!(
                "Output buffer is {} B, expected {} B; leaving it untouched",
                out.len(),
                stride * self.height
            );
            return;
        }

        let fill = |(y, row): (usize, &mut [u8])| self.write_row(y, row, data_type);
        match runner {
            Some(runner) => runner.install(|| out.par_chunks_mut(stride).enumerate().for_each(fill)),
            None => out.chunks_mut(stride).enumerate().for_each(fill),
        }
    }

    fn write_row(&self, y: usize, row: &mut [u8], data_type: DataType) {
        let base = y * self.width;
        for x in 0..self.width {
            let i = base + x;
            let (r, g, b) = match self.color.as_slice() {
                [gray] => (gray[i], gray[i], gray[i]),
                [r, g, b] => (r[i], g[i], b[i]),
                _ => (0.0, 0.0, 0.0),
            };
            // Use alpha channel if present, otherwise opaque
            let a = self.alpha.as_ref().map_or(1.0, |alpha| alpha[i]);

            match data_type {
                DataType::U8 => {
                    let px = &mut row[x * 4..x * 4 + 4];
                    px[0] = f32_to_u8(r);
                    px[1] = f32_to_u8(g);
                    px[2] = f32_to_u8(b);
                    px[3] = f32_to_u8(a);
                }
                DataType::U16 => {
                    let px = &mut row[x * 8..x * 8 + 8];
                    for (c, v) in [r, g, b, a].into_iter().enumerate() {
                        px[c * 2..c * 2 + 2].copy_from_slice(&f32_to_u16(v).to_ne_bytes());
                    }
                }
            }
        }
    }
}

fn copy_plane(image: &Image<f32>, width: usize, height: usize) -> Vec<f32> {
    let mut plane = Vec::with_capacity(width * height);
    for y in 0..height {
        plane.extend_from_slice(&image.row(y)[..width]);
    }
    plane
}

/// Split interleaved RGB channels into separate planes
fn split_rgb_channels(
    interleaved: &Image<f32>,
    width: usize,
    height: usize,
) -> (Vec<f32>, Vec<f32>, Vec<f32>) {
    let mut r = Vec::with_capacity(width * height);
    let mut g = Vec::with_capacity(width * height);
    let mut b = Vec::with_capacity(width * height);

    for y in 0..height {
        let interleaved_row = interleaved.row(y);
        for x in 0..width {
            let idx = x * 3;
            r.push(interleaved_row[idx]);
            g.push(interleaved_row[idx + 1]);
            b.push(interleaved_row[idx + 2]);
        }
    }

    (r, g, b)
}
