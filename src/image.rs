//! Decoded images handed to the caller.
//!
//! An [`Image`] owns its pixel memory outright. The allocation travels with
//! a release callback that runs exactly once, when the last owner drops it.

use std::fmt;
use std::sync::Arc;

use ::image::{DynamicImage, ImageBuffer, Rgba, RgbaImage};

/// Called with the allocation once nobody needs it any more.
pub type ReleaseFn = Box<dyn FnOnce(Box<[u8]>) + Send>;

/// Owned pixel bytes plus the callback that frees them.
pub struct PixelBuffer {
    data: Option<Box<[u8]>>,
    release: Option<ReleaseFn>,
}

impl PixelBuffer {
    pub fn new(data: Box<[u8]>, release: ReleaseFn) -> Self {
        Self {
            data: Some(data),
            release: Some(release),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for PixelBuffer {
    fn drop(&mut self) {
        if let (Some(data), Some(release)) = (self.data.take(), self.release.take()) {
            release(data);
        }
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// Memory layout of delivered pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// R, G, B, A bytes in that order regardless of platform.
    Rgba8888,
    /// R, G, B, A 16-bit samples, each in native byte order.
    Rgba64,
}

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Rgba8888 => 4,
            PixelLayout::Rgba64 => 8,
        }
    }
}

/// A validated ICC colour profile attached to an image.
#[derive(Clone, PartialEq, Eq)]
pub struct ColorSpace {
    icc: Arc<[u8]>,
}

impl ColorSpace {
    /// Parse `icc`, returning `None` if it is not a usable profile.
    pub fn from_icc_profile(icc: &[u8]) -> Option<Self> {
        match moxcms::ColorProfile::new_from_slice(icc) {
            Ok(_) => Some(Self { icc: Arc::from(icc) }),
            Err(e) => {
                log::debug!("Rejected {} B ICC profile: {:?}", icc.len(), e);
                None
            }
        }
    }

    pub fn icc_profile(&self) -> &[u8] {
        &self.icc
    }
}

impl fmt::Debug for ColorSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ColorSpace({} B ICC)", self.icc.len())
    }
}

/// A decoded frame.
///
/// The default value is the null image: no pixels, zero size.
#[derive(Debug, Default)]
pub struct Image {
    pixels: Option<PixelBuffer>,
    width: u32,
    height: u32,
    stride: usize,
    layout: Option<PixelLayout>,
    color_space: Option<ColorSpace>,
}

impl Image {
    /// Wrap host-owned pixels. `release` receives `data` back when the image
    /// no longer needs it.
    ///
    /// Returns `None` (after running `release`) if the buffer is too small
    /// for `height` rows of `stride` bytes, or `stride` cannot hold a row.
    pub fn from_raw(
        data: Box<[u8]>,
        width: u32,
        height: u32,
        stride: usize,
        layout: PixelLayout,
        release: ReleaseFn,
    ) -> Option<Self> {
        let pixels = PixelBuffer::new(data, release);
        let row = (width as usize).checked_mul(layout.bytes_per_pixel())?;
        let needed = stride.checked_mul(height as usize)?;
        if stride < row || pixels.len() < needed {
            log::warn!(
                "Rejecting {} B buffer for {}x{} image with stride {}",
                pixels.len(),
                width,
                height,
                stride
            );
            return None;
        }

        Some(Self {
            pixels: Some(pixels),
            width,
            height,
            stride,
            layout: Some(layout),
            color_space: None,
        })
    }

    pub fn is_null(&self) -> bool {
        self.pixels.is_none()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn layout(&self) -> Option<PixelLayout> {
        self.layout
    }

    pub fn data(&self) -> &[u8] {
        match self.pixels.as_ref() {
            Some(pixels) => pixels.as_slice(),
            None => &[],
        }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        match self.pixels.as_mut() {
            Some(pixels) => pixels.as_mut_slice(),
            None => &mut [],
        }
    }

    pub fn color_space(&self) -> Option<&ColorSpace> {
        self.color_space.as_ref()
    }

    pub fn set_color_space(&mut self, color_space: ColorSpace) {
        self.color_space = Some(color_space);
    }

    /// Copy the pixels into an [`image::DynamicImage`].
    pub fn to_dynamic_image(&self) -> Option<DynamicImage> {
        let layout = self.layout?;
        let row_len = self.width as usize * layout.bytes_per_pixel();
        let rows = self.data().chunks(self.stride.max(1)).take(self.height as usize);

        match layout {
            PixelLayout::Rgba8888 => {
                let mut packed = Vec::with_capacity(row_len * self.height as usize);
                for row in rows {
                    packed.extend_from_slice(row.get(..row_len)?);
                }
                RgbaImage::from_raw(self.width, self.height, packed).map(DynamicImage::ImageRgba8)
            }
            PixelLayout::Rgba64 => {
                let mut samples = Vec::with_capacity(row_len / 2 * self.height as usize);
                for row in rows {
                    samples.extend(
                        row.get(..row_len)?
                            .chunks_exact(2)
                            .map(|b| u16::from_ne_bytes([b[0], b[1]])),
                    );
                }
                ImageBuffer::<Rgba<u16>, _>::from_raw(self.width, self.height, samples)
                    .map(DynamicImage::ImageRgba16)
            }
        }
    }
}
