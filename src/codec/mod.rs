//! The incremental decoder contract the session drives.
//!
//! A codec is fed the whole input once, then repeatedly asked to
//! [`process_input`](Codec::process_input). Each call runs until the next
//! subscribed pausable event (or completion, or failure) and reports it as a
//! [`Status`]. Between calls the caller may query whatever the event made
//! available and hand over an output buffer.

pub mod runner;

#[cfg(feature = "jxl-rs")]
pub mod jxl_rs;
#[cfg(feature = "jxl-rs")]
mod rgb_conversion;

#[cfg(test)]
pub(crate) mod testing;

use std::ops::BitOr;
use std::sync::Arc;

pub use runner::Runner;

/// Outcome of one [`Codec::process_input`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Decoding finished; no more events will follow in this pass.
    Success,
    /// The codec failed to decode the stream.
    Error,
    /// The codec wants more bytes than it was given.
    NeedMoreInput,
    /// The codec needs an output buffer before it can produce the frame.
    NeedImageOutBuffer,
    /// Image metadata is available.
    BasicInfo,
    /// Colour encoding / ICC profile is available.
    ColorEncoding,
    /// A preview image was decoded.
    PreviewImage,
    /// A frame header is available; pixels follow.
    Frame,
    /// A frame was fully written into the output buffer.
    FullImage,
    /// A metadata box was reached.
    Box,
    /// A progressive pass of the current frame completed.
    FrameProgression,
}

impl Status {
    /// The subscription bit that makes this status pausable, if any.
    pub fn event(self) -> Option<Events> {
        match self {
            Status::BasicInfo => Some(Events::BASIC_INFO),
            Status::ColorEncoding => Some(Events::COLOR_ENCODING),
            Status::PreviewImage => Some(Events::PREVIEW_IMAGE),
            Status::Frame => Some(Events::FRAME),
            Status::FullImage => Some(Events::FULL_IMAGE),
            Status::Box => Some(Events::BOX),
            Status::FrameProgression => Some(Events::FRAME_PROGRESSION),
            Status::Success
            | Status::Error
            | Status::NeedMoreInput
            | Status::NeedImageOutBuffer => None,
        }
    }
}

/// Set of pausable events a codec reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Events(u32);

impl Events {
    pub const BASIC_INFO: Events = Events(1 << 6);
    pub const COLOR_ENCODING: Events = Events(1 << 8);
    pub const PREVIEW_IMAGE: Events = Events(1 << 9);
    pub const FRAME: Events = Events(1 << 10);
    pub const FULL_IMAGE: Events = Events(1 << 12);
    pub const BOX: Events = Events(1 << 14);
    pub const FRAME_PROGRESSION: Events = Events(1 << 15);

    pub const fn empty() -> Self {
        Events(0)
    }

    pub const fn union(self, other: Events) -> Self {
        Events(self.0 | other.0)
    }

    pub const fn contains(self, other: Events) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Events {
    type Output = Events;

    fn bitor(self, rhs: Events) -> Events {
        self.union(rhs)
    }
}

/// Animation timing from the image header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnimationHeader {
    /// Ticks per second, numerator.
    pub tps_numerator: u32,
    /// Ticks per second, denominator.
    pub tps_denominator: u32,
    /// Declared repeat count; 0 means loop forever.
    pub num_loops: u32,
}

impl AnimationHeader {
    /// Milliseconds per tick: `1000 * tps_denominator / tps_numerator`.
    pub fn ms_per_tick(&self) -> Option<f64> {
        if self.tps_numerator == 0 {
            return None;
        }
        Some(1000.0 * f64::from(self.tps_denominator) / f64::from(self.tps_numerator))
    }
}

/// Image metadata reported with [`Status::BasicInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BasicInfo {
    pub xsize: u32,
    pub ysize: u32,
    pub bits_per_sample: u32,
    /// Non-zero for floating point samples.
    pub exponent_bits_per_sample: u32,
    pub num_color_channels: u32,
    pub num_extra_channels: u32,
    pub have_animation: bool,
    /// Meaningful only when `have_animation` is set.
    pub animation: AnimationHeader,
}

/// Per-frame header reported with [`Status::Frame`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameHeader {
    /// Display duration in ticks.
    pub duration: u32,
    /// Codecs are not required to set this reliably.
    pub is_last: bool,
}

/// Sample type of the decoded output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    U8,
    U16,
}

impl DataType {
    /// 8-bit output up to 8 bits per sample, 16-bit above.
    pub fn for_bits_per_sample(bits: u32) -> Self {
        if bits > 8 {
            DataType::U16
        } else {
            DataType::U8
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            DataType::U8 => 1,
            DataType::U16 => 2,
        }
    }
}

/// Layout the codec writes decoded frames in. 16-bit samples are always in
/// native byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    pub num_channels: u32,
    pub data_type: DataType,
}

impl Default for PixelFormat {
    /// Interleaved RGBA, 8 bits per sample.
    fn default() -> Self {
        Self {
            num_channels: 4,
            data_type: DataType::U8,
        }
    }
}

impl PixelFormat {
    pub fn with_data_type(self, data_type: DataType) -> Self {
        Self { data_type, ..self }
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.data_type.bytes_per_sample()
    }

    /// Bytes per row of `width` pixels, without padding.
    pub fn stride(&self, width: u32) -> Option<usize> {
        (width as usize)
            .checked_mul(self.num_channels as usize)?
            .checked_mul(self.bytes_per_sample())
    }

    /// Bytes for one full `width` x `height` frame.
    pub fn frame_len(&self, width: u32, height: u32) -> Option<usize> {
        self.stride(width)?.checked_mul(height as usize)
    }
}

/// An incremental, event-driven image decoder.
///
/// Query methods are only meaningful right after the event that makes their
/// data available; implementations report misuse as errors.
pub trait Codec {
    /// Return to the freshly created state. Input, subscriptions, the runner
    /// and any output buffer are dropped.
    fn reset(&mut self);

    /// Attach the worker pool decoding work may fan out onto.
    fn set_parallel_runner(&mut self, runner: &Runner) -> anyhow::Result<()>;

    /// Choose which pausable events [`process_input`](Codec::process_input)
    /// stops at.
    fn subscribe_events(&mut self, events: Events) -> anyhow::Result<()>;

    /// Supply the complete input.
    fn set_input(&mut self, data: Arc<[u8]>) -> anyhow::Result<()>;

    /// Run until the next subscribed event, completion or failure.
    fn process_input(&mut self) -> Status;

    fn basic_info(&self) -> anyhow::Result<BasicInfo>;

    fn frame_header(&self) -> anyhow::Result<FrameHeader>;

    /// Length of the ICC profile describing output in `format`.
    fn icc_profile_size(&self, format: &PixelFormat) -> anyhow::Result<usize>;

    /// Copy the ICC profile into `dst`, which must be exactly
    /// [`icc_profile_size`](Codec::icc_profile_size) bytes.
    fn icc_profile(&self, format: &PixelFormat, dst: &mut [u8]) -> anyhow::Result<()>;

    /// Bytes needed for one frame in `format`.
    fn image_out_buffer_size(&self, format: &PixelFormat) -> anyhow::Result<usize>;

    /// Hand over the buffer the next frame is written into. The codec owns
    /// it until [`take_image_out_buffer`](Codec::take_image_out_buffer).
    fn set_image_out_buffer(&mut self, format: &PixelFormat, buffer: Box<[u8]>)
        -> anyhow::Result<()>;

    /// Give back the buffer holding the frame completed by the last
    /// [`Status::FullImage`].
    fn take_image_out_buffer(&mut self) -> Option<Box<[u8]>>;
}
