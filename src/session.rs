//! Decode session: frame-indexed access on top of a forward-only codec.
//!
//! The codec can only move forward through the stream. Reaching an earlier
//! frame means a rewind: the codec is reset and the buffered input replayed
//! from frame 0. Later frames are reached by decoding and discarding the ones
//! in between.

use std::sync::Arc;

use anyhow::Context;

use crate::codec::{BasicInfo, Codec, DataType, Events, PixelFormat, Runner, Status};
use crate::config::HandlerConfig;
use crate::device::Device;
use crate::error::{HandlerError, Result};
use crate::image::{ColorSpace, Image, PixelLayout, ReleaseFn};
use crate::options::LoopCount;

/// Events every pass subscribes to.
const SUBSCRIBED_EVENTS: Events = Events::BASIC_INFO
    .union(Events::COLOR_ENCODING)
    .union(Events::FRAME)
    .union(Events::FULL_IMAGE);

/// A codec wired to its worker pool.
///
/// Either fully set up (runner attached, events subscribed) or not built at
/// all. The codec is declared first so it is dropped before its pool.
pub struct CodecContext<C: Codec> {
    codec: C,
    runner: Runner,
}

impl<C: Codec> CodecContext<C> {
    pub fn new(mut codec: C, runner: Runner) -> Result<Self> {
        Self::wire(&mut codec, &runner)?;
        Ok(Self { codec, runner })
    }

    fn wire(codec: &mut C, runner: &Runner) -> Result<()> {
        codec
            .set_parallel_runner(runner)
            .context("Failed to attach worker pool")
            .map_err(HandlerError::Setup)?;
        codec
            .subscribe_events(SUBSCRIBED_EVENTS)
            .context("Failed to subscribe to decoder events")
            .map_err(HandlerError::Setup)
    }

    /// Reset the codec and start a new pass over `input`.
    fn restart(&mut self, input: Arc<[u8]>) -> Result<()> {
        self.codec.reset();
        Self::wire(&mut self.codec, &self.runner)?;
        self.codec
            .set_input(input)
            .context("Failed to supply input")
            .map_err(HandlerError::Setup)
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No metadata seen yet.
    Fresh,
    /// Dimensions, format and animation-ness are known.
    MetadataKnown,
    /// A fatal error occurred; the session must be abandoned.
    Error,
}

/// Total number of frames, once it has been observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCount {
    Unknown,
    Known(usize),
}

impl FrameCount {
    pub fn known(self) -> Option<usize> {
        match self {
            FrameCount::Known(n) => Some(n),
            FrameCount::Unknown => None,
        }
    }
}

/// What [`DecodeSession::advance_until`] runs the codec towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Goal {
    MetadataReady,
    FrameReady,
    StreamExhausted,
}

/// Where [`DecodeSession::advance_until`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    MetadataReady,
    /// The requested frame's pixels are held by the session.
    FrameReady,
    /// The codec finished the pass before the goal was met.
    StreamExhausted,
}

/// One open input being decoded.
pub struct DecodeSession<C: Codec> {
    context: CodecContext<C>,
    state: SessionState,
    basic_info: Option<BasicInfo>,
    pixel_format: PixelFormat,
    icc_profile: Option<Vec<u8>>,
    pixels: Option<Box<[u8]>>,
    /// Last frame completed by the running codec pass.
    pass_position: Option<usize>,
    /// Last frame delivered or skipped, as the caller sees it.
    current_frame: Option<usize>,
    frame_count: FrameCount,
    requested_frame: usize,
    frame_duration_ms: u32,
    ms_per_tick: f64,
    input: Option<Arc<[u8]>>,
}

impl<C: Codec> DecodeSession<C> {
    /// Build the worker pool and wire `codec` to it.
    pub fn new(codec: C, config: &HandlerConfig) -> Result<Self> {
        let runner = Runner::new(config.num_worker_threads()).map_err(HandlerError::Setup)?;
        let context = CodecContext::new(codec, runner)?;

        Ok(Self {
            context,
            state: SessionState::Fresh,
            basic_info: None,
            pixel_format: PixelFormat::default(),
            icc_profile: None,
            pixels: None,
            pass_position: None,
            current_frame: None,
            frame_count: FrameCount::Unknown,
            requested_frame: 0,
            frame_duration_ms: 0,
            ms_per_tick: 0.0,
            input: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn has_input(&self) -> bool {
        self.input.is_some()
    }

    pub fn basic_info(&self) -> Option<&BasicInfo> {
        self.basic_info.as_ref()
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn icc_profile(&self) -> Option<&[u8]> {
        self.icc_profile.as_deref()
    }

    pub fn frame_count(&self) -> FrameCount {
        self.frame_count
    }

    /// Index of the last frame delivered or skipped.
    ///
    /// A rewind clears it. Counting frames does not.
    pub fn current_frame(&self) -> Option<usize> {
        self.current_frame
    }

    /// Index the next [`read_next_frame`](Self::read_next_frame) yields.
    pub fn requested_frame(&self) -> usize {
        self.requested_frame
    }

    /// Display duration of the current frame; 0 for still images.
    pub fn frame_duration_ms(&self) -> u32 {
        self.frame_duration_ms
    }

    pub fn is_animation(&self) -> Option<bool> {
        self.basic_info.as_ref().map(|info| info.have_animation)
    }

    pub fn loop_count(&self) -> Option<LoopCount> {
        let info = self.basic_info.as_ref()?;
        Some(match (info.have_animation, info.animation.num_loops) {
            (false, _) => LoopCount::Finite(0),
            (true, 0) => LoopCount::Infinite,
            (true, n) => LoopCount::Finite(n),
        })
    }

    /// Read the device to the end and hand everything to the codec.
    ///
    /// Only the first call reads; the input is replayed on every rewind.
    pub fn load_input(&mut self, device: &mut dyn Device) -> Result<()> {
        self.ensure_usable()?;
        if self.input.is_some() {
            return Ok(());
        }
        let result = self.buffer_input(device);
        self.record(result)
    }

    fn buffer_input(&mut self, device: &mut dyn Device) -> Result<()> {
        if !device.is_readable() {
            return Err(HandlerError::NotReadable);
        }
        let data: Arc<[u8]> = Arc::from(device.read_all()?);
        log::info!("Buffered {} B of input", data.len());

        self.context
            .codec
            .set_input(data.clone())
            .context("Failed to supply input")
            .map_err(HandlerError::Setup)?;
        self.input = Some(data);
        Ok(())
    }

    /// Drive the codec until `goal` is met or the pass ends.
    pub fn advance_until(&mut self, goal: Goal) -> Result<Progress> {
        self.ensure_usable()?;
        if goal == Goal::MetadataReady && self.state == SessionState::MetadataKnown {
            return Ok(Progress::MetadataReady);
        }
        let result = self.run_events(goal);
        self.record(result)
    }

    fn run_events(&mut self, goal: Goal) -> Result<Progress> {
        if self.input.is_none() {
            return Err(HandlerError::NoDevice);
        }

        loop {
            let status = self.context.codec.process_input();
            log::trace!("Codec status: {:?}", status);

            match status {
                Status::Success => {
                    self.note_exhaustion();
                    return Ok(Progress::StreamExhausted);
                }
                Status::BasicInfo => {
                    self.on_basic_info()?;
                    if goal == Goal::MetadataReady {
                        return Ok(Progress::MetadataReady);
                    }
                }
                Status::ColorEncoding => self.on_color_encoding(),
                Status::NeedImageOutBuffer => self.on_need_buffer()?,
                Status::Frame => self.on_frame()?,
                Status::FullImage => {
                    let current = self.on_full_image()?;
                    if goal == Goal::FrameReady && current == self.requested_frame {
                        self.requested_frame += 1;
                        return Ok(Progress::FrameReady);
                    }
                    // Not the frame we want; keep going
                    log::debug!(
                        "Skipped frame {} on the way to frame {}",
                        current,
                        self.requested_frame
                    );
                }
                Status::NeedMoreInput => return Err(HandlerError::TruncatedInput),
                Status::Error => {
                    return Err(HandlerError::Decode("codec reported an error".to_string()))
                }
                other => {
                    return Err(HandlerError::FormatViolation(format!(
                        "unexpected codec event {:?}",
                        other
                    )))
                }
            }
        }
    }

    fn on_basic_info(&mut self) -> Result<()> {
        let info = self
            .context
            .codec
            .basic_info()
            .map_err(|e| HandlerError::Decode(format!("failed to get basic info: {:#}", e)))?;

        if self.state == SessionState::MetadataKnown && self.pixels.take().is_some() {
            log::debug!("Discarded buffered pixels after repeated basic info");
        }

        let data_type = DataType::for_bits_per_sample(info.bits_per_sample);
        if self.basic_info.is_some() && data_type != self.pixel_format.data_type {
            return Err(HandlerError::FormatViolation(format!(
                "sample depth changed to {} bits mid-stream",
                info.bits_per_sample
            )));
        }
        self.pixel_format = self.pixel_format.with_data_type(data_type);

        if info.have_animation {
            self.ms_per_tick = match info.animation.ms_per_tick() {
                Some(ms) => ms,
                None => {
                    log::warn!("Animation has a zero tick rate; frame delays will be 0");
                    0.0
                }
            };
        } else if self.frame_count == FrameCount::Unknown {
            self.frame_count = FrameCount::Known(1);
        }

        if self.state == SessionState::Fresh {
            log::info!(
                "Image info: {}x{}, {} bits per sample, animation: {}",
                info.xsize,
                info.ysize,
                info.bits_per_sample,
                info.have_animation
            );
        }

        self.basic_info = Some(info);
        self.state = SessionState::MetadataKnown;
        Ok(())
    }

    fn on_color_encoding(&mut self) {
        match self.fetch_icc_profile() {
            Ok(icc) => {
                if let Some(icc) = &icc {
                    log::debug!("Got {} B ICC profile", icc.len());
                }
                self.icc_profile = icc;
            }
            Err(e) => {
                log::warn!("{:#}", e);
                self.icc_profile = None;
            }
        }
    }

    fn fetch_icc_profile(&self) -> anyhow::Result<Option<Vec<u8>>> {
        let codec = &self.context.codec;
        let size = codec
            .icc_profile_size(&self.pixel_format)
            .context("Failed to get ICC profile size")?;
        if size == 0 {
            return Ok(None);
        }

        let mut icc = vec![0u8; size];
        codec
            .icc_profile(&self.pixel_format, &mut icc)
            .context("Failed to get ICC profile")?;
        Ok(Some(icc))
    }

    fn on_need_buffer(&mut self) -> Result<()> {
        let format = self.pixel_format;
        let size = self
            .context
            .codec
            .image_out_buffer_size(&format)
            .map_err(|e| HandlerError::Decode(format!("failed to get output buffer size: {:#}", e)))?;

        let expected = self.expected_frame_len()?;
        if size != expected {
            return Err(HandlerError::FormatViolation(format!(
                "pixel buffer size is {} B, but expected {} B ({} channels, {} B per sample)",
                size,
                expected,
                format.num_channels,
                format.bytes_per_sample()
            )));
        }

        // Normally the last frame's buffer went to the caller. If we still
        // hold one (skipped frame), overwrite it.
        let buffer = match self.pixels.take() {
            Some(held) if held.len() == expected => {
                log::warn!("Overwriting previously buffered pixels");
                held
            }
            _ => allocate(expected)?,
        };

        self.context
            .codec
            .set_image_out_buffer(&format, buffer)
            .map_err(|e| HandlerError::Decode(format!("failed to set output buffer: {:#}", e)))
    }

    fn on_frame(&mut self) -> Result<()> {
        let animated = self.basic_info.as_ref().is_some_and(|info| info.have_animation);
        if !animated {
            return Ok(());
        }

        let header = self
            .context
            .codec
            .frame_header()
            .map_err(|e| HandlerError::Decode(format!("failed to get frame header: {:#}", e)))?;
        self.frame_duration_ms = (self.ms_per_tick * f64::from(header.duration)) as u32;

        log::debug!(
            "Frame {} lasts {} ms ({} ticks)",
            self.pass_position.map_or(0, |n| n + 1),
            self.frame_duration_ms,
            header.duration
        );
        Ok(())
    }

    fn on_full_image(&mut self) -> Result<usize> {
        let buffer = self.context.codec.take_image_out_buffer().ok_or_else(|| {
            HandlerError::FormatViolation("codec completed a frame without its buffer".to_string())
        })?;

        let expected = self.expected_frame_len()?;
        if buffer.len() != expected {
            return Err(HandlerError::FormatViolation(format!(
                "codec returned a {} B buffer, expected {} B",
                buffer.len(),
                expected
            )));
        }
        self.pixels = Some(buffer);

        let current = self.pass_position.map_or(0, |n| n + 1);
        self.pass_position = Some(current);
        self.current_frame = Some(current);
        Ok(current)
    }

    fn note_exhaustion(&mut self) {
        if self.frame_count != FrameCount::Unknown {
            return;
        }
        // The codec's last-frame flag can't be trusted; count at the end.
        if let Some(current) = self.pass_position {
            self.frame_count = FrameCount::Known(current + 1);
            log::info!("Counted {} frames", current + 1);
        }
    }

    fn expected_frame_len(&self) -> Result<usize> {
        let info = self.basic_info.as_ref().ok_or_else(|| {
            HandlerError::FormatViolation("pixels requested before basic info".to_string())
        })?;
        self.pixel_format
            .frame_len(info.xsize, info.ysize)
            .ok_or_else(|| {
                HandlerError::FormatViolation(format!(
                    "{}x{} frame does not fit in memory",
                    info.xsize, info.ysize
                ))
            })
    }

    /// Decode the requested frame and hand its pixels to the caller.
    ///
    /// Running off the end of the stream loops back to frame 0, once.
    pub fn read_next_frame(&mut self) -> Result<Image> {
        if self.advance_until(Goal::FrameReady)? == Progress::StreamExhausted {
            log::debug!("Reached the end of the stream; starting over");
            self.rewind()?;
            if self.advance_until(Goal::FrameReady)? != Progress::FrameReady {
                return self.record(Err(HandlerError::Decode(
                    "restarted decoding but failed to get a frame".to_string(),
                )));
            }
        }

        let result = self.hand_off();
        self.record(result)
    }

    /// Move the held pixels into an [`Image`] the caller owns.
    fn hand_off(&mut self) -> Result<Image> {
        let (width, height) = match &self.basic_info {
            Some(info) => (info.xsize, info.ysize),
            None => {
                return Err(HandlerError::FormatViolation(
                    "frame ready without basic info".to_string(),
                ))
            }
        };
        let pixels = self.pixels.take().ok_or_else(|| {
            HandlerError::FormatViolation("no decoded frame to hand off".to_string())
        })?;

        let layout = match self.pixel_format.data_type {
            DataType::U8 => PixelLayout::Rgba8888,
            DataType::U16 => PixelLayout::Rgba64,
        };
        let stride = self.pixel_format.stride(width).ok_or_else(|| {
            HandlerError::FormatViolation(format!("{} px rows do not fit in memory", width))
        })?;

        let len = pixels.len();
        let release: ReleaseFn = Box::new(move |pixels: Box<[u8]>| {
            log::trace!("Releasing {} B frame buffer", pixels.len());
            drop(pixels);
        });
        let mut image = Image::from_raw(pixels, width, height, stride, layout, release)
            .ok_or_else(|| {
                HandlerError::FormatViolation(format!(
                    "{} B buffer does not hold a {}x{} frame",
                    len, width, height
                ))
            })?;

        if let Some(icc) = &self.icc_profile {
            match ColorSpace::from_icc_profile(icc) {
                Some(color_space) => image.set_color_space(color_space),
                None => log::warn!("Embedded colorspace unsupported; falling back on sRGB"),
            }
        }

        Ok(image)
    }

    /// Start a new pass from frame 0. The frame count survives.
    pub fn rewind(&mut self) -> Result<()> {
        self.ensure_usable()?;
        let result = self.restart_pass();
        self.record(result)
    }

    fn restart_pass(&mut self) -> Result<()> {
        let input = self.input.clone().ok_or(HandlerError::NoDevice)?;
        self.context.restart(input)?;

        self.pixels = None;
        self.pass_position = None;
        self.current_frame = None;
        self.frame_duration_ms = 0;
        self.requested_frame = 0;
        log::debug!("Rewound to frame 0");
        Ok(())
    }

    /// Make frame `index` the next one read.
    ///
    /// Seeking to the current frame or earlier costs one rewind; seeking
    /// forward decodes and drops the frames in between on the next read.
    pub fn jump_to(&mut self, index: usize) -> Result<()> {
        self.require_animation()?;

        if let FrameCount::Known(count) = self.frame_count {
            if index >= count {
                log::warn!("Requested frame is out of range: {}", index);
                return Err(HandlerError::Navigation(format!(
                    "frame {} is out of range for {} frames",
                    index, count
                )));
            }
        }

        if self.pass_position.is_some_and(|position| index <= position) {
            self.rewind()?;
        }
        self.requested_frame = index;
        Ok(())
    }

    /// Skip the frame that would otherwise be read next.
    pub fn jump_to_next(&mut self) -> Result<()> {
        self.require_animation()?;

        let next = self.requested_frame + 1;
        if self.frame_count.known().is_some_and(|count| next >= count) {
            log::warn!("There is no next frame to jump to");
            return Err(HandlerError::Navigation(format!(
                "frame {} is past the last frame",
                next
            )));
        }
        self.requested_frame = next;
        Ok(())
    }

    /// Decode to the end of the stream to learn the frame count.
    ///
    /// Leaves the cursor where it was: the next read still yields the frame
    /// that was requested before the scan, and the current frame and its
    /// delay are unchanged.
    pub fn count_frames(&mut self) -> Result<usize> {
        if let FrameCount::Known(count) = self.frame_count {
            return Ok(count);
        }

        let requested = self.requested_frame;
        let shown = (self.current_frame, self.frame_duration_ms);
        self.advance_until(Goal::StreamExhausted)?;
        self.rewind()?;
        self.requested_frame = requested;
        (self.current_frame, self.frame_duration_ms) = shown;

        match self.frame_count {
            FrameCount::Known(count) => Ok(count),
            FrameCount::Unknown => self.record(Err(HandlerError::Decode(
                "stream contains no frames".to_string(),
            ))),
        }
    }

    fn require_animation(&mut self) -> Result<()> {
        self.advance_until(Goal::MetadataReady)?;
        match self.is_animation() {
            Some(true) => Ok(()),
            Some(false) => {
                log::warn!("Jumping between frames but this isn't an animation");
                Err(HandlerError::Navigation("not an animation".to_string()))
            }
            None => self.record(Err(HandlerError::Decode(
                "stream ended before image info".to_string(),
            ))),
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.state == SessionState::Error {
            return Err(HandlerError::SessionUnusable);
        }
        Ok(())
    }

    /// Enter the terminal error state if `result` is a fatal error.
    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() && self.state != SessionState::Error {
                log::error!("Decode session failed: {}", e);
                self.state = SessionState::Error;
            }
        }
        result
    }
}

fn allocate(len: usize) -> Result<Box<[u8]>> {
    let mut pixels = Vec::new();
    pixels
        .try_reserve_exact(len)
        .map_err(|e| HandlerError::Decode(format!("failed to allocate {} B: {}", len, e)))?;
    pixels.resize(len, 0u8);
    Ok(pixels.into_boxed_slice())
}
