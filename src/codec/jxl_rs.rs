//! [`Codec`] backed by jxl-rs.
//!
//! jxl-rs exposes a typestate decoder (`Initialized` -> `WithImageInfo` ->
//! `WithFrameInfo` -> `WithImageInfo` ...). This module keeps whichever state
//! the decoder is in and turns each transition into the pausable event the
//! session expects.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use jxl::api::{
    states, JxlBitDepth, JxlColorType, JxlDecoder, JxlDecoderOptions, JxlOutputBuffer,
    ProcessingResult,
};
use jxl::image::{Image, Rect};
use smallvec::SmallVec;

use super::rgb_conversion::Planes;
use super::{
    AnimationHeader, BasicInfo, Codec, Events, FrameHeader, PixelFormat, Runner, Status,
};
use crate::config::HandlerConfig;

/// Where the wrapped decoder currently is.
enum Stage {
    Initialized(JxlDecoder<states::Initialized>),
    WithImageInfo(JxlDecoder<states::WithImageInfo>),
    WithFrameInfo(JxlDecoder<states::WithFrameInfo>),
    /// A previous call failed; the decoder was consumed.
    Failed,
}

/// JPEG XL decoder speaking the [`Codec`] event protocol.
pub struct JxlRsCodec {
    adjust_orientation: bool,
    stage: Stage,
    events: Events,
    input: Option<Arc<[u8]>>,
    offset: usize,
    runner: Option<Runner>,
    basic_info: Option<BasicInfo>,
    color_type: Option<JxlColorType>,
    num_extra_channels: usize,
    icc: Option<Vec<u8>>,
    frame_header: Option<FrameHeader>,
    pending: SmallVec<[Status; 2]>,
    out: Option<(PixelFormat, Box<[u8]>)>,
    finished: Option<Box<[u8]>>,
}

impl JxlRsCodec {
    pub fn new(config: &HandlerConfig) -> Self {
        Self::with_orientation(config.adjust_orientation)
    }

    fn with_orientation(adjust_orientation: bool) -> Self {
        Self {
            adjust_orientation,
            stage: Stage::Initialized(JxlDecoder::new(decoder_options(adjust_orientation))),
            events: Events::empty(),
            input: None,
            offset: 0,
            runner: None,
            basic_info: None,
            color_type: None,
            num_extra_channels: 0,
            icc: None,
            frame_header: None,
            pending: SmallVec::new(),
            out: None,
            finished: None,
        }
    }

    /// Advance the decoder by one typestate transition.
    ///
    /// Returns the next stage and the status to report, if this transition
    /// produced one the caller subscribed to.
    fn step(&mut self, stage: Stage, input: &[u8]) -> anyhow::Result<(Stage, Option<Status>)> {
        match stage {
            Stage::Initialized(decoder) => {
                let mut data = &input[self.offset..];
                let available_before = data.len();
                let result = decoder.process(&mut data)?;
                self.offset += available_before - data.len();

                match result {
                    ProcessingResult::Complete { result } => {
                        self.cache_image_info(&result);
                        if self.events.contains(Events::BASIC_INFO) {
                            self.pending.push(Status::BasicInfo);
                        }
                        if self.events.contains(Events::COLOR_ENCODING) {
                            self.pending.push(Status::ColorEncoding);
                        }
                        Ok((Stage::WithImageInfo(result), None))
                    }
                    ProcessingResult::NeedsMoreInput { fallback, .. } => {
                        Ok((Stage::Initialized(fallback), Some(Status::NeedMoreInput)))
                    }
                }
            }
            Stage::WithImageInfo(decoder) => {
                if !decoder.has_more_frames() {
                    return Ok((Stage::WithImageInfo(decoder), Some(Status::Success)));
                }

                let mut data = &input[self.offset..];
                let available_before = data.len();
                let result = decoder.process(&mut data)?;
                self.offset += available_before - data.len();

                match result {
                    ProcessingResult::Complete { result } => {
                        self.frame_header = Some(self.convert_frame_header(&result));
                        let event = self.events.contains(Events::FRAME).then_some(Status::Frame);
                        Ok((Stage::WithFrameInfo(result), event))
                    }
                    ProcessingResult::NeedsMoreInput { fallback, .. } => {
                        Ok((Stage::WithImageInfo(fallback), Some(Status::NeedMoreInput)))
                    }
                }
            }
            Stage::WithFrameInfo(decoder) => match self.out.take() {
                None => Ok((
                    Stage::WithFrameInfo(decoder),
                    Some(Status::NeedImageOutBuffer),
                )),
                Some((format, buffer)) => self.decode_frame(decoder, input, format, buffer),
            },
            Stage::Failed => Err(anyhow!("Decoder is in a failed state; reset it first")),
        }
    }

    /// Decode the current frame's pixels and write them into `buffer`.
    fn decode_frame(
        &mut self,
        decoder: JxlDecoder<states::WithFrameInfo>,
        input: &[u8],
        format: PixelFormat,
        mut buffer: Box<[u8]>,
    ) -> anyhow::Result<(Stage, Option<Status>)> {
        let info = self
            .basic_info
            .as_ref()
            .context("Frame reached before image info")?;
        let (width, height) = (info.xsize as usize, info.ysize as usize);
        let color_type = self.color_type.context("Color type unknown")?;

        // Determine samples per pixel
        let samples_per_pixel = match color_type {
            JxlColorType::Grayscale | JxlColorType::GrayscaleAlpha => 1,
            JxlColorType::Rgb | JxlColorType::Bgr | JxlColorType::Rgba | JxlColorType::Bgra => 3,
        };

        // Create output buffers
        let mut main_channel = Image::<f32>::new((width * samples_per_pixel, height))?;
        let mut extra_channel_buffers: Vec<Image<f32>> = (0..self.num_extra_channels)
            .map(|_| Image::<f32>::new((width, height)))
            .collect::<Result<Vec<_>, _>>()?;

        let rect = Rect {
            size: main_channel.size(),
            origin: (0, 0),
        };

        let mut output_bufs = vec![JxlOutputBuffer::from_image_rect_mut(
            main_channel.get_rect_mut(rect).into_raw(),
        )];
        for extra in &mut extra_channel_buffers {
            let extra_rect = Rect {
                size: extra.size(),
                origin: (0, 0),
            };
            output_bufs.push(JxlOutputBuffer::from_image_rect_mut(
                extra.get_rect_mut(extra_rect).into_raw(),
            ));
        }

        let mut data = &input[self.offset..];
        let available_before = data.len();
        let result = decoder.process(&mut data, &mut output_bufs)?;
        self.offset += available_before - data.len();

        // Release the mutable borrows before reading the planes back
        drop(output_bufs);

        match result {
            ProcessingResult::Complete { result } => {
                let planes = Planes::from_images(
                    &main_channel,
                    &extra_channel_buffers,
                    color_type,
                    width,
                    height,
                );
                planes.write_rgba(format.data_type, &mut buffer, self.runner.as_ref());
                self.finished = Some(buffer);

                let event = self
                    .events
                    .contains(Events::FULL_IMAGE)
                    .then_some(Status::FullImage);
                Ok((Stage::WithImageInfo(result), event))
            }
            ProcessingResult::NeedsMoreInput { fallback, .. } => {
                self.out = Some((format, buffer));
                Ok((Stage::WithFrameInfo(fallback), Some(Status::NeedMoreInput)))
            }
        }
    }

    fn cache_image_info(&mut self, decoder: &JxlDecoder<states::WithImageInfo>) {
        let basic_info = decoder.basic_info();
        let (width, height) = basic_info.size;

        let (bits_per_sample, exponent_bits_per_sample) = match &basic_info.bit_depth {
            JxlBitDepth::Int { bits_per_sample } => (*bits_per_sample as u32, 0),
            JxlBitDepth::Float {
                bits_per_sample,
                exponent_bits_per_sample,
            } => (*bits_per_sample as u32, *exponent_bits_per_sample as u32),
        };

        let animation = basic_info.animation.as_ref().map(|a| AnimationHeader {
            tps_numerator: a.tps_numerator as u32,
            tps_denominator: a.tps_denominator as u32,
            num_loops: a.num_loops as u32,
        });

        let color_type = decoder.current_pixel_format().color_type;
        let num_color_channels = match color_type {
            JxlColorType::Grayscale | JxlColorType::GrayscaleAlpha => 1,
            JxlColorType::Rgb | JxlColorType::Bgr | JxlColorType::Rgba | JxlColorType::Bgra => 3,
        };

        self.num_extra_channels = basic_info.extra_channels.len();
        self.color_type = Some(color_type);
        // The profile of the pixels we hand out, not the one in the file: for
        // enum-coded or XYB images jxl-rs synthesises it.
        self.icc = match decoder.output_color_profile().try_as_icc() {
            Some(icc) => Some(icc.into_owned()),
            None => {
                log::warn!("Output color profile has no ICC representation");
                None
            }
        };
        self.basic_info = Some(BasicInfo {
            xsize: width as u32,
            ysize: height as u32,
            bits_per_sample,
            exponent_bits_per_sample,
            num_color_channels,
            num_extra_channels: self.num_extra_channels as u32,
            have_animation: animation.is_some(),
            animation: animation.unwrap_or_default(),
        });

        log::debug!(
            "jxl-rs image info: {}x{}, color type: {:?}, {} extra channel(s)",
            width,
            height,
            color_type,
            self.num_extra_channels
        );
    }

    fn convert_frame_header(&self, decoder: &JxlDecoder<states::WithFrameInfo>) -> FrameHeader {
        let header = decoder.frame_header();
        // jxl-rs reports durations in milliseconds; the contract is in ticks.
        let duration_ms = header.duration.unwrap_or(0.0) as f64;
        let duration = match &self.basic_info {
            Some(info) if info.have_animation => ms_to_ticks(duration_ms, &info.animation),
            _ => 0,
        };

        FrameHeader {
            duration,
            // jxl-rs only knows this after the frame is decoded.
            is_last: false,
        }
    }

    fn check_format(&self, format: &PixelFormat) -> anyhow::Result<()> {
        if format.num_channels != 4 {
            bail!("Only RGBA output is supported, not {} channels", format.num_channels);
        }
        Ok(())
    }
}

fn decoder_options(adjust_orientation: bool) -> JxlDecoderOptions {
    let mut options = JxlDecoderOptions::default();
    options.adjust_orientation = adjust_orientation;
    options.coalescing = true; // Blend frames for animation
    options.premultiply_output = false; // Straight alpha for RGBA layouts
    options
}

fn ms_to_ticks(duration_ms: f64, animation: &AnimationHeader) -> u32 {
    match animation.ms_per_tick() {
        Some(ms_per_tick) if ms_per_tick > 0.0 => (duration_ms / ms_per_tick).round() as u32,
        _ => 0,
    }
}

impl Codec for JxlRsCodec {
    fn reset(&mut self) {
        *self = Self::with_orientation(self.adjust_orientation);
    }

    fn set_parallel_runner(&mut self, runner: &Runner) -> anyhow::Result<()> {
        self.runner = Some(runner.clone());
        Ok(())
    }

    fn subscribe_events(&mut self, events: Events) -> anyhow::Result<()> {
        if !events.contains(Events::FULL_IMAGE) {
            bail!("Pixel output requires the full-image event");
        }
        self.events = events;
        Ok(())
    }

    fn set_input(&mut self, data: Arc<[u8]>) -> anyhow::Result<()> {
        if self.input.is_some() {
            bail!("Input was already supplied; reset the decoder first");
        }
        self.input = Some(data);
        self.offset = 0;
        Ok(())
    }

    fn process_input(&mut self) -> Status {
        if !self.pending.is_empty() {
            return self.pending.remove(0);
        }
        let Some(input) = self.input.clone() else {
            return Status::NeedMoreInput;
        };

        loop {
            let stage = std::mem::replace(&mut self.stage, Stage::Failed);
            match self.step(stage, &input) {
                Ok((stage, event)) => {
                    self.stage = stage;
                    if let Some(status) = event {
                        return status;
                    }
                    if !self.pending.is_empty() {
                        return self.pending.remove(0);
                    }
                }
                Err(e) => {
                    log::warn!("jxl-rs failed: {:#}", e);
                    self.stage = Stage::Failed;
                    return Status::Error;
                }
            }
        }
    }

    fn basic_info(&self) -> anyhow::Result<BasicInfo> {
        self.basic_info
            .clone()
            .context("Basic info is not available yet")
    }

    fn frame_header(&self) -> anyhow::Result<FrameHeader> {
        self.frame_header
            .clone()
            .context("Frame header is not available yet")
    }

    fn icc_profile_size(&self, _format: &PixelFormat) -> anyhow::Result<usize> {
        if self.basic_info.is_none() {
            bail!("Color encoding is not available yet");
        }
        Ok(self.icc.as_ref().map_or(0, Vec::len))
    }

    fn icc_profile(&self, _format: &PixelFormat, dst: &mut [u8]) -> anyhow::Result<()> {
        let icc = self.icc.as_ref().context("No ICC profile for the output color space")?;
        if dst.len() != icc.len() {
            bail!("ICC buffer is {} B, profile is {} B", dst.len(), icc.len());
        }
        dst.copy_from_slice(icc);
        Ok(())
    }

    fn image_out_buffer_size(&self, format: &PixelFormat) -> anyhow::Result<usize> {
        self.check_format(format)?;
        let info = self
            .basic_info
            .as_ref()
            .context("Basic info is not available yet")?;
        format
            .frame_len(info.xsize, info.ysize)
            .context("Frame size overflows")
    }

    fn set_image_out_buffer(&mut self, format: &PixelFormat, buffer: Box<[u8]>) -> anyhow::Result<()> {
        if !matches!(self.stage, Stage::WithFrameInfo(_)) {
            bail!("No frame is waiting for an output buffer");
        }
        let expected = self.image_out_buffer_size(format)?;
        if buffer.len() != expected {
            bail!("Output buffer is {} B, expected {} B", buffer.len(), expected);
        }
        self.out = Some((*format, buffer));
        Ok(())
    }

    fn take_image_out_buffer(&mut self) -> Option<Box<[u8]>> {
        self.finished.take()
    }
}
