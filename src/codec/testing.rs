//! Scripted codec for exercising the session without a real bitstream.
//!
//! Each decoded frame is filled with its own index, so tests can tell which
//! frame a delivered image came from.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use parking_lot::Mutex;

use super::{AnimationHeader, BasicInfo, Codec, Events, FrameHeader, PixelFormat, Runner, Status};

/// Description of the stream the codec pretends to decode.
#[derive(Debug, Clone, Default)]
pub(crate) struct Script {
    pub width: u32,
    pub height: u32,
    pub bits_per_sample: u32,
    pub animation: Option<AnimationHeader>,
    /// Per-frame durations in ticks; one entry per frame.
    pub frame_ticks: Vec<u32>,
    pub icc: Option<Vec<u8>>,
    /// Fail the ICC size query.
    pub icc_fails: bool,
    /// Ask for more input instead of starting this frame.
    pub truncate_at_frame: Option<usize>,
    /// Report a decode error instead of starting this frame.
    pub error_at_frame: Option<usize>,
    /// Re-announce basic info, with this bit depth, before this frame.
    pub reannounce_at_frame: Option<(usize, u32)>,
    /// Report an output size one byte larger than the real frame.
    pub bad_buffer_size: bool,
    /// Refuse the worker pool.
    pub setup_fails: bool,
    /// Emit this status right after basic info.
    pub unexpected_event: Option<Status>,
}

impl Script {
    pub fn still(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits_per_sample: 8,
            frame_ticks: vec![0],
            ..Self::default()
        }
    }

    pub fn animation(frame_ticks: &[u32], tps_numerator: u32, tps_denominator: u32, num_loops: u32) -> Self {
        Self {
            width: 2,
            height: 2,
            bits_per_sample: 8,
            animation: Some(AnimationHeader {
                tps_numerator,
                tps_denominator,
                num_loops,
            }),
            frame_ticks: frame_ticks.to_vec(),
            ..Self::default()
        }
    }

    fn num_frames(&self) -> usize {
        if self.animation.is_some() {
            self.frame_ticks.len()
        } else {
            1
        }
    }
}

/// What the codec did, shared with the test.
#[derive(Debug, Clone, Default)]
pub(crate) struct Counters {
    pub resets: usize,
    pub frames_decoded: usize,
    pub buffers_received: usize,
    pub runners_attached: usize,
}

pub(crate) type SharedCounters = Arc<Mutex<Counters>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    SentBasicInfo,
    BeforeFrame(usize),
    InFrame(usize),
    Done,
    Failed,
}

pub(crate) struct ScriptedCodec {
    script: Script,
    counters: SharedCounters,
    phase: Phase,
    events: Events,
    input: Option<Arc<[u8]>>,
    bits_per_sample: u32,
    reannounced: bool,
    buffer: Option<Box<[u8]>>,
    finished: Option<Box<[u8]>>,
}

impl ScriptedCodec {
    pub fn new(script: Script, counters: SharedCounters) -> Self {
        let bits_per_sample = script.bits_per_sample;
        Self {
            script,
            counters,
            phase: Phase::Start,
            events: Events::empty(),
            input: None,
            bits_per_sample,
            reannounced: false,
            buffer: None,
            finished: None,
        }
    }

    fn emit(&self, status: Status) -> Option<Status> {
        match status.event() {
            Some(event) if !self.events.contains(event) => None,
            _ => Some(status),
        }
    }

    fn step(&mut self) -> Option<Status> {
        match self.phase {
            Phase::Start => {
                self.phase = Phase::SentBasicInfo;
                self.emit(Status::BasicInfo)
            }
            Phase::SentBasicInfo => {
                self.phase = Phase::BeforeFrame(0);
                if let Some(status) = self.script.unexpected_event {
                    self.phase = Phase::Failed;
                    return Some(status);
                }
                self.emit(Status::ColorEncoding)
            }
            Phase::BeforeFrame(i) => {
                if let Some((at, bits)) = self.script.reannounce_at_frame {
                    if at == i && !self.reannounced {
                        self.reannounced = true;
                        self.bits_per_sample = bits;
                        return self.emit(Status::BasicInfo);
                    }
                }
                if self.script.error_at_frame == Some(i) {
                    self.phase = Phase::Failed;
                    return Some(Status::Error);
                }
                if self.script.truncate_at_frame == Some(i) {
                    return Some(Status::NeedMoreInput);
                }
                if i >= self.script.num_frames() {
                    self.phase = Phase::Done;
                    return Some(Status::Success);
                }
                self.phase = Phase::InFrame(i);
                self.emit(Status::Frame)
            }
            Phase::InFrame(i) => {
                let Some(mut buffer) = self.buffer.take() else {
                    return Some(Status::NeedImageOutBuffer);
                };
                buffer.fill(i as u8);
                self.finished = Some(buffer);
                self.counters.lock().frames_decoded += 1;
                self.phase = Phase::BeforeFrame(i + 1);
                self.emit(Status::FullImage)
            }
            Phase::Done => Some(Status::Success),
            Phase::Failed => Some(Status::Error),
        }
    }

    fn real_frame_len(&self, format: &PixelFormat) -> anyhow::Result<usize> {
        format
            .frame_len(self.script.width, self.script.height)
            .context("frame size overflows")
    }
}

impl Codec for ScriptedCodec {
    fn reset(&mut self) {
        self.counters.lock().resets += 1;
        self.phase = Phase::Start;
        self.events = Events::empty();
        self.input = None;
        self.bits_per_sample = self.script.bits_per_sample;
        self.reannounced = false;
        self.buffer = None;
        self.finished = None;
    }

    fn set_parallel_runner(&mut self, _runner: &Runner) -> anyhow::Result<()> {
        if self.script.setup_fails {
            bail!("scripted runner refusal");
        }
        self.counters.lock().runners_attached += 1;
        Ok(())
    }

    fn subscribe_events(&mut self, events: Events) -> anyhow::Result<()> {
        self.events = events;
        Ok(())
    }

    fn set_input(&mut self, data: Arc<[u8]>) -> anyhow::Result<()> {
        if self.input.is_some() {
            bail!("input already set");
        }
        self.input = Some(data);
        Ok(())
    }

    fn process_input(&mut self) -> Status {
        if self.input.is_none() {
            return Status::NeedMoreInput;
        }
        loop {
            if let Some(status) = self.step() {
                return status;
            }
        }
    }

    fn basic_info(&self) -> anyhow::Result<BasicInfo> {
        if self.phase == Phase::Start {
            bail!("basic info requested too early");
        }
        Ok(BasicInfo {
            xsize: self.script.width,
            ysize: self.script.height,
            bits_per_sample: self.bits_per_sample,
            exponent_bits_per_sample: 0,
            num_color_channels: 3,
            num_extra_channels: 1,
            have_animation: self.script.animation.is_some(),
            animation: self.script.animation.unwrap_or_default(),
        })
    }

    fn frame_header(&self) -> anyhow::Result<FrameHeader> {
        let Phase::InFrame(i) = self.phase else {
            bail!("no frame in progress");
        };
        Ok(FrameHeader {
            duration: self.script.frame_ticks.get(i).copied().unwrap_or(0),
            is_last: false,
        })
    }

    fn icc_profile_size(&self, _format: &PixelFormat) -> anyhow::Result<usize> {
        if self.script.icc_fails {
            bail!("scripted ICC failure");
        }
        Ok(self.script.icc.as_ref().map_or(0, Vec::len))
    }

    fn icc_profile(&self, _format: &PixelFormat, dst: &mut [u8]) -> anyhow::Result<()> {
        let icc = self.script.icc.as_ref().ok_or_else(|| anyhow!("no ICC profile"))?;
        if dst.len() != icc.len() {
            bail!("ICC buffer has the wrong size");
        }
        dst.copy_from_slice(icc);
        Ok(())
    }

    fn image_out_buffer_size(&self, format: &PixelFormat) -> anyhow::Result<usize> {
        let len = self.real_frame_len(format)?;
        Ok(if self.script.bad_buffer_size { len + 1 } else { len })
    }

    fn set_image_out_buffer(&mut self, format: &PixelFormat, buffer: Box<[u8]>) -> anyhow::Result<()> {
        if !matches!(self.phase, Phase::InFrame(_)) {
            bail!("no frame waiting for a buffer");
        }
        if buffer.len() != self.real_frame_len(format)? {
            bail!("buffer has the wrong size");
        }
        self.counters.lock().buffers_received += 1;
        self.buffer = Some(buffer);
        Ok(())
    }

    fn take_image_out_buffer(&mut self) -> Option<Box<[u8]>> {
        self.finished.take()
    }
}

/// Bare codestream: 16x8 lossless modular sRGB still, 8 bits, every sample 5.
/// No ICC profile is embedded; the colour space is signalled as an enum.
#[cfg(feature = "jxl-rs")]
pub(crate) const STILL_16X8: &[u8] = &[
    0xff, 0x0a, 0x01, 0x02, 0x88, 0x04, 0x08, 0x02, 0x01, 0x00, 0x38, 0x00,
    0x1b, 0x82, 0x36, 0x9d, 0x00, 0x00, 0x26, 0x00, 0xa0, 0x19, 0x00, 0x80,
    0x09, 0x00,
];

/// Bare codestream: 8x8 animation at 1000 ticks per second, looping forever.
/// Frame `i` has every sample set to `i + 1` and lasts 100, 200 and 150 ms.
#[cfg(feature = "jxl-rs")]
pub(crate) const ANIMATION_3_FRAMES: &[u8] = &[
    0xff, 0x0a, 0x01, 0x80, 0x60, 0x00, 0x31, 0x01, 0x08, 0x02, 0x92, 0x09,
    0x00, 0x00, 0x38, 0x00, 0x1b, 0x82, 0x36, 0x0d, 0x00, 0x80, 0x09, 0x00,
    0x68, 0x06, 0x00, 0x60, 0x02, 0x00, 0x08, 0x02, 0x22, 0x0b, 0x00, 0x00,
    0x38, 0x00, 0x1b, 0x82, 0x36, 0x15, 0x00, 0x00, 0x13, 0x00, 0xd0, 0x0c,
    0x00, 0xc0, 0x04, 0x00, 0x08, 0x02, 0x5a, 0x06, 0x00, 0x38, 0x00, 0x1b,
    0x82, 0x36, 0x95, 0x00, 0x00, 0x13, 0x00, 0xd0, 0x0c, 0x00, 0xc0, 0x04,
    0x00,
];
