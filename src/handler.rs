//! The pull-based, frame-indexed reader hosts talk to.

use std::time::Duration;

use anyhow::Context;

use crate::codec::{BasicInfo, Codec};
use crate::config::HandlerConfig;
use crate::device::Device;
use crate::error::{HandlerError, Result};
use crate::image::Image;
use crate::options::{ImageOption, LoopCount, OptionValue, Rect};
use crate::session::{DecodeSession, Goal, SessionState};
use crate::signature::readable_format;

#[cfg(feature = "jxl-rs")]
use crate::codec::jxl_rs::JxlRsCodec;

/// Creates the codec for a new decode session.
pub type CodecFactory<C> = Box<dyn Fn(&HandlerConfig) -> anyhow::Result<C> + Send>;

/// Reads JPEG XL images and animations from a [`Device`].
///
/// Constructing a handler is cheap: the decode session (codec, worker pool,
/// buffered input) is only created by the first call that actually decodes.
/// Existence checks like [`can_read`](Self::can_read) never create one.
pub struct JxlHandler<C: Codec> {
    device: Option<Box<dyn Device>>,
    format: String,
    config: HandlerConfig,
    factory: CodecFactory<C>,
    session: Option<DecodeSession<C>>,
    setup_failed: bool,
}

#[cfg(feature = "jxl-rs")]
impl JxlHandler<JxlRsCodec> {
    pub fn new() -> Self {
        Self::with_config(HandlerConfig::default())
    }

    pub fn with_config(config: HandlerConfig) -> Self {
        Self::with_codec_factory(
            config,
            Box::new(|config: &HandlerConfig| -> anyhow::Result<JxlRsCodec> {
                Ok(JxlRsCodec::new(config))
            }),
        )
    }
}

#[cfg(feature = "jxl-rs")]
impl Default for JxlHandler<JxlRsCodec> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Codec> JxlHandler<C> {
    pub fn with_codec_factory(config: HandlerConfig, factory: CodecFactory<C>) -> Self {
        Self {
            device: None,
            format: String::new(),
            config,
            factory,
            session: None,
            setup_failed: false,
        }
    }

    pub fn set_device(&mut self, device: Box<dyn Device>) {
        self.device = Some(device);
    }

    pub fn device_mut(&mut self) -> Option<&mut (dyn Device + 'static)> {
        self.device.as_deref_mut()
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn set_format(&mut self, format: impl Into<String>) {
        self.format = format.into();
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Whether the device holds a decodable stream. Does not consume it.
    pub fn can_read(&mut self) -> bool {
        let buffered = self
            .session
            .as_ref()
            .is_some_and(|s| s.has_input() && s.state() != SessionState::Error);
        if buffered {
            return true;
        }

        let Some(device) = self.device.as_mut() else {
            return false;
        };
        if !device.is_readable() {
            return false;
        }

        match readable_format(device.as_mut()) {
            Some(format) => {
                self.format = format.to_string();
                true
            }
            None => false,
        }
    }

    /// Decode the next frame.
    ///
    /// That is frame 0 on the first call, the frame after the last one read
    /// on later calls, or whichever frame a jump selected. Reading past the
    /// last frame starts over at frame 0.
    pub fn read(&mut self) -> Result<Image> {
        self.prepared_session()?.read_next_frame()
    }

    /// Like [`read`](Self::read), replacing `image` on success.
    pub fn read_into(&mut self, image: &mut Image) -> Result<()> {
        *image = self.read()?;
        Ok(())
    }

    /// Decode just far enough to learn the image metadata.
    pub fn read_metadata(&mut self) -> Result<BasicInfo> {
        let session = self.prepared_session()?;
        session.advance_until(Goal::MetadataReady)?;
        session.basic_info().cloned().ok_or_else(|| {
            HandlerError::Decode("stream ended before image info".to_string())
        })
    }

    /// Total number of frames, if known yet.
    ///
    /// Still images are known to have one frame as soon as their metadata is
    /// read. Animations are counted when the stream is first read to the
    /// end; see [`scan_image_count`](Self::scan_image_count).
    pub fn image_count(&self) -> Option<usize> {
        let count = self.session.as_ref().and_then(|s| s.frame_count().known());
        if count.is_none() {
            log::warn!("Request for image count but we haven't counted them yet");
        }
        count
    }

    /// Decode to the end of the stream to count frames, without moving the
    /// read cursor.
    pub fn scan_image_count(&mut self) -> Result<usize> {
        self.prepared_session()?.count_frames()
    }

    pub fn loop_count(&self) -> Option<LoopCount> {
        let loop_count = self.session.as_ref().and_then(|s| s.loop_count());
        if loop_count.is_none() {
            log::warn!("Request for loop count before basic info is available");
        }
        loop_count
    }

    /// How long to show the frame last read; zero for still images.
    pub fn next_image_delay(&self) -> Duration {
        match &self.session {
            Some(session) if session.is_animation() == Some(true) => {
                Duration::from_millis(u64::from(session.frame_duration_ms()))
            }
            _ => Duration::ZERO,
        }
    }

    /// Index of the frame last read in the current pass.
    pub fn current_image_number(&self) -> Option<usize> {
        let Some(session) = self.session.as_ref().filter(|s| s.basic_info().is_some()) else {
            log::warn!("Request for current image number before we have basic info");
            return None;
        };
        session.current_frame()
    }

    pub fn current_image_rect(&self) -> Option<Rect> {
        log::warn!("currentImageRect is unsupported");
        None
    }

    /// Make frame `index` the next one [`read`](Self::read) returns.
    ///
    /// Rejected for still images and for indices past a known frame count.
    pub fn jump_to_image(&mut self, index: usize) -> Result<()> {
        self.prepared_session()?.jump_to(index)
    }

    /// Skip one frame ahead of the one [`read`](Self::read) would return.
    pub fn jump_to_next_image(&mut self) -> Result<()> {
        self.prepared_session()?.jump_to_next()
    }

    pub fn supports_option(&self, option: ImageOption) -> bool {
        option == ImageOption::Animation
    }

    pub fn option(&self, option: ImageOption) -> Option<OptionValue> {
        if option != ImageOption::Animation {
            log::warn!("Request for unsupported option {}", option);
            return None;
        }

        match self.session.as_ref().and_then(|s| s.is_animation()) {
            Some(animated) => Some(OptionValue::Bool(animated)),
            None => {
                log::warn!("Unable to provide option {} before basic info is available", option);
                None
            }
        }
    }

    /// No option can be set on a reader.
    pub fn set_option(&mut self, option: ImageOption, value: OptionValue) -> Result<()> {
        log::warn!("Setting option {} to {:?} is unsupported", option, value);
        Err(HandlerError::UnsupportedOption(option.to_string()))
    }

    /// The live session, created and fed the device's bytes if need be.
    fn prepared_session(&mut self) -> Result<&mut DecodeSession<C>> {
        if self.setup_failed {
            return Err(HandlerError::SessionUnusable);
        }

        if self.session.is_none() {
            if self.device.is_none() {
                log::warn!("Read attempted out of sequence - device is not set");
                return Err(HandlerError::NoDevice);
            }
            match self.open_session() {
                Ok(session) => self.session = Some(session),
                Err(e) => {
                    log::error!("Failed to set up decoder: {}", e);
                    self.setup_failed = true;
                    return Err(e);
                }
            }
        }

        let Some(session) = self.session.as_mut() else {
            return Err(HandlerError::SessionUnusable);
        };
        if !session.has_input() {
            let Some(device) = self.device.as_mut() else {
                log::warn!("Read attempted out of sequence - device is not set");
                return Err(HandlerError::NoDevice);
            };
            session.load_input(device.as_mut())?;
        }
        Ok(session)
    }

    fn open_session(&self) -> Result<DecodeSession<C>> {
        let codec = (self.factory)(&self.config)
            .context("Failed to create decoder")
            .map_err(HandlerError::Setup)?;
        DecodeSession::new(codec, &self.config)
    }
}
