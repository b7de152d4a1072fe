//! Entry point a host's plugin registry uses to find and create handlers.

use crate::codec::Codec;
use crate::config::HandlerConfig;
use crate::device::Device;
use crate::handler::{CodecFactory, JxlHandler};
use crate::signature::{readable_format, FORMAT_NAME};

#[cfg(feature = "jxl-rs")]
use crate::codec::jxl_rs::JxlRsCodec;

/// What the plugin can do with a device or format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub can_read: bool,
    /// Always false: there is no encoder.
    pub can_write: bool,
    pub can_read_incremental: bool,
}

impl Capabilities {
    pub const READ: Capabilities = Capabilities {
        can_read: true,
        can_write: false,
        can_read_incremental: false,
    };

    pub fn is_empty(&self) -> bool {
        !(self.can_read || self.can_write || self.can_read_incremental)
    }
}

#[derive(Debug, Clone, Default)]
pub struct JxlPlugin {
    config: HandlerConfig,
}

impl JxlPlugin {
    /// Format keys the plugin registers for.
    pub const KEYS: &'static [&'static str] = &[FORMAT_NAME];
    pub const MIME_TYPES: &'static [&'static str] = &["image/jxl"];

    pub fn new(config: HandlerConfig) -> Self {
        Self { config }
    }

    /// Without a device, answer from the format name alone; with one, sniff
    /// its signature.
    pub fn capabilities(&self, device: Option<&mut dyn Device>, format: &str) -> Capabilities {
        let readable = match device {
            None => format == FORMAT_NAME,
            Some(device) => readable_format(device) == Some(FORMAT_NAME),
        };
        if readable {
            Capabilities::READ
        } else {
            Capabilities::default()
        }
    }

    /// Create a handler using `factory` for its codec.
    ///
    /// Returns `None` unless `format` is `"jxl"`, or is empty and the device
    /// (if any) sniffs as JPEG XL.
    pub fn create_with<C: Codec>(
        &self,
        mut device: Option<Box<dyn Device>>,
        format: &str,
        factory: CodecFactory<C>,
    ) -> Option<JxlHandler<C>> {
        let sniffed = match device.as_mut() {
            Some(device) => self.capabilities(Some(device.as_mut()), FORMAT_NAME),
            None => self.capabilities(None, FORMAT_NAME),
        };
        let accepted = format == FORMAT_NAME || (format.is_empty() && sniffed.can_read);
        if !accepted {
            log::debug!("Not creating a handler for format {:?}", format);
            return None;
        }

        let mut handler = JxlHandler::with_codec_factory(self.config.clone(), factory);
        if let Some(device) = device {
            handler.set_device(device);
        }
        handler.set_format(format);
        Some(handler)
    }

    #[cfg(feature = "jxl-rs")]
    pub fn create(
        &self,
        device: Option<Box<dyn Device>>,
        format: &str,
    ) -> Option<JxlHandler<JxlRsCodec>> {
        self.create_with(
            device,
            format,
            Box::new(|config: &HandlerConfig| -> anyhow::Result<JxlRsCodec> {
                Ok(JxlRsCodec::new(config))
            }),
        )
    }
}
