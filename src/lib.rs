//! Frame-indexed JPEG XL reading on top of an incremental, event-driven
//! decoder.
//!
//! [`JxlHandler`] is what a host talks to: it sniffs the input, decodes
//! frames on demand, seeks within animations and hands each decoded frame
//! over as an owned [`Image`]. The decoder itself sits behind the
//! [`Codec`](codec::Codec) trait; with the default `jxl-rs` feature,
//! [`JxlRsCodec`](codec::jxl_rs::JxlRsCodec) provides it.

pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod handler;
pub mod image;
pub mod options;
pub mod plugin;
pub mod session;
pub mod signature;

pub use config::HandlerConfig;
pub use device::{Device, PeekReader};
pub use error::{HandlerError, Result};
pub use handler::{CodecFactory, JxlHandler};
pub use crate::image::{ColorSpace, Image, PixelBuffer, PixelLayout};
pub use options::{ImageOption, LoopCount, OptionValue, Rect};
pub use plugin::{Capabilities, JxlPlugin};
pub use signature::{check_signature, readable_format, Signature};
