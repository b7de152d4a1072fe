//! Capability queries a host can make of a handler.

use std::fmt;

/// The fixed set of options a host may ask about.
///
/// Only [`ImageOption::Animation`] is answered; everything else is reported
/// as unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageOption {
    Size,
    ClipRect,
    Description,
    ScaledClipRect,
    ScaledSize,
    CompressionRatio,
    Gamma,
    Quality,
    Name,
    SubType,
    IncrementalReading,
    Endianness,
    Animation,
    BackgroundColor,
    ImageFormat,
    SupportedSubTypes,
    OptimizedWrite,
    ProgressiveScanWrite,
    ImageTransformation,
}

impl fmt::Display for ImageOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Value of an answered option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Size { width: u32, height: u32 },
    Text(String),
}

/// How many times an animation repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCount {
    Finite(u32),
    Infinite,
}

impl LoopCount {
    /// Integer form for hosts without an infinity value: `Infinite` is
    /// `i32::MAX`.
    pub fn as_i32(self) -> i32 {
        match self {
            LoopCount::Finite(n) => i32::try_from(n).unwrap_or(i32::MAX),
            LoopCount::Infinite => i32::MAX,
        }
    }
}

/// A rectangle in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}
