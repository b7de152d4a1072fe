//! JPEG XL signature sniffing.
//!
//! Classifies a short prefix of a stream without consuming it, so hosts can
//! ask "is this ours?" before a decode session exists.

use crate::device::Device;

/// Number of bytes peeked from a device before classifying it.
pub const SIGNATURE_LEN: usize = 12;

/// Format tag reported for decodable streams.
pub const FORMAT_NAME: &str = "jxl";

/// Marker opening a bare JPEG XL codestream.
pub const CODESTREAM_MAGIC: [u8; 2] = [0xFF, 0x0A];

/// The `JXL ` signature box opening an ISOBMFF-style container.
pub const CONTAINER_MAGIC: [u8; SIGNATURE_LEN] = [
    0x00, 0x00, 0x00, 0x0C, b'J', b'X', b'L', b' ', 0x0D, 0x0A, 0x87, 0x0A,
];

/// Result of checking a byte prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    /// The prefix is too short to decide.
    NotEnoughBytes,
    /// Not a JPEG XL stream.
    Invalid,
    /// Raw codestream.
    Codestream,
    /// Container format.
    Container,
}

impl Signature {
    pub fn is_jxl(self) -> bool {
        matches!(self, Signature::Codestream | Signature::Container)
    }
}

/// Classify `bytes` as a JPEG XL codestream, a container, or neither.
pub fn check_signature(bytes: &[u8]) -> Signature {
    if bytes.is_empty() {
        return Signature::NotEnoughBytes;
    }

    if bytes[0] == CODESTREAM_MAGIC[0] {
        return match bytes.get(1) {
            None => Signature::NotEnoughBytes,
            Some(&b) if b == CODESTREAM_MAGIC[1] => Signature::Codestream,
            Some(_) => Signature::Invalid,
        };
    }

    let n = bytes.len().min(SIGNATURE_LEN);
    if bytes[..n] != CONTAINER_MAGIC[..n] {
        return Signature::Invalid;
    }
    if n < SIGNATURE_LEN {
        Signature::NotEnoughBytes
    } else {
        Signature::Container
    }
}

/// Peek the device's signature and report the readable format, if any.
///
/// Never advances the device. Fewer than [`SIGNATURE_LEN`] available bytes
/// counts as "not decodable"; this does not wait for more data.
pub fn readable_format(device: &mut dyn Device) -> Option<&'static str> {
    let header = match device.peek(SIGNATURE_LEN) {
        Ok(header) => header,
        Err(e) => {
            log::warn!("Failed to peek signature: {}", e);
            return None;
        }
    };

    if header.len() != SIGNATURE_LEN {
        log::info!("Only got {}B from peek", header.len());
        return None;
    }

    match check_signature(&header) {
        Signature::NotEnoughBytes => {
            log::warn!("Signature check wants more than {} bytes", SIGNATURE_LEN);
            None
        }
        Signature::Invalid => None,
        Signature::Codestream | Signature::Container => Some(FORMAT_NAME),
    }
}
