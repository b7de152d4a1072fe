//! Handler error types.

use thiserror::Error;

/// Errors surfaced by the handler and its decode session.
///
/// Everything except [`HandlerError::Navigation`],
/// [`HandlerError::UnsupportedOption`] and [`HandlerError::NoDevice`] is
/// fatal: the session that produced it is left in its terminal error state
/// and every later decode call fails fast with
/// [`HandlerError::SessionUnusable`].
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The codec or its worker pool could not be created or wired up.
    #[error("decoder setup failed: {0}")]
    Setup(#[source] anyhow::Error),

    /// The codec behaved in a way the adapter does not support
    /// (unexpected event, output size mismatch, mixed sample depth).
    #[error("format violation: {0}")]
    FormatViolation(String),

    /// The codec asked for more input after the whole stream was supplied.
    #[error("input truncated")]
    TruncatedInput,

    /// The codec reported an internal decode failure.
    #[error("decode error: {0}")]
    Decode(String),

    /// A jump target is invalid, or the stream is not an animation.
    #[error("navigation rejected: {0}")]
    Navigation(String),

    /// The option is not one this handler can provide or accept.
    #[error("unsupported option: {0}")]
    UnsupportedOption(String),

    /// No device has been attached to the handler.
    #[error("read attempted out of sequence: device is not set")]
    NoDevice,

    /// The attached device cannot be read.
    #[error("device is not readable")]
    NotReadable,

    /// Reading the input from the device failed.
    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),

    /// A previous fatal error left the session unusable.
    #[error("decode session is unusable after an earlier failure")]
    SessionUnusable,
}

impl HandlerError {
    /// Whether this error leaves the session in its terminal state.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            HandlerError::Navigation(_)
                | HandlerError::UnsupportedOption(_)
                | HandlerError::NoDevice
        )
    }
}

/// Result type for handler operations.
pub type Result<T> = std::result::Result<T, HandlerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = HandlerError::FormatViolation("buffer is 12 B, expected 16 B".to_string());
        assert_eq!(err.to_string(), "format violation: buffer is 12 B, expected 16 B");

        let err = HandlerError::Setup(anyhow::anyhow!("no worker pool"));
        assert!(err.to_string().contains("no worker pool"));

        assert_eq!(HandlerError::TruncatedInput.to_string(), "input truncated");
    }

    #[test]
    fn navigation_and_option_errors_are_not_fatal() {
        assert!(!HandlerError::Navigation("frame 9".into()).is_fatal());
        assert!(!HandlerError::UnsupportedOption("Quality".into()).is_fatal());
        assert!(!HandlerError::NoDevice.is_fatal());
        assert!(HandlerError::TruncatedInput.is_fatal());
        assert!(HandlerError::Decode("bad group".into()).is_fatal());
        assert!(HandlerError::SessionUnusable.is_fatal());
    }
}
