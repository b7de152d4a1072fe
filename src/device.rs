//! Readable byte streams the handler decodes from.

use std::io::{self, Cursor, Read};

/// A readable input stream.
///
/// The handler needs two things from its input: a non-consuming peek at the
/// first few bytes (for signature sniffing) and a single read of everything
/// that remains.
pub trait Device {
    /// Whether the device can currently be read.
    fn is_readable(&self) -> bool {
        true
    }

    /// Return up to `len` bytes from the current position without consuming
    /// them. Fewer bytes are returned when the stream is shorter.
    fn peek(&mut self, len: usize) -> io::Result<Vec<u8>>;

    /// Consume and return every remaining byte.
    fn read_all(&mut self) -> io::Result<Vec<u8>>;
}

impl<D: Device + ?Sized> Device for Box<D> {
    fn is_readable(&self) -> bool {
        (**self).is_readable()
    }

    fn peek(&mut self, len: usize) -> io::Result<Vec<u8>> {
        (**self).peek(len)
    }

    fn read_all(&mut self) -> io::Result<Vec<u8>> {
        (**self).read_all()
    }
}

impl<T: AsRef<[u8]>> Device for Cursor<T> {
    fn peek(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let data = self.get_ref().as_ref();
        let start = usize::try_from(self.position())
            .unwrap_or(usize::MAX)
            .min(data.len());
        let end = start.saturating_add(len).min(data.len());
        Ok(data[start..end].to_vec())
    }

    fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.read_to_end(&mut out)?;
        Ok(out)
    }
}

/// Adapts any [`Read`] into a [`Device`].
///
/// Peeked bytes are held back and replayed at the front of
/// [`read_all`](Device::read_all).
pub struct PeekReader<R> {
    inner: R,
    peeked: Vec<u8>,
}

impl<R: Read> PeekReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            peeked: Vec::new(),
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Device for PeekReader<R> {
    fn peek(&mut self, len: usize) -> io::Result<Vec<u8>> {
        while self.peeked.len() < len {
            let mut chunk = vec![0u8; len - self.peeked.len()];
            match self.inner.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => self.peeked.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        let n = len.min(self.peeked.len());
        Ok(self.peeked[..n].to_vec())
    }

    fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let mut out = std::mem::take(&mut self.peeked);
        self.inner.read_to_end(&mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};

    #[test]
    fn test_cursor_peek_is_non_consuming() {
        let mut cursor = Cursor::new(b"0123456789".to_vec());
        assert_eq!(cursor.peek(4).unwrap(), b"0123");
        assert_eq!(cursor.peek(4).unwrap(), b"0123");
        assert_eq!(cursor.peek(64).unwrap(), b"0123456789");
        assert_eq!(cursor.read_all().unwrap(), b"0123456789");
        assert!(cursor.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_cursor_peek_from_position() {
        let mut cursor = Cursor::new(b"abcdef".to_vec());
        cursor.set_position(4);
        assert_eq!(cursor.peek(12).unwrap(), b"ef");
        cursor.set_position(100);
        assert!(cursor.peek(12).unwrap().is_empty());
    }

    #[test]
    fn test_peek_reader_replays_peeked_bytes() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"\xFF\x0Arest of the stream").unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();

        let mut device = PeekReader::new(file);
        assert_eq!(device.peek(2).unwrap(), b"\xFF\x0A");
        assert_eq!(device.peek(6).unwrap(), b"\xFF\x0Arest");
        assert_eq!(device.read_all().unwrap(), b"\xFF\x0Arest of the stream");
    }

    /// Hands out at most one byte per read call.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.0.is_empty() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.0[0];
            self.0 = &self.0[1..];
            Ok(1)
        }
    }

    #[test]
    fn test_peek_reader_fills_across_short_reads() {
        let mut device = PeekReader::new(Trickle(b"abcdefghijklmnop"));
        assert_eq!(device.peek(12).unwrap(), b"abcdefghijkl");
        assert_eq!(device.read_all().unwrap(), b"abcdefghijklmnop");
    }
}
