use std::io::{self, Read};

use flate2::read::GzDecoder;

/// Frames larger than this are assumed to be torn writes, not data.
pub const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// Reads length-prefixed gzip frames off an underlying byte stream.
///
/// The length prefix is a 4-byte big-endian unsigned integer. Truncation at
/// any point - inside the prefix or inside the payload - is reported as a
/// clean end of stream so callers can treat torn tails as EOF.
pub struct FrameReader<R> {
    inner: R,
    finished: bool,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, finished: false }
    }

    /// Next decompressed payload, `Ok(None)` at end of stream.
    ///
    /// A zero or implausibly large length ends the stream: both arise from
    /// torn writes, never from a well-formed file.
    pub fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.finished {
            return Ok(None);
        }

        let mut prefix = [0u8; 4];
        if !self.read_fully(&mut prefix)? {
            self.finished = true;
            return Ok(None);
        }

        let len = u32::from_be_bytes(prefix);
        if len == 0 || len > MAX_FRAME_BYTES {
            self.finished = true;
            return Ok(None);
        }

        let mut compressed = vec![0u8; len as usize];
        if !self.read_fully(&mut compressed)? {
            self.finished = true;
            return Ok(None);
        }

        let mut payload = Vec::new();
        match GzDecoder::new(compressed.as_slice()).read_to_end(&mut payload) {
            Ok(_) => Ok(Some(payload)),
            Err(err) => {
                self.finished = true;
                Err(err)
            }
        }
    }

    /// Fill `buf` completely; `Ok(false)` when the stream ends first.
    fn read_fully(&mut self, buf: &mut [u8]) -> io::Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => return Ok(false),
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        Ok(true)
    }
}
