//! Length-prefixed record framing.
//!
//! A dataset is a sequence of frames: a 4-byte little-endian payload length followed by the
//! payload. Segment boundaries are arbitrary byte offsets, so a record belongs to the segment in
//! which its frame header starts. [`FramedRangeReader`] walks headers from the beginning of the
//! data, skips frames that start before the segment, and yields every frame that starts inside
//! it, even when the payload runs past the segment end.
//!
//! Finding a segment's first frame means reading every header before it, so across one
//! calculation the header reads grow with node count times record count. Payloads of skipped
//! frames are seeked over, not read.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::error::{ComputeError, ComputeResult};
use crate::types::Record;

/// Size of a frame header in bytes.
pub const HEADER_LEN: u64 = 4;

/// Header value for a payload of `len` bytes; payloads over `u32::MAX` bytes are rejected.
pub fn frame_len(len: usize) -> io::Result<u32> {
    u32::try_from(len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("record of {len} bytes exceeds frame limit"),
        )
    })
}

/// Write one frame. Returns the number of bytes written.
pub fn write_frame<W: Write>(writer: &mut W, record: &[u8]) -> io::Result<u64> {
    let len = frame_len(record.len())?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(record)?;
    Ok(HEADER_LEN + record.len() as u64)
}

/// Write every record as a frame. Returns the number of bytes written.
pub fn write_frames<W, I, R>(writer: &mut W, records: I) -> io::Result<u64>
where
    W: Write,
    I: IntoIterator<Item = R>,
    R: AsRef<[u8]>,
{
    let mut written = 0u64;
    for record in records {
        written += write_frame(writer, record.as_ref())?;
    }
    Ok(written)
}

/// Frame `records` into a new buffer.
pub fn encode_frames<I, R>(records: I) -> io::Result<Vec<u8>>
where
    I: IntoIterator<Item = R>,
    R: AsRef<[u8]>,
{
    let mut out = Vec::new();
    write_frames(&mut out, records)?;
    Ok(out)
}

/// Yields the records whose frames start in `[start, end)`.
///
/// End of data is `None`; a truncated header or payload is a [`ComputeError::CorruptFrame`],
/// after which the reader is exhausted.
pub struct FramedRangeReader<R> {
    inner: R,
    offset: u64,
    start: u64,
    end: u64,
    done: bool,
}

impl<R: Read + Seek> FramedRangeReader<R> {
    pub fn new(mut inner: R, start: u64, end: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner,
            offset: 0,
            start,
            end,
            done: false,
        })
    }

    fn read_header(&mut self) -> ComputeResult<Option<u32>> {
        let mut buf = [0u8; HEADER_LEN as usize];
        let mut filled = 0usize;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        match filled {
            0 => Ok(None),
            4 => Ok(Some(u32::from_le_bytes(buf))),
            n => Err(ComputeError::CorruptFrame {
                offset: self.offset,
                message: format!("truncated header ({n} of {HEADER_LEN} bytes)"),
            }),
        }
    }

    fn next_frame(&mut self) -> ComputeResult<Option<Record>> {
        loop {
            if self.offset >= self.end {
                return Ok(None);
            }
            let frame_start = self.offset;
            let Some(len) = self.read_header()? else {
                return Ok(None);
            };
            self.offset = frame_start + HEADER_LEN + u64::from(len);

            if frame_start < self.start {
                self.inner.seek_relative(i64::from(len))?;
                continue;
            }

            let mut payload = Vec::new();
            (&mut self.inner).take(u64::from(len)).read_to_end(&mut payload)?;
            if payload.len() != len as usize {
                return Err(ComputeError::CorruptFrame {
                    offset: frame_start,
                    message: format!("truncated payload ({} of {len} bytes)", payload.len()),
                });
            }
            return Ok(Some(payload));
        }
    }
}

impl<R: Read + Seek> Iterator for FramedRangeReader<R> {
    type Item = ComputeResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_frame() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
