//! Frame records as they sit in a stream's ring.
//!
//! Every record is a fixed 48-byte little-endian header followed by the pixel
//! payload. `bytes_of_frame` covers header and payload, so the next record in
//! a mapped span starts exactly `bytes_of_frame` bytes after the current one.
//!
//! ```text
//! offset  size  field
//!      0     8  bytes_of_frame
//!      8     8  frame_id
//!     16     8  hardware_frame_id
//!     24     8  timestamp_ns
//!     32     4  width
//!     36     4  height
//!     40     4  sample_type
//!     44     4  reserved
//!     48     -  payload
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use mmdev_core::{DriverError, DriverErrorKind};
use serde::{Deserialize, Serialize};

use super::source::{StreamId, DRIVER_TYPE};

/// Bytes before the payload in every record.
pub const HEADER_SIZE: usize = 48;

/// Pixel encoding of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    /// Unsigned 8-bit.
    #[default]
    U8,
    /// Unsigned 16-bit.
    U16,
    /// Signed 8-bit.
    I8,
    /// Signed 16-bit.
    I16,
    /// 32-bit float.
    F32,
    /// 10 significant bits in a 16-bit sample.
    U10,
    /// 12 significant bits in a 16-bit sample.
    U12,
    /// 14 significant bits in a 16-bit sample.
    U14,
}

impl SampleType {
    /// Storage size of one sample.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            SampleType::U8 | SampleType::I8 => 1,
            SampleType::U16 | SampleType::I16 | SampleType::U10 | SampleType::U12 | SampleType::U14 => 2,
            SampleType::F32 => 4,
        }
    }

    /// Significant bits per sample.
    pub fn bit_depth(self) -> u32 {
        match self {
            SampleType::U8 | SampleType::I8 => 8,
            SampleType::U10 => 10,
            SampleType::U12 => 12,
            SampleType::U14 => 14,
            SampleType::U16 | SampleType::I16 => 16,
            SampleType::F32 => 32,
        }
    }

    /// Unsigned type matching an image depth: 2 bytes maps to u16, anything
    /// else to u8.
    pub fn for_depth(bytes_per_pixel: u32) -> Self {
        if bytes_per_pixel == 2 {
            SampleType::U16
        } else {
            SampleType::U8
        }
    }

    fn code(self) -> u32 {
        match self {
            SampleType::U8 => 0,
            SampleType::U16 => 1,
            SampleType::I8 => 2,
            SampleType::I16 => 3,
            SampleType::F32 => 4,
            SampleType::U10 => 5,
            SampleType::U12 => 6,
            SampleType::U14 => 7,
        }
    }

    fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => SampleType::U8,
            1 => SampleType::U16,
            2 => SampleType::I8,
            3 => SampleType::I16,
            4 => SampleType::F32,
            5 => SampleType::U10,
            6 => SampleType::U12,
            7 => SampleType::U14,
            _ => return None,
        })
    }
}

/// Fixed-size header in front of every frame record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Header plus payload.
    pub bytes_of_frame: u64,
    /// Per-stream sequence number.
    pub frame_id: u64,
    /// Frame number assigned by the camera.
    pub hardware_frame_id: u64,
    /// Nanoseconds since the stream started.
    pub timestamp_ns: u64,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel encoding.
    pub sample_type: SampleType,
}

impl FrameHeader {
    /// Payload size implied by `bytes_of_frame`.
    pub fn payload_len(&self) -> usize {
        (self.bytes_of_frame as usize).saturating_sub(HEADER_SIZE)
    }

    /// Header followed by `payload`, with `bytes_of_frame` filled in.
    pub fn encode(mut self, payload: &[u8]) -> Bytes {
        self.bytes_of_frame = (HEADER_SIZE + payload.len()) as u64;
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        buf.put_u64_le(self.bytes_of_frame);
        buf.put_u64_le(self.frame_id);
        buf.put_u64_le(self.hardware_frame_id);
        buf.put_u64_le(self.timestamp_ns);
        buf.put_u32_le(self.width);
        buf.put_u32_le(self.height);
        buf.put_u32_le(self.sample_type.code());
        buf.put_u32_le(0);
        buf.put_slice(payload);
        buf.freeze()
    }

    /// Read a header from the front of `raw`.
    pub fn decode(mut raw: &[u8]) -> Result<Self, DriverError> {
        if raw.len() < HEADER_SIZE {
            return Err(malformed(format!(
                "frame header needs {} bytes, {} available",
                HEADER_SIZE,
                raw.len()
            )));
        }
        let bytes_of_frame = raw.get_u64_le();
        let frame_id = raw.get_u64_le();
        let hardware_frame_id = raw.get_u64_le();
        let timestamp_ns = raw.get_u64_le();
        let width = raw.get_u32_le();
        let height = raw.get_u32_le();
        let code = raw.get_u32_le();
        let sample_type = SampleType::from_code(code)
            .ok_or_else(|| malformed(format!("unknown sample type code {}", code)))?;

        Ok(Self {
            bytes_of_frame,
            frame_id,
            hardware_frame_id,
            timestamp_ns,
            width,
            height,
            sample_type,
        })
    }
}

fn malformed(message: String) -> DriverError {
    DriverError::new(DRIVER_TYPE, DriverErrorKind::Hardware, message)
}

/// One record inside a mapped span.
#[derive(Debug, Clone, Copy)]
pub struct FrameRecord<'a> {
    /// Decoded header.
    pub header: FrameHeader,
    payload: &'a [u8],
}

impl<'a> FrameRecord<'a> {
    /// Parse the record at the start of `raw`.
    pub fn parse(raw: &'a [u8]) -> Result<Self, DriverError> {
        let header = FrameHeader::decode(raw)?;
        let total = header.bytes_of_frame as usize;
        if total < HEADER_SIZE || total > raw.len() {
            return Err(malformed(format!(
                "frame record claims {} bytes, span holds {}",
                total,
                raw.len()
            )));
        }
        Ok(Self {
            header,
            payload: &raw[HEADER_SIZE..HEADER_SIZE + header.payload_len()],
        })
    }

    /// Pixel bytes of this frame.
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Header plus payload, the step to the next record.
    pub fn total_len(&self) -> usize {
        self.header.bytes_of_frame as usize
    }
}

/// Read-only view of the frames ready on one stream, `[begin, end)` of the
/// producer's ring.
///
/// The region owns a cheap snapshot of the span; the source still counts the
/// bytes as in use until they are released with `unmap_read`.
#[derive(Debug, Clone)]
pub struct MappedRegion {
    stream: StreamId,
    span: Bytes,
}

impl MappedRegion {
    /// Region over `span` on `stream`.
    pub fn new(stream: StreamId, span: Bytes) -> Self {
        Self { stream, span }
    }

    /// Stream the span was mapped from.
    pub fn stream(&self) -> StreamId {
        self.stream
    }

    /// `end - begin` in bytes.
    pub fn len(&self) -> usize {
        self.span.len()
    }

    /// Whether no frame is ready.
    pub fn is_empty(&self) -> bool {
        self.span.is_empty()
    }

    /// Raw span bytes, records back to back.
    pub fn as_bytes(&self) -> &[u8] {
        &self.span
    }

    /// First record of the span; `None` when the span is empty.
    pub fn first(&self) -> Result<Option<FrameRecord<'_>>, DriverError> {
        if self.span.is_empty() {
            return Ok(None);
        }
        FrameRecord::parse(&self.span).map(Some)
    }

    /// Walk the span record by record, stepping by each `bytes_of_frame`.
    pub fn frames(&self) -> FrameIter<'_> {
        FrameIter {
            rest: &self.span,
        }
    }
}

/// Iterator over the records of a span. Stops at the first malformed record.
pub struct FrameIter<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = Result<FrameRecord<'a>, DriverError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        match FrameRecord::parse(self.rest) {
            Ok(record) => {
                self.rest = &self.rest[record.total_len()..];
                Some(Ok(record))
            }
            Err(e) => {
                self.rest = &[];
                Some(Err(e))
            }
        }
    }
}
