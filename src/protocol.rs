//! Wire format for the blast transfer protocol.
//!
//! Every datagram is one frame: a single tag byte followed by a fixed
//! little-endian layout per variant. Integers are little-endian on the wire
//! regardless of host byte order; strings are fixed-width zero-padded byte
//! arrays with a guaranteed NUL in the last position.
//!
//! ```text
//! tag 1  FILE_HDR       u64 file_size | u16 record_size | u32 blast_size | [u8; 256] filename
//! tag 2  FILE_HDR_ACK   —
//! tag 3  DATA           u8 n | n × (u32 start, u32 end) | record bytes
//! tag 4  IS_BLAST_OVER  u32 start | u32 end
//! tag 5  REC_MISS       u16 n | n × (u32 start, u32 end)
//! tag 6  DISCONNECT     —
//! ```
//!
//! No I/O happens here — this is pure data transformation.

use std::fmt;
use std::time::Duration;

// ── Protocol constants ─────────────────────────────────────────────────────

/// Safe UDP payload size; every encoded frame must fit.
pub const MAX_DATAGRAM: usize = 65_000;

/// Maximum records carried by a single DATA frame.
pub const MAX_RECORDS_PER_FRAME: u32 = 16;

/// Maximum segments enumerated by a single REC_MISS frame.
pub const MAX_MISSING_SEGMENTS: usize = 1_000;

/// Fixed width of the filename field, final byte reserved as NUL.
pub const FILENAME_FIELD: usize = 256;

/// Default record size in bytes.
pub const DEFAULT_RECORD_SIZE: u16 = 512;

/// Default blast size in records.
pub const DEFAULT_BLAST_SIZE: u32 = 1_000;

/// How long the sender waits for FILE_HDR_ACK per attempt.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// How long the sender waits for REC_MISS per attempt.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Consecutive timeouts tolerated on either wait before giving up.
pub const MAX_RETRIES: u32 = 5;

/// Post-completion window during which the receiver keeps answering
/// IS_BLAST_OVER queries.
pub const LINGER_TIME: Duration = Duration::from_secs(5);

/// Receive poll interval used by the receiver while streaming and lingering.
pub const RECV_POLL: Duration = Duration::from_secs(1);

pub const TAG_FILE_HDR: u8 = 1;
pub const TAG_FILE_HDR_ACK: u8 = 2;
pub const TAG_DATA: u8 = 3;
pub const TAG_IS_BLAST_OVER: u8 = 4;
pub const TAG_REC_MISS: u8 = 5;
pub const TAG_DISCONNECT: u8 = 6;

/// Total records for a file: `⌈file_size / record_size⌉`.
pub fn record_count(file_size: u64, record_size: u16) -> u32 {
    let rs = record_size as u64;
    ((file_size + rs - 1) / rs) as u32
}

/// Records that fit in one DATA frame for the given record size: the protocol
/// cap of 16, tightened if the datagram budget demands it.
pub fn records_per_frame(record_size: u16) -> u32 {
    let budget = MAX_DATAGRAM - 2 - MAX_RECORDS_PER_FRAME as usize * 8;
    MAX_RECORDS_PER_FRAME.min((budget / record_size as usize) as u32)
}

// ── Frame types ────────────────────────────────────────────────────────────

/// An inclusive range of record indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: u32,
    pub end: u32,
}

impl Segment {
    pub fn new(start: u32, end: u32) -> Self {
        debug_assert!(start <= end);
        Segment { start, end }
    }

    /// Number of records covered.
    pub fn len(&self) -> u32 {
        self.end - self.start + 1
    }
}

/// Transfer parameters announced by the sender before any data flows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHdr {
    pub file_size: u64,
    pub record_size: u16,
    pub blast_size: u32,
    pub filename: String,
}

impl FileHdr {
    pub fn total_records(&self) -> u32 {
        record_count(self.file_size, self.record_size)
    }
}

/// A DATA frame: segment descriptors followed by their record bytes.
///
/// The payload holds exactly `R` bytes per covered record, in segment order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub segments: Vec<Segment>,
    pub payload: Vec<u8>,
}

/// One protocol datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    FileHdr(FileHdr),
    FileHdrAck,
    Data(DataFrame),
    IsBlastOver { start: u32, end: u32 },
    RecMiss(Vec<Segment>),
    Disconnect,
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Declared counts would read past the end of the buffer.
    Truncated,
    /// Leading tag byte is not one of the six known variants.
    UnknownTag(u8),
    /// DATA trailing bytes are not a whole multiple of the record size.
    MisalignedPayload,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated => write!(f, "truncated frame"),
            DecodeError::UnknownTag(t) => write!(f, "unknown frame tag {}", t),
            DecodeError::MisalignedPayload => write!(f, "misaligned data payload"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl Frame {
    /// Serialise this frame into a newly allocated byte vector.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Frame::FileHdr(hdr) => {
                let mut buf = Vec::with_capacity(1 + 8 + 2 + 4 + FILENAME_FIELD);
                buf.push(TAG_FILE_HDR);
                buf.extend_from_slice(&hdr.file_size.to_le_bytes());
                buf.extend_from_slice(&hdr.record_size.to_le_bytes());
                buf.extend_from_slice(&hdr.blast_size.to_le_bytes());
                let mut name = [0u8; FILENAME_FIELD];
                let bytes = hdr.filename.as_bytes();
                let n = bytes.len().min(FILENAME_FIELD - 1);
                name[..n].copy_from_slice(&bytes[..n]);
                buf.extend_from_slice(&name);
                buf
            }
            Frame::FileHdrAck => vec![TAG_FILE_HDR_ACK],
            Frame::Data(data) => {
                debug_assert!(data.segments.len() <= MAX_RECORDS_PER_FRAME as usize);
                let mut buf = Vec::with_capacity(2 + data.segments.len() * 8 + data.payload.len());
                buf.push(TAG_DATA);
                buf.push(data.segments.len() as u8);
                for seg in &data.segments {
                    buf.extend_from_slice(&seg.start.to_le_bytes());
                    buf.extend_from_slice(&seg.end.to_le_bytes());
                }
                buf.extend_from_slice(&data.payload);
                debug_assert!(buf.len() <= MAX_DATAGRAM);
                buf
            }
            Frame::IsBlastOver { start, end } => {
                let mut buf = Vec::with_capacity(9);
                buf.push(TAG_IS_BLAST_OVER);
                buf.extend_from_slice(&start.to_le_bytes());
                buf.extend_from_slice(&end.to_le_bytes());
                buf
            }
            Frame::RecMiss(missing) => {
                debug_assert!(missing.len() <= MAX_MISSING_SEGMENTS);
                let mut buf = Vec::with_capacity(3 + missing.len() * 8);
                buf.push(TAG_REC_MISS);
                buf.extend_from_slice(&(missing.len() as u16).to_le_bytes());
                for seg in missing {
                    buf.extend_from_slice(&seg.start.to_le_bytes());
                    buf.extend_from_slice(&seg.end.to_le_bytes());
                }
                buf
            }
            Frame::Disconnect => vec![TAG_DISCONNECT],
        }
    }

    /// Parse a frame from a raw datagram.
    ///
    /// `record_size` is needed to validate DATA payload alignment; before the
    /// handshake a receiver passes 0 and DATA frames are rejected.
    pub fn decode(buf: &[u8], record_size: u16) -> Result<Frame, DecodeError> {
        let (&tag, rest) = buf.split_first().ok_or(DecodeError::Truncated)?;
        match tag {
            TAG_FILE_HDR => {
                if rest.len() < 8 + 2 + 4 + FILENAME_FIELD {
                    return Err(DecodeError::Truncated);
                }
                let file_size = u64::from_le_bytes(rest[0..8].try_into().unwrap());
                let record_size = u16::from_le_bytes(rest[8..10].try_into().unwrap());
                let blast_size = u32::from_le_bytes(rest[10..14].try_into().unwrap());
                let name = &rest[14..14 + FILENAME_FIELD];
                let len = name.iter().position(|&b| b == 0).unwrap_or(FILENAME_FIELD - 1);
                let filename = String::from_utf8_lossy(&name[..len]).into_owned();
                Ok(Frame::FileHdr(FileHdr {
                    file_size,
                    record_size,
                    blast_size,
                    filename,
                }))
            }
            TAG_FILE_HDR_ACK => Ok(Frame::FileHdrAck),
            TAG_DATA => {
                let (&n, rest) = rest.split_first().ok_or(DecodeError::Truncated)?;
                let table = n as usize * 8;
                if rest.len() < table {
                    return Err(DecodeError::Truncated);
                }
                let mut segments = Vec::with_capacity(n as usize);
                let mut records: u64 = 0;
                for chunk in rest[..table].chunks_exact(8) {
                    let start = u32::from_le_bytes(chunk[0..4].try_into().unwrap());
                    let end = u32::from_le_bytes(chunk[4..8].try_into().unwrap());
                    if start == 0 || start > end {
                        // an unsatisfiable descriptor can never match the payload
                        return Err(DecodeError::Truncated);
                    }
                    records += (end - start + 1) as u64;
                    segments.push(Segment { start, end });
                }
                let payload = &rest[table..];
                if record_size == 0 || payload.len() % record_size as usize != 0 {
                    return Err(DecodeError::MisalignedPayload);
                }
                if payload.len() as u64 != records * record_size as u64 {
                    return Err(DecodeError::Truncated);
                }
                Ok(Frame::Data(DataFrame {
                    segments,
                    payload: payload.to_vec(),
                }))
            }
            TAG_IS_BLAST_OVER => {
                if rest.len() < 8 {
                    return Err(DecodeError::Truncated);
                }
                let start = u32::from_le_bytes(rest[0..4].try_into().unwrap());
                let end = u32::from_le_bytes(rest[4..8].try_into().unwrap());
                Ok(Frame::IsBlastOver { start, end })
            }
            TAG_REC_MISS => {
                if rest.len() < 2 {
                    return Err(DecodeError::Truncated);
                }
                let n = u16::from_le_bytes(rest[0..2].try_into().unwrap()) as usize;
                let table = &rest[2..];
                if table.len() < n * 8 {
                    return Err(DecodeError::Truncated);
                }
                let mut missing = Vec::with_capacity(n);
                for chunk in table[..n * 8].chunks_exact(8) {
                    let start = u32::from_le_bytes(chunk[0..4].try_into().unwrap());
                    let end = u32::from_le_bytes(chunk[4..8].try_into().unwrap());
                    missing.push(Segment { start, end });
                }
                Ok(Frame::RecMiss(missing))
            }
            TAG_DISCONNECT => Ok(Frame::Disconnect),
            other => Err(DecodeError::UnknownTag(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_file_hdr() {
        let frame = Frame::FileHdr(FileHdr {
            file_size: 1_234_567,
            record_size: 512,
            blast_size: 1000,
            filename: "report.pdf".into(),
        });
        let bytes = frame.encode();
        assert_eq!(bytes.len(), 1 + 8 + 2 + 4 + FILENAME_FIELD);
        assert_eq!(Frame::decode(&bytes, 512).unwrap(), frame);
    }

    #[test]
    fn file_hdr_layout_is_little_endian() {
        let bytes = Frame::FileHdr(FileHdr {
            file_size: 0x0102_0304_0506_0708,
            record_size: 0x0A0B,
            blast_size: 0x0C0D_0E0F,
            filename: String::new(),
        })
        .encode();
        assert_eq!(bytes[0], TAG_FILE_HDR);
        assert_eq!(&bytes[1..9], &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[9..11], &[0x0B, 0x0A]);
        assert_eq!(&bytes[11..15], &[0x0F, 0x0E, 0x0D, 0x0C]);
    }

    #[test]
    fn file_hdr_name_is_truncated_and_terminated() {
        let long = "x".repeat(400);
        let bytes = Frame::FileHdr(FileHdr {
            file_size: 1,
            record_size: 256,
            blast_size: 200,
            filename: long,
        })
        .encode();
        // last byte of the field is always NUL
        assert_eq!(bytes[bytes.len() - 1], 0);
        match Frame::decode(&bytes, 256).unwrap() {
            Frame::FileHdr(hdr) => assert_eq!(hdr.filename.len(), FILENAME_FIELD - 1),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn roundtrip_singleton_frames() {
        for frame in [Frame::FileHdrAck, Frame::Disconnect] {
            let bytes = frame.encode();
            assert_eq!(bytes.len(), 1);
            assert_eq!(Frame::decode(&bytes, 512).unwrap(), frame);
        }
    }

    #[test]
    fn roundtrip_data() {
        let payload = vec![7u8; 3 * 256];
        let frame = Frame::Data(DataFrame {
            segments: vec![Segment::new(5, 6), Segment::new(9, 9)],
            payload,
        });
        let bytes = frame.encode();
        assert_eq!(Frame::decode(&bytes, 256).unwrap(), frame);
    }

    #[test]
    fn roundtrip_is_blast_over() {
        let frame = Frame::IsBlastOver { start: 1001, end: 2000 };
        assert_eq!(Frame::decode(&frame.encode(), 512).unwrap(), frame);
    }

    #[test]
    fn roundtrip_rec_miss() {
        for missing in [vec![], vec![Segment::new(3, 3)], vec![Segment::new(1, 2), Segment::new(8, 20)]] {
            let frame = Frame::RecMiss(missing);
            assert_eq!(Frame::decode(&frame.encode(), 512).unwrap(), frame);
        }
    }

    #[test]
    fn reject_unknown_tag() {
        assert_eq!(Frame::decode(&[9, 0, 0], 512), Err(DecodeError::UnknownTag(9)));
    }

    #[test]
    fn reject_empty_buffer() {
        assert_eq!(Frame::decode(&[], 512), Err(DecodeError::Truncated));
    }

    #[test]
    fn reject_truncated_data_segment_table() {
        // declares 2 segments but carries only one descriptor
        let mut bytes = vec![TAG_DATA, 2];
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        assert_eq!(Frame::decode(&bytes, 512), Err(DecodeError::Truncated));
    }

    #[test]
    fn reject_data_payload_shorter_than_segments_demand() {
        let frame = Frame::Data(DataFrame {
            segments: vec![Segment::new(1, 4)],
            payload: vec![0u8; 2 * 512],
        });
        assert_eq!(Frame::decode(&frame.encode(), 512), Err(DecodeError::Truncated));
    }

    #[test]
    fn reject_misaligned_data_payload() {
        let mut bytes = vec![TAG_DATA, 1];
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 100]); // not a multiple of 512
        assert_eq!(Frame::decode(&bytes, 512), Err(DecodeError::MisalignedPayload));
    }

    #[test]
    fn reject_truncated_rec_miss() {
        let mut bytes = vec![TAG_REC_MISS];
        bytes.extend_from_slice(&3u16.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 8]); // room for one segment, not three
        assert_eq!(Frame::decode(&bytes, 512), Err(DecodeError::Truncated));
    }

    #[test]
    fn record_count_rounds_up() {
        assert_eq!(record_count(100, 512), 1);
        assert_eq!(record_count(2048, 512), 4);
        assert_eq!(record_count(2049, 512), 5);
        assert_eq!(record_count(0, 512), 0);
    }

    #[test]
    fn sixteen_records_always_fit() {
        for rs in [256, 512, 1024] {
            assert_eq!(records_per_frame(rs), MAX_RECORDS_PER_FRAME);
            let frame_len = 2 + 16 * 8 + 16 * rs as usize;
            assert!(frame_len <= MAX_DATAGRAM);
        }
    }
}
