// SPDX-License-Identifier: Apache-2.0 OR MIT

//! CCSDS Space Packet Protocol (SPP) primary header codec (§4.E).
//!
//! ```text
//! P1_MSB -> P1_LSB -> P2_MSB -> P2_LSB -> LEN_MSB -> LEN_LSB ->
//! [SH_TIMECODE]? -> [SH_ANCILLARY]? -> DATA
//! ```

use crate::spp::timecode::{self, TimecodeContext};
use std::fmt;

pub const MAX_APID: u16 = 0x7ff;
pub const MAX_SEGMENT_NUMBER: u16 = 0x3fff;
pub const MAX_DATA_LENGTH: usize = 65536;
pub const PRIMARY_HEADER_SIZE: usize = 6;

const P1_TYPE_MASK: u16 = 0x1000;
const P1_SECONDARY_HEADER_FLAG_MASK: u16 = 0x0800;
const P1_APID_MASK: u16 = 0x07ff;
const P2_SEQUENCE_FLAGS_SHIFT: u16 = 14;
const P2_SEQUENCE_CNT_MASK: u16 = 0x3fff;

/// Segment status carried in primary-header field 2, bits 15-14.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentStatus {
    Continuation,
    First,
    Last,
    Unsegmented,
}

impl SegmentStatus {
    fn from_bits(bits: u16) -> Self {
        match bits {
            0 => Self::Continuation,
            1 => Self::First,
            2 => Self::Last,
            _ => Self::Unsegmented,
        }
    }

    fn to_bits(self) -> u16 {
        match self {
            Self::Continuation => 0,
            Self::First => 1,
            Self::Last => 2,
            Self::Unsegmented => 3,
        }
    }
}

/// Packet-level metadata a caller supplies to serialize a primary header, or
/// receives back after parsing one (§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Meta {
    pub is_request: bool,
    pub apid: u16,
    pub segment_status: SegmentStatus,
    pub segment_number: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SppError {
    ApidOutOfRange(u16),
    SegmentNumberOutOfRange(u16),
    DataLengthOutOfRange(usize),
    Truncated,
    Timecode(timecode::TimecodeError),
}

impl fmt::Display for SppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApidOutOfRange(v) => write!(f, "APID 0x{v:x} exceeds 0x{MAX_APID:x}"),
            Self::SegmentNumberOutOfRange(v) => {
                write!(f, "segment number 0x{v:x} exceeds 0x{MAX_SEGMENT_NUMBER:x}")
            }
            Self::DataLengthOutOfRange(v) => write!(f, "data length {v} exceeds {MAX_DATA_LENGTH}"),
            Self::Truncated => write!(f, "SPP header truncated"),
            Self::Timecode(e) => write!(f, "SPP timecode error: {e}"),
        }
    }
}

impl std::error::Error for SppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Timecode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<timecode::TimecodeError> for SppError {
    fn from(e: timecode::TimecodeError) -> Self {
        Self::Timecode(e)
    }
}

/// Static per-link SPP configuration: optional ancillary-data length and
/// optional timecode secondary header (§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Context {
    pub ancillary_data_len: usize,
    pub timecode: Option<TimecodeContext>,
}

impl Context {
    fn has_secondary_header(&self) -> bool {
        self.ancillary_data_len > 0 || self.timecode.is_some()
    }

    fn secondary_header_len(&self) -> usize {
        self.ancillary_data_len + self.timecode.map_or(0, |tc| tc.size())
    }

    /// Total frame size for a payload of `payload_len` bytes.
    #[must_use]
    pub fn size(&self, payload_len: usize) -> usize {
        PRIMARY_HEADER_SIZE + self.secondary_header_len() + payload_len
    }

    /// Smallest legal payload length; `0` if any secondary header is present.
    #[must_use]
    pub fn min_payload_size(&self) -> usize {
        if self.has_secondary_header() {
            0
        } else {
            1
        }
    }

    /// Largest payload length the 16-bit data-length field can still encode.
    #[must_use]
    pub fn max_payload_size(&self) -> usize {
        MAX_DATA_LENGTH - self.secondary_header_len()
    }

    /// Serialize a full SPP frame: primary header, timecode (if configured),
    /// then `payload`. Ancillary-data bytes, if configured, are the caller's
    /// responsibility to append between the timecode and `payload`.
    ///
    /// # Errors
    ///
    /// Returns `SppError` if `meta` or `payload.len()` cannot be represented.
    pub fn serialize(
        &self,
        meta: Meta,
        timestamp: u64,
        counter: u32,
        payload: &[u8],
    ) -> Result<Vec<u8>, SppError> {
        let mut out = self.serialize_prefix(meta, timestamp, counter, payload.len())?;
        out.extend_from_slice(payload);
        Ok(out)
    }

    /// Serialize the primary header and (if configured) the timecode
    /// secondary header for a payload that will be `payload_len` bytes,
    /// without requiring the payload itself yet.
    ///
    /// Used by CLAs that hand a TX frame to the wire in multiple writes
    /// (e.g. TCPSPP's `begin_packet`/`send_packet_data` split).
    ///
    /// # Errors
    ///
    /// Returns `SppError` if `meta` or `payload_len` cannot be represented.
    pub fn serialize_prefix(
        &self,
        meta: Meta,
        timestamp: u64,
        counter: u32,
        payload_len: usize,
    ) -> Result<Vec<u8>, SppError> {
        let data_length = self.secondary_header_len() + payload_len;
        let mut out = Vec::with_capacity(PRIMARY_HEADER_SIZE + self.secondary_header_len());
        serialize_primary_header(meta, self.has_secondary_header(), data_length, &mut out)?;
        if let Some(tc) = self.timecode {
            out.extend_from_slice(&timecode::serialize(&tc, timestamp, counter));
        }
        Ok(out)
    }
}

fn serialize_primary_header(
    meta: Meta,
    has_secondary_header: bool,
    data_length: usize,
    out: &mut Vec<u8>,
) -> Result<(), SppError> {
    if meta.apid > MAX_APID {
        return Err(SppError::ApidOutOfRange(meta.apid));
    }
    if meta.segment_number > MAX_SEGMENT_NUMBER {
        return Err(SppError::SegmentNumberOutOfRange(meta.segment_number));
    }
    if data_length == 0 || data_length > MAX_DATA_LENGTH {
        return Err(SppError::DataLengthOutOfRange(data_length));
    }

    let mut part1 = meta.apid & P1_APID_MASK;
    if meta.is_request {
        part1 |= P1_TYPE_MASK;
    }
    if has_secondary_header {
        part1 |= P1_SECONDARY_HEADER_FLAG_MASK;
    }

    let part2 = (meta.segment_status.to_bits() << P2_SEQUENCE_FLAGS_SHIFT)
        | (meta.segment_number & P2_SEQUENCE_CNT_MASK);
    let len = (data_length - 1) as u16;

    out.extend_from_slice(&part1.to_be_bytes());
    out.extend_from_slice(&part2.to_be_bytes());
    out.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

/// Parse a 6-byte primary header. Returns the metadata and `data_length`
/// (the number of bytes, including any secondary header, that follow).
///
/// # Errors
///
/// Returns `SppError::Truncated` if `bytes.len() < PRIMARY_HEADER_SIZE`.
pub fn parse_primary_header(bytes: &[u8]) -> Result<(Meta, usize), SppError> {
    if bytes.len() < PRIMARY_HEADER_SIZE {
        return Err(SppError::Truncated);
    }
    let part1 = u16::from_be_bytes([bytes[0], bytes[1]]);
    let part2 = u16::from_be_bytes([bytes[2], bytes[3]]);
    let len = u16::from_be_bytes([bytes[4], bytes[5]]);

    let meta = Meta {
        is_request: part1 & P1_TYPE_MASK != 0,
        apid: part1 & P1_APID_MASK,
        segment_status: SegmentStatus::from_bits(part2 >> P2_SEQUENCE_FLAGS_SHIFT),
        segment_number: part2 & P2_SEQUENCE_CNT_MASK,
    };
    let data_length = usize::from(len) + 1;
    Ok((meta, data_length))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spp::timecode::UnsegmentedConfig;

    #[test]
    fn header_round_trip_matches_spec_scenario() {
        let meta = Meta {
            is_request: true,
            apid: 0x123,
            segment_status: SegmentStatus::First,
            segment_number: 0x2342,
        };
        let ctx = Context::default();
        let wire = ctx.serialize(meta, 0, 0, &[0xaa, 0xbb]).unwrap();
        assert_eq!(wire, vec![0x11, 0x23, 0x63, 0x42, 0x00, 0x01, 0xaa, 0xbb]);

        let (parsed, data_length) = parse_primary_header(&wire[..PRIMARY_HEADER_SIZE]).unwrap();
        assert_eq!(parsed, meta);
        assert_eq!(data_length, 2);
    }

    #[test]
    fn apid_out_of_range_is_rejected() {
        let meta = Meta {
            is_request: false,
            apid: MAX_APID + 1,
            segment_status: SegmentStatus::Unsegmented,
            segment_number: 0,
        };
        let ctx = Context::default();
        assert_eq!(
            ctx.serialize(meta, 0, 0, &[0]).unwrap_err(),
            SppError::ApidOutOfRange(MAX_APID + 1)
        );
    }

    #[test]
    fn min_payload_size_is_zero_with_secondary_header() {
        let with_timecode = Context {
            ancillary_data_len: 0,
            timecode: Some(TimecodeContext {
                with_p_field: false,
                config: UnsegmentedConfig { base_unit_octets: 4, fractional_octets: 4 },
            }),
        };
        assert_eq!(with_timecode.min_payload_size(), 0);
        assert_eq!(Context::default().min_payload_size(), 1);
    }

    #[test]
    fn unsegmented_timecode_round_trips_through_a_full_frame() {
        let ctx = Context {
            ancillary_data_len: 0,
            timecode: Some(TimecodeContext {
                with_p_field: false,
                config: UnsegmentedConfig { base_unit_octets: 4, fractional_octets: 4 },
            }),
        };
        let meta = Meta {
            is_request: false,
            apid: 0,
            segment_status: SegmentStatus::Unsegmented,
            segment_number: 0,
        };
        let wire = ctx.serialize(meta, 577_279_245, 0x000676AB, &[]).unwrap();
        assert_eq!(
            &wire[PRIMARY_HEADER_SIZE..],
            &[0x71, 0x68, 0x37, 0x0d, 0x00, 0x06, 0x76, 0xab]
        );
    }
}
