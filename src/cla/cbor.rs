// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Minimal CBOR unsigned-integer header codec, just enough to frame MTCP /
//! S-MTCP / USB-MTCP byte strings (§4.F).
//!
//! A CBOR byte-string header shares its length encoding with the unsigned
//! integer major type (RFC 7049 §2.1): encode the length as a CBOR uint, then
//! OR `0x40` into the first byte to rewrite its major type from 0 (uint) to 2
//! (byte string) — the additional-info bits are untouched by that OR because
//! an unsigned integer's leading 3 bits are always zero.

use crate::error::FramerError;

const MAJOR_TYPE_BYTE_STRING: u8 = 0x40;

const ADDITIONAL_INFO_1: u8 = 24;
const ADDITIONAL_INFO_2: u8 = 25;
const ADDITIONAL_INFO_4: u8 = 26;
const ADDITIONAL_INFO_8: u8 = 27;

/// Encode `length` as a CBOR byte-string header into `out`. `out` must be at
/// least 9 bytes, matching the source's `ASSERT(buffer_size >= 9)`. Returns
/// the number of bytes written.
pub fn encode_byte_string_header(length: u64, out: &mut [u8; 9]) -> usize {
    if length < u64::from(ADDITIONAL_INFO_1) {
        out[0] = MAJOR_TYPE_BYTE_STRING | length as u8;
        1
    } else if length <= u64::from(u8::MAX) {
        out[0] = MAJOR_TYPE_BYTE_STRING | ADDITIONAL_INFO_1;
        out[1] = length as u8;
        2
    } else if length <= u64::from(u16::MAX) {
        out[0] = MAJOR_TYPE_BYTE_STRING | ADDITIONAL_INFO_2;
        out[1..3].copy_from_slice(&(length as u16).to_be_bytes());
        3
    } else if length <= u64::from(u32::MAX) {
        out[0] = MAJOR_TYPE_BYTE_STRING | ADDITIONAL_INFO_4;
        out[1..5].copy_from_slice(&(length as u32).to_be_bytes());
        5
    } else {
        out[0] = MAJOR_TYPE_BYTE_STRING | ADDITIONAL_INFO_8;
        out[1..9].copy_from_slice(&length.to_be_bytes());
        9
    }
}

/// Decode a CBOR byte-string header from the front of `bytes`.
///
/// Returns `Ok(Some((payload_length, header_len)))` once enough bytes are
/// present, `Ok(None)` if `bytes` is a valid-so-far but incomplete header (the
/// caller should wait for more input, mirroring `mtcp_parser_parse`'s "return
/// 0, we need more data" path), or `Err` if the first byte cannot begin a
/// byte-string header at all.
pub fn decode_byte_string_header(bytes: &[u8]) -> Result<Option<(u64, usize)>, FramerError> {
    let Some(&byte0) = bytes.first() else {
        return Ok(None);
    };
    if byte0 & 0xe0 != MAJOR_TYPE_BYTE_STRING {
        return Err(FramerError::InvalidCborHeader);
    }
    let additional_info = byte0 & 0x1f;

    match additional_info {
        n if n < ADDITIONAL_INFO_1 => Ok(Some((u64::from(n), 1))),
        ADDITIONAL_INFO_1 => read_be(bytes, 1, 1).map(|v| v.map(|(v, n)| (v, n + 1))),
        ADDITIONAL_INFO_2 => read_be(bytes, 1, 2).map(|v| v.map(|(v, n)| (v, n + 1))),
        ADDITIONAL_INFO_4 => read_be(bytes, 1, 4).map(|v| v.map(|(v, n)| (v, n + 1))),
        ADDITIONAL_INFO_8 => read_be(bytes, 1, 8).map(|v| v.map(|(v, n)| (v, n + 1))),
        _ => Err(FramerError::InvalidCborHeader),
    }
}

fn read_be(bytes: &[u8], offset: usize, width: usize) -> Result<Option<(u64, usize)>, FramerError> {
    if bytes.len() < offset + width {
        return Ok(None);
    }
    let mut buf = [0u8; 8];
    buf[8 - width..].copy_from_slice(&bytes[offset..offset + width]);
    Ok(Some((u64::from_be_bytes(buf), width)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_lengths_fit_in_the_first_byte() {
        let mut buf = [0u8; 9];
        assert_eq!(encode_byte_string_header(5, &mut buf), 1);
        assert_eq!(buf[0], 0x45);
        assert_eq!(decode_byte_string_header(&buf).unwrap(), Some((5, 1)));
    }

    #[test]
    fn matches_spec_mtcp_scenario() {
        let mut buf = [0u8; 9];
        let len = encode_byte_string_header(260, &mut buf);
        assert_eq!(&buf[..len], &[0x59, 0x01, 0x04]);
        assert_eq!(decode_byte_string_header(&buf[..len]).unwrap(), Some((260, 3)));
    }

    #[test]
    fn incomplete_header_requests_more_bytes() {
        let mut buf = [0u8; 9];
        let len = encode_byte_string_header(260, &mut buf);
        assert_eq!(decode_byte_string_header(&buf[..len - 1]).unwrap(), None);
    }

    #[test]
    fn non_byte_string_major_type_is_rejected() {
        assert_eq!(decode_byte_string_header(&[0x05]).unwrap_err(), FramerError::InvalidCborHeader);
    }

    #[test]
    fn round_trips_every_width_boundary() {
        for length in [0u64, 23, 24, 255, 256, 65535, 65536, u32::MAX as u64, u32::MAX as u64 + 1] {
            let mut buf = [0u8; 9];
            let len = encode_byte_string_header(length, &mut buf);
            assert_eq!(decode_byte_string_header(&buf[..len]).unwrap(), Some((length, len)));
        }
    }
}
