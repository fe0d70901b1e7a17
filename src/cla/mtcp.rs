// SPDX-License-Identifier: Apache-2.0 OR MIT

//! MTCP / S-MTCP / USB-MTCP framer: CBOR byte-string framing (§4.F).
//!
//! S-MTCP and USB-MTCP share this exact framer; they differ only in how the
//! manager multiplexes links (S-MTCP keeps a single link per instance,
//! USB-MTCP drives `io` through a USB byte-queue adapter rather than a TCP
//! socket) and in how bytes reach [`super::Framer::forward_to_specific_parser`].

use super::cbor::{decode_byte_string_header, encode_byte_string_header};
use super::{Framer, FramerProgress};
use crate::error::{FramerError, LinkIoError};
use std::io::Write;

/// MTCP places no upper bound on serialized bundle size (`mtcp_mbs_get`
/// returns `SIZE_MAX` in the source).
const UNBOUNDED_MBS: usize = usize::MAX;

/// Framer state for one MTCP (or S-MTCP/USB-MTCP) link.
///
/// RX holds no state between calls beyond what's needed to report a decode
/// error as "skip one byte and resynchronize", matching
/// `mtcp_parser_parse`'s behavior on an invalid header.
#[derive(Debug, Default)]
pub struct MtcpFramer;

impl MtcpFramer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Framer for MtcpFramer {
    fn forward_to_specific_parser(&mut self, bytes: &[u8]) -> Result<FramerProgress, FramerError> {
        match decode_byte_string_header(bytes) {
            Ok(Some((length, header_len))) => {
                Ok(FramerProgress::PayloadStarts { consumed: header_len, length: length as usize })
            }
            Ok(None) => Ok(FramerProgress::Consumed(0)),
            Err(e) => Err(e),
        }
    }

    fn reset_parsers(&mut self) {}

    fn begin_packet(&mut self, io: &mut dyn std::io::Write, length: usize) -> Result<(), LinkIoError> {
        let mut header = [0u8; 9];
        let header_len = encode_byte_string_header(length as u64, &mut header);
        io.write_all(&header[..header_len])?;
        Ok(())
    }

    fn send_packet_data(&mut self, io: &mut dyn std::io::Write, bytes: &[u8]) -> Result<(), LinkIoError> {
        io.write_all(bytes)?;
        Ok(())
    }

    fn end_packet(&mut self, _io: &mut dyn std::io::Write) -> Result<(), LinkIoError> {
        Ok(())
    }

    fn mbs(&self) -> usize {
        UNBOUNDED_MBS
    }
}
