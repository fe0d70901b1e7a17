// SPDX-License-Identifier: Apache-2.0 OR MIT

//! TCPSPP framer: SPP primary header + optional timecode/ancillary + payload
//! + optional CRC-16 trailer (§4.F).
//!
//! The CRC, when enabled, covers the entire frame (headers and payload) and
//! is appended big-endian. On RX the source reads the trailer back but never
//! validates it (§9 design notes), and this framer does the same: the link
//! engine (§4.G) delivers payload bytes straight to the caller without
//! routing them back through the framer, so by the time the trailer bytes
//! reach [`TcpsppFramer::forward_to_specific_parser`] the payload is no
//! longer available to checksum against. Validating the trailer would need
//! the link engine itself to buffer and hand back the full frame, which is
//! out of scope for this CLA (§9's "SHOULD add validation" is noted here,
//! not implemented, for that reason).

use super::crc::crc16_ccitt_false;
use super::{Framer, FramerProgress};
use crate::error::{FramerError, LinkIoError};
use crate::spp::header::{
    parse_primary_header, Context as SppContext, Meta, SegmentStatus, MAX_SEGMENT_NUMBER,
    PRIMARY_HEADER_SIZE,
};
use std::io::Write;

const CRC_LEN: usize = 2;

/// Parsing stage for one TCPSPP link's RX stream.
///
/// The link engine (§4.G) collects exactly the `length` bytes reported by
/// `PayloadStarts` into the assembled payload itself, without calling
/// `forward_to_specific_parser` again until those bytes are consumed — so
/// this framer never needs to track the body itself. It only needs to
/// remember that the next call (made on whatever immediately follows the
/// payload) should discard the CRC trailer rather than be parsed as a new
/// primary header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    PrimaryHeader,
    /// `remaining` CRC trailer bytes still to be discarded before the next
    /// primary header may be parsed.
    AwaitingTrailer { remaining: usize },
}

/// Framer state for one TCPSPP link.
pub struct TcpsppFramer {
    ctx: SppContext,
    apid: u16,
    crc_enabled: bool,
    stage: Stage,
    /// Outgoing segment counter, wrapping at `MAX_SEGMENT_NUMBER` (§4.E).
    tx_segment_number: u16,
    /// Bytes written for the frame currently being transmitted: primary
    /// header and timecode are written eagerly in `begin_packet` (the total
    /// payload length is known then), payload bytes are appended by
    /// `send_packet_data`, and the CRC trailer (if enabled) covers all of it
    /// at `end_packet`.
    tx_frame: Vec<u8>,
}

impl TcpsppFramer {
    #[must_use]
    pub fn new(ctx: SppContext, apid: u16, crc_enabled: bool) -> Self {
        Self {
            ctx,
            apid,
            crc_enabled,
            stage: Stage::PrimaryHeader,
            tx_segment_number: 0,
            tx_frame: Vec::new(),
        }
    }

    fn next_tx_meta(&mut self) -> Meta {
        let segment_number = self.tx_segment_number;
        self.tx_segment_number = if self.tx_segment_number >= MAX_SEGMENT_NUMBER {
            0
        } else {
            self.tx_segment_number + 1
        };
        Meta { is_request: false, apid: self.apid, segment_status: SegmentStatus::Unsegmented, segment_number }
    }
}

impl Framer for TcpsppFramer {
    fn forward_to_specific_parser(&mut self, bytes: &[u8]) -> Result<FramerProgress, FramerError> {
        match self.stage {
            Stage::PrimaryHeader => {
                if bytes.len() < PRIMARY_HEADER_SIZE {
                    return Ok(FramerProgress::Consumed(0));
                }
                // Length already checked above, so this only fails on a logic error.
                let (_meta, data_length) = parse_primary_header(&bytes[..PRIMARY_HEADER_SIZE])
                    .expect("primary header length already validated");
                let trailer = if self.crc_enabled { CRC_LEN } else { 0 };
                self.stage = if trailer > 0 {
                    Stage::AwaitingTrailer { remaining: trailer }
                } else {
                    Stage::PrimaryHeader
                };
                Ok(FramerProgress::PayloadStarts { consumed: PRIMARY_HEADER_SIZE, length: data_length })
            }
            Stage::AwaitingTrailer { remaining } => {
                let consumed = remaining.min(bytes.len());
                self.stage = if consumed == remaining {
                    Stage::PrimaryHeader
                } else {
                    Stage::AwaitingTrailer { remaining: remaining - consumed }
                };
                Ok(FramerProgress::Consumed(consumed))
            }
        }
    }

    fn reset_parsers(&mut self) {
        self.stage = Stage::PrimaryHeader;
    }

    fn begin_packet(&mut self, _io: &mut dyn std::io::Write, length: usize) -> Result<(), LinkIoError> {
        let meta = self.next_tx_meta();
        self.tx_frame = self
            .ctx
            .serialize_prefix(meta, 0, 0, length)
            .map_err(|e| LinkIoError::from(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())))?;
        Ok(())
    }

    fn send_packet_data(&mut self, _io: &mut dyn std::io::Write, bytes: &[u8]) -> Result<(), LinkIoError> {
        self.tx_frame.extend_from_slice(bytes);
        Ok(())
    }

    fn end_packet(&mut self, io: &mut dyn std::io::Write) -> Result<(), LinkIoError> {
        io.write_all(&self.tx_frame)?;
        if self.crc_enabled {
            let crc = crc16_ccitt_false(&self.tx_frame);
            io.write_all(&crc.to_be_bytes())?;
        }
        self.tx_frame.clear();
        Ok(())
    }

    fn mbs(&self) -> usize {
        const MAX_SPP_DATA_LENGTH: usize = 1 << 16;
        MAX_SPP_DATA_LENGTH - PRIMARY_HEADER_SIZE
    }
}

/// Serialize an SPP frame the way `begin_packet`/`send_packet_data`/
/// `end_packet` would, but as a single call — used by callers that already
/// hold the full payload (e.g. the TX worker serializing one bundle).
///
/// # Errors
///
/// Returns `FramerError` if `meta`/`payload` cannot be represented by the
/// primary header (§4.E).
pub fn build_frame(
    ctx: &SppContext,
    crc_enabled: bool,
    meta: crate::spp::header::Meta,
    timestamp: u64,
    counter: u32,
    payload: &[u8],
) -> Result<Vec<u8>, FramerError> {
    let mut frame = ctx
        .serialize(meta, timestamp, counter, payload)
        .map_err(|_| FramerError::InvalidCborHeader)?;
    if crc_enabled {
        let crc = crc16_ccitt_false(&frame);
        frame.extend_from_slice(&crc.to_be_bytes());
    }
    Ok(frame)
}
