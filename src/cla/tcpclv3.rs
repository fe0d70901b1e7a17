// SPDX-License-Identifier: Apache-2.0 OR MIT

//! TCPCLv3 framer and handshake (§4.F, §6).
//!
//! Only the data-segment subset of RFC 7242 is implemented: no ACK, REFUSE,
//! KEEPALIVE, or SHUTDOWN messages are sent or expected (§4.F).

use super::{Framer, FramerProgress, LinkIo};
use crate::eid;
use crate::error::{FramerError, LinkIoError};
use crate::sdnv::{write_u32, SdnvReader, Status as SdnvStatus, MAX_SDNV_LEN};
use std::io::{Read, Write};

const MAGIC: &[u8; 4] = b"dtn!";
const MIN_VERSION: u8 = 0x03;
const FLAGS: u8 = 0x00;
const KEEPALIVE: [u8; 2] = [0x00, 0x00];

/// `0x10` (data segment) OR `S=0x02` OR `E=0x01`: every data segment this
/// crate sends or accepts is both the first and the last segment of its
/// bundle (§4.F: "always `0x13`").
const DATA_SEGMENT_TYPE_FLAGS: u8 = 0x13;
const TYPE_MASK: u8 = 0xf0;
const DATA_SEGMENT_TYPE: u8 = 0x10;
const FLAG_S: u8 = 0x02;
const FLAG_E: u8 = 0x01;

/// Conservative cap matching the source's lack of an explicit MBS: this is
/// the largest value a u32-width SDNV segment-length field can express.
const MBS: usize = u32::MAX as usize;

/// Build the outgoing contact header for `local_eid` (§4.F, §6).
#[must_use]
pub fn build_contact_header(local_eid: &str) -> Vec<u8> {
    let eid_bytes = local_eid.as_bytes();
    let mut sdnv_buf = [0u8; MAX_SDNV_LEN];
    let sdnv_len = write_u32(eid_bytes.len() as u32, &mut sdnv_buf);

    let mut out = Vec::with_capacity(8 + sdnv_len + eid_bytes.len());
    out.extend_from_slice(MAGIC);
    out.push(MIN_VERSION);
    out.push(FLAGS);
    out.extend_from_slice(&KEEPALIVE);
    out.extend_from_slice(&sdnv_buf[..sdnv_len]);
    out.extend_from_slice(eid_bytes);
    out
}

/// Parse an incoming contact header from `bytes`. Returns the peer EID and
/// the number of bytes consumed.
///
/// # Errors
///
/// Returns `FramerError::BadMagic` if the first 4 bytes aren't `"dtn!"`,
/// `FramerError::BadVersion` if the version byte is below `0x03`, or
/// `FramerError::BadEidLength` if the EID SDNV or its bytes are truncated,
/// not valid UTF-8, or fail EID grammar validation (§4.F: "validate the
/// EID", matching `validate_eid` in the original's TCPCLv3 handshake).
pub fn parse_contact_header(bytes: &[u8]) -> Result<(String, usize), FramerError> {
    if bytes.len() < 8 {
        return Err(FramerError::BadEidLength);
    }
    if &bytes[0..4] != MAGIC {
        return Err(FramerError::BadMagic);
    }
    let version = bytes[4];
    if version < MIN_VERSION {
        return Err(FramerError::BadVersion(version));
    }

    let mut reader = SdnvReader::new_u32();
    let mut cursor = 8;
    loop {
        let &byte = bytes.get(cursor).ok_or(FramerError::BadEidLength)?;
        let status = reader.read_byte(byte).unwrap_or(SdnvStatus::Error);
        cursor += 1;
        match status {
            SdnvStatus::InProgress => continue,
            SdnvStatus::Error => return Err(FramerError::BadEidLength),
            SdnvStatus::Done => break,
        }
    }
    let eid_len = reader.value() as usize;

    let eid_bytes = bytes
        .get(cursor..cursor + eid_len)
        .ok_or(FramerError::BadEidLength)?;
    let eid = std::str::from_utf8(eid_bytes)
        .map_err(|_| FramerError::BadEidLength)?
        .to_string();
    eid::validate(&eid).map_err(|_| FramerError::BadEidLength)?;

    Ok((eid, cursor + eid_len))
}

/// Framer state for one TCPCLv3 link's data-segment stream, post-handshake.
#[derive(Debug, Default)]
pub struct Tcpclv3Framer;

impl Tcpclv3Framer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Framer for Tcpclv3Framer {
    fn forward_to_specific_parser(&mut self, bytes: &[u8]) -> Result<FramerProgress, FramerError> {
        let Some(&type_flags) = bytes.first() else {
            return Ok(FramerProgress::Consumed(0));
        };
        if type_flags & TYPE_MASK != DATA_SEGMENT_TYPE
            || type_flags & FLAG_S == 0
            || type_flags & FLAG_E == 0
        {
            return Err(FramerError::InvalidSegmentType(type_flags));
        }

        let mut reader = SdnvReader::new_u32();
        let mut cursor = 1;
        loop {
            let Some(&byte) = bytes.get(cursor) else {
                return Ok(FramerProgress::Consumed(0));
            };
            let status = reader.read_byte(byte).unwrap_or(SdnvStatus::Error);
            cursor += 1;
            match status {
                SdnvStatus::InProgress => continue,
                SdnvStatus::Error => return Err(FramerError::InvalidSegmentType(type_flags)),
                SdnvStatus::Done => break,
            }
        }

        Ok(FramerProgress::PayloadStarts { consumed: cursor, length: reader.value() as usize })
    }

    fn reset_parsers(&mut self) {}

    fn begin_packet(&mut self, io: &mut dyn std::io::Write, length: usize) -> Result<(), LinkIoError> {
        let mut sdnv_buf = [0u8; MAX_SDNV_LEN];
        let sdnv_len = write_u32(length as u32, &mut sdnv_buf);
        io.write_all(&[DATA_SEGMENT_TYPE_FLAGS])?;
        io.write_all(&sdnv_buf[..sdnv_len])?;
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
        MBS
    }
}

/// Read a contact header synchronously off `io` and validate it, then return
/// the peer EID (§4.H: "run CLA-specific handshake … full \"dtn!\" handshake
/// for TCPCLv3").
///
/// # Errors
///
/// Returns `LinkIoError` on a read failure, or a `FramerError` (wrapped via
/// `From<FramerError> for io::Error` at the `LinkIoError` boundary) on a
/// malformed header.
pub fn perform_handshake(io: &mut dyn LinkIo, local_eid: &str) -> Result<String, LinkIoError> {
    io.write_all(&build_contact_header(local_eid))?;

    let mut header = [0u8; 8];
    io.read_exact(&mut header)?;
    if &header[0..4] != MAGIC {
        return Err(std::io::Error::from(FramerError::BadMagic).into());
    }
    let version = header[4];
    if version < MIN_VERSION {
        return Err(std::io::Error::from(FramerError::BadVersion(version)).into());
    }

    let mut reader = SdnvReader::new_u32();
    loop {
        let mut byte = [0u8];
        io.read_exact(&mut byte)?;
        let status = reader.read_byte(byte[0]).unwrap_or(SdnvStatus::Error);
        match status {
            SdnvStatus::InProgress => continue,
            SdnvStatus::Error => return Err(std::io::Error::from(FramerError::BadEidLength).into()),
            SdnvStatus::Done => break,
        }
    }

    let eid_len = reader.value() as usize;
    let mut eid_bytes = vec![0u8; eid_len];
    io.read_exact(&mut eid_bytes)?;
    let peer_eid = std::str::from_utf8(&eid_bytes)
        .map_err(|_| std::io::Error::from(FramerError::BadEidLength))?
        .to_string();
    eid::validate(&peer_eid).map_err(|_| std::io::Error::from(FramerError::BadEidLength))?;
    Ok(peer_eid)
}
