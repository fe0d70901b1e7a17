// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Incremental Bundle Protocol v6 parser (§4.C).
//!
//! ```text
//! Version -> ProcFlags -> BlockLength -> DestSch -> DestSsp -> SrcSch ->
//! SrcSsp -> RptSch -> RptSsp -> CustSch -> CustSsp -> Timestamp -> SeqNum ->
//! Lifetime -> DictLength -> Dictionary -> [FragOffset -> AduLength]? ->
//! (BlockType -> BlockFlags -> [EidRefCnt -> (EidRefSch -> EidRefSsp)*]? ->
//!  BlockDataLength -> BlockData)+ -> Done
//! ```
//!
//! The original C parser hands block-data buffers back to its driver and
//! waits for a "bulk read done" signal (§9); here the driver already holds
//! a contiguous byte slice, so [`Bundle6Parser::feed`] copies directly into
//! the dictionary/block buffers out of that slice and simply reports how
//! much it consumed, looping back for more input with no sentinel byte.

use super::{Bundle, Block, BlockFlags, EidRef, ProcessingFlags, BLOCK_TYPE_PAYLOAD};
use super::dictionary::read_cstr;
use crate::error::ParseError;
use crate::quota;
use crate::sdnv::{SdnvReader, Status as SdnvStatus};

const BUNDLE_VERSION_6: u8 = 0x06;

/// Coarse parser status, mirroring the C `parser_status` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserStatus {
    Good,
    Done,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Version,
    ProcFlags,
    BlockLength,
    DestSch,
    DestSsp,
    SrcSch,
    SrcSsp,
    RptSch,
    RptSsp,
    CustSch,
    CustSsp,
    Timestamp,
    SeqNum,
    Lifetime,
    DictLength,
    Dictionary,
    FragOffset,
    AduLength,
    BlockType,
    BlockFlags,
    EidRefCnt,
    EidRefSch,
    EidRefSsp,
    BlockDataLength,
    BlockData,
    Done,
}

impl Stage {
    /// `true` for every stage whose bytes count against
    /// `primary_bytes_remaining` (§4.C): everything from `DestSch` through
    /// the end of the primary block.
    fn counts_against_primary_length(self) -> bool {
        matches!(
            self,
            Stage::DestSch
                | Stage::DestSsp
                | Stage::SrcSch
                | Stage::SrcSsp
                | Stage::RptSch
                | Stage::RptSsp
                | Stage::CustSch
                | Stage::CustSsp
                | Stage::Timestamp
                | Stage::SeqNum
                | Stage::Lifetime
                | Stage::DictLength
                | Stage::Dictionary
                | Stage::FragOffset
                | Stage::AduLength
        )
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Offsets {
    scheme_offset: u32,
    ssp_offset: u32,
}

/// Byte-driven Bundle Protocol v6 parser.
///
/// Construct with [`Bundle6Parser::new`], feed it bytes with
/// [`feed`](Self::feed), and take ownership of completed bundles from its
/// `Ok((_, Some(bundle)))` return. `reset` returns the parser to `Version`
/// without dropping its configuration.
pub struct Bundle6Parser {
    stage: Stage,
    status: ParserStatus,
    sdnv: SdnvReader,

    bundle: Bundle,
    storage_reserved: u64,

    primary_block_length: u32,
    primary_bytes_remaining: u32,

    dest_off: Offsets,
    src_off: Offsets,
    rpt_off: Offsets,
    cust_off: Offsets,
    cur_off: Offsets,

    dict_length: u32,
    dict: Vec<u8>,
    dict_write_pos: usize,

    cur_block_type: u8,
    cur_block_flags: u32,
    eid_ref_cnt: u32,
    eid_refs_read: u32,
    cur_eid_refs: Vec<EidRef>,

    block_data_len: u32,
    block_data: Vec<u8>,
    block_data_pos: usize,
}

impl Default for Bundle6Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Bundle6Parser {
    #[must_use]
    pub fn new() -> Self {
        let mut parser = Self {
            stage: Stage::Version,
            status: ParserStatus::Good,
            sdnv: SdnvReader::new_u32(),
            bundle: empty_bundle(),
            storage_reserved: 0,
            primary_block_length: 0,
            primary_bytes_remaining: 0,
            dest_off: Offsets::default(),
            src_off: Offsets::default(),
            rpt_off: Offsets::default(),
            cust_off: Offsets::default(),
            cur_off: Offsets::default(),
            dict_length: 0,
            dict: Vec::new(),
            dict_write_pos: 0,
            cur_block_type: 0,
            cur_block_flags: 0,
            eid_ref_cnt: 0,
            eid_refs_read: 0,
            cur_eid_refs: Vec::new(),
            block_data_len: 0,
            block_data: Vec::new(),
            block_data_pos: 0,
        };
        parser.reset();
        parser
    }

    #[must_use]
    pub fn status(&self) -> ParserStatus {
        self.status
    }

    /// Return the parser to `Version`, releasing any quota it had reserved
    /// for the in-progress bundle and dropping the partial bundle (§4.C).
    pub fn reset(&mut self) {
        if self.storage_reserved > 0 {
            quota::release(self.storage_reserved);
            self.storage_reserved = 0;
        }
        self.stage = Stage::Version;
        self.status = ParserStatus::Good;
        self.sdnv = SdnvReader::new_u8();
        self.bundle = empty_bundle();
        self.primary_block_length = 0;
        self.primary_bytes_remaining = 0;
        self.dict_length = 0;
        self.dict.clear();
        self.dict_write_pos = 0;
        self.cur_block_flags = 0;
        self.eid_ref_cnt = 0;
        self.eid_refs_read = 0;
        self.cur_eid_refs.clear();
        self.block_data_len = 0;
        self.block_data.clear();
        self.block_data_pos = 0;
    }

    fn fail(&mut self, e: ParseError) -> Result<(usize, Option<Bundle>), ParseError> {
        self.status = ParserStatus::Error;
        Err(e)
    }

    /// Feed `input` to the parser. Returns the number of bytes consumed
    /// (which may be less than `input.len()` if a bundle completed partway
    /// through, or if a block-data copy ran out of buffered input) and,
    /// when a bundle completed during this call, the finished bundle.
    ///
    /// # Errors
    ///
    /// On any [`ParseError`] the parser enters `ParserStatus::Error` and
    /// must be [`reset`](Self::reset) before it will accept more bytes.
    pub fn feed(&mut self, input: &[u8]) -> Result<(usize, Option<Bundle>), ParseError> {
        if self.status == ParserStatus::Error {
            return Err(ParseError::Allocation);
        }
        let mut pos = 0;
        while pos < input.len() {
            if self.stage == Stage::Done {
                break;
            }
            match self.stage {
                Stage::Dictionary => {
                    let remaining = self.dict_length as usize - self.dict_write_pos;
                    let take = remaining.min(input.len() - pos);
                    self.dict[self.dict_write_pos..self.dict_write_pos + take]
                        .copy_from_slice(&input[pos..pos + take]);
                    self.dict_write_pos += take;
                    pos += take;
                    self.charge_primary_bytes(take as u32)?;
                    if self.dict_write_pos == self.dict_length as usize {
                        self.finish_dictionary()?;
                    } else {
                        break;
                    }
                }
                Stage::BlockData => {
                    let remaining = self.block_data_len as usize - self.block_data_pos;
                    let take = remaining.min(input.len() - pos);
                    self.block_data[self.block_data_pos..self.block_data_pos + take]
                        .copy_from_slice(&input[pos..pos + take]);
                    self.block_data_pos += take;
                    pos += take;
                    if self.block_data_pos == self.block_data_len as usize {
                        self.finish_block_data()?;
                        if self.stage == Stage::Done {
                            let bundle = std::mem::replace(&mut self.bundle, empty_bundle());
                            self.storage_reserved = 0;
                            let valid = bundle.payload_block().is_some();
                            self.reset();
                            if valid {
                                return Ok((pos, Some(bundle)));
                            }
                            return Ok((pos, None));
                        }
                    } else {
                        break;
                    }
                }
                _ => {
                    let byte = input[pos];
                    pos += 1;
                    self.step_byte(byte)?;
                }
            }
        }
        Ok((pos, None))
    }

    fn charge_primary_bytes(&mut self, n: u32) -> Result<(), ParseError> {
        if n == 0 {
            return Ok(());
        }
        if self.primary_bytes_remaining < n {
            self.status = ParserStatus::Error;
            return Err(ParseError::BlockLengthExhausted);
        }
        self.primary_bytes_remaining -= n;
        Ok(())
    }

    fn step_byte(&mut self, byte: u8) -> Result<(), ParseError> {
        match self.stage {
            Stage::Version => {
                if byte != BUNDLE_VERSION_6 {
                    self.status = ParserStatus::Error;
                    return Err(ParseError::InvalidVersion(byte));
                }
                self.bundle.protocol_version = byte;
                self.enter(Stage::ProcFlags);
                Ok(())
            }
            Stage::BlockType => {
                self.cur_block_type = byte;
                self.enter(Stage::BlockFlags);
                Ok(())
            }
            _ => self.step_sdnv(byte),
        }
    }

    fn step_sdnv(&mut self, byte: u8) -> Result<(), ParseError> {
        if self.stage.counts_against_primary_length() {
            self.charge_primary_bytes(1)?;
        }
        let result = self.sdnv.read_byte(byte);
        let status = match result {
            Ok(s) => s,
            Err(e) => {
                self.status = ParserStatus::Error;
                return Err(e);
            }
        };
        if status != SdnvStatus::Done {
            return Ok(());
        }
        let value = self.sdnv.value();
        match self.stage {
            Stage::ProcFlags => {
                self.bundle.processing_flags = ProcessingFlags(value).masked();
                self.enter(Stage::BlockLength);
            }
            Stage::BlockLength => {
                self.primary_block_length = value as u32;
                self.enter(Stage::DestSch);
            }
            Stage::DestSch => {
                self.dest_off.scheme_offset = value as u32;
                self.enter(Stage::DestSsp);
            }
            Stage::DestSsp => {
                self.dest_off.ssp_offset = value as u32;
                self.enter(Stage::SrcSch);
            }
            Stage::SrcSch => {
                self.src_off.scheme_offset = value as u32;
                self.enter(Stage::SrcSsp);
            }
            Stage::SrcSsp => {
                self.src_off.ssp_offset = value as u32;
                self.enter(Stage::RptSch);
            }
            Stage::RptSch => {
                self.rpt_off.scheme_offset = value as u32;
                self.enter(Stage::RptSsp);
            }
            Stage::RptSsp => {
                self.rpt_off.ssp_offset = value as u32;
                self.enter(Stage::CustSch);
            }
            Stage::CustSch => {
                self.cust_off.scheme_offset = value as u32;
                self.enter(Stage::CustSsp);
            }
            Stage::CustSsp => {
                self.cust_off.ssp_offset = value as u32;
                self.enter(Stage::Timestamp);
            }
            Stage::Timestamp => {
                self.bundle.creation_timestamp = value;
                self.enter(Stage::SeqNum);
            }
            Stage::SeqNum => {
                self.bundle.sequence_number = value;
                self.enter(Stage::Lifetime);
            }
            Stage::Lifetime => {
                self.bundle.lifetime_us = value.saturating_mul(1_000_000);
                self.enter(Stage::DictLength);
            }
            Stage::DictLength => {
                if value == 0 {
                    self.status = ParserStatus::Error;
                    return Err(ParseError::DictLengthZero);
                }
                self.dict_length = value as u32;
                if !quota::try_reserve(u64::from(self.dict_length) + 1) {
                    self.status = ParserStatus::Error;
                    return Err(ParseError::QuotaExceeded);
                }
                self.storage_reserved += u64::from(self.dict_length) + 1;
                self.dict = vec![0u8; self.dict_length as usize + 1];
                self.dict_write_pos = 0;
                self.enter(Stage::Dictionary);
            }
            Stage::FragOffset => {
                self.bundle.fragment_offset = value as u32;
                self.enter(Stage::AduLength);
            }
            Stage::AduLength => {
                self.bundle.total_adu_length = value as u32;
                self.enter(Stage::BlockType);
            }
            Stage::BlockFlags => {
                self.cur_block_flags = value as u32;
                if self.cur_block_flags & BlockFlags::HAS_EID_REF_FIELD != 0 {
                    self.enter(Stage::EidRefCnt);
                } else {
                    self.enter(Stage::BlockDataLength);
                }
            }
            Stage::EidRefCnt => {
                self.eid_ref_cnt = value as u32;
                self.eid_refs_read = 0;
                self.cur_eid_refs.clear();
                if self.eid_ref_cnt == 0 {
                    self.enter(Stage::BlockDataLength);
                } else {
                    self.enter(Stage::EidRefSch);
                }
            }
            Stage::EidRefSch => {
                self.cur_off.scheme_offset = value as u32;
                self.enter(Stage::EidRefSsp);
            }
            Stage::EidRefSsp => {
                self.cur_off.ssp_offset = value as u32;
                let scheme = read_cstr(&self.dict, self.dict_length, self.cur_off.scheme_offset)
                    .ok_or(ParseError::DictOffsetOutOfRange)?;
                if scheme.contains(':') {
                    self.status = ParserStatus::Error;
                    return Err(ParseError::SchemeContainsColon);
                }
                let ssp = read_cstr(&self.dict, self.dict_length, self.cur_off.ssp_offset)
                    .ok_or(ParseError::DictOffsetOutOfRange)?;
                self.cur_eid_refs.push(EidRef {
                    scheme: scheme.to_string(),
                    ssp: ssp.to_string(),
                });
                self.eid_refs_read += 1;
                if self.eid_refs_read == self.eid_ref_cnt {
                    self.enter(Stage::BlockDataLength);
                } else {
                    self.enter(Stage::EidRefSch);
                }
            }
            Stage::BlockDataLength => {
                self.block_data_len = value as u32;
                if !quota::try_reserve(u64::from(self.block_data_len)) {
                    self.status = ParserStatus::Error;
                    return Err(ParseError::QuotaExceeded);
                }
                self.storage_reserved += u64::from(self.block_data_len);
                self.block_data = vec![0u8; self.block_data_len as usize];
                self.block_data_pos = 0;
                self.enter(Stage::BlockData);
            }
            _ => unreachable!("SDNV-driven stage without a value handler"),
        }
        Ok(())
    }

    fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        match stage {
            Stage::ProcFlags | Stage::BlockLength => self.sdnv = SdnvReader::new_u32(),
            Stage::DestSch => {
                self.primary_bytes_remaining = self.primary_block_length;
                self.sdnv = SdnvReader::new_u32();
            }
            Stage::DestSsp
            | Stage::SrcSch
            | Stage::SrcSsp
            | Stage::RptSch
            | Stage::RptSsp
            | Stage::CustSch
            | Stage::CustSsp
            | Stage::DictLength
            | Stage::FragOffset
            | Stage::AduLength
            | Stage::BlockDataLength => self.sdnv = SdnvReader::new_u32(),
            Stage::Timestamp | Stage::SeqNum | Stage::Lifetime => {
                self.sdnv = SdnvReader::new_u64();
            }
            Stage::BlockFlags => self.sdnv = SdnvReader::new_u8(),
            Stage::EidRefCnt | Stage::EidRefSch | Stage::EidRefSsp => {
                self.sdnv = SdnvReader::new_u16();
            }
            Stage::BlockType => {}
            Stage::Dictionary | Stage::BlockData | Stage::Done => {}
        }
    }

    fn finish_dictionary(&mut self) -> Result<(), ParseError> {
        let dict_length = self.dict_length;
        let resolve = |dict: &[u8], off: Offsets| -> Result<Option<String>, ParseError> {
            let scheme = read_cstr(dict, dict_length, off.scheme_offset).ok_or(ParseError::DictOffsetOutOfRange)?;
            if scheme.contains(':') {
                return Err(ParseError::SchemeContainsColon);
            }
            let ssp = read_cstr(dict, dict_length, off.ssp_offset).ok_or(ParseError::DictOffsetOutOfRange)?;
            if scheme == "dtn" && ssp == "none" {
                return Ok(None);
            }
            Ok(Some(format!("{scheme}:{ssp}")))
        };
        self.bundle.destination = resolve(&self.dict, self.dest_off)?;
        self.bundle.source = resolve(&self.dict, self.src_off)?;
        self.bundle.report_to = resolve(&self.dict, self.rpt_off)?;
        self.bundle.current_custodian = resolve(&self.dict, self.cust_off)?;

        if self.bundle.processing_flags.contains(ProcessingFlags::IS_FRAGMENT) {
            self.enter(Stage::FragOffset);
        } else {
            self.enter(Stage::BlockType);
        }
        Ok(())
    }

    fn finish_block_data(&mut self) -> Result<(), ParseError> {
        let data = std::mem::take(&mut self.block_data);
        let flags = BlockFlags(self.cur_block_flags);
        let is_last = flags.contains(BlockFlags::LAST_BLOCK);
        let mut block = Block::new(self.cur_block_type, flags, data);
        block.eid_refs = std::mem::take(&mut self.cur_eid_refs);
        self.bundle.blocks.push(block);

        if is_last {
            self.enter(Stage::Done);
        } else {
            self.enter(Stage::BlockType);
        }
        Ok(())
    }
}

fn empty_bundle() -> Bundle {
    Bundle {
        protocol_version: BUNDLE_VERSION_6,
        processing_flags: ProcessingFlags::default(),
        destination: None,
        source: None,
        report_to: None,
        current_custodian: None,
        creation_timestamp: 0,
        sequence_number: 0,
        lifetime_us: 0,
        fragment_offset: 0,
        total_adu_length: 0,
        blocks: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::serializer::serialize;

    fn sample_bundle() -> Bundle {
        Bundle {
            protocol_version: 6,
            processing_flags: ProcessingFlags::default(),
            destination: Some("dtn://dst".to_string()),
            source: Some("dtn://src".to_string()),
            report_to: None,
            current_custodian: None,
            creation_timestamp: 700_000_000,
            sequence_number: 1,
            lifetime_us: 3_600_000_000,
            fragment_offset: 0,
            total_adu_length: 0,
            blocks: vec![Block::payload(b"hello, dtn".to_vec(), true)],
        }
    }

    #[test]
    fn parses_a_single_payload_bundle_in_one_feed() {
        let bundle = sample_bundle();
        let wire = serialize(&bundle);

        let mut parser = Bundle6Parser::new();
        let (consumed, parsed) = parser.feed(&wire).unwrap();
        assert_eq!(consumed, wire.len());
        let parsed = parsed.expect("bundle should complete");
        assert_eq!(parsed.destination.as_deref(), Some("dtn://dst"));
        assert_eq!(parsed.source.as_deref(), Some("dtn://src"));
        assert_eq!(parsed.report_to, None);
        assert_eq!(parsed.payload_block().unwrap().data, b"hello, dtn");
    }

    #[test]
    fn parses_byte_at_a_time() {
        let bundle = sample_bundle();
        let wire = serialize(&bundle);

        let mut parser = Bundle6Parser::new();
        let mut completed = None;
        for &b in &wire {
            let (_, bundle) = parser.feed(&[b]).unwrap();
            if bundle.is_some() {
                completed = bundle;
            }
        }
        let parsed = completed.expect("bundle should complete");
        assert_eq!(parsed.destination.as_deref(), Some("dtn://dst"));
    }

    #[test]
    fn rejects_unsupported_version_byte() {
        let mut parser = Bundle6Parser::new();
        let err = parser.feed(&[0x07]).unwrap_err();
        assert_eq!(err, ParseError::InvalidVersion(0x07));
        assert_eq!(parser.status(), ParserStatus::Error);
    }

    #[test]
    fn reset_after_error_accepts_a_fresh_bundle() {
        let mut parser = Bundle6Parser::new();
        assert!(parser.feed(&[0x07]).is_err());
        parser.reset();
        assert_eq!(parser.status(), ParserStatus::Good);

        let bundle = sample_bundle();
        let wire = serialize(&bundle);
        let (_, parsed) = parser.feed(&wire).unwrap();
        assert!(parsed.is_some());
    }

    /// A crafted primary block whose destination scheme offset equals the
    /// declared `dict_length` exactly must be rejected: the offset has to be
    /// strictly less than `dict_length`, not merely within the parser's
    /// internal buffer (which carries one extra trailing byte).
    #[test]
    fn rejects_a_destination_scheme_offset_equal_to_dict_length() {
        use crate::sdnv::{write_u32, write_u64};

        fn push32(out: &mut Vec<u8>, v: u32) {
            let mut buf = [0u8; crate::sdnv::MAX_SDNV_LEN];
            let len = write_u32(v, &mut buf);
            out.extend_from_slice(&buf[..len]);
        }
        fn push64(out: &mut Vec<u8>, v: u64) {
            let mut buf = [0u8; crate::sdnv::MAX_SDNV_LEN];
            let len = write_u64(v, &mut buf);
            out.extend_from_slice(&buf[..len]);
        }

        let dict_length: u32 = 8;
        let dict_bytes = b"dtn\0abc\0";
        assert_eq!(dict_bytes.len(), dict_length as usize);

        let mut primary_fields = Vec::new();
        push32(&mut primary_fields, dict_length); // destination scheme offset == dict_length: out of range
        push32(&mut primary_fields, 0); // destination ssp offset
        push32(&mut primary_fields, 0); // source scheme offset
        push32(&mut primary_fields, 0); // source ssp offset
        push32(&mut primary_fields, 0); // report-to scheme offset
        push32(&mut primary_fields, 0); // report-to ssp offset
        push32(&mut primary_fields, 0); // custodian scheme offset
        push32(&mut primary_fields, 0); // custodian ssp offset
        push64(&mut primary_fields, 0); // creation timestamp
        push64(&mut primary_fields, 0); // sequence number
        push64(&mut primary_fields, 0); // lifetime
        push32(&mut primary_fields, dict_length);
        primary_fields.extend_from_slice(dict_bytes);

        let mut wire = vec![0x06u8];
        push32(&mut wire, 0); // processing flags
        push32(&mut wire, primary_fields.len() as u32); // primary block length
        wire.extend_from_slice(&primary_fields);

        let mut parser = Bundle6Parser::new();
        let err = parser.feed(&wire).unwrap_err();
        assert_eq!(err, ParseError::DictOffsetOutOfRange);
        assert_eq!(parser.status(), ParserStatus::Error);
    }
}
