// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bundle6 EID dictionary (§3, §4.B).
//!
//! The dictionary is a packed byte buffer of zero-terminated `scheme` and
//! `ssp` strings referenced by `(scheme_offset, ssp_offset)` pairs from the
//! primary block and from extension-block EID references. This module uses
//! the simplest correct layout: every EID's scheme and SSP are written in
//! full, back to back, with no deduplication — each EID costs
//! `scheme.len() + ssp.len() + 2` bytes. A missing EID is written as the
//! eight bytes of `"dtn\0none\0"`.

use super::Bundle;
use crate::eid;

/// A `(scheme_offset, ssp_offset)` pair into a dictionary buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EidOffsets {
    pub scheme_offset: u32,
    pub ssp_offset: u32,
}

/// Offsets for the four fixed EIDs plus one per extension-block EID
/// reference, and the total dictionary length they were computed against.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DictDescriptor {
    pub destination: EidOffsets,
    pub source: EidOffsets,
    pub report_to: EidOffsets,
    pub custodian: EidOffsets,
    pub eid_references: Vec<EidOffsets>,
    pub dict_length: u32,
}

fn push_eid(buf: &mut Vec<u8>, eid: Option<&str>, offsets_out: &mut EidOffsets) {
    let normalized = eid::normalize(eid);
    let (scheme, ssp) = eid::scheme_and_ssp(normalized);
    offsets_out.scheme_offset = buf.len() as u32;
    buf.extend_from_slice(scheme.as_bytes());
    buf.push(0);
    offsets_out.ssp_offset = buf.len() as u32;
    buf.extend_from_slice(ssp.as_bytes());
    buf.push(0);
}

/// Compute dictionary offsets for `bundle` without building the byte buffer
/// (used to size `primary_block_length` cheaply, §4.D).
#[must_use]
pub fn calculate_dict(bundle: &Bundle) -> DictDescriptor {
    let mut desc = DictDescriptor::default();
    let mut buf = Vec::new();
    push_eid(&mut buf, bundle.destination.as_deref(), &mut desc.destination);
    push_eid(&mut buf, bundle.source.as_deref(), &mut desc.source);
    push_eid(&mut buf, bundle.report_to.as_deref(), &mut desc.report_to);
    push_eid(&mut buf, bundle.current_custodian.as_deref(), &mut desc.custodian);
    for block in &bundle.blocks {
        for eid_ref in &block.eid_refs {
            let combined = format!("{}:{}", eid_ref.scheme, eid_ref.ssp);
            let mut offsets = EidOffsets::default();
            push_eid(&mut buf, Some(combined.as_str()), &mut offsets);
            desc.eid_references.push(offsets);
        }
    }
    desc.dict_length = buf.len() as u32;
    desc
}

/// Build the dictionary byte buffer for `bundle`, returning it alongside its
/// descriptor. Equivalent to [`calculate_dict`] but also materializes the
/// bytes `serialize` needs to write.
#[must_use]
pub fn serialize_dict(bundle: &Bundle) -> (DictDescriptor, Vec<u8>) {
    let mut desc = DictDescriptor::default();
    let mut buf = Vec::new();
    push_eid(&mut buf, bundle.destination.as_deref(), &mut desc.destination);
    push_eid(&mut buf, bundle.source.as_deref(), &mut desc.source);
    push_eid(&mut buf, bundle.report_to.as_deref(), &mut desc.report_to);
    push_eid(&mut buf, bundle.current_custodian.as_deref(), &mut desc.custodian);
    for block in &bundle.blocks {
        for eid_ref in &block.eid_refs {
            let combined = format!("{}:{}", eid_ref.scheme, eid_ref.ssp);
            let mut offsets = EidOffsets::default();
            push_eid(&mut buf, Some(combined.as_str()), &mut offsets);
            desc.eid_references.push(offsets);
        }
    }
    desc.dict_length = buf.len() as u32;
    (desc, buf)
}

/// Read a zero-terminated string out of `dict` at `offset`.
///
/// `dict_length` is the bundle's declared dictionary length, not `dict.len()`
/// — the parser's buffer carries one extra trailing byte beyond
/// `dict_length` (the appended terminator for the last entry), so bounding
/// on `dict.len()` alone would let `offset == dict_length` dereference that
/// terminator and yield a bogus empty string (§4.C: "both offsets must be
/// strictly less than `dict_length`").
///
/// # Errors
///
/// Returns `None` if `offset >= dict_length` or no terminator is found.
#[must_use]
pub fn read_cstr(dict: &[u8], dict_length: u32, offset: u32) -> Option<&str> {
    if offset >= dict_length {
        return None;
    }
    let offset = offset as usize;
    let end = dict[offset..].iter().position(|&b| b == 0)? + offset;
    std::str::from_utf8(&dict[offset..end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::Block;
    use crate::bundle::ProcessingFlags;

    fn bundle_with(destination: Option<&str>) -> Bundle {
        Bundle {
            protocol_version: 6,
            processing_flags: ProcessingFlags::default(),
            destination: destination.map(str::to_string),
            source: None,
            report_to: None,
            current_custodian: None,
            creation_timestamp: 0,
            sequence_number: 0,
            lifetime_us: 0,
            fragment_offset: 0,
            total_adu_length: 0,
            blocks: vec![Block::payload(vec![], true)],
        }
    }

    #[test]
    fn destination_dtn_everything_else_none() {
        let bundle = bundle_with(Some("dtn://dst"));
        let (desc, buf) = serialize_dict(&bundle);
        assert_eq!(buf, b"dtn\0//dst\0dtn\0none\0dtn\0none\0dtn\0none\0");
        assert_eq!(desc.destination, EidOffsets { scheme_offset: 0, ssp_offset: 4 });
        assert_eq!(desc.dict_length, 32);
    }

    #[test]
    fn read_cstr_round_trips_every_offset() {
        let bundle = bundle_with(Some("dtn://dst"));
        let (desc, buf) = serialize_dict(&bundle);
        assert_eq!(read_cstr(&buf, desc.dict_length, desc.destination.scheme_offset), Some("dtn"));
        assert_eq!(read_cstr(&buf, desc.dict_length, desc.destination.ssp_offset), Some("//dst"));
        assert_eq!(read_cstr(&buf, desc.dict_length, desc.source.scheme_offset), Some("dtn"));
        assert_eq!(read_cstr(&buf, desc.dict_length, desc.source.ssp_offset), Some("none"));
    }

    #[test]
    fn read_cstr_rejects_an_offset_at_or_past_dict_length() {
        let bundle = bundle_with(Some("dtn://dst"));
        let (desc, buf) = serialize_dict(&bundle);
        assert_eq!(read_cstr(&buf, desc.dict_length, desc.dict_length), None);
        assert_eq!(read_cstr(&buf, desc.dict_length, desc.dict_length + 1), None);
    }

    #[test]
    fn calculate_dict_matches_serialize_dict_length() {
        let bundle = bundle_with(Some("ipn:1.2"));
        let desc_only = calculate_dict(&bundle);
        let (desc_and_buf, buf) = serialize_dict(&bundle);
        assert_eq!(desc_only.dict_length, desc_and_buf.dict_length);
        assert_eq!(desc_only.dict_length as usize, buf.len());
    }
}
