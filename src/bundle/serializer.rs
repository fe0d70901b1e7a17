// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bundle Protocol v6 serializer and size computation (§4.D).
//!
//! Per RFC 5050, `primary_block_length` counts only the bytes that follow
//! the length field itself — not the version byte, not the processing-flags
//! SDNV, and not its own encoded width. That makes it a direct sum rather
//! than the fixed point it would otherwise need to be.

use super::dictionary::{calculate_dict, serialize_dict, DictDescriptor};
use super::{Bundle, BlockFlags};
use crate::sdnv::{size_of_u16, size_of_u32, size_of_u64, size_of_u8, write_u16, write_u32, write_u64, write_u8};

fn push_sdnv_u8(out: &mut Vec<u8>, value: u8) {
    let mut buf = [0u8; crate::sdnv::MAX_SDNV_LEN];
    let len = write_u8(value, &mut buf);
    out.extend_from_slice(&buf[..len]);
}

fn push_sdnv_u16(out: &mut Vec<u8>, value: u16) {
    let mut buf = [0u8; crate::sdnv::MAX_SDNV_LEN];
    let len = write_u16(value, &mut buf);
    out.extend_from_slice(&buf[..len]);
}

fn push_sdnv_u32(out: &mut Vec<u8>, value: u32) {
    let mut buf = [0u8; crate::sdnv::MAX_SDNV_LEN];
    let len = write_u32(value, &mut buf);
    out.extend_from_slice(&buf[..len]);
}

fn push_sdnv_u64(out: &mut Vec<u8>, value: u64) {
    let mut buf = [0u8; crate::sdnv::MAX_SDNV_LEN];
    let len = write_u64(value, &mut buf);
    out.extend_from_slice(&buf[..len]);
}

/// Size of every primary-block field *after* the block-length field itself
/// (RFC 5050: "the number of bytes in the remainder of the primary bundle
/// block, following the block length field"), excluding the dictionary and
/// fragment SDNVs, which the caller adds once it knows `dict.dict_length`.
fn post_length_fields_size(bundle: &Bundle, dict: &DictDescriptor) -> usize {
    size_of_u32(dict.destination.scheme_offset)
        + size_of_u32(dict.destination.ssp_offset)
        + size_of_u32(dict.source.scheme_offset)
        + size_of_u32(dict.source.ssp_offset)
        + size_of_u32(dict.report_to.scheme_offset)
        + size_of_u32(dict.report_to.ssp_offset)
        + size_of_u32(dict.custodian.scheme_offset)
        + size_of_u32(dict.custodian.ssp_offset)
        + size_of_u64(bundle.creation_timestamp)
        + size_of_u64(bundle.sequence_number)
        + size_of_u64(bundle.lifetime_us / 1_000_000)
        + size_of_u32(dict.dict_length)
}

/// Compute `primary_block_length` for `bundle`: everything the primary block
/// carries after its own length field (§4.D). None of the counted fields'
/// widths depend on the length value itself, so this is a direct sum, not a
/// fixed point — unlike the dictionary offsets, which do depend on the EIDs.
#[must_use]
pub fn recalculate_primary_block_length(bundle: &Bundle) -> (u32, DictDescriptor) {
    let dict = calculate_dict(bundle);
    let fragment_size = if bundle.is_fragment() {
        size_of_u32(bundle.fragment_offset) + size_of_u32(bundle.total_adu_length)
    } else {
        0
    };

    let length = (post_length_fields_size(bundle, &dict) + dict.dict_length as usize + fragment_size) as u32;
    (length, dict)
}

/// Serialize `bundle` into a freshly allocated buffer.
#[must_use]
pub fn serialize(bundle: &Bundle) -> Vec<u8> {
    let (primary_block_length, _dict) = recalculate_primary_block_length(bundle);
    let (dict_desc, dict_bytes) = serialize_dict(bundle);
    debug_assert_eq!(dict_desc.dict_length as usize, dict_bytes.len());

    let mut out = Vec::with_capacity(primary_block_length as usize + 16);
    out.push(bundle.protocol_version);
    push_sdnv_u32(&mut out, bundle.processing_flags.masked().0 as u32);
    push_sdnv_u32(&mut out, primary_block_length);
    push_sdnv_u32(&mut out, dict_desc.destination.scheme_offset);
    push_sdnv_u32(&mut out, dict_desc.destination.ssp_offset);
    push_sdnv_u32(&mut out, dict_desc.source.scheme_offset);
    push_sdnv_u32(&mut out, dict_desc.source.ssp_offset);
    push_sdnv_u32(&mut out, dict_desc.report_to.scheme_offset);
    push_sdnv_u32(&mut out, dict_desc.report_to.ssp_offset);
    push_sdnv_u32(&mut out, dict_desc.custodian.scheme_offset);
    push_sdnv_u32(&mut out, dict_desc.custodian.ssp_offset);
    push_sdnv_u64(&mut out, bundle.creation_timestamp);
    push_sdnv_u64(&mut out, bundle.sequence_number);
    push_sdnv_u64(&mut out, bundle.lifetime_us / 1_000_000);
    push_sdnv_u32(&mut out, dict_desc.dict_length);
    out.extend_from_slice(&dict_bytes);

    if bundle.is_fragment() {
        push_sdnv_u32(&mut out, bundle.fragment_offset);
        push_sdnv_u32(&mut out, bundle.total_adu_length);
    }

    let mut eid_ref_cursor = 0usize;
    for block in &bundle.blocks {
        out.push(block.block_type);
        push_sdnv_u8(&mut out, block.flags.0 as u8);
        if block.flags.contains(BlockFlags::HAS_EID_REF_FIELD) {
            push_sdnv_u16(&mut out, block.eid_refs.len() as u16);
            for _ in &block.eid_refs {
                let refs = &dict_desc.eid_references[eid_ref_cursor];
                push_sdnv_u16(&mut out, refs.scheme_offset as u16);
                push_sdnv_u16(&mut out, refs.ssp_offset as u16);
                eid_ref_cursor += 1;
            }
        }
        push_sdnv_u32(&mut out, block.data.len() as u32);
        out.extend_from_slice(&block.data);
    }

    out
}

/// Exact byte count `serialize` would produce for `bundle`.
#[must_use]
pub fn serialized_size(bundle: &Bundle) -> usize {
    sized(bundle, false, true, true)
}

/// Smallest size a first fragment can have while still carrying the primary
/// block, every block preceding the payload, and every `MUST_BE_REPLICATED`
/// block after it, with a zero-length payload.
#[must_use]
pub fn first_fragment_min_size(bundle: &Bundle) -> usize {
    sized(bundle, true, true, false)
}

/// Smallest size a middle fragment can have: only `MUST_BE_REPLICATED`
/// blocks, with a zero-length payload.
#[must_use]
pub fn mid_fragment_min_size(bundle: &Bundle) -> usize {
    sized(bundle, true, false, false)
}

/// Smallest size a last fragment can have: blocks after the payload plus
/// `MUST_BE_REPLICATED` blocks from before, with a zero-length payload.
#[must_use]
pub fn last_fragment_min_size(bundle: &Bundle) -> usize {
    sized(bundle, true, false, true)
}

fn sized(bundle: &Bundle, exclude_payload: bool, first_fragment: bool, last_fragment: bool) -> usize {
    let (primary_block_length, dict) = recalculate_primary_block_length(bundle);
    let mut result = 1 // version
        + size_of_u32(bundle.processing_flags.masked().0 as u32)
        + size_of_u32(primary_block_length)
        + primary_block_length as usize;
    let mut payload_reached = false;
    let mut eid_ref_cursor = 0usize;

    for block in &bundle.blocks {
        let is_payload = block.is_payload();
        let block_wanted = block.flags.contains(BlockFlags::MUST_BE_REPLICATED)
            || (first_fragment && !payload_reached)
            || (last_fragment && payload_reached);

        if is_payload {
            payload_reached = true;
        }

        let mut eid_ref_size = 0usize;
        let mut eid_ref_count = 0usize;
        if block.flags.contains(BlockFlags::HAS_EID_REF_FIELD) {
            for _ in &block.eid_refs {
                let refs = &dict.eid_references[eid_ref_cursor];
                eid_ref_size += size_of_u16(refs.scheme_offset as u16);
                eid_ref_size += size_of_u16(refs.ssp_offset as u16);
                eid_ref_cursor += 1;
                eid_ref_count += 1;
            }
            eid_ref_size += size_of_u16(eid_ref_count as u16);
        }

        if block_wanted {
            let mut block_size = 1 + size_of_u8(block.flags.0 as u8) + size_of_u32(block.data.len() as u32) + eid_ref_size;
            if !(is_payload && exclude_payload) {
                block_size += block.data.len();
            }
            result += block_size;
        }
    }

    if bundle.is_fragment() {
        result += size_of_u32(bundle.total_adu_length);
        result += size_of_u32(bundle.fragment_offset);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::parser::Bundle6Parser;
    use crate::bundle::{Block, ProcessingFlags};

    fn sample_bundle() -> Bundle {
        Bundle {
            protocol_version: 6,
            processing_flags: ProcessingFlags::default(),
            destination: Some("dtn://dst".to_string()),
            source: None,
            report_to: None,
            current_custodian: None,
            creation_timestamp: 700_000_000,
            sequence_number: 42,
            lifetime_us: 3_600_000_000,
            fragment_offset: 0,
            total_adu_length: 0,
            blocks: vec![Block::payload(b"payload bytes".to_vec(), true)],
        }
    }

    #[test]
    fn serialized_size_matches_actual_output_length() {
        let bundle = sample_bundle();
        let wire = serialize(&bundle);
        assert_eq!(serialized_size(&bundle), wire.len());
    }

    #[test]
    fn round_trips_through_the_parser() {
        let bundle = sample_bundle();
        let wire = serialize(&bundle);

        let mut parser = Bundle6Parser::new();
        let (_, parsed) = parser.feed(&wire).unwrap();
        let parsed = parsed.unwrap();

        assert_eq!(parsed.destination, bundle.destination);
        assert_eq!(parsed.source, bundle.source);
        assert_eq!(parsed.creation_timestamp, bundle.creation_timestamp);
        assert_eq!(parsed.sequence_number, bundle.sequence_number);
        assert_eq!(parsed.lifetime_us, bundle.lifetime_us);
        assert_eq!(parsed.payload_block().unwrap().data, b"payload bytes");
    }

    #[test]
    fn fragment_min_sizes_exclude_payload_bytes() {
        let mut bundle = sample_bundle();
        bundle.processing_flags = ProcessingFlags::default().with(ProcessingFlags::IS_FRAGMENT);
        bundle.fragment_offset = 0;
        bundle.total_adu_length = 100;

        let first = first_fragment_min_size(&bundle);
        let mid = mid_fragment_min_size(&bundle);
        let last = last_fragment_min_size(&bundle);
        let full = serialized_size(&bundle);

        assert!(first < full);
        assert!(mid <= first);
        assert!(last <= full);
    }
}
