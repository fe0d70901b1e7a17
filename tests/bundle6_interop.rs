// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end parse -> serialize -> parse round trip spanning the
//! dictionary, parser, and serializer modules together (§8).

use dtncore::bundle::{
    calculate_dict, serialize, serialized_size, Block, BlockFlags, Bundle, Bundle6Parser, EidRef,
    ProcessingFlags,
};

fn fragment_with_all_four_eids() -> Bundle {
    Bundle {
        protocol_version: 6,
        processing_flags: ProcessingFlags::default()
            .with(ProcessingFlags::IS_FRAGMENT)
            .with(ProcessingFlags::CUSTODY_REQUESTED),
        destination: Some("dtn://dst".to_string()),
        source: Some("dtn://src".to_string()),
        report_to: Some("dtn://report".to_string()),
        current_custodian: Some("dtn://custodian".to_string()),
        creation_timestamp: 700_000_000,
        sequence_number: 42,
        lifetime_us: 3_600_000_000,
        fragment_offset: 10,
        total_adu_length: 100,
        blocks: vec![
            Block::new(5, BlockFlags::default().with(BlockFlags::MUST_BE_REPLICATED), vec![0xaa, 0xbb]),
            Block::payload(b"hello, dtn".to_vec(), true),
        ],
    }
}

#[test]
fn fragmented_bundle_with_all_four_eids_round_trips() {
    let bundle = fragment_with_all_four_eids();
    let wire = serialize(&bundle);
    assert_eq!(wire.len(), serialized_size(&bundle));

    let mut parser = Bundle6Parser::new();
    let (consumed, parsed) = parser.feed(&wire).unwrap();
    assert_eq!(consumed, wire.len());
    let parsed = parsed.expect("bundle should complete");

    // §8: parse(serialize(B)) = B modulo dictionary layout (offsets aren't
    // part of the in-memory Bundle, so direct equality is exact here).
    assert_eq!(parsed, bundle);
}

#[test]
fn feeding_the_wire_one_byte_at_a_time_yields_the_same_bundle() {
    let bundle = fragment_with_all_four_eids();
    let wire = serialize(&bundle);

    let mut parser = Bundle6Parser::new();
    let mut completed = None;
    for &byte in &wire {
        let (_, maybe_bundle) = parser.feed(&[byte]).unwrap();
        if maybe_bundle.is_some() {
            completed = maybe_bundle;
        }
    }

    assert_eq!(completed.expect("bundle should complete"), bundle);
}

#[test]
fn feeding_the_wire_split_at_an_arbitrary_midpoint_yields_the_same_bundle() {
    let bundle = fragment_with_all_four_eids();
    let wire = serialize(&bundle);
    let midpoint = wire.len() / 3;

    let mut parser = Bundle6Parser::new();
    let (first_consumed, first_bundle) = parser.feed(&wire[..midpoint]).unwrap();
    assert_eq!(first_consumed, midpoint);
    assert!(first_bundle.is_none(), "a bundle spanning the whole wire can't complete at the midpoint");
    let (second_consumed, second_bundle) = parser.feed(&wire[midpoint..]).unwrap();
    assert_eq!(first_consumed + second_consumed, wire.len());

    assert_eq!(second_bundle.expect("bundle should complete"), bundle);
}

#[test]
fn destination_only_bundle_matches_the_documented_dictionary_layout() {
    let bundle = Bundle {
        protocol_version: 6,
        processing_flags: ProcessingFlags::default(),
        destination: Some("dtn://dst".to_string()),
        source: None,
        report_to: None,
        current_custodian: None,
        creation_timestamp: 0,
        sequence_number: 0,
        lifetime_us: 3_600_000_000,
        fragment_offset: 0,
        total_adu_length: 0,
        blocks: vec![Block::payload(b"hello".to_vec(), true)],
    };

    let desc = calculate_dict(&bundle);
    assert_eq!(desc.destination.scheme_offset, 0);
    assert_eq!(desc.destination.ssp_offset, 4);
    assert_eq!(desc.dict_length, 32);

    let wire = serialize(&bundle);
    let mut parser = Bundle6Parser::new();
    let (_, parsed) = parser.feed(&wire).unwrap();
    let parsed = parsed.expect("bundle should complete");
    assert_eq!(parsed.source, None);
    assert_eq!(parsed.report_to, None);
    assert_eq!(parsed.current_custodian, None);
}

#[test]
fn a_block_eid_reference_round_trips_through_the_dictionary() {
    let mut bundle = fragment_with_all_four_eids();
    bundle.blocks.insert(
        0,
        Block {
            block_type: 9,
            flags: BlockFlags::default().with(BlockFlags::HAS_EID_REF_FIELD),
            data: vec![0x01],
            eid_refs: vec![EidRef { scheme: "dtn".to_string(), ssp: "//relay".to_string() }],
        },
    );

    let wire = serialize(&bundle);
    let mut parser = Bundle6Parser::new();
    let (_, parsed) = parser.feed(&wire).unwrap();
    let parsed = parsed.expect("bundle should complete");
    assert_eq!(parsed, bundle);
}
