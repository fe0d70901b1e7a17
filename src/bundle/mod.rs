// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bundle Protocol v6 (RFC 5050) in-memory data model (§3).
//!
//! ```text
//! +-----------------------------------------------------------+
//! |                          Bundle                            |
//! |  primary fields (version, flags, timestamps, 4 EIDs, ...)  |
//! |  +-------------------------------------------------------+ |
//! |  |  Block[0]  ...  Block[n-1] (payload block is last,    | |
//! |  |                 LAST_BLOCK set on the last block)      | |
//! |  +-------------------------------------------------------+ |
//! +-----------------------------------------------------------+
//! ```

pub mod dictionary;
pub mod parser;
pub mod serializer;

pub use dictionary::{calculate_dict, serialize_dict, DictDescriptor, EidOffsets};
pub use parser::{Bundle6Parser, ParserStatus};
pub use serializer::{
    first_fragment_min_size, last_fragment_min_size, mid_fragment_min_size, serialize,
    serialized_size,
};

/// Block-type byte identifying the payload block (§3).
pub const BLOCK_TYPE_PAYLOAD: u8 = 1;

// ============================================================================
// Processing flags (primary block)
// ============================================================================

/// Primary-block processing flags (§3). Stored as a plain bitset over `u64`
/// so the RFC 5050 bit positions line up directly with the SDNV on the wire;
/// only the low 19 bits are meaningful here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessingFlags(pub u64);

impl ProcessingFlags {
    pub const IS_FRAGMENT: u64 = 1 << 0;
    pub const ADMIN_RECORD: u64 = 1 << 1;
    pub const NO_FRAGMENT: u64 = 1 << 2;
    pub const CUSTODY_REQUESTED: u64 = 1 << 3;
    pub const SINGLETON_ENDPOINT: u64 = 1 << 4;
    pub const ACK_REQUESTED: u64 = 1 << 5;
    pub const NORMAL_PRIORITY: u64 = 1 << 7;
    pub const EXPEDITED_PRIORITY: u64 = 1 << 8;
    pub const REPORT_RECEPTION: u64 = 1 << 14;
    pub const REPORT_CUSTODY: u64 = 1 << 15;
    pub const REPORT_FORWARDING: u64 = 1 << 16;
    pub const REPORT_DELIVERY: u64 = 1 << 17;
    pub const REPORT_DELETION: u64 = 1 << 18;

    /// All bits defined in the RFC 5050 flag set; used to mask out any
    /// future/reserved bits before serialization (§4.D).
    pub const RFC5050_MASK: u64 = Self::IS_FRAGMENT
        | Self::ADMIN_RECORD
        | Self::NO_FRAGMENT
        | Self::CUSTODY_REQUESTED
        | Self::SINGLETON_ENDPOINT
        | Self::ACK_REQUESTED
        | Self::NORMAL_PRIORITY
        | Self::EXPEDITED_PRIORITY
        | Self::REPORT_RECEPTION
        | Self::REPORT_CUSTODY
        | Self::REPORT_FORWARDING
        | Self::REPORT_DELIVERY
        | Self::REPORT_DELETION;

    #[must_use]
    pub fn contains(self, bit: u64) -> bool {
        self.0 & bit != 0
    }

    #[must_use]
    pub fn with(self, bit: u64) -> Self {
        Self(self.0 | bit)
    }

    #[must_use]
    pub fn masked(self) -> Self {
        Self(self.0 & Self::RFC5050_MASK)
    }
}

// ============================================================================
// Block flags
// ============================================================================

/// Canonical-block processing flags (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockFlags(pub u32);

impl BlockFlags {
    pub const HAS_EID_REF_FIELD: u32 = 1 << 6;
    pub const MUST_BE_REPLICATED: u32 = 1 << 0;
    pub const LAST_BLOCK: u32 = 1 << 3;

    #[must_use]
    pub fn contains(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    #[must_use]
    pub fn with(self, bit: u32) -> Self {
        Self(self.0 | bit)
    }
}

/// A reference, within a canonical block, to one of the four fixed EID slots
/// or to a dictionary-backed `(scheme, ssp)` pair carried alongside the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EidRef {
    pub scheme: String,
    pub ssp: String,
}

/// A single canonical block (§3). The payload block (`block_type ==
/// BLOCK_TYPE_PAYLOAD`) must be the last block in a valid bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub block_type: u8,
    pub flags: BlockFlags,
    pub data: Vec<u8>,
    pub eid_refs: Vec<EidRef>,
}

impl Block {
    #[must_use]
    pub fn new(block_type: u8, flags: BlockFlags, data: Vec<u8>) -> Self {
        Self {
            block_type,
            flags,
            data,
            eid_refs: Vec::new(),
        }
    }

    #[must_use]
    pub fn payload(data: Vec<u8>, last: bool) -> Self {
        let flags = if last {
            BlockFlags::default().with(BlockFlags::LAST_BLOCK)
        } else {
            BlockFlags::default()
        };
        Self::new(BLOCK_TYPE_PAYLOAD, flags, data)
    }

    #[must_use]
    pub fn is_payload(&self) -> bool {
        self.block_type == BLOCK_TYPE_PAYLOAD
    }
}

/// An in-memory bundle (§3).
///
/// EIDs are stored as `Option<String>`; `None` means the wire-level
/// `"dtn:none"` sentinel (§3, §9) and is normalized to that string at both
/// parse and serialize boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub protocol_version: u8,
    pub processing_flags: ProcessingFlags,
    pub destination: Option<String>,
    pub source: Option<String>,
    pub report_to: Option<String>,
    pub current_custodian: Option<String>,
    pub creation_timestamp: u64,
    pub sequence_number: u64,
    /// Lifetime in **microseconds** (§3: stored internally in microseconds,
    /// serialized in seconds on the wire).
    pub lifetime_us: u64,
    pub fragment_offset: u32,
    pub total_adu_length: u32,
    pub blocks: Vec<Block>,
}

impl Bundle {
    /// `true` iff this bundle satisfies the block-sequence invariants of §3:
    /// exactly one payload block, which is the last block, and exactly one
    /// block has `LAST_BLOCK` set, which is also the last block.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let payload_count = self.blocks.iter().filter(|b| b.is_payload()).count();
        if payload_count != 1 {
            return false;
        }
        let Some(last) = self.blocks.last() else {
            return false;
        };
        if !last.is_payload() {
            return false;
        }
        let last_block_flagged = self
            .blocks
            .iter()
            .filter(|b| b.flags.contains(BlockFlags::LAST_BLOCK))
            .count();
        last_block_flagged == 1 && last.flags.contains(BlockFlags::LAST_BLOCK)
    }

    /// The single payload block, if the bundle currently has one.
    #[must_use]
    pub fn payload_block(&self) -> Option<&Block> {
        self.blocks.iter().find(|b| b.is_payload())
    }

    #[must_use]
    pub fn is_fragment(&self) -> bool {
        self.processing_flags.contains(ProcessingFlags::IS_FRAGMENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_bundle() -> Bundle {
        Bundle {
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
        }
    }

    #[test]
    fn single_payload_block_is_valid() {
        assert!(minimal_bundle().is_valid());
    }

    #[test]
    fn missing_payload_block_is_invalid() {
        let mut b = minimal_bundle();
        b.blocks.clear();
        assert!(!b.is_valid());
    }

    #[test]
    fn payload_not_last_is_invalid() {
        let mut b = minimal_bundle();
        b.blocks.push(Block::new(
            5,
            BlockFlags::default().with(BlockFlags::LAST_BLOCK),
            vec![],
        ));
        // Now the non-payload trailing block has LAST_BLOCK, payload doesn't.
        b.blocks[0].flags = BlockFlags::default();
        assert!(!b.is_valid());
    }

    #[test]
    fn two_payload_blocks_is_invalid() {
        let mut b = minimal_bundle();
        b.blocks.insert(0, Block::payload(b"extra".to_vec(), false));
        assert!(!b.is_valid());
    }
}
