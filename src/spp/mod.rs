// SPDX-License-Identifier: Apache-2.0 OR MIT

//! CCSDS Space Packet Protocol framing used by the TCPSPP convergence-layer
//! adapter (§4.E).

pub mod header;
pub mod timecode;

pub use header::{
    parse_primary_header, Context, Meta, SegmentStatus, SppError, MAX_APID, MAX_DATA_LENGTH,
    MAX_SEGMENT_NUMBER, PRIMARY_HEADER_SIZE,
};
pub use timecode::{TimecodeContext, TimecodeError, UnsegmentedConfig, CCSDS_EPOCH_OFFSET};
