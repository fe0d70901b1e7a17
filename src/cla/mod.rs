// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Convergence-Layer Adapters (§4.F-§4.H).
//!
//! ```text
//! Manager -> per-contact management task -> Link (RX worker + TX worker)
//!                                              |
//!                                         dyn Framer
//! ```

pub mod cbor;
pub mod config;
pub mod crc;
pub mod link;
pub mod manager;
pub mod mtcp;
pub mod tcpclv3;
pub mod tcpspp;
pub mod usb_mtcp;

use crate::error::{FramerError, LinkIoError};

/// First byte of a Bundle Protocol v6 primary block (§3, §6).
pub const BUNDLE6_MAGIC: u8 = 0x06;
/// First byte of a CBOR indefinite-length array, which is how BPv7 bundles
/// begin on the wire (§9 design notes: "the standard CBOR indefinite-length
/// array start that v7 bundles open with").
pub const BUNDLE7_MAGIC: u8 = 0x9f;

/// Which bundle-protocol-version parser a framed payload should be routed to
/// (§4.G step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadType {
    Unknown,
    Bundle6,
    Bundle7,
}

/// Peek the first byte of a framed payload and dispatch to the matching
/// bundle-protocol-version parser (§4.H "bundle-version discriminator").
///
/// Returns `None` if `first_byte` matches neither magic, signaling the RX
/// worker to resynchronize.
#[must_use]
pub fn discriminate_bundle_version(first_byte: u8) -> Option<PayloadType> {
    match first_byte {
        BUNDLE6_MAGIC => Some(PayloadType::Bundle6),
        BUNDLE7_MAGIC => Some(PayloadType::Bundle7),
        _ => None,
    }
}

/// Outcome of feeding bytes to a framer (§4.F, §4.G).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramerProgress {
    /// `consumed` header/control bytes were accepted; no payload chunk
    /// started yet.
    Consumed(usize),
    /// `consumed` bytes were accepted and a payload chunk of `length` bytes
    /// begins immediately after them.
    PayloadStarts { consumed: usize, length: usize },
}

/// The common contract every CLA framer implements (§4.F).
///
/// A framer is owned by exactly one link and is not `Send` across links; the
/// link engine (§4.G) drives it from a single RX worker thread and a single
/// TX worker thread.
pub trait Framer {
    /// Feed framer-control bytes already read off the socket. Returns how
    /// many bytes were consumed, and whether a payload chunk starts right
    /// after them. A framer MUST consume at least one byte per call when it
    /// returns `Consumed`/`PayloadStarts`, or signal desynchronization by
    /// returning an error — it must never consume zero bytes and report no
    /// progress, which would spin the RX worker.
    ///
    /// # Errors
    ///
    /// Returns `FramerError` on a malformed header or unexpected framing
    /// byte; the caller resynchronizes by calling `reset_parsers`.
    fn forward_to_specific_parser(&mut self, bytes: &[u8]) -> Result<FramerProgress, FramerError>;

    /// Discard any in-progress framing state and wait for a fresh frame.
    fn reset_parsers(&mut self);

    /// Begin transmitting a frame whose payload will be `length` bytes.
    ///
    /// # Errors
    ///
    /// Returns `LinkIoError` if the header cannot be written to `io`.
    fn begin_packet(&mut self, io: &mut dyn std::io::Write, length: usize) -> Result<(), LinkIoError>;

    /// Write part (or all) of the frame's payload. May be called multiple
    /// times per packet.
    ///
    /// # Errors
    ///
    /// Returns `LinkIoError` if `bytes` cannot be written to `io`.
    fn send_packet_data(&mut self, io: &mut dyn std::io::Write, bytes: &[u8]) -> Result<(), LinkIoError>;

    /// Finish transmitting the current frame (e.g. write a trailer).
    ///
    /// # Errors
    ///
    /// Returns `LinkIoError` if a trailer cannot be written to `io`.
    fn end_packet(&mut self, io: &mut dyn std::io::Write) -> Result<(), LinkIoError>;

    /// Maximum serialized bundle size this CLA can carry.
    fn mbs(&self) -> usize;
}

/// A readable, writable transport endpoint a framer and the link engine
/// drive (in production, a `TcpStream`; in tests, anything implementing
/// both traits).
pub trait LinkIo: std::io::Read + std::io::Write + Send {}
impl<T: std::io::Read + std::io::Write + Send> LinkIo for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminator_routes_known_magics() {
        assert_eq!(discriminate_bundle_version(0x06), Some(PayloadType::Bundle6));
        assert_eq!(discriminate_bundle_version(0x9f), Some(PayloadType::Bundle7));
        assert_eq!(discriminate_bundle_version(0xff), None);
    }
}
