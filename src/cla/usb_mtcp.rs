// SPDX-License-Identifier: Apache-2.0 OR MIT

//! USB-MTCP (§4.F): the same wire framing as [`super::mtcp`], driven over a
//! USB byte-queue adapter instead of a TCP socket.
//!
//! The framer itself is identical to MTCP — same CBOR byte-string header,
//! same unbounded MBS — so this module re-exports [`MtcpFramer`] rather than
//! duplicating it. The only difference the manager (§4.H) needs to account
//! for is that a USB-MTCP link's `reader`/`writer` come from a bounded
//! per-direction byte queue supplied by the USB driver rather than a
//! `TcpStream`; [`link::Link::spawn`](super::link::Link::spawn) is already
//! generic over any `Read + Send` / `Write + Send` pair, so no separate link
//! wiring is needed either.

pub use super::mtcp::MtcpFramer as UsbMtcpFramer;
