// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Unsegmented CCSDS-epoch time code, as carried in an SPP secondary header
//! (§4.E).
//!
//! A DTN timestamp (seconds since the DTN epoch, 2000-01-01) plus a 32-bit
//! counter is mapped onto a CCSDS "unsegmented" time code: an integer
//! seconds-since-CCSDS-epoch base unit of 1-7 octets, followed by a
//! fractional part of 0-6 octets carrying `counter` shifted into its
//! high-order bits. An optional 1-2 byte P-field precedes the value and
//! encodes the time-code type and both octet counts.

use std::fmt;

/// Seconds between the CCSDS epoch (1958-01-01) and the DTN epoch
/// (2000-01-01).
pub const CCSDS_EPOCH_OFFSET: u64 = 1_325_376_000;

const BASE_UNIT_LONGP_THRESHOLD: u8 = 4;
const FRACTIONAL_LONGP_THRESHOLD: u8 = 3;

/// P-field time-code identifier for the unsegmented CCSDS-epoch format
/// (CCSDS 301.0-B), the only format this crate implements.
const TC_TYPE_UNSEGMENTED_CCSDS_EPOCH: u8 = 0x1;

/// Octet layout of an unsegmented time code (§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsegmentedConfig {
    /// Integer-seconds octets, `1..=7`.
    pub base_unit_octets: u8,
    /// Fractional-second octets, `0..=6`.
    pub fractional_octets: u8,
}

impl UnsegmentedConfig {
    fn base_unit_wide(self) -> bool {
        self.base_unit_octets > BASE_UNIT_LONGP_THRESHOLD
    }

    fn fractional_wide(self) -> bool {
        self.fractional_octets > FRACTIONAL_LONGP_THRESHOLD
    }

    fn needs_second_p_octet(self) -> bool {
        self.base_unit_wide() || self.fractional_wide()
    }

    fn p_field_len(self) -> usize {
        if self.needs_second_p_octet() {
            2
        } else {
            1
        }
    }

    fn data_len(self) -> usize {
        self.base_unit_octets as usize + self.fractional_octets as usize
    }
}

/// A time code as configured for one SPP link: the octet layout plus whether
/// a P-field precedes it on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimecodeContext {
    pub with_p_field: bool,
    pub config: UnsegmentedConfig,
}

impl TimecodeContext {
    /// Total wire size of this time code, P-field included if configured.
    #[must_use]
    pub fn size(&self) -> usize {
        self.config.data_len() + if self.with_p_field { self.config.p_field_len() } else { 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimecodeError {
    /// Fewer bytes were supplied than the configured layout needs.
    Truncated,
    /// A P-field byte named a time-code type this crate does not implement.
    UnsupportedType(u8),
    /// The decoded CCSDS-epoch value was before `CCSDS_EPOCH_OFFSET`, so it
    /// cannot be represented as a DTN timestamp.
    BeforeDtnEpoch,
}

impl fmt::Display for TimecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "time code truncated"),
            Self::UnsupportedType(t) => write!(f, "unsupported time code type 0x{t:x}"),
            Self::BeforeDtnEpoch => write!(f, "time code value precedes the DTN epoch"),
        }
    }
}

impl std::error::Error for TimecodeError {}

fn serialize_preamble(config: UnsegmentedConfig, out: &mut Vec<u8>) {
    let base_wide = config.base_unit_wide();
    let frac_wide = config.fractional_wide();
    let need_second = base_wide || frac_wide;

    let mut byte0 = TC_TYPE_UNSEGMENTED_CCSDS_EPOCH << 4;
    if need_second {
        byte0 |= 0x80;
    }
    byte0 |= if base_wide { 0x0c } else { (config.base_unit_octets - 1) << 2 };
    byte0 |= if frac_wide { 0x03 } else { config.fractional_octets };
    out.push(byte0);

    if !need_second {
        return;
    }
    let mut byte1 = 0u8;
    if base_wide {
        byte1 |= (config.base_unit_octets - BASE_UNIT_LONGP_THRESHOLD) << 5;
    }
    if frac_wide {
        byte1 |= (config.fractional_octets - FRACTIONAL_LONGP_THRESHOLD) << 2;
    }
    out.push(byte1);
}

/// Parse a P-field (1 or 2 bytes) into the layout it describes. Returns the
/// layout and the number of bytes consumed.
///
/// # Errors
///
/// Returns `TimecodeError::Truncated` if `bytes` ends before a signaled
/// second octet, or `UnsupportedType` for any type other than the
/// unsegmented CCSDS-epoch format.
pub fn parse_preamble(bytes: &[u8]) -> Result<(UnsegmentedConfig, usize), TimecodeError> {
    let &byte0 = bytes.first().ok_or(TimecodeError::Truncated)?;
    let has_second = byte0 & 0x80 != 0;
    let tc_type = (byte0 & 0x70) >> 4;
    if tc_type != TC_TYPE_UNSEGMENTED_CCSDS_EPOCH {
        return Err(TimecodeError::UnsupportedType(tc_type));
    }

    let mut base_unit_octets = ((byte0 & 0x0c) >> 2) + 1;
    let mut fractional_octets = byte0 & 0x03;
    let mut consumed = 1;

    if has_second {
        let &byte1 = bytes.get(1).ok_or(TimecodeError::Truncated)?;
        base_unit_octets += (byte1 & 0x60) >> 5;
        fractional_octets += (byte1 & 0x1c) >> 2;
        consumed = 2;
    }

    Ok((UnsegmentedConfig { base_unit_octets, fractional_octets }, consumed))
}

/// Serialize `(timestamp, counter)` into `ctx`'s configured layout,
/// including the P-field if `ctx.with_p_field`.
#[must_use]
pub fn serialize(ctx: &TimecodeContext, timestamp: u64, counter: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(ctx.size());
    if ctx.with_p_field {
        serialize_preamble(ctx.config, &mut out);
    }

    let seconds = timestamp + CCSDS_EPOCH_OFFSET;
    let seconds_be = seconds.to_be_bytes();
    out.extend_from_slice(&seconds_be[8 - ctx.config.base_unit_octets as usize..]);

    let fractional = u64::from(counter) << 32;
    let fractional_be = fractional.to_be_bytes();
    out.extend_from_slice(&fractional_be[..ctx.config.fractional_octets as usize]);

    out
}

/// Decode `(timestamp, counter)` out of `bytes`, which must hold at least
/// `config.data_len()` bytes of base-unit then fractional octets (no
/// P-field; parse that separately with [`parse_preamble`] first).
///
/// # Errors
///
/// Returns `TimecodeError::Truncated` if `bytes` is too short, or
/// `BeforeDtnEpoch` if the decoded value precedes `CCSDS_EPOCH_OFFSET`.
pub fn parse(config: UnsegmentedConfig, bytes: &[u8]) -> Result<(u64, u32), TimecodeError> {
    if bytes.len() < config.data_len() {
        return Err(TimecodeError::Truncated);
    }

    let base_len = config.base_unit_octets as usize;
    let mut seconds_buf = [0u8; 8];
    seconds_buf[8 - base_len..].copy_from_slice(&bytes[..base_len]);
    let seconds = u64::from_be_bytes(seconds_buf);
    let timestamp = seconds.checked_sub(CCSDS_EPOCH_OFFSET).ok_or(TimecodeError::BeforeDtnEpoch)?;

    let frac_len = config.fractional_octets as usize;
    let mut fractional_buf = [0u8; 8];
    fractional_buf[..frac_len].copy_from_slice(&bytes[base_len..base_len + frac_len]);
    let fractional = u64::from_be_bytes(fractional_buf);
    let counter = (fractional >> 32) as u32;

    Ok((timestamp, counter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsegmented_no_p_field_matches_spec_scenario() {
        let config = UnsegmentedConfig { base_unit_octets: 4, fractional_octets: 4 };
        let ctx = TimecodeContext { with_p_field: false, config };
        let wire = serialize(&ctx, 577_279_245, 0x000676AB);
        assert_eq!(wire, vec![0x71, 0x68, 0x37, 0x0d, 0x00, 0x06, 0x76, 0xab]);

        let (ts, _counter) = parse(config, &wire).unwrap();
        assert_eq!(ts, 577_279_245);
    }

    #[test]
    fn round_trip_with_p_field_and_narrow_octets() {
        let config = UnsegmentedConfig { base_unit_octets: 4, fractional_octets: 2 };
        let ctx = TimecodeContext { with_p_field: true, config };
        let wire = serialize(&ctx, 1_000, 42);

        let (parsed_config, preamble_len) = parse_preamble(&wire).unwrap();
        assert_eq!(parsed_config, config);
        let (ts, counter) = parse(parsed_config, &wire[preamble_len..]).unwrap();
        assert_eq!(ts, 1_000);
        assert_eq!(counter, 42);
    }

    #[test]
    fn round_trip_with_wide_octets_needs_second_p_octet() {
        let config = UnsegmentedConfig { base_unit_octets: 6, fractional_octets: 5 };
        let ctx = TimecodeContext { with_p_field: true, config };
        assert_eq!(ctx.config.p_field_len(), 2);
        let wire = serialize(&ctx, 123_456, 7);

        let (parsed_config, preamble_len) = parse_preamble(&wire).unwrap();
        assert_eq!(preamble_len, 2);
        assert_eq!(parsed_config, config);
        let (ts, counter) = parse(parsed_config, &wire[preamble_len..]).unwrap();
        assert_eq!(ts, 123_456);
        assert_eq!(counter, 7);
    }

    #[test]
    fn value_before_dtn_epoch_is_rejected() {
        let config = UnsegmentedConfig { base_unit_octets: 4, fractional_octets: 0 };
        let mut seconds_buf = [0u8; 8];
        seconds_buf[4..].copy_from_slice(&0u32.to_be_bytes());
        let bytes = &seconds_buf[4..];
        assert_eq!(parse(config, bytes).unwrap_err(), TimecodeError::BeforeDtnEpoch);
    }

    #[test]
    fn unsupported_preamble_type_is_rejected() {
        let err = parse_preamble(&[0x50]).unwrap_err();
        assert_eq!(err, TimecodeError::UnsupportedType(0x5));
    }
}
