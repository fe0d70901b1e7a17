// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Endpoint Identifier (EID) validation.
//!
//! An EID is a `scheme:ssp` string. Only `dtn` and `ipn` schemes are
//! recognized; `ipn` additionally requires the SSP to parse as `<u64>.<u64>`.
//! `dtn:none` is the distinguished null-endpoint sentinel used wherever the
//! wire format permits an absent EID (§3).

/// The distinguished "no endpoint" EID.
pub const NONE: &str = "dtn:none";

/// Validate `eid` against the `scheme:ssp` grammar (§3).
///
/// `dtn:none` always validates. For any other `dtn:` EID the SSP is
/// unconstrained. For `ipn:` EIDs the SSP must be `<u64>.<u64>`.
///
/// # Errors
///
/// Returns `Err` with a human-readable reason on any grammar violation.
pub fn validate(eid: &str) -> Result<(), &'static str> {
    if eid == NONE {
        return Ok(());
    }
    let Some((scheme, ssp)) = eid.split_once(':') else {
        return Err("EID missing ':' separator");
    };
    if scheme.contains(':') {
        return Err("EID scheme must not contain ':'");
    }
    match scheme {
        "dtn" => Ok(()),
        "ipn" => validate_ipn_ssp(ssp),
        _ => Err("EID scheme must be 'dtn' or 'ipn'"),
    }
}

fn validate_ipn_ssp(ssp: &str) -> Result<(), &'static str> {
    let (node, service) = ssp.split_once('.').ok_or("ipn SSP must be '<u64>.<u64>'")?;
    node.parse::<u64>().map_err(|_| "ipn node number is not a valid u64")?;
    service
        .parse::<u64>()
        .map_err(|_| "ipn service number is not a valid u64")?;
    Ok(())
}

/// Split `eid` into `(scheme, ssp)`, stripping the sentinel's meaning: a
/// `None` caller-side EID is normalized to `dtn:none` first (§3).
///
/// Assumes `eid` already validated by [`validate`].
#[must_use]
pub fn scheme_and_ssp(eid: &str) -> (&str, &str) {
    eid.split_once(':').unwrap_or(("dtn", "none"))
}

/// Normalize an `Option<String>`-shaped EID to its wire-level string form:
/// `None` becomes `dtn:none` (§3, §9).
#[must_use]
pub fn normalize(eid: Option<&str>) -> &str {
    eid.unwrap_or(NONE)
}
