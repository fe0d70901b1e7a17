// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Parser for the CLA configuration string (§6, §4.H, §10.3).
//!
//! Grammar: `<cla_name>:<opt>(,<opt>)*(;<cla_name>:<opt>(,<opt>)*)*`. Split on
//! the outer `;`, then the inner `,`, the way
//! `core::discovery::participant::parse_seed_peers` splits its own
//! comma-separated peer list — no parser-combinator crate, since the grammar
//! is a flat delimited list.

use crate::error::ConfigError;
use std::net::Ipv4Addr;

/// One `<cla_name>:<opts>` clause, recognized and validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaConfig {
    Mtcp { addr: Ipv4Addr, port: u16 },
    Smtcp { addr: Ipv4Addr, port: u16, tcp_active: bool },
    Tcpclv3 { addr: Ipv4Addr, port: u16 },
    Tcpspp { addr: Ipv4Addr, port: u16, tcp_active: bool, apid: u16 },
    UsbOtg,
}

/// Parse the full CLA configuration string into one [`ClaConfig`] per clause.
///
/// An empty or all-whitespace string yields an empty list. Any unrecognized
/// CLA name or malformed option list fails the whole string (§6: "Unknown
/// CLA names fail the whole initialization").
///
/// # Errors
///
/// Returns [`ConfigError`] on the first invalid clause encountered.
pub fn parse(config_str: &str) -> Result<Vec<ClaConfig>, ConfigError> {
    let trimmed = config_str.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    trimmed.split(';').map(parse_clause).collect()
}

fn parse_clause(clause: &str) -> Result<ClaConfig, ConfigError> {
    let clause = clause.trim();
    let (name, opts) = clause
        .split_once(':')
        .ok_or_else(|| ConfigError::MalformedOptions(clause.to_string()))?;
    let opts: Vec<&str> = if opts.is_empty() {
        Vec::new()
    } else {
        opts.split(',').map(str::trim).collect()
    };

    match name {
        "mtcp" => parse_host_port(&opts).map(|(addr, port)| ClaConfig::Mtcp { addr, port }),
        "smtcp" => parse_smtcp(&opts),
        "tcpclv3" => parse_host_port(&opts).map(|(addr, port)| ClaConfig::Tcpclv3 { addr, port }),
        "tcpspp" => parse_tcpspp(&opts),
        "usbotg" => {
            if opts.is_empty() {
                Ok(ClaConfig::UsbOtg)
            } else {
                Err(ConfigError::MalformedOptions(clause.to_string()))
            }
        }
        other => Err(ConfigError::UnknownCla(other.to_string())),
    }
}

fn parse_host_port(opts: &[&str]) -> Result<(Ipv4Addr, u16), ConfigError> {
    let [host, port] = opts else {
        return Err(ConfigError::MalformedOptions(opts.join(",")));
    };
    let addr = host
        .parse::<Ipv4Addr>()
        .map_err(|_| ConfigError::MalformedOptions((*host).to_string()))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| ConfigError::MalformedOptions((*port).to_string()))?;
    Ok((addr, port))
}

fn parse_tcp_active(value: &str) -> Result<bool, ConfigError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(ConfigError::MalformedOptions(format!(
            "tcp_active must be 'true' or 'false', got '{other}'"
        ))),
    }
}

fn parse_smtcp(opts: &[&str]) -> Result<ClaConfig, ConfigError> {
    match opts {
        [host, port] => {
            let (addr, port) = parse_host_port(&[host, port])?;
            Ok(ClaConfig::Smtcp { addr, port, tcp_active: true })
        }
        [host, port, tcp_active] => {
            let (addr, port) = parse_host_port(&[host, port])?;
            Ok(ClaConfig::Smtcp { addr, port, tcp_active: parse_tcp_active(tcp_active)? })
        }
        _ => Err(ConfigError::MalformedOptions(opts.join(","))),
    }
}

fn parse_tcpspp(opts: &[&str]) -> Result<ClaConfig, ConfigError> {
    const DEFAULT_APID: u16 = 0;

    let (host, port, tcp_active, apid) = match opts {
        [host, port] => (*host, *port, "true", None),
        [host, port, tcp_active] => (*host, *port, *tcp_active, None),
        [host, port, tcp_active, apid] => (*host, *port, *tcp_active, Some(*apid)),
        _ => return Err(ConfigError::MalformedOptions(opts.join(","))),
    };

    let (addr, port) = parse_host_port(&[host, port])?;
    let tcp_active = parse_tcp_active(tcp_active)?;
    let apid = match apid {
        None => DEFAULT_APID,
        Some(raw) => {
            let value: u16 = raw
                .parse()
                .map_err(|_| ConfigError::MalformedOptions(raw.to_string()))?;
            if value > crate::spp::MAX_APID {
                return Err(ConfigError::MalformedOptions(format!(
                    "apid {value} exceeds maximum {}",
                    crate::spp::MAX_APID
                )));
            }
            value
        }
    };

    Ok(ClaConfig::Tcpspp { addr, port, tcp_active, apid })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_yields_no_clauses() {
        assert_eq!(parse("").unwrap(), Vec::new());
        assert_eq!(parse("   ").unwrap(), Vec::new());
    }

    #[test]
    fn parses_mtcp_and_tcpclv3() {
        let parsed = parse("mtcp:0.0.0.0,4556;tcpclv3:0.0.0.0,4556").unwrap();
        assert_eq!(
            parsed,
            vec![
                ClaConfig::Mtcp { addr: Ipv4Addr::UNSPECIFIED, port: 4556 },
                ClaConfig::Tcpclv3 { addr: Ipv4Addr::UNSPECIFIED, port: 4556 },
            ]
        );
    }

    #[test]
    fn parses_tcpspp_with_all_options() {
        let parsed = parse("tcpspp:0.0.0.0,4223,false,1").unwrap();
        assert_eq!(
            parsed,
            vec![ClaConfig::Tcpspp {
                addr: Ipv4Addr::UNSPECIFIED,
                port: 4223,
                tcp_active: false,
                apid: 1,
            }]
        );
    }

    #[test]
    fn parses_usbotg_with_no_options() {
        assert_eq!(parse("usbotg:").unwrap(), vec![ClaConfig::UsbOtg]);
    }

    #[test]
    fn unknown_cla_name_is_rejected() {
        assert_eq!(
            parse("carrier-pigeon:1,2").unwrap_err(),
            ConfigError::UnknownCla("carrier-pigeon".to_string())
        );
    }

    #[test]
    fn malformed_options_are_rejected() {
        assert!(parse("mtcp:not-an-ip,4556").is_err());
        assert!(parse("mtcp:0.0.0.0").is_err());
        assert!(parse("tcpspp:0.0.0.0,4223,maybe").is_err());
    }
}
