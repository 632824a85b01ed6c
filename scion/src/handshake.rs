//! The startup negotiation record
//!
//! On a successful launch the plugin writes exactly one line to stdout:
//!
//! ```text
//! core-version | app-protocol-version | network | address | protocol | server-certificate
//! ```
//!
//! The certificate field is present whenever the protocol is `grpc`. Any
//! other stdout output before this line would corrupt the handshake, so the
//! runtime writes nothing else there; failures are reported as one line of
//! free text instead, which the host shows verbatim.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::error::ServeError;
use crate::transport::Endpoint;

/// Version of the handshake protocol itself. Fixed; bumped only if the line
/// format ever changes shape.
pub const CORE_PROTOCOL_VERSION: u32 = 1;

/// Well-known environment variable names of the launch contract.
pub mod env {
    /// Carries the host's client certificate for mutual TLS.
    pub const CLIENT_CERT: &str = "PLUGIN_CLIENT_CERT";
    /// Carries the protocol versions the host accepts, comma-separated.
    pub const PROTOCOL_VERSIONS: &str = "PLUGIN_PROTOCOL_VERSIONS";
}

/// The RPC protocol announced in the negotiation line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcProtocol {
    /// The pre-gRPC wire protocol, kept for host compatibility.
    Legacy,
    /// gRPC over the secured transport.
    Grpc,
}

impl RpcProtocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Legacy => "netrpc",
            Self::Grpc => "grpc",
        }
    }
}

impl fmt::Display for RpcProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RpcProtocol {
    type Err = NegotiationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "netrpc" => Ok(Self::Legacy),
            "grpc" => Ok(Self::Grpc),
            other => Err(NegotiationParseError::UnknownProtocol(other.to_string())),
        }
    }
}

/// Why a negotiation line failed to parse (the host-side view, used by
/// tests and embedding hosts).
#[derive(Debug, Error)]
pub enum NegotiationParseError {
    #[error("expected at least 5 pipe-delimited fields, found {0}")]
    FieldCount(usize),
    #[error("field {field} is not an integer: {value:?}")]
    BadInteger { field: &'static str, value: String },
    #[error("unknown network {0:?}")]
    UnknownNetwork(String),
    #[error("unknown rpc protocol {0:?}")]
    UnknownProtocol(String),
}

/// The one-line record emitted on stdout after a successful bind.
///
/// Produced exactly once and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationRecord {
    /// Always [`CORE_PROTOCOL_VERSION`].
    pub core_version: u32,
    /// The application protocol version negotiated with the host.
    pub protocol_version: u32,
    /// Where the host should dial.
    pub endpoint: Endpoint,
    /// Which RPC protocol is served there.
    pub rpc_protocol: RpcProtocol,
    /// Unpadded-base64 DER server certificate. Required for `grpc`; a
    /// missing certificate makes the session unusable even though the host
    /// will still attempt (and later fail) the secured handshake.
    pub server_certificate: Option<String>,
}

impl NegotiationRecord {
    /// Render the record as its single pipe-delimited line, without a
    /// trailing newline.
    pub fn to_line(&self) -> String {
        let mut line = format!(
            "{}|{}|{}|{}|{}",
            self.core_version,
            self.protocol_version,
            self.endpoint.network(),
            self.endpoint.address(),
            self.rpc_protocol,
        );
        if let Some(cert) = &self.server_certificate {
            line.push('|');
            line.push_str(cert);
        }
        line
    }

    /// Parse a line the way the host does.
    pub fn parse(line: &str) -> Result<Self, NegotiationParseError> {
        let fields: Vec<&str> = line.trim_end_matches('\n').split('|').collect();
        if fields.len() < 5 {
            return Err(NegotiationParseError::FieldCount(fields.len()));
        }
        let core_version = parse_u32("core version", fields[0])?;
        let protocol_version = parse_u32("protocol version", fields[1])?;
        let endpoint = Endpoint::from_fields(fields[2], fields[3])
            .ok_or_else(|| NegotiationParseError::UnknownNetwork(fields[2].to_string()))?;
        let rpc_protocol = fields[4].parse()?;
        let server_certificate = fields
            .get(5)
            .filter(|cert| !cert.is_empty())
            .map(|cert| cert.to_string());
        Ok(Self {
            core_version,
            protocol_version,
            endpoint,
            rpc_protocol,
            server_certificate,
        })
    }
}

impl fmt::Display for NegotiationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

fn parse_u32(field: &'static str, value: &str) -> Result<u32, NegotiationParseError> {
    value
        .parse()
        .map_err(|_| NegotiationParseError::BadInteger {
            field,
            value: value.to_string(),
        })
}

/// Pick the application protocol version to announce.
///
/// The host advertises the versions it accepts through an environment
/// variable; the plugin answers with the highest version both sides speak.
/// An absent or garbled advertisement falls back to the plugin's newest
/// version (old hosts predate the variable). An advertisement with no
/// overlap is a startup failure.
pub fn negotiate_protocol_version(
    supported: &[u32],
    advertised: Option<&str>,
) -> Result<u32, ServeError> {
    let newest = supported.iter().copied().max().ok_or_else(|| {
        ServeError::NoCommonVersion {
            host: Vec::new(),
            plugin: Vec::new(),
        }
    })?;
    let host: Vec<u32> = advertised
        .map(|raw| {
            raw.split(',')
                .filter_map(|v| v.trim().parse().ok())
                .collect()
        })
        .unwrap_or_default();
    if host.is_empty() {
        return Ok(newest);
    }
    host.iter()
        .copied()
        .filter(|v| supported.contains(v))
        .max()
        .ok_or_else(|| ServeError::NoCommonVersion {
            host,
            plugin: supported.to_vec(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn renders_all_six_fields() {
        let record = NegotiationRecord {
            core_version: CORE_PROTOCOL_VERSION,
            protocol_version: 6,
            endpoint: Endpoint::Tcp("127.0.0.1:51820".parse().unwrap()),
            rpc_protocol: RpcProtocol::Grpc,
            server_certificate: Some("MIIBCERT".to_string()),
        };
        assert_eq!(record.to_line(), "1|6|tcp|127.0.0.1:51820|grpc|MIIBCERT");
    }

    #[test]
    fn certificate_field_is_omitted_when_absent() {
        let record = NegotiationRecord {
            core_version: CORE_PROTOCOL_VERSION,
            protocol_version: 1,
            endpoint: Endpoint::Unix(PathBuf::from("/tmp/p.sock")),
            rpc_protocol: RpcProtocol::Legacy,
            server_certificate: None,
        };
        assert_eq!(record.to_line(), "1|1|unix|/tmp/p.sock|netrpc");
    }

    #[test]
    fn host_parser_extracts_the_documented_fields() {
        let record = NegotiationRecord::parse("1|6|tcp|127.0.0.1:51820|grpc|MIIBCERT").unwrap();
        assert_eq!(record.core_version, 1);
        assert_eq!(record.protocol_version, 6);
        assert_eq!(record.endpoint.network(), "tcp");
        assert_eq!(record.endpoint.address(), "127.0.0.1:51820");
        assert_eq!(record.rpc_protocol, RpcProtocol::Grpc);
        assert_eq!(record.server_certificate.as_deref(), Some("MIIBCERT"));
    }

    #[test]
    fn parse_round_trips_render() {
        let record = NegotiationRecord {
            core_version: 1,
            protocol_version: 3,
            endpoint: Endpoint::Unix(PathBuf::from("/tmp/plugin-9.sock")),
            rpc_protocol: RpcProtocol::Grpc,
            server_certificate: Some("QUJD".to_string()),
        };
        assert_eq!(NegotiationRecord::parse(&record.to_line()).unwrap(), record);
    }

    #[test]
    fn parser_rejects_malformed_lines() {
        assert!(matches!(
            NegotiationRecord::parse("1|6|tcp"),
            Err(NegotiationParseError::FieldCount(3))
        ));
        assert!(matches!(
            NegotiationRecord::parse("x|6|tcp|127.0.0.1:1|grpc"),
            Err(NegotiationParseError::BadInteger { .. })
        ));
        assert!(matches!(
            NegotiationRecord::parse("1|6|smoke-signal|hill|grpc"),
            Err(NegotiationParseError::UnknownNetwork(_))
        ));
        assert!(matches!(
            NegotiationRecord::parse("1|6|tcp|127.0.0.1:1|gopher"),
            Err(NegotiationParseError::UnknownProtocol(_))
        ));
    }

    #[test]
    fn negotiation_picks_highest_mutual_version() {
        assert_eq!(
            negotiate_protocol_version(&[1, 2, 3], Some("2,3,4")).unwrap(),
            3
        );
        assert_eq!(negotiate_protocol_version(&[1, 2], Some("1")).unwrap(), 1);
    }

    #[test]
    fn negotiation_falls_back_without_an_advertisement() {
        assert_eq!(negotiate_protocol_version(&[1, 2, 5], None).unwrap(), 5);
        assert_eq!(
            negotiate_protocol_version(&[4], Some("out,of,cheese")).unwrap(),
            4
        );
    }

    #[test]
    fn negotiation_fails_without_overlap() {
        let err = negotiate_protocol_version(&[1, 2], Some("7,8")).unwrap_err();
        assert!(matches!(err, ServeError::NoCommonVersion { .. }));
    }
}
