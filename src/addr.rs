//! Destination addresses as carried in SOCKS requests and replies.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use socksv5::v5::SocksV5Host;

use crate::error::ProtocolError;

const MAX_DOMAIN_LEN: usize = 255;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TargetAddress {
    Ip(SocketAddr),
    Domain(String, u16),
}

impl TargetAddress {
    /// `host` may be an IPv4/IPv6 literal (brackets allowed) or a domain name.
    pub fn from_host_port(host: &str, port: u16) -> Result<Self, ProtocolError> {
        let bare = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return Ok(Self::Ip(SocketAddr::new(ip, port)));
        }

        validate_domain(host)?;
        Ok(Self::Domain(host.to_string(), port))
    }

    /// `0.0.0.0:0`, used as BND.ADDR when nothing more specific may be told.
    pub fn unspecified() -> Self {
        Self::Ip(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)))
    }

    pub fn port(&self) -> u16 {
        match self {
            Self::Ip(addr) => addr.port(),
            Self::Domain(_, port) => *port,
        }
    }

    pub fn host(&self) -> String {
        match self {
            Self::Ip(addr) => addr.ip().to_string(),
            Self::Domain(name, _) => name.clone(),
        }
    }

    /// Decodes a DST/BND pair. Domain names must be non-empty UTF-8 without NUL.
    pub fn from_socks5(host: SocksV5Host, port: u16) -> Result<Self, ProtocolError> {
        Ok(match host {
            SocksV5Host::Ipv4(ip) => Self::Ip(SocketAddr::V4(SocketAddrV4::new(ip.into(), port))),
            SocksV5Host::Ipv6(ip) => {
                Self::Ip(SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::from(ip), port, 0, 0)))
            }
            SocksV5Host::Domain(name) => {
                let name = String::from_utf8(name).map_err(|_| ProtocolError::InvalidDomain)?;
                validate_domain(&name)?;
                Self::Domain(name, port)
            }
        })
    }

    /// The host half of the wire form; the port travels separately.
    ///
    /// Domains are checked here because the encoder cannot express one longer
    /// than 255 bytes.
    pub fn to_socks5(&self) -> Result<SocksV5Host, ProtocolError> {
        Ok(match self {
            Self::Ip(SocketAddr::V4(addr)) => SocksV5Host::Ipv4(addr.ip().octets()),
            Self::Ip(SocketAddr::V6(addr)) => SocksV5Host::Ipv6(addr.ip().octets()),
            Self::Domain(name, _) => {
                validate_domain(name)?;
                SocksV5Host::Domain(name.as_bytes().to_vec())
            }
        })
    }
}

impl From<SocketAddr> for TargetAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::Ip(addr)
    }
}

impl fmt::Display for TargetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(addr) => write!(f, "{addr}"),
            Self::Domain(name, port) => write!(f, "{name}:{port}"),
        }
    }
}

pub(crate) fn validate_domain(name: &str) -> Result<(), ProtocolError> {
    if name.is_empty() || name.contains('\0') {
        return Err(ProtocolError::InvalidDomain);
    }
    if name.len() > MAX_DOMAIN_LEN {
        return Err(ProtocolError::FieldTooLong(MAX_DOMAIN_LEN));
    }
    Ok(())
}
