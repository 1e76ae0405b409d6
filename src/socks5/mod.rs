//! SOCKS5 (RFC 1928) on top of the `socksv5` framing, and the reply code table.
//!
//! Only the "no authentication" method and the CONNECT command are spoken,
//! on both sides: [`server`] faces local clients, [`client`] negotiates with
//! each upstream hop.

pub mod client;
pub mod server;

use std::fmt;

use socksv5::v5::SocksV5RequestStatus;

/// REP field of a SOCKS5 reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReplyCode {
    Succeeded,
    GeneralFailure,
    ConnectionNotAllowed,
    NetworkUnreachable,
    HostUnreachable,
    ConnectionRefused,
    TtlExpired,
    CommandNotSupported,
    AddressTypeNotSupported,
    Unassigned(u8),
}

impl From<u8> for ReplyCode {
    fn from(code: u8) -> Self {
        match SocksV5RequestStatus::from_u8(code) {
            Some(status) => status.into(),
            None => Self::Unassigned(code),
        }
    }
}

impl From<ReplyCode> for u8 {
    fn from(code: ReplyCode) -> u8 {
        match code {
            ReplyCode::Unassigned(other) => other,
            known => SocksV5RequestStatus::from(known).to_u8(),
        }
    }
}

impl From<SocksV5RequestStatus> for ReplyCode {
    fn from(status: SocksV5RequestStatus) -> Self {
        match status {
            SocksV5RequestStatus::Success => Self::Succeeded,
            SocksV5RequestStatus::ServerFailure => Self::GeneralFailure,
            SocksV5RequestStatus::ConnectionNotAllowed => Self::ConnectionNotAllowed,
            SocksV5RequestStatus::NetworkUnreachable => Self::NetworkUnreachable,
            SocksV5RequestStatus::HostUnreachable => Self::HostUnreachable,
            SocksV5RequestStatus::ConnectionRefused => Self::ConnectionRefused,
            SocksV5RequestStatus::TtlExpired => Self::TtlExpired,
            SocksV5RequestStatus::CommandNotSupported => Self::CommandNotSupported,
            SocksV5RequestStatus::AddrtypeNotSupported => Self::AddressTypeNotSupported,
        }
    }
}

impl From<ReplyCode> for SocksV5RequestStatus {
    fn from(code: ReplyCode) -> Self {
        match code {
            ReplyCode::Succeeded => Self::Success,
            ReplyCode::GeneralFailure => Self::ServerFailure,
            ReplyCode::ConnectionNotAllowed => Self::ConnectionNotAllowed,
            ReplyCode::NetworkUnreachable => Self::NetworkUnreachable,
            ReplyCode::HostUnreachable => Self::HostUnreachable,
            ReplyCode::ConnectionRefused => Self::ConnectionRefused,
            ReplyCode::TtlExpired => Self::TtlExpired,
            ReplyCode::CommandNotSupported => Self::CommandNotSupported,
            ReplyCode::AddressTypeNotSupported => Self::AddrtypeNotSupported,
            ReplyCode::Unassigned(other) => {
                log::warn!("reply code {other:#04x} cannot be sent, using general failure");
                Self::ServerFailure
            }
        }
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Succeeded => "succeeded",
            Self::GeneralFailure => "general SOCKS server failure",
            Self::ConnectionNotAllowed => "connection not allowed by ruleset",
            Self::NetworkUnreachable => "network unreachable",
            Self::HostUnreachable => "host unreachable",
            Self::ConnectionRefused => "connection refused",
            Self::TtlExpired => "TTL expired",
            Self::CommandNotSupported => "command not supported",
            Self::AddressTypeNotSupported => "address type not supported",
            Self::Unassigned(code) => return write!(f, "unassigned reply code {code:#04x}"),
        };
        f.write_str(text)
    }
}
