use std::io;
use std::time::Duration;

use socksv5::v5::SocksV5HandshakeError;
use socksv5::SocksVersionError;
use thiserror::Error;

use crate::chain::ProxyEndpoint;
use crate::socks5::ReplyCode;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Malformed or unsupported SOCKS framing, on either side of the proxy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unsupported SOCKS version {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("greeting offers no authentication methods")]
    EmptyMethodList,

    #[error("client does not offer the no-authentication method")]
    NoAcceptableAuth,

    #[error("upstream selected authentication method {0:#04x} instead of no-authentication")]
    AuthRejected(u8),

    #[error("unsupported command {0:#04x}")]
    UnsupportedCommand(u8),

    #[error("unsupported address type {0:#04x}")]
    UnsupportedAddressType(u8),

    #[error("malformed SOCKS message")]
    Malformed,

    #[error("invalid domain name")]
    InvalidDomain,

    #[error("field is longer than {0} bytes")]
    FieldTooLong(usize),
}

/// An upstream proxy refused or failed a CONNECT, or hop 1 could not be dialed.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("general SOCKS server failure")]
    GeneralFailure,

    #[error("connection not allowed by ruleset")]
    ConnectionNotAllowed,

    #[error("network unreachable")]
    NetworkUnreachable,

    #[error("host unreachable")]
    HostUnreachable,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("TTL expired")]
    TtlExpired,

    #[error("command not supported")]
    CommandNotSupported,

    #[error("address type not supported")]
    AddressTypeNotSupported,

    #[error("unassigned reply code {0:#04x}")]
    Unassigned(u8),

    #[error("SOCKS4 request rejected with code {0:#04x}")]
    Socks4Rejected(u8),

    #[error("cannot reach proxy: {0}")]
    Transport(#[source] io::Error),
}

impl ConnectError {
    /// Maps a non-zero SOCKS5 REP byte; `None` for 0x00 (succeeded).
    pub fn from_reply(code: u8) -> Option<Self> {
        Some(match ReplyCode::from(code) {
            ReplyCode::Succeeded => return None,
            ReplyCode::GeneralFailure => Self::GeneralFailure,
            ReplyCode::ConnectionNotAllowed => Self::ConnectionNotAllowed,
            ReplyCode::NetworkUnreachable => Self::NetworkUnreachable,
            ReplyCode::HostUnreachable => Self::HostUnreachable,
            ReplyCode::ConnectionRefused => Self::ConnectionRefused,
            ReplyCode::TtlExpired => Self::TtlExpired,
            ReplyCode::CommandNotSupported => Self::CommandNotSupported,
            ReplyCode::AddressTypeNotSupported => Self::AddressTypeNotSupported,
            ReplyCode::Unassigned(other) => Self::Unassigned(other),
        })
    }

    pub fn reply_code(&self) -> ReplyCode {
        match self {
            Self::GeneralFailure => ReplyCode::GeneralFailure,
            Self::ConnectionNotAllowed => ReplyCode::ConnectionNotAllowed,
            Self::NetworkUnreachable => ReplyCode::NetworkUnreachable,
            Self::HostUnreachable => ReplyCode::HostUnreachable,
            Self::ConnectionRefused => ReplyCode::ConnectionRefused,
            Self::TtlExpired => ReplyCode::TtlExpired,
            Self::CommandNotSupported => ReplyCode::CommandNotSupported,
            Self::AddressTypeNotSupported => ReplyCode::AddressTypeNotSupported,
            Self::Unassigned(_) | Self::Socks4Rejected(_) => ReplyCode::GeneralFailure,
            Self::Transport(err) => io_reply_code(err),
        }
    }

    /// Whether the same request could succeed if tried again later.
    ///
    /// Policy and capability refusals are permanent; reachability failures
    /// are not.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            Self::ConnectionNotAllowed | Self::CommandNotSupported | Self::AddressTypeNotSupported
        )
    }
}

/// Failure while building the nested tunnel, attributed to one hop.
#[derive(Error, Debug)]
#[error("hop {hop} ({endpoint}): {source}")]
pub struct TunnelError {
    /// 1-based position of the failing hop in the path.
    pub hop: usize,
    pub endpoint: ProxyEndpoint,
    #[source]
    pub source: Box<Error>,
}

impl TunnelError {
    pub fn new(hop: usize, endpoint: &ProxyEndpoint, source: Error) -> Self {
        Self {
            hop,
            endpoint: endpoint.clone(),
            source: Box::new(source),
        }
    }

    pub fn reply_code(&self) -> ReplyCode {
        self.source.reply_code()
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("connect failed: {0}")]
    Connect(#[from] ConnectError),

    #[error("tunnel failed at {0}")]
    Tunnel(#[from] TunnelError),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn timed_out(step: &str, limit: Duration) -> Self {
        Self::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{step} timed out after {limit:?}"),
        ))
    }

    /// Closest SOCKS5 reply code to report to the local client.
    pub fn reply_code(&self) -> ReplyCode {
        match self {
            Self::Protocol(ProtocolError::UnsupportedCommand(_)) => ReplyCode::CommandNotSupported,
            Self::Protocol(ProtocolError::UnsupportedAddressType(_)) => {
                ReplyCode::AddressTypeNotSupported
            }
            Self::Protocol(_) => ReplyCode::GeneralFailure,
            Self::Connect(err) => err.reply_code(),
            Self::Tunnel(err) => err.reply_code(),
            Self::Io(err) => io_reply_code(err),
        }
    }
}

impl From<SocksVersionError> for Error {
    fn from(err: SocksVersionError) -> Self {
        match err {
            SocksVersionError::InvalidVersion(version) => {
                ProtocolError::UnsupportedVersion(version).into()
            }
            SocksVersionError::Io(err) => err.into(),
        }
    }
}

impl From<SocksV5HandshakeError> for Error {
    fn from(err: SocksV5HandshakeError) -> Self {
        match err {
            SocksV5HandshakeError::InvalidVersion(version) => {
                ProtocolError::UnsupportedVersion(version).into()
            }
            // the only handshake the parser refuses is one without methods
            SocksV5HandshakeError::InvalidHandshake(_) => ProtocolError::EmptyMethodList.into(),
            SocksV5HandshakeError::Io(err) => err.into(),
        }
    }
}

/// Configuration values that cannot form a valid chain set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no proxy chains configured")]
    NoChains,

    #[error("chain has no entries")]
    EmptyChain,

    #[error("unknown proxy scheme {0:?}, expected socks5 or socks4")]
    UnknownScheme(String),

    #[error("host is empty")]
    EmptyHost,

    #[error("invalid host {0:?}")]
    InvalidHost(String),

    #[error("port 0 is not a valid proxy port")]
    ZeroPort,

    #[error("invalid listen address {0:?}, expected host:port")]
    InvalidListen(String),

    #[error("{0} timeout must be at least one second")]
    ZeroTimeout(&'static str),
}

fn io_reply_code(err: &io::Error) -> ReplyCode {
    use io::ErrorKind as k;
    match err.kind() {
        // Refused
        k::ConnectionRefused | k::ConnectionReset | k::ConnectionAborted | k::BrokenPipe => {
            ReplyCode::ConnectionRefused
        }

        // Host unreachable
        k::TimedOut => ReplyCode::HostUnreachable,

        // Not allowed
        k::PermissionDenied => ReplyCode::ConnectionNotAllowed,

        _ => ReplyCode::GeneralFailure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ProxyEndpoint, Scheme};

    #[test]
    fn reply_bytes_map_to_connect_errors() {
        assert!(ConnectError::from_reply(0x00).is_none());
        assert!(matches!(
            ConnectError::from_reply(0x05),
            Some(ConnectError::ConnectionRefused)
        ));
        assert!(matches!(
            ConnectError::from_reply(0x08),
            Some(ConnectError::AddressTypeNotSupported)
        ));
        assert!(matches!(
            ConnectError::from_reply(0x77),
            Some(ConnectError::Unassigned(0x77))
        ));
    }

    #[test]
    fn transient_and_permanent_failures_differ() {
        assert!(ConnectError::HostUnreachable.is_transient());
        assert!(ConnectError::ConnectionRefused.is_transient());
        assert!(!ConnectError::ConnectionNotAllowed.is_transient());
        assert!(!ConnectError::CommandNotSupported.is_transient());
    }

    #[test]
    fn tunnel_failures_keep_upstream_reply_code() {
        let hop = ProxyEndpoint::new(Scheme::Socks5, "10.0.0.2", 1080).unwrap();
        let err: Error = TunnelError::new(2, &hop, ConnectError::ConnectionRefused.into()).into();
        assert_eq!(err.reply_code(), ReplyCode::ConnectionRefused);
        assert_eq!(
            err.to_string(),
            "tunnel failed at hop 2 (socks5://10.0.0.2:1080): connect failed: connection refused"
        );
    }

    #[test]
    fn io_failures_follow_error_kind() {
        let timeout = Error::timed_out("handshake", Duration::from_secs(3));
        assert_eq!(timeout.reply_code(), ReplyCode::HostUnreachable);

        let refused = ConnectError::Transport(io::ErrorKind::ConnectionRefused.into());
        assert_eq!(refused.reply_code(), ReplyCode::ConnectionRefused);

        let eof: Error = io::Error::from(io::ErrorKind::UnexpectedEof).into();
        assert_eq!(eof.reply_code(), ReplyCode::GeneralFailure);
    }

    #[test]
    fn protocol_failures_pick_specific_codes() {
        let cmd: Error = ProtocolError::UnsupportedCommand(0x02).into();
        assert_eq!(cmd.reply_code(), ReplyCode::CommandNotSupported);
        let atyp: Error = ProtocolError::UnsupportedAddressType(0x09).into();
        assert_eq!(atyp.reply_code(), ReplyCode::AddressTypeNotSupported);
        let auth: Error = ProtocolError::AuthRejected(0xff).into();
        assert_eq!(auth.reply_code(), ReplyCode::GeneralFailure);
    }

    #[test]
    fn socksv5_errors_keep_their_cause() {
        let version: Error = SocksVersionError::InvalidVersion(0x47).into();
        assert!(matches!(version, Error::Protocol(ProtocolError::UnsupportedVersion(0x47))));

        let empty: Error = SocksV5HandshakeError::InvalidHandshake("no methods".into()).into();
        assert!(matches!(empty, Error::Protocol(ProtocolError::EmptyMethodList)));

        let eof: Error = SocksV5HandshakeError::Io(io::ErrorKind::UnexpectedEof.into()).into();
        assert!(matches!(eof, Error::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }
}
