//! Client side of SOCKS5, run once per hop over the tunnel built so far.

use futures_util::{AsyncRead, AsyncWrite, AsyncWriteExt};
use socksv5::v5::{self, SocksV5AuthMethod, SocksV5Command, SocksV5RequestError};

use crate::addr::TargetAddress;
use crate::error::{ConnectError, ProtocolError, Result};
use crate::wire::Tap;

/// Negotiates no-auth with the proxy at the other end of `stream` and asks it
/// to CONNECT to `target`. Returns the proxy's BND address on success; from
/// then on `stream` carries bytes to and from `target`.
pub async fn connect<S>(stream: &mut S, target: &TargetAddress) -> Result<TargetAddress>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let host = target.to_socks5()?;

    v5::write_handshake(&mut *stream, [SocksV5AuthMethod::Noauth]).await?;
    stream.flush().await?;
    match v5::read_auth_method(&mut *stream).await? {
        SocksV5AuthMethod::Noauth => {}
        other => return Err(ProtocolError::AuthRejected(method_code(&other)).into()),
    }

    log::trace!("CONNECT {target}");
    v5::write_request(&mut *stream, SocksV5Command::Connect, host, target.port()).await?;
    stream.flush().await?;

    read_reply(stream).await
}

/// Reads `VER | REP | RSV | ATYP | BND.ADDR | BND.PORT`. RSV is not checked;
/// some servers leave garbage there.
pub async fn read_reply<S>(stream: &mut S) -> Result<TargetAddress>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut tap = Tap::new(&mut *stream);
    let reply = match v5::read_request_status(&mut tap).await {
        Ok(reply) => reply,
        Err(SocksV5RequestError::InvalidRequest(reason)) => {
            log::trace!("unexpected reply: {reason}");
            return Err(match *tap.seen() {
                [_, status] => ConnectError::Unassigned(status).into(),
                [_, _, _, atyp] => ProtocolError::UnsupportedAddressType(atyp).into(),
                _ => ProtocolError::Malformed.into(),
            });
        }
        Err(SocksV5RequestError::InvalidVersion(version)) => {
            return Err(ProtocolError::UnsupportedVersion(version).into());
        }
        Err(SocksV5RequestError::Io(err)) => return Err(err.into()),
    };

    if let Some(err) = ConnectError::from_reply(reply.status.to_u8()) {
        return Err(err.into());
    }
    // BND is informational only; an odd one does not fail a working hop
    Ok(TargetAddress::from_socks5(reply.host, reply.port).unwrap_or_else(|err| {
        log::trace!("ignoring bound address: {err}");
        TargetAddress::unspecified()
    }))
}

fn method_code(method: &SocksV5AuthMethod) -> u8 {
    match method {
        SocksV5AuthMethod::Noauth => 0x00,
        SocksV5AuthMethod::Gssapi => 0x01,
        SocksV5AuthMethod::UsernamePassword => 0x02,
        SocksV5AuthMethod::NoAcceptableMethod => 0xff,
        SocksV5AuthMethod::Other(code) => *code,
    }
}
