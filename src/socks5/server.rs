//! Server side of SOCKS5, facing local clients.
//!
//! The version byte is consumed by the caller (see [`crate::inbound`]), which
//! lets SOCKS4 clients share the listener.

use futures_util::{AsyncRead, AsyncWrite, AsyncWriteExt};
use socksv5::v5::{self, SocksV5AuthMethod, SocksV5Command, SocksV5RequestError};

use super::ReplyCode;
use crate::addr::TargetAddress;
use crate::error::{Error, ProtocolError, Result};
use crate::wire::Tap;

/// Reads `NMETHODS | METHODS` and selects no-auth, or answers 0xFF and fails.
pub async fn negotiate_auth<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let handshake = match v5::read_handshake_skip_version(&mut *stream).await {
        Ok(handshake) => handshake,
        Err(err) => {
            return Err(match Error::from(err) {
                Error::Protocol(refused) => refuse_method(stream, refused).await,
                other => other,
            });
        }
    };
    log::trace!("client offers auth methods {:?}", handshake.methods);
    if !handshake.methods.contains(&SocksV5AuthMethod::Noauth) {
        return Err(refuse_method(stream, ProtocolError::NoAcceptableAuth).await);
    }

    v5::write_auth_method(&mut *stream, SocksV5AuthMethod::Noauth).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads a whole request and returns its destination. Only CONNECT is
/// accepted; anything else is answered with the matching error reply before
/// failing. No success reply is sent here.
pub async fn read_request<S>(stream: &mut S) -> Result<TargetAddress>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let mut tap = Tap::new(&mut *stream);
    let request = match v5::read_request(&mut tap).await {
        Ok(request) => request,
        Err(SocksV5RequestError::InvalidRequest(reason)) => {
            log::trace!("refusing request: {reason}");
            let err = refused_field(tap.seen());
            let code = Error::Protocol(err.clone()).reply_code();
            return Err(refuse(stream, code, err).await);
        }
        Err(SocksV5RequestError::InvalidVersion(version)) => {
            let err = ProtocolError::UnsupportedVersion(version);
            return Err(refuse(stream, ReplyCode::GeneralFailure, err).await);
        }
        Err(SocksV5RequestError::Io(err)) => return Err(err.into()),
    };

    if request.command != SocksV5Command::Connect {
        let err = ProtocolError::UnsupportedCommand(request.command.to_u8());
        return Err(refuse(stream, ReplyCode::CommandNotSupported, err).await);
    }

    match TargetAddress::from_socks5(request.host, request.port) {
        Ok(target) => Ok(target),
        Err(err) => {
            let code = Error::Protocol(err.clone()).reply_code();
            Err(refuse(stream, code, err).await)
        }
    }
}

/// The parser reads byte by byte and stops at the first field it cannot
/// accept, so the position of the last byte read names the field.
fn refused_field(seen: &[u8]) -> ProtocolError {
    match *seen {
        [_, command] => ProtocolError::UnsupportedCommand(command),
        [_, _, _, atyp] => ProtocolError::UnsupportedAddressType(atyp),
        _ => ProtocolError::Malformed,
    }
}

/// Writes `VER | REP | RSV | ATYP | BND.ADDR | BND.PORT`.
pub async fn write_reply<S>(stream: &mut S, code: ReplyCode, bound: &TargetAddress) -> Result<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    let host = bound.to_socks5()?;
    v5::write_request_status(&mut *stream, code.into(), host, bound.port()).await?;
    stream.flush().await?;
    Ok(())
}

async fn refuse<S>(stream: &mut S, code: ReplyCode, err: ProtocolError) -> Error
where
    S: AsyncWrite + Unpin + ?Sized,
{
    if let Err(write_err) = write_reply(stream, code, &TargetAddress::unspecified()).await {
        log::trace!("could not send {code} reply: {write_err}");
    }
    err.into()
}

async fn refuse_method<S>(stream: &mut S, err: ProtocolError) -> Error
where
    S: AsyncWrite + Unpin + ?Sized,
{
    let answer = v5::write_auth_method(&mut *stream, SocksV5AuthMethod::NoAcceptableMethod).await;
    if let Err(write_err) = answer {
        log::trace!("could not refuse auth methods: {write_err}");
    }
    let _ = stream.flush().await;
    err.into()
}
