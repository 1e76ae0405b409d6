//! SOCKS4 and SOCKS4a, both as an upstream hop scheme and for local clients.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use futures_util::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use socksv5::v4::{self, SocksV4Command, SocksV4Host, SocksV4RequestError, SocksV4RequestStatus};
use socksv5::SocksVersion;

use crate::addr::TargetAddress;
use crate::error::{ConnectError, Error, ProtocolError, Result};
use crate::wire::Tap;

/// Longest user id or 4a hostname accepted from a client.
const MAX_FIELD: usize = 255;

/// CMD, DSTPORT and DSTIP, then both NUL-terminated fields at their limit.
const MAX_REQUEST: u64 = (7 + 2 * (MAX_FIELD + 1)) as u64;

/// SOCKS4 CONNECT to `target` over `stream`. Domain targets use the 4a form;
/// IPv6 cannot be expressed at all.
pub async fn connect<S>(stream: &mut S, target: &TargetAddress) -> Result<TargetAddress>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let mut request = vec![SocksVersion::V4.to_u8(), SocksV4Command::Connect.to_u8()];
    request.extend_from_slice(&target.port().to_be_bytes());
    match target {
        TargetAddress::Ip(SocketAddr::V4(addr)) => {
            request.extend_from_slice(&addr.ip().octets());
            request.push(0); // empty user id
        }
        TargetAddress::Ip(SocketAddr::V6(_)) => {
            return Err(ConnectError::AddressTypeNotSupported.into());
        }
        TargetAddress::Domain(name, _) => {
            if name.contains('\0') {
                return Err(ProtocolError::InvalidDomain.into());
            }
            request.extend_from_slice(&[0, 0, 0, 1]);
            request.push(0);
            request.extend_from_slice(name.as_bytes());
            request.push(0);
        }
    }
    log::trace!("SOCKS4 CONNECT {target}: {request:02x?}");
    stream.write_all(&request).await?;
    stream.flush().await?;

    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply).await?;
    // VN of a reply is 0, not the protocol version
    if reply[0] != 0 {
        return Err(ProtocolError::UnsupportedVersion(reply[0]).into());
    }
    if SocksV4RequestStatus::from_u8(reply[1]) != Some(SocksV4RequestStatus::Granted) {
        return Err(ConnectError::Socks4Rejected(reply[1]).into());
    }

    let port = u16::from_be_bytes([reply[2], reply[3]]);
    let ip = Ipv4Addr::new(reply[4], reply[5], reply[6], reply[7]);
    Ok(TargetAddress::Ip(SocketAddr::V4(SocketAddrV4::new(ip, port))))
}

/// Reads a client request after its version byte. The user id is read and
/// discarded. Every refusal is answered with 0x5B before failing.
pub async fn read_request<S>(stream: &mut S) -> Result<TargetAddress>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let mut tap = Tap::new((&mut *stream).take(MAX_REQUEST));
    let parsed = v4::read_request_skip_version(&mut tap).await;
    let cut_off = tap.seen().len() as u64 == MAX_REQUEST;

    let request = match parsed {
        Ok(request) => request,
        Err(SocksV4RequestError::InvalidRequest(reason)) => {
            log::trace!("refusing SOCKS4 request: {reason}");
            let command = tap.last().unwrap_or_default();
            return Err(reject(stream, ProtocolError::UnsupportedCommand(command).into()).await);
        }
        Err(SocksV4RequestError::Io(err)) if cut_off => {
            log::trace!("SOCKS4 request cut off: {err}");
            return Err(reject(stream, ProtocolError::FieldTooLong(MAX_FIELD).into()).await);
        }
        Err(SocksV4RequestError::Io(err)) => return Err(err.into()),
        Err(SocksV4RequestError::InvalidVersion(version)) => {
            return Err(ProtocolError::UnsupportedVersion(version).into());
        }
    };

    if request.command != SocksV4Command::Connect {
        let command = request.command.to_u8();
        return Err(reject(stream, ProtocolError::UnsupportedCommand(command).into()).await);
    }

    match request.host {
        SocksV4Host::Ip(ip) => Ok(TargetAddress::Ip(SocketAddr::V4(SocketAddrV4::new(
            ip.into(),
            request.port,
        )))),
        SocksV4Host::Domain(name) => {
            let target = String::from_utf8(name)
                .map_err(|_| ProtocolError::InvalidDomain)
                .and_then(|name| TargetAddress::from_host_port(&name, request.port));
            match target {
                Ok(target) => Ok(target),
                Err(err) => Err(reject(stream, err.into()).await),
            }
        }
    }
}

pub async fn write_reply<S>(stream: &mut S, granted: bool) -> Result<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    let status = if granted {
        SocksV4RequestStatus::Granted
    } else {
        SocksV4RequestStatus::Failed
    };
    v4::write_request_status(&mut *stream, status, [0; 4], 0).await?;
    stream.flush().await?;
    Ok(())
}

async fn reject<S>(stream: &mut S, err: Error) -> Error
where
    S: AsyncWrite + Unpin + ?Sized,
{
    if let Err(write_err) = write_reply(stream, false).await {
        log::trace!("could not reject SOCKS4 request: {write_err}");
    }
    err
}
