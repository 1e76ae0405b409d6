//! Server-facing handshake with a local client.
//!
//! [`accept`] runs the greeting and reads the request but leaves the reply
//! pending: the client hears "succeeded" only after the whole upstream path
//! is live.

use futures_util::{AsyncRead, AsyncWrite};
use socksv5::SocksVersion;

use crate::addr::TargetAddress;
use crate::error::Result;
use crate::socks5::ReplyCode;
use crate::{socks4, socks5};

/// Protocol the local client spoke, which decides the shape of its reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flavor {
    Socks4,
    Socks5,
}

/// A parsed CONNECT awaiting its reply.
#[derive(Debug)]
#[must_use = "the client is waiting for a reply"]
pub struct PendingRequest {
    flavor: Flavor,
    target: TargetAddress,
}

pub async fn accept<S>(stream: &mut S) -> Result<PendingRequest>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    // anything but 4 or 5 is dropped without a reply
    let (flavor, target) = match socksv5::read_version(&mut *stream).await? {
        SocksVersion::V5 => {
            socks5::server::negotiate_auth(stream).await?;
            (Flavor::Socks5, socks5::server::read_request(stream).await?)
        }
        SocksVersion::V4 => (Flavor::Socks4, socks4::read_request(stream).await?),
    };
    Ok(PendingRequest { flavor, target })
}

impl PendingRequest {
    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    pub fn target(&self) -> &TargetAddress {
        &self.target
    }

    /// The bound address is always reported as `0.0.0.0:0` so nothing about
    /// the upstream path reaches the client.
    pub async fn succeed<S>(self, stream: &mut S) -> Result<()>
    where
        S: AsyncWrite + Unpin + ?Sized,
    {
        match self.flavor {
            Flavor::Socks5 => {
                socks5::server::write_reply(stream, ReplyCode::Succeeded, &TargetAddress::unspecified())
                    .await
            }
            Flavor::Socks4 => socks4::write_reply(stream, true).await,
        }
    }

    pub async fn fail<S>(self, stream: &mut S, code: ReplyCode) -> Result<()>
    where
        S: AsyncWrite + Unpin + ?Sized,
    {
        match self.flavor {
            Flavor::Socks5 => {
                let code = match code {
                    ReplyCode::Succeeded => ReplyCode::GeneralFailure,
                    code => code,
                };
                socks5::server::write_reply(stream, code, &TargetAddress::unspecified()).await
            }
            Flavor::Socks4 => socks4::write_reply(stream, false).await,
        }
    }
}
