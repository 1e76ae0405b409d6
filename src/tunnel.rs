//! Nested tunnel through every hop of a [`HopPath`].
//!
//! There is exactly one socket per connection: the TCP connection to hop 1.
//! Each completed CONNECT turns that same stream into a transparent pipe to
//! the next hop, so the next handshake is simply written into it.

use std::future::Future;
use std::time::Duration;

use async_std::net::TcpStream;
use async_trait::async_trait;
use futures_util::{AsyncRead, AsyncWrite};
use smol_timeout::TimeoutExt;

use crate::addr::TargetAddress;
use crate::chain::{HopPath, ProxyEndpoint, Scheme};
use crate::config::Settings;
use crate::error::{ConnectError, Error, Result, TunnelError};
use crate::{socks4, socks5};

/// Anything a hop handshake can run over.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

/// Asks the proxy at the far end of a stream to connect onward.
#[async_trait]
pub trait UpstreamHandshake: Send + Sync {
    /// On success the stream reaches `target`; the proxy's bound address is returned.
    async fn connect(&self, stream: &mut dyn ByteStream, target: &TargetAddress) -> Result<TargetAddress>;
}

struct Socks5Handshake;
struct Socks4Handshake;

#[async_trait]
impl UpstreamHandshake for Socks5Handshake {
    async fn connect(&self, stream: &mut dyn ByteStream, target: &TargetAddress) -> Result<TargetAddress> {
        socks5::client::connect(stream, target).await
    }
}

#[async_trait]
impl UpstreamHandshake for Socks4Handshake {
    async fn connect(&self, stream: &mut dyn ByteStream, target: &TargetAddress) -> Result<TargetAddress> {
        socks4::connect(stream, target).await
    }
}

impl Scheme {
    pub fn handshake(self) -> &'static dyn UpstreamHandshake {
        match self {
            Scheme::Socks5 => &Socks5Handshake,
            Scheme::Socks4 => &Socks4Handshake,
        }
    }
}

/// The single upstream stream, plus how many hops it has been extended through.
#[derive(Debug)]
pub struct Tunnel {
    stream: TcpStream,
    hops: usize,
}

impl Tunnel {
    /// Dials `first` directly.
    pub async fn open(first: &ProxyEndpoint) -> Result<Self> {
        let stream = match first.address() {
            TargetAddress::Ip(addr) => TcpStream::connect(*addr).await,
            TargetAddress::Domain(host, port) => TcpStream::connect((host.as_str(), *port)).await,
        }
        .map_err(ConnectError::Transport)?;
        stream.set_nodelay(true)?;
        Ok(Self { stream, hops: 0 })
    }

    /// Runs `via`'s handshake over the existing stream so that it reaches `target`.
    pub async fn extend(&mut self, via: &ProxyEndpoint, target: &TargetAddress) -> Result<TargetAddress> {
        let bound = via.scheme().handshake().connect(&mut self.stream, target).await?;
        self.hops += 1;
        Ok(bound)
    }

    /// Completed CONNECT handshakes.
    pub fn hops(&self) -> usize {
        self.hops
    }

    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}

/// Drives a [`Tunnel`] through every leg of a path, one bounded step at a time.
#[derive(Clone, Copy, Debug)]
pub struct TunnelEstablisher {
    connect_timeout: Duration,
    handshake_timeout: Duration,
}

impl TunnelEstablisher {
    pub fn new(settings: &Settings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout,
            handshake_timeout: settings.handshake_timeout,
        }
    }

    /// No fallback: the first hop that fails fails the whole path.
    pub async fn establish(&self, path: &HopPath) -> Result<Tunnel, TunnelError> {
        let first = path.first();
        let mut tunnel = within(self.connect_timeout, "connect", Tunnel::open(first))
            .await
            .map_err(|err| TunnelError::new(1, first, err))?;
        log::trace!("connected to {first}");

        for leg in path.legs() {
            let bound = within(
                self.handshake_timeout,
                "handshake",
                tunnel.extend(leg.endpoint, leg.target),
            )
            .await
            .map_err(|err| TunnelError::new(leg.hop, leg.endpoint, err))?;
            log::trace!("hop {} {} -> {} (bound {bound})", leg.hop, leg.endpoint, leg.target);
        }

        Ok(tunnel)
    }
}

/// Bounds one step; expiry becomes a `TimedOut` i/o error.
pub(crate) async fn within<T, F>(limit: Duration, step: &str, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match future.timeout(limit).await {
        Some(result) => result,
        None => Err(Error::timed_out(step, limit)),
    }
}
