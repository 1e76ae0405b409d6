//! One accepted client connection, from greeting to close.

use std::fmt;
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_std::net::TcpStream;
use rand::rngs::StdRng;
use rand::SeedableRng;
use smol_timeout::TimeoutExt;

use crate::chain::{ChainBuilder, ChainSet};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::inbound;
use crate::relay;
use crate::tunnel::{within, TunnelEstablisher};

pub struct Session {
    id: u32,
    peer: SocketAddr,
    chains: Arc<ChainSet>,
    settings: Arc<Settings>,
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:08x} {}", self.id, self.peer)
    }
}

impl Session {
    pub fn new(peer: SocketAddr, chains: Arc<ChainSet>, settings: Arc<Settings>) -> Self {
        Self {
            id: fastrand::u32(..),
            peer,
            chains,
            settings,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Handles the connection to completion. Returning `Ok` covers both a
    /// finished relay and a client that hung up while its path was being built.
    pub async fn run(&self, mut client: TcpStream) -> Result<()> {
        let accepted = within(
            self.settings.handshake_timeout,
            "client handshake",
            inbound::accept(&mut client),
        )
        .await;
        let request = match accepted {
            Ok(request) => request,
            Err(err @ Error::Protocol(_)) => {
                self.linger(&mut client).await;
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        log::debug!("[{self}] {:?} CONNECT {}", request.flavor(), request.target());

        // fresh path per connection; the rng never crosses an await
        let path = {
            let mut builder = ChainBuilder::new(StdRng::from_entropy());
            builder.build(&self.chains, request.target().clone())
        };
        log::info!("[{self}] path {path}");

        let establisher = TunnelEstablisher::new(&self.settings);
        let established = smol::future::race(
            async { Some(establisher.establish(&path).await) },
            async {
                client_gone(&client).await;
                None
            },
        )
        .await;

        let tunnel = match established {
            None => {
                log::debug!("[{self}] client left before the path was ready");
                return Ok(());
            }
            Some(Err(err)) => {
                if let Err(reply_err) = request.fail(&mut client, err.reply_code()).await {
                    log::trace!("[{self}] failure reply not delivered: {reply_err}");
                }
                self.linger(&mut client).await;
                return Err(err.into());
            }
            Some(Ok(tunnel)) => tunnel,
        };

        request.succeed(&mut client).await?;
        log::info!("[{self}] established through {} hops", tunnel.hops());

        let stats = relay::relay(client, tunnel.into_stream()).await?;
        log::info!(
            "[{self}] closed, {} bytes up, {} bytes down",
            stats.upstream,
            stats.downstream
        );
        Ok(())
    }

    /// Closes our half after a refusal and swallows whatever the client still
    /// sends, so the reply is not lost to a reset.
    async fn linger(&self, client: &mut TcpStream) {
        if let Err(err) = client.shutdown(Shutdown::Write) {
            log::trace!("[{self}] shutdown after refusal: {err}");
            return;
        }
        let sink = &mut futures_util::io::sink();
        match futures_util::io::copy(client, sink)
            .timeout(self.settings.handshake_timeout)
            .await
        {
            Some(Ok(drained)) => log::trace!("[{self}] drained {drained} bytes after refusal"),
            Some(Err(err)) => log::trace!("[{self}] drain after refusal: {err}"),
            None => log::trace!("[{self}] client kept sending after refusal"),
        }
    }
}

/// Between peeks while the client has unread early data.
const EARLY_DATA_POLL: Duration = Duration::from_millis(50);

/// Resolves once the client has closed or reset its socket.
///
/// Early data is left in place for the relay. A reset is still noticed
/// behind it, but a plain FIN queued after it cannot be seen until the data
/// is read.
async fn client_gone(client: &TcpStream) {
    let mut head = [0u8; 1];
    loop {
        match client.peek(&mut head).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {
                smol::Timer::after(EARLY_DATA_POLL).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Chain, ProxyEndpoint, Scheme};
    use async_std::net::TcpListener;
    use futures_util::{AsyncReadExt, AsyncWriteExt};
    use std::time::Duration;

    fn unreachable_chains() -> Arc<ChainSet> {
        // a port that was just free is refused
        let closed = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let hop = ProxyEndpoint::new(Scheme::Socks5, "127.0.0.1", closed).unwrap();
        Arc::new(ChainSet::new(vec![Chain::new(vec![hop]).unwrap()]).unwrap())
    }

    async fn accepted() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (dialed, accepted) =
            futures_util::future::join(TcpStream::connect(addr), listener.accept()).await;
        let (server_side, peer) = accepted.unwrap();
        (dialed.unwrap(), server_side, peer)
    }

    #[test]
    fn display_carries_id_and_peer() {
        let peer: SocketAddr = "127.0.0.1:5555".parse().unwrap();
        let session = Session::new(peer, unreachable_chains(), Arc::default());
        let shown = session.to_string();
        assert!(shown.starts_with('#'));
        assert!(shown.ends_with("127.0.0.1:5555"));
        assert_eq!(shown.len(), 1 + 8 + 1 + "127.0.0.1:5555".len());
    }

    #[test]
    fn failed_path_is_reported_to_client() {
        smol::block_on(async {
            let (mut client, server_side, peer) = accepted().await;
            let session = Session::new(peer, unreachable_chains(), Arc::default());
            let running = smol::spawn(async move { session.run(server_side).await });

            client
                .write_all(&[0x05, 0x01, 0x00, 0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0, 80])
                .await
                .unwrap();
            let mut reply = Vec::new();
            client.read_to_end(&mut reply).await.unwrap();

            assert_eq!(&reply[..2], &[0x05, 0x00]);
            assert_eq!(reply[2], 0x05);
            assert_eq!(reply[3], 0x05); // connection refused
            drop(client);
            assert!(running.await.is_err());
        });
    }

    #[test]
    fn refused_command_is_answered_before_close() {
        smol::block_on(async {
            let (mut client, server_side, peer) = accepted().await;
            let session = Session::new(peer, unreachable_chains(), Arc::default());
            let running = smol::spawn(async move { session.run(server_side).await });

            // BIND, followed by bytes the server never asked for
            client
                .write_all(&[0x05, 0x01, 0x00, 0x05, 0x02, 0x00, 0x01, 127, 0, 0, 1, 0, 80])
                .await
                .unwrap();
            client.write_all(b"trailing").await.unwrap();
            let mut reply = Vec::new();
            client.read_to_end(&mut reply).await.unwrap();

            assert_eq!(reply, vec![0x05, 0x00, 0x05, 0x07, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
            drop(client);
            assert!(running.await.is_err());
        });
    }

    #[test]
    fn silent_client_times_out() {
        smol::block_on(async {
            let (_client, server_side, peer) = accepted().await;
            let settings = Settings {
                handshake_timeout: Duration::from_millis(100),
                ..Settings::default()
            };
            let session = Session::new(peer, unreachable_chains(), Arc::new(settings));
            let err = session.run(server_side).await.unwrap_err();
            assert_eq!(err.reply_code(), crate::socks5::ReplyCode::HostUnreachable);
        });
    }

    #[test]
    fn vanished_client_is_detected() {
        smol::block_on(async {
            let (client, server_side, _) = accepted().await;
            drop(client);
            let gone = smol::future::or(
                async {
                    client_gone(&server_side).await;
                    true
                },
                async {
                    smol::Timer::after(Duration::from_secs(5)).await;
                    false
                },
            )
            .await;
            assert!(gone);
        });
    }

    #[test]
    fn early_data_does_not_end_the_wait() {
        smol::block_on(async {
            let (mut client, server_side, _) = accepted().await;
            client.write_all(b"early").await.unwrap();

            let watcher = async {
                client_gone(&server_side).await;
                true
            };
            let leave = async {
                smol::Timer::after(Duration::from_millis(300)).await;
                let mut early = [0u8; 5];
                (&server_side).read_exact(&mut early).await.unwrap();
                assert_eq!(&early, b"early");
                drop(client);
                futures_util::future::pending::<bool>().await
            };
            let deadline = async {
                smol::Timer::after(Duration::from_secs(5)).await;
                false
            };
            assert!(smol::future::or(watcher, smol::future::or(leave, deadline)).await);
        });
    }
}
