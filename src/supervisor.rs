//! Accept loop. Every connection runs as its own detached task; whatever
//! happens inside one (error or panic) ends there.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_std::net::{TcpListener, ToSocketAddrs};
use futures_util::FutureExt;
use smol::channel::Sender;
use smol_timeout::TimeoutExt;

use crate::chain::ChainSet;
use crate::config::{ListenAddr, Settings};
use crate::session::Session;

pub struct Supervisor {
    listener: TcpListener,
    chains: Arc<ChainSet>,
    settings: Arc<Settings>,
}

impl Supervisor {
    pub async fn bind(addr: impl ToSocketAddrs, chains: ChainSet, settings: Settings) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            chains: Arc::new(chains),
            settings: Arc::new(settings),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves until the process ends.
    pub async fn run(self) -> io::Result<()> {
        self.run_until(futures_util::future::pending()).await
    }

    /// Serves until `shutdown` resolves, then stops accepting and gives open
    /// connections up to `shutdown_grace` to finish.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> io::Result<()> {
        let (alive_tx, alive_rx) = smol::channel::bounded::<()>(1);

        let accepting = async {
            self.accept_loop(&alive_tx).await;
            Ok::<_, io::Error>(())
        };
        let stopping = async {
            shutdown.await;
            Ok(())
        };
        smol::future::race(accepting, stopping).await?;
        drop(self.listener);

        // recv fails once the last connection task drops its sender
        drop(alive_tx);
        let grace = self.settings.shutdown_grace;
        log::info!("stopped accepting, waiting up to {grace:?} for open connections");
        match alive_rx.recv().timeout(grace).await {
            Some(_) => log::info!("all connections closed"),
            None => log::warn!("{} connections still open after {grace:?}", alive_rx.sender_count()),
        }
        Ok(())
    }

    async fn accept_loop(&self, alive: &Sender<()>) {
        loop {
            let (conn, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    // usually descriptor exhaustion; let some connections finish
                    log::warn!("accept failed: {err}");
                    smol::Timer::after(Duration::from_millis(100)).await;
                    continue;
                }
            };
            if let Err(err) = conn.set_nodelay(true) {
                log::trace!("set_nodelay for {peer}: {err}");
            }

            let session = Session::new(peer, self.chains.clone(), self.settings.clone());
            log::debug!("[{session}] accepted");
            let alive = alive.clone();
            smolscale::spawn(async move {
                let outcome = AssertUnwindSafe(session.run(conn)).catch_unwind().await;
                match outcome {
                    Ok(Ok(())) => log::debug!("[{session}] done"),
                    Ok(Err(err)) => log::warn!("[{session}] {err}"),
                    Err(_) => log::error!("[{session}] connection task panicked"),
                }
                drop(alive);
            })
            .detach();
        }
    }
}

/// Binds `listen` and serves `chains` until the process ends.
pub async fn serve(listen: ListenAddr, chains: ChainSet, settings: Settings) -> io::Result<()> {
    let supervisor = Supervisor::bind((listen.host.as_str(), listen.port), chains, settings).await?;
    log::info!("listening on {}", supervisor.local_addr()?);
    supervisor.run().await
}
