#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use async_std::net::{TcpListener, TcpStream};
use futures_util::{AsyncReadExt, AsyncWriteExt};
use smol::channel::Receiver;
use smol::Task;
use socksv5::v5::{SocksV5AuthMethod, SocksV5Command};
use socksv5::SocksVersion;

use sockschain::socks5::{self, ReplyCode};
use sockschain::{Chain, ChainSet, ProxyEndpoint, Scheme, Settings, Supervisor, TargetAddress};

/// Echoes every connection back to itself.
pub struct EchoServer {
    pub addr: SocketAddr,
    _task: Task<()>,
}

impl EchoServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = smol::spawn(async move {
            loop {
                let (conn, _) = listener.accept().await.unwrap();
                smol::spawn(async move {
                    let mut writer = &conn;
                    let _ = futures_util::io::copy(&conn, &mut writer).await;
                })
                .detach();
            }
        });
        Self { addr, _task: task }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Behavior {
    /// dial the requested target and relay to it
    Forward,
    /// answer success, then echo instead of dialing anything
    Echo,
    /// answer with this failure code
    Refuse(ReplyCode),
}

/// A minimal SOCKS5 proxy that records every CONNECT target it is asked for.
pub struct MockProxy {
    pub addr: SocketAddr,
    pub requests: Receiver<TargetAddress>,
    _task: Task<()>,
}

impl MockProxy {
    pub async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (requests_tx, requests) = smol::channel::unbounded();
        let task = smol::spawn(async move {
            loop {
                let (mut conn, _) = listener.accept().await.unwrap();
                let requests_tx = requests_tx.clone();
                smol::spawn(async move {
                    let version = socksv5::read_version(&mut conn).await.unwrap();
                    assert_eq!(version, SocksVersion::V5);
                    socks5::server::negotiate_auth(&mut conn).await.unwrap();
                    let target = socks5::server::read_request(&mut conn).await.unwrap();
                    requests_tx.send(target.clone()).await.unwrap();
                    serve_request(conn, target, behavior).await;
                })
                .detach();
            }
        });
        Self {
            addr,
            requests,
            _task: task,
        }
    }

    pub fn endpoint(&self) -> ProxyEndpoint {
        ProxyEndpoint::new(Scheme::Socks5, "127.0.0.1", self.addr.port()).unwrap()
    }

    pub fn target(&self) -> TargetAddress {
        TargetAddress::Ip(self.addr)
    }
}

async fn serve_request(mut conn: TcpStream, target: TargetAddress, behavior: Behavior) {
    let bound = TargetAddress::unspecified();
    match behavior {
        Behavior::Refuse(code) => {
            socks5::server::write_reply(&mut conn, code, &bound).await.unwrap();
        }
        Behavior::Echo => {
            socks5::server::write_reply(&mut conn, ReplyCode::Succeeded, &bound)
                .await
                .unwrap();
            let mut writer = &conn;
            let _ = futures_util::io::copy(&conn, &mut writer).await;
        }
        Behavior::Forward => {
            let dialed = match &target {
                TargetAddress::Ip(addr) => TcpStream::connect(*addr).await,
                TargetAddress::Domain(host, port) => TcpStream::connect((host.as_str(), *port)).await,
            };
            match dialed {
                Ok(upstream) => {
                    socks5::server::write_reply(&mut conn, ReplyCode::Succeeded, &bound)
                        .await
                        .unwrap();
                    let _ = sockschain::relay::relay(conn, upstream).await;
                }
                Err(_) => {
                    let _ = socks5::server::write_reply(&mut conn, ReplyCode::ConnectionRefused, &bound)
                        .await;
                }
            }
        }
    }
}

pub fn chain_set(chains: Vec<Vec<ProxyEndpoint>>) -> ChainSet {
    ChainSet::new(chains.into_iter().map(|c| Chain::new(c).unwrap()).collect()).unwrap()
}

pub fn quick_settings() -> Settings {
    Settings {
        connect_timeout: Duration::from_secs(2),
        handshake_timeout: Duration::from_secs(2),
        shutdown_grace: Duration::from_millis(200),
    }
}

/// Starts a supervisor on an ephemeral loopback port.
pub async fn start_proxy(chains: ChainSet) -> (SocketAddr, Task<std::io::Result<()>>) {
    let supervisor = Supervisor::bind("127.0.0.1:0", chains, quick_settings())
        .await
        .unwrap();
    let addr = supervisor.local_addr().unwrap();
    (addr, smol::spawn(supervisor.run()))
}

/// Greets the proxy and sends a CONNECT; returns the stream and the full
/// 10-byte reply (IPv4 bound address).
pub async fn socks5_connect(proxy: SocketAddr, target: &TargetAddress) -> (TcpStream, [u8; 10]) {
    let mut conn = TcpStream::connect(proxy).await.unwrap();
    socksv5::v5::write_handshake(&mut conn, [SocksV5AuthMethod::Noauth])
        .await
        .unwrap();
    let method = socksv5::v5::read_auth_method(&mut conn).await.unwrap();
    assert_eq!(method, SocksV5AuthMethod::Noauth);

    let host = target.to_socks5().unwrap();
    socksv5::v5::write_request(&mut conn, SocksV5Command::Connect, host, target.port())
        .await
        .unwrap();

    let mut reply = [0u8; 10];
    conn.read_exact(&mut reply).await.unwrap();
    (conn, reply)
}

/// Writes `payload` and expects it straight back.
pub async fn assert_echo(conn: &mut TcpStream, payload: &[u8]) {
    conn.write_all(payload).await.unwrap();
    let mut back = vec![0u8; payload.len()];
    conn.read_exact(&mut back).await.unwrap();
    assert_eq!(back, payload);
}
