//! Byte relay between the local client and the established tunnel.

use std::io;
use std::net::Shutdown;

use async_std::net::TcpStream;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// client -> tunnel
    pub upstream: u64,
    /// tunnel -> client
    pub downstream: u64,
}

/// Copies both directions until both have ended.
///
/// When one side finishes sending, only the write half of the other side is
/// shut down, so data still travelling the opposite way keeps draining. An
/// error in either direction tears both sockets down.
pub async fn relay(client: TcpStream, upstream: TcpStream) -> io::Result<RelayStats> {
    let up = pump(&client, &upstream);
    let down = pump(&upstream, &client);
    let (up, down) = futures_util::future::join(up, down).await;

    let _ = client.shutdown(Shutdown::Both);
    let _ = upstream.shutdown(Shutdown::Both);

    Ok(RelayStats {
        upstream: up?,
        downstream: down?,
    })
}

async fn pump(from: &TcpStream, to: &TcpStream) -> io::Result<u64> {
    let mut writer = to;
    match futures_util::io::copy(from, &mut writer).await {
        Ok(moved) => {
            // the peer may already be gone entirely
            if let Err(err) = to.shutdown(Shutdown::Write) {
                log::trace!("half-close after {moved} bytes: {err}");
            }
            Ok(moved)
        }
        Err(err) => {
            let _ = from.shutdown(Shutdown::Both);
            let _ = to.shutdown(Shutdown::Both);
            Err(err)
        }
    }
}
