pub mod addr;
pub mod chain;
pub mod config;
pub mod error;
pub mod inbound;
pub mod relay;
pub mod session;
pub mod socks4;
pub mod socks5;
pub mod supervisor;
pub mod tunnel;
mod wire;

#[cfg(test)]
mod testing;

pub use addr::TargetAddress;
pub use chain::{Chain, ChainBuilder, ChainSet, HopPath, ProxyEndpoint, Scheme};
pub use config::{Config, ListenAddr, Settings};
pub use error::{ConfigError, ConnectError, Error, ProtocolError, Result, TunnelError};
pub use relay::RelayStats;
pub use supervisor::{serve, Supervisor};
pub use tunnel::{Tunnel, TunnelEstablisher, UpstreamHandshake};
