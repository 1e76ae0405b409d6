//! Configured proxy chains and the per-connection hop path drawn from them.

use std::fmt;
use std::str::FromStr;

use rand::Rng;

use crate::addr::TargetAddress;
use crate::error::ConfigError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scheme {
    Socks5,
    Socks4,
}

impl FromStr for Scheme {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "socks5" => Ok(Self::Socks5),
            "socks4" | "socks4a" => Ok(Self::Socks4),
            _ => Err(ConfigError::UnknownScheme(s.to_string())),
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Socks5 => "socks5",
            Self::Socks4 => "socks4",
        })
    }
}

/// One upstream proxy a chain may route through.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProxyEndpoint {
    scheme: Scheme,
    address: TargetAddress,
}

impl ProxyEndpoint {
    pub fn new(scheme: Scheme, host: &str, port: u16) -> Result<Self, ConfigError> {
        if host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        let address = TargetAddress::from_host_port(host, port)
            .map_err(|_| ConfigError::InvalidHost(host.to_string()))?;
        Ok(Self { scheme, address })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Where the previous hop (or the local dialer) must connect to reach this proxy.
    pub fn address(&self) -> &TargetAddress {
        &self.address
    }

    pub fn host(&self) -> String {
        self.address.host()
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.address)
    }
}

/// Candidate endpoints for one position in the path. Never empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chain {
    entries: Vec<ProxyEndpoint>,
}

impl Chain {
    pub fn new(entries: Vec<ProxyEndpoint>) -> Result<Self, ConfigError> {
        if entries.is_empty() {
            return Err(ConfigError::EmptyChain);
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ProxyEndpoint] {
        &self.entries
    }

    /// Uniform pick among the entries.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> &ProxyEndpoint {
        &self.entries[rng.gen_range(0..self.entries.len())]
    }
}

/// All chains, in hop order. Fixed after load and shared read-only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainSet {
    chains: Vec<Chain>,
}

impl ChainSet {
    pub fn new(chains: Vec<Chain>) -> Result<Self, ConfigError> {
        if chains.is_empty() {
            return Err(ConfigError::NoChains);
        }
        Ok(Self { chains })
    }

    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Chain> {
        self.chains.iter()
    }
}

/// The concrete route of one connection: a hop per chain, then the destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HopPath {
    hops: Vec<ProxyEndpoint>,
    target: TargetAddress,
}

/// One handshake of the path: `endpoint` is asked to connect onward to `target`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Leg<'a> {
    /// 1-based
    pub hop: usize,
    pub endpoint: &'a ProxyEndpoint,
    pub target: &'a TargetAddress,
}

impl HopPath {
    /// `None` when `hops` is empty; a path always has a first hop to dial.
    pub fn new(hops: Vec<ProxyEndpoint>, target: TargetAddress) -> Option<Self> {
        if hops.is_empty() {
            return None;
        }
        Some(Self { hops, target })
    }

    pub fn hops(&self) -> &[ProxyEndpoint] {
        &self.hops
    }

    pub fn first(&self) -> &ProxyEndpoint {
        &self.hops[0]
    }

    pub fn target(&self) -> &TargetAddress {
        &self.target
    }

    /// Upstream hops plus the final destination.
    pub fn segments(&self) -> usize {
        self.hops.len() + 1
    }

    pub fn legs(&self) -> impl Iterator<Item = Leg<'_>> + '_ {
        self.hops.iter().enumerate().map(move |(i, endpoint)| Leg {
            hop: i + 1,
            endpoint,
            target: match self.hops.get(i + 1) {
                Some(next) => next.address(),
                None => &self.target,
            },
        })
    }
}

impl fmt::Display for HopPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for hop in &self.hops {
            write!(f, "{hop} -> ")?;
        }
        write!(f, "{}", self.target)
    }
}

/// Draws a fresh [`HopPath`] per connection from an injected random source.
pub struct ChainBuilder<R> {
    rng: R,
}

impl<R: Rng> ChainBuilder<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    pub fn build(&mut self, chains: &ChainSet, target: TargetAddress) -> HopPath {
        let hops = chains
            .iter()
            .map(|chain| chain.choose(&mut self.rng).clone())
            .collect();
        HopPath { hops, target }
    }
}
