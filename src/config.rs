use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::chain::{Chain, ChainSet, ProxyEndpoint, Scheme};
use crate::error::ConfigError;

/// Runtime knobs for every connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// direct TCP connect to the first hop
    pub connect_timeout: Duration,
    /// each SOCKS negotiation, local or upstream
    pub handshake_timeout: Duration,
    /// how long shutdown waits for open connections
    pub shutdown_grace: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenAddr {
    pub host: String,
    pub port: u16,
}

impl FromStr for ListenAddr {
    type Err = ConfigError;

    /// `host:port`, with IPv6 hosts in brackets.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidListen(s.to_string());
        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// The configuration file, as written by the user.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    server: ServerSection,
    #[serde(default)]
    timeouts: TimeoutSection,
    #[serde(default)]
    chains: Vec<ChainSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServerSection {
    host: String,
    port: u16,
}

/// Seconds.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct TimeoutSection {
    connect: u64,
    handshake: u64,
    shutdown_grace: u64,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        let defaults = Settings::default();
        Self {
            connect: defaults.connect_timeout.as_secs(),
            handshake: defaults.handshake_timeout.as_secs(),
            shutdown_grace: defaults.shutdown_grace.as_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChainSection {
    /// `[scheme, host, port]` triples
    entries: Vec<(String, String, u16)>,
}

impl Config {
    /// TOML, or JSON when the file name ends in `.json`.
    pub async fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = smol::fs::read_to_string(path).await?;
        let is_json = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Validates everything and resolves the immutable runtime pieces.
    pub fn into_parts(self) -> anyhow::Result<(ListenAddr, ChainSet, Settings)> {
        if self.server.host.is_empty() {
            return Err(ConfigError::EmptyHost).context("[server]");
        }
        let listen = ListenAddr {
            host: self.server.host,
            port: self.server.port,
        };

        let settings = Settings {
            connect_timeout: seconds(self.timeouts.connect, "connect")?,
            handshake_timeout: seconds(self.timeouts.handshake, "handshake")?,
            shutdown_grace: Duration::from_secs(self.timeouts.shutdown_grace),
        };

        let mut chains = Vec::with_capacity(self.chains.len());
        for (index, section) in self.chains.into_iter().enumerate() {
            let number = index + 1;
            let mut entries = Vec::with_capacity(section.entries.len());
            for (scheme, host, port) in section.entries {
                let scheme: Scheme = scheme
                    .parse()
                    .with_context(|| format!("chain #{number}"))?;
                let endpoint = ProxyEndpoint::new(scheme, &host, port)
                    .with_context(|| format!("chain #{number}, entry {host}:{port}"))?;
                entries.push(endpoint);
            }
            chains.push(Chain::new(entries).with_context(|| format!("chain #{number}"))?);
        }

        Ok((listen, ChainSet::new(chains)?, settings))
    }
}

fn seconds(value: u64, name: &'static str) -> Result<Duration, ConfigError> {
    if value == 0 {
        return Err(ConfigError::ZeroTimeout(name));
    }
    Ok(Duration::from_secs(value))
}
