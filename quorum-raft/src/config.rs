use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use quorum_core::error::{Error, Result};
use rand::Rng;

/// Settings for a single raft server, the `[raft]` section of the config
/// file. Peers are listed one per line as `address port`; an entry that
/// resolves to the locally bound socket is elided at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct RaftConfig {
    /// Server id. Derived from the advertised address when unset.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Election timeout range in milliseconds. A fresh timeout is drawn
    /// uniformly from the range on every restart.
    #[serde(default = "default_election_timeout_min")]
    pub election_timeout_min: u64,
    #[serde(default = "default_election_timeout_max")]
    pub election_timeout_max: u64,
    /// Heartbeat period in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout: u64,
    /// Newline-separated `address port` entries.
    #[serde(default)]
    pub peers: String,
    /// Directory for the per-server persistent state file.
    #[serde(default = "default_var_dir")]
    pub var_dir: PathBuf,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7581
}

fn default_election_timeout_min() -> u64 {
    150
}

fn default_election_timeout_max() -> u64 {
    300
}

fn default_heartbeat_timeout() -> u64 {
    50
}

fn default_var_dir() -> PathBuf {
    PathBuf::from("var")
}

impl Default for RaftConfig {
    fn default() -> Self {
        RaftConfig {
            id: None,
            bind_address: default_bind_address(),
            port: default_port(),
            election_timeout_min: default_election_timeout_min(),
            election_timeout_max: default_election_timeout_max(),
            heartbeat_timeout: default_heartbeat_timeout(),
            peers: String::new(),
            var_dir: default_var_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    raft: Option<RaftConfig>,
}

impl RaftConfig {
    pub fn load(path: &str) -> Result<RaftConfig> {
        let mut c = config::Config::new();
        c.merge(config::File::with_name(path))?;
        c.merge(config::Environment::with_prefix("QUORUM").separator("__"))?;
        let file: ConfigFile = c.try_into()?;
        let cfg = file.raft.unwrap_or_default();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.election_timeout_min >= self.election_timeout_max {
            return Err(Error::InvalidConfig(format!(
                "election timeout range is empty: {}..{}",
                self.election_timeout_min, self.election_timeout_max
            )));
        }
        if self.heartbeat_timeout == 0 {
            return Err(Error::InvalidConfig(
                "heartbeat_timeout must be positive".to_string(),
            ));
        }
        if self.heartbeat_timeout >= self.election_timeout_min {
            return Err(Error::InvalidConfig(format!(
                "heartbeat_timeout ({}) must be below election_timeout_min ({})",
                self.heartbeat_timeout, self.election_timeout_min
            )));
        }
        self.parse_peers()?;
        Ok(())
    }

    /// Resolve the configured peer entries. Self-elision happens later, once
    /// the listener is bound and the local socket is known.
    pub fn parse_peers(&self) -> Result<Vec<SocketAddr>> {
        let mut peers = Vec::new();
        for line in self.peers.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (addr, port) = match (parts.next(), parts.next(), parts.next()) {
                (Some(addr), Some(port), None) => (addr, port),
                _ => return Err(Error::InvalidPeer(line.to_string())),
            };
            let port: u16 = port
                .parse()
                .map_err(|_| Error::InvalidPeer(line.to_string()))?;
            let resolved = (addr, port)
                .to_socket_addrs()
                .map_err(|_| Error::InvalidPeer(line.to_string()))?
                .next()
                .ok_or_else(|| Error::InvalidPeer(line.to_string()))?;
            peers.push(resolved);
        }
        Ok(peers)
    }

    pub fn random_election_timeout(&self) -> Duration {
        let ms =
            rand::thread_rng().gen_range(self.election_timeout_min..=self.election_timeout_max);
        Duration::from_millis(ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout)
    }
}
