//! Load balancer configuration.
//!
//! The JSON file mirrors [`LbConfig`]; every field except `backends` may be
//! omitted. [`LbConfig::validate`] turns it into a [`ServiceConfig`] with
//! parsed link addresses, which is what the load balancer is built from.

use serde::{Deserialize, Serialize};
use smoltcp::wire::EthernetAddress;
use std::collections::HashSet;
use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::arp::ArpReplyPolicy;
use crate::backend::Backend;
use crate::flow::DEFAULT_PRIORITY;
use crate::packet::parse_mac;
use crate::session::SessionKeyPolicy;

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Backend pool is empty")]
    EmptyPool,

    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),

    #[error("Invalid virtual IP: {0}")]
    InvalidVirtualIp(Ipv4Addr),

    #[error("Virtual MAC must be unicast: {0}")]
    InvalidVirtualMac(String),

    #[error("Backend {0} uses the virtual IP")]
    BackendIsVirtual(Ipv4Addr),

    #[error("Duplicate backend {0}")]
    DuplicateBackend(Ipv4Addr),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Backend entry as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub ip: Ipv4Addr,
    pub mac: String,
    pub port: u16,
}

/// Load balancer configuration as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbConfig {
    #[serde(default = "default_virtual_ip")]
    pub virtual_ip: Ipv4Addr,

    #[serde(default = "default_virtual_mac")]
    pub virtual_mac: String,

    pub backends: Vec<BackendConfig>,

    #[serde(default)]
    pub session_key: SessionKeyPolicy,

    #[serde(default)]
    pub arp_reply: ArpReplyPolicy,

    /// Answer backend ARP requests for clients with a session.
    #[serde(default)]
    pub answer_backend_arp: bool,

    #[serde(default = "default_priority")]
    pub flow_priority: u16,
}

fn default_virtual_ip() -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, 10)
}

fn default_virtual_mac() -> String {
    "00:00:00:00:00:10".to_string()
}

fn default_priority() -> u16 {
    DEFAULT_PRIORITY
}

impl Default for LbConfig {
    fn default() -> Self {
        Self {
            virtual_ip: default_virtual_ip(),
            virtual_mac: default_virtual_mac(),
            backends: vec![
                BackendConfig {
                    ip: Ipv4Addr::new(10, 0, 0, 5),
                    mac: "00:00:00:00:00:05".to_string(),
                    port: 5,
                },
                BackendConfig {
                    ip: Ipv4Addr::new(10, 0, 0, 6),
                    mac: "00:00:00:00:00:06".to_string(),
                    port: 6,
                },
            ],
            session_key: SessionKeyPolicy::default(),
            arp_reply: ArpReplyPolicy::default(),
            answer_backend_arp: false,
            flow_priority: DEFAULT_PRIORITY,
        }
    }
}

impl LbConfig {
    /// Read and parse a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Check the configuration and resolve link addresses.
    pub fn validate(&self) -> Result<ServiceConfig> {
        let vip = self.virtual_ip;
        if vip.is_unspecified() || vip.is_broadcast() || vip.is_multicast() {
            return Err(ConfigError::InvalidVirtualIp(vip));
        }

        let virtual_mac = parse_mac(&self.virtual_mac)
            .ok_or_else(|| ConfigError::InvalidMac(self.virtual_mac.clone()))?;
        if !virtual_mac.is_unicast() {
            return Err(ConfigError::InvalidVirtualMac(self.virtual_mac.clone()));
        }

        if self.backends.is_empty() {
            return Err(ConfigError::EmptyPool);
        }

        let mut seen = HashSet::new();
        let mut backends = Vec::with_capacity(self.backends.len());
        for entry in &self.backends {
            if entry.ip == vip {
                return Err(ConfigError::BackendIsVirtual(entry.ip));
            }
            if !seen.insert(entry.ip) {
                return Err(ConfigError::DuplicateBackend(entry.ip));
            }
            let mac =
                parse_mac(&entry.mac).ok_or_else(|| ConfigError::InvalidMac(entry.mac.clone()))?;
            backends.push(Backend::new(entry.ip, mac, entry.port));
        }

        Ok(ServiceConfig {
            virtual_ip: vip,
            virtual_mac,
            backends,
            session_key: self.session_key,
            arp_reply: self.arp_reply,
            answer_backend_arp: self.answer_backend_arp,
            flow_priority: self.flow_priority,
        })
    }
}

/// Validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub virtual_ip: Ipv4Addr,
    pub virtual_mac: EthernetAddress,
    pub backends: Vec<Backend>,
    pub session_key: SessionKeyPolicy,
    pub arp_reply: ArpReplyPolicy,
    pub answer_backend_arp: bool,
    pub flow_priority: u16,
}
