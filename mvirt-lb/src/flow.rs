//! Flow rules and packet-out instructions sent to the switch.

use smoltcp::wire::{EthernetAddress, EthernetProtocol};
use std::fmt;
use std::net::Ipv4Addr;

use crate::packet::{DecodedPacket, NetworkHeader, format_mac};

/// Default priority for installed rules.
pub const DEFAULT_PRIORITY: u16 = 100;

/// Match predicate of a flow rule. `None` fields are wildcards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowMatch {
    pub eth_type: EthernetProtocol,
    pub in_port: u16,
    pub eth_src: Option<EthernetAddress>,
    pub ip_src: Option<Ipv4Addr>,
    pub ip_dst: Option<Ipv4Addr>,
}

impl FlowMatch {
    /// IPv4 traffic arriving on `in_port`.
    pub fn ipv4(in_port: u16) -> Self {
        Self {
            eth_type: EthernetProtocol::Ipv4,
            in_port,
            eth_src: None,
            ip_src: None,
            ip_dst: None,
        }
    }

    pub fn with_eth_src(mut self, mac: EthernetAddress) -> Self {
        self.eth_src = Some(mac);
        self
    }

    pub fn with_src(mut self, ip: Ipv4Addr) -> Self {
        self.ip_src = Some(ip);
        self
    }

    pub fn with_dst(mut self, ip: Ipv4Addr) -> Self {
        self.ip_dst = Some(ip);
        self
    }

    /// Whether a packet arriving on `in_port` matches.
    pub fn matches(&self, in_port: u16, packet: &DecodedPacket) -> bool {
        if self.in_port != in_port || self.eth_type != packet.eth.ethertype {
            return false;
        }
        if self.eth_src.is_some_and(|mac| mac != packet.eth.src) {
            return false;
        }
        if self.ip_src.is_none() && self.ip_dst.is_none() {
            return true;
        }
        match packet.ipv4() {
            Some(ip) => {
                self.ip_src.is_none_or(|src| src == ip.src)
                    && self.ip_dst.is_none_or(|dst| dst == ip.dst)
            }
            None => false,
        }
    }
}

/// Header rewrite applied before output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteAction {
    SetIpSrc(Ipv4Addr),
    SetIpDst(Ipv4Addr),
    SetEthSrc(EthernetAddress),
    SetEthDst(EthernetAddress),
}

impl RewriteAction {
    /// Apply the rewrite to decoded headers. IP rewrites are no-ops on
    /// non-IPv4 packets.
    pub fn apply(&self, packet: &mut DecodedPacket) {
        match (*self, &mut packet.network) {
            (RewriteAction::SetEthSrc(mac), _) => packet.eth.src = mac,
            (RewriteAction::SetEthDst(mac), _) => packet.eth.dst = mac,
            (RewriteAction::SetIpSrc(ip), NetworkHeader::Ipv4(hdr)) => hdr.src = ip,
            (RewriteAction::SetIpDst(ip), NetworkHeader::Ipv4(hdr)) => hdr.dst = ip,
            _ => {}
        }
    }
}

impl fmt::Display for RewriteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewriteAction::SetIpSrc(ip) => write!(f, "set_nw_src:{ip}"),
            RewriteAction::SetIpDst(ip) => write!(f, "set_nw_dst:{ip}"),
            RewriteAction::SetEthSrc(mac) => write!(f, "set_dl_src:{}", format_mac(mac)),
            RewriteAction::SetEthDst(mac) => write!(f, "set_dl_dst:{}", format_mac(mac)),
        }
    }
}

/// Translation direction of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleDirection {
    /// Client → backend: virtual destination rewritten to the backend.
    Forward,
    /// Backend → client: backend source rewritten to the virtual identity.
    Reverse,
}

impl RuleDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleDirection::Forward => "forward",
            RuleDirection::Reverse => "reverse",
        }
    }
}

/// A match + rewrite + output program for the switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRule {
    pub direction: RuleDirection,
    pub priority: u16,
    pub matches: FlowMatch,
    /// Rewrites, applied in order before output.
    pub actions: Vec<RewriteAction>,
    pub out_port: u16,
}

impl FlowRule {
    /// Whether `other` occupies the same flow table slot (same match and priority).
    pub fn same_slot(&self, other: &FlowRule) -> bool {
        self.priority == other.priority && self.matches == other.matches
    }

    /// Apply this rule's rewrites to `packet`.
    pub fn rewrite(&self, packet: &mut DecodedPacket) {
        for action in &self.actions {
            action.apply(packet);
        }
    }
}

impl fmt::Display for FlowRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] prio={} in_port={}",
            self.direction.as_str(),
            self.priority,
            self.matches.in_port
        )?;
        if let Some(mac) = self.matches.eth_src {
            write!(f, " dl_src={}", format_mac(&mac))?;
        }
        if let Some(src) = self.matches.ip_src {
            write!(f, " nw_src={src}")?;
        }
        if let Some(dst) = self.matches.ip_dst {
            write!(f, " nw_dst={dst}")?;
        }
        write!(f, " actions=")?;
        for action in &self.actions {
            write!(f, "{action},")?;
        }
        write!(f, "output:{}", self.out_port)
    }
}

/// One-shot packet emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketOut {
    /// Frame bytes. Ignored by the switch when `buffer_id` is set.
    pub data: Vec<u8>,
    /// Switch buffer holding the original frame.
    pub buffer_id: Option<u32>,
    /// Rewrites applied before output.
    pub actions: Vec<RewriteAction>,
    pub out_port: u16,
}

impl PacketOut {
    /// Emit a frame built by the controller as-is.
    pub fn frame(data: Vec<u8>, out_port: u16) -> Self {
        Self {
            data,
            buffer_id: None,
            actions: Vec::new(),
            out_port,
        }
    }
}
