//! Frame builders and parsers for tests.

use smoltcp::wire::{
    ArpOperation, ArpPacket, ArpRepr, EthernetAddress, EthernetFrame, EthernetProtocol,
};
use std::net::Ipv4Addr;

use crate::packet::{build_arp_request_frame, build_ipv4_frame};

// ============================================================================
// ARP Packets
// ============================================================================

/// Create a broadcast ARP request.
pub fn create_arp_request(sender_mac: [u8; 6], sender_ip: [u8; 4], target_ip: [u8; 4]) -> Vec<u8> {
    build_arp_request_frame(
        EthernetAddress(sender_mac),
        Ipv4Addr::from(sender_ip),
        Ipv4Addr::from(target_ip),
    )
}

/// Parsed ARP reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpReply {
    pub eth_src: [u8; 6],
    pub eth_dst: [u8; 6],
    pub sender_mac: [u8; 6],
    pub sender_ip: [u8; 4],
    pub target_mac: [u8; 6],
    pub target_ip: [u8; 4],
}

/// Parse an ARP reply frame. Returns `None` for anything but a reply.
pub fn parse_arp_reply(packet: &[u8]) -> Option<ArpReply> {
    let eth_frame = EthernetFrame::new_checked(packet).ok()?;
    if eth_frame.ethertype() != EthernetProtocol::Arp {
        return None;
    }

    let arp_packet = ArpPacket::new_checked(eth_frame.payload()).ok()?;
    let arp_repr = ArpRepr::parse(&arp_packet).ok()?;

    match arp_repr {
        ArpRepr::EthernetIpv4 {
            operation: ArpOperation::Reply,
            source_hardware_addr,
            source_protocol_addr,
            target_hardware_addr,
            target_protocol_addr,
        } => Some(ArpReply {
            eth_src: eth_frame.src_addr().0,
            eth_dst: eth_frame.dst_addr().0,
            sender_mac: source_hardware_addr.0,
            sender_ip: source_protocol_addr.octets(),
            target_mac: target_hardware_addr.0,
            target_ip: target_protocol_addr.octets(),
        }),
        _ => None,
    }
}

// ============================================================================
// IPv4 Packets
// ============================================================================

/// Create an IPv4 frame with a small opaque payload.
pub fn create_ipv4_packet(
    src_mac: [u8; 6],
    dst_mac: [u8; 6],
    src_ip: [u8; 4],
    dst_ip: [u8; 4],
) -> Vec<u8> {
    build_ipv4_frame(
        EthernetAddress(src_mac),
        EthernetAddress(dst_mac),
        Ipv4Addr::from(src_ip),
        Ipv4Addr::from(dst_ip),
        b"hello from test!",
    )
}
